//! Child environment construction.

use std::collections::BTreeMap;

/// Copy of the current OS environment with an optional `PATH` override.
///
/// An empty override is ignored so a blank config value cannot wipe `PATH`.
pub fn build_environment(path_override: Option<&str>) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect();

    if let Some(path) = path_override.filter(|p| !p.is_empty()) {
        // Windows keys are case-insensitive; replace whatever spelling exists.
        let existing = env.keys().find(|k| k.eq_ignore_ascii_case("PATH")).cloned();
        if let Some(key) = existing.filter(|_| cfg!(windows)) {
            env.remove(&key);
        }
        env.insert("PATH".to_string(), path.to_string());
    }

    env
}
