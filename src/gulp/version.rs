//! Parsing `gulp -v` output.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;

/// Assumed when `gulp -v` does not report a version.
pub const FALLBACK_VERSION: &str = "3.6.0";

/// First CLI version that understands `--tasks-simple`.
const TASKS_SIMPLE_SINCE: &str = "3.7.0";

static VERSION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(CLI|Local) version:? v?(\d+\.\d+\.\d+)").expect("version pattern is valid")
});

/// Versions reported by `gulp -v`, e.g.
///
/// ```text
/// [10:00:00] CLI version 3.9.1
/// [10:00:00] Local version 3.9.1
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GulpVersion {
    cli: Option<String>,
    local: Option<String>,
}

impl GulpVersion {
    pub fn parse(text: &str) -> Self {
        let mut cli = None;
        let mut local = None;
        for caps in VERSION_LINE.captures_iter(text) {
            let slot = if &caps[1] == "CLI" { &mut cli } else { &mut local };
            if slot.is_none() {
                *slot = Some(caps[2].to_string());
            }
        }
        Self { cli, local }
    }

    pub fn cli_version(&self) -> &str {
        self.cli.as_deref().unwrap_or(FALLBACK_VERSION)
    }

    pub fn local_version(&self) -> &str {
        self.local.as_deref().unwrap_or(FALLBACK_VERSION)
    }

    pub fn supports_tasks_simple(&self) -> bool {
        compare_versions(self.cli_version(), TASKS_SIMPLE_SINCE) != Ordering::Less
    }
}

/// Compare dotted versions numerically, component by component.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> { v.split('.').map(|c| c.parse().unwrap_or(0)).collect() };
    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| a.get(i).unwrap_or(&0).cmp(b.get(i).unwrap_or(&0)))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}
