use std::path::{Path, PathBuf};

use crate::error::GulpError;

pub const GULPFILE_NAME: &str = "gulpfile.js";

/// Find gulpfiles in `folders` and in each configured sub-folder of them.
///
/// Results keep search order: a folder's own gulpfile comes before those in
/// its `extra_paths`.
pub fn find_gulpfiles(folders: &[PathBuf], extra_paths: &[String]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for folder in folders {
        let candidates =
            std::iter::once(folder.clone()).chain(extra_paths.iter().map(|p| folder.join(p)));
        for candidate in candidates {
            let gulpfile = candidate.join(GULPFILE_NAME);
            if gulpfile.is_file() && !found.contains(&gulpfile) {
                tracing::debug!(path = %gulpfile.display(), "found gulpfile");
                found.push(gulpfile);
            }
        }
    }
    found
}

/// First gulpfile found, or [`GulpError::NoGulpfile`].
pub fn first_gulpfile(folders: &[PathBuf], extra_paths: &[String]) -> Result<PathBuf, GulpError> {
    find_gulpfiles(folders, extra_paths)
        .into_iter()
        .next()
        .ok_or(GulpError::NoGulpfile {
            searched: folders.len(),
        })
}

/// Directory tasks of `gulpfile` run in.
pub fn working_dir_of(gulpfile: &Path) -> PathBuf {
    gulpfile
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_root_then_nested() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("web")).unwrap();
        std::fs::write(root.join(GULPFILE_NAME), "").unwrap();
        std::fs::write(root.join("web").join(GULPFILE_NAME), "").unwrap();

        let found = find_gulpfiles(&[root.clone()], &["web".into(), "missing".into()]);
        assert_eq!(
            found,
            vec![root.join(GULPFILE_NAME), root.join("web").join(GULPFILE_NAME)]
        );
        assert_eq!(working_dir_of(&found[1]), root.join("web"));
    }

    #[test]
    fn no_gulpfile_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = first_gulpfile(&[dir.path().to_path_buf()], &[]).unwrap_err();
        assert!(matches!(err, GulpError::NoGulpfile { searched: 1 }));
    }
}
