//! Deterministic workspace traversal.
//!
//! [`WorkspaceWalk`] describes a tree; each call to [`WorkspaceWalk::iter`]
//! starts a fresh, lazy pass over it. Entries come out depth-first with
//! siblings sorted by name, so two passes over an unchanged tree yield the same
//! sequence. Directories are not yielded.

use std::path::PathBuf;

use walkdir::WalkDir;

/// One file found under the workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Path relative to the root, always `/`-separated.
    pub relative: String,
    pub absolute: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WorkspaceWalk {
    root: PathBuf,
}

impl WorkspaceWalk {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn iter(&self) -> WalkIter {
        WalkIter {
            root: self.root.clone(),
            inner: WalkDir::new(&self.root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter(),
        }
    }
}

pub struct WalkIter {
    root: PathBuf,
    inner: walkdir::IntoIter,
}

impl Iterator for WalkIter {
    type Item = walkdir::Result<WalkEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => return Some(Err(err)),
            };
            if entry.file_type().is_dir() {
                continue;
            }
            let absolute = entry.into_path();
            let relative = absolute
                .strip_prefix(&self.root)
                .unwrap_or(&absolute)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            return Some(Ok(WalkEntry { relative, absolute }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn relatives(walk: &WorkspaceWalk) -> Vec<String> {
        walk.iter().map(|e| e.unwrap().relative).collect()
    }

    #[test]
    fn test_walk_is_sorted_and_skips_dirs() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("res/values")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("res/values/strings.xml"), "x").unwrap();
        fs::write(root.join("classes.dex"), "x").unwrap();
        fs::write(root.join("a/b/c/deep.txt"), "x").unwrap();
        fs::write(root.join("AndroidManifest.xml"), "x").unwrap();

        let walk = WorkspaceWalk::new(root);
        assert_eq!(
            relatives(&walk),
            vec![
                "AndroidManifest.xml",
                "a/b/c/deep.txt",
                "classes.dex",
                "res/values/strings.xml",
            ]
        );
    }

    #[test]
    fn test_walk_is_restartable() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("x/y")).unwrap();
        fs::write(temp.path().join("x/y/z.txt"), "z").unwrap();
        fs::write(temp.path().join("top.txt"), "t").unwrap();

        let walk = WorkspaceWalk::new(temp.path());
        let first = relatives(&walk);
        let second = relatives(&walk);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);

        let entry = walk.iter().next().unwrap().unwrap();
        assert_eq!(entry.absolute, temp.path().join("top.txt"));
    }

    #[test]
    fn test_walk_missing_root_yields_error() {
        let temp = TempDir::new().unwrap();
        let walk = WorkspaceWalk::new(temp.path().join("missing"));
        let items: Vec<_> = walk.iter().collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }
}
