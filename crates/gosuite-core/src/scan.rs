//! Candidate file rules and workspace listing.
//!
//! The rules follow the go tool's own ignore convention: directories named
//! `testdata` are never scanned, and neither are files or directories whose
//! name begins with `.` or `_`. Only `*_test.go` files can declare tests.

use std::path::{Component, Path, PathBuf};

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Suffix of Go test files.
pub const TEST_FILE_SUFFIX: &str = "_test.go";

/// Directory name reserved for ancillary test data.
pub const TESTDATA_DIR: &str = "testdata";

/// Include pattern for watchers and listings.
pub const TEST_FILE_GLOB: &str = "**/*_test.go";

/// True when the go tool ignores a file or directory with this name.
pub fn is_ignored_name(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_')
}

/// Longest workspace root that contains `path`.
pub fn owning_root<'a>(path: &Path, roots: &'a [PathBuf]) -> Option<&'a Path> {
    roots
        .iter()
        .filter(|root| path.starts_with(root))
        .max_by_key(|root| root.components().count())
        .map(PathBuf::as_path)
}

/// True when a directory at `relative` (to its workspace root) must not be scanned.
fn is_excluded_dir(relative: &Path) -> bool {
    relative.components().any(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name == TESTDATA_DIR || is_ignored_name(&name)
        }
        _ => false,
    })
}

/// Decide whether `path` may contain suite declarations.
///
/// Directory components are checked relative to the owning workspace root so
/// that a root living under a dot-directory is still scanned. Without an
/// owning root only `testdata` components disqualify a path.
pub fn is_candidate_file(path: &Path, roots: &[PathBuf]) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    if !name.ends_with(TEST_FILE_SUFFIX) || is_ignored_name(&name) {
        return false;
    }

    let Some(parent) = path.parent() else {
        return true;
    };
    match owning_root(path, roots) {
        Some(root) => match parent.strip_prefix(root) {
            Ok(relative) => !is_excluded_dir(relative),
            Err(_) => true,
        },
        None => !parent
            .components()
            .any(|c| matches!(c, Component::Normal(n) if n == TESTDATA_DIR)),
    }
}

/// Files found under one root, and whether listing stopped early.
#[derive(Debug, Default)]
pub struct Listing {
    pub files: Vec<PathBuf>,
    pub cancelled: bool,
}

/// List candidate files under `root` in deterministic order.
///
/// `is_cancelled` is polled once per directory entry; when it fires the
/// partial listing is returned.
pub fn list_candidate_files(root: &Path, is_cancelled: &dyn Fn() -> bool) -> Listing {
    let mut listing = Listing::default();
    let roots = [root.to_path_buf()];

    let keep = |entry: &DirEntry| {
        entry.depth() == 0
            || !entry.file_type().is_dir()
            || entry
                .path()
                .strip_prefix(root)
                .map(|relative| !is_excluded_dir(relative))
                .unwrap_or(true)
    };

    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(keep)
    {
        if is_cancelled() {
            listing.cancelled = true;
            break;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(root = ?root, error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_file() && is_candidate_file(entry.path(), &roots) {
            listing.files.push(entry.into_path());
        }
    }

    listing
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_candidate_file_names() {
        let roots = vec![PathBuf::from("/ws")];
        assert!(is_candidate_file(Path::new("/ws/pkg/foo_test.go"), &roots));
        assert!(!is_candidate_file(Path::new("/ws/pkg/foo.go"), &roots));
        assert!(!is_candidate_file(Path::new("/ws/pkg/foo_test.txt"), &roots));
        assert!(!is_candidate_file(Path::new("/ws/pkg/.foo_test.go"), &roots));
        assert!(!is_candidate_file(Path::new("/ws/pkg/_foo_test.go"), &roots));
    }

    #[test]
    fn test_candidate_excluded_directories() {
        let roots = vec![PathBuf::from("/ws")];
        assert!(!is_candidate_file(Path::new("/ws/pkg/testdata/a_test.go"), &roots));
        assert!(!is_candidate_file(Path::new("/ws/testdata/deep/a_test.go"), &roots));
        assert!(!is_candidate_file(Path::new("/ws/.git/a_test.go"), &roots));
        assert!(!is_candidate_file(Path::new("/ws/_vendor/a_test.go"), &roots));
    }

    #[test]
    fn test_root_under_dot_directory_is_scanned() {
        let roots = vec![PathBuf::from("/home/u/.cache/ws")];
        assert!(is_candidate_file(Path::new("/home/u/.cache/ws/pkg/a_test.go"), &roots));
    }

    #[test]
    fn test_candidate_without_root() {
        assert!(is_candidate_file(Path::new("/elsewhere/a_test.go"), &[]));
        assert!(!is_candidate_file(Path::new("/elsewhere/testdata/a_test.go"), &[]));
    }

    #[test]
    fn test_owning_root_prefers_longest() {
        let roots = vec![PathBuf::from("/ws"), PathBuf::from("/ws/nested")];
        assert_eq!(
            owning_root(Path::new("/ws/nested/a_test.go"), &roots),
            Some(Path::new("/ws/nested"))
        );
        assert_eq!(owning_root(Path::new("/other/a_test.go"), &roots), None);
    }

    #[test]
    fn test_list_candidate_files() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        for dir in ["a", "b", "a/testdata", ".hidden", "_skip"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        for file in [
            "a/x_test.go",
            "a/x.go",
            "b/y_test.go",
            "a/testdata/z_test.go",
            ".hidden/h_test.go",
            "_skip/s_test.go",
        ] {
            fs::write(root.join(file), "package p\n").unwrap();
        }

        let listing = list_candidate_files(root, &|| false);
        assert!(!listing.cancelled);
        assert_eq!(
            listing.files,
            vec![root.join("a/x_test.go"), root.join("b/y_test.go")]
        );
    }

    #[test]
    fn test_list_candidate_files_cancelled() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a_test.go"), "package p\n").unwrap();
        let listing = list_candidate_files(temp.path(), &|| true);
        assert!(listing.cancelled);
        assert!(listing.files.is_empty());
    }
}
