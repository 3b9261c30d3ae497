//! Ignore-glob directory walking (spec.md section 4.3 "walk").
//!
//! Mirrors a drop owner's `.syncrignore`-style file list: a set of glob
//! patterns matched against paths relative to the drop root. The drop's own
//! metadata directory is always excluded, independent of the caller's
//! patterns.

use glob::Pattern;
use std::path::{Path, PathBuf};
use syncr_core::constants::METADATA_DIR_NAME;
use syncr_core::error::SyncrResult;

/// Recursively walks `root`, returning the relative path of every regular
/// file not excluded by `ignore_patterns` or a path component equal to
/// [`METADATA_DIR_NAME`].
///
/// `ignore_patterns` are glob patterns matched against the path relative to
/// `root` (using `/` separators regardless of platform), the same way a
/// drop owner's ignore file works.
pub fn walk(root: &Path, ignore_patterns: &[String]) -> SyncrResult<Vec<PathBuf>> {
    let patterns: Vec<Pattern> = ignore_patterns
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .collect();

    let mut out = Vec::new();
    walk_dir(root, root, &patterns, &mut out)?;
    Ok(out)
}

fn walk_dir(
    root: &Path,
    dir: &Path,
    patterns: &[Pattern],
    out: &mut Vec<PathBuf>,
) -> SyncrResult<()> {
    let mut entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => return Err(syncr_core::error::SyncrError::io(dir, e)),
    };

    while let Some(entry) = entries.next() {
        let entry = entry.map_err(|e| syncr_core::error::SyncrError::io(dir, e))?;
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(&path);

        if relative
            .components()
            .any(|c| c.as_os_str() == METADATA_DIR_NAME)
        {
            continue;
        }

        if is_ignored(relative, patterns) {
            continue;
        }

        let file_type = entry
            .file_type()
            .map_err(|e| syncr_core::error::SyncrError::io(&path, e))?;
        if file_type.is_dir() {
            walk_dir(root, &path, patterns, out)?;
        } else if file_type.is_file() {
            out.push(relative.to_path_buf());
        }
    }
    Ok(())
}

fn is_ignored(relative: &Path, patterns: &[Pattern]) -> bool {
    let relative_str = relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
    patterns.iter().any(|p| p.matches(&relative_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_finds_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"b").unwrap();

        let mut found = walk(dir.path(), &[]).unwrap();
        found.sort();
        assert_eq!(
            found,
            vec![PathBuf::from("a.txt"), PathBuf::from("sub/b.txt")]
        );
    }

    #[test]
    fn walk_always_excludes_metadata_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(METADATA_DIR_NAME)).unwrap();
        std::fs::write(dir.path().join(METADATA_DIR_NAME).join("drop.meta"), b"x").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let found = walk(dir.path(), &[]).unwrap();
        assert_eq!(found, vec![PathBuf::from("a.txt")]);
    }

    #[test]
    fn walk_respects_ignore_patterns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("skip.log"), b"a").unwrap();

        let found = walk(dir.path(), &["*.log".to_string()]).unwrap();
        assert_eq!(found, vec![PathBuf::from("keep.txt")]);
    }
}
