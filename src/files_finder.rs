// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
};

use regex::Regex;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum FindError {
    #[error(transparent)]
    RegexError(#[from] regex::Error),
    #[error("The search-pattern is empty")]
    EmptyPattern,
    #[error("The search base is not a directory: '{0:?}'")]
    BaseNotADirectory(PathBuf),
    #[error("The search-pattern misses a file-name template to search for: '{0:?}'")]
    PathMissingFileName(PathBuf),
    #[error("Path part {0} is not valid UTF-8: '{1:?}'")]
    PathPartNotUtf8(&'static str, OsString),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    WalkError(#[from] walkdir::Error),
}

/// What a compiled rglob pattern gets matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchTarget {
    FileName,
    RelativePath,
}

/// A compiled recursive-glob pattern, like `*.nc` or `CMIP6Plus/**/*.nc`.
///
/// Patterns without a `/` match against the file name only,
/// all others against the path relative to the search base.
#[derive(Debug, Clone)]
pub struct RGlob {
    pattern: String,
    regex: Regex,
    target: MatchTarget,
}

impl RGlob {
    /// Compiles a glob pattern.
    ///
    /// # Errors
    ///
    /// If the pattern is empty.
    pub fn new(pattern: &str) -> Result<Self, FindError> {
        if pattern.is_empty() {
            return Err(FindError::EmptyPattern);
        }
        let target = if pattern.contains('/') {
            MatchTarget::RelativePath
        } else {
            MatchTarget::FileName
        };
        let regex = Regex::new(&glob_to_regex(pattern))?;
        Ok(Self {
            pattern: pattern.to_owned(),
            regex,
            target,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    fn is_match(&self, base: &Path, path: &Path) -> bool {
        match self.target {
            MatchTarget::FileName => extract_file_name(path)
                .map(|file_name| self.regex.is_match(&file_name))
                .unwrap_or(false),
            MatchTarget::RelativePath => path
                .strip_prefix(base)
                .ok()
                .and_then(Path::to_str)
                .is_some_and(|rel| self.regex.is_match(rel)),
        }
    }
}

/// Translates a glob pattern (`*`, `**` and `?`) into an anchored regex.
#[must_use]
pub fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(chr) = chars.next() {
        match chr {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // `**/` also matches zero directories
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        regex.push_str("(?:.*/)?");
                    } else {
                        regex.push_str(".*");
                    }
                } else {
                    regex.push_str("[^/]*");
                }
            }
            '?' => regex.push_str("[^/]"),
            other => regex.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    regex.push('$');
    regex
}

fn path_part_to_string(
    path_part_name: &'static str,
    path_part: &OsStr,
) -> Result<String, FindError> {
    path_part
        .to_str()
        .ok_or_else(|| FindError::PathPartNotUtf8(path_part_name, path_part.to_os_string()))
        .map(ToOwned::to_owned)
}

pub fn extract_file_name(path: impl AsRef<Path>) -> Result<String, FindError> {
    let path = path.as_ref();
    let raw = path
        .file_name()
        .ok_or_else(|| FindError::PathMissingFileName(path.to_path_buf()))?;
    path_part_to_string("file-name", raw)
}

/// Finds all files below `base` matching `pattern`.
///
/// Symbolic links are followed,
/// and a linked file is reported under the path of the link.
/// The result is sorted, so it does not depend on directory listing order.
///
/// # Errors
///
/// If `base` is not a directory,
/// or a directory can not be read.
pub fn find_recursive(base: impl AsRef<Path>, pattern: &RGlob) -> Result<Vec<PathBuf>, FindError> {
    let base_path = base.as_ref();
    if !base_path.is_dir() {
        return Err(FindError::BaseNotADirectory(base_path.to_path_buf()));
    }
    tracing::trace!("find_recursive - base: '{}' ...", base_path.display());
    let mut files = vec![];
    for entry in WalkDir::new(base_path).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.loop_ancestor().is_some() => {
                tracing::warn!("Skipping symbolic link loop: {err}");
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        if entry.file_type().is_file() && pattern.is_match(base_path, entry.path()) {
            tracing::trace!("find_recursive - matching file: '{}'", entry.path().display());
            files.push(entry.into_path());
        }
    }
    files.sort();
    tracing::trace!("find_recursive done.");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_glob_to_regex_file_name() {
        let glob = RGlob::new("*.nc").unwrap();
        assert!(glob.regex.is_match("tos_input4MIPs.nc"));
        assert!(!glob.regex.is_match("tos_input4MIPs.nc.bak"));
        assert!(!glob.regex.is_match("dir/tos.nc"));
    }

    #[test]
    fn test_glob_to_regex_double_star() {
        let glob = RGlob::new("input4MIPs/**/*.nc").unwrap();
        assert!(glob.regex.is_match("input4MIPs/a.nc"));
        assert!(glob.regex.is_match("input4MIPs/x/y/a.nc"));
        assert!(!glob.regex.is_match("other/a.nc"));
    }

    #[test]
    fn test_find_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("a").join("b");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("one.nc"), "").unwrap();
        fs::write(dir.path().join("two.nc"), "").unwrap();
        fs::write(dir.path().join("three.txt"), "").unwrap();

        let found = find_recursive(dir.path(), &RGlob::new("*.nc").unwrap()).unwrap();
        assert_eq!(found, vec![sub.join("one.nc"), dir.path().join("two.nc")]);
    }

    #[test]
    fn test_find_recursive_requires_dir() {
        let dir = tempfile::tempdir().unwrap();
        let res = find_recursive(dir.path().join("missing"), &RGlob::new("*").unwrap());
        assert!(matches!(res, Err(FindError::BaseNotADirectory(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_find_recursive_follows_links() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let elsewhere = dir.path().join("elsewhere");
        fs::create_dir_all(&data).unwrap();
        fs::create_dir_all(elsewhere.join("sub")).unwrap();
        fs::write(data.join("plain.nc"), "").unwrap();
        fs::write(elsewhere.join("real.nc"), "").unwrap();
        fs::write(elsewhere.join("sub").join("deep.nc"), "").unwrap();
        std::os::unix::fs::symlink(elsewhere.join("real.nc"), data.join("linked.nc")).unwrap();
        std::os::unix::fs::symlink(elsewhere.join("sub"), data.join("linked_dir")).unwrap();
        // a loop must not hang or fail the search
        std::os::unix::fs::symlink(&data, data.join("loop")).unwrap();

        let found = find_recursive(&data, &RGlob::new("*.nc").unwrap()).unwrap();
        assert_eq!(
            found,
            vec![
                data.join("linked.nc"),
                data.join("linked_dir").join("deep.nc"),
                data.join("plain.nc"),
            ]
        );
    }
}
