use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

pub struct NvPath;

impl NvPath {
    /// Standardize a local relative path or object key into the wire format:
    /// forward slashes, no leading slash, no empty or `.` segments.
    /// A trailing slash survives so directory markers stay recognizable.
    pub fn normalize(path: &str) -> String {
        Self::collapse(&path.replace('\\', "/"))
    }

    /// Like `normalize`, but backslashes are ordinary characters. Object keys and
    /// non-Windows file names may legally contain them.
    pub fn collapse(path: &str) -> String {
        let trailing = path.ends_with('/');

        let mut out = path
            .split('/')
            .filter(|seg| !seg.is_empty() && *seg != ".")
            .collect::<Vec<_>>()
            .join("/");

        if trailing && !out.is_empty() {
            out.push('/');
        }
        out
    }

    /// Sanitize a path to prevent directory traversal before it touches the filesystem.
    pub fn verify_safe(rel_path: &str) -> bool {
        let p = std::path::Path::new(rel_path);
        !rel_path.starts_with('/')
            && !rel_path.starts_with('\\')
            && !p.is_absolute()
            && !p
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
            && !rel_path.split(['/', '\\']).any(|seg| seg == "..")
    }

    /// Whether `key` lives in the namespace selected by `prefix`: the prefix itself
    /// (a single object) or anything underneath it when read as a directory.
    pub fn within_prefix(key: &str, prefix: &str) -> bool {
        let dir = NvPath::normalize(prefix);
        let dir = dir.trim_end_matches('/');
        if dir.is_empty() {
            return true;
        }
        key == dir
            || key
                .strip_prefix(dir)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Slash-separated relative path shared by the local and remote namespaces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalPath(String);

impl LogicalPath {
    /// From user input: either separator is accepted.
    pub fn new(raw: &str) -> Self {
        Self(NvPath::normalize(raw))
    }

    /// From an object key or a path already split on the host separator.
    pub fn from_key(key: &str) -> Self {
        Self(NvPath::collapse(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keys ending in `/` are pure directory markers and never transferable.
    pub fn is_directory_marker(&self) -> bool {
        self.0.ends_with('/')
    }

    pub fn file_name(&self) -> &str {
        self.0
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LogicalPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for LogicalPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LogicalPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_converts_windows_separators() {
        assert_eq!(NvPath::normalize("models\\v1\\weights.bin"), "models/v1/weights.bin");
    }

    #[test]
    fn normalize_strips_leading_and_repeated_slashes() {
        assert_eq!(NvPath::normalize("/data//raw/./a.csv"), "data/raw/a.csv");
        assert_eq!(NvPath::normalize("/"), "");
    }

    #[test]
    fn keys_keep_backslashes() {
        assert_eq!(LogicalPath::from_key("/dir//a\\b.txt").as_str(), "dir/a\\b.txt");
        assert_eq!(LogicalPath::new("dir\\b.txt").as_str(), "dir/b.txt");
    }

    #[test]
    fn normalize_keeps_directory_marker() {
        let marker = LogicalPath::new("checkpoints/");
        assert!(marker.is_directory_marker());
        assert_eq!(marker.as_str(), "checkpoints/");
        assert!(!LogicalPath::new("checkpoints/a.pt").is_directory_marker());
    }

    #[test]
    fn verify_safe_rejects_traversal_and_absolute() {
        assert!(NvPath::verify_safe("a/b.txt"));
        assert!(!NvPath::verify_safe("../etc/passwd"));
        assert!(!NvPath::verify_safe("a/../../b"));
        assert!(!NvPath::verify_safe("/etc/passwd"));
        assert!(!NvPath::verify_safe("..\\windows"));
    }

    #[test]
    fn within_prefix_treats_prefix_as_directory_or_file() {
        assert!(NvPath::within_prefix("models/a.bin", "models/"));
        assert!(NvPath::within_prefix("models/a.bin", "models"));
        assert!(NvPath::within_prefix("models/a.bin", "models/a.bin"));
        assert!(!NvPath::within_prefix("models2/a.bin", "models"));
        assert!(NvPath::within_prefix("anything", ""));
    }

    #[test]
    fn file_name_is_last_segment() {
        assert_eq!(LogicalPath::new("a/b/c.txt").file_name(), "c.txt");
        assert_eq!(LogicalPath::new("c.txt").file_name(), "c.txt");
    }
}
