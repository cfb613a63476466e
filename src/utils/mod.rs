//! Pure path helpers and content hashing
//!
//! Nothing in this module touches the filesystem; normalization is purely
//! lexical so it can run against the virtual tree.

use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

/// Generate a short hash of the given content
pub fn hash_content(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

/// Lexically normalize a path, resolving `.` and `..` components
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => continue,
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    parts.iter().map(|c| c.as_os_str()).collect()
}

/// Join a possibly-relative segment onto a base directory and normalize
pub fn join_normalized(base: &Path, segment: &str) -> PathBuf {
    if Path::new(segment).is_absolute() {
        normalize_path(Path::new(segment))
    } else {
        normalize_path(&base.join(segment))
    }
}

/// Clean a specifier-style path by removing `.` and `..` segments
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }

    if path.starts_with('/') {
        format!("/{}", parts.join("/"))
    } else {
        parts.join("/")
    }
}

/// Get relative path from base to target
pub fn relative_path(from: &Path, to: &Path) -> Option<String> {
    pathdiff::diff_paths(to, from).map(|p| p.display().to_string())
}

/// File name without any extension chain, e.g. `b.ios.js` → `b`
pub fn base_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match name.find('.') {
        Some(idx) if idx > 0 => name[..idx].to_string(),
        _ => name,
    }
}

/// Split `foo.ios.js` into (`foo`, Some("ios"), Some("js")) when the middle
/// segment names a configured platform or `native`; otherwise platform is None.
pub fn split_platform_ext(
    file_name: &str,
    platforms: &[String],
) -> (String, Option<String>, Option<String>) {
    let mut parts: Vec<&str> = file_name.split('.').collect();

    let ext = if parts.len() > 1 {
        parts.pop().map(|e| e.to_string())
    } else {
        None
    };

    let platform = match parts.last() {
        Some(&tag) if tag == "native" || platforms.iter().any(|p| p.as_str() == tag) => {
            parts.pop().map(|p| p.to_string())
        }
        _ => None,
    };

    (parts.join("."), platform, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize_path(Path::new("/a/b/c/")), PathBuf::from("/a/b/c"));
        assert_eq!(normalize_path(Path::new("/../a")), PathBuf::from("/a"));
    }

    #[test]
    fn test_join_normalized() {
        assert_eq!(
            join_normalized(Path::new("/r/src"), "../b"),
            PathBuf::from("/r/b")
        );
        assert_eq!(
            join_normalized(Path::new("/r/src"), "/abs/x"),
            PathBuf::from("/abs/x")
        );
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("./foo/bar"), "foo/bar");
        assert_eq!(clean_path("foo/../bar"), "bar");
        assert_eq!(clean_path("/foo/./bar/../baz"), "/foo/baz");
    }

    #[test]
    fn test_split_platform_ext() {
        let platforms = vec!["ios".to_string(), "android".to_string()];

        let (base, platform, ext) = split_platform_ext("b.ios.js", &platforms);
        assert_eq!(base, "b");
        assert_eq!(platform.as_deref(), Some("ios"));
        assert_eq!(ext.as_deref(), Some("js"));

        let (base, platform, ext) = split_platform_ext("b.native.js", &platforms);
        assert_eq!(base, "b");
        assert_eq!(platform.as_deref(), Some("native"));
        assert_eq!(ext.as_deref(), Some("js"));

        let (base, platform, ext) = split_platform_ext("button.test.js", &platforms);
        assert_eq!(base, "button.test");
        assert_eq!(platform, None);
        assert_eq!(ext.as_deref(), Some("js"));
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name(Path::new("/r/img@2x.ios.png")), "img@2x");
        assert_eq!(base_name(Path::new("/r/b.js")), "b");
    }

    #[test]
    fn test_hash_content() {
        let hash = hash_content(b"hello world");
        assert_eq!(hash.len(), 16);
    }
}
