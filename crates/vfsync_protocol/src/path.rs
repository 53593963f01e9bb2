//! Canonical path handling.
//!
//! Every file path in a document starts with `/`, uses `/` as separator and
//! contains no empty, `.` or `..` segments.

/// Canonicalizes `path`.
///
/// Backslashes are treated as separators and `..` never climbs above root.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Whether `path` equals `prefix` or lies below it. Both must be canonical.
#[must_use]
pub fn is_under(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Moves `path` from below `from` to below `to`, or `None` if it is not under `from`.
#[must_use]
pub fn rebase(path: &str, from: &str, to: &str) -> Option<String> {
    if !is_under(path, from) {
        return None;
    }
    let rest = if from == "/" { path } else { &path[from.len()..] };
    if rest.is_empty() {
        return Some(to.to_string());
    }
    Some(if to == "/" {
        rest.to_string()
    } else {
        format!("{to}{rest}")
    })
}

/// Parent directory of a canonical path. The root is its own parent.
#[must_use]
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Last segment of a canonical path.
#[must_use]
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_messy_paths() {
        assert_eq!(normalize_path("src/app.js"), "/src/app.js");
        assert_eq!(normalize_path("//src/./lib//x.ts/"), "/src/lib/x.ts");
        assert_eq!(normalize_path("/a/../../b"), "/b");
        assert_eq!(normalize_path("a\\b"), "/a/b");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn prefix_matching_respects_segments() {
        assert!(is_under("/src/a.js", "/src"));
        assert!(is_under("/src", "/src"));
        assert!(!is_under("/srcs/a.js", "/src"));
        assert!(is_under("/anything", "/"));
    }

    #[test]
    fn rebase_moves_subtrees() {
        assert_eq!(rebase("/src/a.js", "/src", "/lib").as_deref(), Some("/lib/a.js"));
        assert_eq!(rebase("/src", "/src", "/lib").as_deref(), Some("/lib"));
        assert_eq!(rebase("/other", "/src", "/lib"), None);
        assert_eq!(rebase("/a/b", "/a", "/").as_deref(), Some("/b"));
    }

    #[test]
    fn parent_and_name() {
        assert_eq!(parent_dir("/src/a.js"), "/src");
        assert_eq!(parent_dir("/a.js"), "/");
        assert_eq!(file_name("/src/a.js"), "a.js");
    }

    proptest::proptest! {
        #[test]
        fn normalization_is_idempotent(path in "[a-z./\\\\]{0,24}") {
            let once = normalize_path(&path);
            proptest::prop_assert_eq!(normalize_path(&once), once.clone());
            proptest::prop_assert!(once.starts_with('/'));
            proptest::prop_assert!(!once.split('/').any(|s| s == ".." || s == "."));
        }
    }
}
