//! Slash-separated virtual path helpers.
//!
//! Virtual paths always use `/`, independent of the host platform.

/// Lexically normalizes a path: collapses repeated slashes, drops `.`
/// elements and resolves `..` against the preceding element. A rooted path
/// never climbs above `/`. The empty path cleans to `.`.
#[must_use]
pub fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            name => parts.push(name),
        }
    }

    let joined = parts.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Joins elements with `/` and cleans the result. Empty elements are ignored.
#[must_use]
pub fn join(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        String::new()
    } else {
        clean(&joined)
    }
}

/// Last element of a path.
#[must_use]
pub fn base(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
}

/// Everything but the last element, cleaned.
#[must_use]
pub fn dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => clean(&path[..=idx]),
        None => ".".to_string(),
    }
}

/// Appends a trailing slash unless the path is the root.
#[must_use]
pub fn fill_slash(path: &str) -> String {
    if path == "/" {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Splits an absolute virtual path into `["/", "a", "b"]`. Relative paths
/// yield nothing.
#[must_use]
pub fn split(path: &str) -> Vec<String> {
    if !path.starts_with('/') {
        return Vec::new();
    }
    let cleaned = clean(path);
    let mut parts = vec!["/".to_string()];
    parts.extend(
        cleaned
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    );
    parts
}

/// Whether `candidate` lies strictly below `root` once both are cleaned.
#[must_use]
pub fn is_within(root: &str, candidate: &str) -> bool {
    clean(candidate).starts_with(&fill_slash(&clean(root)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("", ".")]
    #[case("/", "/")]
    #[case("a//b/./c/", "a/b/c")]
    #[case("/a/../../b", "/b")]
    #[case("../a", "../a")]
    #[case("a/..", ".")]
    #[case("uploads/7///", "uploads/7")]
    fn test_clean(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(clean(input), expected);
    }

    #[rstest]
    #[case("/docs/a.txt", "/docs", "a.txt")]
    #[case("/a.txt", "/", "a.txt")]
    #[case("a.txt", ".", "a.txt")]
    #[case("/docs/", "/docs", "docs")]
    fn test_dir_and_base(#[case] input: &str, #[case] d: &str, #[case] b: &str) {
        assert_eq!(dir(input), d);
        assert_eq!(base(input), b);
    }

    #[test]
    fn test_split() {
        assert_eq!(split("/"), vec!["/"]);
        assert_eq!(split("/a/b/"), vec!["/", "a", "b"]);
        assert!(split("a/b").is_empty());
    }

    #[test]
    fn test_join_and_within() {
        assert_eq!(join(&["/dst", "a/../b.txt"]), "/dst/b.txt");
        assert_eq!(join(&["uploads/1", ""]), "uploads/1");
        assert!(is_within("/dst", "/dst/a/b.txt"));
        assert!(!is_within("/dst", "/dst/../etc/passwd"));
        assert!(!is_within("/dst", "/dstx/a"));
        assert!(is_within("/", "/a"));
    }

    proptest! {
        #[test]
        fn prop_clean_is_idempotent(path in "[a-z./]{0,24}") {
            let once = clean(&path);
            prop_assert_eq!(clean(&once), once.clone());
            prop_assert!(!once.contains("//"));
        }

        #[test]
        fn prop_rooted_stays_rooted(path in "/[a-z./]{0,24}") {
            let cleaned = clean(&path);
            prop_assert!(cleaned.starts_with('/'));
            prop_assert!(!cleaned.split('/').any(|s| s == ".."));
        }
    }
}
