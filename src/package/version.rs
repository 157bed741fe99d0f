//! Version ordering for updates.

use std::cmp::Ordering;

/// Compare two version strings.
///
/// A leading `v` is ignored. Dot-separated segments are compared
/// numerically when both are numbers and lexically otherwise; a missing
/// segment counts as `0`, so `1.2` equals `1.2.0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = normalize(a);
    let b = normalize(b);

    let left: Vec<&str> = a.split('.').collect();
    let right: Vec<&str> = b.split('.').collect();

    for i in 0..left.len().max(right.len()) {
        let l = left.get(i).copied().unwrap_or("0");
        let r = right.get(i).copied().unwrap_or("0");
        let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(l), Ok(r)) => l.cmp(&r),
            _ => l.cmp(r),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Check if two version strings name the same version.
pub fn versions_match(a: &str, b: &str) -> bool {
    compare_versions(a, b) == Ordering::Equal
}

fn normalize(version: &str) -> &str {
    let version = version.trim();
    version.strip_prefix('v').unwrap_or(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_segments() {
        assert_eq!(compare_versions("2.0", "2.1"), Ordering::Less);
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0", "1.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_v_prefix_and_padding() {
        assert!(versions_match("v1.0.0", "1.0.0"));
        assert!(versions_match("1.2", "1.2.0"));
        assert_eq!(compare_versions("v1", "1.0.1"), Ordering::Less);
    }

    #[test]
    fn test_lexical_fallback() {
        assert_eq!(compare_versions("1.0.beta", "1.0.alpha"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0-rc1", "1.0.0-rc2"), Ordering::Less);
        assert!(!versions_match("1.0.0", "unknown"));
    }
}
