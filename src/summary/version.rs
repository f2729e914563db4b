//! Version number ordering compatible with PHP's `version_compare`
//!
//! Versions are split into parts at `.`, `-`, `_`, `+` and at every change
//! between digits and non-digits. Numeric parts compare as numbers; known
//! pre-release words are ranked `dev < alpha = a < beta = b < RC = rc < # < pl = p`,
//! where `#` stands for any number and unknown words rank below `dev`.

use std::cmp::Ordering;

#[derive(Debug, PartialEq, Eq)]
enum Part<'a> {
    Number(u64),
    Word(&'a str),
}

impl Part<'_> {
    fn rank(&self) -> i8 {
        match self {
            Part::Number(_) => 4,
            Part::Word(word) => special_rank(word),
        }
    }
}

fn special_rank(word: &str) -> i8 {
    let lower = word.to_ascii_lowercase();
    match lower.as_str() {
        "dev" => 0,
        "alpha" | "a" => 1,
        "beta" | "b" => 2,
        "rc" => 3,
        "#" => 4,
        "pl" | "p" => 5,
        _ => -1,
    }
}

fn parts(version: &str) -> Vec<Part<'_>> {
    let mut result = Vec::new();
    for chunk in version.split(['.', '-', '_', '+']) {
        let bytes = chunk.as_bytes();
        let mut start = 0;
        while start < bytes.len() {
            let numeric = bytes[start].is_ascii_digit();
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() == numeric {
                end += 1;
            }
            let piece = &chunk[start..end];
            result.push(if numeric {
                Part::Number(piece.parse().unwrap_or(u64::MAX))
            } else {
                Part::Word(piece)
            });
            start = end;
        }
    }
    result
}

fn compare_parts(left: &Part<'_>, right: &Part<'_>) -> Ordering {
    match (left, right) {
        (Part::Number(a), Part::Number(b)) => a.cmp(b),
        _ => left.rank().cmp(&right.rank()),
    }
}

/// Compare two version strings
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let left_parts = parts(left);
    let right_parts = parts(right);

    for (a, b) in left_parts.iter().zip(right_parts.iter()) {
        let ordering = compare_parts(a, b);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    // A trailing number makes a version newer, a trailing pre-release word
    // makes it older: 1.0 < 1.0.1 but 1.0rc1 < 1.0.
    let common = left_parts.len().min(right_parts.len());
    match (left_parts.get(common), right_parts.get(common)) {
        (Some(extra), None) => extra.rank().cmp(&Part::Number(0).rank()).then(Ordering::Greater),
        (None, Some(extra)) => Part::Number(0).rank().cmp(&extra.rank()).then(Ordering::Less),
        _ => Ordering::Equal,
    }
}

/// Newest version first
pub fn compare_versions_desc(left: &str, right: &str) -> Ordering {
    compare_versions(right, left)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_parts() {
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("4.7.1", "4.7.1"), Ordering::Equal);
        assert_eq!(compare_versions("4.7", "4.7.1"), Ordering::Less);
        assert_eq!(compare_versions("10.0", "9.9.9"), Ordering::Greater);
    }

    #[test]
    fn test_pre_release_words() {
        assert_eq!(compare_versions("1.0rc1", "1.0"), Ordering::Less);
        assert_eq!(compare_versions("1.0-beta", "1.0-alpha"), Ordering::Greater);
        assert_eq!(compare_versions("1.0-RC2", "1.0-beta3"), Ordering::Greater);
        assert_eq!(compare_versions("1.0-dev", "1.0-alpha"), Ordering::Less);
        assert_eq!(compare_versions("1.0pl1", "1.0.1"), Ordering::Greater);
        assert_eq!(compare_versions("1.0-foo", "1.0-dev"), Ordering::Less);
    }

    #[test]
    fn test_descending_sort() {
        let mut versions = vec!["1.2", "1.10", "1.9.1", "2.0-beta", "2.0"];
        versions.sort_by(|a, b| compare_versions_desc(a, b));
        assert_eq!(versions, vec!["2.0", "2.0-beta", "1.10", "1.9.1", "1.2"]);
    }
}
