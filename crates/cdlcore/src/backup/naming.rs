//! Collision-free backup names.
//!
//! A requested name that matches an existing archive (case-insensitively)
//! gets a numeric suffix one above the highest suffix already used by the
//! same stem: `foo`, `foo2`, `foo3`. An archive without a suffix counts as 1.

/// Natural-sort key: text runs compare case-insensitively, digit runs
/// numerically.
pub fn natural_key(name: &str) -> Vec<NaturalPart> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut digits = String::new();
    for c in name.chars() {
        if c.is_ascii_digit() {
            if !text.is_empty() {
                parts.push(NaturalPart::Text(std::mem::take(&mut text)));
            }
            digits.push(c);
        } else {
            if !digits.is_empty() {
                parts.push(NaturalPart::Number(digits.parse().unwrap_or(u64::MAX)));
                digits.clear();
            }
            text.extend(c.to_lowercase());
        }
    }
    if !text.is_empty() {
        parts.push(NaturalPart::Text(text));
    }
    if !digits.is_empty() {
        parts.push(NaturalPart::Number(digits.parse().unwrap_or(u64::MAX)));
    }
    parts
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NaturalPart {
    Number(u64),
    Text(String),
}

/// Split a trailing digit run off `name`: `foo12` is (`foo`, 12), `foo` is
/// (`foo`, 1). A name made only of digits is its own stem.
fn split_suffix(name: &str) -> (&str, u64) {
    let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if stem.is_empty() {
        return (name, 1);
    }
    match natural_key(name).last() {
        Some(NaturalPart::Number(n)) => (stem, *n),
        _ => (name, 1),
    }
}

/// Name for a new backup requested as `requested`, given the stems of the
/// archives already present.
pub fn unique_backup_name(requested: &str, existing: &[String]) -> String {
    let wanted = requested.to_lowercase();
    if !existing.iter().any(|e| e.to_lowercase() == wanted) {
        return requested.to_string();
    }
    let (stem, _) = split_suffix(requested);
    let stem_lower = stem.to_lowercase();
    let highest = existing
        .iter()
        .filter_map(|e| {
            let (other, suffix) = split_suffix(e);
            (other.to_lowercase() == stem_lower).then_some(suffix)
        })
        .max()
        .unwrap_or(1);
    format!("{stem}{}", highest + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_free_name_unchanged() {
        assert_eq!(unique_backup_name("foo", &names(&["bar", "foo2"])), "foo");
    }

    #[test]
    fn test_exact_duplicate_gets_two() {
        assert_eq!(unique_backup_name("foo", &names(&["FOO"])), "foo2");
    }

    #[test]
    fn test_bumps_past_highest_suffix() {
        assert_eq!(
            unique_backup_name("Foo", &names(&["foo", "foo2", "foo7", "food"])),
            "Foo8"
        );
    }

    #[test]
    fn test_suffixed_request_bumps_stem() {
        assert_eq!(unique_backup_name("foo2", &names(&["foo", "foo2"])), "foo3");
        assert_eq!(unique_backup_name("FOO2", &names(&["foo", "foo2", "foo9"])), "FOO10");
        assert_eq!(unique_backup_name("foo3", &names(&["foo", "foo2"])), "foo3");
    }

    #[test]
    fn test_digit_only_name() {
        assert_eq!(unique_backup_name("2024", &names(&["2024"])), "20242");
    }

    #[test]
    fn test_natural_order() {
        let mut list = names(&["save10", "Save2", "save1"]);
        list.sort_by_key(|n| natural_key(n));
        assert_eq!(list, names(&["save1", "Save2", "save10"]));
    }
}
