//! Rule-based fallback: skill tag coverage.

use std::collections::BTreeSet;

/// Fraction of `required` skills present in `offered`, compared case-insensitively.
/// 0 when nothing is required.
pub(crate) fn skill_coverage(required: &BTreeSet<String>, offered: &BTreeSet<String>) -> f32 {
    let required: BTreeSet<String> = required
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    if required.is_empty() {
        return 0.0;
    }
    let offered: BTreeSet<String> = offered.iter().map(|s| s.trim().to_lowercase()).collect();
    let covered = required.intersection(&offered).count();
    covered as f32 / required.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[rstest]
    #[case(&["sql", "csv"], &["SQL", "CSV", "json"], 1.0)]
    #[case(&["sql", "csv"], &["csv"], 0.5)]
    #[case(&["Rust"], &["go"], 0.0)]
    #[case(&[], &["go"], 0.0)]
    #[case(&["sql", "SQL "], &["sql"], 1.0)]
    fn coverage(#[case] required: &[&str], #[case] offered: &[&str], #[case] expected: f32) {
        assert_eq!(skill_coverage(&set(required), &set(offered)), expected);
    }
}
