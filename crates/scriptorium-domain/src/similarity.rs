//! Token-overlap similarity used for fuzzy citation matching and near-duplicate detection

use std::collections::BTreeSet;

/// Lowercase, collapse whitespace and trim
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase alphanumeric tokens of at least two characters
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard similarity of the two token sets (`|A ∩ B| / |A ∪ B|`)
///
/// Two texts without any tokens are considered identical.
pub fn jaccard(a: &str, b: &str) -> f64 {
    jaccard_tokens(&tokenize(a), &tokenize(b))
}

/// `jaccard` over token sets already built with `tokenize`
pub fn jaccard_tokens(left: &BTreeSet<String>, right: &BTreeSet<String>) -> f64 {
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let shared = left.intersection(right).count() as f64;
    let union = left.union(right).count() as f64;
    shared / union
}

/// Overlap coefficient (`|A ∩ B| / min(|A|, |B|)`)
///
/// Tolerates one side being an abbreviation of the other, e.g. an author
/// cited as "Lovelace" against chunk metadata "Ada Lovelace".
pub fn overlap_coefficient(a: &str, b: &str) -> f64 {
    let left = tokenize(a);
    let right = tokenize(b);
    let smaller = left.len().min(right.len());
    if smaller == 0 {
        return if left.is_empty() && right.is_empty() { 1.0 } else { 0.0 };
    }
    left.intersection(&right).count() as f64 / smaller as f64
}

/// Whether two bibliographic strings approximately match
pub fn fuzzy_match(a: &str, b: &str, threshold: f64) -> bool {
    normalize_text(a) == normalize_text(b) || overlap_coefficient(a, b) >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jaccard_bounds() {
        assert_eq!(jaccard("the cat sat", "the cat sat"), 1.0);
        assert_eq!(jaccard("alpha beta", "gamma delta"), 0.0);
        let partial = jaccard("alpha beta gamma", "alpha beta delta");
        assert!(partial > 0.4 && partial < 0.6);
    }

    #[test]
    fn test_overlap_handles_abbreviation() {
        assert_eq!(overlap_coefficient("Lovelace", "Ada Lovelace"), 1.0);
        assert!(fuzzy_match("Notes on the Engine", "notes on the  engine", 0.9));
        assert!(!fuzzy_match("Babbage", "Ada Lovelace", 0.5));
    }

    #[test]
    fn test_token_sets_match_text_form() {
        let (a, b) = ("Light bends near mass", "light BENDS near stars");
        assert_eq!(jaccard_tokens(&tokenize(a), &tokenize(b)), jaccard(a, b));
        assert_eq!(jaccard_tokens(&BTreeSet::new(), &BTreeSet::new()), 1.0);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_text("  Hello\n  World "), "hello world");
    }
}
