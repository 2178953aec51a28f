//! Text similarity scoring for fuzzy cache lookups
//!
//! Pure functions, no I/O and no state. [`similarity`] drives the fuzzy
//! matching in the response cache but is usable standalone.

/// Length ratio below which strings are scored without an edit-distance pass
const LENGTH_RATIO_CUTOFF: f64 = 0.5;

/// Normalize text for comparison
///
/// Lowercases, strips every character that is neither a word character
/// (Unicode alphanumeric or `_`) nor whitespace, and collapses whitespace
/// runs to single spaces with no leading or trailing remainder.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped: String = lowered
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Score how similar two strings are, in `[0, 1]`
///
/// Both inputs are normalized first; strings that differ only in case,
/// punctuation, or whitespace score `1.0`. Pairs whose char lengths differ by
/// more than half are penalized to `ratio * 0.5` without computing edit
/// distance. Otherwise the score is `1 - levenshtein / max_len` over the
/// normalized char sequences.
pub fn similarity(a: &str, b: &str) -> f64 {
    let s1 = normalize(a);
    let s2 = normalize(b);

    if s1 == s2 {
        return 1.0;
    }

    let c1: Vec<char> = s1.chars().collect();
    let c2: Vec<char> = s2.chars().collect();
    let max_len = c1.len().max(c2.len());
    let min_len = c1.len().min(c2.len());

    let length_ratio = min_len as f64 / max_len.max(1) as f64;
    if length_ratio < LENGTH_RATIO_CUTOFF {
        return length_ratio * 0.5;
    }

    let distance = levenshtein(&c1, &c2);
    1.0 - distance as f64 / max_len as f64
}

/// Classic Levenshtein distance with unit insert/delete/substitute costs,
/// computed over the full matrix with no early exit
fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1) // deletion
                .min(curr[j - 1] + 1) // insertion
                .min(prev[j - 1] + cost); // substitution
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
