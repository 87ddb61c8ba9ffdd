//! Subsequence fuzzy matching
//!
//! `needle` matches `haystack` when its characters appear in order, not
//! necessarily next to each other. Matching is greedy: each needle character
//! takes the first occurrence after the previous match. The score starts at
//! 1, and every match after the first adds `1 / (gap + 1)`, where `gap` is
//! the number of skipped haystack characters since the previous match.
//! Tight clusters therefore score higher than scattered ones.

/// Score `needle` against `haystack`. `0.0` means no match.
pub fn score(needle: &str, haystack: &str) -> f64 {
    let mut total = 1.0;
    let mut hay = haystack.chars().enumerate();
    let mut last: Option<usize> = None;

    for c in needle.chars() {
        let Some((at, _)) = hay.by_ref().find(|(_, h)| *h == c) else {
            return 0.0;
        };
        if let Some(prev) = last {
            let gap = at - prev - 1;
            total += 1.0 / (gap as f64 + 1.0);
        }
        last = Some(at);
    }
    total
}
