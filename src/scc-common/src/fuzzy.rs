//! Fuzzy string matching, used by worktree switching and pickers.

/// Fuzzy match score between 0 and 100, where 100 is an exact match.
pub fn fuzzy_score(pattern: &str, text: &str) -> u32 {
    if pattern.is_empty() {
        return 100;
    }
    if text.is_empty() {
        return 0;
    }

    let pattern_lower = pattern.to_lowercase();
    let text_lower = text.to_lowercase();

    if text_lower == pattern_lower {
        return 100;
    }
    if text_lower.starts_with(&pattern_lower) {
        return 90;
    }
    if text_lower.contains(&pattern_lower) {
        return 70;
    }

    // Subsequence match: all pattern characters present in order.
    let pattern_chars: Vec<char> = pattern_lower.chars().collect();
    let mut pattern_idx = 0;
    let mut matches = 0u32;
    let mut consecutive = 0u32;
    let mut max_consecutive = 0u32;

    for c in text_lower.chars() {
        if pattern_idx < pattern_chars.len() && c == pattern_chars[pattern_idx] {
            matches += 1;
            consecutive += 1;
            max_consecutive = max_consecutive.max(consecutive);
            pattern_idx += 1;
        } else {
            consecutive = 0;
        }
    }

    if pattern_idx == pattern_chars.len() {
        let match_bonus = (matches as f32 / text.len() as f32 * 20.0) as u32;
        let consecutive_bonus = (max_consecutive as f32 / pattern.len() as f32 * 10.0) as u32;
        (50 + match_bonus + consecutive_bonus).min(69)
    } else {
        0
    }
}

/// Filter and sort items by fuzzy score, best first.
///
/// Returns `(index, score)` pairs for items scoring above zero.
pub fn fuzzy_filter<T, F>(items: &[T], pattern: &str, get_text: F) -> Vec<(usize, u32)>
where
    F: Fn(&T) -> &str,
{
    let mut scored: Vec<(usize, u32)> = items
        .iter()
        .enumerate()
        .map(|(i, item)| (i, fuzzy_score(pattern, get_text(item))))
        .filter(|(_, score)| *score > 0)
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins() {
        assert_eq!(fuzzy_score("fix-auth", "fix-auth"), 100);
        assert_eq!(fuzzy_score("FIX-AUTH", "fix-auth"), 100);
    }

    #[test]
    fn prefix_beats_substring() {
        assert!(fuzzy_score("fix", "fix-auth") > fuzzy_score("auth", "fix-auth"));
    }

    #[test]
    fn subsequence_scores_below_substring() {
        let sub = fuzzy_score("fa", "fix-auth");
        assert!(sub > 0 && sub < 70);
    }

    #[test]
    fn unrelated_scores_zero() {
        assert_eq!(fuzzy_score("zzz", "fix-auth"), 0);
    }

    #[test]
    fn filter_orders_by_score() {
        let items = vec!["fix-auth", "feature-api", "fix-api-auth"];
        let results = fuzzy_filter(&items, "fix", |s| s);
        assert_eq!(results.len(), 2);
        assert_eq!(items[results[0].0], "fix-auth");
    }
}
