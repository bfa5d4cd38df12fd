use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DEFAULT_LIMIT: usize = 200;
pub const MAX_LIMIT: usize = 2000;

/// An emoji as the server identifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmojiRecord {
    pub id: String,
    pub name: String,
}

/// Catalog row with its lowercase name precomputed for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEmoji {
    pub id: String,
    pub name: String,
    lower: String,
}

impl IndexedEmoji {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            lower: name.to_lowercase(),
            name,
        }
    }

    pub fn lower(&self) -> &str {
        &self.lower
    }

    pub fn record(&self) -> EmojiRecord {
        EmojiRecord {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub total: usize,
    pub items: Vec<EmojiRecord>,
    pub offset: usize,
    pub limit: usize,
    pub truncated: bool,
}

impl SearchResult {
    pub fn empty(limit: usize, offset: usize) -> Self {
        Self {
            total: 0,
            items: Vec::new(),
            offset,
            limit,
            truncated: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Exact,
    Prefix,
    Substring,
}

/// Trims whitespace and surrounding colons, then lowercases.
pub fn normalize_query(query: &str) -> String {
    query.trim().trim_matches(':').to_lowercase()
}

/// Missing or non-positive limits fall back to the default; the rest clamp to `1..=2000`.
pub fn clamp_limit(limit: Option<i64>) -> usize {
    match limit {
        Some(value) if value > 0 => (value as usize).clamp(1, MAX_LIMIT),
        _ => DEFAULT_LIMIT,
    }
}

pub fn clamp_offset(offset: Option<i64>) -> usize {
    offset.map(|value| value.max(0) as usize).unwrap_or(0)
}

fn classify(lower: &str, query: &str) -> Option<Tier> {
    if lower == query {
        Some(Tier::Exact)
    } else if lower.starts_with(query) {
        Some(Tier::Prefix)
    } else if lower.contains(query) {
        Some(Tier::Substring)
    } else {
        None
    }
}

/// Ranks catalog entries against `query`: exact matches first, then prefix matches, then
/// substring matches, each group ordered by name. Returns the `[offset, offset + limit)`
/// window of that ranking.
pub fn search(index: &[IndexedEmoji], query: &str, limit: usize, offset: usize) -> SearchResult {
    let limit = limit.clamp(1, MAX_LIMIT);
    let query = normalize_query(query);
    if query.is_empty() {
        return SearchResult::empty(limit, offset);
    }

    let mut exact = Vec::new();
    let mut prefix = Vec::new();
    let mut substring = Vec::new();
    for emoji in index {
        match classify(emoji.lower(), &query) {
            Some(Tier::Exact) => exact.push(emoji),
            Some(Tier::Prefix) => prefix.push(emoji),
            Some(Tier::Substring) => substring.push(emoji),
            None => {}
        }
    }
    for tier in [&mut exact, &mut prefix, &mut substring] {
        tier.sort_by(|a, b| collate(&a.name, &b.name));
    }

    let total = exact.len() + prefix.len() + substring.len();
    let items: Vec<EmojiRecord> = exact
        .into_iter()
        .chain(prefix)
        .chain(substring)
        .skip(offset)
        .take(limit)
        .map(IndexedEmoji::record)
        .collect();
    let truncated = total > offset.saturating_add(items.len());
    SearchResult {
        total,
        items,
        offset,
        limit,
        truncated,
    }
}

/// Punctuation and symbols in root-locale collation order. Anything not listed sorts after
/// these and before digits, by code point.
const PUNCTUATION_ORDER: &str = "_-,;:!?.'\"()[]{}@*/\\&#%`^+<=>|~$";

/// Dictionary-style ordering in two passes. The first compares case-folded weights
/// (whitespace, punctuation, digits, letters). The second breaks case-only ties with
/// lowercase first. The raw name settles whatever is left.
fn collate(a: &str, b: &str) -> Ordering {
    a.chars()
        .map(primary_weight)
        .cmp(b.chars().map(primary_weight))
        .then_with(|| a.chars().map(char::is_uppercase).cmp(b.chars().map(char::is_uppercase)))
        .then_with(|| a.cmp(b))
}

fn primary_weight(ch: char) -> (u8, u32) {
    if ch.is_whitespace() {
        (0, ch as u32)
    } else if let Some(rank) = PUNCTUATION_ORDER.find(ch) {
        (1, rank as u32)
    } else if ch.is_alphabetic() {
        (4, ch.to_lowercase().next().unwrap_or(ch) as u32)
    } else if let Some(digit) = ch.to_digit(10) {
        (3, digit)
    } else if ch.is_numeric() {
        (3, ch as u32)
    } else {
        (2, ch as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(names: &[&str]) -> Vec<IndexedEmoji> {
        names
            .iter()
            .enumerate()
            .map(|(idx, name)| IndexedEmoji::new((idx + 1).to_string(), *name))
            .collect()
    }

    fn names(result: &SearchResult) -> Vec<&str> {
        result.items.iter().map(|item| item.name.as_str()).collect()
    }

    #[test]
    fn smile_scenario() {
        let index = catalog(&["smile", "smiley", "grin"]);
        let result = search(&index, "smile", 200, 0);
        assert_eq!(result.total, 2);
        assert_eq!(names(&result), vec!["smile", "smiley"]);
        assert_eq!(result.items[0].id, "1");
        assert!(!result.truncated);
    }

    #[test]
    fn tiers_ignore_catalog_order() {
        let index = catalog(&["cat_smile", "smile_cat", "big_smile", "smile", "smiley", "Smile2"]);
        let result = search(&index, "SMILE", 200, 0);
        assert_eq!(
            names(&result),
            vec!["smile", "smile_cat", "Smile2", "smiley", "big_smile", "cat_smile"]
        );
        assert_eq!(result.total, 6);
    }

    #[test]
    fn query_is_normalized() {
        let index = catalog(&["thumbsup", "thumbsdown"]);
        let result = search(&index, "  :ThumbsUp: ", 10, 0);
        assert_eq!(names(&result), vec!["thumbsup"]);
    }

    #[test]
    fn empty_query_short_circuits() {
        let index = catalog(&["a", "b"]);
        for query in ["", "   ", "::"] {
            let result = search(&index, query, 10, 0);
            assert_eq!(result.total, 0);
            assert!(result.items.is_empty());
            assert!(!result.truncated);
        }
    }

    #[test]
    fn pagination_windows_the_ranking() {
        let index = catalog(&["party", "party_a", "party_b", "party_c", "my_party"]);
        let first = search(&index, "party", 2, 0);
        assert_eq!(names(&first), vec!["party", "party_a"]);
        assert_eq!(first.total, 5);
        assert!(first.truncated);

        let last = search(&index, "party", 2, 4);
        assert_eq!(names(&last), vec!["my_party"]);
        assert!(!last.truncated);

        let past_end = search(&index, "party", 2, 10);
        assert!(past_end.items.is_empty());
        assert_eq!(past_end.total, 5);
        assert!(!past_end.truncated);
    }

    #[test]
    fn limit_bounds_items_and_search_is_repeatable() {
        let names_list: Vec<String> = (0..50).map(|i| format!("emoji_{i:02}")).collect();
        let refs: Vec<&str> = names_list.iter().map(String::as_str).collect();
        let index = catalog(&refs);
        let result = search(&index, "emoji", 7, 3);
        assert_eq!(result.items.len(), 7);
        assert_eq!(result.total, 50);
        assert_eq!(search(&index, "emoji", 7, 3), result);
    }

    #[test]
    fn tiers_are_sorted_with_punctuation_first() {
        let index = catalog(&["a1", "a_b", "ab", "A_a"]);
        let result = search(&index, "a", 10, 0);
        assert_eq!(names(&result), vec!["A_a", "a_b", "a1", "ab"]);
    }

    #[test]
    fn underscore_sorts_before_hyphen_and_lowercase_before_uppercase() {
        let index = catalog(&["party-1", "party1", "party_1", "Party", "smile", "Smile"]);
        assert_eq!(
            names(&search(&index, "party", 10, 0)),
            vec!["Party", "party_1", "party-1", "party1"]
        );
        assert_eq!(names(&search(&index, "smile", 10, 0)), vec!["smile", "Smile"]);

        let index = catalog(&["+1", "1", "-1", "_1", "thumbs-up", "thumbs_up"]);
        assert_eq!(names(&search(&index, "1", 10, 0)), vec!["1", "_1", "-1", "+1"]);
        assert_eq!(
            names(&search(&index, "thumbs", 10, 0)),
            vec!["thumbs_up", "thumbs-up"]
        );
    }

    #[test]
    fn clamps() {
        assert_eq!(clamp_limit(None), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(Some(0)), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(Some(5000)), MAX_LIMIT);
        assert_eq!(clamp_limit(Some(12)), 12);
        assert_eq!(clamp_offset(Some(-3)), 0);
        assert_eq!(clamp_offset(Some(9)), 9);
    }
}
