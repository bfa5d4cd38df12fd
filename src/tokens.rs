use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::warn;

static COLON_GROUP: Lazy<Regex> = Lazy::new(|| Regex::new(r":[^:\s]+:").expect("valid regex"));
static LIST_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,\s]+").expect("valid regex"));

const DIGIT_WORDS: [&str; 10] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
];

/// User-supplied token overrides, usually loaded from `emoji-map.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmojiMap {
    entries: HashMap<String, String>,
}

impl EmojiMap {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    /// Loads a JSON object of `token -> emoji name`. Missing or invalid files yield an empty
    /// map. Numbers and booleans are taken as their text (`7` becomes `"7"`); other
    /// non-string values are ignored.
    pub fn load(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read emoji map");
                return Self::default();
            }
        };
        match serde_json::from_str::<HashMap<String, serde_json::Value>>(&raw) {
            Ok(values) => Self::new(
                values
                    .into_iter()
                    .filter_map(|(key, value)| scalar_text(value).map(|name| (key, name)))
                    .collect(),
            ),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "emoji map is not a JSON object");
                Self::default()
            }
        }
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.entries.get(token).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn scalar_text(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(text) => Some(text),
        serde_json::Value::Number(n) if n.is_f64() => n.as_f64().map(|f| f.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Trims whitespace and any leading/trailing colons: `:smile:` becomes `smile`.
pub fn clean_emoji_name(name: &str) -> String {
    name.trim().trim_matches(':').trim().to_string()
}

/// Maps a raw token to an emoji name. Overrides win over the built-in digit words; anything
/// else passes through cleaned. An empty result means the token cannot be resolved.
pub fn resolve(token: &str, overrides: &EmojiMap) -> String {
    if let Some(name) = overrides.get(token) {
        return clean_emoji_name(name);
    }
    if let Some(word) = digit_word(token) {
        return word.to_string();
    }
    clean_emoji_name(token)
}

fn digit_word(token: &str) -> Option<&'static str> {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => ch.to_digit(10).map(|d| DIGIT_WORDS[d as usize]),
        _ => None,
    }
}

fn colon_groups(input: &str) -> Option<Vec<String>> {
    let groups: Vec<String> = COLON_GROUP
        .find_iter(input)
        .map(|m| clean_emoji_name(m.as_str()))
        .collect();
    if groups.is_empty() { None } else { Some(groups) }
}

/// Parses an emoji list argument: `:a::b:` groups, or a comma/whitespace separated list.
pub fn parse_emoji_list(input: &str) -> Vec<String> {
    if let Some(groups) = colon_groups(input) {
        return groups;
    }
    LIST_SEPARATOR
        .split(input)
        .filter(|piece| !piece.is_empty())
        .map(clean_emoji_name)
        .filter(|name| !name.is_empty())
        .collect()
}

/// Parses a sequence argument: `:a::b:` groups, otherwise one token per character.
pub fn split_sequence(seq: &str) -> Vec<String> {
    if let Some(groups) = colon_groups(seq) {
        return groups;
    }
    seq.chars().map(|ch| ch.to_string()).collect()
}

/// Reads one emoji name per line, skipping blank lines.
pub fn read_emoji_file(path: &Path) -> io::Result<Vec<String>> {
    let raw = fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .map(clean_emoji_name)
        .filter(|name| !name.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn map(pairs: &[(&str, &str)]) -> EmojiMap {
        EmojiMap::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn override_wins_over_digit_words() {
        let overrides = map(&[("1", "custom_one")]);
        assert_eq!(resolve("1", &overrides), "custom_one");
        assert_eq!(resolve("9", &overrides), "nine");
        assert_eq!(resolve("hello", &overrides), "hello");
    }

    #[test]
    fn override_values_are_colon_stripped() {
        let overrides = map(&[("x", ":party_parrot:")]);
        assert_eq!(resolve("x", &overrides), "party_parrot");
    }

    #[test]
    fn tokens_are_cleaned() {
        let overrides = EmojiMap::default();
        assert_eq!(resolve(":thumbsup:", &overrides), "thumbsup");
        assert_eq!(resolve("  ::wave:: ", &overrides), "wave");
        assert_eq!(resolve(":", &overrides), "");
        assert_eq!(resolve("0", &overrides), "zero");
        assert_eq!(resolve("42", &overrides), "42");
    }

    #[test]
    fn emoji_list_prefers_colon_groups() {
        assert_eq!(
            parse_emoji_list(":thumbsup::heart: :my_custom:"),
            vec!["thumbsup", "heart", "my_custom"]
        );
        assert_eq!(
            parse_emoji_list("thumbsup, heart  my_custom,,"),
            vec!["thumbsup", "heart", "my_custom"]
        );
        assert!(parse_emoji_list("  ").is_empty());
    }

    #[test]
    fn sequence_falls_back_to_characters() {
        assert_eq!(split_sequence("0105"), vec!["0", "1", "0", "5"]);
        assert_eq!(split_sequence(":a::bb:"), vec!["a", "bb"]);
    }

    #[test]
    fn emoji_file_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, ":smile:\r\n\n  heart  \n").unwrap();
        let names = read_emoji_file(file.path()).unwrap();
        assert_eq!(names, vec!["smile", "heart"]);
    }

    #[test]
    fn emoji_map_ignores_missing_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EmojiMap::load(&dir.path().join("absent.json")).is_empty());

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "[1, 2").unwrap();
        assert!(EmojiMap::load(&broken).is_empty());

        let good = dir.path().join("map.json");
        fs::write(&good, r#"{"1": "one_custom", "2": 7, "3": null}"#).unwrap();
        let loaded = EmojiMap::load(&good);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("1"), Some("one_custom"));
        assert_eq!(loaded.get("3"), None);
    }

    #[test]
    fn numeric_map_values_resolve_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        fs::write(&path, r#"{"2": 7, "x": 100.0, "y": 2.5, "z": true}"#).unwrap();
        let loaded = EmojiMap::load(&path);
        assert_eq!(resolve("2", &loaded), "7");
        assert_eq!(resolve("x", &loaded), "100");
        assert_eq!(resolve("y", &loaded), "2.5");
        assert_eq!(resolve("z", &loaded), "true");
    }
}
