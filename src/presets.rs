use crate::error::{Error, Result};
use crate::tokens::clean_emoji_name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub emojis: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetSummary {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PresetFile {
    #[serde(default)]
    presets: BTreeMap<String, Vec<String>>,
}

/// Named emoji lists kept in a single JSON file. Every operation reads the file and every
/// mutation rewrites it whole; concurrent writers race and the last one wins.
#[derive(Debug, Clone)]
pub struct PresetStore {
    path: PathBuf,
}

impl PresetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> Result<Vec<PresetSummary>> {
        Ok(self
            .read()?
            .presets
            .into_iter()
            .map(|(name, emojis)| PresetSummary {
                name,
                count: emojis.len(),
            })
            .collect())
    }

    pub fn get(&self, name: &str) -> Result<Preset> {
        let key = preset_key(name)?;
        let mut file = self.read()?;
        file.presets
            .remove(&key)
            .map(|emojis| Preset {
                name: key.clone(),
                emojis,
            })
            .ok_or_else(|| Error::NotFound(format!("preset {key:?} not found")))
    }

    /// Stores `emojis` under `name`, replacing any previous list. Names are cleaned and
    /// blanks dropped before saving.
    pub fn put(&self, name: &str, emojis: &[String]) -> Result<PresetSummary> {
        let key = preset_key(name)?;
        let cleaned: Vec<String> = emojis
            .iter()
            .map(|emoji| clean_emoji_name(emoji))
            .filter(|emoji| !emoji.is_empty())
            .collect();
        let count = cleaned.len();
        let mut file = self.read()?;
        file.presets.insert(key.clone(), cleaned);
        self.write(&file)?;
        info!(preset = %key, count, "preset saved");
        Ok(PresetSummary { name: key, count })
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let key = preset_key(name)?;
        let mut file = self.read()?;
        if file.presets.remove(&key).is_none() {
            return Err(Error::NotFound(format!("preset {key:?} not found")));
        }
        self.write(&file)?;
        info!(preset = %key, "preset deleted");
        Ok(())
    }

    fn read(&self) -> Result<PresetFile> {
        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(PresetFile::default()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(PresetFile::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, file: &PresetFile) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(file)?;
        fs::write(&self.path, payload)?;
        Ok(())
    }
}

fn preset_key(name: &str) -> Result<String> {
    let key = name.trim();
    if key.is_empty() {
        return Err(Error::config("a preset name is required"));
    }
    Ok(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, PresetStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PresetStore::new(dir.path().join("presets.json"));
        (dir, store)
    }

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn missing_file_is_empty() {
        let (_dir, store) = store();
        assert!(store.list().unwrap().is_empty());
        assert!(matches!(store.get("party"), Err(Error::NotFound(_))));
    }

    #[test]
    fn put_get_list_delete() {
        let (_dir, store) = store();
        let saved = store
            .put(" party ", &list(&[":tada:", "", "confetti_ball", "  "]))
            .unwrap();
        assert_eq!(saved, PresetSummary { name: "party".into(), count: 2 });
        store.put("abc", &list(&["one", "two", "three"])).unwrap();

        let preset = store.get("party").unwrap();
        assert_eq!(preset.emojis, list(&["tada", "confetti_ball"]));

        let names: Vec<_> = store.list().unwrap();
        assert_eq!(
            names,
            vec![
                PresetSummary { name: "abc".into(), count: 3 },
                PresetSummary { name: "party".into(), count: 2 },
            ]
        );

        store.delete("party").unwrap();
        assert!(matches!(store.get("party"), Err(Error::NotFound(_))));
        assert!(matches!(store.delete("party"), Err(Error::NotFound(_))));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn put_replaces_existing_list() {
        let (_dir, store) = store();
        store.put("p", &list(&["a", "b"])).unwrap();
        store.put("p", &list(&["c"])).unwrap();
        assert_eq!(store.get("p").unwrap().emojis, list(&["c"]));
    }

    #[test]
    fn blank_names_are_rejected() {
        let (_dir, store) = store();
        assert!(matches!(store.put("  ", &[]), Err(Error::Config(_))));
        assert!(matches!(store.get(""), Err(Error::Config(_))));
        assert!(matches!(store.delete(" "), Err(Error::Config(_))));
    }

    #[test]
    fn file_layout_is_a_presets_object() {
        let (_dir, store) = store();
        store.put("p", &list(&["a"])).unwrap();
        let raw = fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value, serde_json::json!({"presets": {"p": ["a"]}}));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let (_dir, store) = store();
        fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.list(), Err(Error::Json(_))));
    }
}
