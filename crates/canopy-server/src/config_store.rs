//! Profile store backed by the section/key=value credentials file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

pub type ProfileFields = HashMap<String, String>;

/// Reads named profiles from the credentials file.
///
/// The file is parsed fresh on every call; nothing is cached.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store pointing at `~/.oci/config`.
    pub fn default_location() -> Self {
        Self::new(default_config_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Profile names in file order. A missing or unreadable file yields no profiles.
    pub async fn list_profiles(&self) -> Vec<String> {
        match self.read().await {
            Some(content) => parse_profiles(&content)
                .into_iter()
                .map(|(name, _)| name)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Fields of the named profile, or `None` when it is absent or empty.
    pub async fn load_profile(&self, name: &str) -> Option<ProfileFields> {
        let content = self.read().await?;
        parse_profiles(&content)
            .into_iter()
            .find(|(profile, _)| profile == name)
            .map(|(_, fields)| fields)
    }

    async fn read(&self) -> Option<String> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Some(content),
            Err(e) => {
                log::warn!(
                    "Failed to read config file {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".oci")
        .join("config")
}

/// Parses the credentials file into `(profile, fields)` pairs, keeping file order.
///
/// Sections without any fields are dropped. A repeated section header continues
/// to fill the first occurrence.
pub fn parse_profiles(content: &str) -> Vec<(String, ProfileFields)> {
    let mut profiles: Vec<(String, ProfileFields)> = Vec::new();
    let mut current: Option<usize> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim().to_string();
            current = match profiles.iter().position(|(existing, _)| *existing == name) {
                Some(index) => Some(index),
                None => {
                    profiles.push((name, ProfileFields::new()));
                    Some(profiles.len() - 1)
                }
            };
            continue;
        }

        // Lines before the first header have nowhere to go.
        let Some(index) = current else {
            continue;
        };

        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            profiles[index]
                .1
                .insert(key.to_string(), value.trim().to_string());
        }
    }

    profiles.retain(|(_, fields)| !fields.is_empty());
    profiles
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
orphan=ignored

[a]
k=v

# comment
[b]
x = 1
; another comment
y=2
"#;

    fn store_with(content: &str) -> (NamedTempFile, ConfigStore) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let store = ConfigStore::new(file.path());
        (file, store)
    }

    #[tokio::test]
    async fn test_lists_profiles_in_file_order() {
        let (_file, store) = store_with(SAMPLE);
        assert_eq!(store.list_profiles().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_load_profile_fields() {
        let (_file, store) = store_with(SAMPLE);
        let fields = store.load_profile("b").await.unwrap();

        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get("x").map(String::as_str), Some("1"));
        assert_eq!(fields.get("y").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_unknown_profile_is_not_found() {
        let (_file, store) = store_with(SAMPLE);
        assert!(store.load_profile("missing").await.is_none());

        let (_file, empty) = store_with("");
        assert!(empty.load_profile("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_missing_file_yields_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("does-not-exist"));

        assert!(store.list_profiles().await.is_empty());
        assert!(store.load_profile("DEFAULT").await.is_none());
    }

    #[test]
    fn test_empty_section_is_dropped() {
        let profiles = parse_profiles("[empty]\n\n[full]\nkey=value\n");
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].0, "full");
    }

    #[test]
    fn test_value_keeps_later_equals_signs() {
        let profiles = parse_profiles("[p]\nkey_file = ~/.oci/key=1.pem\n");
        assert_eq!(
            profiles[0].1.get("key_file").map(String::as_str),
            Some("~/.oci/key=1.pem")
        );
    }
}
