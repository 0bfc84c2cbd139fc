//! Credential files.  Only tokens are ever written to disk.

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

pub fn load<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(value))
}

pub fn save<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn clear(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Pair {
        access_token: String,
        refresh_token: String,
    }

    #[test]
    fn test_save_load_clear() {
        let dir = std::env::temp_dir().join(format!("nowplaying-tokens-{}", std::process::id()));
        let path = dir.join("tokens.json");
        assert_eq!(load::<Pair>(&path).unwrap(), None);

        let pair = Pair {
            access_token: "a".into(),
            refresh_token: "r".into(),
        };
        save(&path, &pair).unwrap();
        assert_eq!(load::<Pair>(&path).unwrap(), Some(pair));

        clear(&path).unwrap();
        clear(&path).unwrap();
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = std::env::temp_dir().join(format!("nowplaying-corrupt-{}", std::process::id()));
        let path = dir.join("tokens.json");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert!(load::<Pair>(&path).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
