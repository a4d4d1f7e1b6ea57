use crate::error::{LlamaCppError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A registered model file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelEntry {
    /// Primary id. Stored as the registry key, not inside the record.
    #[serde(skip)]
    pub id: String,
    /// Absolute location of the model file. The registry never deletes it.
    pub path: PathBuf,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Wrap prompts in the Llama 2 chat template
    #[serde(
        rename = "is_llama2_chat",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub chat_mode: bool,
    /// Keys this crate does not interpret, kept so a save never drops them
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ModelEntry {
    /// All names this entry answers to: the id first, then its aliases
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Mapping from model id to entry, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    entries: IndexMap<String, ModelEntry>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ModelEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ModelEntry> {
        self.entries.get_mut(id)
    }

    /// Insert or overwrite an entry. An overwritten entry keeps its position.
    pub fn insert(&mut self, entry: ModelEntry) -> Option<ModelEntry> {
        self.entries.insert(entry.id.clone(), entry)
    }

    /// Remove an entry, keeping the order of the others
    pub fn remove(&mut self, id: &str) -> Option<ModelEntry> {
        self.entries.shift_remove(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ModelEntry> {
        self.entries.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Registry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Registry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut entries = IndexMap::<String, ModelEntry>::deserialize(deserializer)?;
        for (id, entry) in &mut entries {
            entry.id.clone_from(id);
        }
        Ok(Self { entries })
    }
}

/// Persists a [`Registry`] as a single JSON document
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the registry; a missing document is an empty registry
    pub fn load(&self) -> Result<Registry> {
        if !self.path.exists() {
            tracing::debug!("No registry at {}, starting empty", self.path.display());
            return Ok(Registry::new());
        }

        let content = fs::read_to_string(&self.path)?;
        let registry: Registry =
            serde_json::from_str(&content).map_err(|e| LlamaCppError::CorruptRegistry {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(
            "Loaded {} model(s) from {}",
            registry.len(),
            self.path.display()
        );
        Ok(registry)
    }

    /// Save the registry atomically (tmp + rename)
    pub fn save(&self, registry: &Registry) -> Result<()> {
        let staged = self.write_staged(registry)?;
        self.commit(&staged)
    }

    /// Write the full document next to the target without touching the target
    fn write_staged(&self, registry: &Registry) -> Result<PathBuf> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "registry".into(), |n| n.to_string_lossy());
        let tmp_path = dir.join(format!(".{file_name}.{}.tmp", std::process::id()));

        let content = serde_json::to_string_pretty(registry).map_err(|e| {
            LlamaCppError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        write_or_discard(&tmp_path, |file| {
            file.write_all(content.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()
        })?;

        Ok(tmp_path)
    }

    /// Rename the staged document over the target. This is the commit point.
    fn commit(&self, staged: &Path) -> Result<()> {
        if let Err(e) = fs::rename(staged, &self.path) {
            let _ = fs::remove_file(staged);
            return Err(e.into());
        }
        tracing::debug!("Saved registry to {}", self.path.display());
        Ok(())
    }
}

/// Create `path` and fill it with `write`. A failure at any step removes the file again.
fn write_or_discard<F>(path: &Path, write: F) -> std::io::Result<()>
where
    F: FnOnce(&mut File) -> std::io::Result<()>,
{
    let result = File::create(path).and_then(|mut file| write(&mut file));
    if result.is_err() {
        let _ = fs::remove_file(path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(id: &str, path: &str, aliases: &[&str]) -> ModelEntry {
        ModelEntry {
            id: id.to_string(),
            path: PathBuf::from(path),
            aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
            chat_mode: false,
            extra: Default::default(),
        }
    }

    #[test]
    fn test_load_missing_registry_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = RegistryStore::new(temp_dir.path().join("models.json"));

        let registry = store.load().unwrap();
        assert!(registry.is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_save_and_load_preserves_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = RegistryStore::new(temp_dir.path().join("llama-cpp/models.json"));

        let mut registry = Registry::new();
        for id in ["zeta", "alpha", "mid"] {
            registry.insert(entry(id, &format!("/m/{id}.gguf"), &[]));
        }
        let mut chat = entry("chat", "/m/chat.gguf", &["c1", "c2"]);
        chat.chat_mode = true;
        registry.insert(chat);

        store.save(&registry).unwrap();
        let loaded = store.load().unwrap();

        let ids: Vec<&str> = loaded.entries().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid", "chat"]);
        assert_eq!(loaded, registry);
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut registry = Registry::new();
        registry.insert(entry("a", "/m/a.gguf", &[]));
        registry.insert(entry("b", "/m/b.gguf", &[]));

        let previous = registry.insert(entry("a", "/elsewhere/a.gguf", &[]));
        assert_eq!(previous.unwrap().path, PathBuf::from("/m/a.gguf"));

        let ids: Vec<&str> = registry.entries().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(registry.get("a").unwrap().path, PathBuf::from("/elsewhere/a.gguf"));
    }

    #[test]
    fn test_remove_keeps_order_of_rest() {
        let mut registry = Registry::new();
        for id in ["a", "b", "c"] {
            registry.insert(entry(id, "/m/x.gguf", &[]));
        }
        assert!(registry.remove("b").is_some());
        assert!(registry.remove("b").is_none());

        let ids: Vec<&str> = registry.entries().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_document_shape() {
        let mut registry = Registry::new();
        let mut chat = entry("llama-2-7b-chat", "/m/llama-2-7b-chat.gguf", &["l2c"]);
        chat.chat_mode = true;
        registry.insert(chat);
        registry.insert(entry("plain", "/m/plain.gguf", &[]));

        let value = serde_json::to_value(&registry).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "llama-2-7b-chat": {
                    "path": "/m/llama-2-7b-chat.gguf",
                    "aliases": ["l2c"],
                    "is_llama2_chat": true
                },
                "plain": {
                    "path": "/m/plain.gguf",
                    "aliases": []
                }
            })
        );
    }

    #[test]
    fn test_load_document_without_optional_fields() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("models.json");
        fs::write(&path, r#"{"orca": {"path": "/m/orca.gguf"}}"#).unwrap();

        let registry = RegistryStore::new(&path).load().unwrap();
        let orca = registry.get("orca").unwrap();
        assert_eq!(orca.id, "orca");
        assert!(orca.aliases.is_empty());
        assert!(!orca.chat_mode);
    }

    #[test]
    fn test_load_corrupt_registry() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("models.json");

        for content in ["{not json", "[]", r#"{"a": {"aliases": []}}"#] {
            fs::write(&path, content).unwrap();
            let err = RegistryStore::new(&path).load().unwrap_err();
            assert!(
                matches!(err, LlamaCppError::CorruptRegistry { .. }),
                "expected CorruptRegistry for {content:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_crash_before_rename_leaves_document_intact() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("models.json");
        let store = RegistryStore::new(&path);

        let mut registry = Registry::new();
        registry.insert(entry("a", "/m/a.gguf", &["foo"]));
        store.save(&registry).unwrap();
        let before = fs::read(&path).unwrap();

        registry.insert(entry("b", "/m/b.gguf", &["bar"]));
        let staged = store.write_staged(&registry).unwrap();
        assert!(staged.exists());
        assert_eq!(staged.parent(), path.parent());

        // Process dies here: no commit.
        assert_eq!(fs::read(&path).unwrap(), before);
        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get("b").is_none());
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = RegistryStore::new(temp_dir.path().join("models.json"));

        store.save(&Registry::new()).unwrap();
        store.save(&Registry::new()).unwrap();

        let names: Vec<String> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["models.json".to_string()]);
    }

    #[test]
    fn test_failed_staging_write_removes_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let tmp_path = temp_dir.path().join(".models.json.1.tmp");

        let err = write_or_discard(&tmp_path, |file| {
            file.write_all(b"{\"half\": ")?;
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        })
        .unwrap_err();

        assert_eq!(err.to_string(), "disk full");
        assert!(!tmp_path.exists());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_unknown_keys_survive_save() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("models.json");
        fs::write(
            &path,
            r#"{"a": {"path": "/m/a.gguf", "aliases": [], "n_ctx": 8192, "notes": {"source": "hf"}}}"#,
        )
        .unwrap();
        let store = RegistryStore::new(&path);

        let mut registry = store.load().unwrap();
        assert_eq!(registry.get("a").unwrap().extra["n_ctx"], 8192);
        registry.insert(entry("b", "/m/b.gguf", &[]));
        store.save(&registry).unwrap();

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["a"]["n_ctx"], 8192);
        assert_eq!(value["a"]["notes"]["source"], "hf");
        assert!(value["b"].get("n_ctx").is_none());
    }

    #[test]
    fn test_save_to_unwritable_location() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();

        let store = RegistryStore::new(blocker.join("models.json"));
        let err = store.save(&Registry::new()).unwrap_err();
        assert!(matches!(err, LlamaCppError::Io(_)));
    }
}
