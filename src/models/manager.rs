use crate::config::paths::PluginPaths;
use crate::error::{LlamaCppError, Result};
use crate::models::download::{filename_from_url, ModelFetcher};
use crate::models::registry::{ModelEntry, Registry, RegistryStore};
use crate::models::resolver::{self, NameIndex, NameKind};
use std::path::{Path, PathBuf};

/// How a model should be registered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSpec {
    /// Explicit id; defaults to the file name without its extension
    pub id: Option<String>,
    pub aliases: Vec<String>,
    pub chat_mode: bool,
}

impl ModelSpec {
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    #[must_use]
    pub fn with_chat_mode(mut self, chat_mode: bool) -> Self {
        self.chat_mode = chat_mode;
        self
    }
}

/// Model manager for registering, downloading, and removing models
#[derive(Debug, Clone)]
pub struct ModelManager {
    paths: PluginPaths,
    store: RegistryStore,
}

impl ModelManager {
    /// Create a manager over the registry under `paths`
    #[must_use]
    pub fn new(paths: PluginPaths) -> Self {
        let store = RegistryStore::new(paths.models_file());
        Self { paths, store }
    }

    #[must_use]
    pub const fn paths(&self) -> &PluginPaths {
        &self.paths
    }

    /// Path to the registry document
    #[must_use]
    pub fn models_file(&self) -> &Path {
        self.store.path()
    }

    /// Directory downloads are written to, created on first use
    pub fn models_directory(&self) -> Result<PathBuf> {
        self.paths.models_dir()
    }

    /// Register a model file that is already on disk.
    ///
    /// Re-adding an existing id overwrites that entry. Nothing is written
    /// unless every name is free.
    pub fn add_model(&self, path: &Path, spec: &ModelSpec) -> Result<ModelEntry> {
        let id = model_id(spec, path)?;
        let aliases = normalize_aliases(&spec.aliases)?;

        let mut registry = self.store.load()?;
        check_names(&registry, &id, &aliases)?;

        // Keys added by hand to an existing entry outlive a re-add
        let extra = registry
            .get(&id)
            .map(|existing| existing.extra.clone())
            .unwrap_or_default();
        let entry = ModelEntry {
            id,
            path: std::path::absolute(path)?,
            aliases,
            chat_mode: spec.chat_mode,
            extra,
        };

        let replaced = registry.insert(entry.clone());
        self.store.save(&registry)?;

        if replaced.is_some() {
            tracing::info!("Updated model '{}' at {}", entry.id, entry.path.display());
        } else {
            tracing::info!("Registered model '{}' at {}", entry.id, entry.path.display());
        }
        Ok(entry)
    }

    /// Download a model into the models directory and register it.
    ///
    /// The entry is only written after the transfer completed. A failed
    /// transfer leaves no registry entry, though a `.part` file may remain.
    pub async fn download_model(
        &self,
        fetcher: &dyn ModelFetcher,
        url: &str,
        spec: &ModelSpec,
    ) -> Result<ModelEntry> {
        let filename = filename_from_url(url)?;
        let dest = self.models_directory()?.join(&filename);
        let id = model_id(spec, &dest)?;

        // Fail before a long transfer that could never be registered
        let registry = self.store.load()?;
        check_names(&registry, &id, &normalize_aliases(&spec.aliases)?)?;

        if dest.exists() {
            return Err(LlamaCppError::InvalidInput(format!(
                "File already exists at {}",
                dest.display()
            )));
        }

        tracing::debug!("Fetching {url} with {} fetcher", fetcher.fetcher_name());
        fetcher.fetch(url, &dest).await?;

        let spec = ModelSpec {
            id: Some(id),
            ..spec.clone()
        };
        self.add_model(&dest, &spec)
    }

    /// All entries, in registry order
    pub fn list_models(&self) -> Result<Vec<ModelEntry>> {
        Ok(self.store.load()?.entries().cloned().collect())
    }

    /// The persisted registry
    pub fn registry(&self) -> Result<Registry> {
        self.store.load()
    }

    /// Find a model by id or alias
    pub fn resolve(&self, identifier: &str) -> Result<ModelEntry> {
        let registry = self.store.load()?;
        resolver::resolve(&registry, identifier).cloned()
    }

    /// Unregister a model by id or alias. The model file is left on disk.
    pub fn remove_model(&self, identifier: &str) -> Result<ModelEntry> {
        let mut registry = self.store.load()?;
        let id = resolver::resolve(&registry, identifier)?.id.clone();

        let removed = registry
            .remove(&id)
            .ok_or_else(|| resolver::unknown_model(&registry, identifier))?;
        self.store.save(&registry)?;

        tracing::info!("Removed model '{}' ({})", removed.id, removed.path.display());
        Ok(removed)
    }

    /// Add an alias to the model named by `identifier`
    pub fn set_alias(&self, alias: &str, identifier: &str) -> Result<ModelEntry> {
        let alias = normalize_name(alias, "Aliases")?;
        let mut registry = self.store.load()?;
        let id = resolver::resolve(&registry, identifier)?.id.clone();

        NameIndex::build(&registry).check([alias.as_str()], Some(&id))?;

        let entry = registry
            .get_mut(&id)
            .ok_or_else(|| LlamaCppError::UnknownModel {
                name: id.clone(),
                suggestion: None,
            })?;
        if entry.id == alias || entry.aliases.contains(&alias) {
            return Ok(entry.clone());
        }
        entry.aliases.push(alias.clone());
        let entry = entry.clone();

        self.store.save(&registry)?;
        tracing::info!("Added alias '{alias}' to model '{id}'");
        Ok(entry)
    }

    /// Remove an alias from whichever model owns it
    pub fn remove_alias(&self, alias: &str) -> Result<ModelEntry> {
        let alias = normalize_name(alias, "Aliases")?;
        let alias = alias.as_str();
        let mut registry = self.store.load()?;

        let id = match NameIndex::build(&registry).owner(alias) {
            Some((id, NameKind::Alias)) => id.to_string(),
            Some((id, NameKind::Id)) => {
                return Err(LlamaCppError::InvalidInput(format!(
                    "'{id}' is a model id, not an alias. Use: llm-llama-cpp remove-model {id}"
                )))
            }
            None => return Err(resolver::unknown_model(&registry, alias)),
        };

        let entry = registry
            .get_mut(&id)
            .ok_or_else(|| LlamaCppError::UnknownModel {
                name: alias.to_string(),
                suggestion: None,
            })?;
        entry.aliases.retain(|a| a != alias);
        let entry = entry.clone();

        self.store.save(&registry)?;
        tracing::info!("Removed alias '{alias}' from model '{id}'");
        Ok(entry)
    }
}

/// Default id for a model file: its name without the extension
fn id_from_path(path: &Path) -> Result<String> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| {
            LlamaCppError::InvalidInput(format!("Cannot derive a model id from {}", path.display()))
        })
}

/// Explicit id from `spec`, else the file stem of `path`, trimmed like any other name
fn model_id(spec: &ModelSpec, path: &Path) -> Result<String> {
    match &spec.id {
        Some(id) => normalize_name(id, "Model id"),
        None => normalize_name(&id_from_path(path)?, "Model id"),
    }
}

fn normalize_name(name: &str, what: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(LlamaCppError::InvalidInput(format!("{what} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

/// Trim and de-duplicate, keeping first-seen order
fn normalize_aliases(aliases: &[String]) -> Result<Vec<String>> {
    let mut normalized: Vec<String> = Vec::with_capacity(aliases.len());
    for alias in aliases {
        let alias = normalize_name(alias, "Aliases")?;
        if !normalized.contains(&alias) {
            normalized.push(alias);
        }
    }
    Ok(normalized)
}

/// Validate the full name set `{id} ∪ aliases` of a new or re-added entry
fn check_names(registry: &Registry, id: &str, aliases: &[String]) -> Result<()> {
    if aliases.iter().any(|a| a == id) {
        return Err(LlamaCppError::Collision {
            name: id.to_string(),
            owner: id.to_string(),
        });
    }

    let candidates = std::iter::once(id).chain(aliases.iter().map(String::as_str));
    resolver::check_collision(registry, candidates, Some(id))
}
