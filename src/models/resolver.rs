//! Name lookup over a [`Registry`].
//!
//! Ids and aliases share one namespace. [`NameIndex`] maps every name, of
//! either kind, to the id of the entry that owns it; both resolution and
//! collision checks go through it.

use crate::error::{LlamaCppError, Result};
use crate::models::registry::{ModelEntry, Registry};
use std::collections::HashMap;

/// Which field of its entry a name came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Id,
    Alias,
}

#[derive(Debug, Clone)]
struct Owner {
    id: String,
    kind: NameKind,
}

/// Every id and alias in a registry, mapped to the owning entry's id
#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    names: HashMap<String, Owner>,
}

impl NameIndex {
    /// Build the index. Ids are indexed before any alias, so an id always wins.
    #[must_use]
    pub fn build(registry: &Registry) -> Self {
        let mut names = HashMap::new();

        for entry in registry.entries() {
            names.insert(
                entry.id.clone(),
                Owner {
                    id: entry.id.clone(),
                    kind: NameKind::Id,
                },
            );
        }

        for entry in registry.entries() {
            for alias in &entry.aliases {
                if let Some(existing) = names.get(alias) {
                    if existing.id != entry.id {
                        tracing::warn!(
                            "Name '{alias}' of model '{}' is already taken by '{}'; ignoring it",
                            entry.id,
                            existing.id
                        );
                    }
                    continue;
                }
                names.insert(
                    alias.clone(),
                    Owner {
                        id: entry.id.clone(),
                        kind: NameKind::Alias,
                    },
                );
            }
        }

        Self { names }
    }

    /// Id of the entry owning `name`, and whether `name` is that entry's id or an alias
    #[must_use]
    pub fn owner(&self, name: &str) -> Option<(&str, NameKind)> {
        self.names.get(name).map(|o| (o.id.as_str(), o.kind))
    }

    /// Fail on the first candidate owned by an entry other than `excluding_id`
    pub fn check<'a, I>(&self, candidates: I, excluding_id: Option<&str>) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for name in candidates {
            if let Some(owner) = self.names.get(name) {
                if Some(owner.id.as_str()) != excluding_id {
                    return Err(LlamaCppError::Collision {
                        name: name.to_string(),
                        owner: owner.id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }
}

/// Look up `identifier` as an id, then as an alias
pub fn resolve<'r>(registry: &'r Registry, identifier: &str) -> Result<&'r ModelEntry> {
    if let Some(entry) = registry.get(identifier) {
        return Ok(entry);
    }

    if let Some(entry) = registry
        .entries()
        .find(|e| e.aliases.iter().any(|a| a == identifier))
    {
        tracing::debug!("Resolved alias '{identifier}' to model '{}'", entry.id);
        return Ok(entry);
    }

    Err(unknown_model(registry, identifier))
}

/// Check that none of `candidates` is an id or alias of an entry other than `excluding_id`
pub fn check_collision<'a, I>(
    registry: &Registry,
    candidates: I,
    excluding_id: Option<&str>,
) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    NameIndex::build(registry).check(candidates, excluding_id)
}

pub(crate) fn unknown_model(registry: &Registry, name: &str) -> LlamaCppError {
    LlamaCppError::UnknownModel {
        name: name.to_string(),
        suggestion: suggest(registry, name),
    }
}

/// Find the closest registered name using Levenshtein distance
#[must_use]
pub fn suggest(registry: &Registry, name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }

    registry
        .entries()
        .flat_map(ModelEntry::names)
        .map(|candidate| (candidate, levenshtein_distance(name, candidate)))
        .min_by_key(|(_, dist)| *dist)
        .filter(|(_, dist)| *dist <= 2) // Only suggest if within 2 edits
        .map(|(candidate, _)| candidate.to_string())
}

/// Calculate Levenshtein distance between two strings
#[allow(clippy::needless_range_loop)]
fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let len1 = s1.chars().count();
    let len2 = s2.chars().count();

    if len1 == 0 {
        return len2;
    }
    if len2 == 0 {
        return len1;
    }

    let mut matrix = vec![vec![0; len2 + 1]; len1 + 1];

    for i in 0..=len1 {
        matrix[i][0] = i;
    }
    for j in 0..=len2 {
        matrix[0][j] = j;
    }

    for (i, c1) in s1.chars().enumerate() {
        for (j, c2) in s2.chars().enumerate() {
            let cost = usize::from(c1 != c2);
            matrix[i + 1][j + 1] = (matrix[i][j + 1] + 1)
                .min(matrix[i + 1][j] + 1)
                .min(matrix[i][j] + cost);
        }
    }

    matrix[len1][len2]
}
