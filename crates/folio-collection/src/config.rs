use std::collections::HashSet;

use folio_store::DEFAULT_MAX_TRANSACTION_DOCUMENTS;
use serde::{Deserialize, Serialize};

use crate::error::{CollectionError, CollectionResult};

/// Tunables shared by every collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Upper bound on documents per chunk and per external transaction.
    ///
    /// The effective limit is the smaller of this and the store's own limit.
    pub max_transaction_documents: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            max_transaction_documents: DEFAULT_MAX_TRANSACTION_DOCUMENTS,
        }
    }
}

/// Static description of a collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDeclaration {
    /// Backing-store container name.
    pub name: String,
    /// Ordered fields whose values compose the document id.
    #[serde(default)]
    pub unique_keys: Vec<String>,
    /// Schema versions, oldest first; the last one is current.
    pub versions: Vec<String>,
    /// Fields that keep their first non-null value.
    #[serde(default)]
    pub locked_fields: Vec<String>,
}

impl CollectionDeclaration {
    pub fn new(name: impl Into<String>, versions: &[&str]) -> Self {
        Self {
            name: name.into(),
            unique_keys: Vec::new(),
            versions: versions.iter().map(|v| v.to_string()).collect(),
            locked_fields: Vec::new(),
        }
    }

    pub fn with_unique_keys(mut self, keys: &[&str]) -> Self {
        self.unique_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_locked_fields(mut self, fields: &[&str]) -> Self {
        self.locked_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Check the declaration is usable.
    pub fn validate(&self) -> CollectionResult<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("collection name must not be empty"));
        }
        if self.versions.is_empty() {
            return Err(invalid(format!(
                "collection '{}' must declare at least one schema version",
                self.name
            )));
        }
        if let Some(dup) = first_duplicate(&self.versions) {
            return Err(invalid(format!(
                "collection '{}' declares schema version '{dup}' twice",
                self.name
            )));
        }
        if let Some(dup) = first_duplicate(&self.unique_keys) {
            return Err(invalid(format!(
                "collection '{}' declares unique key '{dup}' twice",
                self.name
            )));
        }
        Ok(())
    }

    /// The version stamped on every write.
    pub fn current_version(&self) -> &str {
        self.versions.last().map(String::as_str).unwrap_or_default()
    }

    /// Returns `true` if a document at `version` needs upgrading.
    ///
    /// Labels missing from the version list count as older than current.
    pub fn is_older(&self, version: &str) -> bool {
        let current = self.versions.len().saturating_sub(1);
        match self.versions.iter().position(|v| v == version) {
            Some(rank) => rank < current,
            None => true,
        }
    }
}

fn first_duplicate(items: &[String]) -> Option<&str> {
    let mut seen = HashSet::new();
    items.iter().find(|item| !seen.insert(item.as_str())).map(String::as_str)
}

fn invalid(message: impl Into<String>) -> CollectionError {
    CollectionError::InvariantViolated(message.into())
}
