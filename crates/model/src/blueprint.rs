//! Blueprints and their commit history entries.
//!
//! A blueprint's actual content (packages, modules, customizations, …) is
//! owned by the image builder and treated as opaque here: everything beyond
//! name/description/version is captured in a flattened JSON map so unknown
//! fields survive a round trip through the store.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlueprintError {
    #[error("invalid blueprint version '{0}': not a semantic version")]
    InvalidVersion(String),
}

/// A named, versioned declarative description of an image's contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    /// Opaque remainder of the blueprint document.
    #[serde(flatten)]
    pub body: serde_json::Map<String, serde_json::Value>,
}

impl Blueprint {
    /// Fill in defaults and validate the version.
    ///
    /// An empty version becomes `0.0.0`; anything else must parse as a
    /// semantic version.
    pub fn initialize(&mut self) -> Result<(), BlueprintError> {
        if self.version.is_empty() {
            self.version = "0.0.0".to_owned();
        }
        semver::Version::parse(&self.version)
            .map_err(|_| BlueprintError::InvalidVersion(self.version.clone()))?;
        Ok(())
    }

    /// Replace this blueprint's version with `old` bumped one patch level.
    ///
    /// Used when a push carries an empty or unchanged version.  If `old`
    /// does not parse, the current version is kept as-is.
    pub fn bump_version(&mut self, old: &str) {
        if let Ok(mut version) = semver::Version::parse(old) {
            version.patch += 1;
            self.version = version.to_string();
        }
    }
}

/// One commit in a blueprint's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Hex-encoded commit hash, unique per blueprint.
    pub commit: String,
    pub message: String,
    /// Attached by a tag operation; absent until the commit is tagged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,
    /// Second-resolution ISO-8601 UTC timestamp.
    pub timestamp: String,
    pub blueprint: Blueprint,
}
