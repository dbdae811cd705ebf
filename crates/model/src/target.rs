//! Delivery targets for built images.
//!
//! A target names a destination and carries destination-specific options.
//! The options are an internally tagged union keyed on the target name, so
//! new destinations slot in as enum variants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::ImageBuildState;

/// A delivery endpoint for one built image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub uuid: Uuid,
    pub image_name: String,
    pub created: DateTime<Utc>,
    pub status: ImageBuildState,
    #[serde(flatten)]
    pub options: TargetOptions,
}

impl Target {
    /// Create a target in the `Waiting` state with a fresh UUID.
    pub fn new(image_name: impl Into<String>, options: TargetOptions) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            image_name: image_name.into(),
            created: Utc::now(),
            status: ImageBuildState::Waiting,
            options,
        }
    }
}

/// Destination-specific target options, discriminated by target name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "options")]
pub enum TargetOptions {
    #[serde(rename = "org.osbuild.local")]
    Local(LocalTargetOptions),
    #[serde(rename = "org.osbuild.aws")]
    Aws(AwsTargetOptions),
    #[serde(rename = "org.osbuild.azure")]
    Azure(AzureTargetOptions),
}

/// Image file dropped into the compose's output directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalTargetOptions {
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsTargetOptions {
    pub filename: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AzureTargetOptions {
    pub filename: String,
    pub storage_account: String,
    pub storage_access_key: String,
    pub container: String,
}
