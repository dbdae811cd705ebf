//! Package repository configuration as the image builder consumes it.
//!
//! Exactly one of the three URL fields is expected to be set; which one it
//! is decides the source type when converting to a source config.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metalink: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mirror_list: String,
    #[serde(default)]
    pub ignore_ssl: bool,
}
