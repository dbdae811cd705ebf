//! Source configurations — named package repositories.
//!
//! The source type is decided by which URL field of the underlying repo
//! config is populated, and converted back the same way.

use model::RepoConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub url: String,
    pub check_gpg: bool,
    pub check_ssl: bool,
    pub system: bool,
}

impl SourceConfig {
    /// Build a source config from a repo config.
    pub fn new(repo: &RepoConfig, system: bool) -> Self {
        let mut source = SourceConfig {
            name: repo.id.clone(),
            source_type: String::new(),
            url: String::new(),
            check_gpg: true,
            check_ssl: !repo.ignore_ssl,
            system,
        };

        if !repo.base_url.is_empty() {
            source.url = repo.base_url.clone();
            source.source_type = "yum-baseurl".to_owned();
        } else if !repo.metalink.is_empty() {
            source.url = repo.metalink.clone();
            source.source_type = "yum-metalink".to_owned();
        } else if !repo.mirror_list.is_empty() {
            source.url = repo.mirror_list.clone();
            source.source_type = "yum-mirrorlist".to_owned();
        }

        source
    }

    /// Convert back to the repo config the image builder consumes.
    pub fn repo_config(&self) -> RepoConfig {
        let mut repo = RepoConfig {
            id: self.name.clone(),
            ignore_ssl: !self.check_ssl,
            ..Default::default()
        };

        match self.source_type.as_str() {
            "yum-baseurl" => repo.base_url = self.url.clone(),
            "yum-metalink" => repo.metalink = self.url.clone(),
            "yum-mirrorlist" => repo.mirror_list = self.url.clone(),
            _ => {}
        }

        repo
    }
}
