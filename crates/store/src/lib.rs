//! `store` crate — the persistent compose state store.
//!
//! A [`Store`] holds everything the service must remember across requests:
//! blueprints and their commit history, workspace drafts, source
//! configurations, and composes with their image builds.  Every mutation is
//! funneled through a single write lock and immediately serialized to one
//! `state.json` document, so external observers only ever see a sequence of
//! complete states.  The store also owns the `outputs/` directory tree where
//! finished artifacts and result documents live.
//!
//! Construction is the only place recovery happens: the state document is
//! read back and normalized — builds interrupted by a crash are failed, and
//! commit ordering lists that predate the `commits` key are reconstructed.

pub mod error;
pub mod source;

pub use error::StoreError;
pub use source::SourceConfig;


use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;
use rand::RngCore;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use jsondb::JsonDatabase;
use model::{
    Blueprint, Change, Compose, ComposeResult, ImageBuild, ImageBuildState, ImageType, Target,
};

/// The reserved document name the store persists itself under.
const STORE_DB_NAME: &str = "state";

/// Everything the store serializes.  Field names are the document keys.
#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    #[serde(default)]
    blueprints: HashMap<String, Blueprint>,
    #[serde(default)]
    workspace: HashMap<String, Blueprint>,
    #[serde(default)]
    composes: HashMap<Uuid, Compose>,
    #[serde(default)]
    sources: HashMap<String, SourceConfig>,
    /// Per-blueprint map of commit hash to change.
    #[serde(default, rename = "changes")]
    blueprint_changes: HashMap<String, HashMap<String, Change>>,
    /// Per-blueprint commit hashes in commit order.  This list, not the
    /// change timestamps, is the source of truth for ordering: the
    /// timestamps only have second resolution.
    #[serde(default, rename = "commits")]
    blueprint_commits: HashMap<String, Vec<String>>,
}

/// The process-wide compose state store.
pub struct Store {
    state: RwLock<State>,
    state_dir: Option<PathBuf>,
    db: Option<JsonDatabase>,
}

impl Store {
    /// Open (or create) a store.
    ///
    /// With `state_dir` set, previous state is read back from
    /// `<state_dir>/state.json` and the `outputs/` tree is created.
    /// Without it the store is purely in-memory and never persists.
    ///
    /// # Panics
    /// An unreadable or corrupt state document, a failure to create the
    /// output directory, and a persisted compose without image builds are
    /// all fatal.
    pub fn new(state_dir: Option<&Path>) -> Store {
        let mut state = State::default();
        let mut db = None;

        if let Some(dir) = state_dir {
            if let Err(err) = fs::create_dir_all(dir.join("outputs")) {
                panic!("cannot create output directory: {err}");
            }

            let database = JsonDatabase::new(dir, 0o600);
            match database.read(STORE_DB_NAME) {
                Ok(Some(loaded)) => state = loaded,
                Ok(None) => {}
                Err(err) => panic!("cannot read state: {err}"),
            }
            db = Some(database);
        }

        // Fail every build that was waiting or running when the previous
        // process died; its worker is gone.  Terminal states are kept so
        // old records still read correctly.
        for (compose_id, compose) in &mut state.composes {
            if compose.image_builds.is_empty() {
                panic!("compose {compose_id} has zero image builds, that is forbidden");
            }
            for build in &mut compose.image_builds {
                if let ImageBuildState::Waiting | ImageBuildState::Running = build.queue_status {
                    warn!(
                        "image build {} of compose {} was interrupted, marking as failed",
                        build.id, compose_id
                    );
                    build.queue_status = ImageBuildState::Failed;
                }
            }
        }

        // Reconstruct commit ordering lists for blueprints whose history
        // predates the commits key.  The sort is by timestamp with version
        // as tie-break; with only second-resolution timestamps the order
        // may be slightly off for rapid pushes.
        for (name, changes) in &state.blueprint_changes {
            let commits = state.blueprint_commits.entry(name.clone()).or_default();
            if changes.len() == commits.len() {
                continue;
            }

            let mut ordered: Vec<&Change> = changes.values().collect();
            ordered.sort_by(|a, b| {
                a.timestamp.cmp(&b.timestamp).then_with(|| {
                    parse_version(&a.blueprint.version).cmp(&parse_version(&b.blueprint.version))
                })
            });

            *commits = ordered.into_iter().map(|c| c.commit.clone()).collect();
        }

        Store {
            state: RwLock::new(state),
            state_dir: state_dir.map(Path::to_path_buf),
            db,
        }
    }

    /// Run a mutation under the write lock and persist the result.
    ///
    /// # Panics
    /// If the state document cannot be written: the in-memory state has
    /// already changed and the process must not continue with memory and
    /// disk disagreeing.
    fn change<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.write().unwrap();

        let result = f(&mut *state);

        if let Some(db) = &self.db {
            if let Err(err) = db.write(STORE_DB_NAME, &*state) {
                panic!("cannot write state: {err}");
            }
        }

        result
    }

    // -----------------------------------------------------------------------
    // Blueprints
    // -----------------------------------------------------------------------

    /// Names of all committed blueprints, sorted.
    pub fn list_blueprints(&self) -> Vec<String> {
        let state = self.state.read().unwrap();
        let mut names: Vec<String> = state.blueprints.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get a blueprint, preferring the workspace copy.
    ///
    /// The second element reports whether the workspace copy was used.
    pub fn get_blueprint(&self, name: &str) -> Option<(Blueprint, bool)> {
        let state = self.state.read().unwrap();

        if let Some(bp) = state.workspace.get(name) {
            return Some((bp.clone(), true));
        }
        state.blueprints.get(name).map(|bp| (bp.clone(), false))
    }

    /// Get a blueprint, ignoring any workspace copy.
    pub fn get_blueprint_committed(&self, name: &str) -> Option<Blueprint> {
        let state = self.state.read().unwrap();
        state.blueprints.get(name).cloned()
    }

    /// Get a specific change of a blueprint.
    pub fn get_blueprint_change(&self, name: &str, commit: &str) -> Result<Change, StoreError> {
        let state = self.state.read().unwrap();

        let changes = state
            .blueprint_changes
            .get(name)
            .ok_or_else(|| StoreError::UnknownBlueprint(name.to_owned()))?;
        changes
            .get(commit)
            .cloned()
            .ok_or(StoreError::UnknownCommit)
    }

    /// All changes of a blueprint, oldest first.
    pub fn get_blueprint_changes(&self, name: &str) -> Vec<Change> {
        let state = self.state.read().unwrap();

        let mut changes = Vec::new();
        if let Some(commits) = state.blueprint_commits.get(name) {
            for commit in commits {
                if let Some(change) = state
                    .blueprint_changes
                    .get(name)
                    .and_then(|c| c.get(commit))
                {
                    changes.push(change.clone());
                }
            }
        }
        changes
    }

    /// Commit a blueprint, creating a new change.
    ///
    /// Removes any workspace copy.  When a committed version already exists
    /// and the pushed version is empty or equal, the stored version is
    /// bumped one patch level.
    pub fn push_blueprint(
        &self,
        mut blueprint: Blueprint,
        commit_msg: &str,
    ) -> Result<(), StoreError> {
        self.change(move |state| {
            let commit = random_commit_hash();

            blueprint.initialize()?;

            let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
            let change = Change {
                commit: commit.clone(),
                message: commit_msg.to_owned(),
                revision: None,
                timestamp,
                blueprint: blueprint.clone(),
            };

            state.workspace.remove(&blueprint.name);
            state
                .blueprint_changes
                .entry(blueprint.name.clone())
                .or_default()
                .insert(commit.clone(), change);
            state
                .blueprint_commits
                .entry(blueprint.name.clone())
                .or_default()
                .push(commit);

            if let Some(old) = state.blueprints.get(&blueprint.name) {
                if blueprint.version.is_empty() || blueprint.version == old.version {
                    let old_version = old.version.clone();
                    blueprint.bump_version(&old_version);
                }
            }
            state.blueprints.insert(blueprint.name.clone(), blueprint);
            Ok(())
        })
    }

    /// Store a scratch copy that shadows the committed blueprint on reads.
    pub fn push_blueprint_to_workspace(&self, mut blueprint: Blueprint) -> Result<(), StoreError> {
        self.change(move |state| {
            blueprint.initialize()?;
            state.workspace.insert(blueprint.name.clone(), blueprint);
            Ok(())
        })
    }

    /// Remove a blueprint and any workspace copy of it.
    ///
    /// The workspace copy is deleted unconditionally; a missing committed
    /// blueprint is an error.
    pub fn delete_blueprint(&self, name: &str) -> Result<(), StoreError> {
        self.change(|state| {
            state.workspace.remove(name);
            if state.blueprints.remove(name).is_none() {
                return Err(StoreError::UnknownBlueprint(name.to_owned()));
            }
            Ok(())
        })
    }

    /// Remove only the workspace copy of a blueprint.
    pub fn delete_blueprint_from_workspace(&self, name: &str) -> Result<(), StoreError> {
        self.change(|state| {
            if state.workspace.remove(name).is_none() {
                return Err(StoreError::UnknownBlueprint(name.to_owned()));
            }
            Ok(())
        })
    }

    /// Attach a revision to the most recent commit of a blueprint.
    ///
    /// No-op if the latest commit already carries a revision; otherwise the
    /// highest existing revision plus one is assigned (starting at 1).
    pub fn tag_blueprint(&self, name: &str) -> Result<(), StoreError> {
        self.change(|state| {
            if !state.blueprints.contains_key(name) {
                return Err(StoreError::UnknownBlueprint(name.to_owned()));
            }

            let commits = state
                .blueprint_commits
                .get(name)
                .filter(|c| !c.is_empty())
                .ok_or_else(|| StoreError::NoCommits(name.to_owned()))?;
            let latest = commits.last().cloned().unwrap();

            let changes = state.blueprint_changes.entry(name.to_owned()).or_default();
            if changes.get(&latest).and_then(|c| c.revision).is_some() {
                return Ok(());
            }

            let highest = changes.values().filter_map(|c| c.revision).max().unwrap_or(0);
            if let Some(change) = changes.get_mut(&latest) {
                change.revision = Some(highest + 1);
            }
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Composes
    // -----------------------------------------------------------------------

    /// Get a compose by id.  The returned value is a deep copy.
    pub fn get_compose(&self, id: Uuid) -> Option<Compose> {
        let state = self.state.read().unwrap();
        state.composes.get(&id).cloned()
    }

    /// Deep copies of all composes, keyed by id.
    pub fn get_all_composes(&self) -> HashMap<Uuid, Compose> {
        let state = self.state.read().unwrap();
        state
            .composes
            .iter()
            .map(|(id, compose)| (*id, compose.clone()))
            .collect()
    }

    /// Register a new compose with a single image build and create its
    /// output directory.
    ///
    /// # Panics
    /// A duplicate compose id or an unknown image type tag is a programmer
    /// bug and aborts.
    pub fn push_compose(
        &self,
        compose_id: Uuid,
        manifest: Value,
        image_type: &str,
        blueprint: Option<Blueprint>,
        size: u64,
        targets: Vec<Target>,
        job_id: Uuid,
    ) -> Result<(), StoreError> {
        if self.get_compose(compose_id).is_some() {
            panic!("a compose with id {compose_id} already exists");
        }

        let image_type = ImageType::from_compat_string(image_type)
            .unwrap_or_else(|| panic!("fatal error, compose type '{image_type}' does not exist"));

        self.create_image_build_directory(compose_id, 0)?;

        self.change(|state| {
            state.composes.insert(
                compose_id,
                Compose {
                    blueprint,
                    image_builds: vec![ImageBuild {
                        id: 0,
                        image_type,
                        manifest,
                        targets,
                        job_created: Some(Utc::now()),
                        job_started: None,
                        job_finished: None,
                        size,
                        job_id: Some(job_id),
                        queue_status: ImageBuildState::Waiting,
                    }],
                },
            );
        });

        info!("compose {} pushed (job {})", compose_id, job_id);
        Ok(())
    }

    /// Register a compose and immediately drive it to a terminal state
    /// without running a queue job.  Used by code paths that only need a
    /// finished or failed record, such as test composes.
    pub fn push_test_compose(
        &self,
        compose_id: Uuid,
        manifest: Value,
        image_type: &str,
        blueprint: Option<Blueprint>,
        size: u64,
        targets: Vec<Target>,
        want_success: bool,
    ) -> Result<(), StoreError> {
        let image_type = ImageType::from_compat_string(image_type)
            .unwrap_or_else(|| panic!("fatal error, compose type '{image_type}' does not exist"));

        self.create_image_build_directory(compose_id, 0)?;

        self.change(|state| {
            state.composes.insert(
                compose_id,
                Compose {
                    blueprint,
                    image_builds: vec![ImageBuild {
                        id: 0,
                        image_type,
                        manifest,
                        targets,
                        job_created: Some(Utc::now()),
                        job_started: Some(Utc::now()),
                        job_finished: None,
                        size,
                        job_id: None,
                        queue_status: ImageBuildState::Running,
                    }],
                },
            );
        });

        let (status, result) = if want_success {
            (
                ImageBuildState::Finished,
                ComposeResult {
                    success: true,
                    ..Default::default()
                },
            )
        } else {
            (ImageBuildState::Failed, ComposeResult::default())
        };

        self.update_image_build(compose_id, 0, status, Some(&result))
    }

    /// Remove a compose and delete its output directory.
    pub fn delete_compose(&self, id: Uuid) -> Result<(), StoreError> {
        self.change(|state| {
            if state.composes.remove(&id).is_none() {
                return Err(StoreError::ComposeNotFound);
            }

            if let Some(dir) = self.compose_directory(id) {
                fs::remove_dir_all(dir)?;
            }

            Ok(())
        })
    }

    /// Set the status of one image build, optionally recording its result.
    ///
    /// The build must have been dispatched already: a build whose legacy
    /// status is still `Waiting` is rejected with `NotPending`.  Terminal
    /// states stamp `job_finished` and propagate to the build's targets.
    pub fn update_image_build(
        &self,
        compose_id: Uuid,
        image_build_id: usize,
        status: ImageBuildState,
        result: Option<&ComposeResult>,
    ) -> Result<(), StoreError> {
        self.change(|state| {
            let compose = state
                .composes
                .get_mut(&compose_id)
                .ok_or(StoreError::ComposeNotFound)?;
            let build = compose
                .image_builds
                .get(image_build_id)
                .ok_or(StoreError::ImageBuildNotFound)?;

            if build.queue_status == ImageBuildState::Waiting {
                return Err(StoreError::NotPending);
            }

            if let (Some(dir), Some(result)) =
                (self.image_build_directory(compose_id, image_build_id), result)
            {
                let file = fs::File::create(dir.join("result.json"))?;
                serde_json::to_writer(file, result)
                    .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
            }

            compose.update_state(image_build_id, status)?;

            if status.is_terminal() {
                compose.image_builds[image_build_id].job_finished = Some(Utc::now());
            }

            Ok(())
        })
    }

    /// Open the result document of an image build.
    ///
    /// Without a state directory there is nothing on disk and an empty JSON
    /// object is streamed instead.
    pub fn get_image_build_result(
        &self,
        compose_id: Uuid,
        image_build_id: usize,
    ) -> Result<Box<dyn Read + Send>, StoreError> {
        match self.image_build_directory(compose_id, image_build_id) {
            None => Ok(Box::new(io::Cursor::new(b"{}".to_vec()))),
            Some(dir) => {
                let file = fs::File::open(dir.join("result.json"))?;
                Ok(Box::new(file))
            }
        }
    }

    /// Open the local-target image file of a build, returning it together
    /// with its size.
    pub fn get_image_build_image(
        &self,
        compose_id: Uuid,
        image_build_id: usize,
    ) -> Result<(fs::File, u64), StoreError> {
        let filename = self.local_target_filename(compose_id, image_build_id)?;

        let dir = self
            .image_build_directory(compose_id, image_build_id)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "store has no state directory")
            })?;

        let file = fs::File::open(dir.join(filename))?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    /// Write the local-target image file of a build from `reader`.
    ///
    /// The path was fixed when the compose was created; only the file is
    /// new, so no lock is held while the stream is copied.
    pub fn add_image_to_image_upload(
        &self,
        compose_id: Uuid,
        image_build_id: usize,
        reader: &mut dyn Read,
    ) -> Result<(), StoreError> {
        let filename = self.local_target_filename(compose_id, image_build_id)?;

        let dir = self
            .image_build_directory(compose_id, image_build_id)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "store has no state directory")
            })?;

        let mut file = fs::File::create(dir.join(filename))?;
        io::copy(reader, &mut file)?;
        Ok(())
    }

    /// The filename of the build's local target, or `NoLocalTarget`.
    fn local_target_filename(
        &self,
        compose_id: Uuid,
        image_build_id: usize,
    ) -> Result<String, StoreError> {
        let state = self.state.read().unwrap();

        let compose = state
            .composes
            .get(&compose_id)
            .ok_or(StoreError::ComposeNotFound)?;
        let build = compose
            .image_builds
            .get(image_build_id)
            .ok_or(StoreError::ImageBuildNotFound)?;

        build
            .local_target_options()
            .map(|options| options.filename.clone())
            .ok_or(StoreError::NoLocalTarget)
    }

    fn compose_directory(&self, compose_id: Uuid) -> Option<PathBuf> {
        self.state_dir
            .as_ref()
            .map(|dir| dir.join("outputs").join(compose_id.to_string()))
    }

    fn image_build_directory(&self, compose_id: Uuid, image_build_id: usize) -> Option<PathBuf> {
        self.compose_directory(compose_id)
            .map(|dir| dir.join(image_build_id.to_string()))
    }

    fn create_image_build_directory(
        &self,
        compose_id: Uuid,
        image_build_id: usize,
    ) -> Result<(), StoreError> {
        if let Some(dir) = self.image_build_directory(compose_id, image_build_id) {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sources
    // -----------------------------------------------------------------------

    /// Insert or replace a source configuration.
    pub fn push_source(&self, source: SourceConfig) {
        self.change(|state| {
            state.sources.insert(source.name.clone(), source);
        })
    }

    /// Remove a source configuration; removing an unknown name is a no-op.
    pub fn delete_source(&self, name: &str) {
        self.change(|state| {
            state.sources.remove(name);
        })
    }

    /// Names of all sources, sorted.
    pub fn list_sources(&self) -> Vec<String> {
        let state = self.state.read().unwrap();
        let mut names: Vec<String> = state.sources.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_source(&self, name: &str) -> Option<SourceConfig> {
        let state = self.state.read().unwrap();
        state.sources.get(name).cloned()
    }

    pub fn get_all_sources(&self) -> HashMap<String, SourceConfig> {
        let state = self.state.read().unwrap();
        state.sources.clone()
    }
}

/// A fresh 20-byte commit hash, hex-encoded.
fn random_commit_hash() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn parse_version(version: &str) -> Version {
    Version::parse(version).unwrap_or_else(|_| Version::new(0, 0, 0))
}
