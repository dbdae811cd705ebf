//! `model` crate — shared value types for composes, blueprints, and targets.
//!
//! These types are layered to keep dependencies acyclic: lifecycle states
//! and blueprints sit at the bottom, target options build on the states,
//! and the compose aggregate depends on both.  Every type here is a plain
//! value — fully owned data, `Clone` is a deep copy.

pub mod blueprint;
pub mod compose;
pub mod repo;
pub mod state;
pub mod target;

pub use blueprint::{Blueprint, BlueprintError, Change};
pub use compose::{Compose, ComposeResult, ImageBuild, ImageType, StateTransitionError};
pub use repo::RepoConfig;
pub use state::{ComposeState, ImageBuildState};
pub use target::{AwsTargetOptions, AzureTargetOptions, LocalTargetOptions, Target, TargetOptions};
