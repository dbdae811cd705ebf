//! The compose aggregate: a blueprint snapshot plus its image builds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::blueprint::Blueprint;
use crate::state::ImageBuildState;
use crate::target::{LocalTargetOptions, Target, TargetOptions};

/// An illegal image-build state transition.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StateTransitionError(pub String);

/// Output image kinds, identified by their legacy compatibility tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Ami,
    Openstack,
    Qcow2,
    Tar,
    Vhd,
    Vmdk,
}

impl ImageType {
    /// Resolve a legacy compatibility tag to an image type.
    pub fn from_compat_string(tag: &str) -> Option<Self> {
        match tag {
            "ami" => Some(Self::Ami),
            "openstack" => Some(Self::Openstack),
            "qcow2" => Some(Self::Qcow2),
            "tar" => Some(Self::Tar),
            "vhd" => Some(Self::Vhd),
            "vmdk" => Some(Self::Vmdk),
            _ => None,
        }
    }

    pub fn compat_string(self) -> &'static str {
        match self {
            Self::Ami => "ami",
            Self::Openstack => "openstack",
            Self::Qcow2 => "qcow2",
            Self::Tar => "tar",
            Self::Vhd => "vhd",
            Self::Vmdk => "vmdk",
        }
    }
}

/// The worker's report for one finished (or failed) build.
///
/// Only `success` is interpreted here; the rest of the report is passed
/// through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeResult {
    #[serde(default)]
    pub success: bool,
    #[serde(flatten)]
    pub output: serde_json::Map<String, serde_json::Value>,
}

/// A single image build inside a compose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBuild {
    pub id: usize,
    pub image_type: ImageType,
    /// Opaque build manifest handed to the worker.
    pub manifest: serde_json::Value,
    pub targets: Vec<Target>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_started: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_finished: Option<DateTime<Utc>>,
    pub size: u64,
    #[serde(rename = "jobid", skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,

    /// Kept for records that predate the job queue.  New builds derive
    /// their externally visible state from the queue job; the store only
    /// records terminal outcomes here.
    #[serde(default)]
    pub queue_status: ImageBuildState,
}

impl ImageBuild {
    /// The options of the first local target, if the build has one.
    pub fn local_target_options(&self) -> Option<&LocalTargetOptions> {
        self.targets.iter().find_map(|t| match &t.options {
            TargetOptions::Local(options) => Some(options),
            _ => None,
        })
    }
}

/// A request to build a set of images from one blueprint snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compose {
    pub blueprint: Option<Blueprint>,
    pub image_builds: Vec<ImageBuild>,
}

impl Compose {
    /// Transition the state of one image build.
    ///
    /// Permitted edges: `Waiting|Running → Running` and
    /// `Running → Finished|Failed`.  Entering a terminal state propagates
    /// it to every target of the build.  A transition into `Waiting` is
    /// never allowed.
    pub fn update_state(
        &mut self,
        image_build_id: usize,
        new_state: ImageBuildState,
    ) -> Result<(), StateTransitionError> {
        let build = self.image_builds.get_mut(image_build_id).ok_or_else(|| {
            StateTransitionError(format!("image build {image_build_id} does not exist"))
        })?;

        match new_state {
            ImageBuildState::Waiting => {
                return Err(StateTransitionError(
                    "image build cannot be moved into waiting state".to_owned(),
                ));
            }
            ImageBuildState::Running => {
                if build.queue_status == ImageBuildState::Waiting
                    || build.queue_status == ImageBuildState::Running
                {
                    build.queue_status = new_state;
                } else {
                    return Err(StateTransitionError(
                        "only waiting image build can be transitioned into running state"
                            .to_owned(),
                    ));
                }
            }
            ImageBuildState::Finished | ImageBuildState::Failed => {
                if build.queue_status == ImageBuildState::Running {
                    build.queue_status = new_state;
                    for target in &mut build.targets {
                        target.status = new_state;
                    }
                } else {
                    return Err(StateTransitionError(
                        "only running image build can be transitioned into finished or failed state"
                            .to_owned(),
                    ));
                }
            }
        }

        Ok(())
    }
}
