//! Execution environment image pulling.
//!
//! Before a containerized run starts, the image is checked against the
//! configured [`PullPolicy`] and pulled if required. Engine interaction goes
//! through the [`ImageEngine`] trait so the decision logic can be exercised
//! without podman or docker installed.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use navigator_core::{EngineKind, PullPolicy};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::error::{LaunchError, LaunchResult};

/// Tag assumed when an image reference carries none.
pub const DEFAULT_TAG: &str = "latest";

/// Image operations needed by the puller.
#[async_trait]
pub trait ImageEngine: Send + Sync {
    /// Returns true if the image exists in local storage.
    async fn image_present(&self, image: &str) -> LaunchResult<bool>;

    /// Pull the image, passing `arguments` before the image name.
    async fn pull(&self, image: &str, arguments: &[String]) -> LaunchResult<()>;
}

/// [`ImageEngine`] backed by the podman or docker command line.
#[derive(Debug, Clone)]
pub struct CliImageEngine {
    binary: String,
}

impl CliImageEngine {
    /// Create an engine for a container engine kind.
    pub fn new(engine: EngineKind) -> LaunchResult<Self> {
        let binary = engine
            .binary()
            .ok_or_else(|| LaunchError::invalid("image operations require a container engine"))?;
        Ok(Self {
            binary: binary.to_string(),
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> LaunchError {
        match source.kind() {
            std::io::ErrorKind::NotFound => LaunchError::EngineNotFound {
                engine: self.binary.clone(),
            },
            _ => LaunchError::from_spawn(self.binary.clone(), source),
        }
    }
}

#[async_trait]
impl ImageEngine for CliImageEngine {
    async fn image_present(&self, image: &str) -> LaunchResult<bool> {
        let status = self
            .command()
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;
        Ok(status.success())
    }

    async fn pull(&self, image: &str, arguments: &[String]) -> LaunchResult<()> {
        let output = self
            .command()
            .arg("pull")
            .args(arguments)
            .arg(image)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(LaunchError::ImagePullFailed {
            image: image.to_string(),
            message: match stderr.trim() {
                "" => format!("{} pull exited with {}", self.binary, output.status),
                text => text.to_string(),
            },
        })
    }
}

/// Result of checking an image against a pull policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullAssessment {
    pub image: String,
    pub tag: String,
    pub present: bool,
    pub pull_required: bool,
}

/// Applies a pull policy to an image.
#[derive(Clone)]
pub struct ImagePuller {
    engine: Arc<dyn ImageEngine>,
}

impl std::fmt::Debug for ImagePuller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePuller").finish_non_exhaustive()
    }
}

impl ImagePuller {
    pub fn new(engine: Arc<dyn ImageEngine>) -> Self {
        Self { engine }
    }

    /// Check presence and decide whether a pull is needed.
    pub async fn assess(&self, image: &str, policy: PullPolicy) -> LaunchResult<PullAssessment> {
        let tag = image_tag(image).to_string();
        let present = self.engine.image_present(image).await?;
        let pull_required = pull_required(policy, &tag, present);
        debug!(image, %tag, present, pull_required, %policy, "image assessed");
        Ok(PullAssessment {
            image: image.to_string(),
            tag,
            present,
            pull_required,
        })
    }

    /// Make sure the image is available locally, pulling it if the policy asks.
    #[instrument(level = "info", skip(self, arguments), fields(policy = %policy))]
    pub async fn ensure(
        &self,
        image: &str,
        policy: PullPolicy,
        arguments: &[String],
    ) -> LaunchResult<PullAssessment> {
        let assessment = self.assess(image, policy).await?;

        if assessment.pull_required {
            info!("Pulling image {}", image);
            self.engine.pull(image, arguments).await?;
            info!("Image {} pulled", image);
        } else if !assessment.present {
            warn!("Image {} is not present and pull policy is {}", image, policy);
            return Err(LaunchError::ImageUnavailable {
                image: image.to_string(),
            });
        }

        Ok(assessment)
    }
}

/// Pull decision for a policy, the image tag and local presence.
pub fn pull_required(policy: PullPolicy, tag: &str, present: bool) -> bool {
    match policy {
        PullPolicy::Always => true,
        PullPolicy::Missing => !present,
        PullPolicy::Never => false,
        PullPolicy::Tag => tag == DEFAULT_TAG || !present,
    }
}

/// Tag of an image reference, `latest` when none is given.
///
/// A `:` followed by a `/` belongs to a registry port, not a tag. A digest
/// reference (`@sha256:...`) has no tag.
pub fn image_tag(image: &str) -> &str {
    explicit_tag(image).unwrap_or(DEFAULT_TAG)
}

fn explicit_tag(image: &str) -> Option<&str> {
    let name = image.split('@').next().unwrap_or(image);
    match name.rsplit_once(':') {
        Some((_, tag)) if !tag.contains('/') && !tag.is_empty() => Some(tag),
        _ => None,
    }
}

/// Append `:latest` to an image reference without a tag or digest.
pub fn normalize_image(image: &str) -> String {
    if image.contains('@') || explicit_tag(image).is_some() {
        image.to_string()
    } else {
        format!("{image}:{DEFAULT_TAG}")
    }
}
