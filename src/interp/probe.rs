// Environment probe: container runtime presence and sandbox image lookup.

use super::error::{InterpreterError, Result};
use async_trait::async_trait;
use bollard::image::ListImagesOptions;
use bollard::Docker;
use std::collections::HashMap;

/// Side-effect-free queries against the host's container runtime.
///
/// "Not installed" is a normal `Ok(false)`, never an error. A fault in the
/// query itself (runtime present but e.g. socket permission denied) is
/// reported as `Err(ProbeFault)` so the router can surface an actionable
/// message instead of silently retrying the build.
#[async_trait]
pub trait EnvironmentProbe: Send + Sync {
    async fn runtime_installed(&self) -> Result<bool>;
    async fn image_exists(&self) -> Result<bool>;
}

/// Docker implementation of the probe.
pub struct DockerProbe {
    image_tag: String,
}

impl DockerProbe {
    pub fn new(image_tag: impl Into<String>) -> Self {
        Self {
            image_tag: image_tag.into(),
        }
    }

    fn connect() -> Result<Docker> {
        Docker::connect_with_local_defaults()
            .map_err(|e| InterpreterError::ProbeFault(format!("Docker connection setup: {e}")))
    }

    /// A connection refusal means the runtime is absent; anything that looks
    /// like an access problem is a fault the user must resolve.
    fn classify_unreachable(err: &bollard::errors::Error) -> Result<bool> {
        let msg = err.to_string().to_lowercase();
        if msg.contains("permission denied") || msg.contains("access is denied") {
            return Err(InterpreterError::ProbeFault(format!(
                "container runtime query failed: {err}"
            )));
        }
        Ok(false)
    }
}

#[async_trait]
impl EnvironmentProbe for DockerProbe {
    async fn runtime_installed(&self) -> Result<bool> {
        let docker = match Docker::connect_with_local_defaults() {
            Ok(d) => d,
            // No socket to even address: runtime absent.
            Err(_) => return Ok(false),
        };
        match docker.ping().await {
            Ok(_) => Ok(true),
            Err(e) => Self::classify_unreachable(&e),
        }
    }

    async fn image_exists(&self) -> Result<bool> {
        let docker = Self::connect()?;
        let mut filters = HashMap::new();
        filters.insert("reference".to_string(), vec![self.image_tag.clone()]);
        let images = docker
            .list_images(Some(ListImagesOptions::<String> {
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| InterpreterError::ProbeFault(format!("image lookup failed: {e}")))?;
        Ok(!images.is_empty())
    }
}
