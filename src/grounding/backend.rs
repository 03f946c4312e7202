use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::errors::{PinpointError, PinpointResult};
use crate::perception::screenshot::Screenshot;

/// Which inference strategy produced a grounding answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Remote,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Remote => write!(f, "remote"),
        }
    }
}

/// Unified grounding backend trait. Both variants take the same screenshot
/// and description and answer with free-form text containing a coordinate
/// pair in the [0, 1000) space, so the engine never cares which one it holds.
#[async_trait]
pub trait GroundingBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn ground(&self, shot: &Screenshot, description: &str) -> PinpointResult<String>;
}

const USER_PROMPT_TEMPLATE: &str = "\
Your task is to help the user identify the precise coordinates (x, y) of a \
specific area/element/object on the screen based on a description.
- Your response should aim to point to the center or a representative point \
within the described area/element/object as accurately as possible.
- If the description is unclear or ambiguous, infer the most relevant area or \
element based on its likely context or purpose.
- Your answer should be a single string (x, y) corresponding to the point of \
the interest.
Description: {description}
Answer:";

/// Build the grounding prompt both backends accept.
pub fn build_grounding_prompt(description: &str) -> String {
    USER_PROMPT_TEMPLATE.replace("{description}", description)
}

/// Select and construct the configured backend at startup. Two fixed
/// variants, so a plain match does the job.
pub fn build_backend(config: &AppConfig) -> PinpointResult<Arc<dyn GroundingBackend>> {
    match config.grounding.backend.as_str() {
        "local" => {
            let backend = crate::grounding::onnx::OnnxBackend::load(
                &config.grounding.model,
                config.grounding.detector_confidence,
                config.grounding.detector_iou,
            )?;
            tracing::info!(model = %config.grounding.model, "grounding backend: local ONNX detector");
            Ok(Arc::new(backend))
        }
        "remote" => {
            let backend = crate::grounding::remote::RemoteBackend::new(
                config.remote.api_base.clone(),
                config.remote.resolve_api_key(),
                config.grounding.model.clone(),
                config.grounding.backend_timeout_secs,
            )?;
            tracing::info!(
                api_base = %config.remote.api_base,
                model = %config.grounding.model,
                "grounding backend: remote inference server"
            );
            Ok(Arc::new(backend))
        }
        other => Err(PinpointError::Config(format!(
            "unknown grounding backend '{other}' (expected \"local\" or \"remote\")"
        ))),
    }
}
