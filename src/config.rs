use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{PinpointError, PinpointResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub grounding: GroundingConfig,
    #[serde(default)]
    pub screen: ScreenConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub content: ContentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundingConfig {
    /// Backend selection: "local" (in-process ONNX) or "remote" (inference server).
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Model identifier. Local backend: path to the ONNX detector file.
    /// Remote backend: model name sent to the server.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause between failed attempts, to avoid hammering a struggling backend.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Hard ceiling on a single backend call; a hung inference call must not
    /// block the batch.
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
    /// Save an annotated screenshot for each successful grounding call.
    #[serde(default = "default_true")]
    pub annotate: bool,
    #[serde(default = "default_screenshots_dir")]
    pub screenshots_dir: PathBuf,
    #[serde(default = "default_conf_threshold")]
    pub detector_confidence: f32,
    #[serde(default = "default_iou_threshold")]
    pub detector_iou: f32,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model: default_model(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            backend_timeout_secs: default_backend_timeout_secs(),
            annotate: true,
            screenshots_dir: default_screenshots_dir(),
            detector_confidence: default_conf_threshold(),
            detector_iou: default_iou_threshold(),
        }
    }
}

/// Expected desktop resolution. Informational only: pixel conversion always
/// uses the dimensions of the actually captured image, this is just compared
/// against reality so a mismatch gets logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenConfig {
    #[serde(default = "default_screen_width")]
    pub expected_width: u32,
    #[serde(default = "default_screen_height")]
    pub expected_height: u32,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            expected_width: default_screen_width(),
            expected_height: default_screen_height(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// OpenAI-compatible chat completions endpoint (e.g. a vLLM server).
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Optional API key stored in config.toml (falls back to env var PINPOINT_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
        }
    }
}

impl RemoteConfig {
    pub fn resolve_api_key(&self) -> String {
        std::env::var("PINPOINT_API_KEY")
            .unwrap_or_else(|_| self.api_key.clone().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Where saved documents land. Defaults to a subdirectory of the desktop.
    #[serde(default)]
    pub target_dir: Option<PathBuf>,
    /// How long to wait for the launched application window to become ready.
    #[serde(default = "default_window_timeout_secs")]
    pub window_timeout_secs: u64,
    /// Pause inserted before clicks and between keystroke sequences.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Abort the batch after this many grounding failures in a row.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            target_dir: None,
            window_timeout_secs: default_window_timeout_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl AutomationConfig {
    pub fn resolve_target_dir(&self) -> PathBuf {
        self.target_dir.clone().unwrap_or_else(|| {
            dirs::desktop_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pinpoint-out")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_post_count")]
    pub count: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            count: default_post_count(),
        }
    }
}

fn default_backend() -> String {
    "local".to_string()
}

fn default_model() -> String {
    "models/icon-detector.onnx".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_backend_timeout_secs() -> u64 {
    60
}

fn default_screenshots_dir() -> PathBuf {
    PathBuf::from("screenshots")
}

fn default_conf_threshold() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.45
}

fn default_screen_width() -> u32 {
    1920
}

fn default_screen_height() -> u32 {
    1080
}

fn default_api_base() -> String {
    "http://localhost:8000/v1/chat/completions".to_string()
}

fn default_window_timeout_secs() -> u64 {
    15
}

fn default_settle_delay_ms() -> u64 {
    300
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_api_url() -> String {
    "https://dummyjson.com/posts".to_string()
}

fn default_post_count() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn resolve_config_path() -> PinpointResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(PinpointError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> PinpointResult<AppConfig> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(
        path = %path.display(),
        backend = %config.grounding.backend,
        "config loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.grounding.backend, "local");
        assert_eq!(cfg.grounding.max_retries, 3);
        assert!(cfg.grounding.annotate);
        assert_eq!(cfg.screen.expected_width, 1920);
        assert_eq!(cfg.content.count, 10);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [grounding]
            backend = "remote"
            max_retries = 5

            [screen]
            expected_width = 2560
            "#,
        )
        .unwrap();
        assert_eq!(cfg.grounding.backend, "remote");
        assert_eq!(cfg.grounding.max_retries, 5);
        assert_eq!(cfg.grounding.retry_delay_ms, 500);
        assert_eq!(cfg.screen.expected_width, 2560);
        assert_eq!(cfg.screen.expected_height, 1080);
    }

    #[test]
    fn api_key_falls_back_to_config_value() {
        let remote = RemoteConfig {
            api_base: default_api_base(),
            api_key: Some("from-file".into()),
        };
        // Env var unset in the test environment, so the file value wins.
        if std::env::var("PINPOINT_API_KEY").is_err() {
            assert_eq!(remote.resolve_api_key(), "from-file");
        }
    }
}
