/// The grounding engine: capture, infer, parse, retry.
///
/// Each attempt works on a fresh screenshot because the desktop may have
/// changed since the last one (a popup appeared, a highlight cleared). All
/// retryable failure classes share one attempt budget; only the final
/// exhausted-budget error ever reaches the caller, carrying the last
/// failure's reason. The engine never substitutes a guessed coordinate.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::errors::{PinpointError, PinpointResult};
use crate::grounding::backend::{BackendKind, GroundingBackend};
use crate::grounding::coords::{parse_coordinates, PixelPoint};
use crate::perception::annotator;
use crate::perception::screenshot::ScreenCapturer;

#[derive(Debug, Clone)]
pub struct GroundingResult {
    pub point: PixelPoint,
    /// 1-based number of the attempt that succeeded.
    pub attempts: u32,
    pub backend: BackendKind,
    pub annotated_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backend_timeout: Duration,
    pub annotate: bool,
    pub screenshots_dir: PathBuf,
    /// Configured resolution, only used to warn about mismatches; conversion
    /// always follows the captured image.
    pub expected_resolution: Option<(u32, u32)>,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_retries: config.grounding.max_retries,
            retry_delay: Duration::from_millis(config.grounding.retry_delay_ms),
            backend_timeout: Duration::from_secs(config.grounding.backend_timeout_secs),
            annotate: config.grounding.annotate,
            screenshots_dir: config.grounding.screenshots_dir.clone(),
            expected_resolution: Some((
                config.screen.expected_width,
                config.screen.expected_height,
            )),
        }
    }
}

pub struct GroundingEngine {
    capturer: Arc<dyn ScreenCapturer>,
    backend: Arc<dyn GroundingBackend>,
    settings: EngineSettings,
}

impl GroundingEngine {
    pub fn new(
        capturer: Arc<dyn ScreenCapturer>,
        backend: Arc<dyn GroundingBackend>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            capturer,
            backend,
            settings,
        }
    }

    /// Ground `description` to a pixel on the current desktop.
    pub async fn locate(&self, description: &str) -> PinpointResult<GroundingResult> {
        self.locate_tagged(description, "").await
    }

    /// Like [`locate`](Self::locate), with a tag that prefixes any annotated
    /// debug image so artifacts correlate with the batch item being processed.
    pub async fn locate_tagged(
        &self,
        description: &str,
        tag: &str,
    ) -> PinpointResult<GroundingResult> {
        let budget = self.settings.max_retries.max(1);
        let mut last_failure: Option<PinpointError> = None;

        for attempt in 1..=budget {
            match self.attempt(description, tag, attempt).await {
                Ok(result) => {
                    tracing::info!(
                        x = result.point.x,
                        y = result.point.y,
                        attempt,
                        backend = %result.backend,
                        "grounding succeeded"
                    );
                    return Ok(result);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        attempt,
                        budget,
                        error = %e,
                        "grounding attempt failed"
                    );
                    last_failure = Some(e);
                    if attempt < budget && !self.settings.retry_delay.is_zero() {
                        tokio::time::sleep(self.settings.retry_delay).await;
                    }
                }
                // Capture failures and the like: no point in retrying.
                Err(e) => return Err(e),
            }
        }

        Err(PinpointError::Grounding {
            reason: last_failure
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts were made".into()),
            attempts: budget,
        })
    }

    async fn attempt(
        &self,
        description: &str,
        tag: &str,
        attempt: u32,
    ) -> PinpointResult<GroundingResult> {
        let shot = self.capturer.capture().await?;

        if let Some((ew, eh)) = self.settings.expected_resolution {
            if (shot.width, shot.height) != (ew, eh) {
                tracing::warn!(
                    actual = %format!("{}x{}", shot.width, shot.height),
                    expected = %format!("{ew}x{eh}"),
                    "captured resolution differs from configured resolution"
                );
            }
        }

        let raw = tokio::time::timeout(
            self.settings.backend_timeout,
            self.backend.ground(&shot, description),
        )
        .await
        .map_err(|_| {
            PinpointError::Backend(format!(
                "backend call timed out after {:?}",
                self.settings.backend_timeout
            ))
        })??;

        let point = parse_coordinates(&raw)?.to_pixels(shot.width, shot.height);

        // Best-effort diagnostics: a failed write must not fail the call.
        let annotated_path = if self.settings.annotate {
            match annotator::save_marker(
                &shot,
                point,
                description,
                &self.settings.screenshots_dir,
                tag,
            ) {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(error = %e, "could not save annotated screenshot");
                    None
                }
            }
        } else {
            None
        };

        Ok(GroundingResult {
            point,
            attempts: attempt,
            backend: self.backend.kind(),
            annotated_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::perception::screenshot::Screenshot;

    struct StubCapturer {
        calls: AtomicU32,
        fail: bool,
    }

    impl StubCapturer {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl ScreenCapturer for StubCapturer {
        async fn capture(&self) -> PinpointResult<Screenshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PinpointError::Capture("no display".into()));
            }
            Ok(Screenshot::from_image(image::RgbaImage::from_pixel(
                640,
                480,
                image::Rgba([0, 0, 0, 255]),
            )))
        }
    }

    /// Backend that fails a fixed number of times before answering.
    struct FlakyBackend {
        failures_before_success: u32,
        calls: AtomicU32,
        answer: String,
    }

    impl FlakyBackend {
        fn new(failures_before_success: u32, answer: &str) -> Self {
            Self {
                failures_before_success,
                calls: AtomicU32::new(0),
                answer: answer.to_string(),
            }
        }
    }

    #[async_trait]
    impl GroundingBackend for FlakyBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Remote
        }

        async fn ground(&self, _shot: &Screenshot, _description: &str) -> PinpointResult<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(PinpointError::Backend("stub inference failure".into()))
            } else {
                Ok(self.answer.clone())
            }
        }
    }

    fn test_settings() -> EngineSettings {
        EngineSettings {
            max_retries: 3,
            retry_delay: Duration::ZERO,
            backend_timeout: Duration::from_secs(5),
            annotate: false,
            screenshots_dir: PathBuf::from("screenshots"),
            expected_resolution: None,
        }
    }

    fn engine_with(
        capturer: Arc<StubCapturer>,
        backend: Arc<FlakyBackend>,
        settings: EngineSettings,
    ) -> GroundingEngine {
        GroundingEngine::new(capturer, backend, settings)
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_after_two_failures() {
        let capturer = Arc::new(StubCapturer::new());
        let backend = Arc::new(FlakyBackend::new(2, "(500, 500)"));
        let engine = engine_with(capturer.clone(), backend, test_settings());

        let result = engine.locate("the icon").await.unwrap();
        assert_eq!(result.attempts, 3);
        assert_eq!(result.point, PixelPoint { x: 320, y: 240 });
        assert_eq!(result.backend, BackendKind::Remote);
        // A fresh screenshot per attempt, never a reused one.
        assert_eq!(capturer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_budget_and_reports_last_reason() {
        let capturer = Arc::new(StubCapturer::new());
        let backend = Arc::new(FlakyBackend::new(u32::MAX, "unreachable"));
        let engine = engine_with(capturer, backend.clone(), test_settings());

        let err = engine.locate("the icon").await.unwrap_err();
        match err {
            PinpointError::Grounding { reason, attempts } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("stub inference failure"));
            }
            other => panic!("expected Grounding error, got {other:?}"),
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn out_of_range_answers_burn_the_same_budget() {
        let capturer = Arc::new(StubCapturer::new());
        let backend = Arc::new(FlakyBackend::new(0, "(1200, 40)"));
        let engine = engine_with(capturer, backend.clone(), test_settings());

        let err = engine.locate("the icon").await.unwrap_err();
        match err {
            PinpointError::Grounding { reason, attempts } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("outside"));
            }
            other => panic!("expected Grounding error, got {other:?}"),
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn capture_failure_is_fatal_and_skips_the_backend() {
        let capturer = Arc::new(StubCapturer::failing());
        let backend = Arc::new(FlakyBackend::new(0, "(500, 500)"));
        let engine = engine_with(capturer.clone(), backend.clone(), test_settings());

        let err = engine.locate("the icon").await.unwrap_err();
        assert!(matches!(err, PinpointError::Capture(_)));
        assert_eq!(capturer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn annotation_is_written_and_tagged_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings();
        settings.annotate = true;
        settings.screenshots_dir = dir.path().to_path_buf();

        let capturer = Arc::new(StubCapturer::new());
        let backend = Arc::new(FlakyBackend::new(0, "(250, 750)"));
        let engine = engine_with(capturer, backend, settings);

        let result = engine.locate_tagged("the icon", "post_7").await.unwrap();
        let path = result.annotated_path.expect("annotation enabled");
        assert!(path.exists());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("post_7_"));
    }

    #[tokio::test]
    async fn annotation_failure_does_not_fail_the_call() {
        let mut settings = test_settings();
        settings.annotate = true;
        // A path that cannot be created as a directory.
        settings.screenshots_dir = PathBuf::from("/dev/null/screenshots");

        let capturer = Arc::new(StubCapturer::new());
        let backend = Arc::new(FlakyBackend::new(0, "(250, 750)"));
        let engine = engine_with(capturer, backend, settings);

        let result = engine.locate("the icon").await.unwrap();
        assert!(result.annotated_path.is_none());
        assert_eq!(result.attempts, 1);
    }
}
