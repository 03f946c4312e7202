/// Visual stability detection over sampled frame hashes.
///
/// Used as the window-readiness wait after launching an application: first
/// the screen must change away from the pre-click baseline (something
/// happened), then it must hold still for a few frames (the open animation
/// finished). Both phases share one bounded deadline.
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{PinpointError, PinpointResult};
use crate::perception::screenshot::ScreenCapturer;

#[derive(Debug, Clone)]
pub struct StabilityConfig {
    pub check_interval_ms: u64,
    pub min_stable_frames: usize,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 200,
            min_stable_frames: 3,
        }
    }
}

pub struct VisualStabilityDetector {
    config: StabilityConfig,
    last_frame_hash: Option<u64>,
    stable_frame_count: usize,
}

impl VisualStabilityDetector {
    pub fn new(config: StabilityConfig) -> Self {
        Self {
            config,
            last_frame_hash: None,
            stable_frame_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.last_frame_hash = None;
        self.stable_frame_count = 0;
    }

    /// Hash of roughly a thousand evenly sampled bytes. Enough to tell two
    /// desktop states apart without walking the full frame.
    pub fn frame_hash(frame: &[u8]) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        let sample_step = (frame.len() / 1000).max(1);
        for i in (0..frame.len()).step_by(sample_step) {
            frame[i].hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Feed one frame; returns true once enough consecutive identical frames
    /// have been seen.
    pub fn observe(&mut self, frame: &[u8]) -> bool {
        let current_hash = Self::frame_hash(frame);

        if let Some(last_hash) = self.last_frame_hash {
            if current_hash == last_hash {
                self.stable_frame_count += 1;
            } else {
                self.stable_frame_count = 0;
            }
        }

        self.last_frame_hash = Some(current_hash);
        self.stable_frame_count >= self.config.min_stable_frames
    }
}

/// Wait until the desktop changes away from `baseline` and then settles.
///
/// Returns `Executor` errors on both failure modes: nothing ever changed
/// (the click likely missed) and changed-but-never-settled within the
/// deadline. The deadline covers both phases together.
pub async fn wait_for_change_then_settle(
    capturer: &Arc<dyn ScreenCapturer>,
    baseline: &[u8],
    config: StabilityConfig,
    timeout: Duration,
) -> PinpointResult<()> {
    let baseline_hash = VisualStabilityDetector::frame_hash(baseline);
    let start = std::time::Instant::now();
    let interval = Duration::from_millis(config.check_interval_ms);

    // Phase 1: something must happen on screen.
    loop {
        if start.elapsed() >= timeout {
            return Err(PinpointError::Executor(format!(
                "screen did not change within {timeout:?} (window never appeared?)"
            )));
        }
        let shot = capturer.capture().await?;
        if VisualStabilityDetector::frame_hash(shot.image.as_raw()) != baseline_hash {
            tracing::debug!(elapsed = ?start.elapsed(), "screen changed, waiting for settle");
            break;
        }
        tokio::time::sleep(interval).await;
    }

    // Phase 2: hold still for min_stable_frames consecutive samples.
    let mut detector = VisualStabilityDetector::new(config);
    loop {
        if start.elapsed() >= timeout {
            return Err(PinpointError::Executor(format!(
                "screen did not settle within {timeout:?}"
            )));
        }
        let shot = capturer.capture().await?;
        if detector.observe(shot.image.as_raw()) {
            tracing::debug!(elapsed = ?start.elapsed(), "visual stability achieved");
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
}
