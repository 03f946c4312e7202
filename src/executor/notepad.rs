/// Notepad-specific keystroke sequences: open via the grounded icon, type a
/// document, save it to a known path, close the window.
///
/// There is no window-handle plumbing here. Readiness is observed visually
/// (the screen must change after the double-click and then settle) and the
/// authoritative success signal for a save is the file showing up on disk
/// with content.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use enigo::Key;

use crate::errors::{PinpointError, PinpointResult};
use crate::executor::input;
use crate::grounding::coords::PixelPoint;
use crate::perception::screenshot::ScreenCapturer;
use crate::perception::stability::{wait_for_change_then_settle, StabilityConfig};

const SAVE_DIALOG_DELAY: Duration = Duration::from_millis(1500);
const SAVE_COMPLETE_DELAY: Duration = Duration::from_millis(1000);
const SAVE_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);
const SAVE_VERIFY_POLL: Duration = Duration::from_millis(500);
const CLOSE_DELAY: Duration = Duration::from_millis(500);

/// Double-click the grounded icon and wait for the application window.
///
/// The baseline frame is captured before the click so the wait can insist on
/// an actual change; a desktop that stays pixel-identical means the click
/// missed or the application never launched.
pub async fn open_via_icon(
    capturer: &Arc<dyn ScreenCapturer>,
    point: PixelPoint,
    window_timeout: Duration,
) -> PinpointResult<()> {
    let baseline = capturer.capture().await?;
    input::mouse_double_click(point.x, point.y).await?;
    wait_for_change_then_settle(
        capturer,
        baseline.image.as_raw(),
        StabilityConfig::default(),
        window_timeout,
    )
    .await?;
    tracing::info!("application window ready");
    Ok(())
}

/// Replace the document body with `text`.
pub async fn type_document(text: &str) -> PinpointResult<()> {
    tracing::info!(chars = text.len(), "typing document content");
    input::type_text(text, true).await
}

/// Save As to an absolute path and verify the file landed on disk.
pub async fn save_document_as(path: &Path) -> PinpointResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let existed_before = path.exists();
    let path_str = path
        .to_str()
        .ok_or_else(|| PinpointError::Executor(format!("non-UTF8 save path: {path:?}")))?
        .to_string();

    tracing::info!(path = %path_str, "saving document");

    // Force the Save As dialog even for an already-titled document.
    input::hotkey(&[Key::Control, Key::Shift], Key::Unicode('s')).await?;
    tokio::time::sleep(SAVE_DIALOG_DELAY).await;

    // The filename box has focus; replace whatever is in it with the full path.
    input::type_text(&path_str, true).await?;
    input::press_key(Key::Return).await?;
    tokio::time::sleep(SAVE_COMPLETE_DELAY).await;

    if existed_before {
        // An overwrite confirmation focuses "No" by default; Alt+Y is the
        // accelerator for "Yes".
        input::hotkey(&[Key::Alt], Key::Unicode('y')).await?;
        tokio::time::sleep(CLOSE_DELAY).await;
    }

    verify_saved(path).await
}

async fn verify_saved(path: &Path) -> PinpointResult<()> {
    verify_saved_within(path, SAVE_VERIFY_TIMEOUT).await
}

/// Poll for the saved file; the dialog may take a moment to finish writing.
async fn verify_saved_within(path: &Path, timeout: Duration) -> PinpointResult<()> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.len() > 0 => {
                tracing::info!(path = %path.display(), size = meta.len(), "save verified on disk");
                return Ok(());
            }
            _ if std::time::Instant::now() >= deadline => {
                return Err(PinpointError::Executor(format!(
                    "save not verified: {} missing or empty",
                    path.display()
                )));
            }
            _ => tokio::time::sleep(SAVE_VERIFY_POLL).await,
        }
    }
}

/// Close the window, declining any save prompt for leftover edits.
pub async fn close_window() -> PinpointResult<()> {
    input::hotkey(&[Key::Alt], Key::F4).await?;
    tokio::time::sleep(CLOSE_DELAY).await;
    // "Don't save" accelerator, in case a dirty-buffer prompt appeared.
    input::hotkey(&[Key::Alt], Key::Unicode('n')).await?;
    tokio::time::sleep(CLOSE_DELAY).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verify_saved_accepts_nonempty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("post_1.txt");
        std::fs::write(&path, "Title: Hello\n\nBody").unwrap();
        verify_saved(&path).await.unwrap();
    }

    #[tokio::test]
    async fn verify_saved_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("post_2.txt");
        std::fs::write(&path, "").unwrap();
        let err = verify_saved_within(&path, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, PinpointError::Executor(_)));
    }

    #[tokio::test]
    async fn verify_saved_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never_written.txt");
        let err = verify_saved_within(&path, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, PinpointError::Executor(_)));
    }
}
