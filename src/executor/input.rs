/// Physical mouse/keyboard simulation via enigo.
///
/// Every operation builds its own enigo handle on a blocking thread; the
/// handle never crosses threads and calls are short, so there is nothing to
/// keep alive between operations. Small sleeps between events mirror how a
/// human paces input, which the target applications tolerate much better
/// than instantaneous event bursts.
use std::time::Duration;

use enigo::{Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};

use crate::errors::{PinpointError, PinpointResult};

const CLICK_PAUSE: Duration = Duration::from_millis(120);
const DOUBLE_CLICK_GAP: Duration = Duration::from_millis(80);
const KEY_PAUSE: Duration = Duration::from_millis(50);

async fn run_input<F>(f: F) -> PinpointResult<()>
where
    F: FnOnce(&mut Enigo) -> Result<(), enigo::InputError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut enigo = Enigo::new(&Settings::default())
            .map_err(|e| PinpointError::Executor(format!("input driver init: {e}")))?;
        f(&mut enigo).map_err(|e| PinpointError::Executor(format!("input: {e}")))
    })
    .await
    .map_err(|e| PinpointError::Executor(format!("input task join: {e}")))?
}

pub async fn mouse_click(x: i32, y: i32) -> PinpointResult<()> {
    run_input(move |enigo| {
        enigo.move_mouse(x, y, Coordinate::Abs)?;
        std::thread::sleep(CLICK_PAUSE);
        enigo.button(Button::Left, Direction::Click)
    })
    .await
}

pub async fn mouse_double_click(x: i32, y: i32) -> PinpointResult<()> {
    tracing::info!(x, y, "double-clicking");
    run_input(move |enigo| {
        enigo.move_mouse(x, y, Coordinate::Abs)?;
        std::thread::sleep(CLICK_PAUSE);
        enigo.button(Button::Left, Direction::Click)?;
        std::thread::sleep(DOUBLE_CLICK_GAP);
        enigo.button(Button::Left, Direction::Click)
    })
    .await
}

/// Type text into the focused control. With `clear_first`, the existing
/// content is selected and replaced.
pub async fn type_text(text: &str, clear_first: bool) -> PinpointResult<()> {
    let text = text.to_string();
    run_input(move |enigo| {
        if clear_first {
            chord(enigo, &[Key::Control], Key::Unicode('a'))?;
            std::thread::sleep(KEY_PAUSE);
        }
        enigo.text(&text)
    })
    .await
}

pub async fn press_key(key: Key) -> PinpointResult<()> {
    run_input(move |enigo| enigo.key(key, Direction::Click)).await
}

/// Hold the modifiers, tap the key, release in reverse order.
pub async fn hotkey(modifiers: &[Key], key: Key) -> PinpointResult<()> {
    let modifiers = modifiers.to_vec();
    run_input(move |enigo| {
        for m in &modifiers {
            enigo.key(*m, Direction::Press)?;
        }
        let result = enigo.key(key, Direction::Click);
        for m in modifiers.iter().rev() {
            // Always release, even if the tap failed, or the modifier sticks.
            let _ = enigo.key(*m, Direction::Release);
        }
        result
    })
    .await
}

/// Minimize everything so the desktop icons are visible to the capturer.
pub async fn show_desktop() -> PinpointResult<()> {
    hotkey(&[Key::Meta], Key::Unicode('m')).await?;
    tokio::time::sleep(Duration::from_millis(800)).await;
    // Deselect any highlighted icon so candidates look uniform to the model.
    press_key(Key::Escape).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

fn chord(enigo: &mut Enigo, modifiers: &[Key], key: Key) -> Result<(), enigo::InputError> {
    for m in modifiers {
        enigo.key(*m, Direction::Press)?;
    }
    let result = enigo.key(key, Direction::Click);
    for m in modifiers.iter().rev() {
        let _ = enigo.key(*m, Direction::Release);
    }
    result
}
