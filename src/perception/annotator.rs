/// Draw a hit marker on a screenshot for human verification.
///
/// The resolved pixel gets a circle, a crosshair, and a small label with the
/// coordinates and the description that was grounded. Diagnostic only: the
/// caller treats any failure here as non-fatal.
use std::path::{Path, PathBuf};

use crate::errors::{PinpointError, PinpointResult};
use crate::grounding::coords::PixelPoint;
use crate::perception::screenshot::Screenshot;

const MARKER_COLOUR: [u8; 4] = [255, 50, 50, 230];
const CIRCLE_RADIUS: i32 = 20;
const CROSSHAIR_LEN: i32 = 40;
const LINE_THICKNESS: i32 = 3;

/// Render the marker onto a copy of `shot` and return PNG-encoded bytes.
pub fn render_marker(
    shot: &Screenshot,
    point: PixelPoint,
    description: &str,
) -> PinpointResult<Vec<u8>> {
    let mut canvas = shot.image.clone();
    let (w, h) = canvas.dimensions();

    draw_circle(&mut canvas, point.x, point.y, CIRCLE_RADIUS, MARKER_COLOUR);
    draw_crosshair(&mut canvas, point.x, point.y, CROSSHAIR_LEN, MARKER_COLOUR);

    // Bigger glyphs on wide captures so the label stays readable.
    let scale: u32 = if w > 1600 { 2 } else { 1 };
    let label = format!("({}, {}) {}", point.x, point.y, truncate(description, 40));
    let label_x = (point.x - (label.len() as i32 * (5 * scale as i32 + 1)) / 2).max(0);
    let label_y = (point.y + CIRCLE_RADIUS + 6).min(h as i32 - 1);
    draw_label_bg(&mut canvas, label_x, label_y, &label, MARKER_COLOUR, scale);

    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(canvas)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .map_err(|e| PinpointError::Capture(format!("PNG encode: {e}")))?;
    Ok(out)
}

/// Render and persist an annotated copy under `dir`.
///
/// The filename leads with `tag` so artifacts correlate with the batch item
/// that produced them; the timestamp keeps retries of the same item apart.
pub fn save_marker(
    shot: &Screenshot,
    point: PixelPoint,
    description: &str,
    dir: &Path,
    tag: &str,
) -> PinpointResult<PathBuf> {
    let png = render_marker(shot, point, description)?;
    std::fs::create_dir_all(dir)?;

    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S%.3f");
    let name = if tag.is_empty() {
        format!("{ts}.png")
    } else {
        format!("{}_{ts}.png", sanitize(tag))
    };
    let path = dir.join(name);
    std::fs::write(&path, png)?;
    tracing::info!(path = %path.display(), "annotated screenshot saved");
    Ok(path)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn sanitize(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

// ── Drawing primitives ──────────────────────────────────────────────────────

fn draw_crosshair(canvas: &mut image::RgbaImage, cx: i32, cy: i32, len: i32, col: [u8; 4]) {
    let half = LINE_THICKNESS / 2;
    for t in -half..=half {
        for d in -len..=len {
            put_pixel_checked(canvas, cx + d, cy + t, col);
            put_pixel_checked(canvas, cx + t, cy + d, col);
        }
    }
}

fn draw_circle(canvas: &mut image::RgbaImage, cx: i32, cy: i32, radius: i32, col: [u8; 4]) {
    // Ring test over the bounding square; cheap at this radius.
    let outer = radius;
    let inner = radius - LINE_THICKNESS;
    for dy in -outer..=outer {
        for dx in -outer..=outer {
            let d2 = dx * dx + dy * dy;
            if d2 <= outer * outer && d2 >= inner * inner {
                put_pixel_checked(canvas, cx + dx, cy + dy, col);
            }
        }
    }
}

fn draw_label_bg(
    canvas: &mut image::RgbaImage,
    x: i32,
    y: i32,
    text: &str,
    col: [u8; 4],
    scale: u32,
) {
    let (w, h) = canvas.dimensions();
    let char_w = 5 * scale + 1;
    let char_h = 5 * scale;
    let pad = 2 * scale;
    let label_w = text.len() as u32 * char_w + pad * 2;
    let label_h = char_h + pad * 2;

    // Darken the background behind the label
    for dy in 0..label_h {
        for dx in 0..label_w {
            let px = x as u32 + dx;
            let py = y as u32 + dy;
            if px < w && py < h {
                let p = canvas.get_pixel_mut(px, py);
                p[0] = (p[0] as f32 * 0.2) as u8;
                p[1] = (p[1] as f32 * 0.2) as u8;
                p[2] = (p[2] as f32 * 0.2) as u8;
                p[3] = 255;
            }
        }
    }

    let text_x = x as u32 + pad;
    let text_y = y as u32 + pad;
    let step = 5 * scale + 1;

    for (i, c) in text.to_uppercase().chars().enumerate() {
        let gx = text_x + i as u32 * step;
        if gx + 5 * scale >= w {
            break;
        }
        draw_mini_glyph(canvas, c, gx, text_y, col, scale);
    }
}

/// Minimal 5×5 font renderer. Supports `scale` for multi-pixel rendering on
/// high-resolution screens.
fn draw_mini_glyph(canvas: &mut image::RgbaImage, c: char, px: u32, py: u32, col: [u8; 4], scale: u32) {
    let glyph = match c {
        '0'..='9' => MINI_FONT[(c as u8 - b'0') as usize],
        'A'..='Z' => MINI_FONT[10 + (c as u8 - b'A') as usize],
        '(' => [0b00010, 0b00100, 0b00100, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00100, 0b00100, 0b01000],
        ',' => [0b00000, 0b00000, 0b00000, 0b00100, 0b01000],
        '_' => [0b00000, 0b00000, 0b00000, 0b00000, 0b11111],
        ' ' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000],
        _ => return,
    };
    let (w, h) = canvas.dimensions();
    for (row, &bits) in glyph.iter().enumerate() {
        for bit in 0..5u32 {
            if (bits >> (4 - bit)) & 1 == 0 {
                continue;
            }
            for sy in 0..scale {
                for sx in 0..scale {
                    let x = px + bit * scale + sx;
                    let y = py + row as u32 * scale + sy;
                    if x < w && y < h {
                        set_pixel(canvas, x, y, col);
                    }
                }
            }
        }
    }
}

fn put_pixel_checked(canvas: &mut image::RgbaImage, x: i32, y: i32, col: [u8; 4]) {
    let (w, h) = canvas.dimensions();
    if x >= 0 && y >= 0 && (x as u32) < w && (y as u32) < h {
        set_pixel(canvas, x as u32, y as u32, col);
    }
}

fn set_pixel(canvas: &mut image::RgbaImage, x: u32, y: u32, col: [u8; 4]) {
    let p = canvas.get_pixel_mut(x, y);
    let a = col[3] as f32 / 255.0;
    p[0] = (p[0] as f32 * (1.0 - a) + col[0] as f32 * a).round() as u8;
    p[1] = (p[1] as f32 * (1.0 - a) + col[1] as f32 * a).round() as u8;
    p[2] = (p[2] as f32 * (1.0 - a) + col[2] as f32 * a).round() as u8;
    p[3] = 255;
}

/// 5×5 bitmap font, digits 0-9 then letters A-Z.
const MINI_FONT: [[u8; 5]; 36] = [
    [0b01110, 0b10001, 0b10001, 0b10001, 0b01110], // 0
    [0b00100, 0b01100, 0b00100, 0b00100, 0b01110], // 1
    [0b01110, 0b10001, 0b00110, 0b01000, 0b11111], // 2
    [0b11110, 0b00001, 0b00110, 0b00001, 0b11110], // 3
    [0b00110, 0b01010, 0b10010, 0b11111, 0b00010], // 4
    [0b11111, 0b10000, 0b11110, 0b00001, 0b11110], // 5
    [0b01110, 0b10000, 0b11110, 0b10001, 0b01110], // 6
    [0b11111, 0b00001, 0b00010, 0b00100, 0b00100], // 7
    [0b01110, 0b10001, 0b01110, 0b10001, 0b01110], // 8
    [0b01110, 0b10001, 0b01111, 0b00001, 0b01110], // 9
    [0b01110, 0b10001, 0b11111, 0b10001, 0b10001], // A
    [0b11110, 0b10001, 0b11110, 0b10001, 0b11110], // B
    [0b01110, 0b10000, 0b10000, 0b10000, 0b01110], // C
    [0b11100, 0b10010, 0b10001, 0b10010, 0b11100], // D
    [0b11111, 0b10000, 0b11110, 0b10000, 0b11111], // E
    [0b11111, 0b10000, 0b11110, 0b10000, 0b10000], // F
    [0b01110, 0b10000, 0b10011, 0b10001, 0b01110], // G
    [0b10001, 0b10001, 0b11111, 0b10001, 0b10001], // H
    [0b01110, 0b00100, 0b00100, 0b00100, 0b01110], // I
    [0b00111, 0b00010, 0b00010, 0b10010, 0b01100], // J
    [0b10001, 0b10010, 0b11100, 0b10010, 0b10001], // K
    [0b10000, 0b10000, 0b10000, 0b10000, 0b11111], // L
    [0b10001, 0b11011, 0b10101, 0b10001, 0b10001], // M
    [0b10001, 0b11001, 0b10101, 0b10011, 0b10001], // N
    [0b01110, 0b10001, 0b10001, 0b10001, 0b01110], // O
    [0b11110, 0b10001, 0b11110, 0b10000, 0b10000], // P
    [0b01110, 0b10001, 0b10101, 0b10010, 0b01101], // Q
    [0b11110, 0b10001, 0b11110, 0b10010, 0b10001], // R
    [0b01111, 0b10000, 0b01110, 0b00001, 0b11110], // S
    [0b11111, 0b00100, 0b00100, 0b00100, 0b00100], // T
    [0b10001, 0b10001, 0b10001, 0b10001, 0b01110], // U
    [0b10001, 0b10001, 0b10001, 0b01010, 0b00100], // V
    [0b10001, 0b10001, 0b10101, 0b11011, 0b10001], // W
    [0b10001, 0b01010, 0b00100, 0b01010, 0b10001], // X
    [0b10001, 0b01010, 0b00100, 0b00100, 0b00100], // Y
    [0b11111, 0b00010, 0b00100, 0b01000, 0b11111], // Z
];

#[cfg(test)]
mod tests {
    use super::*;

    fn test_shot() -> Screenshot {
        Screenshot::from_image(image::RgbaImage::from_pixel(
            200,
            150,
            image::Rgba([40, 40, 40, 255]),
        ))
    }

    #[test]
    fn render_produces_decodable_png() {
        let shot = test_shot();
        let png = render_marker(&shot, PixelPoint { x: 100, y: 75 }, "test target").unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 150));
    }

    #[test]
    fn render_tolerates_points_near_the_border() {
        let shot = test_shot();
        render_marker(&shot, PixelPoint { x: 0, y: 0 }, "corner").unwrap();
        render_marker(&shot, PixelPoint { x: 199, y: 149 }, "corner").unwrap();
    }

    #[test]
    fn save_marker_writes_tagged_file() {
        let dir = tempfile::tempdir().unwrap();
        let shot = test_shot();
        let path = save_marker(
            &shot,
            PixelPoint { x: 50, y: 50 },
            "notepad icon",
            dir.path(),
            "post_3",
        )
        .unwrap();
        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("post_3_"));
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
