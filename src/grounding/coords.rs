/// Coordinate parsing and normalization.
///
/// Grounding models answer in a resolution-independent [0, 1000) space; the
/// reply text is free-form and the coordinate pair has to be dug out of it.
/// Conversion to pixels truncates (floor) and clamps to the last valid pixel,
/// so a value arbitrarily close to 1000 still lands inside the image.
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{PinpointError, PinpointResult};

/// A point in the model's [0, 1000) normalized space. Construction validates
/// the range, so a held value is always usable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub fn new(x: f64, y: f64) -> PinpointResult<Self> {
        for (axis, v) in [("x", x), ("y", y)] {
            if !v.is_finite() {
                return Err(PinpointError::Parse(format!(
                    "{axis} coordinate is not finite: {v}"
                )));
            }
            if !(0.0..1000.0).contains(&v) {
                return Err(PinpointError::Parse(format!(
                    "{axis} coordinate {v} outside [0, 1000)"
                )));
            }
        }
        Ok(Self { x, y })
    }

    /// Map into pixel space for an image of the given dimensions.
    ///
    /// Floor convention: `px = floor(nx / 1000 * width)`, clamped into
    /// `[0, width)`. The clamp makes the open upper bound explicit even when
    /// float rounding lands exactly on the edge.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelPoint {
        let px = ((self.x / 1000.0) * width as f64).floor() as i64;
        let py = ((self.y / 1000.0) * height as f64).floor() as i64;
        PixelPoint {
            x: px.clamp(0, (width as i64 - 1).max(0)) as i32,
            y: py.clamp(0, (height as i64 - 1).max(0)) as i32,
        }
    }
}

/// Absolute pixel coordinates on the captured screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

// Tiered patterns: a parenthesized pair anywhere in the text wins over a bare
// comma pair, which wins over a whitespace pair. Signs are captured so that
// negative values are range-rejected instead of mis-read as positive.
static PAREN_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(\s*(-?\d+(?:\.\d+)?)\s*,\s*(-?\d+(?:\.\d+)?)\s*\)").expect("valid regex")
});
static COMMA_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(-?\d+(?:\.\d+)?)\s*,\s*(-?\d+(?:\.\d+)?)").expect("valid regex")
});
static SPACE_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(-?\d+(?:\.\d+)?)\s+(-?\d+(?:\.\d+)?)").expect("valid regex")
});

/// Extract the first coordinate pair from a raw model reply.
///
/// Tolerates surrounding prose and markdown fences. Fails if no pair is
/// present or the extracted values fall outside [0, 1000); a failure is never
/// turned into a guessed coordinate.
pub fn parse_coordinates(raw: &str) -> PinpointResult<NormalizedPoint> {
    let text = raw.trim().replace("```", "");

    for pattern in [&*PAREN_PAIR, &*COMMA_PAIR, &*SPACE_PAIR] {
        if let Some(caps) = pattern.captures(&text) {
            let x: f64 = caps[1]
                .parse()
                .map_err(|e| PinpointError::Parse(format!("x '{}': {e}", &caps[1])))?;
            let y: f64 = caps[2]
                .parse()
                .map_err(|e| PinpointError::Parse(format!("y '{}': {e}", &caps[2])))?;
            return NormalizedPoint::new(x, y);
        }
    }

    Err(PinpointError::Parse(format!(
        "no coordinate pair in model output: {text:?}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Parsing ─────────────────────────────────────────────────────────────

    #[test]
    fn parses_parenthesized_pair() {
        let p = parse_coordinates("(523, 741)").unwrap();
        assert_eq!((p.x, p.y), (523.0, 741.0));
    }

    #[test]
    fn parses_pair_with_inner_spaces() {
        let p = parse_coordinates("( 523 , 741 )").unwrap();
        assert_eq!((p.x, p.y), (523.0, 741.0));
    }

    #[test]
    fn parses_bare_comma_pair() {
        let p = parse_coordinates("523, 741").unwrap();
        assert_eq!((p.x, p.y), (523.0, 741.0));
    }

    #[test]
    fn parses_space_separated_pair() {
        let p = parse_coordinates("523 741").unwrap();
        assert_eq!((p.x, p.y), (523.0, 741.0));
    }

    #[test]
    fn parses_floats() {
        let p = parse_coordinates("(523.7, 741.2)").unwrap();
        assert_eq!((p.x, p.y), (523.7, 741.2));
    }

    #[test]
    fn parses_pair_embedded_in_prose() {
        let p = parse_coordinates("Click at approximately (157, 823) on the icon.").unwrap();
        assert_eq!((p.x, p.y), (157.0, 823.0));
    }

    #[test]
    fn parenthesized_pair_wins_over_earlier_bare_pair() {
        let p = parse_coordinates("Screen is 1920 1080 wide. Answer: (500, 250)").unwrap();
        assert_eq!((p.x, p.y), (500.0, 250.0));
    }

    #[test]
    fn strips_markdown_fences() {
        let p = parse_coordinates("```(523, 741)```").unwrap();
        assert_eq!((p.x, p.y), (523.0, 741.0));
    }

    #[test]
    fn accepts_zero_and_max_valid() {
        assert!(parse_coordinates("(0, 0)").is_ok());
        assert!(parse_coordinates("(999, 999)").is_ok());
        assert!(parse_coordinates("(999.999, 999.999)").is_ok());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(parse_coordinates("(1000, 500)").is_err());
        assert!(parse_coordinates("(500, 1000)").is_err());
        assert!(parse_coordinates("(1500, 200)").is_err());
    }

    #[test]
    fn rejects_negative_values_rather_than_misreading_them() {
        assert!(parse_coordinates("(-5, 10)").is_err());
        assert!(parse_coordinates("-5, 10").is_err());
    }

    #[test]
    fn rejects_text_without_a_pair() {
        assert!(parse_coordinates("no coordinates here").is_err());
        assert!(parse_coordinates("").is_err());
        assert!(parse_coordinates("just one number: 512").is_err());
    }

    #[test]
    fn parsing_is_deterministic() {
        let raw = "Answer: (157.5, 823.25) maybe";
        let a = parse_coordinates(raw).unwrap();
        let b = parse_coordinates(raw).unwrap();
        assert_eq!(a, b);
    }

    // ── Pixel conversion ────────────────────────────────────────────────────

    #[test]
    fn zero_maps_to_pixel_zero() {
        let p = NormalizedPoint::new(0.0, 0.0).unwrap().to_pixels(1920, 1080);
        assert_eq!(p, PixelPoint { x: 0, y: 0 });
    }

    #[test]
    fn center_maps_to_center() {
        let p = NormalizedPoint::new(500.0, 500.0)
            .unwrap()
            .to_pixels(1920, 1080);
        assert_eq!(p, PixelPoint { x: 960, y: 540 });
    }

    #[test]
    fn worked_example_floors() {
        // 157/1000*1920 = 301.44 and 823/1000*1080 = 888.84; floor convention.
        let p = NormalizedPoint::new(157.0, 823.0)
            .unwrap()
            .to_pixels(1920, 1080);
        assert_eq!(p, PixelPoint { x: 301, y: 888 });
    }

    #[test]
    fn near_max_never_reaches_dimension() {
        let p = NormalizedPoint::new(999.999, 999.999)
            .unwrap()
            .to_pixels(1920, 1080);
        assert_eq!(p, PixelPoint { x: 1919, y: 1079 });

        let p = NormalizedPoint::new(999.0, 999.0)
            .unwrap()
            .to_pixels(1920, 1080);
        assert_eq!(p, PixelPoint { x: 1918, y: 1078 });
    }

    #[test]
    fn output_stays_in_range_across_sizes() {
        let sizes = [(1u32, 1u32), (640, 480), (1920, 1080), (3840, 2160), (13, 7)];
        let values = [0.0, 0.5, 1.0, 123.456, 500.0, 999.0, 999.999];
        for &(w, h) in &sizes {
            for &nx in &values {
                for &ny in &values {
                    let p = NormalizedPoint::new(nx, ny).unwrap().to_pixels(w, h);
                    assert!(p.x >= 0 && (p.x as u32) < w, "x={} w={w}", p.x);
                    assert!(p.y >= 0 && (p.y as u32) < h, "y={} h={h}", p.y);
                }
            }
        }
    }

    #[test]
    fn full_pipeline_matches_worked_example() {
        let raw = "Click at approximately (157, 823) on the icon.";
        let p = parse_coordinates(raw).unwrap().to_pixels(1920, 1080);
        assert_eq!(p, PixelPoint { x: 301, y: 888 });
    }
}
