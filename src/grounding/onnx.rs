/// In-process grounding backend.
///
/// Runs an ONNX icon-detection model (YOLO-style head) over the screenshot
/// and answers with the centre of its most confident hit, formatted in the
/// same "(x, y)" textual shape the remote backend returns. The session is
/// built once at startup and reused for every call; inference is serialized
/// behind a mutex because the underlying execution provider context is not
/// safe to share.
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokio::sync::Mutex;

use crate::errors::{PinpointError, PinpointResult};
use crate::grounding::backend::{BackendKind, GroundingBackend};
use crate::perception::screenshot::Screenshot;

/// One candidate hit, bbox normalised to [0, 1].
#[derive(Debug, Clone)]
struct Detection {
    bbox: [f32; 4],
    confidence: f32,
}

pub struct OnnxBackend {
    detector: Arc<Mutex<IconDetector>>,
}

impl OnnxBackend {
    /// Build the session up front so a bad model path fails at startup, not
    /// in the middle of a batch.
    pub fn load(model_path: &str, conf_threshold: f32, iou_threshold: f32) -> PinpointResult<Self> {
        let detector = IconDetector::load(model_path, conf_threshold, iou_threshold)?;
        tracing::info!(path = %model_path, "ONNX detector loaded");
        Ok(Self {
            detector: Arc::new(Mutex::new(detector)),
        })
    }
}

#[async_trait]
impl GroundingBackend for OnnxBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn ground(&self, shot: &Screenshot, description: &str) -> PinpointResult<String> {
        tracing::debug!(description = %description, "local grounding request");

        let detector = Arc::clone(&self.detector);
        let frame = shot.image.clone();
        let detections = tokio::task::spawn_blocking(move || {
            let mut det = detector.blocking_lock();
            det.detect(&frame)
        })
        .await
        .map_err(|e| PinpointError::Backend(format!("inference task join: {e}")))??;

        let best = detections
            .into_iter()
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .ok_or_else(|| PinpointError::Backend("no icon candidates detected".into()))?;

        // Centre of the bbox, scaled into the shared [0, 1000) answer space.
        let cx = ((best.bbox[0] + best.bbox[2]) / 2.0 * 1000.0).clamp(0.0, 999.0);
        let cy = ((best.bbox[1] + best.bbox[3]) / 2.0 * 1000.0).clamp(0.0, 999.0);
        let answer = format!("({}, {})", cx.round() as u32, cy.round() as u32);

        tracing::debug!(
            confidence = best.confidence,
            answer = %answer,
            "local grounding answer"
        );
        Ok(answer)
    }
}

/// Holds the ONNX Runtime session and inference configuration.
#[derive(Debug)]
struct IconDetector {
    session: Session,
    input_size: u32,
    conf_threshold: f32,
    iou_threshold: f32,
}

impl IconDetector {
    fn load(model_path: &str, conf_threshold: f32, iou_threshold: f32) -> PinpointResult<Self> {
        if !Path::new(model_path).exists() {
            return Err(PinpointError::Backend(format!(
                "ONNX model not found: {model_path}"
            )));
        }
        let session = Session::builder()
            .map_err(|e| PinpointError::Backend(format!("ort session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PinpointError::Backend(format!("ort opt-level: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| PinpointError::Backend(format!("ort load model: {e}")))?;

        Ok(Self {
            session,
            input_size: 640,
            conf_threshold,
            iou_threshold,
        })
    }

    fn detect(&mut self, frame: &image::RgbaImage) -> PinpointResult<Vec<Detection>> {
        let img = image::DynamicImage::ImageRgba8(frame.clone());
        let (orig_w, orig_h) = (img.width(), img.height());

        let (input_tensor, pad_x, pad_y, scale) = self.preprocess(&img);

        let input_value = Tensor::from_array(input_tensor)
            .map_err(|e| PinpointError::Backend(format!("ort tensor: {e}")))?;

        let output_owned = {
            let outputs = self
                .session
                .run(ort::inputs![input_value])
                .map_err(|e| PinpointError::Backend(format!("ort run: {e}")))?;

            outputs[0]
                .try_extract_array::<f32>()
                .map_err(|e| PinpointError::Backend(format!("extract tensor: {e}")))?
                .to_owned()
            // outputs (and the borrow on session) end here
        };

        self.postprocess(&output_owned.view(), orig_w, orig_h, pad_x, pad_y, scale)
    }

    /// Resize + letterbox + normalise into an NCHW f32 tensor.
    fn preprocess(&self, img: &image::DynamicImage) -> (Array4<f32>, f32, f32, f32) {
        let sz = self.input_size;
        let (ow, oh) = (img.width() as f32, img.height() as f32);
        let scale = (sz as f32 / ow).min(sz as f32 / oh);
        let nw = (ow * scale).round() as u32;
        let nh = (oh * scale).round() as u32;
        let pad_x = (sz - nw) as f32 / 2.0;
        let pad_y = (sz - nh) as f32 / 2.0;

        let resized = img.resize_exact(nw, nh, image::imageops::FilterType::CatmullRom);
        let rgb = resized.to_rgb8();

        let mut canvas = image::RgbImage::from_pixel(sz, sz, image::Rgb([114, 114, 114]));
        image::imageops::overlay(&mut canvas, &rgb, pad_x.round() as i64, pad_y.round() as i64);

        let mut tensor = Array4::<f32>::zeros((1, 3, sz as usize, sz as usize));
        for y in 0..sz {
            for x in 0..sz {
                let p = canvas.get_pixel(x, y);
                tensor[[0, 0, y as usize, x as usize]] = p[0] as f32 / 255.0;
                tensor[[0, 1, y as usize, x as usize]] = p[1] as f32 / 255.0;
                tensor[[0, 2, y as usize, x as usize]] = p[2] as f32 / 255.0;
            }
        }

        (tensor, pad_x, pad_y, scale)
    }

    fn postprocess(
        &self,
        output: &ndarray::ArrayViewD<f32>,
        orig_w: u32,
        orig_h: u32,
        pad_x: f32,
        pad_y: f32,
        scale: f32,
    ) -> PinpointResult<Vec<Detection>> {
        // YOLO-style output: [1, 4 + num_classes, num_proposals]
        let shape = output.shape();
        if shape.len() < 3 {
            return Err(PinpointError::Backend(format!(
                "unexpected output shape: {shape:?}"
            )));
        }
        let num_classes = shape[1] - 4;
        let num_preds = shape[2];

        let mut detections: Vec<Detection> = Vec::new();

        for i in 0..num_preds {
            let cx = output[[0, 0, i]];
            let cy = output[[0, 1, i]];
            let w = output[[0, 2, i]];
            let h = output[[0, 3, i]];

            let mut max_score = 0.0f32;
            for c in 0..num_classes {
                let s = output[[0, 4 + c, i]];
                if s > max_score {
                    max_score = s;
                }
            }
            if max_score < self.conf_threshold {
                continue;
            }

            // Undo letterbox into original pixel space, then normalise to [0, 1]
            let x1 = ((cx - w / 2.0) - pad_x) / scale;
            let y1 = ((cy - h / 2.0) - pad_y) / scale;
            let x2 = ((cx + w / 2.0) - pad_x) / scale;
            let y2 = ((cy + h / 2.0) - pad_y) / scale;

            detections.push(Detection {
                bbox: [
                    (x1 / orig_w as f32).clamp(0.0, 1.0),
                    (y1 / orig_h as f32).clamp(0.0, 1.0),
                    (x2 / orig_w as f32).clamp(0.0, 1.0),
                    (y2 / orig_h as f32).clamp(0.0, 1.0),
                ],
                confidence: max_score,
            });
        }

        let kept = nms(&detections, self.iou_threshold);
        Ok(kept.into_iter().map(|i| detections[i].clone()).collect())
    }
}

/// Greedy NMS over a single class.
fn nms(dets: &[Detection], iou_threshold: f32) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..dets.len()).collect();
    indices.sort_by(|&a, &b| {
        dets[b]
            .confidence
            .partial_cmp(&dets[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; dets.len()];

    for &i in &indices {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for &j in &indices {
            if suppressed[j] || i == j {
                continue;
            }
            if iou(&dets[i].bbox, &dets[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix1 = a[0].max(b[0]);
    let iy1 = a[1].max(b[1]);
    let ix2 = a[2].min(b[2]);
    let iy2 = a[3].min(b[3]);

    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - inter;

    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], confidence: f32) -> Detection {
        Detection { bbox, confidence }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = [0.1, 0.1, 0.5, 0.5];
        assert!((iou(&b, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        assert_eq!(iou(&[0.0, 0.0, 0.2, 0.2], &[0.5, 0.5, 0.9, 0.9]), 0.0);
    }

    #[test]
    fn nms_suppresses_overlapping_lower_confidence_boxes() {
        let dets = vec![
            det([0.10, 0.10, 0.30, 0.30], 0.9),
            det([0.11, 0.11, 0.31, 0.31], 0.6), // mostly the same box
            det([0.60, 0.60, 0.80, 0.80], 0.7), // elsewhere
        ];
        let kept = nms(&dets, 0.45);
        assert_eq!(kept.len(), 2);
        assert!(kept.contains(&0));
        assert!(kept.contains(&2));
    }

    #[test]
    fn missing_model_file_fails_at_load() {
        let err = IconDetector::load("does/not/exist.onnx", 0.25, 0.45).unwrap_err();
        assert!(matches!(err, PinpointError::Backend(_)));
    }
}
