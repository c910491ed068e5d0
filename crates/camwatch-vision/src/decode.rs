//! Turns raw model output tensors into labelled detections in frame pixels.

use serde::Deserialize;

use crate::{BoundingBox, Detection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLayout {
    /// TFLite SSD post-processed head: boxes, classes, scores, count.
    #[default]
    Ssd,
    /// Single tensor of `[cx, cy, w, h, obj, cls0..]` rows.
    Ultralytics,
}

fn label(labels: &[String], class_id: usize) -> String {
    labels.get(class_id).cloned().unwrap_or_else(|| format!("class{}", class_id))
}

/// Ultralytics export with normalized center boxes.
pub fn decode_ultralytics(
    raw: &[f32],
    num_preds: usize,
    labels: &[String],
    conf_th: f32,
    frame_w: u32,
    frame_h: u32,
) -> Vec<Detection> {
    let num_classes = labels.len();
    let stride = 5 + num_classes;
    let (fw, fh) = (frame_w as f32, frame_h as f32);
    let mut out = Vec::new();

    for row in raw.chunks_exact(stride).take(num_preds) {
        let (cx, cy, w, h, obj) = (row[0], row[1], row[2], row[3], row[4]);

        let mut best_c = 0usize;
        let mut best_p = 0.0f32;
        for (c, &p) in row[5..].iter().enumerate() {
            if p > best_p { best_p = p; best_c = c; }
        }
        let conf = obj * best_p;
        if conf >= conf_th {
            out.push(Detection {
                class: label(labels, best_c),
                confidence: conf.clamp(0.0, 1.0),
                bbox: BoundingBox::new((cx - w / 2.0) * fw, (cy - h / 2.0) * fh, w * fw, h * fh),
            });
        }
    }
    out
}

/// SSD head: `boxes` holds `[ymin, xmin, ymax, xmax]` per detection, normalized.
pub fn decode_ssd(
    boxes: &[f32],
    classes: &[f32],
    scores: &[f32],
    count: usize,
    labels: &[String],
    conf_th: f32,
    frame_w: u32,
    frame_h: u32,
) -> Vec<Detection> {
    let (fw, fh) = (frame_w as f32, frame_h as f32);
    let n = count.min(scores.len()).min(classes.len()).min(boxes.len() / 4);

    (0..n)
        .filter(|&i| scores[i] >= conf_th)
        .map(|i| {
            let b = &boxes[i * 4..i * 4 + 4];
            let (ymin, xmin) = (b[0].clamp(0.0, 1.0), b[1].clamp(0.0, 1.0));
            let (ymax, xmax) = (b[2].clamp(0.0, 1.0), b[3].clamp(0.0, 1.0));
            Detection {
                class: label(labels, classes[i].max(0.0) as usize),
                confidence: scores[i].clamp(0.0, 1.0),
                bbox: BoundingBox::new(xmin * fw, ymin * fh, (xmax - xmin) * fw, (ymax - ymin) * fh),
            }
        })
        .collect()
}

/// Greedy per-class non-maximum suppression.
pub fn nms_filter(mut dets: Vec<Detection>, iou_th: f32, max_det: usize) -> Vec<Detection> {
    dets.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<Detection> = Vec::new();

    'outer: for d in dets {
        if kept.len() >= max_det { break; }
        for k in &kept {
            if k.class == d.class && d.bbox.iou(&k.bbox) >= iou_th {
                continue 'outer;
            }
        }
        kept.push(d);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        vec!["person".into(), "dog".into()]
    }

    #[test]
    fn ssd_boxes_scale_to_frame_pixels() {
        let boxes = [0.1, 0.25, 0.5, 0.75, 0.0, 0.0, 1.0, 1.0];
        let classes = [0.0, 1.0];
        let scores = [0.9, 0.3];
        let dets = decode_ssd(&boxes, &classes, &scores, 2, &labels(), 0.5, 200, 100);

        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class, "person");
        assert_eq!(dets[0].bbox, BoundingBox::new(50.0, 10.0, 100.0, 40.0));
    }

    #[test]
    fn ssd_count_is_bounded_by_tensor_lengths() {
        let dets = decode_ssd(&[0.0, 0.0, 1.0, 1.0], &[1.0], &[0.8], 10, &labels(), 0.1, 10, 10);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class, "dog");
    }

    #[test]
    fn ultralytics_rows_pick_best_class() {
        // cx cy w h obj person dog
        let raw = [0.5, 0.5, 0.2, 0.4, 0.9, 0.1, 0.8, 0.5, 0.5, 0.2, 0.2, 0.1, 0.9, 0.1];
        let dets = decode_ultralytics(&raw, 2, &labels(), 0.5, 100, 100);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class, "dog");
        assert!((dets[0].bbox.x - 40.0).abs() < 1e-4);
        assert!((dets[0].bbox.height - 40.0).abs() < 1e-4);
    }

    #[test]
    fn unknown_class_ids_get_placeholder_labels() {
        let dets = decode_ssd(&[0.0, 0.0, 1.0, 1.0], &[7.0], &[0.8], 1, &labels(), 0.1, 10, 10);
        assert_eq!(dets[0].class, "class7");
    }

    #[test]
    fn nms_keeps_overlapping_boxes_of_different_classes() {
        let b = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let d = |class: &str, confidence| Detection { class: class.into(), confidence, bbox: b };
        let kept = nms_filter(vec![d("person", 0.6), d("person", 0.9), d("dog", 0.7)], 0.5, 10);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class, "dog");
    }
}
