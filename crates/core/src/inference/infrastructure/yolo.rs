//! YOLO pre- and post-processing shared by model-backed engines.
//!
//! Pure `ndarray` code: letterboxing into an NCHW tensor, decoding the
//! `[1, 4 + classes, anchors]` prediction tensor and class-aware NMS.

use ndarray::{Array4, ArrayView3, ArrayViewD, Axis, Ix3};

use crate::shared::detection::DetectedObject;

pub const NMS_IOU_THRESH: f64 = 0.45;

/// YOLO padding convention.
const LETTERBOX_FILL: f32 = 114.0 / 255.0;

pub const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator",
    "book", "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Geometry of a letterbox resize, needed to map boxes back to the frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f64,
    pub pad_x: u32,
    pub pad_y: u32,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Letterbox {
    /// Maps a `[x1, y1, x2, y2]` box in model input pixels to normalized
    /// frame coordinates.
    fn normalize(&self, bbox: [f64; 4]) -> [f64; 4] {
        let fw = self.frame_width as f64;
        let fh = self.frame_height as f64;
        let x = |v: f64| (v - self.pad_x as f64) / self.scale / fw;
        let y = |v: f64| (v - self.pad_y as f64) / self.scale / fh;
        [x(bbox[0]), y(bbox[1]), x(bbox[2]), y(bbox[3])]
    }
}

/// Letterbox-resizes packed RGB pixels to `target_size` × `target_size`.
///
/// Returns `None` if `rgb` does not hold `width * height * 3` bytes.
pub fn letterbox(
    rgb: &[u8],
    width: u32,
    height: u32,
    target_size: u32,
) -> Option<(Array4<f32>, Letterbox)> {
    if width == 0 || height == 0 {
        return None;
    }
    let src = ArrayView3::from_shape((height as usize, width as usize, 3), rgb).ok()?;

    let fw = width as f64;
    let fh = height as f64;
    let target = target_size as f64;
    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    let size = target_size as usize;
    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), LETTERBOX_FILL);
    let (src_h, src_w) = (height as usize, width as usize);
    for y in 0..new_h as usize {
        let sy = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let sx = ((x as f64 / scale) as usize).min(src_w - 1);
            for c in 0..3 {
                tensor[[0, c, pad_y as usize + y, pad_x as usize + x]] =
                    src[[sy, sx, c]] as f32 / 255.0;
            }
        }
    }

    Some((
        tensor,
        Letterbox {
            scale,
            pad_x,
            pad_y,
            frame_width: width,
            frame_height: height,
        },
    ))
}

#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    /// `[x1, y1, x2, y2]` in model input pixels.
    pub bbox: [f64; 4],
    pub score: f64,
    pub class_id: usize,
}

/// Decodes raw predictions into normalized detections.
///
/// Accepts `[1, features, anchors]` (YOLOv8 export layout) as well as
/// `[1, anchors, features]`, where each anchor is `cx, cy, w, h` followed by
/// one score per class.
pub fn decode(
    output: ArrayViewD<'_, f32>,
    letterbox: &Letterbox,
    confidence: f64,
    labels: &[&str],
) -> Result<Vec<DetectedObject>, String> {
    let shape = output.shape().to_vec();
    let output = output
        .into_dimensionality::<Ix3>()
        .map_err(|_| format!("unexpected YOLO output shape: {shape:?}"))?;
    let batch = output.index_axis_move(Axis(0), 0);
    let predictions = if batch.nrows() < batch.ncols() {
        batch.reversed_axes()
    } else {
        batch
    };
    if predictions.ncols() < 5 {
        return Err(format!("YOLO output has no class scores: {shape:?}"));
    }

    let mut candidates = Vec::new();
    for row in predictions.rows() {
        let Some((class_id, score)) = row
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            continue;
        };
        let score = score as f64;
        if score < confidence {
            continue;
        }
        let (cx, cy, w, h) = (row[0] as f64, row[1] as f64, row[2] as f64, row[3] as f64);
        candidates.push(Candidate {
            bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
            score,
            class_id,
        });
    }

    Ok(nms(candidates, NMS_IOU_THRESH)
        .into_iter()
        .map(|c| {
            let label = labels
                .get(c.class_id)
                .map(|l| l.to_string())
                .unwrap_or_else(|| format!("class_{}", c.class_id));
            DetectedObject::new(label, c.score, letterbox.normalize(c.bbox))
        })
        .collect())
}

/// Greedy per-class NMS: highest score first, suppressing same-class boxes
/// that overlap a kept one by more than `iou_thresh`.
pub fn nms(mut candidates: Vec<Candidate>, iou_thresh: f64) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let suppressed = keep.iter().any(|k| {
            k.class_id == candidate.class_id && bbox_iou(&k.bbox, &candidate.bbox) > iou_thresh
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

/// IoU between two boxes represented as `[x1, y1, x2, y2]`.
pub fn bbox_iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter)
}
