use serde::{Deserialize, Serialize};

/// One object as reported by an inference engine or the remote endpoint,
/// before it is tied to a frame.
///
/// Coordinates are fractions of the frame size. Values are not trusted:
/// [`DetectionBatch::from_objects`] clamps and filters them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub label: String,
    pub score: f64,
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl DetectedObject {
    pub fn new(label: impl Into<String>, score: f64, bbox: [f64; 4]) -> Self {
        Self {
            label: label.into(),
            score,
            xmin: bbox[0],
            ymin: bbox[1],
            xmax: bbox[2],
            ymax: bbox[3],
        }
    }
}

/// Timestamps (ms since the Unix epoch) for one frame's trip through a
/// backend. Always satisfies `capture_ts <= recv_ts <= inference_ts`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FrameTiming {
    capture_ts: f64,
    recv_ts: f64,
    inference_ts: f64,
}

impl FrameTiming {
    /// Builds a timing triple, pulling out-of-order values into line.
    ///
    /// `inference_ts` is raised to at least `capture_ts`; `recv_ts` is then
    /// clamped into `[capture_ts, inference_ts]`. Remote clocks are not
    /// trusted to agree with ours.
    pub fn bounded(capture_ts: f64, recv_ts: f64, inference_ts: f64) -> Self {
        let inference_ts = inference_ts.max(capture_ts);
        let recv_ts = recv_ts.max(capture_ts).min(inference_ts);
        Self {
            capture_ts,
            recv_ts,
            inference_ts,
        }
    }

    pub fn capture_ts(&self) -> f64 {
        self.capture_ts
    }

    pub fn recv_ts(&self) -> f64 {
        self.recv_ts
    }

    pub fn inference_ts(&self) -> f64 {
        self.inference_ts
    }
}

/// Where a batch came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Produced by a real model, local or remote.
    Inferred,
    /// Synthetic stand-in delivered because the remote endpoint failed.
    Fallback,
    /// Placeholder output from the mock-detection debug strategy.
    Mock,
}

/// One recognized object instance in a frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    label: String,
    score: f64,
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
    frame_id: u64,
    #[serde(flatten)]
    timing: FrameTiming,
}

impl Detection {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    /// `[xmin, ymin, xmax, ymax]`, normalized.
    pub fn bbox(&self) -> [f64; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn capture_ts(&self) -> f64 {
        self.timing.capture_ts
    }

    pub fn recv_ts(&self) -> f64 {
        self.timing.recv_ts
    }

    pub fn inference_ts(&self) -> f64 {
        self.timing.inference_ts
    }

    /// Score in `[0,1]`, box strictly ordered inside the unit square and
    /// timestamps non-decreasing.
    pub fn is_well_formed(&self) -> bool {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        in_unit(self.score)
            && [self.xmin, self.ymin, self.xmax, self.ymax]
                .into_iter()
                .all(in_unit)
            && self.xmin < self.xmax
            && self.ymin < self.ymax
            && self.timing.capture_ts <= self.timing.recv_ts
            && self.timing.recv_ts <= self.timing.inference_ts
    }

    fn from_object(object: DetectedObject, frame_id: u64, timing: FrameTiming) -> Option<Self> {
        let values = [
            object.score,
            object.xmin,
            object.ymin,
            object.xmax,
            object.ymax,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let clamp = |v: f64| v.clamp(0.0, 1.0);
        let (xmin, xmax) = (clamp(object.xmin), clamp(object.xmax));
        let (ymin, ymax) = (clamp(object.ymin), clamp(object.ymax));
        if xmin >= xmax || ymin >= ymax {
            return None;
        }

        Some(Self {
            label: object.label,
            score: clamp(object.score),
            xmin,
            ymin,
            xmax,
            ymax,
            frame_id,
            timing,
        })
    }
}

/// The detections for one frame, in the order the producer reported them.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionBatch {
    frame_id: u64,
    timing: FrameTiming,
    processing_time_ms: f64,
    provenance: Provenance,
    detections: Vec<Detection>,
}

impl DetectionBatch {
    /// Stamps raw objects with the frame's identity and timing.
    ///
    /// Scores and coordinates are clamped to `[0,1]`; objects with
    /// non-finite values or an empty box after clamping are dropped.
    pub fn from_objects(
        frame_id: u64,
        timing: FrameTiming,
        processing_time_ms: f64,
        provenance: Provenance,
        objects: Vec<DetectedObject>,
    ) -> Self {
        let reported = objects.len();
        let detections: Vec<Detection> = objects
            .into_iter()
            .filter_map(|o| Detection::from_object(o, frame_id, timing))
            .collect();
        if detections.len() < reported {
            log::debug!(
                "Frame {frame_id}: discarded {} malformed detection(s)",
                reported - detections.len()
            );
        }

        Self {
            frame_id,
            timing,
            processing_time_ms: processing_time_ms.max(0.0),
            provenance,
            detections,
        }
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn timing(&self) -> FrameTiming {
        self.timing
    }

    pub fn processing_time_ms(&self) -> f64 {
        self.processing_time_ms
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn timing() -> FrameTiming {
        FrameTiming::bounded(100.0, 110.0, 130.0)
    }

    fn batch(objects: Vec<DetectedObject>) -> DetectionBatch {
        DetectionBatch::from_objects(7, timing(), 20.0, Provenance::Inferred, objects)
    }

    // ── Timing ───────────────────────────────────────────────────────

    #[test]
    fn test_timing_keeps_ordered_values() {
        let t = FrameTiming::bounded(1.0, 2.0, 3.0);
        assert_relative_eq!(t.capture_ts(), 1.0);
        assert_relative_eq!(t.recv_ts(), 2.0);
        assert_relative_eq!(t.inference_ts(), 3.0);
    }

    #[rstest]
    #[case::recv_before_capture(10.0, 5.0, 20.0)]
    #[case::recv_after_inference(10.0, 30.0, 20.0)]
    #[case::inference_before_capture(10.0, 12.0, 8.0)]
    #[case::all_reversed(30.0, 20.0, 10.0)]
    fn test_timing_is_always_monotonic(
        #[case] capture: f64,
        #[case] recv: f64,
        #[case] inference: f64,
    ) {
        let t = FrameTiming::bounded(capture, recv, inference);
        assert_relative_eq!(t.capture_ts(), capture);
        assert!(t.capture_ts() <= t.recv_ts());
        assert!(t.recv_ts() <= t.inference_ts());
    }

    // ── Batch construction ───────────────────────────────────────────

    #[test]
    fn test_batch_stamps_frame_and_timing() {
        let b = batch(vec![DetectedObject::new("person", 0.9, [0.1, 0.1, 0.4, 0.7])]);
        assert_eq!(b.len(), 1);
        let d = &b.detections()[0];
        assert_eq!(d.label(), "person");
        assert_eq!(d.frame_id(), 7);
        assert_relative_eq!(d.capture_ts(), 100.0);
        assert_relative_eq!(d.recv_ts(), 110.0);
        assert_relative_eq!(d.inference_ts(), 130.0);
        assert!(d.is_well_formed());
    }

    #[test]
    fn test_batch_may_be_empty() {
        let b = batch(vec![]);
        assert!(b.is_empty());
        assert_eq!(b.frame_id(), 7);
    }

    #[test]
    fn test_batch_clamps_out_of_range_values() {
        let b = batch(vec![DetectedObject::new("cup", 1.4, [-0.2, 0.5, 1.3, 0.9])]);
        let d = &b.detections()[0];
        assert_relative_eq!(d.score(), 1.0);
        assert_eq!(d.bbox(), [0.0, 0.5, 1.0, 0.9]);
        assert!(d.is_well_formed());
    }

    #[rstest]
    #[case::inverted_x(DetectedObject::new("a", 0.5, [0.6, 0.1, 0.2, 0.5]))]
    #[case::zero_height(DetectedObject::new("a", 0.5, [0.1, 0.3, 0.2, 0.3]))]
    #[case::collapsed_by_clamp(DetectedObject::new("a", 0.5, [1.2, 0.1, 1.5, 0.5]))]
    #[case::nan_score(DetectedObject::new("a", f64::NAN, [0.1, 0.1, 0.2, 0.2]))]
    #[case::infinite_coord(DetectedObject::new("a", 0.5, [0.1, 0.1, f64::INFINITY, 0.2]))]
    fn test_batch_drops_malformed_objects(#[case] object: DetectedObject) {
        let b = batch(vec![object, DetectedObject::new("ok", 0.5, [0.1, 0.1, 0.2, 0.2])]);
        assert_eq!(b.len(), 1);
        assert_eq!(b.detections()[0].label(), "ok");
    }

    #[test]
    fn test_batch_preserves_reported_order() {
        let b = batch(vec![
            DetectedObject::new("b", 0.2, [0.0, 0.0, 0.1, 0.1]),
            DetectedObject::new("a", 0.9, [0.0, 0.0, 0.1, 0.1]),
        ]);
        let labels: Vec<&str> = b.detections().iter().map(|d| d.label()).collect();
        assert_eq!(labels, vec!["b", "a"]);
    }

    #[test]
    fn test_negative_processing_time_is_floored() {
        let b = DetectionBatch::from_objects(0, timing(), -3.0, Provenance::Mock, vec![]);
        assert_relative_eq!(b.processing_time_ms(), 0.0);
        assert_eq!(b.provenance(), Provenance::Mock);
    }

    #[test]
    fn test_detected_object_wire_format() {
        let json = r#"{"label":"dog","score":0.8,"xmin":0.1,"ymin":0.2,"xmax":0.3,"ymax":0.4}"#;
        let object: DetectedObject = serde_json::from_str(json).unwrap();
        assert_eq!(object, DetectedObject::new("dog", 0.8, [0.1, 0.2, 0.3, 0.4]));
    }

    #[test]
    fn test_detection_serializes_flat_timestamps() {
        let b = batch(vec![DetectedObject::new("person", 0.9, [0.1, 0.1, 0.4, 0.7])]);
        let value = serde_json::to_value(&b.detections()[0]).unwrap();
        assert_eq!(value["label"], "person");
        assert_eq!(value["frame_id"], 7);
        assert_eq!(value["recv_ts"], 110.0);
    }
}
