/// IoU above which two boxes are treated as the same observation, both for
/// fusion matching and for temporal bucket association.
pub const DEFAULT_IOU_THRESHOLD: f64 = 0.3;

/// Axis-aligned bounding box in pixel space, `x,y` top-left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn iou(&self, other: &BBox) -> f64 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = (self.x + self.width).min(other.x + other.width);
        let iy2 = (self.y + self.height).min(other.y + other.height);

        let inter = (ix2 - ix1).max(0) as f64 * (iy2 - iy1).max(0) as f64;
        if inter == 0.0 {
            return 0.0;
        }

        let area_a = self.width as f64 * self.height as f64;
        let area_b = other.width as f64 * other.height as f64;
        inter / (area_a + area_b - inter)
    }

    /// Smallest box covering both operands.
    pub fn union(&self, other: &BBox) -> BBox {
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = (self.x + self.width).max(other.x + other.width);
        let y2 = (self.y + self.height).max(other.y + other.height);
        BBox::new(x1, y1, x2 - x1, y2 - y1)
    }
}

/// Which detector stage produced a detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionKind {
    Motion,
    Color,
    Fused,
}

impl DetectionKind {
    pub fn label(&self) -> &'static str {
        match self {
            DetectionKind::Motion => "MOTION",
            DetectionKind::Color => "COLOR",
            DetectionKind::Fused => "FUSED",
        }
    }
}

/// Per-detection annotations the stages attach as they run.
///
/// A closed struct rather than a string map: every consumer is in this
/// crate, so the set of keys is known.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionMetadata {
    /// Mean BGR color of the detected region (color detections).
    pub mean_color: Option<[u8; 3]>,
    /// `1 - bin_count/total_pixels` for the quantized bin this region fell in.
    pub rarity: Option<f64>,
    /// Population of the histogram bin behind a color detection.
    pub bin_count: Option<u32>,
    /// Set when hue expansion grew this detection beyond its initial mask.
    pub hue_expanded: bool,
    /// Number of detections merged into this one (0 when never merged).
    pub merged_from: usize,
    /// Set by the clustering post-filter, with the cluster population.
    pub clustered: bool,
    pub cluster_size: usize,
    /// Resolutions recorded when rescaling is active, `(width, height)`.
    pub processing_resolution: Option<(u32, u32)>,
    pub original_resolution: Option<(u32, u32)>,
}

/// One observed object instance in one frame.
///
/// Created fresh per frame by a detector stage, then merged/dropped by
/// fusion and the post-filters. Nothing outlives the frame except the
/// lightweight records the temporal filter keeps per bucket.
#[derive(Clone, Debug)]
pub struct Detection {
    pub bbox: BBox,
    /// Contour centroid when the detector had one, bbox center otherwise.
    pub centroid: (i32, i32),
    /// Pixel count of the detected region, not bbox area.
    pub area: f64,
    /// Normalized to `[0, 1]`.
    pub confidence: f64,
    pub kind: DetectionKind,
    pub timestamp: f64,
    /// Outline points of the detected region, for contour rendering.
    pub contour: Option<Vec<(i32, i32)>>,
    pub metadata: DetectionMetadata,
}

impl Detection {
    pub fn new(bbox: BBox, area: f64, confidence: f64, kind: DetectionKind, timestamp: f64) -> Self {
        Self {
            bbox,
            centroid: bbox.center(),
            area,
            confidence,
            kind,
            timestamp,
            contour: None,
            metadata: DetectionMetadata::default(),
        }
    }

    pub fn centroid_distance(&self, other: &Detection) -> f64 {
        let dx = (self.centroid.0 - other.centroid.0) as f64;
        let dy = (self.centroid.1 - other.centroid.1) as f64;
        (dx * dx + dy * dy).sqrt()
    }

    /// Rescale geometry from processing resolution back to original
    /// resolution. Both resolutions are recorded in metadata so downstream
    /// consumers can still choose either coordinate space.
    pub fn scaled_to_original(
        mut self,
        scale_factor: f64,
        processing: (u32, u32),
        original: (u32, u32),
    ) -> Self {
        if scale_factor < 1.0 && scale_factor > 0.0 {
            let inv = 1.0 / scale_factor;
            self.bbox = BBox::new(
                (self.bbox.x as f64 * inv) as i32,
                (self.bbox.y as f64 * inv) as i32,
                (self.bbox.width as f64 * inv) as i32,
                (self.bbox.height as f64 * inv) as i32,
            );
            self.centroid = (
                (self.centroid.0 as f64 * inv) as i32,
                (self.centroid.1 as f64 * inv) as i32,
            );
            self.area *= inv * inv;
            if let Some(contour) = self.contour.as_mut() {
                for p in contour.iter_mut() {
                    *p = ((p.0 as f64 * inv) as i32, (p.1 as f64 * inv) as i32);
                }
            }
        }
        self.metadata.processing_resolution = Some(processing);
        self.metadata.original_resolution = Some(original);
        self
    }
}

/// Merge overlapping or clustered detections into one.
///
/// Bbox is the union, area the sum of member areas, confidence the maximum.
/// Contours are concatenated so downstream rendering still has the exact
/// outline of every member.
pub fn merge_detections(detections: &[Detection]) -> Detection {
    debug_assert!(!detections.is_empty());
    if detections.len() == 1 {
        return detections[0].clone();
    }

    let mut bbox = detections[0].bbox;
    let mut area = 0.0;
    let mut confidence: f64 = 0.0;
    let mut contour: Vec<(i32, i32)> = Vec::new();
    for d in detections {
        bbox = bbox.union(&d.bbox);
        area += d.area;
        confidence = confidence.max(d.confidence);
        if let Some(c) = &d.contour {
            contour.extend_from_slice(c);
        }
    }

    let has_motion = detections.iter().any(|d| d.kind == DetectionKind::Motion);
    let has_color = detections.iter().any(|d| d.kind == DetectionKind::Color);
    let kind = if has_motion && has_color {
        DetectionKind::Fused
    } else {
        detections[0].kind
    };

    let mut merged = Detection::new(bbox, area, confidence, kind, detections[0].timestamp);
    merged.contour = if contour.is_empty() {
        None
    } else {
        Some(contour)
    };
    merged.metadata = detections[0].metadata.clone();
    merged.metadata.merged_from = detections.len();
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn detection(x: i32, y: i32, w: i32, h: i32, kind: DetectionKind) -> Detection {
        Detection::new(BBox::new(x, y, w, h), (w * h) as f64, 0.5, kind, 0.0)
    }

    // ── IoU ──────────────────────────────────────────────────────────

    #[test]
    fn test_iou_identical_boxes() {
        let a = BBox::new(10, 10, 100, 100);
        assert_relative_eq!(a.iou(&a), 1.0);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = BBox::new(0, 0, 50, 50);
        let b = BBox::new(100, 100, 50, 50);
        assert_relative_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_partial_overlap() {
        // a: [0,0]-[100,100], b: [50,0]-[150,100]
        // intersection: 50*100 = 5000, union: 15000
        let a = BBox::new(0, 0, 100, 100);
        let b = BBox::new(50, 0, 100, 100);
        assert_relative_eq!(a.iou(&b), 5000.0 / 15000.0);
    }

    #[rstest]
    #[case::zero_width(BBox::new(0, 0, 0, 100), BBox::new(0, 0, 50, 50), 0.0)]
    #[case::touching_edges(BBox::new(0, 0, 50, 50), BBox::new(50, 0, 50, 50), 0.0)]
    fn test_iou_degenerate(#[case] a: BBox, #[case] b: BBox, #[case] expected: f64) {
        assert_relative_eq!(a.iou(&b), expected);
    }

    #[test]
    fn test_union_covers_both() {
        let a = BBox::new(0, 0, 10, 10);
        let b = BBox::new(20, 30, 10, 10);
        let u = a.union(&b);
        assert_eq!(u, BBox::new(0, 0, 30, 40));
    }

    // ── Scaling ──────────────────────────────────────────────────────

    #[test]
    fn test_scaled_to_original_doubles_geometry() {
        let d = detection(10, 20, 30, 40, DetectionKind::Motion);
        let scaled = d.scaled_to_original(0.5, (640, 360), (1280, 720));
        assert_eq!(scaled.bbox, BBox::new(20, 40, 60, 80));
        assert_relative_eq!(scaled.area, (30 * 40) as f64 * 4.0);
        assert_eq!(scaled.metadata.processing_resolution, Some((640, 360)));
        assert_eq!(scaled.metadata.original_resolution, Some((1280, 720)));
    }

    #[test]
    fn test_scaled_to_original_noop_at_native() {
        let d = detection(10, 20, 30, 40, DetectionKind::Motion);
        let scaled = d.clone().scaled_to_original(1.0, (1280, 720), (1280, 720));
        assert_eq!(scaled.bbox, d.bbox);
        assert_relative_eq!(scaled.area, d.area);
    }

    // ── Merging ──────────────────────────────────────────────────────

    #[test]
    fn test_merge_single_is_identity() {
        let d = detection(0, 0, 10, 10, DetectionKind::Color);
        let merged = merge_detections(&[d.clone()]);
        assert_eq!(merged.bbox, d.bbox);
        assert_eq!(merged.metadata.merged_from, 0);
    }

    #[test]
    fn test_merge_unions_bbox_and_sums_area() {
        let a = detection(0, 0, 10, 10, DetectionKind::Motion);
        let b = detection(20, 0, 10, 10, DetectionKind::Motion);
        let merged = merge_detections(&[a, b]);
        assert_eq!(merged.bbox, BBox::new(0, 0, 30, 10));
        assert_relative_eq!(merged.area, 200.0);
        assert_eq!(merged.kind, DetectionKind::Motion);
        assert_eq!(merged.metadata.merged_from, 2);
    }

    #[test]
    fn test_merge_mixed_kinds_becomes_fused() {
        let a = detection(0, 0, 10, 10, DetectionKind::Motion);
        let b = detection(5, 0, 10, 10, DetectionKind::Color);
        let merged = merge_detections(&[a, b]);
        assert_eq!(merged.kind, DetectionKind::Fused);
    }

    #[test]
    fn test_merge_takes_max_confidence() {
        let mut a = detection(0, 0, 10, 10, DetectionKind::Motion);
        let mut b = detection(5, 0, 10, 10, DetectionKind::Motion);
        a.confidence = 0.3;
        b.confidence = 0.9;
        let merged = merge_detections(&[a, b]);
        assert_relative_eq!(merged.confidence, 0.9);
    }
}
