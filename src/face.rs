//! Face detection seam used by face centering
//!
//! No detector ships with the crate. Callers plug one in (a cascade, an ONNX
//! model, a remote service) through [`FaceDetector`].

/// Bounding box of a detected face, in pixels of the image handed to the detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBounds {
    /// Left edge
    pub x: f64,
    /// Top edge
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Detector score, unused by centering
    pub confidence: f64,
}

impl FaceBounds {
    #[must_use]
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
        }
    }

    #[must_use]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    fn is_usable(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }
}

/// Pluggable face detector
pub trait FaceDetector: Send + Sync {
    /// Detect faces in a row-major grayscale buffer of `width` x `height` bytes
    fn detect(&self, gray: &[u8], width: u32, height: u32) -> Vec<FaceBounds>;
}

/// Area-weighted centre of the usable faces, so larger faces pull harder
///
/// Returns `None` when no face has a finite, positive-area box.
#[must_use]
pub fn weighted_center(faces: &[FaceBounds]) -> Option<(f64, f64)> {
    let (total, sum_x, sum_y) = faces
        .iter()
        .filter(|face| face.is_usable())
        .fold((0.0, 0.0, 0.0), |(total, sum_x, sum_y), face| {
            let weight = face.area();
            let (cx, cy) = face.center();
            (total + weight, sum_x + cx * weight, sum_y + cy * weight)
        });
    (total > 0.0).then(|| (sum_x / total, sum_y / total))
}
