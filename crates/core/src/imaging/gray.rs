use crate::imaging::GrayBuf;
use crate::shared::frame::Frame;

/// Convert a BGR frame to grayscale with BT.601 weights.
pub fn bgr_to_gray(frame: &Frame) -> GrayBuf {
    let w = frame.width() as usize;
    let h = frame.height() as usize;
    let src = frame.data();
    let mut out = Vec::with_capacity(w * h);
    for px in src.chunks_exact(3) {
        let (b, g, r) = (px[0] as f32, px[1] as f32, px[2] as f32);
        out.push((0.114 * b + 0.587 * g + 0.299 * r).round().clamp(0.0, 255.0) as u8);
    }
    GrayBuf::from_data(out, w, h)
}

/// Per-pixel absolute difference. Both inputs must have the same shape.
pub fn absdiff(a: &GrayBuf, b: &GrayBuf) -> GrayBuf {
    debug_assert_eq!(a.width, b.width);
    debug_assert_eq!(a.height, b.height);
    let data = a
        .data
        .iter()
        .zip(&b.data)
        .map(|(&x, &y)| x.abs_diff(y))
        .collect();
    GrayBuf::from_data(data, a.width, a.height)
}

/// Binary threshold: values strictly above `threshold` become 255, the
/// rest 0.
pub fn threshold_binary(src: &GrayBuf, threshold: u8) -> GrayBuf {
    let data = src
        .data
        .iter()
        .map(|&v| if v > threshold { 255 } else { 0 })
        .collect();
    GrayBuf::from_data(data, src.width, src.height)
}
