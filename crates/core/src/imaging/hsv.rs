use crate::imaging::GrayBuf;
use crate::shared::frame::Frame;

/// BGR → HSV with OpenCV's 8-bit conventions: H in 0-179 (half-scale
/// degrees), S and V in 0-255.
pub fn bgr_to_hsv(b: u8, g: u8, r: u8) -> (u8, u8, u8) {
    let bf = b as f64 / 255.0;
    let gf = g as f64 / 255.0;
    let rf = r as f64 / 255.0;

    let max = bf.max(gf).max(rf);
    let min = bf.min(gf).min(rf);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { delta / max } else { 0.0 };

    let h_deg = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * ((gf - bf) / delta)
    } else if max == gf {
        60.0 * ((bf - rf) / delta) + 120.0
    } else {
        60.0 * ((rf - gf) / delta) + 240.0
    };
    let h_deg = if h_deg < 0.0 { h_deg + 360.0 } else { h_deg };

    (
        (h_deg / 2.0).round().min(179.0) as u8,
        (s * 255.0).round() as u8,
        (v * 255.0).round() as u8,
    )
}

/// HSV (half-scale hue) → BGR.
pub fn hsv_to_bgr(h: u8, s: u8, v: u8) -> (u8, u8, u8) {
    let h_deg = h as f64 * 2.0;
    let s = s as f64 / 255.0;
    let v = v as f64 / 255.0;

    let c = v * s;
    let x = c * (1.0 - ((h_deg / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (rf, gf, bf) = match (h_deg / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (
        ((bf + m) * 255.0).round() as u8,
        ((gf + m) * 255.0).round() as u8,
        ((rf + m) * 255.0).round() as u8,
    )
}

/// Extract the hue plane (half-scale, 0-179) of a BGR frame.
pub fn hue_plane(frame: &Frame) -> GrayBuf {
    let w = frame.width() as usize;
    let h = frame.height() as usize;
    let mut out = Vec::with_capacity(w * h);
    for px in frame.data().chunks_exact(3) {
        out.push(bgr_to_hsv(px[0], px[1], px[2]).0);
    }
    GrayBuf::from_data(out, w, h)
}

/// Mean hue of a rectangular region, clamped to the frame.
pub fn mean_hue_in_rect(
    hue: &GrayBuf,
    x: i32,
    y: i32,
    w: i32,
    h: i32,
) -> Option<f64> {
    let x0 = x.max(0) as usize;
    let y0 = y.max(0) as usize;
    if x0 >= hue.width || y0 >= hue.height || w <= 0 || h <= 0 {
        return None;
    }
    let x1 = ((x + w) as usize).min(hue.width);
    let y1 = ((y + h) as usize).min(hue.height);

    let mut sum = 0u64;
    let mut count = 0u64;
    for yy in y0..y1 {
        for xx in x0..x1 {
            sum += hue.at(xx, yy) as u64;
            count += 1;
        }
    }
    if count == 0 {
        None
    } else {
        Some(sum as f64 / count as f64)
    }
}

/// Test a half-scale hue against a range, honoring wraparound ranges
/// where `min > max`.
pub fn hue_in_range(hue: f64, min: f64, max: f64) -> bool {
    if min > max {
        hue >= min || hue <= max
    } else {
        (min..=max).contains(&hue)
    }
}
