use crate::imaging::GrayBuf;

/// Elliptical structuring element, matching OpenCV's `MORPH_ELLIPSE`.
///
/// Detectors cache these per kernel size; building one is cheap but the
/// morphology passes run every frame.
#[derive(Clone, Debug)]
pub struct StructuringElement {
    offsets: Vec<(isize, isize)>,
    size: usize,
}

impl StructuringElement {
    pub fn ellipse(size: usize) -> Self {
        debug_assert!(size >= 1 && size % 2 == 1);
        let r = (size / 2) as f64;
        let mut offsets = Vec::new();
        for dy in -(size as isize / 2)..=(size as isize / 2) {
            for dx in -(size as isize / 2)..=(size as isize / 2) {
                if r == 0.0 {
                    offsets.push((0, 0));
                    continue;
                }
                let nx = dx as f64 / r;
                let ny = dy as f64 / r;
                if nx * nx + ny * ny <= 1.0 + 1e-9 {
                    offsets.push((dx, dy));
                }
            }
        }
        Self { offsets, size }
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

fn erode(mask: &GrayBuf, element: &StructuringElement) -> GrayBuf {
    let mut out = GrayBuf::new(mask.width, mask.height);
    for y in 0..mask.height {
        for x in 0..mask.width {
            let all_set = element.offsets.iter().all(|&(dx, dy)| {
                let sx = x as isize + dx;
                let sy = y as isize + dy;
                if sx < 0 || sy < 0 || sx >= mask.width as isize || sy >= mask.height as isize {
                    // Out-of-frame neighbors count as unset, eroding edges
                    false
                } else {
                    mask.at(sx as usize, sy as usize) != 0
                }
            });
            if all_set {
                out.set(x, y, 255);
            }
        }
    }
    out
}

fn dilate(mask: &GrayBuf, element: &StructuringElement) -> GrayBuf {
    let mut out = GrayBuf::new(mask.width, mask.height);
    for y in 0..mask.height {
        for x in 0..mask.width {
            let any_set = element.offsets.iter().any(|&(dx, dy)| {
                let sx = x as isize + dx;
                let sy = y as isize + dy;
                sx >= 0
                    && sy >= 0
                    && sx < mask.width as isize
                    && sy < mask.height as isize
                    && mask.at(sx as usize, sy as usize) != 0
            });
            if any_set {
                out.set(x, y, 255);
            }
        }
    }
    out
}

/// Morphological opening: erode then dilate. Removes speckle smaller than
/// the structuring element.
pub fn open(mask: &GrayBuf, element: &StructuringElement) -> GrayBuf {
    if element.size <= 1 {
        return mask.clone();
    }
    dilate(&erode(mask, element), element)
}

/// Morphological closing: dilate then erode. Fills pinholes and joins
/// fragments closer than the structuring element.
pub fn close(mask: &GrayBuf, element: &StructuringElement) -> GrayBuf {
    if element.size <= 1 {
        return mask.clone();
    }
    erode(&dilate(mask, element), element)
}
