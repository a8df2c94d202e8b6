//! Binary morphology on class masks
//!
//! Square structuring elements only. Erosion and dilation are separable for
//! squares, so each operation runs as a row pass followed by a column pass.
//! Even sizes follow the SciPy origin convention (centre at `size / 2`), with
//! dilation using the reflected element so that opening stays anti-extensive.

use crate::types::{ClassMask, ConfigurationError, SarResult};
use ndarray::{ArrayView1, ArrayViewMut1, Axis};

/// Largest structuring element accepted
pub const MAX_ELEMENT_SIZE: usize = 15;

/// Square structuring element of side `size`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructuringElement {
    size: usize,
}

impl StructuringElement {
    pub fn square(size: usize) -> SarResult<Self> {
        if size == 0 || size > MAX_ELEMENT_SIZE {
            return Err(ConfigurationError::InvalidKernelSize(size).into());
        }
        Ok(Self { size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Offsets covered by the element along one axis, relative to its origin
    fn offsets(&self) -> (isize, isize) {
        let centre = (self.size / 2) as isize;
        (-centre, self.size as isize - 1 - centre)
    }

    fn is_identity(&self) -> bool {
        self.size == 1
    }
}

/// Erosion; pixels outside the raster count as unset
pub fn erode(mask: &ClassMask, element: &StructuringElement) -> ClassMask {
    erode_with_border(mask, element, false)
}

/// Dilation with the reflected element; pixels outside the raster count as unset
pub fn dilate(mask: &ClassMask, element: &StructuringElement) -> ClassMask {
    if element.is_identity() {
        return mask.clone();
    }
    let (lo, hi) = element.offsets();
    let rows = apply_along(mask, Axis(1), |src, dst| dilate_line(src, dst, lo, hi));
    apply_along(&rows, Axis(0), |src, dst| dilate_line(src, dst, lo, hi))
}

/// Opening (erosion then dilation): removes features smaller than the element
pub fn opening(mask: &ClassMask, element: &StructuringElement) -> ClassMask {
    dilate(&erode(mask, element), element)
}

/// Closing (dilation then erosion): fills gaps smaller than the element.
/// The erosion step treats the outside as set so regions touching the
/// raster edge are not eaten away.
pub fn closing(mask: &ClassMask, element: &StructuringElement) -> ClassMask {
    erode_with_border(&dilate(mask, element), element, true)
}

fn erode_with_border(mask: &ClassMask, element: &StructuringElement, border: bool) -> ClassMask {
    if element.is_identity() {
        return mask.clone();
    }
    let (lo, hi) = element.offsets();
    let rows = apply_along(mask, Axis(1), |src, dst| erode_line(src, dst, lo, hi, border));
    apply_along(&rows, Axis(0), |src, dst| erode_line(src, dst, lo, hi, border))
}

/// Run a 1-D operation over every lane of `mask` along `axis`
fn apply_along<F>(mask: &ClassMask, axis: Axis, mut op: F) -> ClassMask
where
    F: FnMut(ArrayView1<'_, bool>, ArrayViewMut1<'_, bool>),
{
    let mut out = ClassMask::from_elem(mask.dim(), false);
    for (src, dst) in mask.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        op(src, dst);
    }
    out
}

fn erode_line(src: ArrayView1<'_, bool>, mut dst: ArrayViewMut1<'_, bool>, lo: isize, hi: isize, border: bool) {
    let n = src.len() as isize;
    for i in 0..n {
        let mut all = true;
        for o in lo..=hi {
            let j = i + o;
            let value = if j < 0 || j >= n { border } else { src[j as usize] };
            if !value {
                all = false;
                break;
            }
        }
        dst[i as usize] = all;
    }
}

fn dilate_line(src: ArrayView1<'_, bool>, mut dst: ArrayViewMut1<'_, bool>, lo: isize, hi: isize) {
    let n = src.len() as isize;
    for i in 0..n {
        // Reflected element: out[i] = any(src[i - o])
        let mut any = false;
        for o in lo..=hi {
            let j = i - o;
            if j >= 0 && j < n && src[j as usize] {
                any = true;
                break;
            }
        }
        dst[i as usize] = any;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array2};

    fn block(rows: usize, cols: usize, r0: usize, r1: usize, c0: usize, c1: usize) -> ClassMask {
        let mut mask = Array2::from_elem((rows, cols), false);
        mask.slice_mut(s![r0..r1, c0..c1]).fill(true);
        mask
    }

    #[test]
    fn test_element_size_validation() {
        assert!(StructuringElement::square(0).is_err());
        assert!(StructuringElement::square(16).is_err());
        assert_eq!(StructuringElement::square(7).unwrap().size(), 7);
    }

    #[test]
    fn test_opening_removes_isolated_pixel() {
        let mut mask = block(15, 15, 5, 10, 5, 10);
        mask[[1, 1]] = true;
        let element = StructuringElement::square(3).unwrap();
        let opened = opening(&mask, &element);
        assert!(!opened[[1, 1]]);
        // The 5x5 block survives unchanged
        assert_eq!(opened, block(15, 15, 5, 10, 5, 10));
    }

    #[test]
    fn test_closing_fills_small_hole() {
        let mut mask = block(12, 12, 2, 9, 2, 9);
        mask[[5, 5]] = false;
        let element = StructuringElement::square(3).unwrap();
        let closed = closing(&mask, &element);
        assert!(closed[[5, 5]]);
        assert_eq!(closed.iter().filter(|&&v| v).count(), 49);
    }

    #[test]
    fn test_closing_keeps_full_mask() {
        let mask = Array2::from_elem((6, 6), true);
        let element = StructuringElement::square(3).unwrap();
        assert_eq!(closing(&mask, &element), mask);
    }

    #[test]
    fn test_even_element_opening_is_anti_extensive() {
        let mask = block(8, 8, 2, 4, 3, 6);
        let element = StructuringElement::square(2).unwrap();
        let opened = opening(&mask, &element);
        assert_eq!(opened, mask);
        for (o, m) in opened.iter().zip(mask.iter()) {
            assert!(!*o || *m);
        }
    }

    #[test]
    fn test_identity_element() {
        let mask = block(5, 5, 1, 2, 1, 2);
        let element = StructuringElement::square(1).unwrap();
        assert_eq!(opening(&mask, &element), mask);
        assert_eq!(closing(&mask, &element), mask);
    }
}
