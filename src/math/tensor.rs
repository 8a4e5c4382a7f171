use rand::Rng;
use serde::{Serialize, Deserialize};
use std::f32::consts::PI;
use std::ops::Add;

/// A dense `channels × height × width` activation volume.
///
/// Each channel is stored as a contiguous row-major plane, so
/// `data[(c * height + y) * width + x]` addresses one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn zeros(channels: usize, height: usize, width: usize) -> Tensor {
        Tensor {
            channels,
            height,
            width,
            data: vec![0.0; channels * height * width],
        }
    }

    pub fn from_data(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Tensor {
        assert_eq!(
            data.len(),
            channels * height * width,
            "data length does not match {channels}x{height}x{width}"
        );
        Tensor { channels, height, width, data }
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }

    pub fn plane_len(&self) -> usize {
        self.height * self.width
    }

    pub fn plane(&self, channel: usize) -> &[f32] {
        let n = self.plane_len();
        &self.data[channel * n..(channel + 1) * n]
    }

    pub fn plane_mut(&mut self, channel: usize) -> &mut [f32] {
        let n = self.plane_len();
        &mut self.data[channel * n..(channel + 1) * n]
    }

    pub fn map<F>(&self, functor: F) -> Tensor
    where
        F: Fn(f32) -> f32,
    {
        Tensor {
            channels: self.channels,
            height: self.height,
            width: self.width,
            data: self.data.iter().map(|&x| functor(x)).collect(),
        }
    }

    /// Stacks `a` and `b` along the channel axis (`a` first).
    pub fn concat_channels(a: &Tensor, b: &Tensor) -> Tensor {
        assert_eq!(
            (a.height, a.width),
            (b.height, b.width),
            "cannot concatenate tensors of different spatial size"
        );
        let mut data = Vec::with_capacity(a.data.len() + b.data.len());
        data.extend_from_slice(&a.data);
        data.extend_from_slice(&b.data);
        Tensor::from_data(a.channels + b.channels, a.height, a.width, data)
    }

    /// Inverse of [`Tensor::concat_channels`]: the first `channels` planes go
    /// left, the rest go right.
    pub fn split_channels(mut self, channels: usize) -> (Tensor, Tensor) {
        assert!(channels <= self.channels, "split point beyond channel count");
        let right = self.data.split_off(channels * self.plane_len());
        let right = Tensor::from_data(self.channels - channels, self.height, self.width, right);
        let left = Tensor::from_data(channels, self.height, self.width, self.data);
        (left, right)
    }
}

impl Default for Tensor {
    fn default() -> Self {
        Tensor { channels: 0, height: 0, width: 0, data: vec![] }
    }
}

impl Add for Tensor {
    type Output = Tensor;

    fn add(mut self, rhs: Self) -> Self::Output {
        if self.shape() != rhs.shape() {
            panic!("Tensors are of incorrect sizes")
        }
        for (a, b) in self.data.iter_mut().zip(rhs.data.iter()) {
            *a += b;
        }
        self
    }
}

/// Samples a single value from N(0, 1) using the Box-Muller transform.
pub fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    // Both uniforms on (0, 1] to avoid log(0).
    let u1: f32 = 1.0 - rng.gen::<f32>();
    let u2: f32 = 1.0 - rng.gen::<f32>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// `dst[y, x] += scale * src[y + dy, x + dx]` for every in-bounds source
/// pixel; out-of-bounds reads count as zero padding.
pub(crate) fn accumulate_shifted(
    dst: &mut [f32],
    src: &[f32],
    height: usize,
    width: usize,
    dy: isize,
    dx: isize,
    scale: f32,
) {
    let Some((x0, x1)) = column_span(width, dx) else { return };
    for y in 0..height {
        let sy = y as isize + dy;
        if sy < 0 || sy >= height as isize {
            continue;
        }
        let d = &mut dst[y * width + x0..y * width + x1];
        let start = sy as usize * width + (x0 as isize + dx) as usize;
        let s = &src[start..start + (x1 - x0)];
        for (d, s) in d.iter_mut().zip(s) {
            *d += scale * s;
        }
    }
}

/// `sum over (y, x) of a[y, x] * b[y + dy, x + dx]`, skipping out-of-bounds
/// `b` reads.
pub(crate) fn dot_shifted(
    a: &[f32],
    b: &[f32],
    height: usize,
    width: usize,
    dy: isize,
    dx: isize,
) -> f32 {
    let Some((x0, x1)) = column_span(width, dx) else { return 0.0 };
    let mut sum = 0.0;
    for y in 0..height {
        let sy = y as isize + dy;
        if sy < 0 || sy >= height as isize {
            continue;
        }
        let ar = &a[y * width + x0..y * width + x1];
        let start = sy as usize * width + (x0 as isize + dx) as usize;
        let br = &b[start..start + (x1 - x0)];
        sum += ar.iter().zip(br).map(|(p, q)| p * q).sum::<f32>();
    }
    sum
}

/// Range of destination columns whose shifted source column is in bounds.
fn column_span(width: usize, dx: isize) -> Option<(usize, usize)> {
    let x0 = (-dx).max(0) as usize;
    let x1 = (width as isize - dx).min(width as isize);
    if x1 <= x0 as isize {
        None
    } else {
        Some((x0, x1 as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_then_split_restores_both_halves() {
        let a = Tensor::from_data(1, 2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        let b = Tensor::from_data(2, 2, 2, (10..18).map(|v| v as f32).collect());
        let joined = Tensor::concat_channels(&a, &b);
        assert_eq!(joined.shape(), [3, 2, 2]);
        assert_eq!(joined.plane(1), &[10.0, 11.0, 12.0, 13.0]);

        let (left, right) = joined.split_channels(1);
        assert_eq!(left, a);
        assert_eq!(right, b);
    }

    #[test]
    fn shifted_accumulate_pads_with_zeros() {
        // 3x3 source, shift by one row and one column.
        let src: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        let mut dst = vec![0.0; 9];
        accumulate_shifted(&mut dst, &src, 3, 3, 1, 1, 2.0);
        assert_eq!(dst, vec![10.0, 12.0, 0.0, 16.0, 18.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn shifted_dot_matches_manual_sum() {
        let a = vec![1.0; 4];
        let b = vec![1.0, 2.0, 3.0, 4.0];
        // Only a[0,0] pairs with b[1,1] when shifted by (1, 1).
        assert_eq!(dot_shifted(&a, &b, 2, 2, 1, 1), 4.0);
        assert_eq!(dot_shifted(&a, &b, 2, 2, 0, 0), 10.0);
        assert_eq!(dot_shifted(&a, &b, 2, 2, 0, 5), 0.0);
    }

    #[test]
    #[should_panic(expected = "incorrect sizes")]
    fn adding_mismatched_tensors_panics() {
        let _ = Tensor::zeros(1, 2, 2) + Tensor::zeros(2, 2, 2);
    }
}
