use rand::Rng;
use rayon::prelude::*;

use crate::layers::param::Param;
use crate::math::tensor::{accumulate_shifted, dot_shifted, Tensor};

/// Stride-1 convolution with a square, odd kernel and zero "same" padding, so
/// the output keeps the input's spatial size.
///
/// Weight layout is `[out, in, k, k]`, bias is `[out]`.
#[derive(Debug)]
pub struct Conv2d {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub weight: Param,
    pub bias: Param,
    input: Tensor, // cached by `forward` for the backward pass
}

impl Conv2d {
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        rng: &mut R,
    ) -> Conv2d {
        assert!(kernel % 2 == 1, "kernel size must be odd");
        let fan_in = in_channels * kernel * kernel;
        Conv2d {
            in_channels,
            out_channels,
            kernel,
            weight: Param::he(vec![out_channels, in_channels, kernel, kernel], fan_in, rng),
            bias: Param::zeros(vec![out_channels]),
            input: Tensor::default(),
        }
    }

    /// Training-mode forward pass; keeps the input for `backward`.
    pub fn forward(&mut self, input: &Tensor) -> Tensor {
        let out = self.infer(input);
        self.input = input.clone();
        out
    }

    /// Evaluation-mode forward pass; touches no layer state.
    pub fn infer(&self, input: &Tensor) -> Tensor {
        assert_eq!(input.channels, self.in_channels, "conv input channel mismatch");
        let (h, w) = (input.height, input.width);
        let k = self.kernel;
        let pad = (k / 2) as isize;
        let mut out = Tensor::zeros(self.out_channels, h, w);
        if h * w == 0 {
            return out;
        }

        out.data.par_chunks_mut(h * w).enumerate().for_each(|(oc, out_plane)| {
            out_plane.fill(self.bias.values[oc]);
            for ic in 0..self.in_channels {
                let in_plane = input.plane(ic);
                for ky in 0..k {
                    for kx in 0..k {
                        let wv = self.weight.values[((oc * self.in_channels + ic) * k + ky) * k + kx];
                        let (dy, dx) = (ky as isize - pad, kx as isize - pad);
                        accumulate_shifted(out_plane, in_plane, h, w, dy, dx, wv);
                    }
                }
            }
        });
        out
    }

    /// Accumulates weight/bias gradients and returns ∂L/∂input.
    pub fn backward(&mut self, grad_out: &Tensor) -> Tensor {
        let input = std::mem::take(&mut self.input);
        assert_eq!(grad_out.shape(), [self.out_channels, input.height, input.width]);
        let (h, w) = (input.height, input.width);
        let k = self.kernel;
        let pad = (k / 2) as isize;
        let in_c = self.in_channels;

        // ∂L/∂W[oc, ic, ky, kx] = Σ g[oc, y, x] · in[ic, y + dy, x + dx]
        let per_oc = in_c * k * k;
        self.weight.grad.par_chunks_mut(per_oc).enumerate().for_each(|(oc, wg)| {
            let g_plane = grad_out.plane(oc);
            for ic in 0..in_c {
                let in_plane = input.plane(ic);
                for ky in 0..k {
                    for kx in 0..k {
                        let (dy, dx) = (ky as isize - pad, kx as isize - pad);
                        wg[(ic * k + ky) * k + kx] += dot_shifted(g_plane, in_plane, h, w, dy, dx);
                    }
                }
            }
        });

        for (oc, bg) in self.bias.grad.iter_mut().enumerate() {
            *bg += grad_out.plane(oc).iter().sum::<f32>();
        }

        // ∂L/∂in[ic, y, x] = Σ W[oc, ic, ky, kx] · g[oc, y - dy, x - dx]
        let mut grad_in = Tensor::zeros(in_c, h, w);
        if h * w == 0 {
            return grad_in;
        }
        let weights = &self.weight.values;
        grad_in.data.par_chunks_mut(h * w).enumerate().for_each(|(ic, gin)| {
            for oc in 0..self.out_channels {
                let g_plane = grad_out.plane(oc);
                for ky in 0..k {
                    for kx in 0..k {
                        let wv = weights[((oc * in_c + ic) * k + ky) * k + kx];
                        let (dy, dx) = (ky as isize - pad, kx as isize - pad);
                        accumulate_shifted(gin, g_plane, h, w, -dy, -dx, wv);
                    }
                }
            }
        });
        grad_in
    }
}
