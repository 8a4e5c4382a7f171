use rand::Rng;
use rayon::prelude::*;

use crate::layers::param::Param;
use crate::math::tensor::Tensor;

/// Transposed convolution with a 2×2 kernel and stride 2: doubles height and
/// width. Every output pixel receives exactly one kernel tap per input channel.
///
/// Weight layout is `[in, out, 2, 2]`, bias is `[out]`.
#[derive(Debug)]
pub struct ConvTranspose2d {
    pub in_channels: usize,
    pub out_channels: usize,
    pub weight: Param,
    pub bias: Param,
    input: Tensor,
}

impl ConvTranspose2d {
    pub fn new<R: Rng + ?Sized>(in_channels: usize, out_channels: usize, rng: &mut R) -> ConvTranspose2d {
        ConvTranspose2d {
            in_channels,
            out_channels,
            weight: Param::he(vec![in_channels, out_channels, 2, 2], in_channels, rng),
            bias: Param::zeros(vec![out_channels]),
            input: Tensor::default(),
        }
    }

    pub fn forward(&mut self, input: &Tensor) -> Tensor {
        let out = self.infer(input);
        self.input = input.clone();
        out
    }

    pub fn infer(&self, input: &Tensor) -> Tensor {
        assert_eq!(input.channels, self.in_channels, "up-conv input channel mismatch");
        let (h, w) = (input.height, input.width);
        let (oh, ow) = (2 * h, 2 * w);
        let out_c = self.out_channels;
        let mut out = Tensor::zeros(out_c, oh, ow);
        if h * w == 0 {
            return out;
        }

        out.data.par_chunks_mut(oh * ow).enumerate().for_each(|(oc, out_plane)| {
            out_plane.fill(self.bias.values[oc]);
            for ic in 0..self.in_channels {
                let in_plane = input.plane(ic);
                for dy in 0..2 {
                    for dx in 0..2 {
                        let wv = self.weight.values[((ic * out_c + oc) * 2 + dy) * 2 + dx];
                        for y in 0..h {
                            let row = (2 * y + dy) * ow;
                            for x in 0..w {
                                out_plane[row + 2 * x + dx] += wv * in_plane[y * w + x];
                            }
                        }
                    }
                }
            }
        });
        out
    }

    pub fn backward(&mut self, grad_out: &Tensor) -> Tensor {
        let input = std::mem::take(&mut self.input);
        let (h, w) = (input.height, input.width);
        let (oh, ow) = (2 * h, 2 * w);
        let out_c = self.out_channels;
        assert_eq!(grad_out.shape(), [out_c, oh, ow]);

        // ∂L/∂W[ic, oc, dy, dx] = Σ in[ic, y, x] · g[oc, 2y + dy, 2x + dx]
        self.weight.grad.par_chunks_mut(out_c * 4).enumerate().for_each(|(ic, wg)| {
            let in_plane = input.plane(ic);
            for oc in 0..out_c {
                let g_plane = grad_out.plane(oc);
                for dy in 0..2 {
                    for dx in 0..2 {
                        let mut sum = 0.0;
                        for y in 0..h {
                            let row = (2 * y + dy) * ow;
                            for x in 0..w {
                                sum += in_plane[y * w + x] * g_plane[row + 2 * x + dx];
                            }
                        }
                        wg[(oc * 2 + dy) * 2 + dx] += sum;
                    }
                }
            }
        });

        for (oc, bg) in self.bias.grad.iter_mut().enumerate() {
            *bg += grad_out.plane(oc).iter().sum::<f32>();
        }

        let mut grad_in = Tensor::zeros(self.in_channels, h, w);
        if h * w == 0 {
            return grad_in;
        }
        let weights = &self.weight.values;
        grad_in.data.par_chunks_mut(h * w).enumerate().for_each(|(ic, gin)| {
            for oc in 0..out_c {
                let g_plane = grad_out.plane(oc);
                for dy in 0..2 {
                    for dx in 0..2 {
                        let wv = weights[((ic * out_c + oc) * 2 + dy) * 2 + dx];
                        for y in 0..h {
                            let row = (2 * y + dy) * ow;
                            for x in 0..w {
                                gin[y * w + x] += wv * g_plane[row + 2 * x + dx];
                            }
                        }
                    }
                }
            }
        });
        grad_in
    }
}
