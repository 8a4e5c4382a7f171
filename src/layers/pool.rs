use crate::math::tensor::Tensor;

/// 2×2 max pooling with stride 2. Input height and width must be even.
#[derive(Debug, Default)]
pub struct MaxPool2d {
    input_shape: [usize; 3],
    argmax: Vec<usize>, // flat input index chosen for each output element
}

impl MaxPool2d {
    pub fn new() -> MaxPool2d {
        MaxPool2d::default()
    }

    pub fn forward(&mut self, input: &Tensor) -> Tensor {
        let (out, argmax) = pool(input);
        self.input_shape = input.shape();
        self.argmax = argmax;
        out
    }

    pub fn infer(&self, input: &Tensor) -> Tensor {
        pool(input).0
    }

    /// Routes each output gradient back to the input element that won the max.
    pub fn backward(&mut self, grad_out: &Tensor) -> Tensor {
        assert_eq!(grad_out.data.len(), self.argmax.len(), "pool gradient size mismatch");
        let [c, h, w] = self.input_shape;
        let mut grad_in = Tensor::zeros(c, h, w);
        for (&src, &g) in self.argmax.iter().zip(grad_out.data.iter()) {
            grad_in.data[src] += g;
        }
        self.argmax.clear();
        grad_in
    }
}

fn pool(input: &Tensor) -> (Tensor, Vec<usize>) {
    let [c, h, w] = input.shape();
    assert!(h % 2 == 0 && w % 2 == 0, "max pooling needs even spatial size, got {h}x{w}");
    let (oh, ow) = (h / 2, w / 2);
    let mut out = Tensor::zeros(c, oh, ow);
    let mut argmax = Vec::with_capacity(c * oh * ow);

    for ch in 0..c {
        let base = ch * h * w;
        for oy in 0..oh {
            for ox in 0..ow {
                let mut best = base + (2 * oy) * w + 2 * ox;
                for (dy, dx) in [(0, 1), (1, 0), (1, 1)] {
                    let idx = base + (2 * oy + dy) * w + 2 * ox + dx;
                    if input.data[idx] > input.data[best] {
                        best = idx;
                    }
                }
                out.data[(ch * oh + oy) * ow + ox] = input.data[best];
                argmax.push(best);
            }
        }
    }
    (out, argmax)
}
