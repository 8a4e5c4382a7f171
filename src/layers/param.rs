use rand::Rng;

use crate::math::tensor::sample_standard_normal;

/// A trainable parameter: values plus the gradient accumulated since the last
/// optimizer step. `shape` is what the weights file records and checks.
#[derive(Debug, Clone)]
pub struct Param {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
    pub grad: Vec<f32>,
}

impl Param {
    pub fn zeros(shape: Vec<usize>) -> Param {
        let len = shape.iter().product();
        Param {
            shape,
            values: vec![0.0; len],
            grad: vec![0.0; len],
        }
    }

    /// He initialization: samples from N(0, sqrt(2 / fan_in)).
    ///
    /// Every hidden conv is followed by a ReLU-family activation, which is
    /// what the 2/fan_in variance is derived for.
    pub fn he<R: Rng + ?Sized>(shape: Vec<usize>, fan_in: usize, rng: &mut R) -> Param {
        let std_dev = (2.0 / fan_in as f32).sqrt();
        let mut param = Param::zeros(shape);
        for v in param.values.iter_mut() {
            *v = sample_standard_normal(rng) * std_dev;
        }
        param
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn zero_grad(&mut self) {
        self.grad.iter_mut().for_each(|g| *g = 0.0);
    }

    pub fn scale_grad(&mut self, factor: f32) {
        self.grad.iter_mut().for_each(|g| *g *= factor);
    }
}
