use rand::Rng;

use crate::activation::activation::ActivationFunction;
use crate::layers::conv::Conv2d;
use crate::layers::param::Param;
use crate::math::tensor::Tensor;

/// conv3×3 → activation → conv3×3 → activation, the unit every UNet stage
/// is built from.
#[derive(Debug)]
pub struct DoubleConv {
    pub conv1: Conv2d,
    pub conv2: Conv2d,
    pub activator: ActivationFunction,
    pre1: Tensor, // pre-activation values needed for the derivative
    pre2: Tensor,
}

impl DoubleConv {
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        activation: ActivationFunction,
        rng: &mut R,
    ) -> DoubleConv {
        DoubleConv {
            conv1: Conv2d::new(in_channels, out_channels, 3, rng),
            conv2: Conv2d::new(out_channels, out_channels, 3, rng),
            activator: activation,
            pre1: Tensor::default(),
            pre2: Tensor::default(),
        }
    }

    pub fn forward(&mut self, input: &Tensor) -> Tensor {
        let z1 = self.conv1.forward(input);
        let a1 = z1.map(|x| self.activator.function(x));
        let z2 = self.conv2.forward(&a1);
        let a2 = z2.map(|x| self.activator.function(x));
        self.pre1 = z1;
        self.pre2 = z2;
        a2
    }

    pub fn infer(&self, input: &Tensor) -> Tensor {
        let a1 = self.conv1.infer(input).map(|x| self.activator.function(x));
        self.conv2.infer(&a1).map(|x| self.activator.function(x))
    }

    pub fn backward(&mut self, grad_out: &Tensor) -> Tensor {
        let pre2 = std::mem::take(&mut self.pre2);
        let pre1 = std::mem::take(&mut self.pre1);
        let delta2 = hadamard_derivative(grad_out, &pre2, self.activator);
        let grad_a1 = self.conv2.backward(&delta2);
        let delta1 = hadamard_derivative(&grad_a1, &pre1, self.activator);
        self.conv1.backward(&delta1)
    }

    pub fn named_params<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Param)>) {
        out.push((format!("{prefix}.conv1.weight"), &self.conv1.weight));
        out.push((format!("{prefix}.conv1.bias"), &self.conv1.bias));
        out.push((format!("{prefix}.conv2.weight"), &self.conv2.weight));
        out.push((format!("{prefix}.conv2.bias"), &self.conv2.bias));
    }

    pub fn named_params_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, &'a mut Param)>) {
        out.push((format!("{prefix}.conv1.weight"), &mut self.conv1.weight));
        out.push((format!("{prefix}.conv1.bias"), &mut self.conv1.bias));
        out.push((format!("{prefix}.conv2.weight"), &mut self.conv2.weight));
        out.push((format!("{prefix}.conv2.bias"), &mut self.conv2.bias));
    }
}

/// δ = error ⊙ σ'(z)
fn hadamard_derivative(error: &Tensor, pre: &Tensor, activator: ActivationFunction) -> Tensor {
    assert_eq!(error.shape(), pre.shape(), "backward called without a matching forward");
    let data = error.data.iter().zip(pre.data.iter())
        .map(|(e, z)| e * activator.derivative(*z))
        .collect();
    Tensor::from_data(error.channels, error.height, error.width, data)
}
