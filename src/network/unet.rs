use rand::Rng;

use crate::activation::activation::ActivationFunction;
use crate::error::{Result, SpillError};
use crate::layers::block::DoubleConv;
use crate::layers::conv::Conv2d;
use crate::layers::param::Param;
use crate::layers::pool::MaxPool2d;
use crate::layers::up::ConvTranspose2d;
use crate::math::tensor::Tensor;
use crate::network::spec::UNetSpec;

/// One expanding stage: up-sample, concatenate the matching skip, convolve.
#[derive(Debug)]
pub struct DecoderStage {
    pub up: ConvTranspose2d,
    pub block: DoubleConv,
    skip_channels: usize,
}

/// Encoder-decoder segmentation network with skip connections.
///
/// Maps a `1 × H × W` image to a `1 × H × W` probability map. The terminal
/// sigmoid is applied outside the layer stack so training can feed the
/// combined sigmoid + BCE gradient directly into the logits.
#[derive(Debug)]
pub struct UNet {
    spec: UNetSpec,
    encoders: Vec<DoubleConv>,
    pools: Vec<MaxPool2d>,
    bottleneck: DoubleConv,
    decoders: Vec<DecoderStage>, // deepest stage first
    head: Conv2d,
}

impl UNet {
    /// Builds a freshly initialised network. Call `spec.validate()` first;
    /// sizes that do not pool evenly panic on the first forward pass.
    pub fn new<R: Rng + ?Sized>(spec: &UNetSpec, rng: &mut R) -> UNet {
        let act = spec.activation;
        let mut encoders = Vec::with_capacity(spec.depth);
        let mut pools = Vec::with_capacity(spec.depth);
        let mut in_c = 1;
        for level in 0..spec.depth {
            let out_c = spec.channels_at(level);
            encoders.push(DoubleConv::new(in_c, out_c, act, rng));
            pools.push(MaxPool2d::new());
            in_c = out_c;
        }

        let bottleneck = DoubleConv::new(in_c, spec.channels_at(spec.depth), act, rng);

        let decoders = (0..spec.depth).rev()
            .map(|level| {
                let below = spec.channels_at(level + 1);
                let here = spec.channels_at(level);
                DecoderStage {
                    up: ConvTranspose2d::new(below, here, rng),
                    block: DoubleConv::new(2 * here, here, act, rng),
                    skip_channels: here,
                }
            })
            .collect();

        let mut head = Conv2d::new(spec.channels_at(0), 1, 1, rng);
        // The head feeds a sigmoid, not a ReLU; rescale to Xavier variance.
        let xavier_scale = std::f32::consts::FRAC_1_SQRT_2;
        head.weight.values.iter_mut().for_each(|v| *v *= xavier_scale);

        UNet {
            spec: spec.clone(),
            encoders,
            pools,
            bottleneck,
            decoders,
            head,
        }
    }

    pub fn spec(&self) -> &UNetSpec {
        &self.spec
    }

    /// Training-mode forward pass; caches every activation for `backward`.
    /// Returns the probability map.
    pub fn forward(&mut self, input: &Tensor) -> Tensor {
        assert_eq!(input.shape(), self.spec.input_shape(), "model input has the wrong shape");
        let mut skips = Vec::with_capacity(self.encoders.len());
        let mut x = input.clone();
        for (block, pool) in self.encoders.iter_mut().zip(self.pools.iter_mut()) {
            let features = block.forward(&x);
            x = pool.forward(&features);
            skips.push(features);
        }
        x = self.bottleneck.forward(&x);
        for (stage, skip) in self.decoders.iter_mut().zip(skips.iter().rev()) {
            let up = stage.up.forward(&x);
            x = stage.block.forward(&Tensor::concat_channels(skip, &up));
        }
        sigmoid(self.head.forward(&x))
    }

    /// Evaluation-mode forward pass: no caches, no layer state touched, so
    /// repeated calls on the same input return identical maps.
    pub fn predict(&self, input: &Tensor) -> Result<Tensor> {
        let expected = self.spec.input_shape();
        if input.shape() != expected {
            return Err(SpillError::ShapeMismatch { expected, actual: input.shape() });
        }
        let mut skips = Vec::with_capacity(self.encoders.len());
        let mut x = input.clone();
        for (block, pool) in self.encoders.iter().zip(self.pools.iter()) {
            let features = block.infer(&x);
            x = pool.infer(&features);
            skips.push(features);
        }
        x = self.bottleneck.infer(&x);
        for (stage, skip) in self.decoders.iter().zip(skips.iter().rev()) {
            let up = stage.up.infer(&x);
            x = stage.block.infer(&Tensor::concat_channels(skip, &up));
        }
        Ok(sigmoid(self.head.infer(&x)))
    }

    /// Back-propagates ∂L/∂logits through the network, accumulating gradients
    /// in every parameter. Must follow a `forward` on the same sample.
    pub fn backward(&mut self, grad_logits: &Tensor) {
        let mut g = self.head.backward(grad_logits);

        // `decoders` is stored deepest-first; the head sits on the shallowest
        // stage, so walk it in reverse. `skip_grads` ends up shallowest-first.
        let mut skip_grads = Vec::with_capacity(self.decoders.len());
        for stage in self.decoders.iter_mut().rev() {
            let g_cat = stage.block.backward(&g);
            let (g_skip, g_up) = g_cat.split_channels(stage.skip_channels);
            skip_grads.push(g_skip);
            g = stage.up.backward(&g_up);
        }

        g = self.bottleneck.backward(&g);

        for ((block, pool), g_skip) in self.encoders.iter_mut()
            .zip(self.pools.iter_mut())
            .rev()
            .zip(skip_grads.into_iter().rev())
        {
            g = pool.backward(&g) + g_skip;
            g = block.backward(&g);
        }
    }

    /// Every parameter with its weights-file name, in a fixed order.
    pub fn named_parameters(&self) -> Vec<(String, &Param)> {
        let mut out = Vec::new();
        for (i, block) in self.encoders.iter().enumerate() {
            block.named_params(&format!("encoder.{i}"), &mut out);
        }
        self.bottleneck.named_params("bottleneck", &mut out);
        for (i, stage) in self.decoders.iter().enumerate() {
            out.push((format!("decoder.{i}.up.weight"), &stage.up.weight));
            out.push((format!("decoder.{i}.up.bias"), &stage.up.bias));
            stage.block.named_params(&format!("decoder.{i}.block"), &mut out);
        }
        out.push(("head.weight".to_string(), &self.head.weight));
        out.push(("head.bias".to_string(), &self.head.bias));
        out
    }

    /// Mutable counterpart of [`UNet::named_parameters`], same order.
    pub fn named_parameters_mut(&mut self) -> Vec<(String, &mut Param)> {
        let mut out = Vec::new();
        for (i, block) in self.encoders.iter_mut().enumerate() {
            block.named_params_mut(&format!("encoder.{i}"), &mut out);
        }
        self.bottleneck.named_params_mut("bottleneck", &mut out);
        for (i, stage) in self.decoders.iter_mut().enumerate() {
            out.push((format!("decoder.{i}.up.weight"), &mut stage.up.weight));
            out.push((format!("decoder.{i}.up.bias"), &mut stage.up.bias));
            stage.block.named_params_mut(&format!("decoder.{i}.block"), &mut out);
        }
        out.push(("head.weight".to_string(), &mut self.head.weight));
        out.push(("head.bias".to_string(), &mut self.head.bias));
        out
    }

    pub fn parameter_count(&self) -> usize {
        self.named_parameters().iter().map(|(_, p)| p.len()).sum()
    }

    pub fn zero_grad(&mut self) {
        for (_, p) in self.named_parameters_mut() {
            p.zero_grad();
        }
    }
}

fn sigmoid(logits: Tensor) -> Tensor {
    logits.map(|x| ActivationFunction::Sigmoid.function(x))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::bce::BceLoss;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tiny_spec() -> UNetSpec {
        UNetSpec { input_width: 16, input_height: 8, base_channels: 2, depth: 2, ..UNetSpec::default() }
    }

    fn noise(rng: &mut StdRng, spec: &UNetSpec, scale: f32) -> Tensor {
        let [c, h, w] = spec.input_shape();
        Tensor::from_data(c, h, w, (0..c * h * w).map(|_| (rng.gen::<f32>() - 0.5) * scale).collect())
    }

    #[test]
    fn output_matches_input_resolution() {
        let spec = tiny_spec();
        let mut rng = StdRng::seed_from_u64(1);
        let model = UNet::new(&spec, &mut rng);
        let out = model.predict(&noise(&mut rng, &spec, 1.0)).unwrap();
        assert_eq!(out.shape(), [1, 8, 16]);
    }

    #[test]
    fn probabilities_stay_in_unit_interval_for_arbitrary_inputs() {
        let spec = tiny_spec();
        let mut rng = StdRng::seed_from_u64(2);
        let model = UNet::new(&spec, &mut rng);
        for scale in [1.0, 10.0, 1e3, 1e6] {
            let out = model.predict(&noise(&mut rng, &spec, scale)).unwrap();
            assert!(out.data.iter().all(|p| (0.0..=1.0).contains(p)), "scale {scale}");
        }
    }

    #[test]
    fn predict_is_deterministic_and_matches_training_forward() {
        let spec = tiny_spec();
        let mut rng = StdRng::seed_from_u64(3);
        let mut model = UNet::new(&spec, &mut rng);
        let x = noise(&mut rng, &spec, 1.0);
        let a = model.predict(&x).unwrap();
        let b = model.predict(&x).unwrap();
        assert_eq!(a, b);
        assert_eq!(model.forward(&x), a);
    }

    #[test]
    fn wrong_input_shape_is_rejected() {
        let spec = tiny_spec();
        let mut rng = StdRng::seed_from_u64(4);
        let model = UNet::new(&spec, &mut rng);
        let err = model.predict(&Tensor::zeros(1, 8, 8)).unwrap_err();
        assert!(matches!(err, SpillError::ShapeMismatch { .. }));
    }

    #[test]
    fn parameter_names_are_unique_and_ordered() {
        let spec = tiny_spec();
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = UNet::new(&spec, &mut rng);
        let names: Vec<String> = model.named_parameters().into_iter().map(|(n, _)| n).collect();
        let mut dedup = names.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), names.len());
        assert_eq!(names.first().map(String::as_str), Some("encoder.0.conv1.weight"));
        assert_eq!(names.last().map(String::as_str), Some("head.bias"));

        let mut_names: Vec<String> = model.named_parameters_mut().into_iter().map(|(n, _)| n).collect();
        assert_eq!(mut_names, names);
    }

    #[test]
    fn backward_fills_every_gradient_shape() {
        let spec = tiny_spec();
        let mut rng = StdRng::seed_from_u64(6);
        let mut model = UNet::new(&spec, &mut rng);
        let x = noise(&mut rng, &spec, 1.0);
        let out = model.forward(&x);
        model.backward(&out.map(|p| p - 0.5));

        let params = model.named_parameters();
        assert!(params.iter().all(|(_, p)| p.grad.len() == p.values.len()));
        let head_bias = params.iter().find(|(n, _)| n == "head.bias").map(|(_, p)| p.grad[0]);
        let expected: f32 = out.data.iter().map(|p| p - 0.5).sum();
        assert!((head_bias.unwrap() - expected).abs() < 1e-3);

        model.zero_grad();
        assert!(model.named_parameters().iter().all(|(_, p)| p.grad.iter().all(|g| *g == 0.0)));
    }

    fn nudge(model: &mut UNet, name: &str, idx: usize, delta: f32) {
        let (_, param) = model.named_parameters_mut().into_iter()
            .find(|(n, _)| n == name)
            .unwrap();
        param.values[idx] += delta;
    }

    #[test]
    fn composed_gradients_match_finite_differences() {
        // Identity hidden activations keep the loss smooth apart from pooling.
        let spec = UNetSpec { activation: ActivationFunction::Identity, ..tiny_spec() };
        let mut rng = StdRng::seed_from_u64(7);
        let mut model = UNet::new(&spec, &mut rng);
        let x = noise(&mut rng, &spec, 1.0);
        let target = x.map(|v| if v < 0.0 { 1.0 } else { 0.0 });

        let out = model.forward(&x);
        let grad = BceLoss::logit_gradient(&out.data, &target.data);
        model.backward(&Tensor::from_data(out.channels, out.height, out.width, grad));

        let loss = |model: &UNet| BceLoss::loss(&model.predict(&x).unwrap().data, &target.data);
        let checked = [
            ("encoder.0.conv1.weight", 4),
            ("encoder.1.conv2.weight", 10),
            ("bottleneck.conv2.weight", 3),
            ("decoder.0.up.weight", 5),
            ("decoder.1.up.weight", 2),
            ("decoder.1.block.conv1.weight", 20),
        ];
        let eps = 5e-3;
        for (name, idx) in checked {
            let analytic = model.named_parameters().into_iter()
                .find(|(n, _)| n == name)
                .map(|(_, p)| p.grad[idx])
                .unwrap() as f64;

            nudge(&mut model, name, idx, eps);
            let plus = loss(&model);
            nudge(&mut model, name, idx, -2.0 * eps);
            let minus = loss(&model);
            nudge(&mut model, name, idx, eps);

            let numeric = (plus - minus) / (2.0 * eps as f64);
            assert!(
                (numeric - analytic).abs() < 1e-3 + 0.05 * analytic.abs(),
                "{name}[{idx}]: numeric {numeric} vs backward {analytic}"
            );
        }
    }
}
