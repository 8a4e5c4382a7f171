use crate::network::unet::UNet;

/// Adam with bias-corrected first and second moment estimates.
///
/// Moment buffers are allocated lazily on the first step, one pair per
/// parameter in `UNet::named_parameters_mut` order.
pub struct Adam {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    step: i32,
    moments: Vec<(Vec<f32>, Vec<f32>)>,
}

impl Adam {
    pub fn new(learning_rate: f32) -> Adam {
        Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            step: 0,
            moments: Vec::new(),
        }
    }

    pub fn steps_taken(&self) -> i32 {
        self.step
    }

    /// Applies one update from the gradients currently accumulated in `model`.
    /// Gradients are left in place; the caller zeroes them.
    pub fn step(&mut self, model: &mut UNet) {
        let mut params = model.named_parameters_mut();
        if self.moments.is_empty() {
            self.moments = params.iter()
                .map(|(_, p)| (vec![0.0; p.len()], vec![0.0; p.len()]))
                .collect();
        }
        assert_eq!(self.moments.len(), params.len(), "optimizer bound to a different model");

        self.step += 1;
        let bias1 = 1.0 - self.beta1.powi(self.step);
        let bias2 = 1.0 - self.beta2.powi(self.step);
        let (b1, b2, lr, eps) = (self.beta1, self.beta2, self.learning_rate, self.epsilon);

        for ((_, param), (m, v)) in params.iter_mut().zip(self.moments.iter_mut()) {
            for i in 0..param.values.len() {
                let g = param.grad[i];
                m[i] = b1 * m[i] + (1.0 - b1) * g;
                v[i] = b2 * v[i] + (1.0 - b2) * g * g;
                let m_hat = m[i] / bias1;
                let v_hat = v[i] / bias2;
                param.values[i] -= lr * m_hat / (v_hat.sqrt() + eps);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::spec::UNetSpec;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn first_step_moves_each_weight_by_the_learning_rate() {
        let spec = UNetSpec { input_width: 4, input_height: 4, base_channels: 1, depth: 1, ..UNetSpec::default() };
        let mut model = UNet::new(&spec, &mut StdRng::seed_from_u64(1));
        let before: Vec<f32> = model.named_parameters()[0].1.values.clone();
        for (_, p) in model.named_parameters_mut() {
            p.grad.iter_mut().for_each(|g| *g = 0.3);
        }

        let mut adam = Adam::new(0.01);
        adam.step(&mut model);
        assert_eq!(adam.steps_taken(), 1);

        // With bias correction the first update is lr · g / |g| = lr.
        let after = &model.named_parameters()[0].1.values;
        for (b, a) in before.iter().zip(after.iter()) {
            assert!((b - a - 0.01).abs() < 1e-5);
        }
    }
}
