pub struct BceLoss;

const EPS: f64 = 1e-12;

impl BceLoss {
    /// Scalar BCE: -mean(y·log(p+ε) + (1-y)·log(1-p+ε)), accumulated in f64.
    pub fn loss(predicted: &[f32], expected: &[f32]) -> f64 {
        assert_eq!(predicted.len(), expected.len(), "prediction and target sizes differ");
        let n = predicted.len() as f64;
        predicted.iter().zip(expected.iter())
            .map(|(&p, &y)| {
                let (p, y) = (p as f64, y as f64);
                -(y * (p + EPS).ln() + (1.0 - y) * (1.0 - p + EPS).ln())
            })
            .sum::<f64>() / n
    }

    /// Gradient of the mean BCE with respect to the pre-sigmoid logits.
    ///
    /// Composing sigmoid with BCE cancels the sigmoid Jacobian:
    ///   ∂L/∂z_i = (p_i - y_i) / n
    /// This stays finite even when p saturates at exactly 0 or 1.
    pub fn logit_gradient(predicted: &[f32], expected: &[f32]) -> Vec<f32> {
        assert_eq!(predicted.len(), expected.len(), "prediction and target sizes differ");
        let n = predicted.len() as f32;
        predicted.iter().zip(expected.iter())
            .map(|(p, y)| (p - y) / n)
            .collect()
    }
}
