/// Smoothing term added to numerator and denominator so that two empty masks
/// score a perfect 1.0 instead of 0/0.
pub const SMOOTH: f64 = 1e-6;

/// Dice coefficient of two flattened binary masks (values 0.0 or 1.0).
///
///   dice = (2·|P∩T| + ε) / (|P| + |T| + ε)
///
/// # Panics
/// Panics if the slices differ in length.
pub fn dice_coefficient(pred: &[f32], target: &[f32]) -> f64 {
    let (intersection, pred_sum, target_sum) = overlap(pred, target);
    (2.0 * intersection + SMOOTH) / (pred_sum + target_sum + SMOOTH)
}

/// Intersection over union of two flattened binary masks.
///
///   iou = (|P∩T| + ε) / (|P| + |T| − |P∩T| + ε)
///
/// # Panics
/// Panics if the slices differ in length.
pub fn iou_score(pred: &[f32], target: &[f32]) -> f64 {
    let (intersection, pred_sum, target_sum) = overlap(pred, target);
    let union = pred_sum + target_sum - intersection;
    (intersection + SMOOTH) / (union + SMOOTH)
}

fn overlap(pred: &[f32], target: &[f32]) -> (f64, f64, f64) {
    assert_eq!(pred.len(), target.len(), "Masks are of different sizes");
    pred.iter().zip(target).fold((0.0, 0.0, 0.0), |(i, p, t), (&a, &b)| {
        (i + (a * b) as f64, p + a as f64, t + b as f64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_empty_masks_score_perfectly() {
        let zeros = [0.0f32; 16];
        assert!((dice_coefficient(&zeros, &zeros) - 1.0).abs() < 1e-12);
        assert!((iou_score(&zeros, &zeros) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn half_overlap() {
        let pred = [1.0, 1.0, 0.0, 0.0];
        let target = [1.0, 0.0, 1.0, 0.0];
        assert!((dice_coefficient(&pred, &target) - 0.5).abs() < 1e-6);
        assert!((iou_score(&pred, &target) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn identical_and_disjoint_masks() {
        let mask = [1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        assert!((dice_coefficient(&mask, &mask) - 1.0).abs() < 1e-9);
        assert!((iou_score(&mask, &mask) - 1.0).abs() < 1e-9);

        let inverse: Vec<f32> = mask.iter().map(|v| 1.0 - v).collect();
        assert!(dice_coefficient(&mask, &inverse) < 1e-6);
        assert!(iou_score(&mask, &inverse) < 1e-6);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let pred = [1.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        let target = [0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0];
        for score in [dice_coefficient(&pred, &target), iou_score(&pred, &target)] {
            assert!((0.0..=1.0).contains(&score));
        }
        assert!(iou_score(&pred, &target) <= dice_coefficient(&pred, &target));
    }
}
