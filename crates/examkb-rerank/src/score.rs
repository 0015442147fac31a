/// Probability of "yes" from the two answer-token logits.
///
/// Softmax over `[yes, no]`, written so that neither branch can overflow.
pub fn yes_probability(yes: f32, no: f32) -> f32 {
    let d = no - yes;
    if d.is_nan() {
        return 0.5;
    }
    if d > 0.0 {
        let e = (-d).exp();
        e / (1.0 + e)
    } else {
        1.0 / (1.0 + d.exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_logits_are_a_coin_flip() {
        assert!((yes_probability(3.0, 3.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn extreme_logits_stay_finite_and_bounded() {
        for (yes, no) in [(1e4, -1e4), (-1e4, 1e4), (f32::MAX, f32::MIN), (88.0, -88.0), (-1000.0, -1000.5)] {
            let p = yes_probability(yes, no);
            assert!(p.is_finite() && (0.0..=1.0).contains(&p), "p({yes}, {no}) = {p}");
        }
        assert!(yes_probability(1e4, -1e4) > 0.999);
        assert!(yes_probability(-1e4, 1e4) < 0.001);
    }

    #[test]
    fn monotone_in_yes_logit() {
        let a = yes_probability(0.5, 1.0);
        let b = yes_probability(1.5, 1.0);
        assert!(a < 0.5 && b > 0.5);
    }
}
