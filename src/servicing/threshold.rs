use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServicingError};

/// Severity bucket used to prioritise the servicing worklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Band {
    #[serde(rename = "threshold-80")]
    Threshold80,
    #[serde(rename = "threshold-90")]
    Threshold90,
    #[serde(rename = "is-due")]
    IsDue,
}

impl Band {
    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Threshold80 => "threshold-80",
            Band::Threshold90 => "threshold-90",
            Band::IsDue => "is-due",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub normalised_value: Decimal,
    pub normalised_percentage: Decimal,
    pub is_due: bool,
    pub band: Option<Band>,
}

/// Rejects thresholds that cannot normalise a value.
pub fn validate_threshold(threshold: Decimal) -> Result<()> {
    if threshold <= Decimal::ZERO {
        return Err(ServicingError::validation(
            "threshold",
            "threshold must be greater than zero",
        ));
    }
    Ok(())
}

/// `current >= threshold * fraction`, compared without dividing.
fn reaches(current: Decimal, threshold: Decimal, fraction: Decimal) -> bool {
    // fraction < 1 and threshold > 0, so the product shrinks and cannot overflow
    threshold
        .checked_mul(fraction)
        .is_some_and(|bound| current >= bound)
}

/// Band from direct comparisons against the threshold. Division rounds at the
/// 28th digit, so the quotient can read 1 while the value is still short.
pub fn band_for(current: Decimal, threshold: Decimal) -> Option<Band> {
    if current >= threshold {
        Some(Band::IsDue)
    } else if reaches(current, threshold, Decimal::new(9, 1)) {
        Some(Band::Threshold90)
    } else if reaches(current, threshold, Decimal::new(8, 1)) {
        Some(Band::Threshold80)
    } else {
        None
    }
}

/// Due flag and band come from exact comparisons. The normalised value is for
/// display and sorting only and saturates when it leaves the decimal range.
pub fn evaluate(current_value: Decimal, threshold: Decimal) -> Result<Evaluation> {
    validate_threshold(threshold)?;
    let normalised_value = match current_value.checked_div(threshold) {
        Some(ratio) => ratio,
        None => {
            tracing::debug!(
                "normalised value of {} over {} exceeds the decimal range",
                current_value,
                threshold
            );
            if current_value.is_sign_positive() {
                Decimal::MAX
            } else {
                Decimal::MIN
            }
        }
    };
    let band = band_for(current_value, threshold);
    Ok(Evaluation {
        normalised_value,
        normalised_percentage: normalised_value.saturating_mul(Decimal::ONE_HUNDRED),
        is_due: band == Some(Band::IsDue),
        band,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn band_at(current: i64) -> Option<Band> {
        evaluate(Decimal::from(current), Decimal::from(100)).unwrap().band
    }

    #[test]
    fn bands_at_the_boundaries() {
        assert_eq!(band_at(79), None);
        assert_eq!(band_at(80), Some(Band::Threshold80));
        assert_eq!(band_at(89), Some(Band::Threshold80));
        assert_eq!(band_at(90), Some(Band::Threshold90));
        assert_eq!(band_at(99), Some(Band::Threshold90));
        assert_eq!(band_at(100), Some(Band::IsDue));
        assert_eq!(band_at(150), Some(Band::IsDue));
    }

    #[test]
    fn percentage_is_exact() {
        let eval = evaluate(Decimal::new(125, 1), Decimal::from(50)).unwrap();
        assert_eq!(eval.normalised_value, Decimal::new(25, 2));
        assert_eq!(eval.normalised_percentage, Decimal::from(25));
        assert!(!eval.is_due);
    }

    #[test]
    fn just_below_threshold_is_not_due() {
        let threshold = Decimal::new(1000, 0);
        let current = Decimal::new(99_999_999, 5); // 999.99999
        let eval = evaluate(current, threshold).unwrap();
        assert!(!eval.is_due);
        assert_eq!(eval.band, Some(Band::Threshold90));
    }

    #[test]
    fn non_positive_threshold_is_rejected() {
        for threshold in [Decimal::ZERO, Decimal::from(-5)] {
            let err = evaluate(Decimal::ONE, threshold).unwrap_err();
            assert!(matches!(err, ServicingError::Validation { field: "threshold", .. }));
        }
    }

    #[test]
    fn band_serialises_to_css_names() {
        let json = serde_json::to_string(&Band::Threshold90).unwrap();
        assert_eq!(json, "\"threshold-90\"");
        assert_eq!(Band::IsDue.as_str(), "is-due");
    }

    #[test]
    fn just_below_threshold_at_the_top_of_the_range_is_not_due() {
        let threshold: Decimal = "50000000000000000000000000000".parse().unwrap();
        let current: Decimal = "49999999999999999999999999999".parse().unwrap();
        let eval = evaluate(current, threshold).unwrap();
        assert!(!eval.is_due);
        assert_eq!(eval.band, Some(Band::Threshold90));

        let due = evaluate(threshold, threshold).unwrap();
        assert!(due.is_due);
        assert_eq!(due.band, Some(Band::IsDue));
    }

    #[test]
    fn tiny_threshold_saturates_instead_of_failing() {
        let threshold: Decimal = "0.00000000000000000001".parse().unwrap();
        let eval = evaluate(Decimal::from(1_000_000_000), threshold).unwrap();
        assert!(eval.is_due);
        assert_eq!(eval.band, Some(Band::IsDue));
        assert_eq!(eval.normalised_value, Decimal::MAX);
        assert_eq!(eval.normalised_percentage, Decimal::MAX);
    }

    fn decimal() -> impl Strategy<Value = Decimal> {
        prop_oneof![
            (0i64..1_000_000_000, 0u32..5).prop_map(|(m, s)| Decimal::new(m, s)),
            (0u32..u32::MAX, 0u32..u32::MAX, 0u32..u32::MAX, 0u32..=28)
                .prop_map(|(lo, mid, hi, s)| Decimal::from_parts(lo, mid, hi, false, s)),
        ]
    }

    fn positive_decimal() -> impl Strategy<Value = Decimal> {
        prop_oneof![
            (1i64..1_000_000_000, 0u32..5).prop_map(|(m, s)| Decimal::new(m, s)),
            (1u32..u32::MAX, 0u32..u32::MAX, 0u32..u32::MAX, 0u32..=28)
                .prop_map(|(lo, mid, hi, s)| Decimal::from_parts(lo, mid, hi, false, s)),
        ]
    }

    proptest! {
        #[test]
        fn due_iff_value_reaches_threshold(current in decimal(), threshold in positive_decimal()) {
            let eval = evaluate(current, threshold).unwrap();
            prop_assert_eq!(eval.is_due, current >= threshold);
            prop_assert_eq!(eval.is_due, eval.band == Some(Band::IsDue));
        }

        #[test]
        fn bands_are_monotonic(a in decimal(), b in decimal(), threshold in positive_decimal()) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let low_band = evaluate(low, threshold).unwrap().band;
            let high_band = evaluate(high, threshold).unwrap().band;
            prop_assert!(low_band <= high_band);
        }

        #[test]
        fn evaluation_is_deterministic(current in decimal(), threshold in positive_decimal()) {
            prop_assert_eq!(evaluate(current, threshold).unwrap(), evaluate(current, threshold).unwrap());
        }
    }
}
