// Amount splitting: weighted random partition of a total into fragments
//
// Weights come from a flat Dirichlet distribution. Every part but the last is
// rounded down to whole base units; the last part absorbs the remainder so
// the parts always sum exactly to the input.

use super::amount::Amount;
use rand::Rng;
use rand_distr::{Dirichlet, Distribution};
use thiserror::Error;

/// Number of parts the reference splitter produces by default
pub const DEFAULT_SPLIT_PARTS: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("Cannot split into zero parts")]
    ZeroParts,
    #[error("Amount too small to split into {0} positive parts")]
    AmountTooSmall(usize),
    #[error("Weight distribution unavailable")]
    Distribution,
}

/// Split `total` into `parts` positive amounts that sum exactly to `total`
pub fn split_amount(total: Amount, parts: usize) -> Result<Vec<Amount>, SplitError> {
    split_amount_with_rng(total, parts, &mut rand::thread_rng())
}

/// Same as [`split_amount`] with a caller-supplied RNG
pub fn split_amount_with_rng<R: Rng + ?Sized>(
    total: Amount,
    parts: usize,
    rng: &mut R,
) -> Result<Vec<Amount>, SplitError> {
    if parts == 0 {
        return Err(SplitError::ZeroParts);
    }
    let units = total.base_units();
    if units < parts as u128 {
        return Err(SplitError::AmountTooSmall(parts));
    }
    if parts == 1 {
        return Ok(vec![total]);
    }

    let alpha = vec![1.0f64; parts];
    let dirichlet = Dirichlet::new(&alpha).map_err(|_| SplitError::Distribution)?;
    let weights: Vec<f64> = dirichlet.sample(rng);

    let mut result = Vec::with_capacity(parts);
    let mut remaining = units;
    for (i, weight) in weights.iter().take(parts - 1).enumerate() {
        // Leave at least one unit for each part still to come.
        let reserved = (parts - 1 - i) as u128;
        let share = (units as f64 * weight) as u128;
        let share = share.clamp(1, remaining - reserved);
        result.push(Amount::from_base_units(share));
        remaining -= share;
    }
    result.push(Amount::from_base_units(remaining));

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sum(parts: &[Amount]) -> u128 {
        parts.iter().map(|a| a.base_units()).sum()
    }

    #[test]
    fn test_split_sums_exactly() {
        let total: Amount = "100.123456789012345678".parse().unwrap();
        for _ in 0..50 {
            let parts = split_amount(total, DEFAULT_SPLIT_PARTS).unwrap();
            assert_eq!(parts.len(), DEFAULT_SPLIT_PARTS);
            assert_eq!(sum(&parts), total.base_units());
            assert!(parts.iter().all(|p| !p.is_zero()));
        }
    }

    #[test]
    fn test_split_single_part() {
        let total: Amount = "5".parse().unwrap();
        assert_eq!(split_amount(total, 1).unwrap(), vec![total]);
    }

    #[test]
    fn test_split_zero_parts() {
        let total: Amount = "5".parse().unwrap();
        assert_eq!(split_amount(total, 0), Err(SplitError::ZeroParts));
    }

    #[test]
    fn test_split_minimum_units() {
        let total = Amount::from_base_units(4);
        let parts = split_amount(total, 4).unwrap();
        assert!(parts.iter().all(|p| p.base_units() == 1));
    }

    #[test]
    fn test_split_too_small() {
        let total = Amount::from_base_units(3);
        assert_eq!(split_amount(total, 4), Err(SplitError::AmountTooSmall(4)));
    }

    #[test]
    fn test_split_seeded_is_reproducible() {
        let total: Amount = "10".parse().unwrap();
        let a = split_amount_with_rng(total, 4, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = split_amount_with_rng(total, 4, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
    }
}
