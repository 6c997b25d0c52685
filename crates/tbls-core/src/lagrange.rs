//! Lagrange interpolation at x = 0 over the BLS12-381 scalar field

use std::collections::BTreeSet;

use blstrs::{G1Projective, G2Projective, Scalar};
use ff::Field;
use group::Group;

use crate::bls::scalar_from_id;
use crate::{Error, PartyId, Result};

/// Compute λ_i = Π_{j≠i} x_j / (x_j − x_i) for every index in `ids`.
pub fn lagrange_coefficients_at_zero(ids: &[PartyId]) -> Result<Vec<Scalar>> {
    if ids.is_empty() {
        return Err(Error::InvalidInput("empty index set".into()));
    }
    let mut seen = BTreeSet::new();
    for id in ids {
        if !seen.insert(*id) {
            return Err(Error::DuplicatePartyId(*id));
        }
    }

    let xs = ids
        .iter()
        .map(|id| scalar_from_id(*id))
        .collect::<Result<Vec<_>>>()?;

    let mut coeffs = Vec::with_capacity(xs.len());
    for (i, x_i) in xs.iter().enumerate() {
        let mut num = Scalar::ONE;
        let mut den = Scalar::ONE;
        for (j, x_j) in xs.iter().enumerate() {
            if i == j {
                continue;
            }
            num *= x_j;
            den *= x_j - x_i;
        }
        let den_inv = Option::<Scalar>::from(den.invert())
            .ok_or_else(|| Error::Internal("non-invertible Lagrange denominator".into()))?;
        coeffs.push(num * den_inv);
    }
    Ok(coeffs)
}

/// Interpolate G1 values (partial signatures) at zero
pub fn combine_g1_at_zero(ids: &[PartyId], values: &[G1Projective]) -> Result<G1Projective> {
    if ids.len() != values.len() {
        return Err(Error::LengthMismatch {
            signatures: values.len(),
            indices: ids.len(),
        });
    }
    let coeffs = lagrange_coefficients_at_zero(ids)?;
    let mut acc = G1Projective::identity();
    for (coeff, value) in coeffs.iter().zip(values) {
        acc += value * coeff;
    }
    Ok(acc)
}

/// Interpolate G2 values (public shares) at zero
pub fn combine_g2_at_zero(ids: &[PartyId], values: &[G2Projective]) -> Result<G2Projective> {
    if ids.len() != values.len() {
        return Err(Error::LengthMismatch {
            signatures: values.len(),
            indices: ids.len(),
        });
    }
    let coeffs = lagrange_coefficients_at_zero(ids)?;
    let mut acc = G2Projective::identity();
    for (coeff, value) in coeffs.iter().zip(values) {
        acc += value * coeff;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bls::eval_poly;

    fn poly() -> Vec<Scalar> {
        vec![Scalar::from(42u64), Scalar::from(3u64), Scalar::from(19u64)]
    }

    #[test]
    fn test_reconstructs_constant_term() {
        let coeffs = poly();
        for ids in [[1u16, 2, 3], [2, 4, 5], [7, 1, 3]] {
            let lambdas = lagrange_coefficients_at_zero(&ids).unwrap();
            let mut secret = Scalar::ZERO;
            for (id, lambda) in ids.iter().zip(&lambdas) {
                secret += eval_poly(&coeffs, &scalar_from_id(*id).unwrap()) * lambda;
            }
            assert_eq!(secret, Scalar::from(42u64));
        }
    }

    #[test]
    fn test_combine_in_the_exponent() {
        let coeffs = poly();
        let ids = [1u16, 3, 5];
        let values: Vec<G2Projective> = ids
            .iter()
            .map(|id| G2Projective::generator() * eval_poly(&coeffs, &scalar_from_id(*id).unwrap()))
            .collect();

        let combined = combine_g2_at_zero(&ids, &values).unwrap();
        assert_eq!(combined, G2Projective::generator() * Scalar::from(42u64));
    }

    #[test]
    fn test_rejects_bad_index_sets() {
        assert!(matches!(
            lagrange_coefficients_at_zero(&[]),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(
            lagrange_coefficients_at_zero(&[1, 2, 1]),
            Err(Error::DuplicatePartyId(1))
        );
        assert_eq!(
            lagrange_coefficients_at_zero(&[0, 2]),
            Err(Error::InvalidPartyId(0))
        );
        assert!(matches!(
            combine_g1_at_zero(&[1, 2], &[G1Projective::generator()]),
            Err(Error::LengthMismatch { signatures: 1, indices: 2 })
        ));
    }
}
