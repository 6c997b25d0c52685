//! Trusted-dealer shares and logging for unit tests

use blstrs::{G2Projective, Scalar};
use group::Group;
use rand::rngs::OsRng;

use crate::bls::{eval_commitment, eval_poly, scalar_from_id, scalar_random};
use crate::types::{Params, ShareBytes, ShareData};

/// Shares of one random polynomial of degree `t - 1`, indexed by party - 1
pub(crate) fn deal(n: u16, t: u16) -> Vec<ShareBytes> {
    let coeffs: Vec<Scalar> = (0..t).map(|_| scalar_random(&mut OsRng)).collect();
    let commitments: Vec<G2Projective> = coeffs
        .iter()
        .map(|c| G2Projective::generator() * c)
        .collect();
    let public_shares: Vec<G2Projective> = (1..=n)
        .map(|j| eval_commitment(&commitments, &scalar_from_id(j).unwrap()))
        .collect();

    (1..=n)
        .map(|party_id| {
            ShareData {
                party_id,
                params: Params { n, t },
                secret: eval_poly(&coeffs, &scalar_from_id(party_id).unwrap()),
                group_public_key: commitments[0],
                public_shares: public_shares.clone(),
            }
            .to_bytes()
        })
        .collect()
}

/// Route tracing output to the test harness; `RUST_LOG` picks the level
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
