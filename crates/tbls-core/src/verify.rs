//! Signature aggregation and verification

use std::collections::BTreeSet;

use blstrs::{G1Projective, G2Projective};
use group::Group;
use tracing::{debug, instrument};

use crate::bls::{g1_from_bytes, g2_from_bytes, hash_to_g1, pairing};
use crate::lagrange::combine_g1_at_zero;
use crate::types::{PartialSignature, Signature, ThresholdPublicKey, DIGEST_LEN};
use crate::{Error, PartyId, Result};

/// Combines partial signatures and checks signatures against the group key.
///
/// Holds no secrets and no locks; one verifier can serve any number of
/// threads.
#[derive(Debug, Clone)]
pub struct Verifier {
    public_key: ThresholdPublicKey,
}

impl Verifier {
    pub fn new(threshold_pk: &[u8]) -> Result<Self> {
        Ok(Self {
            public_key: ThresholdPublicKey::from_bytes(threshold_pk)?,
        })
    }

    pub fn from_public_key(public_key: ThresholdPublicKey) -> Self {
        Self { public_key }
    }

    pub fn public_key(&self) -> &ThresholdPublicKey {
        &self.public_key
    }

    pub fn threshold(&self) -> usize {
        self.public_key.params.t as usize
    }

    fn validate_indices(&self, signatures: usize, indices: &[PartyId]) -> Result<()> {
        if signatures != indices.len() {
            return Err(Error::LengthMismatch {
                signatures,
                indices: indices.len(),
            });
        }
        if indices.len() < self.threshold() {
            return Err(Error::ThresholdNotMet {
                required: self.threshold(),
                actual: indices.len(),
            });
        }
        let mut seen = BTreeSet::new();
        for index in indices {
            if !seen.insert(*index) {
                return Err(Error::DuplicatePartyId(*index));
            }
        }
        if let Some(bad) = indices.iter().find(|i| !self.public_key.params.contains(**i)) {
            return Err(Error::InvalidPartyId(*bad));
        }
        Ok(())
    }

    /// Lagrange-combine encoded partial signatures.
    ///
    /// All input checks (lengths, quorum, duplicates, index range) run before
    /// any point is decoded.
    ///
    /// # Arguments
    /// * `signatures` - Compressed G1 partial signatures
    /// * `indices` - Party id of each signature, in the same order
    ///
    /// # Returns
    /// The group signature. It still has to be checked with
    /// [`Verifier::verify`].
    #[instrument(skip_all, fields(count = signatures.len()))]
    pub fn aggregate_signatures<S: AsRef<[u8]>>(
        &self,
        signatures: &[S],
        indices: &[PartyId],
    ) -> Result<Signature> {
        self.validate_indices(signatures.len(), indices)?;

        let points = signatures
            .iter()
            .zip(indices)
            .map(|(sig, index)| {
                g1_from_bytes(sig.as_ref()).map_err(|e| {
                    Error::InvalidInput(format!("partial signature of party {index}: {e}"))
                })
            })
            .collect::<Result<Vec<G1Projective>>>()?;

        let combined = combine_g1_at_zero(indices, &points)?;
        debug!(parties = ?indices, "Aggregated partial signatures");
        Ok(Signature(combined))
    }

    /// Same as [`Verifier::aggregate_signatures`] for decoded partials
    pub fn aggregate(&self, partials: &[PartialSignature]) -> Result<Signature> {
        let indices: Vec<PartyId> = partials.iter().map(|p| p.party_id).collect();
        self.validate_indices(partials.len(), &indices)?;
        let points: Vec<G1Projective> = partials.iter().map(|p| p.point).collect();
        Ok(Signature(combine_g1_at_zero(&indices, &points)?))
    }

    /// Check `e(sig, g2) == e(H(digest), pk)`.
    ///
    /// # Arguments
    /// * `digest` - Message hash that was signed (32 bytes)
    /// * `signature` - Compressed G1 group signature
    ///
    /// # Returns
    /// `Ok(())` for a valid signature, [`Error::InvalidSignature`] otherwise
    pub fn verify(&self, digest: &[u8], signature: &[u8]) -> Result<()> {
        check_digest(digest)?;
        let sig = g1_from_bytes(signature).map_err(|e| Error::InvalidInput(e.to_string()))?;
        verify_point(digest, &sig, &self.public_key.point)
    }

    /// Check one party's partial signature against its public share
    pub fn verify_partial(
        &self,
        digest: &[u8],
        partial: &PartialSignature,
        public_share: &[u8],
    ) -> Result<()> {
        check_digest(digest)?;
        if !self.public_key.params.contains(partial.party_id) {
            return Err(Error::InvalidPartyId(partial.party_id));
        }
        let key = g2_from_bytes(public_share).map_err(|e| Error::InvalidInput(e.to_string()))?;
        verify_point(digest, &partial.point, &key)
    }
}

fn check_digest(digest: &[u8]) -> Result<()> {
    if digest.len() != DIGEST_LEN {
        return Err(Error::InvalidInput(format!(
            "digest must be {DIGEST_LEN} bytes, got {}",
            digest.len()
        )));
    }
    Ok(())
}

fn verify_point(digest: &[u8], sig: &G1Projective, key: &G2Projective) -> Result<()> {
    if bool::from(sig.is_identity()) || bool::from(key.is_identity()) {
        return Err(Error::InvalidSignature);
    }
    let lhs = pairing(sig, &G2Projective::generator());
    let rhs = pairing(&hash_to_g1(digest), key);
    if lhs == rhs {
        Ok(())
    } else {
        Err(Error::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::Signer;
    use crate::test_support::deal;
    use crate::types::{digest, ShareData};

    struct Fixture {
        signers: Vec<Signer>,
        verifier: Verifier,
    }

    fn fixture(n: u16, t: u16) -> Fixture {
        let shares = deal(n, t);
        let members: Vec<PartyId> = (1..=n).collect();
        let signers: Vec<Signer> = shares
            .iter()
            .enumerate()
            .map(|(i, share)| {
                let signer = Signer::new(i as PartyId + 1);
                signer.init(&members, t as usize).unwrap();
                signer.set_share_data(share.as_bytes()).unwrap();
                signer
            })
            .collect();
        let verifier = Verifier::new(&signers[0].threshold_pk().unwrap()).unwrap();
        Fixture { signers, verifier }
    }

    fn partials(g: &Fixture, ids: &[PartyId], msg: &[u8]) -> Vec<[u8; 48]> {
        ids.iter()
            .map(|id| g.signers[*id as usize - 1].sign(msg).unwrap().signature_bytes())
            .collect()
    }

    #[test]
    fn test_every_quorum_yields_the_same_valid_signature() {
        let g = fixture(3, 2);
        let msg = digest(b"threshold");
        let mut produced = Vec::new();
        for ids in [[1u16, 2], [1, 3], [2, 3], [3, 1]] {
            let sig = g
                .verifier
                .aggregate_signatures(&partials(&g, &ids, &msg), &ids)
                .unwrap();
            g.verifier.verify(&msg, &sig.to_bytes()).unwrap();
            produced.push(sig.to_bytes());
        }
        let all = partials(&g, &[1, 2, 3], &msg);
        let sig = g.verifier.aggregate_signatures(&all, &[1, 2, 3]).unwrap();
        produced.push(sig.to_bytes());

        assert!(produced.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_signature_and_share_survive_reencoding() {
        let g = fixture(5, 3);
        let msg = digest(b"re-encoded");
        let ids = [2u16, 4, 5];
        let sig = g
            .verifier
            .aggregate_signatures(&partials(&g, &ids, &msg), &ids)
            .unwrap();

        let decoded = Signature::from_bytes(&sig.to_bytes()).unwrap();
        assert_eq!(decoded, sig);
        g.verifier.verify(&msg, &decoded.to_bytes()).unwrap();
        assert!(Signature::from_bytes(&sig.to_bytes()[..47]).is_err());

        // a share installed from its re-encoded bytes signs identically
        let original = g.signers[3].share_data().unwrap();
        let reencoded = ShareData::from_bytes(original.to_bytes().as_bytes())
            .unwrap()
            .to_bytes();
        assert_eq!(reencoded, original.to_bytes());

        let members: Vec<PartyId> = (1..=5).collect();
        let restored = Signer::new(4);
        restored.init(&members, 3).unwrap();
        restored.set_share_data(reencoded.as_bytes()).unwrap();
        assert_eq!(
            restored.sign(&msg).unwrap(),
            g.signers[3].sign(&msg).unwrap()
        );
        assert_eq!(
            restored.threshold_pk().unwrap(),
            g.signers[3].threshold_pk().unwrap()
        );
    }

    #[test]
    fn test_under_quorum_is_rejected() {
        let g = fixture(5, 3);
        let msg = digest(b"quorum");
        let ids = [2u16, 4];
        let sigs = partials(&g, &ids, &msg);

        assert_eq!(
            g.verifier.aggregate_signatures(&sigs, &ids).unwrap_err(),
            Error::ThresholdNotMet {
                required: 3,
                actual: 2
            }
        );

        // interpolating t - 1 points anyway does not give a valid signature
        let points: Vec<G1Projective> = sigs.iter().map(|s| g1_from_bytes(s).unwrap()).collect();
        let forged = Signature(combine_g1_at_zero(&ids, &points).unwrap());
        assert_eq!(
            g.verifier.verify(&msg, &forged.to_bytes()),
            Err(Error::InvalidSignature)
        );
    }

    #[test]
    fn test_aggregation_validation_errors() {
        let g = fixture(3, 2);
        let msg = digest(b"validation");
        let sigs = partials(&g, &[1, 2, 3], &msg);

        assert_eq!(
            g.verifier
                .aggregate_signatures(&sigs[..2], &[1, 2, 3])
                .unwrap_err(),
            Error::LengthMismatch {
                signatures: 2,
                indices: 3
            }
        );
        assert_eq!(
            g.verifier
                .aggregate_signatures(&sigs[..1], &[1])
                .unwrap_err(),
            Error::ThresholdNotMet {
                required: 2,
                actual: 1
            }
        );
        assert_eq!(
            g.verifier
                .aggregate_signatures(&sigs[..2], &[2, 2])
                .unwrap_err(),
            Error::DuplicatePartyId(2)
        );
        assert_eq!(
            g.verifier
                .aggregate_signatures(&sigs[..2], &[1, 4])
                .unwrap_err(),
            Error::InvalidPartyId(4)
        );
        assert_eq!(
            g.verifier
                .aggregate_signatures(&sigs[..2], &[0, 1])
                .unwrap_err(),
            Error::InvalidPartyId(0)
        );

        // validation happens before any point is decoded
        let garbage = vec![vec![0u8; 3]; 2];
        assert!(g
            .verifier
            .aggregate_signatures(&garbage, &[1, 1])
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_single_byte_tampering_is_rejected() {
        let g = fixture(3, 2);
        let msg = digest(b"tamper");
        let ids = [1u16, 3];
        let sig = g
            .verifier
            .aggregate_signatures(&partials(&g, &ids, &msg), &ids)
            .unwrap()
            .to_bytes();

        for byte in 0..sig.len() {
            for bit in [0x01u8, 0x80] {
                let mut tampered = sig;
                tampered[byte] ^= bit;
                assert!(g.verifier.verify(&msg, &tampered).is_err());
            }
        }

        let mut other = msg;
        other[0] ^= 1;
        assert_eq!(g.verifier.verify(&other, &sig), Err(Error::InvalidSignature));
    }

    #[test]
    fn test_wrong_quorum_signature_fails() {
        let g = fixture(3, 2);
        let msg = digest(b"mix");
        let sigs = partials(&g, &[1, 2], &msg);
        // indices swapped: each partial interpolated at the wrong point
        let sig = g.verifier.aggregate_signatures(&sigs, &[2, 1]).unwrap();
        assert_eq!(
            g.verifier.verify(&msg, &sig.to_bytes()),
            Err(Error::InvalidSignature)
        );
    }

    #[test]
    fn test_verify_partial_and_aggregate() {
        let g = fixture(3, 2);
        let msg = digest(b"partials");
        let signed: Vec<PartialSignature> = g.signers.iter().map(|s| s.sign(&msg).unwrap()).collect();

        for partial in &signed {
            let key = g.signers[0].public_share(partial.party_id).unwrap();
            g.verifier.verify_partial(&msg, partial, &key).unwrap();
        }
        let wrong_key = g.signers[0].public_share(1).unwrap();
        assert_eq!(
            g.verifier.verify_partial(&msg, &signed[1], &wrong_key),
            Err(Error::InvalidSignature)
        );

        let sig = g.verifier.aggregate(&signed[1..]).unwrap();
        g.verifier.verify(&msg, &sig.to_bytes()).unwrap();

        let decoded = PartialSignature::from_bytes(&signed[0].to_bytes()).unwrap();
        assert_eq!(decoded, signed[0]);
    }

    #[test]
    fn test_verifier_input_checks() {
        assert!(Verifier::new(&[0u8; 10]).is_err());

        let g = fixture(3, 2);
        assert!(matches!(
            g.verifier.verify(&[0u8; 16], &[0u8; 48]),
            Err(Error::InvalidInput(_))
        ));
        assert!(g.verifier.verify(&digest(b"x"), &[0u8; 47]).is_err());

        let share = ShareData::from_bytes(deal(3, 2)[0].as_bytes()).unwrap();
        let round_trip = Verifier::new(&share.threshold_public_key().to_bytes()).unwrap();
        assert_eq!(round_trip.threshold(), 2);
    }
}
