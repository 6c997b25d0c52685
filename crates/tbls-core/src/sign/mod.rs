//! Partial signing
//!
//! A party turns its installed share and a 32-byte digest into a partial
//! signature `H(digest)^{s_i}`. No network traffic is involved.

use std::sync::{Arc, RwLock};

use blstrs::G2Projective;
use group::Group;
use tracing::{debug, info, instrument, warn};

use crate::bls::{g2_to_bytes, hash_to_g1, G2_LEN};
use crate::types::{validate_members, Params, PartialSignature, ShareData, DIGEST_LEN};
use crate::{Error, PartyId, Result};

#[derive(Default)]
struct SignerState {
    params: Option<Params>,
    share: Option<Arc<ShareData>>,
}

/// Holds the local share and produces partial signatures
pub struct Signer {
    party_id: PartyId,
    state: RwLock<SignerState>,
}

impl Signer {
    pub fn new(party_id: PartyId) -> Self {
        Self {
            party_id,
            state: RwLock::new(SignerState::default()),
        }
    }

    pub fn party_id(&self) -> PartyId {
        self.party_id
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, SignerState>> {
        self.state
            .read()
            .map_err(|_| Error::Internal("signer lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, SignerState>> {
        self.state
            .write()
            .map_err(|_| Error::Internal("signer lock poisoned".into()))
    }

    /// Fix the party set this signer belongs to
    pub fn init(&self, members: &[PartyId], threshold: usize) -> Result<()> {
        validate_members(members)?;
        if !members.contains(&self.party_id) {
            return Err(Error::InvalidConfig(format!(
                "party {} is not a member",
                self.party_id
            )));
        }
        let params = Params::new(members.len(), threshold)?;

        let mut state = self.write()?;
        if state.params.is_some() {
            return Err(Error::InvalidState("signer already initialised".into()));
        }
        state.params = Some(params);
        Ok(())
    }

    /// Install the share produced by key generation.
    ///
    /// Nothing changes unless the share decodes and belongs to this party.
    #[instrument(skip(self, bytes), fields(party_id = self.party_id))]
    pub fn set_share_data(&self, bytes: &[u8]) -> Result<()> {
        let share = ShareData::from_bytes(bytes)?;
        if share.party_id != self.party_id {
            return Err(Error::InvalidShare(format!(
                "share belongs to party {}",
                share.party_id
            )));
        }
        if G2Projective::generator() * share.secret != share.public_share(self.party_id)? {
            return Err(Error::InvalidShare(
                "secret does not match its public share".into(),
            ));
        }

        let mut state = self.write()?;
        let params = state
            .params
            .ok_or_else(|| Error::InvalidState("signer not initialised".into()))?;
        if share.params.n != params.n {
            return Err(Error::InvalidShare(format!(
                "share is for {} parties, signer has {}",
                share.params.n, params.n
            )));
        }
        if share.params.t != params.t {
            warn!(
                configured = params.t,
                share = share.params.t,
                "Share threshold differs from the configured one"
            );
        }

        info!(n = share.params.n, t = share.params.t, "Share installed");
        state.share = Some(Arc::new(share));
        Ok(())
    }

    fn share(&self) -> Result<Arc<ShareData>> {
        self.read()?
            .share
            .clone()
            .ok_or_else(|| Error::InvalidState("no share installed".into()))
    }

    /// Partial signature over a digest.
    ///
    /// # Arguments
    /// * `digest` - Message hash to sign (32 bytes)
    ///
    /// # Returns
    /// `H(digest)^{s_i}` tagged with this party's id
    pub fn sign(&self, digest: &[u8]) -> Result<PartialSignature> {
        if digest.len() != DIGEST_LEN {
            return Err(Error::InvalidInput(format!(
                "digest must be {DIGEST_LEN} bytes, got {}",
                digest.len()
            )));
        }
        let share = self.share()?;
        debug!(party_id = self.party_id, "Signing digest");
        Ok(PartialSignature {
            party_id: self.party_id,
            point: hash_to_g1(digest) * share.secret,
        })
    }

    /// Encoded threshold public key of the installed share
    pub fn threshold_pk(&self) -> Result<Vec<u8>> {
        Ok(self.share()?.threshold_public_key().to_bytes())
    }

    /// Verification key of `party` from the installed share
    pub fn public_share(&self, party: PartyId) -> Result<[u8; G2_LEN]> {
        Ok(g2_to_bytes(&self.share()?.public_share(party)?))
    }

    pub fn share_data(&self) -> Option<Arc<ShareData>> {
        self.read().ok().and_then(|state| state.share.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::deal;
    use crate::types::digest;

    fn signer_with_share(party: PartyId) -> (Signer, Vec<crate::types::ShareBytes>) {
        let shares = deal(3, 2);
        let signer = Signer::new(party);
        signer.init(&[1, 2, 3], 2).unwrap();
        signer
            .set_share_data(shares[party as usize - 1].as_bytes())
            .unwrap();
        (signer, shares)
    }

    #[test]
    fn test_requires_share() {
        let signer = Signer::new(1);
        signer.init(&[1, 2, 3], 2).unwrap();
        assert!(matches!(
            signer.sign(&digest(b"msg")),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(signer.threshold_pk(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_requires_init() {
        let shares = deal(3, 2);
        let signer = Signer::new(1);
        assert!(matches!(
            signer.set_share_data(shares[0].as_bytes()),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_rejects_bad_digest_length() {
        let (signer, _) = signer_with_share(1);
        assert!(matches!(
            signer.sign(&[0u8; 31]),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_corrupted_share_leaves_state_untouched() {
        let (signer, shares) = signer_with_share(2);
        let msg = digest(b"hello");
        let before = signer.sign(&msg).unwrap();
        let pk_before = signer.threshold_pk().unwrap();

        let good = shares[1].as_bytes().to_vec();
        let mut wrong_version = good.clone();
        wrong_version[0] ^= 0xff;
        let mut wrong_scheme = good.clone();
        wrong_scheme[1] = 7;
        let mut bad_secret = good.clone();
        bad_secret[8] ^= 0x01;

        for bad in [
            wrong_version,
            wrong_scheme,
            bad_secret,
            good[..good.len() - 1].to_vec(),
            shares[0].as_bytes().to_vec(),
            deal(4, 2)[1].as_bytes().to_vec(),
        ] {
            assert!(matches!(
                signer.set_share_data(&bad),
                Err(Error::InvalidShare(_))
            ));
        }

        assert_eq!(signer.sign(&msg).unwrap(), before);
        assert_eq!(signer.threshold_pk().unwrap(), pk_before);
    }

    #[test]
    fn test_concurrent_signing_is_deterministic() {
        let (signer, _) = signer_with_share(3);
        let msg = digest(b"concurrent");
        let expected = signer.sign(&msg).unwrap().to_bytes();

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| signer.sign(&msg).unwrap().to_bytes()))
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), expected);
            }
        });
    }

    #[test]
    fn test_public_share_lookup() {
        let (signer, _) = signer_with_share(1);
        assert!(signer.public_share(3).is_ok());
        assert_eq!(signer.public_share(4), Err(Error::InvalidPartyId(4)));
        assert_eq!(signer.share_data().unwrap().party_id, 1);
    }
}
