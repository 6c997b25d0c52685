//! The threshold BLS party: key generation plus signing behind one handle

use std::sync::Arc;

use tokio::time::Instant;

use crate::bls::G2_LEN;
use crate::keygen::{DkgCoordinator, DkgPhase, DKG_TOPIC};
use crate::mpc::{MessageHandler, Outbound, TopicRouter};
use crate::sign::Signer;
use crate::types::{Message, PartialSignature, SchemeKind, ShareBytes};
use crate::{PartyId, Result};

/// One party of a BLS12-381 threshold group
pub struct Tbls {
    party_id: PartyId,
    coordinator: DkgCoordinator,
    signer: Signer,
}

impl Tbls {
    pub fn new(party_id: PartyId) -> Self {
        Self {
            party_id,
            coordinator: DkgCoordinator::new(party_id),
            signer: Signer::new(party_id),
        }
    }

    pub fn scheme(&self) -> SchemeKind {
        SchemeKind::Bls12381MinSig
    }

    pub fn party_id(&self) -> PartyId {
        self.party_id
    }

    pub fn init(
        &self,
        members: &[PartyId],
        threshold: usize,
        outbound: Arc<dyn Outbound>,
    ) -> Result<()> {
        self.coordinator.init(members, threshold, outbound)?;
        self.signer.init(members, threshold)
    }

    pub fn handle_message(&self, msg: Message) -> Result<()> {
        self.coordinator.handle_message(msg)
    }

    /// See [`DkgCoordinator::keygen`]
    pub async fn keygen(&self, deadline: Instant, n: usize, t: usize) -> Result<ShareBytes> {
        self.coordinator.keygen(deadline, n, t).await
    }

    pub fn dkg_phase(&self) -> DkgPhase {
        self.coordinator.phase()
    }

    pub fn set_share_data(&self, bytes: &[u8]) -> Result<()> {
        self.signer.set_share_data(bytes)
    }

    pub fn sign(&self, digest: &[u8]) -> Result<PartialSignature> {
        self.signer.sign(digest)
    }

    pub fn threshold_pk(&self) -> Result<Vec<u8>> {
        self.signer.threshold_pk()
    }

    pub fn public_share(&self, party: PartyId) -> Result<[u8; G2_LEN]> {
        self.signer.public_share(party)
    }

    /// Router delivering DKG traffic to this party
    pub fn router(self: &Arc<Self>) -> TopicRouter {
        TopicRouter::new().route(DKG_TOPIC, self.clone())
    }
}

impl MessageHandler for Tbls {
    fn handle_message(&self, msg: Message) -> Result<()> {
        Tbls::handle_message(self, msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc::MemoryTransport;
    use crate::test_support::init_tracing;
    use crate::types::digest;
    use crate::verify::Verifier;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_keygen_sign_verify_in_memory() {
        init_tracing();
        let transport = MemoryTransport::new();
        let members = [1u16, 2, 3];
        let parties: Vec<Arc<Tbls>> = members
            .iter()
            .map(|id| {
                let party = Arc::new(Tbls::new(*id));
                party
                    .init(&members, 2, Arc::new(transport.outbound(*id)))
                    .unwrap();
                tokio::spawn(party.router().run(transport.register(*id)));
                party
            })
            .collect();

        let deadline = Instant::now() + Duration::from_secs(30);
        let handles: Vec<_> = parties
            .iter()
            .cloned()
            .map(|p| tokio::spawn(async move { p.keygen(deadline, 3, 2).await }))
            .collect();
        for (party, handle) in parties.iter().zip(handles) {
            let share = handle.await.unwrap().unwrap();
            party.set_share_data(share.as_bytes()).unwrap();
            assert_eq!(party.dkg_phase(), DkgPhase::Complete);
        }

        let tpk = parties[0].threshold_pk().unwrap();
        for party in &parties[1..] {
            assert_eq!(party.threshold_pk().unwrap(), tpk);
        }

        let verifier = Verifier::new(&tpk).unwrap();
        let msg = digest(b"in-memory round trip");
        let partials: Vec<PartialSignature> =
            parties.iter().map(|p| p.sign(&msg).unwrap()).collect();
        for pair in [[0usize, 1], [0, 2], [1, 2]] {
            let chosen = [partials[pair[0]], partials[pair[1]]];
            let sig = verifier.aggregate(&chosen).unwrap();
            verifier.verify(&msg, &sig.to_bytes()).unwrap();
        }
    }

    #[test]
    fn test_scheme_tag() {
        let party = Tbls::new(1);
        assert_eq!(party.scheme(), SchemeKind::Bls12381MinSig);
        assert_eq!(party.dkg_phase(), DkgPhase::Idle);
    }
}
