//! DKG protocol implementation

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use blstrs::{G2Projective, Scalar};
use ff::Field;
use group::Group;
use rand::rngs::OsRng;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn, Level};

use super::messages::{DkgMessage, DKG_TOPIC, MSG_TYPE_DKG};
use super::DkgPhase;
use crate::bls::{
    eval_commitment, eval_poly, g2_from_bytes, g2_to_bytes, scalar_from_bytes, scalar_from_id,
    scalar_random, scalar_to_bytes,
};
use crate::mpc::{MessageHandler, Outbound};
use crate::types::{validate_members, Message, Params, ShareBytes, ShareData};
use crate::{Error, PartyId, Result};

fn protocol_error(party: PartyId, reason: impl Into<String>) -> Error {
    Error::VerificationFailed {
        party,
        reason: reason.into(),
    }
}

/// Static parameters supplied by `init`
struct Setup {
    members: Vec<PartyId>,
    threshold: usize,
    outbound: Arc<dyn Outbound>,
}

/// View of the setup handed to the per-run logic
struct Ctx<'a> {
    me: PartyId,
    members: &'a [PartyId],
    outbound: &'a dyn Outbound,
}

impl Ctx<'_> {
    fn others(&self) -> Vec<PartyId> {
        self.members
            .iter()
            .copied()
            .filter(|p| *p != self.me)
            .collect()
    }

    fn send(&self, msg: &DkgMessage, to: &[PartyId]) -> Result<()> {
        if to.is_empty() {
            return Ok(());
        }
        let payload = msg.to_payload()?;
        self.outbound.send(MSG_TYPE_DKG, DKG_TOPIC, &payload, to)
    }

    fn broadcast(&self, msg: &DkgMessage) -> Result<()> {
        self.send(msg, &self.others())
    }
}

enum Progress {
    Pending,
    Committed,
    Complete(ShareBytes),
}

/// State of one key generation run, created when `keygen` starts
struct Run {
    params: Params,
    /// dealer -> (encoded, decoded) commitments
    commitments: BTreeMap<PartyId, (Vec<Vec<u8>>, Vec<G2Projective>)>,
    /// dealer -> (encoded, decoded) share addressed to us
    shares: BTreeMap<PartyId, (Vec<u8>, Scalar)>,
    /// recipient -> encoded share we dealt, kept to answer complaints
    dealt: BTreeMap<PartyId, Vec<u8>>,
    /// (dealer, accuser) -> whether a valid justification was seen
    complaints: BTreeMap<(PartyId, PartyId), bool>,
    /// (dealer, accuser) -> revealed share
    justifications: BTreeMap<(PartyId, PartyId), (Vec<u8>, Scalar)>,
    /// party -> acknowledged transcript
    acks: BTreeMap<PartyId, Vec<u8>>,
    verified: bool,
    transcript: Option<[u8; 32]>,
}

impl Run {
    fn new(params: Params) -> Self {
        Self {
            params,
            commitments: BTreeMap::new(),
            shares: BTreeMap::new(),
            dealt: BTreeMap::new(),
            complaints: BTreeMap::new(),
            justifications: BTreeMap::new(),
            acks: BTreeMap::new(),
            verified: false,
            transcript: None,
        }
    }

    /// Sample our polynomial, broadcast its commitments and send every
    /// member its evaluation.
    fn deal(&mut self, ctx: &Ctx<'_>) -> Result<()> {
        debug!("DKG Round 1: Deal");
        let t = self.params.t as usize;
        let coeffs: Vec<Scalar> = (0..t).map(|_| scalar_random(&mut OsRng)).collect();
        let points: Vec<G2Projective> = coeffs
            .iter()
            .map(|c| G2Projective::generator() * c)
            .collect();
        let encoded: Vec<Vec<u8>> = points.iter().map(|p| g2_to_bytes(p).to_vec()).collect();

        if tracing::enabled!(Level::DEBUG) {
            debug!(
                dealer = ctx.me,
                constant_term = %hex::encode(&encoded[0]),
                "Dealt commitment"
            );
        }

        ctx.broadcast(&DkgMessage::Commitment {
            dealer: ctx.me,
            coefficients: encoded.clone(),
        })?;

        for recipient in ctx.members {
            let value = eval_poly(&coeffs, &scalar_from_id(*recipient)?);
            let bytes = scalar_to_bytes(&value).to_vec();
            if *recipient == ctx.me {
                self.shares.insert(ctx.me, (bytes, value));
                continue;
            }
            ctx.send(
                &DkgMessage::Share {
                    dealer: ctx.me,
                    recipient: *recipient,
                    value: bytes.clone(),
                },
                &[*recipient],
            )?;
            self.dealt.insert(*recipient, bytes);
        }

        self.commitments.insert(ctx.me, (encoded, points));
        Ok(())
    }

    fn process(&mut self, ctx: &Ctx<'_>, msg: Message) -> Result<()> {
        let from = msg.from;
        if from == ctx.me || !ctx.members.contains(&from) {
            return Err(protocol_error(from, "sender is not a remote member"));
        }
        if msg.msg_type != MSG_TYPE_DKG || msg.topic != DKG_TOPIC {
            return Err(protocol_error(
                from,
                format!("unexpected message type {} on {}", msg.msg_type, msg.topic),
            ));
        }

        let dkg = DkgMessage::from_payload(&msg.payload)
            .map_err(|e| protocol_error(from, format!("undecodable payload: {e}")))?;
        if dkg.claimed_sender() != from {
            return Err(protocol_error(
                from,
                format!(
                    "{} claims to come from party {}",
                    dkg.kind(),
                    dkg.claimed_sender()
                ),
            ));
        }
        debug!(from, kind = dkg.kind(), "DKG message");

        match dkg {
            DkgMessage::Commitment { coefficients, .. } => self.on_commitment(from, coefficients),
            DkgMessage::Share {
                recipient, value, ..
            } => self.on_share(ctx, from, recipient, value),
            DkgMessage::Complaint { dealer, reason, .. } => {
                self.on_complaint(ctx, from, dealer, &reason)
            }
            DkgMessage::Justification { accuser, value, .. } => {
                self.on_justification(ctx, from, accuser, value)
            }
            DkgMessage::Ack { transcript, .. } => self.on_ack(from, transcript),
        }
    }

    fn on_commitment(&mut self, from: PartyId, coefficients: Vec<Vec<u8>>) -> Result<()> {
        if let Some((seen, _)) = self.commitments.get(&from) {
            return if *seen == coefficients {
                Ok(())
            } else {
                Err(protocol_error(from, "conflicting commitments"))
            };
        }

        let t = self.params.t as usize;
        if coefficients.len() != t {
            return Err(protocol_error(
                from,
                format!("expected {t} coefficients, got {}", coefficients.len()),
            ));
        }
        let points = coefficients
            .iter()
            .map(|c| g2_from_bytes(c))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| protocol_error(from, format!("invalid commitment: {e}")))?;

        if tracing::enabled!(Level::DEBUG) {
            debug!(
                dealer = from,
                constant_term = %hex::encode(&coefficients[0]),
                "Commitment received"
            );
        }
        self.commitments.insert(from, (coefficients, points));
        Ok(())
    }

    fn on_share(
        &mut self,
        ctx: &Ctx<'_>,
        from: PartyId,
        recipient: PartyId,
        value: Vec<u8>,
    ) -> Result<()> {
        if recipient != ctx.me {
            return Err(protocol_error(
                from,
                format!("share addressed to party {recipient}"),
            ));
        }
        if let Some((seen, _)) = self.shares.get(&from) {
            return if *seen == value {
                Ok(())
            } else {
                Err(protocol_error(from, "conflicting shares"))
            };
        }
        let scalar = scalar_from_bytes(&value)
            .map_err(|e| protocol_error(from, format!("invalid share: {e}")))?;
        self.shares.insert(from, (value, scalar));
        Ok(())
    }

    /// Record an accusation; if it names us, reveal the share we dealt the
    /// accuser so every party can check it against our commitment.
    fn on_complaint(
        &mut self,
        ctx: &Ctx<'_>,
        from: PartyId,
        dealer: PartyId,
        reason: &str,
    ) -> Result<()> {
        if dealer == from || !ctx.members.contains(&dealer) {
            return Err(protocol_error(
                from,
                format!("complaint against party {dealer}"),
            ));
        }
        if self.complaints.contains_key(&(dealer, from)) {
            return Ok(());
        }
        warn!(accuser = from, dealer, reason, "Complaint received");

        if dealer != ctx.me {
            self.complaints.insert((dealer, from), false);
            return Ok(());
        }
        let value = self
            .dealt
            .get(&from)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no share dealt to party {from}")))?;
        ctx.broadcast(&DkgMessage::Justification {
            dealer: ctx.me,
            accuser: from,
            value,
        })?;
        self.complaints.insert((dealer, from), true);
        Ok(())
    }

    fn on_justification(
        &mut self,
        ctx: &Ctx<'_>,
        from: PartyId,
        accuser: PartyId,
        value: Vec<u8>,
    ) -> Result<()> {
        if accuser == from || !ctx.members.contains(&accuser) {
            return Err(protocol_error(
                from,
                format!("justification for party {accuser}"),
            ));
        }
        if let Some((seen, _)) = self.justifications.get(&(from, accuser)) {
            return if *seen == value {
                Ok(())
            } else {
                Err(protocol_error(from, "conflicting justifications"))
            };
        }
        let scalar = scalar_from_bytes(&value)
            .map_err(|e| protocol_error(from, format!("invalid justification: {e}")))?;
        self.justifications.insert((from, accuser), (value, scalar));
        Ok(())
    }

    /// Check every revealed share we can against its dealer's commitment.
    /// A bad reveal convicts the dealer; a good one settles the complaint,
    /// and if we were the accuser the revealed value becomes our share.
    fn resolve(&mut self, ctx: &Ctx<'_>) -> Result<()> {
        for (&(dealer, accuser), resolved) in self.complaints.iter_mut() {
            if *resolved {
                continue;
            }
            let (Some((_, points)), Some((bytes, value))) = (
                self.commitments.get(&dealer),
                self.justifications.get(&(dealer, accuser)),
            ) else {
                continue;
            };
            let x = scalar_from_id(accuser)?;
            if G2Projective::generator() * value != eval_commitment(points, &x) {
                return Err(protocol_error(
                    dealer,
                    format!("justification for party {accuser} does not match commitment"),
                ));
            }
            debug!(dealer, accuser, "Complaint resolved");
            if accuser == ctx.me {
                self.shares.insert(dealer, (bytes.clone(), *value));
            }
            *resolved = true;
        }
        Ok(())
    }

    /// First open complaint whose dealer committed but never answered
    fn unanswered_complaint(&self) -> Option<(PartyId, PartyId)> {
        self.complaints
            .iter()
            .find(|(key, resolved)| {
                !**resolved
                    && self.commitments.contains_key(&key.0)
                    && !self.justifications.contains_key(*key)
            })
            .map(|(key, _)| *key)
    }

    fn on_ack(&mut self, from: PartyId, transcript: Vec<u8>) -> Result<()> {
        if let Some(seen) = self.acks.get(&from) {
            return if *seen == transcript {
                Ok(())
            } else {
                Err(protocol_error(from, "conflicting acknowledgements"))
            };
        }
        self.acks.insert(from, transcript);
        Ok(())
    }

    /// Move the run forward as far as the collected messages allow
    fn advance(&mut self, ctx: &Ctx<'_>) -> Result<Progress> {
        let n = self.params.n as usize;
        let mut progress = Progress::Pending;
        self.resolve(ctx)?;

        if self.transcript.is_none() {
            if self.commitments.len() < n || self.shares.len() < n {
                return Ok(progress);
            }

            if !self.verified {
                debug!("DKG Round 2: Verify");
                self.verified = true;
                let x = scalar_from_id(ctx.me)?;
                let mut disputed = Vec::new();
                for (dealer, (_, points)) in &self.commitments {
                    let (_, share) = self.shares.get(dealer).ok_or_else(|| {
                        Error::Internal(format!("missing share of dealer {dealer}"))
                    })?;
                    if G2Projective::generator() * share != eval_commitment(points, &x) {
                        disputed.push(*dealer);
                    }
                }
                for dealer in disputed {
                    warn!(dealer, "Share does not match commitment, complaining");
                    self.complaints.insert((dealer, ctx.me), false);
                    ctx.broadcast(&DkgMessage::Complaint {
                        accuser: ctx.me,
                        dealer,
                        reason: "share does not match commitment".into(),
                    })?;
                }
                self.resolve(ctx)?;
            }
            let waiting = self
                .complaints
                .iter()
                .any(|(&(_, accuser), resolved)| accuser == ctx.me && !resolved);
            if waiting {
                return Ok(progress);
            }

            debug!("DKG Round 3: Acknowledge");
            let transcript = self.transcript_hash();
            ctx.broadcast(&DkgMessage::Ack {
                party: ctx.me,
                transcript: transcript.to_vec(),
            })?;
            self.transcript = Some(transcript);
            progress = Progress::Committed;
        }

        let Some(transcript) = self.transcript else {
            return Ok(progress);
        };
        for (party, theirs) in &self.acks {
            if theirs.as_slice() != transcript.as_slice() {
                return Err(protocol_error(*party, "transcript mismatch"));
            }
        }
        if self.acks.len() + 1 < n || self.complaints.values().any(|resolved| !resolved) {
            return Ok(progress);
        }

        debug!("DKG Round 4: Finalize");
        Ok(Progress::Complete(self.finalize(ctx.me)?))
    }

    /// BLAKE3 over (n, t, every dealer's commitments in dealer order)
    fn transcript_hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"tbls-dkg-transcript-v1");
        hasher.update(&self.params.n.to_be_bytes());
        hasher.update(&self.params.t.to_be_bytes());
        for (dealer, (encoded, _)) in &self.commitments {
            hasher.update(&dealer.to_be_bytes());
            for coefficient in encoded {
                hasher.update(coefficient);
            }
        }
        *hasher.finalize().as_bytes()
    }

    fn finalize(&self, me: PartyId) -> Result<ShareBytes> {
        let t = self.params.t as usize;
        let secret = self
            .shares
            .values()
            .fold(Scalar::ZERO, |acc, (_, share)| acc + share);

        let mut aggregate = vec![G2Projective::identity(); t];
        for (_, points) in self.commitments.values() {
            for (acc, point) in aggregate.iter_mut().zip(points) {
                *acc += point;
            }
        }

        let share = ShareData {
            party_id: me,
            params: self.params,
            secret,
            group_public_key: aggregate[0],
            public_shares: public_shares(&aggregate, self.params.n)?,
        };
        if G2Projective::generator() * share.secret != share.public_share(me)? {
            return Err(Error::Internal(
                "secret share does not match its public share".into(),
            ));
        }
        Ok(share.to_bytes())
    }
}

#[cfg(feature = "multi-thread")]
fn public_shares(aggregate: &[G2Projective], n: u16) -> Result<Vec<G2Projective>> {
    use rayon::prelude::*;

    (1..=n)
        .into_par_iter()
        .map(|j| Ok(eval_commitment(aggregate, &scalar_from_id(j)?)))
        .collect()
}

#[cfg(not(feature = "multi-thread"))]
fn public_shares(aggregate: &[G2Projective], n: u16) -> Result<Vec<G2Projective>> {
    (1..=n)
        .map(|j| Ok(eval_commitment(aggregate, &scalar_from_id(j)?)))
        .collect()
}

struct State {
    phase: DkgPhase,
    setup: Option<Setup>,
    buffered: Vec<Message>,
    run: Option<Run>,
    output: Option<ShareBytes>,
}

/// Drives one key generation run for the local party.
///
/// `handle_message` and `keygen` may be called concurrently; all state
/// changes happen under a single lock and the phase is published on a watch
/// channel the `keygen` future waits on.
pub struct DkgCoordinator {
    party_id: PartyId,
    state: Mutex<State>,
    phase_tx: watch::Sender<DkgPhase>,
}

impl DkgCoordinator {
    pub fn new(party_id: PartyId) -> Self {
        let (phase_tx, _) = watch::channel(DkgPhase::Idle);
        Self {
            party_id,
            state: Mutex::new(State {
                phase: DkgPhase::Idle,
                setup: None,
                buffered: Vec::new(),
                run: None,
                output: None,
            }),
            phase_tx,
        }
    }

    pub fn party_id(&self) -> PartyId {
        self.party_id
    }

    pub fn phase(&self) -> DkgPhase {
        self.phase_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DkgPhase> {
        self.phase_tx.subscribe()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("DKG state lock poisoned".into()))
    }

    fn set_phase(&self, state: &mut State, phase: DkgPhase) {
        debug!(party_id = self.party_id, ?phase, "DKG phase change");
        state.phase = phase.clone();
        self.phase_tx.send_replace(phase);
    }

    /// Mark the run failed unless it already ended; returns `error`
    fn fail(&self, state: &mut State, error: Error) -> Error {
        if !state.phase.is_terminal() {
            warn!(party_id = self.party_id, error = %error, "DKG failed");
            state.run = None;
            state.buffered.clear();
            self.set_phase(state, DkgPhase::Failed(error.clone()));
        }
        error
    }

    fn apply(&self, state: &mut State, progress: Progress) {
        match progress {
            Progress::Pending => {}
            Progress::Committed => {
                if state.phase == DkgPhase::Collecting {
                    self.set_phase(state, DkgPhase::Committed);
                }
            }
            Progress::Complete(share) => {
                info!(party_id = self.party_id, "DKG complete");
                state.output = Some(share);
                state.run = None;
                self.set_phase(state, DkgPhase::Complete);
            }
        }
    }

    /// Fix the member set and threshold: Idle -> Collecting.
    ///
    /// # Arguments
    /// * `members` - Party ids taking part, including this party
    /// * `threshold` - Signers needed to produce a group signature
    /// * `outbound` - Transport used for every message of the run
    #[instrument(skip(self, members, outbound), fields(party_id = self.party_id))]
    pub fn init(
        &self,
        members: &[PartyId],
        threshold: usize,
        outbound: Arc<dyn Outbound>,
    ) -> Result<()> {
        let mut state = self.lock()?;
        if state.phase != DkgPhase::Idle {
            return Err(Error::InvalidState(format!(
                "cannot initialise DKG in phase {:?}",
                state.phase
            )));
        }
        validate_members(members)?;
        if !members.contains(&self.party_id) {
            return Err(Error::InvalidConfig(format!(
                "party {} is not a member",
                self.party_id
            )));
        }
        Params::new(members.len(), threshold)?;

        let mut members = members.to_vec();
        members.sort_unstable();
        info!(n = members.len(), threshold, "DKG initialised");
        state.setup = Some(Setup {
            members,
            threshold,
            outbound,
        });
        self.set_phase(&mut state, DkgPhase::Collecting);
        Ok(())
    }

    /// Feed one inbound DKG message
    pub fn handle_message(&self, msg: Message) -> Result<()> {
        let mut state = self.lock()?;
        match state.phase {
            DkgPhase::Idle => {
                return Err(Error::InvalidState("DKG not initialised".into()));
            }
            DkgPhase::Complete | DkgPhase::Failed(_) => {
                debug!(from = msg.from, "Ignoring message after DKG ended");
                return Ok(());
            }
            DkgPhase::Collecting | DkgPhase::Committed => {}
        }

        if state.run.is_none() {
            debug!(from = msg.from, "Buffering DKG message until keygen starts");
            state.buffered.push(msg);
            return Ok(());
        }

        self.step(&mut state, msg)
            .map_err(|e| self.fail(&mut state, e))
    }

    fn step(&self, state: &mut State, msg: Message) -> Result<()> {
        let setup = state
            .setup
            .as_ref()
            .ok_or_else(|| Error::Internal("DKG running without setup".into()))?;
        let run = state
            .run
            .as_mut()
            .ok_or_else(|| Error::Internal("no active DKG run".into()))?;
        let ctx = Ctx {
            me: self.party_id,
            members: &setup.members,
            outbound: setup.outbound.as_ref(),
        };

        run.process(&ctx, msg)?;
        let progress = run.advance(&ctx)?;
        self.apply(state, progress);
        Ok(())
    }

    fn start(&self, n: usize, t: usize) -> Result<()> {
        let mut state = self.lock()?;
        if state.phase != DkgPhase::Collecting || state.run.is_some() {
            return Err(Error::InvalidState(format!(
                "cannot start keygen in phase {:?}",
                state.phase
            )));
        }
        self.deal(&mut state, n, t)
            .map_err(|e| self.fail(&mut state, e))
    }

    fn deal(&self, state: &mut State, n: usize, t: usize) -> Result<()> {
        let setup = state
            .setup
            .as_ref()
            .ok_or_else(|| Error::Internal("DKG running without setup".into()))?;
        if n != setup.members.len() {
            return Err(Error::InvalidConfig(format!(
                "keygen for {n} parties but {} members configured",
                setup.members.len()
            )));
        }
        let params = Params::new(n, t)?;
        if t != setup.threshold {
            warn!(
                configured = setup.threshold,
                t, "Threshold passed to keygen overrides the configured one"
            );
        }
        info!(party_id = self.party_id, n, t, "Starting DKG");

        let ctx = Ctx {
            me: self.party_id,
            members: &setup.members,
            outbound: setup.outbound.as_ref(),
        };
        let mut run = Run::new(params);
        run.deal(&ctx)?;
        for msg in std::mem::take(&mut state.buffered) {
            run.process(&ctx, msg)?;
        }
        let progress = run.advance(&ctx)?;

        state.run = Some(run);
        self.apply(state, progress);
        Ok(())
    }

    /// Run key generation until it completes, fails or `deadline` passes.
    ///
    /// Dropping the returned future cancels the run.
    ///
    /// # Arguments
    /// * `deadline` - Instant after which the run fails with a timeout, or
    ///   blames a dealer that left a complaint unanswered
    /// * `n` - Number of parties; must match the members given to `init`
    /// * `t` - Threshold for this run; overrides the one given to `init`
    ///
    /// # Returns
    /// The encoded share of this party. It is not installed anywhere.
    #[instrument(skip(self), fields(party_id = self.party_id))]
    pub async fn keygen(&self, deadline: Instant, n: usize, t: usize) -> Result<ShareBytes> {
        let mut phase_rx = self.phase_tx.subscribe();
        self.start(n, t)?;

        let mut guard = CancelOnDrop {
            coordinator: self,
            armed: true,
        };
        let timed_out = match tokio::time::timeout_at(
            deadline,
            phase_rx.wait_for(DkgPhase::is_terminal),
        )
        .await
        {
            Ok(Ok(_)) => false,
            Ok(Err(_)) => return Err(Error::Internal("phase channel closed".into())),
            Err(_) => true,
        };
        guard.armed = false;

        let mut state = self.lock()?;
        if timed_out {
            let error = state
                .run
                .as_ref()
                .and_then(Run::unanswered_complaint)
                .map(|(dealer, accuser)| {
                    protocol_error(
                        dealer,
                        format!("no justification for complaint by party {accuser}"),
                    )
                })
                .unwrap_or_else(|| Error::Timeout("key generation".into()));
            self.fail(&mut state, error);
        }
        match &state.phase {
            DkgPhase::Complete => state
                .output
                .clone()
                .ok_or_else(|| Error::Internal("completed without output".into())),
            DkgPhase::Failed(e) => Err(e.clone()),
            other => Err(Error::Internal(format!("keygen woke in phase {other:?}"))),
        }
    }
}

impl MessageHandler for DkgCoordinator {
    fn handle_message(&self, msg: Message) -> Result<()> {
        DkgCoordinator::handle_message(self, msg)
    }
}

/// Fails the run when the `keygen` future is dropped before it finished
struct CancelOnDrop<'a> {
    coordinator: &'a DkgCoordinator,
    armed: bool,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut state) = self.coordinator.state.lock() {
            self.coordinator.fail(&mut state, Error::Cancelled);
        }
    }
}
