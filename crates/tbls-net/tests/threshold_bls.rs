//! Threshold BLS parties talking over real TCP connections

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tbls_core::{digest, MembershipDirectory, Message, PartialSignature, PartyId, Tbls, Verifier};
use tbls_net::{
    auth_with, listen, service_connections, ChannelConfig, Identity, PartyConnectionConfig,
    RemoteParties, RemoteParty, StopHandle, WireMessage,
};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

const N: u16 = 3;
const T: usize = 2;

struct Node {
    id: PartyId,
    identity: Arc<Identity>,
    endpoint: String,
    inbound: mpsc::Receiver<Message>,
    _stop: StopHandle,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn directory(identities: &[Arc<Identity>]) -> Arc<MembershipDirectory> {
    let members: BTreeMap<_, _> = identities
        .iter()
        .enumerate()
        .map(|(i, identity)| (identity.universal_id(), i as PartyId + 1))
        .collect();
    Arc::new(MembershipDirectory::new(members, identities.len()).unwrap())
}

async fn start_nodes(n: u16) -> Vec<Node> {
    let identities: Vec<Arc<Identity>> = (0..n).map(|_| Arc::new(Identity::generate())).collect();
    let directory = directory(&identities);

    let mut nodes = Vec::new();
    for (i, identity) in identities.into_iter().enumerate() {
        let listener = listen("127.0.0.1:0", identity.clone()).await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        let (inbound, stop) = service_connections(listener, directory.clone());
        nodes.push(Node {
            id: i as PartyId + 1,
            identity,
            endpoint,
            inbound,
            _stop: stop,
        });
    }
    nodes
}

fn address_book(nodes: &[Node], auth_as: &Arc<Identity>) -> Vec<PartyConnectionConfig> {
    nodes
        .iter()
        .map(|node| PartyConnectionConfig {
            id: node.id,
            endpoint: node.endpoint.clone(),
            certificate: node.identity.certificate(),
            auth: auth_with(auth_as.clone()),
        })
        .collect()
}

fn frame(from: PartyId, payload: &[u8]) -> Vec<u8> {
    WireMessage {
        msg_type: 9,
        topic: "test".into(),
        from,
        payload: payload.to_vec(),
    }
    .to_bytes()
    .unwrap()
}

async fn assert_silent(inbound: &mut mpsc::Receiver<Message>) {
    match timeout(Duration::from_millis(500), inbound.recv()).await {
        Err(_) | Ok(None) => {}
        Ok(Some(msg)) => panic!("unexpected delivery from party {}", msg.from),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_keygen_and_sign_over_tcp() {
    init_tracing();
    let nodes = start_nodes(N).await;
    let members: Vec<PartyId> = nodes.iter().map(|n| n.id).collect();

    let mut parties = Vec::new();
    let mut stops = Vec::new();
    for node in &nodes {
        let outbound = RemoteParties::new(
            node.id,
            address_book(&nodes, &node.identity),
            ChannelConfig::default(),
        );
        let party = Arc::new(Tbls::new(node.id));
        party.init(&members, T, Arc::new(outbound)).unwrap();
        parties.push(party);
    }
    for (node, party) in nodes.into_iter().zip(&parties) {
        tokio::spawn(party.router().run(node.inbound));
        stops.push(node._stop);
    }

    let deadline = Instant::now() + Duration::from_secs(30);
    let handles: Vec<_> = parties
        .iter()
        .cloned()
        .map(|p| tokio::spawn(async move { p.keygen(deadline, N as usize, T).await }))
        .collect();
    for (party, handle) in parties.iter().zip(handles) {
        let share = handle.await.unwrap().unwrap();
        party.set_share_data(share.as_bytes()).unwrap();
    }

    let tpk = parties[0].threshold_pk().unwrap();
    for party in &parties[1..] {
        assert_eq!(party.threshold_pk().unwrap(), tpk);
    }

    let verifier = Verifier::new(&tpk).unwrap();
    let msg = digest(b"signed over tcp");
    let partials: Vec<PartialSignature> = parties.iter().map(|p| p.sign(&msg).unwrap()).collect();
    for (partial, party) in partials.iter().zip(&parties) {
        let share = parties[0].public_share(party.party_id()).unwrap();
        verifier.verify_partial(&msg, partial, &share).unwrap();
    }
    for pair in [[0usize, 1], [0, 2], [1, 2]] {
        let chosen = [partials[pair[0]], partials[pair[1]]];
        let sig = verifier.aggregate(&chosen).unwrap();
        verifier.verify(&msg, &sig.to_bytes()).unwrap();
    }
}

#[tokio::test]
async fn test_authenticated_peer_is_delivered() {
    let mut nodes = start_nodes(2).await;
    let book = address_book(&nodes, &nodes[1].identity);
    let link = RemoteParty::new(book[0].clone(), ChannelConfig::default());

    link.send(frame(2, b"hello")).unwrap();
    let msg = timeout(Duration::from_secs(5), nodes[0].inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.from, 2);
    assert_eq!(msg.topic, "test");
    assert_eq!(msg.payload, b"hello");
}

#[tokio::test]
async fn test_unknown_identity_is_rejected() {
    init_tracing();
    let mut nodes = start_nodes(2).await;
    let intruder = Arc::new(Identity::generate());
    let book = address_book(&nodes, &intruder);
    let link = RemoteParty::new(book[0].clone(), ChannelConfig::default());

    link.send(frame(2, b"let me in")).unwrap();
    assert_silent(&mut nodes[0].inbound).await;
}

#[tokio::test]
async fn test_unexpected_listener_certificate_is_rejected() {
    let mut nodes = start_nodes(2).await;
    let mut book = address_book(&nodes, &nodes[1].identity);
    book[0].certificate = Identity::generate().certificate();
    let link = RemoteParty::new(book[0].clone(), ChannelConfig::default());

    link.send(frame(2, b"wrong server")).unwrap();
    assert_silent(&mut nodes[0].inbound).await;
}

#[tokio::test]
async fn test_spoofed_sender_drops_connection() {
    init_tracing();
    let mut nodes = start_nodes(3).await;
    let book = address_book(&nodes, &nodes[1].identity);
    let link = RemoteParty::new(book[0].clone(), ChannelConfig::default());

    link.send(frame(3, b"pretending")).unwrap();
    assert_silent(&mut nodes[0].inbound).await;
}

#[tokio::test]
async fn test_stopped_listener_refuses_traffic() {
    let mut nodes = start_nodes(2).await;
    let book = address_book(&nodes, &nodes[1].identity);
    let Node { inbound, _stop, .. } = nodes.remove(0);
    let mut inbound = inbound;
    _stop.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let quick = ChannelConfig {
        connect_retries: 0,
        ..ChannelConfig::default()
    };
    let link = RemoteParty::new(book[0].clone(), quick);
    link.send(frame(2, b"too late")).unwrap();
    assert_silent(&mut inbound).await;
}
