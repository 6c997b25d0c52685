//! Inbound side: accept, authenticate and forward peer traffic

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tbls_core::{MembershipDirectory, Message, PartyId};
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_rustls::server::TlsStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::channel::{server_config, SecureChannel};
use crate::config::ChannelConfig;
use crate::error::{AuthError, NetError, Result};
use crate::handshake::Handshake;
use crate::identity::{Certificate, Identity};
use crate::wire::WireMessage;

/// Bound TCP listener carrying the local identity and its TLS certificate
pub struct Listener {
    tcp: TcpListener,
    tls: Arc<ServerConfig>,
    identity: Arc<Identity>,
    config: ChannelConfig,
}

impl Listener {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    pub fn certificate(&self) -> Certificate {
        self.identity.certificate()
    }
}

pub async fn listen<A: ToSocketAddrs>(address: A, identity: Arc<Identity>) -> Result<Listener> {
    listen_with_config(address, identity, ChannelConfig::default()).await
}

pub async fn listen_with_config<A: ToSocketAddrs>(
    address: A,
    identity: Arc<Identity>,
    config: ChannelConfig,
) -> Result<Listener> {
    let tls = server_config()?;
    let tcp = TcpListener::bind(address).await?;
    info!(
        addr = %tcp.local_addr()?,
        certificate = %identity.certificate(),
        "Listening"
    );
    Ok(Listener {
        tcp,
        tls,
        identity,
        config,
    })
}

/// Stops the accept loop and every connection it spawned.
///
/// Dropping the handle stops the service as well.
pub struct StopHandle {
    stop: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Serve authenticated peers; their messages arrive on the returned stream
/// in per-peer order.
pub fn service_connections(
    listener: Listener,
    directory: Arc<MembershipDirectory>,
) -> (mpsc::Receiver<Message>, StopHandle) {
    let (tx, rx) = mpsc::channel(listener.config.inbound_capacity);
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(accept_loop(listener, directory, tx, stop_rx));
    (rx, StopHandle { stop: stop_tx })
}

async fn accept_loop(
    listener: Listener,
    directory: Arc<MembershipDirectory>,
    tx: mpsc::Sender<Message>,
    mut stop: watch::Receiver<bool>,
) {
    let Listener {
        tcp,
        tls,
        identity,
        config,
    } = listener;

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            accepted = tcp.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, error = %e, "set_nodelay failed");
                    }
                    tokio::spawn(serve_connection(
                        stream,
                        peer,
                        tls.clone(),
                        identity.clone(),
                        directory.clone(),
                        config.clone(),
                        tx.clone(),
                        stop.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "Accept failed"),
            }
        }
    }
    debug!("Listener stopped");
}

/// TLS, then the dialer's handshake, then ours
async fn authenticate(
    stream: TcpStream,
    tls: Arc<ServerConfig>,
    identity: &Identity,
    directory: &MembershipDirectory,
    config: &ChannelConfig,
) -> Result<(SecureChannel<TlsStream<TcpStream>>, PartyId)> {
    let mut channel = SecureChannel::accept(stream, tls).await?;

    let frame = channel.recv_frame().await?;
    let handshake = Handshake::from_bytes(&frame)?;
    let certificate =
        handshake.verify(channel.binding(), Utc::now().timestamp(), config.max_clock_skew)?;
    let party = directory
        .party_of(&certificate.universal_id())
        .ok_or_else(|| AuthError::UnknownCertificate(certificate.to_hex()))?;

    let reply = Handshake::now(identity, channel.binding());
    channel.send_frame(&reply.to_bytes()?).await?;
    Ok((channel, party))
}

#[instrument(skip_all, fields(%peer))]
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Arc<ServerConfig>,
    identity: Arc<Identity>,
    directory: Arc<MembershipDirectory>,
    config: ChannelConfig,
    tx: mpsc::Sender<Message>,
    mut stop: watch::Receiver<bool>,
) {
    let authenticated = timeout(
        config.handshake_timeout,
        authenticate(stream, tls, &identity, &directory, &config),
    )
    .await;
    let (mut channel, party) = match authenticated {
        Ok(Ok(accepted)) => accepted,
        Ok(Err(e)) => {
            warn!(error = %e, "Rejected connection");
            return;
        }
        Err(_) => {
            warn!("Handshake timed out");
            return;
        }
    };
    info!(party, "Peer authenticated");

    loop {
        let frame = tokio::select! {
            _ = stop.changed() => break,
            frame = channel.recv_frame() => frame,
        };
        let wire = match frame.and_then(|f| WireMessage::from_bytes(&f)) {
            Ok(wire) => wire,
            Err(NetError::Closed) => {
                debug!(party, "Peer closed connection");
                break;
            }
            Err(e) => {
                warn!(party, error = %e, "Dropping connection");
                break;
            }
        };
        if wire.from != party {
            warn!(party, claimed = wire.from, "Sender mismatch, dropping connection");
            break;
        }
        if tx.send(wire.into_message()).await.is_err() {
            debug!("Inbound stream closed");
            break;
        }
    }
}
