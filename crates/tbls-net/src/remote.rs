//! Outbound side: one lazily dialled link per remote party

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tbls_core::{Outbound, PartyId};
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::channel::{client_config, SecureChannel};
use crate::config::ChannelConfig;
use crate::error::{AuthError, NetError, Result};
use crate::handshake::{AuthFunc, Handshake};
use crate::identity::Certificate;
use crate::wire::WireMessage;

/// Address book entry for one remote party
#[derive(Clone)]
pub struct PartyConnectionConfig {
    pub id: PartyId,
    /// `host:port`
    pub endpoint: String,
    /// Certificate the remote listener must present
    pub certificate: Certificate,
    /// Signs our side of the handshake
    pub auth: AuthFunc,
}

impl fmt::Debug for PartyConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartyConnectionConfig")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("certificate", &self.certificate)
            .finish_non_exhaustive()
    }
}

/// Queue to a background task that owns the connection to one party.
///
/// The connection is made on first use and re-made after a failure. Each
/// frame is written at most once; frames queued while the party is
/// unreachable are dropped.
pub struct RemoteParty {
    id: PartyId,
    queue: mpsc::Sender<Vec<u8>>,
}

impl RemoteParty {
    /// Must be called inside a tokio runtime
    pub fn new(config: PartyConnectionConfig, channel: ChannelConfig) -> Self {
        let (queue, rx) = mpsc::channel(channel.queue_capacity);
        let id = config.id;
        tokio::spawn(run_link(config, channel, rx));
        Self { id, queue }
    }

    pub fn id(&self) -> PartyId {
        self.id
    }

    pub fn send(&self, frame: Vec<u8>) -> Result<()> {
        self.queue.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => NetError::Channel(format!("queue to party {} is full", self.id)),
            TrySendError::Closed(_) => NetError::Closed,
        })
    }
}

async fn run_link(
    config: PartyConnectionConfig,
    channel_config: ChannelConfig,
    mut rx: mpsc::Receiver<Vec<u8>>,
) {
    let tls = match client_config() {
        Ok(tls) => tls,
        Err(e) => {
            warn!(party = config.id, error = %e, "TLS setup failed, link disabled");
            return;
        }
    };
    let mut link: Option<SecureChannel<TlsStream<TcpStream>>> = None;

    while let Some(frame) = rx.recv().await {
        if link.is_none() {
            match dial(&config, &channel_config, tls.clone()).await {
                Ok(channel) => link = Some(channel),
                Err(e) => {
                    warn!(party = config.id, error = %e, "Dial failed, dropping message");
                    continue;
                }
            }
        }
        if let Some(channel) = link.as_mut() {
            if let Err(e) = channel.send_frame(&frame).await {
                warn!(party = config.id, error = %e, "Send failed, closing link");
                link = None;
            }
        }
    }
    debug!(party = config.id, "Link closed");
}

#[instrument(skip_all, fields(party = config.id, endpoint = %config.endpoint))]
async fn dial(
    config: &PartyConnectionConfig,
    channel_config: &ChannelConfig,
    tls: Arc<ClientConfig>,
) -> Result<SecureChannel<TlsStream<TcpStream>>> {
    let stream = connect_with_retries(&config.endpoint, channel_config).await?;
    let channel = timeout(
        channel_config.handshake_timeout,
        handshake(stream, tls, config, channel_config),
    )
    .await
    .map_err(|_| NetError::Timeout(format!("handshake with {}", config.endpoint)))??;
    info!("Link established");
    Ok(channel)
}

async fn connect_with_retries(endpoint: &str, config: &ChannelConfig) -> Result<TcpStream> {
    let mut attempt = 0;
    loop {
        match timeout(config.connect_timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Ok(Err(e)) if attempt < config.connect_retries => {
                debug!(attempt, error = %e, "Connect failed, retrying");
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) if attempt < config.connect_retries => {
                debug!(attempt, "Connect timed out, retrying");
            }
            Err(_) => return Err(NetError::Timeout(format!("connect to {endpoint}"))),
        }
        attempt += 1;
        tokio::time::sleep(config.retry_backoff).await;
    }
}

/// Our handshake first, then the listener's, checked against the
/// configured certificate
async fn handshake(
    stream: TcpStream,
    tls: Arc<ClientConfig>,
    config: &PartyConnectionConfig,
    channel_config: &ChannelConfig,
) -> Result<SecureChannel<TlsStream<TcpStream>>> {
    let mut channel = SecureChannel::connect(stream, tls).await?;

    let ours = (config.auth)(channel.binding())?;
    channel.send_frame(&ours.to_bytes()?).await?;

    let reply = Handshake::from_bytes(&channel.recv_frame().await?)?;
    let certificate = reply.verify(
        channel.binding(),
        Utc::now().timestamp(),
        channel_config.max_clock_skew,
    )?;
    if certificate != config.certificate {
        return Err(AuthError::CertificateMismatch {
            expected: config.certificate.to_hex(),
            actual: certificate.to_hex(),
        }
        .into());
    }
    Ok(channel)
}

/// Links to every other party; the transport's [`Outbound`] implementation
pub struct RemoteParties {
    local: PartyId,
    links: BTreeMap<PartyId, RemoteParty>,
}

impl RemoteParties {
    /// Must be called inside a tokio runtime. Entries for `local` are skipped.
    pub fn new(local: PartyId, parties: Vec<PartyConnectionConfig>, channel: ChannelConfig) -> Self {
        let links = parties
            .into_iter()
            .filter(|p| p.id != local)
            .map(|p| (p.id, RemoteParty::new(p, channel.clone())))
            .collect();
        Self { local, links }
    }

    pub fn parties(&self) -> Vec<PartyId> {
        self.links.keys().copied().collect()
    }
}

impl Outbound for RemoteParties {
    fn send(
        &self,
        msg_type: u8,
        topic: &str,
        payload: &[u8],
        to: &[PartyId],
    ) -> tbls_core::Result<()> {
        let frame = WireMessage {
            msg_type,
            topic: topic.to_string(),
            from: self.local,
            payload: payload.to_vec(),
        }
        .to_bytes()?;

        for party in to {
            match self.links.get(party) {
                Some(link) => {
                    if let Err(e) = link.send(frame.clone()) {
                        warn!(party, error = %e, "Message not queued");
                    }
                }
                None => warn!(party, "No link to party"),
            }
        }
        Ok(())
    }
}
