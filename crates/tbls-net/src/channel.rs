//! TLS point-to-point channel
//!
//! Listeners present a self-signed certificate generated at bind time. That
//! certificate only keys the TLS session: the dialer accepts any server
//! certificate and both peers are identified afterwards by the signed
//! handshake over the session's exported keying material. Frames are
//! `u32be length | body`.

use std::sync::Arc;

use rcgen::CertifiedKey;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, ServerConfig, SignatureScheme};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::{client, server, TlsAcceptor, TlsConnector};
use tracing::trace;

use crate::error::{NetError, Result};

/// Largest body carried in one frame
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Length of the exported channel binding
pub const BINDING_LEN: usize = 32;

const EXPORTER_LABEL: &[u8] = b"EXPORTER-tbls-net-channel-binding";

/// Name carried in listener certificates and sent as SNI
const SERVER_NAME: &str = "tbls-party";

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// TLS 1.3 server configuration with a fresh self-signed certificate
pub fn server_config() -> Result<Arc<ServerConfig>> {
    let CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec![SERVER_NAME.to_string()])
            .map_err(|e| NetError::Channel(format!("certificate generation: {e}")))?;
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let config = ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(vec![cert.der().clone()], key)?;
    Ok(Arc::new(config))
}

/// TLS 1.3 client configuration that defers peer identity to the handshake
pub fn client_config() -> Result<Arc<ClientConfig>> {
    let provider = provider();
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(HandshakeBoundVerifier { provider }))
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Accepts any server certificate but still checks that the server holds its
/// key. Identity comes from the signed handshake bound to this session.
#[derive(Debug)]
struct HandshakeBoundVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for HandshakeBoundVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

pub struct SecureChannel<S> {
    stream: S,
    binding: [u8; BINDING_LEN],
}

impl<IO> SecureChannel<client::TlsStream<IO>>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    /// Dialer side of the TLS handshake
    pub async fn connect(stream: IO, config: Arc<ClientConfig>) -> Result<Self> {
        let name = ServerName::try_from(SERVER_NAME)
            .map_err(|e| NetError::Channel(format!("server name: {e}")))?;
        let tls = TlsConnector::from(config).connect(name, stream).await?;
        let binding = tls
            .get_ref()
            .1
            .export_keying_material([0u8; BINDING_LEN], EXPORTER_LABEL, None)?;
        trace!("TLS session established as dialer");
        Ok(Self {
            stream: tls,
            binding,
        })
    }
}

impl<IO> SecureChannel<server::TlsStream<IO>>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    /// Listener side of the TLS handshake
    pub async fn accept(stream: IO, config: Arc<ServerConfig>) -> Result<Self> {
        let tls = TlsAcceptor::from(config).accept(stream).await?;
        let binding = tls
            .get_ref()
            .1
            .export_keying_material([0u8; BINDING_LEN], EXPORTER_LABEL, None)?;
        trace!("TLS session established as listener");
        Ok(Self {
            stream: tls,
            binding,
        })
    }
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Keying material exported from this TLS session; signed in the handshake
    pub fn binding(&self) -> &[u8; BINDING_LEN] {
        &self.binding
    }

    pub async fn send_frame(&mut self, body: &[u8]) -> Result<()> {
        if body.len() > MAX_FRAME_LEN {
            return Err(NetError::FrameTooLarge(body.len()));
        }
        self.stream
            .write_all(&(body.len() as u32).to_be_bytes())
            .await?;
        self.stream.write_all(body).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Next frame; `NetError::Closed` on end of stream
    pub async fn recv_frame(&mut self) -> Result<Vec<u8>> {
        let mut len = [0u8; 4];
        match self.stream.read_exact(&mut len).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(NetError::Closed)
            }
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len) as usize;
        if len > MAX_FRAME_LEN {
            return Err(NetError::FrameTooLarge(len));
        }
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await?;
        Ok(body)
    }
}
