//! # TBLS Net
//!
//! Mutually authenticated, encrypted transport between threshold BLS
//! parties.
//!
//! Every connection starts with a TLS 1.3 session whose exported keying
//! material is the channel binding. The dialer then sends a handshake
//! signed with its identity over that binding; the listener checks it
//! against the membership directory and answers with its own, which the
//! dialer checks against the certificate it expected. Only then do protocol
//! messages flow, one direction per connection.

pub mod channel;
pub mod config;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod listener;
pub mod remote;
pub mod wire;

pub use channel::{client_config, server_config, SecureChannel, BINDING_LEN, MAX_FRAME_LEN};
pub use config::ChannelConfig;
pub use error::{AuthError, NetError, Result};
pub use handshake::{auth_with, AuthFunc, Handshake, MAX_CLOCK_SKEW_SECS};
pub use identity::{Certificate, Identity};
pub use listener::{listen, listen_with_config, service_connections, Listener, StopHandle};
pub use remote::{PartyConnectionConfig, RemoteParties, RemoteParty};
pub use wire::WireMessage;
