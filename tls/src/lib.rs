//! Authenticate a TLS 1.3 client handshake and protect the records that follow.
//!
//! This crate implements the client side of a TLS 1.3 handshake with a single, fixed key-share
//! and a small set of cipher suites. It is concerned with the parts of the protocol that require
//! exact byte accounting: framing the handshake messages, accumulating the handshake transcript,
//! authenticating that transcript with a Finished message, and wrapping every subsequent record in
//! an AEAD-protected envelope.
//!
//! # Design
//!
//! ## Components
//!
//! - [codec]: length-prefixed big-endian fields. Every length is checked against the width of
//!   the field it is written to (a length that does not fit is an error, never a silent rollover).
//! - [hello]: builds the `ClientHello` (and parses the `ServerHello`) from [extension] blocks.
//! - [transcript]: retains the exact bytes of every handshake message sent or received.
//! - [finished]: the keyed MAC over the transcript hash that proves possession of a handshake secret.
//! - [record]: wraps plaintext into a record whose header is also the AEAD associated data.
//! - [Session]: the state machine tying the above together.
//! - [Connection]: drives a [Session] over a transport, enforcing a deadline on each phase.
//!
//! Key exchange ([key_exchange]), secret derivation ([key_schedule]) and the AEAD primitive
//! ([aead]) are consumed through narrow traits. Implementations backed by X25519/P-256, the
//! RFC 8446 HKDF schedule and AES-128-GCM/ChaCha20-Poly1305 are provided.
//!
//! ## Nonces
//!
//! Each direction keeps a sequence counter per traffic key. The nonce of a record is the
//! traffic IV XORed with the (left-padded, big-endian) counter, and the counter advances exactly
//! once per record that was successfully sealed. The counter is never allowed to wrap.
//!
//! ## Failure
//!
//! Any error raised while the handshake is in progress closes the [Session]: encoding errors are
//! raised before bytes reach the transport, transport errors (including short writes) are returned
//! to the caller, and cryptographic errors (including a bad server Finished) are always fatal.
//!
//! # Not Provided
//!
//! - **Certificate Validation**: The server's certificate chain is added to the transcript but
//!   is not verified.
//! - **Negotiation**: A `HelloRetryRequest` is rejected; the client offers one key share.
//! - **Resumption**: Session tickets are accepted and discarded.
//! - **Fragmentation**: Outgoing handshake messages must fit in a single record.
//! - **Alerts**: Alerts received from the server end the connection; none are sent.

#![doc(
    html_logo_url = "https://commonware.xyz/imgs/rustdoc_logo.svg",
    html_favicon_url = "https://commonware.xyz/favicon.ico"
)]

pub mod aead;
pub mod codec;
mod connection;
pub mod extension;
pub mod finished;
pub mod hello;
pub mod key_exchange;
pub mod key_schedule;
pub mod message;
#[cfg(test)]
mod mocks;
mod nonce;
pub mod record;
mod session;
pub mod suite;
pub mod transcript;
pub mod transport;

pub use connection::{connect, Connection, Receiver, Sender};
pub use message::LengthWidth;
pub use session::{Session, State};
pub use suite::{CipherSuite, NamedGroup, ProtocolVersion};

use commonware_codec::Error as CodecError;
use commonware_runtime::Error as RuntimeError;
use std::time::Duration;
use thiserror::Error;

/// Largest record fragment (in bytes) a TLS 1.3 peer may send: 2^14 bytes of plaintext plus
/// 256 bytes of expansion.
pub const MAX_RECORD_SIZE: usize = (1 << 14) + 256;

/// Errors that can occur while building, authenticating, or protecting TLS messages.
#[derive(Error, Debug)]
pub enum Error {
    // Encoding errors
    #[error("{field} length {len} exceeds {max}")]
    LengthOverflow {
        field: &'static str,
        len: usize,
        max: usize,
    },
    #[error("{field} length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch {
        field: &'static str,
        declared: usize,
        actual: usize,
    },
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),

    // Peer errors
    #[error("unexpected end of {0}")]
    UnexpectedEnd(&'static str),
    #[error("malformed message: {0}")]
    Codec(#[from] CodecError),
    #[error("unexpected record: {0}")]
    UnexpectedRecord(u8),
    #[error("unexpected handshake message: {0}")]
    UnexpectedMessage(u8),
    #[error("unsupported cipher suite: {0:#06x}")]
    UnsupportedCipherSuite(u16),
    #[error("unsupported group: {0:#06x}")]
    UnsupportedGroup(u16),
    #[error("unsupported version: {0:#06x}")]
    UnsupportedVersion(u16),
    #[error("hello retry request not supported")]
    HelloRetryRequest,
    #[error("missing extension: {0:#06x}")]
    MissingExtension(u16),
    #[error("illegal parameter: {0}")]
    IllegalParameter(&'static str),
    #[error("record too large: {0} bytes")]
    RecordTooLarge(usize),
    #[error("alert received: {0}")]
    AlertReceived(u8),

    // Transport errors
    #[error("dial failed")]
    DialFailed(RuntimeError),
    #[error("send failed")]
    SendFailed(RuntimeError),
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("recv failed")]
    RecvFailed(RuntimeError),
    #[error("handshake timeout")]
    HandshakeTimeout,

    // Cryptographic errors
    #[error("invalid key length: {0}")]
    InvalidKeyLength(usize),
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("shared secret was not contributory")]
    SharedSecretNotContributory,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("nonce overflow")]
    NonceOverflow,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("invalid finished")]
    InvalidFinished,

    // State errors
    #[error("invalid state: expected {expected:?}, found {actual:?}")]
    InvalidState { expected: State, actual: State },
    #[error("secrets already installed")]
    SecretsAlreadySet,
    #[error("session closed")]
    Closed,
}

/// Broad classification of an [Error].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// A length did not fit its field, or disagreed with the payload it describes.
    Encoding,
    /// The peer sent something malformed or something we did not offer.
    Peer,
    /// The transport failed, accepted fewer bytes than requested, or timed out.
    Transport,
    /// Key agreement, derivation, encryption, or authentication failed.
    Cryptographic,
    /// An operation was attempted out of order or after the session closed.
    State,
}

impl Error {
    /// Returns the [ErrorKind] of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LengthOverflow { .. } | Self::LengthMismatch { .. } | Self::InvalidConfig(_) => {
                ErrorKind::Encoding
            }
            Self::UnexpectedEnd(_)
            | Self::Codec(_)
            | Self::UnexpectedRecord(_)
            | Self::UnexpectedMessage(_)
            | Self::UnsupportedCipherSuite(_)
            | Self::UnsupportedGroup(_)
            | Self::UnsupportedVersion(_)
            | Self::HelloRetryRequest
            | Self::MissingExtension(_)
            | Self::IllegalParameter(_)
            | Self::RecordTooLarge(_)
            | Self::AlertReceived(_) => ErrorKind::Peer,
            Self::DialFailed(_)
            | Self::SendFailed(_)
            | Self::ShortWrite { .. }
            | Self::RecvFailed(_)
            | Self::HandshakeTimeout => ErrorKind::Transport,
            Self::InvalidKeyLength(_)
            | Self::InvalidPublicKey
            | Self::SharedSecretNotContributory
            | Self::KeyDerivation
            | Self::NonceOverflow
            | Self::EncryptionFailed
            | Self::DecryptionFailed
            | Self::InvalidFinished => ErrorKind::Cryptographic,
            Self::InvalidState { .. } | Self::SecretsAlreadySet | Self::Closed => ErrorKind::State,
        }
    }
}

/// Configuration for a client connection.
#[derive(Clone, Debug)]
pub struct Config {
    /// Hostname placed in the Server Name extension.
    pub server_name: String,

    /// Cipher suites offered to the server, in order of preference.
    pub cipher_suites: Vec<CipherSuite>,

    /// Group used for the (single) key share.
    pub key_share: NamedGroup,

    /// Width of the length field in the header of handshake messages we send.
    pub handshake_length: LengthWidth,

    /// Send a dummy `ChangeCipherSpec` record before the client Finished. Some middleboxes
    /// drop connections that do not look like a resumed TLS 1.2 session without it.
    pub middlebox_compat: bool,

    /// Maximum time allowed for each phase of the handshake (sending the hello, waiting for the
    /// server hello, waiting for the server Finished, and sending our Finished).
    pub phase_timeout: Duration,

    /// Maximum size (in bytes) of a record fragment accepted from the server. Prevents memory
    /// exhaustion.
    pub max_record_size: usize,
}

impl Config {
    /// Create a configuration for `server_name` that offers `TLS_AES_128_GCM_SHA256` with an
    /// X25519 key share.
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            cipher_suites: vec![CipherSuite::Aes128GcmSha256],
            key_share: NamedGroup::X25519,
            handshake_length: LengthWidth::Standard,
            middlebox_compat: true,
            phase_timeout: Duration::from_secs(10),
            max_record_size: MAX_RECORD_SIZE,
        }
    }

    /// Ensure the configuration can produce a well-formed `ClientHello` that fits in a single
    /// record.
    pub fn validate(&self) -> Result<(), Error> {
        if self.cipher_suites.is_empty() {
            return Err(Error::InvalidConfig("no cipher suites"));
        }
        for (i, suite) in self.cipher_suites.iter().enumerate() {
            if self.cipher_suites[..i].contains(suite) {
                return Err(Error::InvalidConfig("duplicate cipher suite"));
            }
        }
        let max = hello::max_server_name_length(&self.cipher_suites, self.key_share)?;
        if self.server_name.len() > max {
            return Err(Error::LengthOverflow {
                field: "server name",
                len: self.server_name.len(),
                max,
            });
        }
        if self.max_record_size == 0 || self.max_record_size > codec::U16_MAX {
            return Err(Error::InvalidConfig("max record size out of range"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;

    #[test_traced]
    fn test_default_config_is_valid() {
        let config = Config::new("example.com");
        assert!(config.validate().is_ok());
        assert_eq!(config.cipher_suites, vec![CipherSuite::Aes128GcmSha256]);
        assert_eq!(config.handshake_length, LengthWidth::Standard);
    }

    #[test_traced]
    fn test_config_rejects_bad_suites() {
        let mut config = Config::new("example.com");
        config.cipher_suites.clear();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        config.cipher_suites = vec![
            CipherSuite::Aes128GcmSha256,
            CipherSuite::ChaCha20Poly1305Sha256,
            CipherSuite::Aes128GcmSha256,
        ];
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test_traced]
    fn test_config_rejects_long_server_name() {
        let config = Config::new("a".repeat(extension::MAX_SERVER_NAME_LENGTH + 1));
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encoding);
    }

    #[test_traced]
    fn test_config_server_name_fits_hello() {
        let max = hello::max_server_name_length(&[CipherSuite::Aes128GcmSha256], NamedGroup::X25519)
            .unwrap();
        assert!(Config::new("a".repeat(max)).validate().is_ok());
        assert!(matches!(
            Config::new("a".repeat(max + 1)).validate(),
            Err(Error::LengthOverflow { field: "server name", max: m, .. }) if m == max
        ));

        // The same name no longer fits once the key share grows
        let mut config = Config::new("a".repeat(max));
        config.key_share = NamedGroup::Secp256r1;
        assert!(matches!(
            config.validate(),
            Err(Error::LengthOverflow { field: "server name", .. })
        ));
    }

    #[test_traced]
    fn test_error_kinds() {
        assert_eq!(
            Error::ShortWrite {
                written: 9,
                expected: 10
            }
            .kind(),
            ErrorKind::Transport
        );
        assert_eq!(Error::InvalidFinished.kind(), ErrorKind::Cryptographic);
        assert_eq!(Error::Closed.kind(), ErrorKind::State);
        assert_eq!(Error::HelloRetryRequest.kind(), ErrorKind::Peer);
    }
}
