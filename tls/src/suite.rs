//! Cipher suites, key-exchange groups, and protocol versions.

use crate::Error;

/// Length of the per-record nonce (and traffic IV) for every supported suite.
pub const IV_LENGTH: usize = 12;

/// Length of the authentication tag appended by every supported AEAD.
pub const TAG_LENGTH: usize = 16;

/// Length of the digest produced by the hash of every supported suite (SHA-256).
pub const HASH_LENGTH: usize = 32;

/// A TLS 1.3 cipher suite.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CipherSuite {
    /// `TLS_AES_128_GCM_SHA256`
    Aes128GcmSha256,
    /// `TLS_CHACHA20_POLY1305_SHA256`
    ChaCha20Poly1305Sha256,
}

impl CipherSuite {
    /// Wire code of the suite.
    pub fn code(self) -> u16 {
        match self {
            Self::Aes128GcmSha256 => 0x1301,
            Self::ChaCha20Poly1305Sha256 => 0x1303,
        }
    }

    /// Length of the traffic key used by the suite's AEAD.
    pub fn key_length(self) -> usize {
        match self {
            Self::Aes128GcmSha256 => 16,
            Self::ChaCha20Poly1305Sha256 => 32,
        }
    }
}

impl TryFrom<u16> for CipherSuite {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            0x1301 => Ok(Self::Aes128GcmSha256),
            0x1303 => Ok(Self::ChaCha20Poly1305Sha256),
            _ => Err(Error::UnsupportedCipherSuite(code)),
        }
    }
}

/// A group used for (EC)DHE key exchange.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum NamedGroup {
    /// Curve25519 (32-byte public keys).
    X25519,
    /// NIST P-256 (65-byte uncompressed SEC1 public keys).
    Secp256r1,
}

impl NamedGroup {
    /// Wire code of the group.
    pub fn code(self) -> u16 {
        match self {
            Self::X25519 => 0x001d,
            Self::Secp256r1 => 0x0017,
        }
    }

    /// Length of a public key share in this group.
    pub fn key_share_length(self) -> usize {
        match self {
            Self::X25519 => 32,
            Self::Secp256r1 => 65,
        }
    }
}

impl TryFrom<u16> for NamedGroup {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            0x001d => Ok(Self::X25519),
            0x0017 => Ok(Self::Secp256r1),
            _ => Err(Error::UnsupportedGroup(code)),
        }
    }
}

/// Protocol versions that appear on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProtocolVersion {
    /// Written in the record header of the first `ClientHello` for compatibility.
    Tls10,
    /// Written in the `legacy_version` fields and in the header of every other record.
    Tls12,
    /// The version actually negotiated via the Supported Versions extension.
    Tls13,
}

impl ProtocolVersion {
    /// Wire code of the version.
    pub fn code(self) -> u16 {
        match self {
            Self::Tls10 => 0x0301,
            Self::Tls12 => 0x0303,
            Self::Tls13 => 0x0304,
        }
    }
}
