//! Ephemeral (EC)DHE key shares.

use crate::{suite::NamedGroup, Error};
use p256::{
    ecdh::EphemeralSecret as P256Secret, elliptic_curve::sec1::ToEncodedPoint,
    PublicKey as P256PublicKey,
};
use rand::{CryptoRng, Rng};
use x25519_dalek::{EphemeralSecret as X25519Secret, PublicKey as X25519PublicKey};
use zeroize::Zeroizing;

/// Shared secret produced by a key exchange.
pub type SharedSecret = Zeroizing<Vec<u8>>;

/// An ephemeral key pair that can be used for exactly one agreement.
pub trait KeyExchange: Send + 'static {
    /// The group the key pair belongs to.
    fn group(&self) -> NamedGroup;

    /// The public key to place in the key share.
    fn public_key(&self) -> &[u8];

    /// Combine our secret with the peer's public key, consuming the key pair.
    fn agree(self, peer: &[u8]) -> Result<SharedSecret, Error>;
}

/// An X25519 key pair.
pub struct X25519 {
    secret: X25519Secret,
    public: [u8; 32],
}

impl X25519 {
    pub fn new<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let secret = X25519Secret::random_from_rng(rng);
        let public = X25519PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }
}

impl KeyExchange for X25519 {
    fn group(&self) -> NamedGroup {
        NamedGroup::X25519
    }

    fn public_key(&self) -> &[u8] {
        &self.public
    }

    fn agree(self, peer: &[u8]) -> Result<SharedSecret, Error> {
        let peer: [u8; 32] = peer.try_into().map_err(|_| Error::InvalidPublicKey)?;
        let shared = self.secret.diffie_hellman(&X25519PublicKey::from(peer));

        // Reject low-order points
        if !shared.was_contributory() {
            return Err(Error::SharedSecretNotContributory);
        }
        Ok(Zeroizing::new(shared.as_bytes().to_vec()))
    }
}

/// A P-256 key pair (public keys are uncompressed SEC1 points).
pub struct P256 {
    secret: P256Secret,
    public: Vec<u8>,
}

impl P256 {
    pub fn new<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let secret = P256Secret::random(rng);
        let public = secret.public_key().to_encoded_point(false).as_bytes().to_vec();
        Self { secret, public }
    }
}

impl KeyExchange for P256 {
    fn group(&self) -> NamedGroup {
        NamedGroup::Secp256r1
    }

    fn public_key(&self) -> &[u8] {
        &self.public
    }

    fn agree(self, peer: &[u8]) -> Result<SharedSecret, Error> {
        if peer.len() != NamedGroup::Secp256r1.key_share_length() {
            return Err(Error::InvalidPublicKey);
        }
        let peer = P256PublicKey::from_sec1_bytes(peer).map_err(|_| Error::InvalidPublicKey)?;
        let shared = self.secret.diffie_hellman(&peer);
        Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
    }
}

/// A key pair in any supported group.
pub enum Ephemeral {
    X25519(X25519),
    P256(P256),
}

impl Ephemeral {
    /// Generate a key pair in `group`.
    pub fn generate<R: Rng + CryptoRng>(rng: &mut R, group: NamedGroup) -> Self {
        match group {
            NamedGroup::X25519 => Self::X25519(X25519::new(rng)),
            NamedGroup::Secp256r1 => Self::P256(P256::new(rng)),
        }
    }
}

impl KeyExchange for Ephemeral {
    fn group(&self) -> NamedGroup {
        match self {
            Self::X25519(key) => key.group(),
            Self::P256(key) => key.group(),
        }
    }

    fn public_key(&self) -> &[u8] {
        match self {
            Self::X25519(key) => key.public_key(),
            Self::P256(key) => key.public_key(),
        }
    }

    fn agree(self, peer: &[u8]) -> Result<SharedSecret, Error> {
        match self {
            Self::X25519(key) => key.agree(peer),
            Self::P256(key) => key.agree(peer),
        }
    }
}
