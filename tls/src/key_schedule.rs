//! Derivation of traffic secrets from the shared secret and the transcript.
//!
//! ```text
//!          0
//!          |
//!   0 -> Extract = early
//!          |
//!    Derive(., "derived", "")
//!          |
//! ECDHE -> Extract = handshake -> Derive(., "c hs traffic" | "s hs traffic", CH..SH)
//!          |
//!    Derive(., "derived", "")
//!          |
//!   0 -> Extract = master -> Derive(., "c ap traffic" | "s ap traffic", CH..server Finished)
//! ```
//!
//! Every traffic secret is expanded into a key, an IV, and (during the handshake) a finished key.

use crate::{
    nonce::Nonce,
    suite::{CipherSuite, HASH_LENGTH, IV_LENGTH},
    transcript::empty_hash,
    Error,
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Prefix of every label.
const LABEL_PREFIX: &[u8] = b"tls13 ";

/// A secret of the length of the suite's hash.
pub type Secret = Zeroizing<[u8; HASH_LENGTH]>;

/// Key and IV for one direction.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct TrafficKey {
    pub key: Vec<u8>,
    pub iv: Nonce,
}

/// Secrets installed when the `ServerHello` has been processed.
pub struct HandshakeSecrets {
    pub client: TrafficKey,
    pub server: TrafficKey,
    pub client_finished: Secret,
    pub server_finished: Secret,
}

/// Secrets installed when the server Finished has been verified.
pub struct ApplicationSecrets {
    pub client: TrafficKey,
    pub server: TrafficKey,
}

/// Derives traffic secrets for a single handshake.
pub trait KeySchedule: Send + 'static {
    /// Derive the handshake secrets from the shared secret and the hash of the transcript
    /// through the `ServerHello`.
    fn handshake(
        &mut self,
        suite: CipherSuite,
        shared_secret: &[u8],
        transcript_hash: &[u8],
    ) -> Result<HandshakeSecrets, Error>;

    /// Derive the application secrets from the hash of the transcript through the server
    /// Finished.
    fn application(&mut self, transcript_hash: &[u8]) -> Result<ApplicationSecrets, Error>;
}

/// `HKDF-Expand-Label` from RFC 8446 (section 7.1).
pub fn expand_label(
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    out: &mut [u8],
) -> Result<(), Error> {
    let len = u16::try_from(out.len()).map_err(|_| Error::KeyDerivation)?;
    let label_len =
        u8::try_from(LABEL_PREFIX.len() + label.len()).map_err(|_| Error::KeyDerivation)?;
    let context_len = u8::try_from(context.len()).map_err(|_| Error::KeyDerivation)?;
    let len = len.to_be_bytes();
    let hkdf = Hkdf::<Sha256>::from_prk(secret).map_err(|_| Error::KeyDerivation)?;
    hkdf.expand_multi_info(
        &[
            &len[..],
            &[label_len][..],
            LABEL_PREFIX,
            label,
            &[context_len][..],
            context,
        ],
        out,
    )
    .map_err(|_| Error::KeyDerivation)
}

/// `Derive-Secret` from RFC 8446 (section 7.1), given the transcript hash.
pub fn derive_secret(
    secret: &[u8],
    label: &[u8],
    transcript_hash: &[u8],
) -> Result<Secret, Error> {
    let mut out = Zeroizing::new([0u8; HASH_LENGTH]);
    expand_label(secret, label, transcript_hash, out.as_mut())?;
    Ok(out)
}

fn extract(salt: &[u8], ikm: &[u8]) -> Secret {
    let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), ikm);
    Zeroizing::new(prk.into())
}

fn traffic_key(suite: CipherSuite, secret: &[u8]) -> Result<TrafficKey, Error> {
    let mut key = vec![0u8; suite.key_length()];
    expand_label(secret, b"key", &[], &mut key)?;
    let mut iv = [0u8; IV_LENGTH];
    expand_label(secret, b"iv", &[], &mut iv)?;
    Ok(TrafficKey { key, iv })
}

fn finished_key(secret: &[u8]) -> Result<Secret, Error> {
    derive_secret(secret, b"finished", &[])
}

/// The key schedule of RFC 8446 over HKDF-SHA256.
#[derive(Default)]
pub struct Rfc8446 {
    suite: Option<CipherSuite>,
    handshake_secret: Option<Secret>,

    // Set once the application secrets have been derived
    done: bool,
}

impl Rfc8446 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeySchedule for Rfc8446 {
    fn handshake(
        &mut self,
        suite: CipherSuite,
        shared_secret: &[u8],
        transcript_hash: &[u8],
    ) -> Result<HandshakeSecrets, Error> {
        if self.done || self.handshake_secret.is_some() {
            return Err(Error::SecretsAlreadySet);
        }
        let zeros = [0u8; HASH_LENGTH];
        let early = extract(&zeros, &zeros);
        let derived = derive_secret(early.as_ref(), b"derived", &empty_hash())?;
        let handshake = extract(derived.as_ref(), shared_secret);

        let client = derive_secret(handshake.as_ref(), b"c hs traffic", transcript_hash)?;
        let server = derive_secret(handshake.as_ref(), b"s hs traffic", transcript_hash)?;
        let secrets = HandshakeSecrets {
            client: traffic_key(suite, client.as_ref())?,
            server: traffic_key(suite, server.as_ref())?,
            client_finished: finished_key(client.as_ref())?,
            server_finished: finished_key(server.as_ref())?,
        };
        self.suite = Some(suite);
        self.handshake_secret = Some(handshake);
        Ok(secrets)
    }

    fn application(&mut self, transcript_hash: &[u8]) -> Result<ApplicationSecrets, Error> {
        if self.done {
            return Err(Error::SecretsAlreadySet);
        }
        let (Some(suite), Some(handshake)) = (self.suite, self.handshake_secret.take()) else {
            return Err(Error::KeyDerivation);
        };
        self.done = true;
        let zeros = [0u8; HASH_LENGTH];
        let derived = derive_secret(handshake.as_ref(), b"derived", &empty_hash())?;
        let master = extract(derived.as_ref(), &zeros);

        let client = derive_secret(master.as_ref(), b"c ap traffic", transcript_hash)?;
        let server = derive_secret(master.as_ref(), b"s ap traffic", transcript_hash)?;
        Ok(ApplicationSecrets {
            client: traffic_key(suite, client.as_ref())?,
            server: traffic_key(suite, server.as_ref())?,
        })
    }
}
