//! Finished messages: a MAC over the transcript hash keyed by a finished key.

use crate::{
    message::{HandshakeMessage, HandshakeType, LengthWidth},
    suite::HASH_LENGTH,
    Error,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Length of a Finished tag.
pub const TAG_LENGTH: usize = HASH_LENGTH;

/// Compute the Finished tag over `transcript_hash`.
pub fn compute(finished_key: &[u8], transcript_hash: &[u8]) -> Result<[u8; TAG_LENGTH], Error> {
    let mut mac = HmacSha256::new_from_slice(finished_key)
        .map_err(|_| Error::InvalidKeyLength(finished_key.len()))?;
    mac.update(transcript_hash);
    Ok(mac.finalize().into_bytes().into())
}

/// Verify a Finished tag received from the peer in constant time.
pub fn verify(finished_key: &[u8], transcript_hash: &[u8], tag: &[u8]) -> Result<(), Error> {
    let mut mac = HmacSha256::new_from_slice(finished_key)
        .map_err(|_| Error::InvalidKeyLength(finished_key.len()))?;
    mac.update(transcript_hash);
    mac.verify_slice(tag).map_err(|_| Error::InvalidFinished)
}

/// Frame a tag as a Finished handshake message.
pub fn message(tag: [u8; TAG_LENGTH], width: LengthWidth) -> Result<HandshakeMessage, Error> {
    HandshakeMessage::new(HandshakeType::Finished, tag.to_vec(), width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::Encode;
    use commonware_utils::hex;

    #[test]
    fn test_rfc4231_case_2() {
        let tag = compute(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            hex(&tag),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
        assert!(verify(b"Jefe", b"what do ya want for nothing?", &tag).is_ok());
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let key = [0x0b; 32];
        let hash = [0x5a; 32];
        let mut tag = compute(&key, &hash).unwrap();
        tag[TAG_LENGTH - 1] ^= 0x01;
        assert!(matches!(
            verify(&key, &hash, &tag),
            Err(Error::InvalidFinished)
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_length() {
        let key = [0x0b; 32];
        let hash = [0x5a; 32];
        let tag = compute(&key, &hash).unwrap();
        assert!(verify(&key, &hash, &tag[..16]).is_err());
        assert!(verify(&key, &hash, &[]).is_err());
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let hash = [0x5a; 32];
        let tag = compute(&[0x0b; 32], &hash).unwrap();
        assert!(verify(&[0x0c; 32], &hash, &tag).is_err());
    }

    #[test]
    fn test_message() {
        for width in [LengthWidth::Standard, LengthWidth::Legacy] {
            let encoded = message([0xaa; TAG_LENGTH], width).unwrap().encode();
            assert_eq!(&encoded[..4], &[0x14, 0x00, 0x00, 0x20]);
            assert_eq!(encoded.len(), 4 + TAG_LENGTH);
        }
    }
}
