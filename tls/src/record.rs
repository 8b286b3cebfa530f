//! Protected records.
//!
//! Before encryption, the true content type is appended to the plaintext and the record is sent
//! with the outer type `application_data`. The five bytes of the outer header are the associated
//! data of the AEAD, so the header must declare the exact length of the ciphertext (plaintext,
//! content type, and tag) before anything is encrypted.

use crate::{
    aead::{Aead, Cipher},
    message::{ContentType, RecordHeader, RECORD_HEADER_LENGTH},
    nonce::{Nonce, Sequence},
    suite::ProtocolVersion,
    Error,
};
use bytes::{BufMut, Bytes, BytesMut};
use commonware_codec::Encode;
use tracing::trace;

/// Seals outgoing records with a single traffic key.
pub struct RecordEncryptor<A: Aead = Cipher> {
    cipher: A,
    iv: Nonce,
    sequence: Sequence,
}

impl<A: Aead> RecordEncryptor<A> {
    pub fn new(cipher: A, iv: Nonce) -> Self {
        Self {
            cipher,
            iv,
            sequence: Sequence::default(),
        }
    }

    /// Number of records sealed so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.value()
    }

    /// Seal `plaintext` of type `content_type` into a complete record (header included).
    ///
    /// The sequence number only advances if a record is returned.
    pub fn wrap(&mut self, plaintext: &[u8], content_type: ContentType) -> Result<Bytes, Error> {
        let length = plaintext.len() + 1 + self.cipher.tag_length();
        let header = RecordHeader::new(ContentType::ApplicationData, ProtocolVersion::Tls12, length)?;
        let aad = header.encode();

        let mut inner = Vec::with_capacity(plaintext.len() + 1);
        inner.extend_from_slice(plaintext);
        inner.push(content_type.into());

        let nonce = self.sequence.derive(&self.iv)?;
        let ciphertext = self.cipher.encrypt(&nonce, &inner, &aad)?;
        if ciphertext.len() != length {
            return Err(Error::LengthMismatch {
                field: "ciphertext",
                declared: length,
                actual: ciphertext.len(),
            });
        }
        self.sequence.inc();
        trace!(sequence = self.sequence.value() - 1, length, "sealed record");

        let mut record = BytesMut::with_capacity(RECORD_HEADER_LENGTH + length);
        record.put_slice(&aad);
        record.put_slice(&ciphertext);
        Ok(record.freeze())
    }
}

/// Opens incoming records protected with a single traffic key.
pub struct RecordDecryptor<A: Aead = Cipher> {
    cipher: A,
    iv: Nonce,
    sequence: Sequence,
}

impl<A: Aead> RecordDecryptor<A> {
    pub fn new(cipher: A, iv: Nonce) -> Self {
        Self {
            cipher,
            iv,
            sequence: Sequence::default(),
        }
    }

    /// Number of records opened so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.value()
    }

    /// Open a protected record, returning its true content type and plaintext.
    pub fn unwrap(
        &mut self,
        header: &RecordHeader,
        fragment: &[u8],
    ) -> Result<(ContentType, Bytes), Error> {
        if header.content_type != ContentType::ApplicationData {
            return Err(Error::UnexpectedRecord(header.content_type.into()));
        }
        if header.length as usize != fragment.len() {
            return Err(Error::LengthMismatch {
                field: "record",
                declared: header.length as usize,
                actual: fragment.len(),
            });
        }
        if fragment.len() <= self.cipher.tag_length() {
            return Err(Error::UnexpectedEnd("protected record"));
        }

        let nonce = self.sequence.next(&self.iv)?;
        let mut inner = self.cipher.decrypt(&nonce, fragment, &header.encode())?;

        // Strip padding; the last non-zero byte is the content type
        let Some(end) = inner.iter().rposition(|b| *b != 0) else {
            return Err(Error::IllegalParameter("missing content type"));
        };
        let content_type = ContentType::from(inner[end]);
        inner.truncate(end);
        Ok((content_type, Bytes::from(inner)))
    }
}
