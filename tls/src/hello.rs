//! The `ClientHello` we send and the `ServerHello` we expect in return.

use crate::{
    codec::{self, encode_u16, U16_MAX},
    extension::{self, Extension, ExtensionType},
    message::{
        encode_record, ContentType, HandshakeMessage, HandshakeType, LengthWidth,
        HANDSHAKE_HEADER_LENGTH,
    },
    suite::{CipherSuite, NamedGroup, ProtocolVersion},
    Error,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use commonware_codec::{DecodeExt, Encode, EncodeSize, Error as CodecError, Read, ReadExt, Write};
use rand::{CryptoRng, Rng};

/// Length of the `random` field of a hello.
pub const RANDOM_LENGTH: usize = 32;

/// Longest legacy session id a server may echo.
pub const MAX_SESSION_ID_LENGTH: usize = 32;

/// The `random` of a `ServerHello` that is actually a `HelloRetryRequest`
/// (`SHA-256("HelloRetryRequest")`).
pub const HELLO_RETRY_REQUEST_RANDOM: [u8; RANDOM_LENGTH] = [
    0xcf, 0x21, 0xad, 0x74, 0xe5, 0x9a, 0x61, 0x11, 0xbe, 0x1d, 0x8c, 0x02, 0x1e, 0x65, 0xb8, 0x91,
    0xc2, 0xa2, 0x11, 0x16, 0x7a, 0xbb, 0x8c, 0x5e, 0x07, 0x9e, 0x09, 0xe2, 0xc8, 0xa8, 0x33, 0x9c,
];

/// The first message of the handshake.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientHello {
    pub random: [u8; RANDOM_LENGTH],
    pub cipher_suites: Vec<CipherSuite>,
    pub extensions: Vec<Extension>,
}

impl ClientHello {
    /// Create a hello for `hostname` with a fresh random.
    pub fn new<R: Rng + CryptoRng>(
        rng: &mut R,
        hostname: &str,
        cipher_suites: &[CipherSuite],
        group: NamedGroup,
        public_key: &[u8],
    ) -> Result<Self, Error> {
        let mut random = [0u8; RANDOM_LENGTH];
        rng.fill_bytes(&mut random);
        Self::with_random(random, hostname, cipher_suites, group, public_key)
    }

    /// Create a hello for `hostname` with the provided random.
    pub fn with_random(
        random: [u8; RANDOM_LENGTH],
        hostname: &str,
        cipher_suites: &[CipherSuite],
        group: NamedGroup,
        public_key: &[u8],
    ) -> Result<Self, Error> {
        let extensions = vec![
            Extension::server_name(hostname)?,
            Extension::supported_groups(&[group])?,
            Extension::signature_algorithms(),
            Extension::supported_versions(),
            Extension::psk_key_exchange_modes(),
            Extension::key_share(group, public_key)?,
        ];
        Ok(Self {
            random,
            cipher_suites: cipher_suites.to_vec(),
            extensions,
        })
    }

    /// Encode the body of the handshake message.
    pub fn body(&self) -> Result<Bytes, Error> {
        let extensions: usize = self.extensions.iter().map(Extension::encode_size).sum();
        let mut buf = BytesMut::with_capacity(
            2 + RANDOM_LENGTH + 1 + 2 + 2 * self.cipher_suites.len() + 2 + 2 + extensions,
        );
        buf.put_u16(ProtocolVersion::Tls12.code());
        buf.put_slice(&self.random);
        codec::put_u8_prefixed(&mut buf, "session id", &[])?;
        let suites: Vec<u8> = self
            .cipher_suites
            .iter()
            .flat_map(|s| s.code().to_be_bytes())
            .collect();
        codec::put_u16_prefixed(&mut buf, "cipher suites", &suites)?;
        codec::put_u8_prefixed(&mut buf, "compression methods", &[0x00])?;
        extension::write_block(&mut buf, &self.extensions)?;
        Ok(buf.freeze())
    }

    /// Encode the hello as a handshake message.
    pub fn handshake(&self, width: LengthWidth) -> Result<Bytes, Error> {
        let message = HandshakeMessage::new(HandshakeType::ClientHello, self.body()?, width)?;
        Ok(message.encode().freeze())
    }

    /// Encode the hello as a complete record (header included).
    pub fn record(&self, width: LengthWidth) -> Result<Bytes, Error> {
        encode_record(
            ContentType::Handshake,
            ProtocolVersion::Tls10,
            &self.handshake(width)?,
        )
    }
}

/// Longest hostname for which a [ClientHello] offering `cipher_suites` and a key share in `group`
/// still fits in a single record.
pub fn max_server_name_length(
    cipher_suites: &[CipherSuite],
    group: NamedGroup,
) -> Result<usize, Error> {
    let public_key = vec![0u8; group.key_share_length()];
    let hello = ClientHello::with_random([0; RANDOM_LENGTH], "", cipher_suites, group, &public_key)?;
    let unnamed = HANDSHAKE_HEADER_LENGTH + hello.body()?.len();
    Ok(U16_MAX
        .saturating_sub(unnamed)
        .min(extension::MAX_SERVER_NAME_LENGTH))
}

/// The server's reply to a [ClientHello].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerHello {
    random: [u8; RANDOM_LENGTH],
    session_id: Bytes,
    cipher_suite: u16,
    extensions: Vec<Extension>,
}

impl ServerHello {
    pub fn new(
        random: [u8; RANDOM_LENGTH],
        session_id: Bytes,
        cipher_suite: u16,
        extensions: Vec<Extension>,
    ) -> Result<Self, Error> {
        if session_id.len() > MAX_SESSION_ID_LENGTH {
            return Err(Error::LengthOverflow {
                field: "session id",
                len: session_id.len(),
                max: MAX_SESSION_ID_LENGTH,
            });
        }
        encode_u16("extensions", extension::block_size(&extensions) - 2)?;
        Ok(Self {
            random,
            session_id,
            cipher_suite,
            extensions,
        })
    }

    pub fn random(&self) -> &[u8; RANDOM_LENGTH] {
        &self.random
    }

    /// The legacy session id echoed by the server.
    pub fn session_id(&self) -> &Bytes {
        &self.session_id
    }

    pub fn cipher_suite(&self) -> u16 {
        self.cipher_suite
    }

    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    /// Returns true if this is a `HelloRetryRequest`.
    pub fn is_retry_request(&self) -> bool {
        self.random == HELLO_RETRY_REQUEST_RANDOM
    }

    /// The version selected by the Supported Versions extension.
    pub fn selected_version(&self) -> Result<u16, Error> {
        let extension = extension::find(&self.extensions, ExtensionType::SupportedVersions)
            .ok_or(Error::MissingExtension(ExtensionType::SupportedVersions.code()))?;
        Ok(u16::decode(extension.payload().clone())?)
    }

    /// The server's key share (group and public key).
    pub fn key_share(&self) -> Result<(u16, Bytes), Error> {
        let extension = extension::find(&self.extensions, ExtensionType::KeyShare)
            .ok_or(Error::MissingExtension(ExtensionType::KeyShare.code()))?;
        let mut payload = extension.payload().clone();
        let group = u16::read(&mut payload)?;
        let public_key = codec::read_u16_prefixed(&mut payload, 1..)?;
        if payload.has_remaining() {
            return Err(CodecError::ExtraData(payload.remaining()).into());
        }
        Ok((group, public_key))
    }
}

impl Write for ServerHello {
    fn write(&self, buf: &mut impl BufMut) {
        ProtocolVersion::Tls12.code().write(buf);
        self.random.write(buf);
        (self.session_id.len() as u8).write(buf);
        buf.put_slice(&self.session_id);
        self.cipher_suite.write(buf);
        0u8.write(buf);
        ((extension::block_size(&self.extensions) - 2) as u16).write(buf);
        for extension in &self.extensions {
            extension.write(buf);
        }
    }
}

impl EncodeSize for ServerHello {
    fn encode_size(&self) -> usize {
        2 + RANDOM_LENGTH
            + 1
            + self.session_id.len()
            + 2
            + 1
            + extension::block_size(&self.extensions)
    }
}

impl Read for ServerHello {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        if u16::read(buf)? != ProtocolVersion::Tls12.code() {
            return Err(CodecError::Invalid("ServerHello", "legacy version"));
        }
        let random = <[u8; RANDOM_LENGTH]>::read(buf)?;
        let session_id = codec::read_u8_prefixed(buf, ..=MAX_SESSION_ID_LENGTH)?;
        let cipher_suite = u16::read(buf)?;
        if u8::read(buf)? != 0 {
            return Err(CodecError::Invalid("ServerHello", "compression method"));
        }
        let extensions = extension::read_block(buf)?;
        Ok(Self {
            random,
            session_id,
            cipher_suite,
            extensions,
        })
    }
}

/// Build the extensions a TLS 1.3 `ServerHello` carries.
pub fn server_extensions(group: NamedGroup, public_key: &[u8]) -> Result<Vec<Extension>, Error> {
    let [hi, lo] = ProtocolVersion::Tls13.code().to_be_bytes();
    let mut share = BytesMut::with_capacity(public_key.len() + 4);
    share.put_u16(group.code());
    codec::put_u16_prefixed(&mut share, "key share", public_key)?;
    Ok(vec![
        Extension::new(ExtensionType::SupportedVersions, vec![hi, lo])?,
        Extension::new(ExtensionType::KeyShare, share.freeze())?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{RecordHeader, RECORD_HEADER_LENGTH};
    use rand::{rngs::StdRng, SeedableRng};
    use sha2::{Digest, Sha256};

    fn hello(random: [u8; RANDOM_LENGTH], hostname: &str) -> ClientHello {
        ClientHello::with_random(
            random,
            hostname,
            &[CipherSuite::Aes128GcmSha256],
            NamedGroup::X25519,
            &[0x42; 32],
        )
        .unwrap()
    }

    #[test]
    fn test_retry_request_random() {
        let digest = Sha256::digest(b"HelloRetryRequest");
        assert_eq!(digest.as_slice(), &HELLO_RETRY_REQUEST_RANDOM);
    }

    #[test]
    fn test_client_hello_layout() {
        let hostname = "example.com";
        let record = hello([0x11; RANDOM_LENGTH], hostname)
            .record(LengthWidth::Standard)
            .unwrap();

        // Record header
        let header = RecordHeader::decode(&record[..RECORD_HEADER_LENGTH]).unwrap();
        assert_eq!(header.content_type, ContentType::Handshake);
        assert_eq!(header.version, 0x0301);
        assert_eq!(header.length as usize, record.len() - RECORD_HEADER_LENGTH);

        // Handshake header
        let handshake = &record[RECORD_HEADER_LENGTH..];
        assert_eq!(handshake[0], 0x01);
        let body_len = codec::decode_u24([handshake[1], handshake[2], handshake[3]]);
        assert_eq!(body_len, handshake.len() - 4);

        // Body
        let body = &handshake[4..];
        assert_eq!(&body[..2], &[0x03, 0x03]);
        assert_eq!(&body[2..34], &[0x11; 32]);
        assert_eq!(&body[34..41], &[0x00, 0x00, 0x02, 0x13, 0x01, 0x01, 0x00]);
        let extensions_len = codec::decode_u16([body[41], body[42]]) as usize;
        assert_eq!(extensions_len, body.len() - 43);

        // The server name is the first extension (extension, list, and name lengths)
        assert_eq!(&body[43..45], &[0x00, 0x00]);
        assert_eq!(&body[45..47], &[0x00, 0x10]);
        assert_eq!(&body[47..49], &[0x00, 0x0e]);
        assert_eq!(body[49], 0x00);
        assert_eq!(&body[50..52], &[0x00, 0x0b]);
        assert_eq!(&body[52..52 + hostname.len()], hostname.as_bytes());

        // The key share is the last extension
        assert_eq!(
            &body[body.len() - 42..body.len() - 32],
            &[0x00, 0x33, 0x00, 0x26, 0x00, 0x24, 0x00, 0x1d, 0x00, 0x20]
        );
        assert_eq!(&body[body.len() - 32..], &[0x42; 32]);
    }

    #[test]
    fn test_client_hello_fixed_size() {
        // 5 (record) + 4 (handshake) + 43 (fields) + 9 (server name) + 8 (groups) + 34 (sigs)
        // + 7 (versions) + 6 (psk modes) + 42 (key share)
        let record = hello([0; RANDOM_LENGTH], "").record(LengthWidth::Standard).unwrap();
        assert_eq!(record.len(), 158);
    }

    #[test]
    fn test_only_random_differs() {
        let mut rng = StdRng::seed_from_u64(0);
        let build = |rng: &mut StdRng| {
            ClientHello::new(
                rng,
                "example.com",
                &[CipherSuite::Aes128GcmSha256],
                NamedGroup::X25519,
                &[0x42; 32],
            )
            .unwrap()
            .record(LengthWidth::Standard)
            .unwrap()
        };
        let a = build(&mut rng);
        let b = build(&mut rng);
        assert_eq!(a.len(), b.len());
        let random = 5 + 4 + 2..5 + 4 + 2 + RANDOM_LENGTH;
        assert_ne!(&a[random.clone()], &b[random.clone()]);
        assert_eq!(&a[..random.start], &b[..random.start]);
        assert_eq!(&a[random.end..], &b[random.end..]);
    }

    #[test]
    fn test_legacy_width() {
        let hello = hello([0x11; RANDOM_LENGTH], "example.com");
        let standard = hello.record(LengthWidth::Standard).unwrap();
        let legacy = hello.record(LengthWidth::Legacy).unwrap();
        assert_eq!(standard, legacy);
    }

    #[test]
    fn test_client_hello_rejects_long_hostname() {
        let hostname = "a".repeat(extension::MAX_SERVER_NAME_LENGTH + 1);
        let result = ClientHello::with_random(
            [0; RANDOM_LENGTH],
            &hostname,
            &[CipherSuite::Aes128GcmSha256],
            NamedGroup::X25519,
            &[0x42; 32],
        );
        assert!(matches!(result, Err(Error::LengthOverflow { .. })));
    }

    #[test]
    fn test_client_hello_too_large_for_record() {
        let hostname = "a".repeat(extension::MAX_SERVER_NAME_LENGTH);
        let hello = hello([0; RANDOM_LENGTH], &hostname);
        assert!(matches!(
            hello.record(LengthWidth::Standard),
            Err(Error::LengthOverflow { field: "extensions", .. })
        ));
    }

    #[test]
    fn test_max_server_name_length() {
        let suites = [CipherSuite::Aes128GcmSha256];
        let max = max_server_name_length(&suites, NamedGroup::X25519).unwrap();
        assert_eq!(max, 65382);
        let record = hello([0; RANDOM_LENGTH], &"a".repeat(max))
            .record(LengthWidth::Standard)
            .unwrap();
        assert_eq!(record.len(), RECORD_HEADER_LENGTH + U16_MAX);
        assert!(hello([0; RANDOM_LENGTH], &"a".repeat(max + 1))
            .record(LengthWidth::Standard)
            .is_err());

        // Larger key shares and more suites leave less room
        let suites = [
            CipherSuite::Aes128GcmSha256,
            CipherSuite::ChaCha20Poly1305Sha256,
        ];
        assert_eq!(
            max_server_name_length(&suites, NamedGroup::Secp256r1).unwrap(),
            65382 - 2 - 33
        );
    }

    fn server_hello(random: [u8; RANDOM_LENGTH], extensions: Vec<Extension>) -> ServerHello {
        ServerHello::new(
            random,
            Bytes::new(),
            CipherSuite::Aes128GcmSha256.code(),
            extensions,
        )
        .unwrap()
    }

    #[test]
    fn test_server_hello() {
        let server = server_hello(
            [0x22; RANDOM_LENGTH],
            server_extensions(NamedGroup::X25519, &[0x33; 32]).unwrap(),
        );
        let encoded = server.encode();
        assert_eq!(encoded.len(), server.encode_size());
        let decoded = ServerHello::decode(encoded).unwrap();
        assert_eq!(decoded, server);
        assert!(!decoded.is_retry_request());
        assert_eq!(
            decoded.selected_version().unwrap(),
            ProtocolVersion::Tls13.code()
        );
        let (group, public_key) = decoded.key_share().unwrap();
        assert_eq!(group, NamedGroup::X25519.code());
        assert_eq!(public_key.as_ref(), &[0x33; 32]);
    }

    #[test]
    fn test_server_hello_missing_extensions() {
        let server = server_hello(HELLO_RETRY_REQUEST_RANDOM, Vec::new());
        let decoded = ServerHello::decode(server.encode()).unwrap();
        assert!(decoded.is_retry_request());
        assert!(matches!(
            decoded.selected_version(),
            Err(Error::MissingExtension(0x002b))
        ));
        assert!(matches!(
            decoded.key_share(),
            Err(Error::MissingExtension(0x0033))
        ));
    }

    #[test]
    fn test_server_hello_truncated() {
        let server = server_hello(
            [0x22; RANDOM_LENGTH],
            server_extensions(NamedGroup::X25519, &[0x33; 32]).unwrap(),
        );
        let encoded = server.encode().freeze();
        for len in 0..encoded.len() {
            assert!(ServerHello::decode(encoded.slice(..len)).is_err());
        }
        let mut extended = encoded.to_vec();
        extended.push(0x00);
        assert!(matches!(
            ServerHello::decode(extended.as_slice()),
            Err(CodecError::ExtraData(1))
        ));
    }

    #[test]
    fn test_server_hello_rejects_legacy_fields() {
        let encoded = server_hello([0x22; RANDOM_LENGTH], Vec::new()).encode();

        let mut version = encoded.to_vec();
        version[1] = 0x04;
        assert!(matches!(
            ServerHello::decode(version.as_slice()),
            Err(CodecError::Invalid("ServerHello", "legacy version"))
        ));

        let mut compression = encoded.to_vec();
        compression[2 + RANDOM_LENGTH + 1 + 2] = 0x01;
        assert!(matches!(
            ServerHello::decode(compression.as_slice()),
            Err(CodecError::Invalid("ServerHello", "compression method"))
        ));
    }

    #[test]
    fn test_server_hello_session_id_limit() {
        let random = [0x22; RANDOM_LENGTH];
        let suite = CipherSuite::Aes128GcmSha256.code();
        let echoed = ServerHello::new(random, Bytes::from(vec![0x01; 32]), suite, Vec::new());
        let echoed = echoed.unwrap();
        assert_eq!(ServerHello::decode(echoed.encode()).unwrap(), echoed);
        assert!(matches!(
            ServerHello::new(random, Bytes::from(vec![0x01; 33]), suite, Vec::new()),
            Err(Error::LengthOverflow { .. })
        ));

        // A longer session id on the wire is rejected before it is buffered
        let mut encoded = echoed.encode().to_vec();
        encoded[2 + RANDOM_LENGTH] = 33;
        assert!(matches!(
            ServerHello::decode(encoded.as_slice()),
            Err(CodecError::InvalidLength(33))
        ));
    }
}
