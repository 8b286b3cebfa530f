//! Extension blocks carried in the `ClientHello` and `ServerHello`.
//!
//! An extension is `type(2) || length(2) || payload`. The Server Name extension nests three
//! lengths inside that frame (for a hostname of `L` bytes: the extension length `L + 5`, the list
//! length `L + 3`, and the name length `L`), so the longest hostname that can be carried is
//! [MAX_SERVER_NAME_LENGTH] bytes.

use crate::{
    codec::{self, encode_u16, U16_MAX},
    suite::NamedGroup,
    Error,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use commonware_codec::{EncodeSize, Error as CodecError, Read, ReadExt, Write};

/// Longest hostname that fits in a Server Name extension.
pub const MAX_SERVER_NAME_LENGTH: usize = U16_MAX - 5;

/// Length of the type and length fields that precede an extension payload.
pub const EXTENSION_HEADER_LENGTH: usize = 4;

/// Signature schemes offered (and the length of the list), in order of preference.
const SIGNATURE_ALGORITHMS: [u8; 30] = [
    0x00, 0x1c, // length
    0x04, 0x03, // ecdsa_secp256r1_sha256
    0x05, 0x03, // ecdsa_secp384r1_sha384
    0x06, 0x03, // ecdsa_secp521r1_sha512
    0x08, 0x07, // ed25519
    0x08, 0x08, // ed448
    0x08, 0x09, // rsa_pss_pss_sha256
    0x08, 0x0a, // rsa_pss_pss_sha384
    0x08, 0x0b, // rsa_pss_pss_sha512
    0x08, 0x04, // rsa_pss_rsae_sha256
    0x08, 0x05, // rsa_pss_rsae_sha384
    0x08, 0x06, // rsa_pss_rsae_sha512
    0x04, 0x01, // rsa_pkcs1_sha256
    0x05, 0x01, // rsa_pkcs1_sha384
    0x06, 0x01, // rsa_pkcs1_sha512
];

/// TLS 1.3 is the only version offered.
const OFFERED_VERSIONS: [u8; 3] = [0x02, 0x03, 0x04];

/// `psk_dhe_ke` is the only mode offered.
const PSK_KEY_EXCHANGE_MODES: [u8; 2] = [0x01, 0x01];

/// Known extension types.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExtensionType {
    ServerName,
    SupportedGroups,
    SignatureAlgorithms,
    SupportedVersions,
    PskKeyExchangeModes,
    KeyShare,
}

impl ExtensionType {
    pub fn code(self) -> u16 {
        match self {
            Self::ServerName => 0x0000,
            Self::SupportedGroups => 0x000a,
            Self::SignatureAlgorithms => 0x000d,
            Self::SupportedVersions => 0x002b,
            Self::PskKeyExchangeModes => 0x002d,
            Self::KeyShare => 0x0033,
        }
    }
}

/// A single extension.
///
/// The payload always fits the 2-byte length of the extension frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Extension {
    typ: u16,
    payload: Bytes,
}

impl Extension {
    pub fn new(typ: ExtensionType, payload: impl Into<Bytes>) -> Result<Self, Error> {
        let payload = payload.into();
        encode_u16("extension", payload.len())?;
        Ok(Self {
            typ: typ.code(),
            payload,
        })
    }

    fn fixed(typ: ExtensionType, payload: &'static [u8]) -> Self {
        Self {
            typ: typ.code(),
            payload: Bytes::from_static(payload),
        }
    }

    /// Server Name Indication for a DNS `hostname`.
    pub fn server_name(hostname: &str) -> Result<Self, Error> {
        let name = hostname.as_bytes();
        if name.len() > MAX_SERVER_NAME_LENGTH {
            return Err(Error::LengthOverflow {
                field: "server name",
                len: name.len(),
                max: MAX_SERVER_NAME_LENGTH,
            });
        }
        let mut payload = BytesMut::with_capacity(name.len() + 5);
        payload.put_slice(&encode_u16("server name list", name.len() + 3)?);
        payload.put_u8(0x00); // host_name
        codec::put_u16_prefixed(&mut payload, "server name", name)?;
        Self::new(ExtensionType::ServerName, payload.freeze())
    }

    /// The groups a key share may be offered in.
    pub fn supported_groups(groups: &[NamedGroup]) -> Result<Self, Error> {
        let mut list = BytesMut::with_capacity(groups.len() * 2);
        for group in groups {
            list.put_u16(group.code());
        }
        let mut payload = BytesMut::with_capacity(list.len() + 2);
        codec::put_u16_prefixed(&mut payload, "supported groups", &list)?;
        Self::new(ExtensionType::SupportedGroups, payload.freeze())
    }

    /// The signature schemes we accept in `CertificateVerify`.
    pub fn signature_algorithms() -> Self {
        Self::fixed(ExtensionType::SignatureAlgorithms, &SIGNATURE_ALGORITHMS)
    }

    /// Offer TLS 1.3 (and nothing else).
    pub fn supported_versions() -> Self {
        Self::fixed(ExtensionType::SupportedVersions, &OFFERED_VERSIONS)
    }

    pub fn psk_key_exchange_modes() -> Self {
        Self::fixed(ExtensionType::PskKeyExchangeModes, &PSK_KEY_EXCHANGE_MODES)
    }

    /// A single key share entry.
    pub fn key_share(group: NamedGroup, public_key: &[u8]) -> Result<Self, Error> {
        let mut entry = BytesMut::with_capacity(public_key.len() + 4);
        entry.put_u16(group.code());
        codec::put_u16_prefixed(&mut entry, "key exchange", public_key)?;
        let mut payload = BytesMut::with_capacity(entry.len() + 2);
        codec::put_u16_prefixed(&mut payload, "client shares", &entry)?;
        Self::new(ExtensionType::KeyShare, payload.freeze())
    }

    pub fn typ(&self) -> u16 {
        self.typ
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

impl Write for Extension {
    fn write(&self, buf: &mut impl BufMut) {
        self.typ.write(buf);
        (self.payload.len() as u16).write(buf);
        buf.put_slice(&self.payload);
    }
}

impl EncodeSize for Extension {
    fn encode_size(&self) -> usize {
        EXTENSION_HEADER_LENGTH + self.payload.len()
    }
}

impl Read for Extension {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let typ = u16::read(buf)?;
        let payload = codec::read_u16_prefixed(buf, ..)?;
        Ok(Self { typ, payload })
    }
}

/// Number of bytes [write_block] produces for `extensions` (length prefix included).
pub fn block_size(extensions: &[Extension]) -> usize {
    2 + extensions.iter().map(EncodeSize::encode_size).sum::<usize>()
}

/// Encode `extensions` as a block preceded by its 2-byte length.
pub fn write_block(buf: &mut impl BufMut, extensions: &[Extension]) -> Result<(), Error> {
    let len = block_size(extensions) - 2;
    buf.put_slice(&encode_u16("extensions", len)?);
    for extension in extensions {
        extension.write(buf);
    }
    Ok(())
}

/// Decode a block of extensions preceded by its 2-byte length, rejecting duplicates.
pub fn read_block(buf: &mut impl Buf) -> Result<Vec<Extension>, CodecError> {
    let mut block = codec::read_u16_prefixed(buf, ..)?;
    let mut extensions: Vec<Extension> = Vec::new();
    while block.has_remaining() {
        let extension = Extension::read(&mut block)?;
        if extensions.iter().any(|e| e.typ == extension.typ) {
            return Err(CodecError::Invalid("Extension", "duplicate"));
        }
        extensions.push(extension);
    }
    Ok(extensions)
}

/// Find the extension of type `typ` in `extensions`.
pub fn find(extensions: &[Extension], typ: ExtensionType) -> Option<&Extension> {
    extensions.iter().find(|e| e.typ == typ.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    use commonware_codec::{DecodeExt, Encode};

    fn encoded(extension: &Extension) -> Vec<u8> {
        let buf = extension.encode();
        assert_eq!(buf.len(), extension.encode_size());
        buf.to_vec()
    }

    #[test]
    fn test_server_name_nesting() {
        let extension = Extension::server_name("example.ulfheim.net").unwrap();
        let buf = encoded(&extension);
        let l = "example.ulfheim.net".len();
        assert_eq!(&buf[0..2], &[0x00, 0x00]);
        assert_eq!(buf[2..4], ((l + 5) as u16).to_be_bytes());
        assert_eq!(buf[4..6], ((l + 3) as u16).to_be_bytes());
        assert_eq!(buf[6], 0x00);
        assert_eq!(buf[7..9], (l as u16).to_be_bytes());
        assert_eq!(&buf[9..], b"example.ulfheim.net");
    }

    #[test]
    fn test_server_name_boundary() {
        let name = "a".repeat(MAX_SERVER_NAME_LENGTH);
        let buf = encoded(&Extension::server_name(&name).unwrap());
        assert_eq!(&buf[2..4], &[0xff, 0xff]);
        assert_eq!(&buf[4..6], &[0xff, 0xfd]);
        assert_eq!(&buf[7..9], &[0xff, 0xfa]);

        let name = "a".repeat(MAX_SERVER_NAME_LENGTH + 1);
        assert!(matches!(
            Extension::server_name(&name),
            Err(Error::LengthOverflow { .. })
        ));
    }

    #[test]
    fn test_empty_server_name() {
        let buf = encoded(&Extension::server_name("").unwrap());
        assert_eq!(buf, vec![0x00, 0x00, 0x00, 0x05, 0x00, 0x03, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_fixed_blocks() {
        assert_eq!(
            encoded(&Extension::supported_groups(&[NamedGroup::X25519]).unwrap()),
            vec![0x00, 0x0a, 0x00, 0x04, 0x00, 0x02, 0x00, 0x1d]
        );
        assert_eq!(
            encoded(&Extension::supported_versions()),
            vec![0x00, 0x2b, 0x00, 0x03, 0x02, 0x03, 0x04]
        );
        assert_eq!(
            encoded(&Extension::psk_key_exchange_modes()),
            vec![0x00, 0x2d, 0x00, 0x02, 0x01, 0x01]
        );
        let signature_algorithms = encoded(&Extension::signature_algorithms());
        assert_eq!(&signature_algorithms[..6], &[0x00, 0x0d, 0x00, 0x1e, 0x00, 0x1c]);
        assert_eq!(signature_algorithms.len(), 34);
    }

    #[test]
    fn test_key_share() {
        let public = [0x42u8; 32];
        let buf = encoded(&Extension::key_share(NamedGroup::X25519, &public).unwrap());
        assert_eq!(
            &buf[..10],
            &[0x00, 0x33, 0x00, 0x26, 0x00, 0x24, 0x00, 0x1d, 0x00, 0x20]
        );
        assert_eq!(&buf[10..], &public);
    }

    #[test]
    fn test_block() {
        let extensions = vec![
            Extension::supported_versions(),
            Extension::psk_key_exchange_modes(),
        ];
        let mut buf = Vec::new();
        write_block(&mut buf, &extensions).unwrap();
        assert_eq!(&buf[..2], &[0x00, 0x0d]);

        assert_eq!(buf.len(), block_size(&extensions));
        let mut reader = Bytes::from(buf);
        let decoded = read_block(&mut reader).unwrap();
        assert_eq!(decoded, extensions);
        assert!(find(&decoded, ExtensionType::KeyShare).is_none());
        assert!(find(&decoded, ExtensionType::SupportedVersions).is_some());
    }

    #[test]
    fn test_block_rejects_duplicates() {
        let extensions = vec![
            Extension::supported_versions(),
            Extension::supported_versions(),
        ];
        let mut buf = Vec::new();
        write_block(&mut buf, &extensions).unwrap();
        let mut reader = Bytes::from(buf);
        assert!(matches!(
            read_block(&mut reader),
            Err(CodecError::Invalid("Extension", "duplicate"))
        ));
    }

    #[test]
    fn test_read_extension() {
        let extension = Extension::decode(&[0xff, 0x01, 0x00, 0x01, 0x00][..]).unwrap();
        assert_eq!(extension.typ(), 0xff01);
        assert_eq!(extension.payload().as_ref(), &[0x00]);

        assert!(matches!(
            Extension::decode(&[0x00, 0x2b, 0x00, 0x03, 0x02][..]),
            Err(CodecError::EndOfBuffer)
        ));
        assert!(matches!(
            Extension::decode(&[0x00, 0x2b, 0x00, 0x00, 0x00][..]),
            Err(CodecError::ExtraData(1))
        ));
    }

    #[test]
    fn test_payload_limit() {
        assert!(Extension::new(ExtensionType::KeyShare, vec![0u8; U16_MAX]).is_ok());
        assert!(matches!(
            Extension::new(ExtensionType::KeyShare, vec![0u8; U16_MAX + 1]),
            Err(Error::LengthOverflow { .. })
        ));
    }
}
