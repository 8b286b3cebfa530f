//! A scripted TLS 1.3 server.

use crate::{
    aead::Cipher,
    codec::{self, concat},
    extension::{self, ExtensionType},
    finished,
    hello::{server_extensions, ServerHello, RANDOM_LENGTH},
    key_exchange::{Ephemeral, KeyExchange},
    key_schedule::{ApplicationSecrets, HandshakeSecrets, KeySchedule, Rfc8446},
    message::{
        encode_record, next_record, ContentType, HandshakeMessage, HandshakeType, LengthWidth,
        RecordHeader, CHANGE_CIPHER_SPEC,
    },
    record::{RecordDecryptor, RecordEncryptor},
    suite::{CipherSuite, NamedGroup, ProtocolVersion},
    transcript::Transcript,
    Error,
};
use bytes::{Buf, Bytes, BytesMut};
use commonware_codec::{Decode, Encode, Error as CodecError, ReadExt};
use rand::{CryptoRng, Rng};

/// Deviations from a well-behaved server.
#[derive(Clone, Copy, Debug, Default)]
pub struct Behavior {
    /// Flip a bit in the server Finished.
    pub tamper_finished: bool,
    /// Spread the encrypted flight over many small records.
    pub split_flight: bool,
    /// Send a `ChangeCipherSpec` record after the `ServerHello`.
    pub change_cipher_spec: bool,
    /// Handshake messages sent before the Finished (`EncryptedExtensions` and `Certificate` if
    /// unset).
    pub messages: Option<&'static [HandshakeType]>,
}

const DEFAULT_MESSAGES: &[HandshakeType] =
    &[HandshakeType::EncryptedExtensions, HandshakeType::Certificate];

/// The server side of a single handshake.
pub struct Server {
    behavior: Behavior,
    transcript: Transcript,
    schedule: Rfc8446,
    suite: Option<CipherSuite>,
    handshake: Option<HandshakeSecrets>,
    application: Option<ApplicationSecrets>,
    encryptor: Option<RecordEncryptor>,
    decryptor: Option<RecordDecryptor>,
}

impl Server {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            transcript: Transcript::new(),
            schedule: Rfc8446::new(),
            suite: None,
            handshake: None,
            application: None,
            encryptor: None,
            decryptor: None,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Consume a `ClientHello` record and return the server's first flight.
    pub fn respond<R: Rng + CryptoRng>(
        &mut self,
        rng: &mut R,
        record: &[u8],
    ) -> Result<Vec<Bytes>, Error> {
        let (content_type, fragment) = split(record)?;
        if content_type != ContentType::Handshake {
            return Err(Error::UnexpectedRecord(content_type.into()));
        }
        let message = HandshakeMessage::decode_cfg(fragment.clone(), &LengthWidth::Standard)?;
        if message.typ() != HandshakeType::ClientHello {
            return Err(Error::UnexpectedMessage(message.typ().into()));
        }
        let (suite, group, client_key) = parse_client_hello(message.body().clone())?;
        self.transcript.append(fragment);

        // ServerHello
        let key = Ephemeral::generate(rng, group);
        let mut random = [0u8; RANDOM_LENGTH];
        rng.fill_bytes(&mut random);
        let hello = ServerHello::new(
            random,
            Bytes::new(),
            suite.code(),
            server_extensions(group, key.public_key())?,
        )?;
        let raw = frame(HandshakeType::ServerHello, hello.encode())?;
        self.transcript.append(raw.clone());
        let mut flight = vec![encode_record(
            ContentType::Handshake,
            ProtocolVersion::Tls12,
            &raw,
        )?];
        if self.behavior.change_cipher_spec {
            flight.push(Bytes::from_static(&CHANGE_CIPHER_SPEC));
        }

        // Handshake keys
        let shared = key.agree(&client_key)?;
        let secrets = self
            .schedule
            .handshake(suite, &shared, &self.transcript.hash())?;
        let mut encryptor = RecordEncryptor::new(
            Cipher::new(suite, &secrets.server.key)?,
            secrets.server.iv,
        );
        self.decryptor = Some(RecordDecryptor::new(
            Cipher::new(suite, &secrets.client.key)?,
            secrets.client.iv,
        ));

        // EncryptedExtensions, Certificate, CertificateVerify, Finished
        let mut messages = Vec::new();
        for typ in self.behavior.messages.unwrap_or(DEFAULT_MESSAGES) {
            let body = match typ {
                HandshakeType::EncryptedExtensions => vec![0x00, 0x00],
                HandshakeType::Certificate => vec![0x00, 0x00, 0x00, 0x00],
                HandshakeType::CertificateVerify => vec![0x08, 0x04, 0x00, 0x00],
                _ => Vec::new(),
            };
            let raw = frame(*typ, body)?;
            self.transcript.append(raw.clone());
            messages.push(raw);
        }
        let mut tag = finished::compute(secrets.server_finished.as_ref(), &self.transcript.hash())?;
        let raw = finished::message(tag, LengthWidth::Standard)?.encode().freeze();
        self.transcript.append(raw.clone());
        if self.behavior.tamper_finished {
            tag[0] ^= 0x01;
            messages.push(finished::message(tag, LengthWidth::Standard)?.encode().freeze());
        } else {
            messages.push(raw);
        }
        let messages: Vec<&[u8]> = messages.iter().map(|m| m.as_ref()).collect();
        let plaintext = concat(&messages);
        if self.behavior.split_flight {
            for chunk in plaintext.chunks(7) {
                flight.push(encryptor.wrap(chunk, ContentType::Handshake)?);
            }
        } else {
            flight.push(encryptor.wrap(&plaintext, ContentType::Handshake)?);
        }

        self.application = Some(self.schedule.application(&self.transcript.hash())?);
        self.suite = Some(suite);
        self.handshake = Some(secrets);
        Ok(flight)
    }

    /// Verify the client Finished record and install the application keys.
    pub fn finish(&mut self, record: &[u8]) -> Result<(), Error> {
        let decryptor = self.decryptor.as_mut().ok_or(Error::KeyDerivation)?;
        let (content_type, plaintext) = open(decryptor, record)?;
        if content_type != ContentType::Handshake {
            return Err(Error::UnexpectedRecord(content_type.into()));
        }
        let message = HandshakeMessage::decode_cfg(plaintext.clone(), &LengthWidth::Standard)?;
        if message.typ() != HandshakeType::Finished {
            return Err(Error::UnexpectedMessage(message.typ().into()));
        }
        let handshake = self.handshake.take().ok_or(Error::KeyDerivation)?;
        finished::verify(
            handshake.client_finished.as_ref(),
            &self.transcript.hash(),
            message.body(),
        )?;
        self.transcript.append(plaintext);

        let suite = self.suite.ok_or(Error::KeyDerivation)?;
        let application = self.application.take().ok_or(Error::KeyDerivation)?;
        self.encryptor = Some(RecordEncryptor::new(
            Cipher::new(suite, &application.server.key)?,
            application.server.iv,
        ));
        self.decryptor = Some(RecordDecryptor::new(
            Cipher::new(suite, &application.client.key)?,
            application.client.iv,
        ));
        Ok(())
    }

    /// Seal application data for the client.
    pub fn seal(&mut self, data: &[u8]) -> Result<Bytes, Error> {
        let encryptor = self.encryptor.as_mut().ok_or(Error::KeyDerivation)?;
        encryptor.wrap(data, ContentType::ApplicationData)
    }

    /// Seal an (empty) session ticket for the client.
    pub fn ticket(&mut self) -> Result<Bytes, Error> {
        let ticket = frame(HandshakeType::NewSessionTicket, vec![0u8; 13])?;
        self.seal_handshake(&ticket)
    }

    /// Seal raw handshake plaintext (any number of messages, or part of one) for the client.
    pub fn seal_handshake(&mut self, plaintext: &[u8]) -> Result<Bytes, Error> {
        let encryptor = self.encryptor.as_mut().ok_or(Error::KeyDerivation)?;
        encryptor.wrap(plaintext, ContentType::Handshake)
    }

    /// Open application data sent by the client.
    pub fn open(&mut self, record: &[u8]) -> Result<Bytes, Error> {
        let decryptor = self.decryptor.as_mut().ok_or(Error::KeyDerivation)?;
        let (content_type, plaintext) = open(decryptor, record)?;
        if content_type != ContentType::ApplicationData {
            return Err(Error::UnexpectedRecord(content_type.into()));
        }
        Ok(plaintext)
    }
}

/// Frame a handshake message with a 3-byte length.
pub fn frame(typ: HandshakeType, body: impl Into<Bytes>) -> Result<Bytes, Error> {
    Ok(HandshakeMessage::new(typ, body, LengthWidth::Standard)?
        .encode()
        .freeze())
}

fn single(record: &[u8]) -> Result<(RecordHeader, Bytes), Error> {
    let mut buf = BytesMut::from(record);
    let (header, fragment) = next_record(&mut buf).ok_or(Error::UnexpectedEnd("record"))?;
    if !buf.is_empty() {
        return Err(CodecError::ExtraData(buf.len()).into());
    }
    Ok((header, fragment))
}

fn split(record: &[u8]) -> Result<(ContentType, Bytes), Error> {
    let (header, fragment) = single(record)?;
    Ok((header.content_type, fragment))
}

fn open(decryptor: &mut RecordDecryptor, record: &[u8]) -> Result<(ContentType, Bytes), Error> {
    let (header, fragment) = single(record)?;
    decryptor.unwrap(&header, &fragment)
}

/// Select the client's first suite and extract its key share.
fn parse_client_hello(mut body: Bytes) -> Result<(CipherSuite, NamedGroup, Bytes), Error> {
    u16::read(&mut body)?;
    codec::read_bytes(&mut body, RANDOM_LENGTH)?;
    codec::read_u8_prefixed(&mut body, ..=32)?;
    let mut suites = codec::read_u16_prefixed(&mut body, 2..)?;
    let suite = CipherSuite::try_from(u16::read(&mut suites)?)?;
    codec::read_u8_prefixed(&mut body, 1..)?;
    let extensions = extension::read_block(&mut body)?;
    if body.has_remaining() {
        return Err(CodecError::ExtraData(body.remaining()).into());
    }

    let share = extension::find(&extensions, ExtensionType::KeyShare)
        .ok_or(Error::MissingExtension(ExtensionType::KeyShare.code()))?;
    let mut payload = share.payload().clone();
    let mut entries = codec::read_u16_prefixed(&mut payload, ..)?;
    let group = NamedGroup::try_from(u16::read(&mut entries)?)?;
    let key = codec::read_u16_prefixed(&mut entries, 1..)?;
    Ok((suite, group, key))
}
