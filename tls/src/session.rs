//! The client handshake state machine.

use crate::{
    aead::Cipher,
    finished,
    hello::{ClientHello, ServerHello, RANDOM_LENGTH},
    key_exchange::KeyExchange,
    key_schedule::{ApplicationSecrets, HandshakeSecrets, KeySchedule, TrafficKey},
    message::{
        next_message, ContentType, HandshakeMessage, HandshakeType, LengthWidth, RecordHeader,
        MAX_HANDSHAKE_LENGTH, RECORD_HEADER_LENGTH,
    },
    record::{RecordDecryptor, RecordEncryptor},
    suite::{CipherSuite, ProtocolVersion},
    transcript::Transcript,
    Config, Error,
};
use bytes::{Bytes, BytesMut};
use commonware_codec::{Decode, DecodeExt, Encode};
use commonware_utils::hex;
use rand::{CryptoRng, Rng};
use tracing::{debug, trace};

/// The phase of a [Session].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Start,
    ClientHelloSent,
    AwaitingServerHello,
    ServerHelloReceived,
    AwaitingServerFinished,
    KeysDerived,
    ClientFinishedSent,
    ApplicationPhase,
    Closed,
}

/// Position within the server's encrypted flight.
///
/// `EncryptedExtensions` comes first, optionally followed by a `Certificate` and then a
/// `CertificateVerify`. The flight ends with the server Finished.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Flight {
    Start,
    EncryptedExtensions,
    Certificate,
    CertificateVerify,
    Finished,
}

impl Flight {
    fn next(self, typ: HandshakeType) -> Result<Self, Error> {
        match (self, typ) {
            (Self::Start, HandshakeType::EncryptedExtensions) => Ok(Self::EncryptedExtensions),
            (Self::EncryptedExtensions, HandshakeType::Certificate) => Ok(Self::Certificate),
            (Self::Certificate, HandshakeType::CertificateVerify) => Ok(Self::CertificateVerify),
            (
                Self::EncryptedExtensions | Self::Certificate | Self::CertificateVerify,
                HandshakeType::Finished,
            ) => Ok(Self::Finished),
            (_, typ) => Err(Error::UnexpectedMessage(typ.into())),
        }
    }
}

/// One client handshake and the protected traffic that follows it.
///
/// A session does no I/O: it produces the records to send and consumes the records received.
/// Every handshake message it produces or consumes is appended to the transcript before the
/// transition that produced or consumed it completes. Any error (other than calling an operation
/// in the wrong state) closes the session, after which every operation returns [Error::Closed].
pub struct Session<K: KeyExchange, S: KeySchedule> {
    state: State,
    cipher_suites: Vec<CipherSuite>,
    width: LengthWidth,
    client_random: [u8; RANDOM_LENGTH],
    transcript: Transcript,
    flight: Flight,

    key_exchange: Option<K>,
    key_schedule: S,

    suite: Option<CipherSuite>,
    handshake: Option<HandshakeSecrets>,
    application: Option<ApplicationSecrets>,
    encryptor: Option<RecordEncryptor>,
    decryptor: Option<RecordDecryptor>,

    // Handshake bytes received but not yet forming a complete message
    pending: BytesMut,
}

impl<K: KeyExchange, S: KeySchedule> Session<K, S> {
    /// Create a session that will offer `key_exchange` and derive secrets with `key_schedule`.
    pub fn new(config: &Config, key_exchange: K, key_schedule: S) -> Result<Self, Error> {
        config.validate()?;
        if key_exchange.group() != config.key_share {
            return Err(Error::InvalidConfig("key exchange does not match key share group"));
        }
        Ok(Self {
            state: State::Start,
            cipher_suites: config.cipher_suites.clone(),
            width: config.handshake_length,
            client_random: [0; RANDOM_LENGTH],
            transcript: Transcript::new(),
            flight: Flight::Start,
            key_exchange: Some(key_exchange),
            key_schedule,
            suite: None,
            handshake: None,
            application: None,
            encryptor: None,
            decryptor: None,
            pending: BytesMut::new(),
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The random sent in our `ClientHello` (zero until it is built).
    pub fn client_random(&self) -> &[u8; RANDOM_LENGTH] {
        &self.client_random
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// The cipher suite selected by the server.
    pub fn suite(&self) -> Option<CipherSuite> {
        self.suite
    }

    /// Number of records sealed with the current traffic key.
    pub fn sent(&self) -> u64 {
        self.encryptor.as_ref().map_or(0, RecordEncryptor::sequence)
    }

    /// Number of records opened with the current traffic key.
    pub fn received(&self) -> u64 {
        self.decryptor.as_ref().map_or(0, RecordDecryptor::sequence)
    }

    /// Build the `ClientHello` record for `hostname`.
    pub fn client_hello<R: Rng + CryptoRng>(
        &mut self,
        rng: &mut R,
        hostname: &str,
    ) -> Result<Bytes, Error> {
        self.guard(|s| {
            s.expect(State::Start)?;
            let key_exchange = s.key_exchange.as_ref().ok_or(Error::SecretsAlreadySet)?;
            let hello = ClientHello::new(
                rng,
                hostname,
                &s.cipher_suites,
                key_exchange.group(),
                key_exchange.public_key(),
            )?;
            let record = hello.record(s.width)?;
            s.client_random = hello.random;
            trace!(random = hex(&hello.random), "built client hello");
            s.transcript.append(record.slice(RECORD_HEADER_LENGTH..));
            s.transition(State::ClientHelloSent);
            Ok(record)
        })
    }

    /// Record that the `ClientHello` has been written to the transport.
    pub fn hello_sent(&mut self) -> Result<(), Error> {
        self.guard(|s| {
            s.expect(State::ClientHelloSent)?;
            s.transition(State::AwaitingServerHello);
            Ok(())
        })
    }

    /// Process a record received while waiting for the server's handshake flight.
    ///
    /// Handshake messages may be split across records (and multiple messages may share a record).
    /// When the `ServerHello` has been processed the session installs the handshake traffic keys
    /// and moves to [State::AwaitingServerFinished]. When the server Finished has been verified the
    /// session derives the application secrets and moves to [State::KeysDerived].
    pub fn receive(&mut self, header: &RecordHeader, fragment: &[u8]) -> Result<(), Error> {
        self.guard(|s| {
            if header.length as usize != fragment.len() {
                return Err(Error::LengthMismatch {
                    field: "record",
                    declared: header.length as usize,
                    actual: fragment.len(),
                });
            }
            match (s.state, header.content_type) {
                (
                    State::AwaitingServerHello | State::AwaitingServerFinished,
                    ContentType::ChangeCipherSpec,
                ) => {
                    if fragment != [0x01] {
                        return Err(Error::IllegalParameter("change cipher spec"));
                    }
                    trace!("ignoring change cipher spec");
                    Ok(())
                }
                (
                    State::AwaitingServerHello | State::AwaitingServerFinished,
                    ContentType::Alert,
                ) => Err(alert(fragment)),
                (State::AwaitingServerHello, ContentType::Handshake) => {
                    s.pending.extend_from_slice(fragment);
                    s.drain()
                }
                (State::AwaitingServerFinished, ContentType::ApplicationData) => {
                    let decryptor = s.decryptor.as_mut().ok_or(Error::KeyDerivation)?;
                    let (content_type, plaintext) = decryptor.unwrap(header, fragment)?;
                    match content_type {
                        ContentType::Handshake => {
                            s.pending.extend_from_slice(&plaintext);
                            s.drain()
                        }
                        ContentType::Alert => Err(alert(&plaintext)),
                        other => Err(Error::UnexpectedRecord(other.into())),
                    }
                }
                (State::AwaitingServerHello | State::AwaitingServerFinished, other) => {
                    Err(Error::UnexpectedRecord(other.into()))
                }
                (actual, _) => Err(Error::InvalidState {
                    expected: State::AwaitingServerFinished,
                    actual,
                }),
            }
        })
    }

    /// Build the (protected) client Finished record and install the application traffic keys.
    pub fn client_finished(&mut self) -> Result<Bytes, Error> {
        self.guard(|s| {
            s.expect(State::KeysDerived)?;
            let handshake = s.handshake.take().ok_or(Error::KeyDerivation)?;
            let tag = finished::compute(handshake.client_finished.as_ref(), &s.transcript.hash())?;
            let message = finished::message(tag, s.width)?.encode().freeze();
            s.transcript.append(message.clone());
            let encryptor = s.encryptor.as_mut().ok_or(Error::KeyDerivation)?;
            let record = encryptor.wrap(&message, ContentType::Handshake)?;

            // Switch to the application traffic keys
            let suite = s.suite.ok_or(Error::KeyDerivation)?;
            let application = s.application.take().ok_or(Error::KeyDerivation)?;
            s.install(suite, &application.client, &application.server)?;
            s.transition(State::ClientFinishedSent);
            Ok(record)
        })
    }

    /// Record that the client Finished has been written to the transport.
    pub fn finished_sent(&mut self) -> Result<(), Error> {
        self.guard(|s| {
            s.expect(State::ClientFinishedSent)?;
            s.transition(State::ApplicationPhase);
            Ok(())
        })
    }

    /// Seal application data into a record.
    pub fn wrap(&mut self, data: &[u8]) -> Result<Bytes, Error> {
        self.guard(|s| {
            s.expect(State::ApplicationPhase)?;
            let encryptor = s.encryptor.as_mut().ok_or(Error::KeyDerivation)?;
            encryptor.wrap(data, ContentType::ApplicationData)
        })
    }

    /// Open a record received after the handshake.
    ///
    /// Returns `None` for records that carry no application data (like session tickets or part of
    /// one).
    pub fn unwrap(
        &mut self,
        header: &RecordHeader,
        fragment: &[u8],
    ) -> Result<Option<Bytes>, Error> {
        self.guard(|s| {
            s.expect(State::ApplicationPhase)?;
            let decryptor = s.decryptor.as_mut().ok_or(Error::KeyDerivation)?;
            let (content_type, plaintext) = decryptor.unwrap(header, fragment)?;
            deliver(&mut s.pending, content_type, plaintext)
        })
    }

    /// Take the application traffic keys out of a session whose handshake is complete.
    pub fn into_traffic(mut self) -> Result<(RecordEncryptor, RecordDecryptor), Error> {
        self.expect(State::ApplicationPhase)?;
        match (self.encryptor.take(), self.decryptor.take()) {
            (Some(encryptor), Some(decryptor)) => Ok((encryptor, decryptor)),
            _ => Err(Error::KeyDerivation),
        }
    }

    /// Close the session, dropping every secret.
    pub fn close(&mut self) {
        if self.state != State::Closed {
            self.transition(State::Closed);
        }
        self.key_exchange = None;
        self.handshake = None;
        self.application = None;
        self.encryptor = None;
        self.decryptor = None;
        self.pending.clear();
    }

    fn guard<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, Error>) -> Result<T, Error> {
        if self.state == State::Closed {
            return Err(Error::Closed);
        }
        let result = f(self);
        if let Err(err) = &result {
            if !matches!(err, Error::InvalidState { .. }) {
                debug!(state = ?self.state, error = ?err, "session failed");
                self.close();
            }
        }
        result
    }

    fn expect(&self, expected: State) -> Result<(), Error> {
        if self.state != expected {
            return Err(Error::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    fn transition(&mut self, to: State) {
        debug!(from = ?self.state, ?to, "session transition");
        self.state = to;
    }

    fn install(
        &mut self,
        suite: CipherSuite,
        client: &TrafficKey,
        server: &TrafficKey,
    ) -> Result<(), Error> {
        self.encryptor = Some(RecordEncryptor::new(
            Cipher::new(suite, &client.key)?,
            client.iv,
        ));
        self.decryptor = Some(RecordDecryptor::new(
            Cipher::new(suite, &server.key)?,
            server.iv,
        ));
        Ok(())
    }

    /// Process every complete handshake message that has been buffered.
    fn drain(&mut self) -> Result<(), Error> {
        while let Some(raw) = next_message(&mut self.pending, MAX_HANDSHAKE_LENGTH)? {
            let message = HandshakeMessage::decode_cfg(raw.clone(), &LengthWidth::Standard)?;
            let typ = message.typ();
            match (self.state, typ) {
                (State::AwaitingServerHello, HandshakeType::ServerHello) => {
                    self.server_hello(raw, message.body().clone())?;
                }
                (State::AwaitingServerFinished, _) => {
                    self.flight = self.flight.next(typ)?;
                    if self.flight == Flight::Finished {
                        self.server_finished(raw, message.body())?;
                    } else {
                        trace!(?typ, len = message.body().len(), "received handshake message");
                        self.transcript.append(raw);
                    }
                }
                (_, typ) => return Err(Error::UnexpectedMessage(typ.into())),
            }

            // Messages may not span a change of keys
            if self.state != State::AwaitingServerHello
                && matches!(typ, HandshakeType::ServerHello | HandshakeType::Finished)
                && !self.pending.is_empty()
            {
                return Err(Error::IllegalParameter("handshake data spans key change"));
            }
        }
        Ok(())
    }

    fn server_hello(&mut self, raw: Bytes, body: Bytes) -> Result<(), Error> {
        let hello = ServerHello::decode(body)?;
        if hello.is_retry_request() {
            return Err(Error::HelloRetryRequest);
        }
        let suite = CipherSuite::try_from(hello.cipher_suite())?;
        if !self.cipher_suites.contains(&suite) {
            return Err(Error::IllegalParameter("cipher suite was not offered"));
        }
        let version = hello.selected_version()?;
        if version != ProtocolVersion::Tls13.code() {
            return Err(Error::UnsupportedVersion(version));
        }
        if !hello.session_id().is_empty() {
            return Err(Error::IllegalParameter("session id was not echoed"));
        }
        let (group, peer) = hello.key_share()?;
        let key_exchange = self.key_exchange.take().ok_or(Error::SecretsAlreadySet)?;
        if group != key_exchange.group().code() {
            return Err(Error::IllegalParameter("key share group was not offered"));
        }
        self.transcript.append(raw);
        self.transition(State::ServerHelloReceived);
        debug!(?suite, "accepted server hello");

        // Derive and install the handshake traffic keys
        let shared = key_exchange.agree(&peer)?;
        if self.handshake.is_some() {
            return Err(Error::SecretsAlreadySet);
        }
        let secrets = self
            .key_schedule
            .handshake(suite, &shared, &self.transcript.hash())?;
        self.install(suite, &secrets.client, &secrets.server)?;
        self.suite = Some(suite);
        self.handshake = Some(secrets);
        self.transition(State::AwaitingServerFinished);
        Ok(())
    }

    fn server_finished(&mut self, raw: Bytes, body: &[u8]) -> Result<(), Error> {
        let handshake = self.handshake.as_ref().ok_or(Error::KeyDerivation)?;
        finished::verify(
            handshake.server_finished.as_ref(),
            &self.transcript.hash(),
            body,
        )?;
        self.transcript.append(raw);

        // Derive the application secrets (installed once our Finished is sealed)
        if self.application.is_some() {
            return Err(Error::SecretsAlreadySet);
        }
        let application = self.key_schedule.application(&self.transcript.hash())?;
        self.application = Some(application);
        self.transition(State::KeysDerived);
        Ok(())
    }
}

/// Convert a received alert into an error.
fn alert(fragment: &[u8]) -> Error {
    Error::AlertReceived(fragment.get(1).copied().unwrap_or_default())
}

/// Interpret the plaintext of a record received after the handshake.
///
/// Handshake messages may be split across records (and multiple messages may share a record), so
/// handshake plaintext is buffered in `pending` until it forms complete messages. Session tickets
/// are discarded. Any other handshake message is rejected, as is application data that arrives
/// while part of a handshake message is buffered.
pub(crate) fn deliver(
    pending: &mut BytesMut,
    content_type: ContentType,
    plaintext: Bytes,
) -> Result<Option<Bytes>, Error> {
    match content_type {
        ContentType::ApplicationData => {
            if !pending.is_empty() {
                return Err(Error::IllegalParameter("handshake message interrupted"));
            }
            Ok(Some(plaintext))
        }
        ContentType::Handshake => {
            if plaintext.is_empty() {
                return Err(Error::UnexpectedEnd("handshake"));
            }
            pending.extend_from_slice(&plaintext);
            while let Some(raw) = next_message(pending, MAX_HANDSHAKE_LENGTH)? {
                let message = HandshakeMessage::decode_cfg(raw, &LengthWidth::Standard)?;
                match message.typ() {
                    HandshakeType::NewSessionTicket => {
                        trace!(len = message.body().len(), "ignoring session ticket");
                    }
                    typ => return Err(Error::UnexpectedMessage(typ.into())),
                }
            }
            Ok(None)
        }
        ContentType::Alert => Err(alert(&plaintext)),
        other => Err(Error::UnexpectedRecord(other.into())),
    }
}
