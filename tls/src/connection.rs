//! Drive a [Session] over a runtime connection.

use crate::{
    codec::concat,
    key_exchange::KeyExchange,
    key_schedule::KeySchedule,
    message::{ContentType, CHANGE_CIPHER_SPEC},
    record::{RecordDecryptor, RecordEncryptor},
    session::{deliver, Session, State},
    transport::{recv_record, send_all, SinkWriter, Writer},
    Config, Error,
};
use bytes::{Bytes, BytesMut};
use commonware_macros::select;
use commonware_runtime::{Clock, Network, SinkOf, Stream, StreamOf};
use futures::lock::Mutex;
use rand::{CryptoRng, Rng};
use std::{net::SocketAddr, sync::Arc};
use tracing::debug;

/// Dial `address` and perform a handshake with the server.
///
/// Dialing is subject to the same deadline as each handshake phase.
pub async fn connect<E, K, S>(
    context: E,
    config: Config,
    address: SocketAddr,
    key_exchange: K,
    key_schedule: S,
) -> Result<Connection<SinkWriter<SinkOf<E>>, StreamOf<E>>, Error>
where
    E: Network + Clock + Rng + CryptoRng,
    K: KeyExchange,
    S: KeySchedule,
{
    config.validate()?;
    let deadline = context.current() + config.phase_timeout;
    let (sink, stream) = select! {
        _ = context.sleep_until(deadline) => { return Err(Error::HandshakeTimeout) },
        result = context.dial(address) => { result.map_err(Error::DialFailed)? },
    };
    debug!(?address, "dialed server");
    Connection::handshake(
        context,
        config,
        SinkWriter::new(sink),
        stream,
        key_exchange,
        key_schedule,
    )
    .await
}

/// An established connection protected with the application traffic keys.
pub struct Connection<W: Writer, St: Stream> {
    sender: Sender<W>,
    receiver: Receiver<St>,
}

impl<W: Writer, St: Stream> Connection<W, St> {
    /// Perform a client handshake over an existing transport.
    ///
    /// Every phase (sending the `ClientHello`, receiving the `ServerHello`, receiving the rest
    /// of the server's flight, and sending our Finished) must complete within
    /// `config.phase_timeout`.
    pub async fn handshake<E, K, S>(
        mut context: E,
        config: Config,
        mut writer: W,
        mut stream: St,
        key_exchange: K,
        key_schedule: S,
    ) -> Result<Self, Error>
    where
        E: Clock + Rng + CryptoRng,
        K: KeyExchange,
        S: KeySchedule,
    {
        let mut session = Session::new(&config, key_exchange, key_schedule)?;
        if let Err(err) = drive(
            &mut context,
            &config,
            &mut session,
            &mut writer,
            &mut stream,
        )
        .await
        {
            session.close();
            debug!(error = ?err, "handshake failed");
            return Err(err);
        }
        debug!(suite = ?session.suite(), "handshake complete");

        let (encryptor, decryptor) = session.into_traffic()?;
        Ok(Self {
            sender: Sender::new(encryptor, writer),
            receiver: Receiver::new(decryptor, stream, config.max_record_size),
        })
    }

    /// Send `msg` as a single application data record.
    pub async fn send(&mut self, msg: &[u8]) -> Result<(), Error> {
        self.sender.send(msg).await
    }

    /// Receive the next chunk of application data.
    pub async fn recv(&mut self) -> Result<Bytes, Error> {
        self.receiver.recv().await
    }

    /// Split the connection into a [Sender] and a [Receiver].
    pub fn split(self) -> (Sender<W>, Receiver<St>) {
        (self.sender, self.receiver)
    }
}

/// Run the handshake phases, each under its own deadline.
async fn drive<E, K, S, W, St>(
    context: &mut E,
    config: &Config,
    session: &mut Session<K, S>,
    writer: &mut W,
    stream: &mut St,
) -> Result<(), Error>
where
    E: Clock + Rng + CryptoRng,
    K: KeyExchange,
    S: KeySchedule,
    W: Writer,
    St: Stream,
{
    // Send ClientHello
    let hello = session.client_hello(context, &config.server_name)?;
    let deadline = context.current() + config.phase_timeout;
    select! {
        _ = context.sleep_until(deadline) => { return Err(Error::HandshakeTimeout) },
        result = send_all(writer, &hello) => { result? },
    };
    session.hello_sent()?;
    debug!(server_name = %config.server_name, "sent client hello");

    // Wait for ServerHello
    let max = config.max_record_size;
    let deadline = context.current() + config.phase_timeout;
    select! {
        _ = context.sleep_until(deadline) => { return Err(Error::HandshakeTimeout) },
        result = advance(session, stream, max, State::AwaitingServerHello) => { result? },
    };

    // Wait for the rest of the server flight
    let deadline = context.current() + config.phase_timeout;
    select! {
        _ = context.sleep_until(deadline) => { return Err(Error::HandshakeTimeout) },
        result = advance(session, stream, max, State::AwaitingServerFinished) => { result? },
    };

    // Send Finished
    let finished = session.client_finished()?;
    let flight = if config.middlebox_compat {
        Bytes::from(concat(&[&CHANGE_CIPHER_SPEC[..], &finished[..]]))
    } else {
        finished
    };
    let deadline = context.current() + config.phase_timeout;
    select! {
        _ = context.sleep_until(deadline) => { return Err(Error::HandshakeTimeout) },
        result = send_all(writer, &flight) => { result? },
    };
    session.finished_sent()
}

/// Feed records to the session for as long as it remains in `state`.
async fn advance<K, S, St>(
    session: &mut Session<K, S>,
    stream: &mut St,
    max_record_size: usize,
    state: State,
) -> Result<(), Error>
where
    K: KeyExchange,
    S: KeySchedule,
    St: Stream,
{
    while session.state() == state {
        let (header, fragment) = recv_record(stream, max_record_size).await?;
        session.receive(&header, &fragment)?;
    }
    Ok(())
}

struct Outbound<W: Writer> {
    encryptor: Option<RecordEncryptor>,
    writer: W,
}

/// The sending half of a [Connection].
///
/// Clones share the same traffic key: sealing and writing a record happen under one lock, so
/// records reach the transport in sequence number order.
pub struct Sender<W: Writer> {
    outbound: Arc<Mutex<Outbound<W>>>,
}

impl<W: Writer> Clone for Sender<W> {
    fn clone(&self) -> Self {
        Self {
            outbound: self.outbound.clone(),
        }
    }
}

impl<W: Writer> Sender<W> {
    fn new(encryptor: RecordEncryptor, writer: W) -> Self {
        Self {
            outbound: Arc::new(Mutex::new(Outbound {
                encryptor: Some(encryptor),
                writer,
            })),
        }
    }

    /// Seal `msg` into an application data record and write it.
    ///
    /// Any failure closes the sender (for every clone).
    pub async fn send(&self, msg: &[u8]) -> Result<(), Error> {
        let mut outbound = self.outbound.lock().await;
        let Outbound { encryptor, writer } = &mut *outbound;
        let cipher = encryptor.as_mut().ok_or(Error::Closed)?;
        let result = match cipher.wrap(msg, ContentType::ApplicationData) {
            Ok(record) => send_all(writer, &record).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            debug!(error = ?err, "closing sender");
            *encryptor = None;
        }
        result
    }
}

/// The receiving half of a [Connection].
pub struct Receiver<St: Stream> {
    decryptor: Option<RecordDecryptor>,
    stream: St,
    max_record_size: usize,

    // Part of a post-handshake message
    pending: BytesMut,
}

impl<St: Stream> Receiver<St> {
    fn new(decryptor: RecordDecryptor, stream: St, max_record_size: usize) -> Self {
        Self {
            decryptor: Some(decryptor),
            stream,
            max_record_size,
            pending: BytesMut::new(),
        }
    }

    /// Receive the next chunk of application data, skipping session tickets.
    ///
    /// Any failure closes the receiver.
    pub async fn recv(&mut self) -> Result<Bytes, Error> {
        loop {
            match self.next().await {
                Ok(Some(data)) => return Ok(data),
                Ok(None) => continue,
                Err(Error::Closed) => return Err(Error::Closed),
                Err(err) => {
                    debug!(error = ?err, "closing receiver");
                    self.decryptor = None;
                    return Err(err);
                }
            }
        }
    }

    async fn next(&mut self) -> Result<Option<Bytes>, Error> {
        if self.decryptor.is_none() {
            return Err(Error::Closed);
        }
        let (header, fragment) = recv_record(&mut self.stream, self.max_record_size).await?;
        let decryptor = self.decryptor.as_mut().ok_or(Error::Closed)?;
        let (content_type, plaintext) = decryptor.unwrap(&header, &fragment)?;
        deliver(&mut self.pending, content_type, plaintext)
    }
}
