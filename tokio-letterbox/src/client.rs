use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use letterbox_proto::builders::command::{Command, CommandBuilder};
use letterbox_proto::handler;
use letterbox_proto::types::{CommandKind, FetchFields, Payload, ResponseCode, SearchCriteria};
use letterbox_proto::{Accumulator, Digest, Error, ErrorKind, Tag, TagGenerator};

use crate::transport::{self, Stream, TlsMode, PORT_NO_TLS, PORT_TLS};

/// Default deadline for connect and the `wait_for_*` methods.
pub const DEFAULT_TIMEOUT_MS: i64 = 30_000;

/// Connection options.
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    /// 0 selects the default port for the TLS mode: 143 plain, 993 TLS.
    pub port: u16,
    pub tls: TlsMode,
    /// Deadline in milliseconds for connect and the `wait_for_*` methods.
    /// Zero or negative disables the deadline.
    pub timeout_ms: i64,
}

impl Config {
    pub fn new(host: impl Into<String>) -> Self {
        Config {
            host: host.into(),
            port: 0,
            tls: TlsMode::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Connection lifecycle. `Disconnected` is both the initial and the
/// terminal state; an OK greeting moves to `Connected`, a PREAUTH greeting
/// or a successful LOGIN to `Authenticated`, and any transport close back
/// to `Disconnected`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Authenticated,
}

/// Completion handle for one submitted command.
#[derive(Debug)]
pub struct CommandHandle {
    rx: oneshot::Receiver<Result<Payload, Error>>,
}

impl CommandHandle {
    /// Resolves with the command's typed result. Exactly one of the
    /// success payload or the error is ever delivered per command.
    pub async fn wait(self) -> Result<Payload, Error> {
        self.rx.await.unwrap_or_else(|_| {
            Err(Error::Internal(
                "client dropped before completion".to_string(),
            ))
        })
    }
}

struct QueueEntry {
    kind: CommandKind,
    acc: Accumulator,
    done: oneshot::Sender<Result<Payload, Error>>,
}

struct Inner {
    state: ConnectionState,
    writer: Option<WriteHalf<Stream>>,
    tags: Option<TagGenerator>,
    queue: VecDeque<QueueEntry>,
    readable: VecDeque<Payload>,
    last_error: Option<Error>,
    // Reader-task generation; a stale task must not touch state that
    // belongs to a newer connection.
    epoch: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    ready_read: Notify,
    disconnected: Notify,
    error_occurred: Notify,
}

impl Shared {
    fn raise(&self, inner: &mut Inner, error: Error) -> Error {
        inner.last_error = Some(error.clone());
        self.error_occurred.notify_waiters();
        error
    }
}

/// Pipelined IMAP4rev1 client.
///
/// Commands may be submitted without waiting for earlier replies; responses
/// are attributed to commands strictly in submission order, so completion
/// handles resolve in the order the commands were issued.
///
/// ```no_run
/// # use tokio_letterbox::{Config, ImapClient};
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ImapClient::new(Config::new("mail.example.org"));
/// client.connect().await?;
/// client.login("user", "secret").await?.wait().await?;
/// let mailboxes = client.list("\"\"", "*").await?.wait().await?;
/// # drop(mailboxes);
/// # Ok(())
/// # }
/// ```
pub struct ImapClient {
    config: Config,
    shared: Arc<Shared>,
}

impl ImapClient {
    /// A client in the `Disconnected` state; nothing is dialed until
    /// [`connect`](Self::connect).
    pub fn new(config: Config) -> Self {
        ImapClient {
            config,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    writer: None,
                    tags: None,
                    queue: VecDeque::new(),
                    readable: VecDeque::new(),
                    last_error: None,
                    epoch: 0,
                }),
                ready_read: Notify::new(),
                disconnected: Notify::new(),
                error_occurred: Notify::new(),
            }),
        }
    }

    /// Dials the host, reads the greeting and starts the dispatch task.
    ///
    /// Fails with `Duplicate` when already connected, `Internal` on
    /// transport failure or timeout, and `Unexpected` when the greeting is
    /// neither OK nor PREAUTH.
    pub async fn connect(&self) -> Result<(), Error> {
        let mut inner = self.shared.inner.lock().await;
        if inner.state != ConnectionState::Disconnected {
            return Err(self.shared.raise(
                &mut inner,
                Error::Duplicate("connection has already been established".to_string()),
            ));
        }

        let port = match (self.config.port, self.config.tls) {
            (0, TlsMode::NoTls) => PORT_NO_TLS,
            (0, TlsMode::Tls) => PORT_TLS,
            (port, _) => port,
        };
        let deadline = deadline(self.config.timeout_ms);

        info!(host = %self.config.host, port, tls = ?self.config.tls, "connecting");

        let stream = match bounded(deadline, transport::connect(&self.config.host, port, self.config.tls)).await {
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                return Err(self.shared.raise(&mut inner, Error::Internal(e.to_string())))
            }
            None => {
                return Err(self.shared.raise(
                    &mut inner,
                    Error::Internal("timed out connecting to host".to_string()),
                ))
            }
        };
        let (mut reader, writer) = tokio::io::split(stream);

        // The greeting is read before anything can be pipelined; its first
        // untagged line is the terminator.
        let mut greeting = Accumulator::new(Tag::connect());
        match bounded(deadline, read_greeting(&mut reader, &mut greeting)).await {
            Some(Ok(())) => {}
            Some(Err(error)) => return Err(self.shared.raise(&mut inner, error)),
            None => {
                return Err(self.shared.raise(
                    &mut inner,
                    Error::Internal("timed out waiting for greeting".to_string()),
                ))
            }
        }

        let state = match greeting.untagged() {
            [(ResponseCode::Ok, _)] => ConnectionState::Connected,
            [(ResponseCode::PreAuth, _)] => ConnectionState::Authenticated,
            _ => {
                return Err(self.shared.raise(
                    &mut inner,
                    Error::Unexpected("unexpected greeting response".to_string()),
                ))
            }
        };
        let leftover = greeting.take_remaining();
        if !leftover.is_empty() {
            warn!(len = leftover.len(), "discarding bytes received before any command");
        }

        let tags = TagGenerator::new();
        info!(label = %tags.label(), "connection established");

        inner.state = state;
        inner.writer = Some(writer);
        inner.tags = Some(tags);
        inner.epoch += 1;
        let epoch = inner.epoch;
        drop(inner);

        tokio::spawn(read_loop(Arc::clone(&self.shared), reader, epoch));
        Ok(())
    }

    /// Initiates a graceful close. The dispatch task observes the peer's
    /// close, fails any still-pending commands with `Internal` and fires
    /// the `disconnected` signal.
    ///
    /// Fails with `Duplicate` when already disconnected.
    pub async fn disconnect(&self) -> Result<(), Error> {
        let mut inner = self.shared.inner.lock().await;
        if inner.state == ConnectionState::Disconnected {
            return Err(self.shared.raise(
                &mut inner,
                Error::Duplicate("connection has not been established".to_string()),
            ));
        }
        info!("disconnecting");
        let writer = inner.writer.take();
        drop(inner);
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
        Ok(())
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<CommandHandle, Error> {
        self.request(CommandBuilder::login(username, password)).await
    }

    pub async fn logout(&self) -> Result<CommandHandle, Error> {
        self.request(CommandBuilder::logout()).await
    }

    /// `LIST <reference> <pattern>`; quoting is supplied by the caller.
    pub async fn list(&self, reference: &str, pattern: &str) -> Result<CommandHandle, Error> {
        self.request(CommandBuilder::list(reference, pattern)).await
    }

    pub async fn select(&self, mailbox: &str) -> Result<CommandHandle, Error> {
        self.request(CommandBuilder::select(mailbox)).await
    }

    pub async fn noop(&self) -> Result<CommandHandle, Error> {
        self.request(CommandBuilder::noop()).await
    }

    pub async fn search(&self, criteria: SearchCriteria) -> Result<CommandHandle, Error> {
        self.request(CommandBuilder::search(criteria)).await
    }

    /// Fetches `range` messages starting at sequence number `id`.
    pub async fn fetch(
        &self,
        id: u64,
        fields: FetchFields,
        range: u64,
    ) -> Result<CommandHandle, Error> {
        self.request(CommandBuilder::fetch(id, fields, range)).await
    }

    /// Pops the next completed payload, in completion order (which equals
    /// submission order). Logs a warning and returns `None` when empty.
    pub async fn read(&self) -> Option<Payload> {
        let mut inner = self.shared.inner.lock().await;
        let payload = inner.readable.pop_front();
        if payload.is_none() {
            warn!("no completed response to read");
        }
        payload
    }

    /// Parks until a payload completes or `error_occurred` fires. Returns
    /// immediately when a completed payload is already readable.
    pub async fn wait_for_ready_read(&self, timeout_ms: i64) -> bool {
        {
            let inner = self.shared.inner.lock().await;
            if !inner.readable.is_empty() {
                return true;
            }
        }
        self.wait_for(&self.shared.ready_read, timeout_ms).await
    }

    /// Parks until the transport closes or `error_occurred` fires.
    pub async fn wait_for_disconnected(&self, timeout_ms: i64) -> bool {
        self.wait_for(&self.shared.disconnected, timeout_ms).await
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.inner.lock().await.state
    }

    pub async fn is_connected(&self) -> bool {
        matches!(
            self.state().await,
            ConnectionState::Connected | ConnectionState::Authenticated
        )
    }

    pub async fn is_disconnected(&self) -> bool {
        self.state().await == ConnectionState::Disconnected
    }

    /// Kind of the most recent error, `NoErr` when none is pending.
    pub async fn error(&self) -> ErrorKind {
        let inner = self.shared.inner.lock().await;
        inner.last_error.as_ref().map_or(ErrorKind::NoErr, Error::kind)
    }

    /// Message of the most recent error, empty when none is pending.
    pub async fn error_string(&self) -> String {
        let inner = self.shared.inner.lock().await;
        inner
            .last_error
            .as_ref()
            .map(|error| error.message().to_string())
            .unwrap_or_default()
    }

    pub async fn reset_error(&self) {
        self.shared.inner.lock().await.last_error = None;
    }

    // Tag allocation, queue append and the write share one critical
    // section, so wire order always equals queue order.
    async fn request(&self, command: Command) -> Result<CommandHandle, Error> {
        let (kind, args) = command.into_parts();
        let mut inner = self.shared.inner.lock().await;

        if inner.state == ConnectionState::Disconnected {
            return Err(self.shared.raise(
                &mut inner,
                Error::NotConnected("connection has not been established".to_string()),
            ));
        }
        let Some(tags) = inner.tags.as_mut() else {
            return Err(self.shared.raise(
                &mut inner,
                Error::Internal("connection is shutting down".to_string()),
            ));
        };
        let tag = tags.generate();

        let mut line = Vec::with_capacity(tag.as_str().len() + args.len() + 3);
        line.extend_from_slice(tag.as_bytes());
        line.push(b' ');
        line.extend_from_slice(&args);
        line.extend_from_slice(b"\r\n");

        debug!(%tag, ?kind, "submitting command");

        let (tx, rx) = oneshot::channel();
        inner.queue.push_back(QueueEntry {
            kind,
            acc: Accumulator::new(tag),
            done: tx,
        });

        let written = match inner.writer.as_mut() {
            Some(writer) => match writer.write_all(&line).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            },
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is shutting down",
            )),
        };

        if let Err(e) = written {
            // the entry must not outlive a failed write
            inner.queue.pop_back();
            return Err(self.shared.raise(&mut inner, Error::Internal(e.to_string())));
        }

        Ok(CommandHandle { rx })
    }

    async fn wait_for(&self, signal: &Notify, timeout_ms: i64) -> bool {
        let wait = async {
            tokio::select! {
                _ = signal.notified() => true,
                _ = self.shared.error_occurred.notified() => false,
            }
        };
        match deadline(timeout_ms) {
            Some(limit) => timeout(limit, wait).await.unwrap_or(false),
            None => wait.await,
        }
    }
}

fn deadline(timeout_ms: i64) -> Option<Duration> {
    (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms as u64))
}

async fn bounded<T>(limit: Option<Duration>, fut: impl std::future::Future<Output = T>) -> Option<T> {
    match limit {
        Some(limit) => timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

async fn read_greeting(
    reader: &mut ReadHalf<Stream>,
    greeting: &mut Accumulator,
) -> Result<(), Error> {
    let mut buf = [0u8; 4096];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        if n == 0 {
            return Err(Error::Internal(
                "connection closed before greeting".to_string(),
            ));
        }
        match greeting.digest(&buf[..n]) {
            Digest::Complete => return Ok(()),
            Digest::NeedMore => continue,
            Digest::Failed => return Err(Error::Parse("invalid greeting".to_string())),
        }
    }
}

async fn read_loop(shared: Arc<Shared>, mut reader: ReadHalf<Stream>, epoch: u64) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                close(&shared, epoch).await;
                return;
            }
            Ok(n) => {
                if !dispatch(&shared, epoch, &buf[..n]).await {
                    return;
                }
            }
            Err(e) => {
                if !transport_error(&shared, epoch, e.to_string()).await {
                    return;
                }
            }
        }
    }
}

// Advance the head-of-queue accumulator with newly arrived bytes,
// completing commands as their tagged lines land. Bytes past a completed
// response are fed to the next head (pipelining). Returns false when this
// reader generation is stale.
async fn dispatch(shared: &Shared, epoch: u64, chunk: &[u8]) -> bool {
    let mut inner = shared.inner.lock().await;
    if inner.epoch != epoch {
        return false;
    }

    let mut data = BytesMut::from(chunk);
    loop {
        let digest = match inner.queue.front_mut() {
            None => {
                warn!(len = data.len(), "discarding response bytes with no command in flight");
                return true;
            }
            Some(entry) => entry.acc.digest(&data),
        };
        data.clear();

        match digest {
            Digest::NeedMore => return true,
            Digest::Failed => {
                if let Some(entry) = inner.queue.pop_front() {
                    warn!(tag = %entry.acc.tag(), kind = ?entry.kind, "failed to parse response");
                    let error = Error::Parse("invalid response".to_string());
                    inner.last_error = Some(error.clone());
                    let _ = entry.done.send(Err(error));
                    shared.error_occurred.notify_waiters();
                }
                return true;
            }
            Digest::Complete => {
                let Some(entry) = inner.queue.pop_front() else {
                    return true;
                };
                let QueueEntry { kind, mut acc, done } = entry;
                let rest = acc.take_remaining();

                match handler::dispatch(kind, acc) {
                    Ok(payload) => {
                        if kind == CommandKind::Login {
                            inner.state = ConnectionState::Authenticated;
                        }
                        inner.readable.push_back(payload.clone());
                        let _ = done.send(Ok(payload));
                        shared.ready_read.notify_one();
                    }
                    Err(error) => {
                        inner.last_error = Some(error.clone());
                        let _ = done.send(Err(error));
                        shared.error_occurred.notify_waiters();
                    }
                }

                if rest.is_empty() {
                    return true;
                }
                data = rest;
            }
        }
    }
}

// Transport error. Attributed to the head entry only: that command's
// handle resolves with `Internal`, the rest of the pipeline and the
// connection stay alive. With nothing in flight the error lands in the
// global slot and the connection is torn down instead. Returns false once
// the reader should stop.
async fn transport_error(shared: &Shared, epoch: u64, message: String) -> bool {
    {
        let mut inner = shared.inner.lock().await;
        if inner.epoch != epoch {
            return false;
        }
        warn!(%message, "transport error");
        inner.last_error = Some(Error::Internal(message.clone()));
        if let Some(entry) = inner.queue.pop_front() {
            let _ = entry.done.send(Err(Error::Internal(message)));
            shared.error_occurred.notify_waiters();
            return true;
        }
        shared.error_occurred.notify_waiters();
    }
    close(shared, epoch).await;
    false
}

// Transport disconnection: everything still in flight fails with
// `Internal` and the engine resets to `Disconnected`.
async fn close(shared: &Shared, epoch: u64) {
    let mut inner = shared.inner.lock().await;
    if inner.epoch != epoch {
        return;
    }

    while let Some(entry) = inner.queue.pop_front() {
        let _ = entry
            .done
            .send(Err(Error::Internal("connection closed".to_string())));
    }

    inner.state = ConnectionState::Disconnected;
    inner.writer = None;
    inner.tags = None;

    info!("disconnected");
    shared.disconnected.notify_one();
}
