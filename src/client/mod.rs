//! Client side of the command WebSocket.
//!
//! A background thread keeps a connection to the server open, reconnecting
//! with backoff when it drops. Results coming back are dispatched by handler
//! name to the handlers registered on the channel.

use std::io;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, info, warn};
use thiserror::Error;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::envelope::{CommandRequest, Envelope, HandlerRegistry};
use crate::host::Link;

mod state;
pub use self::state::{Change, ControlState, ViewState};

/// How long a read waits before outgoing messages get a turn.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Reconnect delays: start at 1 s, grow by half each failure, cap at 30 s.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Backoff {
        Backoff {
            initial,
            max,
            factor,
            current: initial,
        }
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(self.factor).min(self.max);
        delay
    }

    /// Back to the initial delay, after a successful connect.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Backoff {
        Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 1.5)
    }
}

/// Client-side envelope processing.
pub trait ClientHandler: Send {
    fn process(&mut self, envelope: &Envelope);
}

pub type ClientRegistry = HandlerRegistry<Box<dyn ClientHandler>>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,
    #[error("channel closed")]
    Closed,
    #[error("unable to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A self-healing connection to the command server.
pub struct ClientChannel {
    outgoing: Sender<String>,
    registry: Arc<Mutex<ClientRegistry>>,
    link: Link,
    _shutdown: Sender<()>,
    _worker: JoinHandle<()>,
}

impl ClientChannel {
    /// Start connecting to `url` (e.g. "ws://localhost:4567/command").
    pub fn start(url: &str, registry: ClientRegistry) -> io::Result<ClientChannel> {
        let (outgoing, outgoing_rx) = channel::unbounded::<String>();
        let (shutdown, shutdown_rx) = channel::bounded::<()>(0);
        let registry = Arc::new(Mutex::new(registry));
        let link = Link::new(false);

        let worker = Worker {
            url: url.to_string(),
            registry: registry.clone(),
            link: link.clone(),
            outgoing: outgoing_rx,
            shutdown: shutdown_rx,
        };
        let worker = thread::Builder::new()
            .name("command-client".to_string())
            .spawn(move || worker.run())?;

        Ok(ClientChannel {
            outgoing,
            registry,
            link,
            _shutdown: shutdown,
            _worker: worker,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_up()
    }

    /// Register (or replace) a handler while the channel runs.
    pub fn register_handler<S: Into<String>>(
        &self,
        name: S,
        handler: Box<dyn ClientHandler>,
    ) -> Option<Box<dyn ClientHandler>> {
        match self.registry.lock() {
            Ok(mut registry) => registry.register(name, handler),
            Err(poisoned) => poisoned.into_inner().register(name, handler),
        }
    }

    /// Queue a request. Requests are refused while disconnected rather than
    /// replayed later.
    pub fn send(&self, request: &CommandRequest) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let text = request.to_envelope().encode()?;
        self.outgoing.send(text).map_err(|_| ClientError::Closed)
    }
}

enum Pump {
    /// The connection dropped; reconnect.
    Dropped,
    /// The channel was dropped; stop.
    Shutdown,
}

struct Worker {
    url: String,
    registry: Arc<Mutex<ClientRegistry>>,
    link: Link,
    outgoing: Receiver<String>,
    shutdown: Receiver<()>,
}

impl Worker {
    fn run(self) {
        let mut backoff = Backoff::default();

        loop {
            match tungstenite::connect(self.url.as_str()) {
                Ok((mut socket, _)) => {
                    info!("[client] Connected to {}", self.url);
                    backoff.reset();
                    if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
                        if let Err(err) = stream.set_read_timeout(Some(POLL_INTERVAL)) {
                            warn!("[client] Unable to set read timeout: {}", err);
                        }
                    }
                    // Anything queued for the previous connection is stale.
                    while self.outgoing.try_recv().is_ok() {}
                    self.link.set(true);

                    let pump = self.pump(&mut socket);
                    self.link.set(false);
                    if let Pump::Shutdown = pump {
                        socket.close(None).ok();
                        return;
                    }
                    info!("[client] Connection to {} lost", self.url);
                }
                Err(err) => debug!("[client] Unable to connect to {}: {}", self.url, err),
            }

            let delay = backoff.next_delay();
            debug!("[client] Reconnecting in {:?}", delay);
            match self.shutdown.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return,
            }
        }
    }

    fn pump(&self, socket: &mut WebSocket<MaybeTlsStream<TcpStream>>) -> Pump {
        loop {
            if let Err(TryRecvError::Disconnected) = self.shutdown.try_recv() {
                return Pump::Shutdown;
            }

            while let Ok(text) = self.outgoing.try_recv() {
                if let Err(err) = socket.send(Message::Text(text)) {
                    warn!("[client] Send failed: {}", err);
                    return Pump::Dropped;
                }
            }

            match socket.read() {
                Ok(Message::Text(text)) => self.dispatch(&text),
                Ok(Message::Close(_)) => return Pump::Dropped,
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref err))
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::TimedOut => {}
                Err(err) => {
                    warn!("[client] Read failed: {}", err);
                    return Pump::Dropped;
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        let envelope = match Envelope::decode(text) {
            Some(envelope) => envelope,
            None => return,
        };
        let mut registry = match self.registry.lock() {
            Ok(registry) => registry,
            Err(poisoned) => poisoned.into_inner(),
        };
        match registry.get_mut(&envelope.handler) {
            Some(handler) => handler.process(&envelope),
            None => debug!("[client] No handler named {:?}", envelope.handler),
        }
    }
}
