//! HMTL modules on a serial port.

use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use super::{EffectHost, HostError, HostResult, Link};
use crate::protocol;

/// How often a closed port is reopened.
const RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Module replies, one per line.
const REPLY_ACK: &str = "ok";
const REPLY_FAIL: &str = "fail";
const REPLY_READY: &str = "ready";

/// Serial bus settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path to a serial device. Without one the bus runs dry.
    pub path: Option<String>,
    pub baud: u32,
    /// Write (and confirmation) timeout.
    pub timeout: Duration,
    /// Wait for the module's "ok" after each frame.
    pub confirm: bool,
    /// Opening the port resets the module. Wait this long for its "ready"
    /// before taking the link up.
    pub ready_wait: Option<Duration>,
}

/// Anything the worker can talk HMTL over.
trait Port: Read + Write + Send {}

impl<T: Read + Write + Send> Port for T {}

struct Job {
    frame: Vec<u8>,
    /// The frame must start going out before this, or not at all.
    deadline: Instant,
    reply: Sender<HostResult<()>>,
}

/// The serial bus passes frames to HMTL modules through one serial port.
///
/// The port is owned by a worker thread, so frames from every device on the
/// bus go out one at a time.
pub struct SerialBus {
    link: Link,
    jobs: Sender<Job>,
    timeout: Duration,
    _worker: JoinHandle<()>,
}

impl SerialBus {
    /// Start the bus worker. The link stays down until the port is open and
    /// the module is ready.
    pub fn start(name: &str, settings: Settings) -> io::Result<SerialBus> {
        info!("[serial] {} @ {:?}", name, settings.path);
        let link = Link::new(settings.path.is_none());
        Self::spawn(Worker::new(name.to_string(), settings, link, None))
    }

    fn spawn(worker: Worker) -> io::Result<SerialBus> {
        let (jobs, receiver) = channel::unbounded::<Job>();
        let link = worker.link.clone();
        let timeout = worker.settings.timeout;
        let worker = thread::Builder::new()
            .name(format!("serial-{}", worker.name))
            .spawn(move || worker.run(receiver))?;

        Ok(SerialBus {
            link,
            jobs,
            timeout,
            _worker: worker,
        })
    }
}

impl EffectHost for SerialBus {
    fn link(&self) -> Link {
        self.link.clone()
    }

    fn transmit(&self, frame: &[u8]) -> HostResult<()> {
        // Queueing behind other devices counts against the deadline too.
        let budget = self.timeout * 2;
        let (reply, result) = channel::bounded(1);
        self.jobs
            .send(Job {
                frame: frame.to_vec(),
                deadline: Instant::now() + budget,
                reply,
            })
            .map_err(|_| HostError::Disconnected)?;

        // The worker answers every job: a late one is refused without being
        // written, a started one finishes within its write and confirmation.
        match result.recv_timeout(budget * 2) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(HostError::Timeout(budget)),
            Err(RecvTimeoutError::Disconnected) => Err(HostError::Disconnected),
        }
    }
}

struct Worker {
    name: String,
    settings: Settings,
    link: Link,
    port: Option<Box<dyn Port>>,
}

impl Worker {
    fn new(name: String, settings: Settings, link: Link, port: Option<Box<dyn Port>>) -> Worker {
        Worker {
            name,
            settings,
            link,
            port,
        }
    }

    fn run(mut self, receiver: Receiver<Job>) {
        self.reopen();
        loop {
            match receiver.recv_timeout(RETRY_INTERVAL) {
                Ok(job) => self.handle(job),
                Err(RecvTimeoutError::Timeout) => self.reopen(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("[serial] {} shutting down.", self.name);
    }

    fn handle(&mut self, job: Job) {
        let result = if Instant::now() >= job.deadline {
            warn!("[serial] {} dropping a frame that waited too long", self.name);
            Err(HostError::Timeout(self.settings.timeout * 2))
        } else {
            self.write_frame(&job.frame)
        };
        // The caller may have given up already.
        job.reply.send(result).ok();
    }

    /// Try to open the port if it isn't open.
    fn reopen(&mut self) {
        let path = match (&self.port, &self.settings.path) {
            (None, Some(path)) => path.clone(),
            _ => return,
        };

        match serialport::new(&path, self.settings.baud)
            .timeout(self.settings.timeout)
            .open()
        {
            Ok(port) => {
                info!("[serial] {} opened {}", self.name, path);
                self.attach(Box::new(port));
            }
            Err(err) => {
                debug!("[serial] {} unable to open {}: {}", self.name, path, err);
                self.link.set(false);
            }
        }
    }

    /// Take over a freshly opened port, waiting for the module to come up.
    fn attach(&mut self, port: Box<dyn Port>) {
        self.port = Some(port);

        if let Some(wait) = self.settings.ready_wait {
            if let Err(err) = self.read_reply(wait, &[REPLY_READY]) {
                warn!("[serial] {} never got ready: {}", self.name, err);
                self.port = None;
                self.link.set(false);
                return;
            }
            info!("[serial] {} module ready", self.name);
        }
        self.link.set(true);
    }

    fn write_frame(&mut self, frame: &[u8]) -> HostResult<()> {
        if self.settings.path.is_none() {
            match protocol::decode(frame) {
                Ok(msg) => info!("[serial] {} (dry) {:?}", self.name, msg),
                Err(err) => warn!("[serial] {} (dry) undecodable frame: {}", self.name, err),
            }
            return Ok(());
        }

        let port = self.port.as_mut().ok_or(HostError::Disconnected)?;
        let written = port.write_all(frame).and_then(|_| port.flush());
        if let Err(err) = written {
            error!("[serial] {} write failed: {}", self.name, err);
            self.drop_port();
            return Err(HostError::Io(err));
        }
        debug!("[serial] {} wrote {} B", self.name, frame.len());

        if !self.settings.confirm {
            return Ok(());
        }
        match self.read_reply(self.settings.timeout, &[REPLY_ACK, REPLY_FAIL])?.as_str() {
            REPLY_FAIL => Err(HostError::Rejected),
            _ => Ok(()),
        }
    }

    /// Read reply lines until one of `expected` arrives, and return it.
    fn read_reply(&mut self, wait: Duration, expected: &[&str]) -> HostResult<String> {
        let deadline = Instant::now() + wait;
        let port = self.port.as_mut().ok_or(HostError::Disconnected)?;
        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        while Instant::now() < deadline {
            match port.read(&mut byte) {
                Ok(0) => continue,
                Ok(_) if byte[0] == b'\n' => {
                    let text = String::from_utf8_lossy(&line).trim().to_string();
                    line.clear();
                    if expected.contains(&text.as_str()) {
                        return Ok(text);
                    }
                    // Modules print debug output on the same line.
                    debug!("[serial] {} says: {}", self.name, text);
                }
                Ok(_) => line.push(byte[0]),
                Err(err) if err.kind() == io::ErrorKind::TimedOut => continue,
                Err(err) => {
                    error!("[serial] {} read failed: {}", self.name, err);
                    self.drop_port();
                    return Err(HostError::Io(err));
                }
            }
        }

        Err(HostError::Timeout(wait))
    }

    fn drop_port(&mut self) {
        self.port = None;
        self.link.set(false);
    }
}
