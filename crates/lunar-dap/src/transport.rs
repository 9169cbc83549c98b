//! Transport abstraction between the adapter and the DAP client.
//!
//! The adapter runs on the VM thread and consumes requests at hook
//! boundaries: blocking while the debuggee is stopped, polling while it
//! runs. [`StdioTransport`] implements that with a reader thread that
//! parses frames into a queue; [`QueueTransport`] is the deterministic
//! in-memory double the tests drive sessions through.

use std::collections::VecDeque;
use std::io::{self, BufReader, Read, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;

use serde_json::Value;

use crate::dap::codec;
use crate::dap::messages::Request;

pub trait Transport {
    /// Block until the next request, `Ok(None)` on end of stream.
    fn recv(&mut self) -> io::Result<Option<Request>>;

    /// Non-blocking poll; `Ok(None)` when no request is pending.
    fn try_recv(&mut self) -> io::Result<Option<Request>>;

    fn send(&mut self, message: &Value) -> io::Result<()>;

    /// Session lifecycle hooks; entering `initialized` opens the session and
    /// entering `terminated` closes it.
    fn open(&mut self) {}
    fn close(&mut self) {}
}

/// DAP over stdio (or any read/write pair): a reader thread hands parsed
/// requests to a channel consumed on the VM thread.
pub struct StdioTransport {
    incoming: Receiver<io::Result<Request>>,
    writer: Box<dyn Write + Send>,
}

impl StdioTransport {
    pub fn stdio() -> Self {
        Self::new(io::stdin(), io::stdout())
    }

    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("lunar-dap-reader".to_string())
            .spawn(move || {
                let mut reader = BufReader::new(reader);
                loop {
                    match codec::read_message::<_, Request>(&mut reader) {
                        Ok(Some(request)) => {
                            if tx.send(Ok(request)).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            let _ = tx.send(Err(err.into()));
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn DAP reader thread");

        StdioTransport { incoming: rx, writer: Box::new(writer) }
    }
}

impl Transport for StdioTransport {
    fn recv(&mut self) -> io::Result<Option<Request>> {
        match self.incoming.recv() {
            Ok(Ok(request)) => Ok(Some(request)),
            Ok(Err(err)) => Err(err),
            // Reader thread finished: end of stream.
            Err(_) => Ok(None),
        }
    }

    fn try_recv(&mut self) -> io::Result<Option<Request>> {
        match self.incoming.try_recv() {
            Ok(Ok(request)) => Ok(Some(request)),
            Ok(Err(err)) => Err(err),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(None),
        }
    }

    fn send(&mut self, message: &Value) -> io::Result<()> {
        codec::write_message(&mut self.writer, message).map_err(io::Error::from)
    }
}

/// Everything a [`QueueTransport`] session produced, shared with the test
/// that constructed it.
#[derive(Debug, Default)]
pub struct Recorded {
    pub messages: Vec<Value>,
    pub opened: u32,
    pub closed: u32,
}

/// In-memory transport for deterministic tests.
///
/// `queued` requests are delivered at blocking receive points only,
/// modeling a client that writes in lockstep with stops; `polled` requests
/// are delivered through `try_recv`, modeling a client that writes while
/// the debuggee is running.
pub struct QueueTransport {
    queued: VecDeque<Request>,
    polled: VecDeque<Request>,
    recorded: Arc<Mutex<Recorded>>,
}

impl QueueTransport {
    pub fn new(queued: Vec<Request>) -> (Self, Arc<Mutex<Recorded>>) {
        Self::with_polled(queued, Vec::new())
    }

    pub fn with_polled(
        queued: Vec<Request>,
        polled: Vec<Request>,
    ) -> (Self, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let transport = QueueTransport {
            queued: queued.into(),
            polled: polled.into(),
            recorded: recorded.clone(),
        };
        (transport, recorded)
    }
}

impl Transport for QueueTransport {
    fn recv(&mut self) -> io::Result<Option<Request>> {
        Ok(self.queued.pop_front())
    }

    fn try_recv(&mut self) -> io::Result<Option<Request>> {
        Ok(self.polled.pop_front())
    }

    fn send(&mut self, message: &Value) -> io::Result<()> {
        self.recorded.lock().unwrap().messages.push(message.clone());
        Ok(())
    }

    fn open(&mut self) {
        self.recorded.lock().unwrap().opened += 1;
    }

    fn close(&mut self) {
        self.recorded.lock().unwrap().closed += 1;
    }
}
