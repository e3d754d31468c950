//! The publisher-to-transport boundary: framing beyond the compact
//! measurement layout (command-channel vs data-channel, compression,
//! encryption) is applied by whatever implements [`Transport`], entirely
//! outside this core.

use std::io::Write;
use std::net::TcpStream;
use std::sync::Mutex;

use crate::error::PublisherError;

pub trait Transport: Send + Sync {
    fn send(&self, bytes: &[u8]) -> Result<(), PublisherError>;
}

/// Raw TCP transport used by the demo binary: one frame per `send` call,
/// length-prefixed so a peer can resynchronize on a partial read.
pub struct TcpTransport {
    stream: Mutex<TcpStream>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        TcpTransport {
            stream: Mutex::new(stream),
        }
    }
}

impl Transport for TcpTransport {
    fn send(&self, bytes: &[u8]) -> Result<(), PublisherError> {
        let mut stream = self.stream.lock().expect("transport stream lock poisoned");
        let len = bytes.len() as u32;
        stream
            .write_all(&len.to_be_bytes())
            .and_then(|_| stream.write_all(bytes))
            .map_err(|e| PublisherError::TransportFailure(e.to_string()))
    }
}
