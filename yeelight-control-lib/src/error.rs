use std::fmt;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors returned by the client, device and discovery APIs.
///
/// Failures of the background reader are deliberately absent: a dead
/// connection shows up as the end of the response stream, not as an error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("client is not connected")]
    NotConnected,

    #[error("client is already connected")]
    AlreadyConnected,

    #[error("transport error on {address}: {source}")]
    Transport {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("malformed response: {0}")]
    MalformedResponse(#[source] serde_json::Error),

    #[error("failed to encode command: {0}")]
    Encoding(#[source] serde_json::Error),

    #[error("discovery failed: {context}: {source}")]
    Discovery {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("device {address} is already connected")]
    DeviceConnected { address: SocketAddr },

    #[error("a device with address {address} is already in the group")]
    DuplicateAddress { address: SocketAddr },

    #[error("{0}")]
    Group(GroupFailures),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Per-member failures collected from a group broadcast.
#[derive(Debug, Default)]
pub struct GroupFailures {
    pub failures: Vec<(SocketAddr, Error)>,
}

impl GroupFailures {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }
}

impl fmt::Display for GroupFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} group member(s) failed", self.failures.len())?;
        for (address, error) in &self.failures {
            write!(f, "; {}: {}", address, error)?;
        }
        Ok(())
    }
}
