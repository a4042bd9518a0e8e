//! The response channel of one connection.
//!
//! Every connect opens a new session: a [`Publisher`] owned by the reader
//! task and a [`ResponseChannel`] handed out to consumers. Closing the
//! channel flips a flag shared by both sides, so nothing is delivered after
//! a disconnect even if frames are still buffered. When the publisher is
//! dropped, consumers drain what is queued and then see the end of the stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use super::response::Response;

/// Opens a session with room for `capacity` undelivered responses.
pub fn session(capacity: usize) -> (Publisher, ResponseChannel) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let live = Arc::new(AtomicBool::new(true));
    let publisher = Publisher {
        sender,
        live: live.clone(),
    };
    let channel = ResponseChannel {
        receiver: Arc::new(Mutex::new(receiver)),
        live,
    };
    (publisher, channel)
}

/// Producer side, held by whoever reads frames off the wire.
#[derive(Debug, Clone)]
pub struct Publisher {
    sender: mpsc::Sender<Response>,
    live: Arc<AtomicBool>,
}

impl Publisher {
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Queues a response, waiting while the channel is full.
    ///
    /// Returns `false` when the session has ended or every consumer is gone.
    pub async fn publish(&self, response: Response) -> bool {
        if !self.is_live() {
            return false;
        }
        self.sender.send(response).await.is_ok()
    }
}

/// Consumer side of a session.
///
/// Clones share the same queue; each response goes to exactly one reader.
#[derive(Debug, Clone)]
pub struct ResponseChannel {
    receiver: Arc<Mutex<mpsc::Receiver<Response>>>,
    live: Arc<AtomicBool>,
}

impl ResponseChannel {
    /// Waits for the next response, in arrival order.
    ///
    /// Returns `None` once the session has ended, without waiting.
    pub async fn recv(&self) -> Option<Response> {
        if !self.is_open() {
            return None;
        }
        let mut receiver = self.receiver.lock().await;
        if !self.is_open() {
            receiver.close();
            return None;
        }
        let response = receiver.recv().await;
        if !self.is_open() {
            receiver.close();
            return None;
        }
        response
    }

    /// Returns a response if one is already queued.
    pub fn try_recv(&self) -> Option<Response> {
        if !self.is_open() {
            return None;
        }
        let mut receiver = self.receiver.try_lock().ok()?;
        receiver.try_recv().ok()
    }

    pub fn is_open(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Ends the session for every consumer and for the publisher.
    pub fn close(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}
