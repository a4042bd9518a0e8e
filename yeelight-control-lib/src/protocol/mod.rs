use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::config::{ClientConfig, MalformedFramePolicy};
use crate::error::{Error, Result};

use self::channel::{Publisher, ResponseChannel};
use self::command::Command;
use self::response::Response;

pub mod channel;
pub mod command;
pub mod response;

/// The operations a [`crate::device::Device`] needs from a connection.
///
/// [`YeelightClient`] is the TCP implementation; tests substitute their own.
#[async_trait]
pub trait Client: Send + Sync {
    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    async fn send_command(&mut self, command: &Command) -> Result<()>;

    /// The response channel of the current connection.
    fn responses(&self) -> Result<ResponseChannel>;

    fn is_connected(&self) -> bool;

    fn address(&self) -> SocketAddr;

    /// Id of the last command written to the wire, if any.
    fn last_command_id(&self) -> Option<u32>;
}

/// Why the reader of a connection stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// [`Client::disconnect`] was called.
    Disconnected,
    /// The bulb closed the socket.
    PeerClosed,
    Io(String),
    /// A frame did not decode and the session was ended.
    Malformed(String),
    /// Every response channel handle was dropped while the session was live.
    ConsumerGone,
}

struct Connection {
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
    channel: ResponseChannel,
    session_end: Arc<Mutex<Option<SessionEnd>>>,
}

/// A TCP connection to one bulb.
pub struct YeelightClient {
    address: SocketAddr,
    config: ClientConfig,
    connection: Option<Connection>,
    last_command_id: Option<u32>,
    last_session_end: Option<Arc<Mutex<Option<SessionEnd>>>>,
}

impl YeelightClient {
    pub fn new(address: SocketAddr) -> Self {
        Self::with_config(address, ClientConfig::default())
    }

    pub fn with_config(address: SocketAddr, config: ClientConfig) -> Self {
        YeelightClient {
            address,
            config,
            connection: None,
            last_command_id: None,
            last_session_end: None,
        }
    }

    /// How the reader of the current or most recent connection ended.
    ///
    /// `None` while the reader is still running or before the first connect.
    pub fn session_end(&self) -> Option<SessionEnd> {
        let slot = match &self.connection {
            Some(connection) => &connection.session_end,
            None => self.last_session_end.as_ref()?,
        };
        slot.lock().ok().and_then(|end| end.clone())
    }
}

#[async_trait]
impl Client for YeelightClient {
    async fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Err(Error::AlreadyConnected);
        }

        let address = self.address;
        debug!("Connecting to {}", address);
        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| Error::Transport { address, source })?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle on {}: {}", address, err);
        }

        let (read_half, writer) = stream.into_split();
        let (publisher, channel) = channel::session(self.config.channel_capacity);
        let session_end = Arc::new(Mutex::new(None));
        let reader = tokio::spawn(read_loop(
            address,
            BufReader::new(read_half),
            publisher,
            self.config.malformed_frames,
            session_end.clone(),
        ));

        self.connection = Some(Connection {
            writer,
            reader,
            channel,
            session_end,
        });
        info!("Connected to {}", address);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let connection = self.connection.take().ok_or(Error::NotConnected)?;

        // The flag must flip before the socket goes away so the reader never
        // publishes into a session the caller considers closed.
        connection.channel.close();
        record_end(&connection.session_end, SessionEnd::Disconnected);

        let mut writer = connection.writer;
        if let Err(err) = writer.shutdown().await {
            debug!("Shutdown of {} failed: {}", self.address, err);
        }
        connection.reader.abort();
        // Dropping the task releases the read half, closing the socket.
        let _ = connection.reader.await;
        drop(writer);

        self.last_session_end = Some(connection.session_end);
        info!("Disconnected from {}", self.address);
        Ok(())
    }

    async fn send_command(&mut self, command: &Command) -> Result<()> {
        let address = self.address;
        let connection = self.connection.as_mut().ok_or(Error::NotConnected)?;

        let frame = command.encode()?;
        connection
            .writer
            .write_all(&frame)
            .await
            .map_err(|source| Error::Transport { address, source })?;

        debug!("Sent {} (id {}) to {}", command.method, command.id, address);
        self.last_command_id = Some(command.id);
        Ok(())
    }

    fn responses(&self) -> Result<ResponseChannel> {
        self.connection
            .as_ref()
            .map(|connection| connection.channel.clone())
            .ok_or(Error::NotConnected)
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn address(&self) -> SocketAddr {
        self.address
    }

    fn last_command_id(&self) -> Option<u32> {
        self.last_command_id
    }
}

impl Drop for YeelightClient {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.channel.close();
            connection.reader.abort();
        }
    }
}

fn record_end(slot: &Mutex<Option<SessionEnd>>, end: SessionEnd) {
    if let Ok(mut slot) = slot.lock() {
        slot.get_or_insert(end);
    }
}

async fn read_loop<R>(
    address: SocketAddr,
    mut reader: R,
    publisher: Publisher,
    policy: MalformedFramePolicy,
    session_end: Arc<Mutex<Option<SessionEnd>>>,
) where
    R: AsyncBufRead + Unpin,
{
    let end = read_frames(address, &mut reader, &publisher, policy).await;
    match &end {
        SessionEnd::Disconnected => debug!("Reader for {} stopped after disconnect", address),
        SessionEnd::PeerClosed => info!("{} closed the connection", address),
        SessionEnd::Io(err) => warn!("Read from {} failed: {}", address, err),
        SessionEnd::Malformed(err) => {
            warn!("Ending session with {} after malformed frame: {}", address, err)
        }
        SessionEnd::ConsumerGone => debug!("No consumers left for {}, reader stopped", address),
    }
    record_end(&session_end, end);
}

async fn read_frames<R>(
    address: SocketAddr,
    reader: &mut R,
    publisher: &Publisher,
    policy: MalformedFramePolicy,
) -> SessionEnd
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        if !publisher.is_live() {
            return SessionEnd::Disconnected;
        }

        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => return SessionEnd::PeerClosed,
            Ok(_) => {}
            Err(err) => return SessionEnd::Io(err.to_string()),
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match Response::parse(&line) {
            Ok(response) => response,
            Err(err) => match policy {
                MalformedFramePolicy::EndSession => return SessionEnd::Malformed(err.to_string()),
                MalformedFramePolicy::Skip => {
                    warn!("Skipping malformed frame from {}: {}", address, err);
                    continue;
                }
            },
        };
        debug!("Received {} from {}", response.kind(), address);

        if !publisher.publish(response).await {
            return if publisher.is_live() {
                SessionEnd::ConsumerGone
            } else {
                SessionEnd::Disconnected
            };
        }
    }
}
