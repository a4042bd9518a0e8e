use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// TCP port the bulbs listen on for control connections.
pub const DEFAULT_DEVICE_PORT: u16 = 55443;

/// Multicast group used for SSDP-style discovery.
pub const DISCOVERY_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const DISCOVERY_PORT: u16 = 1982;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_DISCOVERY_WINDOW: Duration = Duration::from_secs(3);
const DEFAULT_DISCOVERY_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// What the reader does with a frame that does not decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedFramePolicy {
    /// End the session, the consumer sees the response stream close.
    #[default]
    EndSession,
    /// Log the frame and keep reading.
    Skip,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Responses buffered before the reader stops pulling from the socket.
    pub channel_capacity: usize,
    pub malformed_frames: MalformedFramePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            malformed_frames: MalformedFramePolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// How long replies are collected after the query is sent.
    pub window: Duration,
    /// Deadline for a single receive inside the window.
    pub read_timeout: Duration,
    /// Where the search query is sent. Normally the multicast group.
    pub target: SocketAddr,
    pub ttl: u32,
    /// Bind `listen_port` and join the discovery group, so bulbs announcing
    /// themselves with `NOTIFY` are collected along with search replies.
    pub join_group: bool,
    pub listen_port: u16,
}

impl DiscoveryOptions {
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Listens on an ephemeral port for direct replies only when `false`.
    pub fn with_group_membership(mut self, join_group: bool) -> Self {
        self.join_group = join_group;
        self
    }

    pub fn with_listen_port(mut self, listen_port: u16) -> Self {
        self.listen_port = listen_port;
        self
    }
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        DiscoveryOptions {
            window: DEFAULT_DISCOVERY_WINDOW,
            read_timeout: DEFAULT_DISCOVERY_READ_TIMEOUT,
            target: SocketAddr::V4(SocketAddrV4::new(DISCOVERY_GROUP, DISCOVERY_PORT)),
            ttl: 2,
            join_group: true,
            listen_port: DISCOVERY_PORT,
        }
    }
}
