use std::cmp::max;
use std::fmt::{Display, Formatter};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use derivative::Derivative;
use log::{debug, info, warn};
use serde::Serialize;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

use crate::config::{DiscoveryOptions, DEFAULT_DEVICE_PORT, DISCOVERY_GROUP};
use crate::device::Device;
use crate::error::{Error, Result};

const SEARCH_MESSAGE: &[u8] = b"M-SEARCH * HTTP/1.1\r\nHOST: 239.255.255.250:1982\r\nMAN: \"ssdp:discover\"\r\nST: wifi_bulb";
const LOCATION_SCHEME: &str = "yeelight://";
const RECEIVE_BUFFER_SIZE: usize = 65536;

/// A bulb that answered the search query.
///
/// Two identifiers are equal when they share an IP address; the remaining
/// fields describe the bulb as it reported itself.
#[derive(Derivative)]
#[derivative(Hash, PartialEq, Eq)]
#[derive(Debug, Clone, Serialize)]
pub struct DeviceIdentifier {
    pub ip_address: Ipv4Addr,
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub port: u16,
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub device_id: Option<String>,
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub model: Option<String>,
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub firmware_version: Option<String>,
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub device_name: Option<String>,
    /// Methods the firmware advertises.
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub support: Vec<String>,
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub power: Option<String>,
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub brightness: Option<u8>,
}

impl DeviceIdentifier {
    pub fn new(ip_address: Ipv4Addr, port: u16) -> Self {
        DeviceIdentifier {
            ip_address,
            port,
            device_id: None,
            model: None,
            firmware_version: None,
            device_name: None,
            support: Vec::new(),
            power: None,
            brightness: None,
        }
    }

    /// Decodes a search reply. Returns `None` when it carries no usable
    /// `yeelight://` location.
    pub fn from_reply(data: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(data);
        let text = text.trim_matches('\0');

        let (ip_address, port) = text.lines().find_map(parse_location)?;
        let mut identifier = DeviceIdentifier::new(ip_address, port);

        for line in text.lines() {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match name.trim().to_ascii_lowercase().as_str() {
                "id" => identifier.device_id = Some(value.to_string()),
                "model" => identifier.model = Some(value.to_string()),
                "fw_ver" => identifier.firmware_version = Some(value.to_string()),
                "name" => identifier.device_name = Some(value.to_string()),
                "support" => {
                    identifier.support = value.split_whitespace().map(str::to_string).collect()
                }
                "power" => identifier.power = Some(value.to_string()),
                "bright" => identifier.brightness = value.parse().ok(),
                _ => {}
            }
        }
        Some(identifier)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip_address, self.port))
    }

    /// The reported name, or the IP address for unnamed bulbs.
    pub fn display_name(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| self.ip_address.to_string())
    }

    /// A disconnected [`Device`] for this bulb.
    pub fn into_device(self) -> Device {
        Device::new(&self.display_name(), self.socket_addr())
    }
}

impl Display for DeviceIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.socket_addr())
    }
}

/// Finds `yeelight://<ipv4>[:<port>]` on a header line.
fn parse_location(line: &str) -> Option<(Ipv4Addr, u16)> {
    let start = line.to_ascii_lowercase().find(LOCATION_SCHEME)? + LOCATION_SCHEME.len();
    let authority = line[start..]
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()?;
    match authority.split_once(':') {
        Some((host, port)) => Some((host.parse().ok()?, port.parse().ok()?)),
        None => Some((authority.parse().ok()?, DEFAULT_DEVICE_PORT)),
    }
}

/// Accumulates search replies, keeping the first one per IP address.
#[derive(Debug, Default)]
pub struct DiscoveryCollector {
    found: Vec<DeviceIdentifier>,
}

impl DiscoveryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the datagram introduced a new bulb.
    pub fn offer(&mut self, datagram: &[u8]) -> bool {
        let Some(identifier) = DeviceIdentifier::from_reply(datagram) else {
            debug!("Ignoring reply without a yeelight location");
            return false;
        };
        // Bulbs may answer one query more than once.
        if self.found.contains(&identifier) {
            debug!("Found device {} again, skipping", identifier.ip_address);
            return false;
        }
        info!("Found device: {}", identifier);
        self.found.push(identifier);
        true
    }

    pub fn len(&self) -> usize {
        self.found.len()
    }

    pub fn is_empty(&self) -> bool {
        self.found.is_empty()
    }

    pub fn into_identifiers(self) -> Vec<DeviceIdentifier> {
        self.found
    }

    pub fn into_devices(self) -> Vec<Device> {
        self.found
            .into_iter()
            .map(DeviceIdentifier::into_device)
            .collect()
    }
}

pub struct Discovery;

impl Discovery {
    /// Searches the LAN and returns one disconnected [`Device`] per bulb.
    pub async fn find_devices(options: &DiscoveryOptions) -> Result<Vec<Device>> {
        Self::find_identifiers(options).await.map(|identifiers| {
            identifiers
                .into_iter()
                .map(DeviceIdentifier::into_device)
                .collect()
        })
    }

    /// Sends the search query and collects replies until the window closes.
    ///
    /// Silence on a single read does not end the scan; bulbs answer at
    /// staggered times. With [`DiscoveryOptions::join_group`] set, `NOTIFY`
    /// announcements received during the window count as replies.
    pub async fn find_identifiers(options: &DiscoveryOptions) -> Result<Vec<DeviceIdentifier>> {
        let socket = open_socket(options).await?;
        socket
            .set_multicast_ttl_v4(options.ttl)
            .map_err(|source| Error::Discovery {
                context: "could not set multicast ttl",
                source,
            })?;
        socket
            .send_to(SEARCH_MESSAGE, options.target)
            .await
            .map_err(|source| Error::Discovery {
                context: "could not send search query",
                source,
            })?;
        debug!("Sent search query to {}", options.target);

        let mut collector = DiscoveryCollector::new();
        let mut buffer = vec![0u8; RECEIVE_BUFFER_SIZE];
        let window_end = Instant::now() + options.window;

        loop {
            let now = Instant::now();
            if now >= window_end {
                break;
            }
            let wait = (window_end - now).min(options.read_timeout);

            match timeout(wait, socket.recv_from(&mut buffer)).await {
                Ok(Ok((0, _))) => continue,
                Ok(Ok((number_of_bytes, source))) => {
                    debug!("Reply of {} bytes from {}", number_of_bytes, source);
                    collector.offer(&buffer[..number_of_bytes]);
                }
                Ok(Err(e)) if is_transient(&e) => {
                    debug!("Transient receive error during discovery: {}", e);
                }
                Ok(Err(e)) => {
                    warn!("Failed to receive discovery reply: {}", e);
                    break;
                }
                Err(_) => debug!("No reply within {:?}, still listening", wait),
            }
        }

        info!(
            "Discovery window closed with {} device(s). If devices are missing, try a longer window.",
            collector.len()
        );
        Ok(collector.into_identifiers())
    }

    pub fn pretty_print_devices(devices: &[DeviceIdentifier]) {
        let headers = ["Address", "Device ID", "Model", "Device Name", "Power"];
        let rows: Vec<Vec<String>> = devices
            .iter()
            .map(|d| {
                vec![
                    d.socket_addr().to_string(),
                    d.device_id.clone().unwrap_or_default(),
                    d.model.clone().unwrap_or_default(),
                    d.device_name.clone().unwrap_or_default(),
                    d.power.clone().unwrap_or_default(),
                ]
            })
            .collect();

        // Determine the maximum width for each column
        let widths: Vec<usize> = (0..headers.len())
            .map(|i| rows.iter().map(|row| row[i].len()).fold(headers[i].len(), max))
            .collect();

        let header_row: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
        let separator_row: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        print_row(&header_row, &widths);
        print_row(&separator_row, &widths);
        for row in &rows {
            print_row(row, &widths);
        }
    }
}

async fn open_socket(options: &DiscoveryOptions) -> Result<UdpSocket> {
    if !options.join_group {
        return UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|source| Error::Discovery {
                context: "could not bind socket",
                source,
            });
    }

    let socket = bind_shared(options.listen_port).map_err(|source| Error::Discovery {
        context: "could not bind discovery port",
        source,
    })?;
    match socket.join_multicast_v4(DISCOVERY_GROUP, Ipv4Addr::UNSPECIFIED) {
        Ok(()) => debug!("Joined {} on port {}", DISCOVERY_GROUP, options.listen_port),
        // Search replies are unicast and still arrive without membership.
        Err(e) => warn!("Could not join {}, listening for direct replies only: {}", DISCOVERY_GROUP, e),
    }
    Ok(socket)
}

/// Binds `port` with address reuse so other SSDP listeners keep working.
fn bind_shared(port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    let address = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&SockAddr::from(address))?;
    UdpSocket::from_std(socket.into())
}

fn print_row(cells: &[String], widths: &[usize]) {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = width + 2))
        .collect();
    println!("{}", line.join(" ").trim_end());
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn reply(ip: &str, name: &str) -> Vec<u8> {
        format!(
            "HTTP/1.1 200 OK\r\n\
             Cache-Control: max-age=3600\r\n\
             Date: \r\n\
             Ext: \r\n\
             Location: yeelight://{}:55443\r\n\
             Server: POSIX UPnP/1.0 YGLC/1\r\n\
             id: 0x000000000015243f\r\n\
             model: color\r\n\
             fw_ver: 18\r\n\
             support: get_prop set_default set_power toggle set_bright set_rgb set_hsv\r\n\
             power: on\r\n\
             bright: 100\r\n\
             name: {}\r\n",
            ip, name
        )
        .into_bytes()
    }

    #[test]
    fn test_reply_is_decoded() {
        let identifier = DeviceIdentifier::from_reply(&reply("192.168.1.239", "desk")).unwrap();
        assert_eq!(identifier.ip_address, Ipv4Addr::new(192, 168, 1, 239));
        assert_eq!(identifier.port, 55443);
        assert_eq!(identifier.device_id.as_deref(), Some("0x000000000015243f"));
        assert_eq!(identifier.model.as_deref(), Some("color"));
        assert_eq!(identifier.firmware_version.as_deref(), Some("18"));
        assert_eq!(identifier.device_name.as_deref(), Some("desk"));
        assert_eq!(identifier.power.as_deref(), Some("on"));
        assert_eq!(identifier.brightness, Some(100));
        assert!(identifier.support.contains(&"toggle".to_string()));
        assert_eq!(identifier.support.len(), 7);
    }

    #[test]
    fn test_location_port_is_optional() {
        assert_eq!(
            parse_location("Location: yeelight://10.0.0.5"),
            Some((Ipv4Addr::new(10, 0, 0, 5), DEFAULT_DEVICE_PORT))
        );
        assert_eq!(
            parse_location("LOCATION: YEELIGHT://10.0.0.5:1234/"),
            Some((Ipv4Addr::new(10, 0, 0, 5), 1234))
        );
        assert_eq!(parse_location("Location: yeelight://bulb.local:55443"), None);
        assert_eq!(parse_location("Location: yeelight://10.0.0.5:99999"), None);
        assert_eq!(parse_location("Server: POSIX UPnP/1.0"), None);
    }

    #[test]
    fn test_nul_padding_and_empty_name() {
        let mut data = b"HTTP/1.1 200 OK\r\nLocation: yeelight://10.0.0.9:55443\r\nname: \r\n".to_vec();
        data.extend_from_slice(&[0u8; 32]);
        let identifier = DeviceIdentifier::from_reply(&data).unwrap();
        assert_eq!(identifier.device_name, None);
        assert_eq!(identifier.display_name(), "10.0.0.9");
    }

    #[test]
    fn test_collector_deduplicates_by_address() {
        let mut collector = DiscoveryCollector::new();
        assert!(collector.offer(&reply("192.168.1.10", "first")));
        assert!(!collector.offer(&reply("192.168.1.10", "again")));
        assert_eq!(collector.len(), 1);

        assert!(collector.offer(&reply("192.168.1.11", "second")));
        assert!(!collector.offer(b"HTTP/1.1 200 OK\r\nServer: something else\r\n"));

        let devices = collector.into_devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "first");
        assert_eq!(
            devices[1].address(),
            "192.168.1.11:55443".parse::<SocketAddr>().unwrap()
        );
        assert!(devices.iter().all(|device| !device.is_connected()));
    }

    #[test]
    fn test_identifiers_compare_by_address_only() {
        let a = DeviceIdentifier::from_reply(&reply("10.0.0.1", "a")).unwrap();
        let b = DeviceIdentifier::from_reply(&reply("10.0.0.1", "b")).unwrap();
        assert_eq!(a, b);
        let set: std::collections::HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    async fn fake_bulb() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = socket.local_addr().unwrap();
        (socket, address)
    }

    fn quick_options(target: SocketAddr) -> DiscoveryOptions {
        DiscoveryOptions::default()
            .with_group_membership(false)
            .with_target(target)
            .with_window(Duration::from_millis(800))
            .with_read_timeout(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_scan_collects_unique_replies() {
        let (bulb, target) = fake_bulb().await;
        let responder = tokio::spawn(async move {
            let mut buffer = [0u8; 1024];
            let (n, from) = bulb.recv_from(&mut buffer).await.unwrap();
            assert_eq!(&buffer[..n], SEARCH_MESSAGE);
            bulb.send_to(&reply("192.168.1.20", "one"), from).await.unwrap();
            bulb.send_to(&reply("192.168.1.20", "one"), from).await.unwrap();
            bulb.send_to(b"garbage", from).await.unwrap();
            bulb.send_to(&reply("192.168.1.21", "two"), from).await.unwrap();
        });

        let found = Discovery::find_identifiers(&quick_options(target)).await.unwrap();
        responder.await.unwrap();
        let addresses: Vec<Ipv4Addr> = found.iter().map(|d| d.ip_address).collect();
        assert_eq!(
            addresses,
            vec![Ipv4Addr::new(192, 168, 1, 20), Ipv4Addr::new(192, 168, 1, 21)]
        );
    }

    #[tokio::test]
    async fn test_scan_keeps_listening_after_silence() {
        let (bulb, target) = fake_bulb().await;
        let responder = tokio::spawn(async move {
            let mut buffer = [0u8; 1024];
            let (_, from) = bulb.recv_from(&mut buffer).await.unwrap();
            // Several read deadlines pass before the late reply.
            tokio::time::sleep(Duration::from_millis(350)).await;
            bulb.send_to(&reply("192.168.1.30", "late"), from).await.unwrap();
        });

        let started = Instant::now();
        let devices = Discovery::find_devices(&quick_options(target)).await.unwrap();
        responder.await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "late");
        assert!(started.elapsed() >= Duration::from_millis(800));
    }

    #[test]
    fn test_notify_announcement_is_accepted() {
        let advert = b"NOTIFY * HTTP/1.1\r\n\
            Host: 239.255.255.250:1982\r\n\
            Cache-Control: max-age=3600\r\n\
            Location: yeelight://192.168.1.40:55443\r\n\
            NTS: ssdp:alive\r\n\
            Server: POSIX, UPnP/1.0 YGLC/1\r\n\
            name: hall\r\n";
        let mut collector = DiscoveryCollector::new();
        assert!(collector.offer(advert));
        let found = collector.into_identifiers();
        assert_eq!(found[0].ip_address, Ipv4Addr::new(192, 168, 1, 40));
        assert_eq!(found[0].device_name.as_deref(), Some("hall"));
    }

    #[tokio::test]
    async fn test_scan_on_group_port_collects_announcements() {
        let listen_port = {
            let spare = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            spare.local_addr().unwrap().port()
        };
        let (bulb, target) = fake_bulb().await;
        let announcer = tokio::spawn(async move {
            let mut buffer = [0u8; 1024];
            bulb.recv_from(&mut buffer).await.unwrap();
            let advert = "NOTIFY * HTTP/1.1\r\nLocation: yeelight://192.168.1.50:55443\r\nname: porch\r\n";
            bulb.send_to(advert.as_bytes(), ("127.0.0.1", listen_port))
                .await
                .unwrap();
        });

        let options = quick_options(target)
            .with_group_membership(true)
            .with_listen_port(listen_port);
        let found = Discovery::find_identifiers(&options).await.unwrap();
        announcer.await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].display_name(), "porch");
    }

    #[tokio::test]
    async fn test_unsendable_target_is_discovery_error() {
        let options = quick_options("[::1]:1982".parse().unwrap());
        match Discovery::find_identifiers(&options).await {
            Err(Error::Discovery { context, .. }) => {
                assert_eq!(context, "could not send search query")
            }
            other => panic!("expected discovery error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scan_without_replies_is_empty() {
        let (_bulb, target) = fake_bulb().await;
        let options = quick_options(target).with_window(Duration::from_millis(250));
        let found = Discovery::find_identifiers(&options).await.unwrap();
        assert!(found.is_empty());
    }
}
