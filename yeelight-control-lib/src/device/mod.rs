use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use clap::ValueEnum;
use log::debug;

use crate::error::Result;
use crate::protocol::channel::ResponseChannel;
use crate::protocol::command::{Command, IdSource, Method, Param, RandomIds};
use crate::protocol::response::Response;
use crate::protocol::{Client, YeelightClient};

pub mod group;

/// Shortest smooth transition the firmware accepts.
const MIN_SMOOTH_DURATION: Duration = Duration::from_millis(30);
const DEFAULT_SMOOTH_DURATION: Duration = Duration::from_millis(500);

/// How a bulb moves to a new state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Sudden,
    Smooth(Duration),
}

impl Transition {
    fn params(&self) -> [Param; 2] {
        match self {
            Transition::Sudden => ["sudden".into(), Param::Int(0)],
            Transition::Smooth(duration) => {
                let millis = (*duration).max(MIN_SMOOTH_DURATION).as_millis();
                ["smooth".into(), Param::Int(i64::try_from(millis).unwrap_or(i64::MAX))]
            }
        }
    }
}

impl Default for Transition {
    fn default() -> Self {
        Transition::Smooth(DEFAULT_SMOOTH_DURATION)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Power {
    On,
    Off,
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Power::On => write!(f, "on"),
            Power::Off => write!(f, "off"),
        }
    }
}

impl From<bool> for Power {
    fn from(on: bool) -> Self {
        if on {
            Power::On
        } else {
            Power::Off
        }
    }
}

/// A bulb with a display name, backed by a [`Client`].
///
/// The device owns its client; all connection state lives there.
pub struct Device {
    pub name: String,
    client: Box<dyn Client>,
    ids: Box<dyn IdSource>,
    transition: Transition,
}

impl Device {
    /// A disconnected device talking TCP to `address`.
    pub fn new(name: &str, address: SocketAddr) -> Self {
        Self::with_client(name, Box::new(YeelightClient::new(address)))
    }

    pub fn with_client(name: &str, client: Box<dyn Client>) -> Self {
        Device {
            name: name.to_string(),
            client,
            ids: Box::new(RandomIds),
            transition: Transition::default(),
        }
    }

    pub fn with_id_source(mut self, ids: Box<dyn IdSource>) -> Self {
        self.ids = ids;
        self
    }

    /// Transition used by the brightness, color and power helpers.
    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transition = transition;
        self
    }

    pub fn address(&self) -> SocketAddr {
        self.client.address()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn last_command_id(&self) -> Option<u32> {
        self.client.last_command_id()
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.client.connect().await
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.client.disconnect().await
    }

    pub fn responses(&self) -> Result<ResponseChannel> {
        self.client.responses()
    }

    /// Waits for the next response; `None` once the stream has ended.
    pub async fn next_response(&self) -> Result<Option<Response>> {
        let responses = self.client.responses()?;
        Ok(responses.recv().await)
    }

    pub async fn send_command(&mut self, command: &Command) -> Result<()> {
        self.client.send_command(command).await
    }

    /// Sends `method` with a generated id and returns that id.
    pub async fn send(&mut self, method: Method, params: Vec<Param>) -> Result<u32> {
        let command = Command::build(method, params, None, self.ids.as_mut());
        debug!("{}: sending {} (id {})", self.name, method, command.id);
        self.client.send_command(&command).await?;
        Ok(command.id)
    }

    /// Asks for the named properties. The values arrive as the `result` of
    /// the response carrying the returned id, in the same order.
    pub async fn get_prop(&mut self, properties: &[&str]) -> Result<u32> {
        let params = properties.iter().map(|p| Param::from(*p)).collect();
        self.send(Method::GetProp, params).await
    }

    /// Brightness in percent, clamped to `1..=100`.
    pub async fn set_brightness(&mut self, brightness: u8) -> Result<u32> {
        let brightness = brightness.clamp(1, 100);
        let mut params = vec![Param::from(brightness)];
        params.extend(self.transition.params());
        self.send(Method::SetBright, params).await
    }

    pub async fn set_rgb(&mut self, red: u8, green: u8, blue: u8) -> Result<u32> {
        let mut params = vec![Param::from(pack_rgb(red, green, blue))];
        params.extend(self.transition.params());
        self.send(Method::SetRgb, params).await
    }

    /// Hue is clamped to `0..=359`, saturation to `0..=100`.
    pub async fn set_hsv(&mut self, hue: u16, saturation: u8) -> Result<u32> {
        let mut params = vec![
            Param::from(hue.min(359)),
            Param::from(saturation.min(100)),
        ];
        params.extend(self.transition.params());
        self.send(Method::SetHsv, params).await
    }

    pub async fn set_power(&mut self, power: Power) -> Result<u32> {
        let mut params = vec![Param::from(power.to_string())];
        params.extend(self.transition.params());
        self.send(Method::SetPower, params).await
    }

    pub async fn toggle(&mut self) -> Result<u32> {
        self.send(Method::Toggle, vec![]).await
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("address", &self.address())
            .field("connected", &self.is_connected())
            .field("transition", &self.transition)
            .finish()
    }
}

fn pack_rgb(red: u8, green: u8, blue: u8) -> u32 {
    (u32::from(red) << 16) | (u32::from(green) << 8) | u32::from(blue)
}
