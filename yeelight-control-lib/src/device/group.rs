use std::net::SocketAddr;

use futures::future::{join_all, BoxFuture};
use log::{debug, info, warn};

use crate::device::{Device, Power};
use crate::error::{Error, GroupFailures, Result};

/// Several bulbs driven together.
///
/// Members have to be added while disconnected and are told apart by IP
/// address.
#[derive(Debug, Default)]
pub struct DeviceGroup {
    devices: Vec<Device>,
}

impl DeviceGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a group, applying the same checks as [`DeviceGroup::add`].
    pub fn from_devices(devices: Vec<Device>) -> Result<Self> {
        let mut group = DeviceGroup::new();
        for device in devices {
            group.add(device)?;
        }
        Ok(group)
    }

    pub fn add(&mut self, device: Device) -> Result<()> {
        let address = device.address();
        if device.is_connected() {
            return Err(Error::DeviceConnected { address });
        }
        if self
            .devices
            .iter()
            .any(|member| member.address().ip() == address.ip())
        {
            return Err(Error::DuplicateAddress { address });
        }
        self.devices.push(device);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Member addresses in insertion order.
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.devices.iter().map(Device::address).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.iter_mut()
    }

    /// Connects members in order and stops at the first failure.
    ///
    /// Members connected before the failure stay connected.
    pub async fn connect_all(&mut self) -> Result<()> {
        for device in &mut self.devices {
            device.connect().await?;
        }
        info!("Connected {} device(s)", self.devices.len());
        Ok(())
    }

    /// Disconnects every connected member, whatever happens to the others.
    pub async fn disconnect_all(&mut self) -> Result<()> {
        let mut failures = GroupFailures::default();
        for device in &mut self.devices {
            if !device.is_connected() {
                debug!("{} is not connected, skipping", device.address());
                continue;
            }
            if let Err(err) = device.disconnect().await {
                warn!("Failed to disconnect {}: {}", device.address(), err);
                failures.failures.push((device.address(), err));
            }
        }
        into_result(failures)
    }

    pub async fn toggle_all(&mut self) -> Result<()> {
        self.broadcast(|device| Box::pin(device.toggle())).await
    }

    pub async fn set_power_all(&mut self, power: Power) -> Result<()> {
        self.broadcast(move |device| Box::pin(device.set_power(power)))
            .await
    }

    pub async fn set_brightness_all(&mut self, brightness: u8) -> Result<()> {
        self.broadcast(move |device| Box::pin(device.set_brightness(brightness)))
            .await
    }

    pub async fn set_rgb_all(&mut self, red: u8, green: u8, blue: u8) -> Result<()> {
        self.broadcast(move |device| Box::pin(device.set_rgb(red, green, blue)))
            .await
    }

    /// Runs `operation` on every member concurrently and waits for all of
    /// them, collecting the failures.
    async fn broadcast<F>(&mut self, operation: F) -> Result<()>
    where
        F: for<'a> Fn(&'a mut Device) -> BoxFuture<'a, Result<u32>>,
    {
        let dispatches = self.devices.iter_mut().map(|device| {
            let address = device.address();
            let dispatch = operation(device);
            async move { (address, dispatch.await) }
        });

        let mut failures = GroupFailures::default();
        for (address, result) in join_all(dispatches).await {
            if let Err(err) = result {
                warn!("Group command failed on {}: {}", address, err);
                failures.failures.push((address, err));
            }
        }
        into_result(failures)
    }
}

fn into_result(failures: GroupFailures) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::Group(failures))
    }
}

impl IntoIterator for DeviceGroup {
    type Item = Device;
    type IntoIter = std::vec::IntoIter<Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.into_iter()
    }
}
