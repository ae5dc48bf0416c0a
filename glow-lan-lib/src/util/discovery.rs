use std::cmp::max;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{info, warn};
use serde::Serialize;
use tokio::time::timeout;

use crate::client::Client;
use crate::config::ClientConfig;
use crate::device::Device;
use crate::protocol::payload::StateVersion;

/// What a one-shot discovery learned about a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceIdentifier {
    pub ip_address: IpAddr,
    pub port: u16,
    /// Twelve hex digits, empty if the device never sent a discovery reply.
    pub serial: String,
    pub label: Option<String>,
    /// Label of the device's group.
    pub group: Option<String>,
    pub version: Option<StateVersion>,
}

pub struct Discovery;

impl Discovery {
    /// Runs a client for `given_timeout`, then asks every device it found for
    /// its label, group and version.
    ///
    /// Each query is bounded by the configured response timeout; a device
    /// that does not answer is still reported with the fields it did answer.
    pub async fn find_devices(
        config: ClientConfig,
        given_timeout: Duration,
    ) -> anyhow::Result<Vec<DeviceIdentifier>> {
        let client = Client::start(config).await?;
        tokio::time::sleep(given_timeout).await;

        let devices = client.devices();
        info!("Discovery found {} devices", devices.len());
        let query_timeout = client.config().response_timeout;
        let identifiers = join_all(
            devices
                .iter()
                .map(|device| Self::identify(device, query_timeout)),
        )
        .await;

        client.stop().await;
        Ok(identifiers)
    }

    async fn identify(device: &Arc<Device>, query_timeout: Duration) -> DeviceIdentifier {
        let label = match timeout(query_timeout, device.get_label()).await {
            Ok(Ok(label)) => Some(label),
            Ok(Err(err)) => {
                warn!("Failed to read label of {}: {:#}", device.address(), err);
                None
            }
            Err(_) => None,
        };
        let group = match timeout(query_timeout, device.get_group()).await {
            Ok(Ok(group)) => Some(group.label()),
            Ok(Err(err)) => {
                warn!("Failed to read group of {}: {:#}", device.address(), err);
                None
            }
            Err(_) => None,
        };
        let version = timeout(query_timeout, device.get_version())
            .await
            .ok()
            .and_then(Result::ok);

        DeviceIdentifier {
            ip_address: device.ip(),
            port: device.address().port(),
            serial: device.serial().unwrap_or_default(),
            label,
            group,
            version,
        }
    }

    pub fn pretty_print_devices(devices: &[DeviceIdentifier]) {
        let max_ip_width = devices
            .iter()
            .map(|d| d.ip_address.to_string().len())
            .max()
            .unwrap_or(0)
            .max("IP Address".len());
        let max_serial_width = 12;
        let max_label_width = devices
            .iter()
            .map(|d| max(d.label.as_deref().unwrap_or("-").len(), 20))
            .max()
            .unwrap_or(20);
        let max_group_width = devices
            .iter()
            .map(|d| max(d.group.as_deref().unwrap_or("-").len(), 12))
            .max()
            .unwrap_or(12);

        println!(
            "{:<ip_width$} {:<serial_width$} {:<label_width$} {:<group_width$} Product",
            "IP Address",
            "Serial",
            "Label",
            "Group",
            ip_width = max_ip_width + 2,
            serial_width = max_serial_width + 2,
            label_width = max_label_width + 2,
            group_width = max_group_width + 2,
        );
        println!(
            "{:<ip_width$} {:<serial_width$} {:<label_width$} {:<group_width$} -------",
            "-".repeat(max_ip_width),
            "-".repeat(max_serial_width),
            "-".repeat(max_label_width),
            "-".repeat(max_group_width),
            ip_width = max_ip_width + 2,
            serial_width = max_serial_width + 2,
            label_width = max_label_width + 2,
            group_width = max_group_width + 2,
        );

        for device in devices {
            let product = device
                .version
                .map(|version| format!("{}:{}", version.vendor, version.product))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<ip_width$} {:<serial_width$} {:<label_width$} {:<group_width$} {}",
                device.ip_address,
                device.serial,
                device.label.as_deref().unwrap_or("-"),
                device.group.as_deref().unwrap_or("-"),
                product,
                ip_width = max_ip_width + 2,
                serial_width = max_serial_width + 2,
                label_width = max_label_width + 2,
                group_width = max_group_width + 2,
            );
        }
    }
}
