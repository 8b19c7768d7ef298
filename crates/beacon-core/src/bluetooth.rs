//! BlueZ radio backend.
//!
//! Talks to `bluetoothd` over D-Bus through `bluer`. Scanning uses LE
//! discovery with duplicate reporting so every advertisement refreshes the
//! device's RSSI; advertising registers a broadcast-only LE advertisement
//! that BlueZ removes again when the handle is dropped.
//!
//! BlueZ does not report the advertising PDU type, so samples carry
//! [`AdvertisementType::Unknown`], and it never queues advertisements, so
//! publishers only ever observe `Started`, `Stopped` and `Aborted`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle, SecondaryChannel, Type as AdvertisementKind};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session, Uuid};
use futures::{pin_mut, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capability::{AdapterCapabilities, CapabilityProbe};
use crate::error::{BeaconError, Result};
use crate::publisher::PublisherConfig;
use crate::transport::{
    AdvertiseTransport, Radio, ScanEvent, ScanSubscription, ScanTransport, StatusSubscription,
    StatusUpdate,
};
use crate::types::{
    AdvertisementSection, AdvertisementType, DeviceAddress, Phy, PublisherStatus, ScanSample,
    SectionKind, TransportError,
};
use crate::watcher::WatcherConfig;

/// Bluetooth base UUID; 16-bit service UUIDs occupy bits 96..112.
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unavailable(e: &bluer::Error) -> BeaconError {
    BeaconError::DeviceUnavailable(e.to_string())
}

fn uuid_from_u16(id: u16) -> Uuid {
    Uuid::from_u128(BASE_UUID | (u128::from(id) << 96))
}

fn uuid_to_u16(uuid: Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let short = u16::try_from((value >> 96) & 0xFFFF).ok()?;
    (value & !(0xFFFF_u128 << 96) == BASE_UUID).then_some(short)
}

/// The local BlueZ adapter.
#[derive(Clone)]
pub struct BluerRadio {
    _session: Session,
    adapter: Adapter,
}

impl std::fmt::Debug for BluerRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluerRadio")
            .field("adapter", &self.adapter.name())
            .finish()
    }
}

impl BluerRadio {
    /// Connect to `bluetoothd` and open `adapter_name` (or the default adapter).
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::DeviceUnavailable`] if the daemon or adapter
    /// cannot be reached.
    pub async fn new(adapter_name: Option<&str>) -> Result<Self> {
        let session = Session::new().await.map_err(|e| unavailable(&e))?;
        let adapter = match adapter_name {
            Some(name) => session.adapter(name),
            None => session.default_adapter().await,
        }
        .map_err(|e| unavailable(&e))?;

        info!(adapter = adapter.name(), "Opened Bluetooth adapter");
        Ok(Self {
            _session: session,
            adapter,
        })
    }

    async fn ensure_powered(adapter: &Adapter) -> Result<()> {
        if adapter.is_powered().await.map_err(|e| unavailable(&e))? {
            Ok(())
        } else {
            Err(BeaconError::DeviceUnavailable(format!(
                "adapter {} is powered off",
                adapter.name()
            )))
        }
    }
}

#[async_trait]
impl CapabilityProbe for BluerRadio {
    async fn capabilities(&self) -> Result<AdapterCapabilities> {
        Self::ensure_powered(&self.adapter).await?;

        let channels = self
            .adapter
            .supported_advertising_secondary_channels()
            .await
            .map_err(|e| unavailable(&e))?
            .unwrap_or_default();
        let features = self
            .adapter
            .supported_advertising_features()
            .await
            .map_err(|e| unavailable(&e))?
            .unwrap_or_default();

        let caps = AdapterCapabilities {
            extended_features: !channels.is_empty(),
            coded_phy: channels.contains(&SecondaryChannel::Coded),
            uncoded_2m_phy: channels.contains(&SecondaryChannel::TwoM),
            hardware_filter_offload: features.contains(&bluer::adv::PlatformFeature::HardwareOffload),
        };
        debug!(?caps, "Probed adapter capabilities");
        Ok(caps)
    }
}

impl Radio for BluerRadio {
    fn scanner(&self) -> Arc<dyn ScanTransport> {
        Arc::new(BluerScanner {
            adapter: self.adapter.clone(),
            running: Mutex::new(None),
        })
    }

    fn advertiser(&self) -> Arc<dyn AdvertiseTransport> {
        Arc::new(BluerAdvertiser {
            adapter: self.adapter.clone(),
            running: Mutex::new(None),
        })
    }
}

// ============================================================================
// Scanning
// ============================================================================

struct RunningScan {
    task: JoinHandle<()>,
    tx: mpsc::Sender<ScanEvent>,
}

/// One discovery session on the adapter.
///
/// BlueZ reference-counts discovery between D-Bus clients, so stopping one
/// scanner leaves the others untouched.
pub struct BluerScanner {
    adapter: Adapter,
    running: Mutex<Option<RunningScan>>,
}

async fn read_sample(adapter: &Adapter, address: Address) -> bluer::Result<Option<ScanSample>> {
    let device = adapter.device(address)?;
    let Some(rssi) = device.rssi().await? else {
        // Cached device, not currently advertising.
        return Ok(None);
    };

    let mut sample = ScanSample::new(DeviceAddress(address.0), rssi)
        .with_type(AdvertisementType::Unknown);
    if let Some(name) = device.name().await? {
        sample = sample.with_local_name(name);
    }
    if let Some(data) = device.manufacturer_data().await? {
        let mut entries: Vec<_> = data.into_iter().collect();
        entries.sort_by_key(|(id, _)| *id);
        for (company_id, payload) in entries {
            sample = sample.with_section(AdvertisementSection::manufacturer(company_id, payload));
        }
    }
    if let Some(data) = device.service_data().await? {
        for (uuid, payload) in data {
            if let Some(id) = uuid_to_u16(uuid) {
                sample = sample.with_section(AdvertisementSection::service_data(id, payload));
            }
        }
    }
    Ok(Some(sample))
}

#[async_trait]
impl ScanTransport for BluerScanner {
    async fn start(&self, config: &WatcherConfig) -> Result<ScanSubscription> {
        BluerRadio::ensure_powered(&self.adapter).await?;

        let filter = DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        };
        self.adapter
            .set_discovery_filter(filter)
            .await
            .map_err(|e| unavailable(&e))?;
        let events = self
            .adapter
            .discover_devices_with_changes()
            .await
            .map_err(|e| unavailable(&e))?;

        if config.hardware_filter_offload {
            debug!("Hardware filter offload requested; matching in software");
        }

        let (tx, subscription) = ScanSubscription::channel();
        let adapter = self.adapter.clone();
        let sender = tx.clone();
        let task = tokio::spawn(async move {
            pin_mut!(events);
            while let Some(event) = events.next().await {
                let AdapterEvent::DeviceAdded(address) = event else {
                    continue;
                };
                match read_sample(&adapter, address).await {
                    Ok(Some(sample)) => {
                        if sender.send(ScanEvent::Sample(sample)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!(%address, error = %e, "Failed to read device properties"),
                }
            }
            warn!("Discovery stream ended");
            let _ = sender
                .send(ScanEvent::Stopped(Some(TransportError::RadioNotAvailable)))
                .await;
        });

        if let Some(previous) = lock(&self.running).replace(RunningScan { task, tx }) {
            previous.task.abort();
        }
        info!(adapter = self.adapter.name(), "Discovery started");
        Ok(subscription)
    }

    fn stop(&self) {
        if let Some(running) = lock(&self.running).take() {
            running.task.abort();
            let _ = running.tx.try_send(ScanEvent::Stopped(None));
            info!(adapter = self.adapter.name(), "Discovery stopped");
        }
    }
}

// ============================================================================
// Advertising
// ============================================================================

struct RunningAdvertisement {
    _handle: AdvertisementHandle,
    tx: mpsc::Sender<StatusUpdate>,
}

/// One registered LE advertisement.
pub struct BluerAdvertiser {
    adapter: Adapter,
    running: Mutex<Option<RunningAdvertisement>>,
}

const fn secondary_channel(phy: Phy) -> SecondaryChannel {
    match phy {
        Phy::Uncoded1M => SecondaryChannel::OneM,
        Phy::Uncoded2M => SecondaryChannel::TwoM,
        Phy::Coded => SecondaryChannel::Coded,
    }
}

fn build_advertisement(config: &PublisherConfig) -> Advertisement {
    let mut manufacturer_data = BTreeMap::new();
    let mut service_data = BTreeMap::new();
    for section in &config.payload {
        match section.kind {
            SectionKind::Manufacturer => {
                manufacturer_data.insert(section.id, section.data.clone());
            }
            SectionKind::ServiceData => {
                service_data.insert(uuid_from_u16(section.id), section.data.clone());
            }
            SectionKind::DataType(ad_type) => {
                warn!(ad_type, "BlueZ cannot broadcast raw AD structures; skipping section");
            }
        }
    }

    Advertisement {
        advertisement_type: AdvertisementKind::Broadcast,
        manufacturer_data,
        service_data,
        secondary_channel: config
            .use_extended_format
            .then(|| secondary_channel(config.secondary_phy)),
        ..Default::default()
    }
}

#[async_trait]
impl AdvertiseTransport for BluerAdvertiser {
    async fn start(&self, config: &PublisherConfig) -> Result<StatusSubscription> {
        BluerRadio::ensure_powered(&self.adapter).await?;

        let handle = self
            .adapter
            .advertise(build_advertisement(config))
            .await
            .map_err(|e| unavailable(&e))?;

        let (tx, subscription) = StatusSubscription::channel();
        let _ = tx.try_send(StatusUpdate {
            status: PublisherStatus::Started,
            error: None,
        });
        if let Some(previous) = lock(&self.running).replace(RunningAdvertisement {
            _handle: handle,
            tx,
        }) {
            drop(previous);
        }
        info!(adapter = self.adapter.name(), "Advertisement registered");
        Ok(subscription)
    }

    fn stop(&self) {
        if let Some(running) = lock(&self.running).take() {
            let tx = running.tx.clone();
            drop(running);
            let _ = tx.try_send(StatusUpdate {
                status: PublisherStatus::Stopped,
                error: None,
            });
            info!(adapter = self.adapter.name(), "Advertisement unregistered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_uuid_roundtrip() {
        let uuid = uuid_from_u16(0x180F);
        assert_eq!(
            uuid.to_string(),
            "0000180f-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(uuid_to_u16(uuid), Some(0x180F));
        assert_eq!(uuid_to_u16(Uuid::from_u128(1)), None);
    }

    #[test]
    fn test_build_advertisement_sections() {
        let config = PublisherConfig::new(vec![
            AdvertisementSection::manufacturer(0xFFFE, [0x34, 0x12]),
            AdvertisementSection::service_data(0x180F, [0x64]),
        ]);
        let adv = build_advertisement(&config);
        assert_eq!(adv.manufacturer_data.get(&0xFFFE), Some(&vec![0x34, 0x12]));
        assert_eq!(adv.service_data.get(&uuid_from_u16(0x180F)), Some(&vec![0x64]));
        assert!(adv.secondary_channel.is_none());

        let long_range = build_advertisement(&config.with_long_range_phys());
        assert_eq!(long_range.secondary_channel, Some(SecondaryChannel::TwoM));
    }
}
