//! Shared advertisement and radio types.
//!
//! Everything the matcher, the proximity filter and both engines exchange
//! lives here. Types that travel to consumers (samples, status enums,
//! error enumerants) are serde-serialisable.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{BeaconError, Result};

/// Lowest RSSI a controller reports (also used as "no signal").
pub const MIN_RSSI_DBM: i16 = -127;

/// Highest plausible RSSI.
pub const MAX_RSSI_DBM: i16 = 20;

/// Maximum extended advertising data length (Bluetooth 5).
pub const MAX_SECTION_LEN: usize = 1650;

// ============================================================================
// Device address
// ============================================================================

/// 48-bit Bluetooth device address of an advertiser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DeviceAddress(pub [u8; 6]);

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for DeviceAddress {
    type Err = BeaconError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || BeaconError::MalformedSample(format!("invalid device address '{s}'"));
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in &mut bytes {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(bytes))
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Advertisement sections
// ============================================================================

/// Named type of an advertisement section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    /// Manufacturer-specific data; the identifier is the company id.
    Manufacturer,
    /// Service data; the identifier is a 16-bit service UUID.
    ServiceData,
    /// Any other AD structure, by AD type. The identifier is unused.
    DataType(u8),
}

impl SectionKind {
    /// Number of identifier bytes this kind carries on air.
    #[must_use]
    pub const fn identifier_len(self) -> usize {
        match self {
            Self::Manufacturer | Self::ServiceData => 2,
            Self::DataType(_) => 0,
        }
    }
}

/// One opaque section of an advertisement: kind + identifier + payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdvertisementSection {
    /// Section kind.
    pub kind: SectionKind,
    /// Company id, 16-bit service UUID, or 0.
    #[serde(default)]
    pub id: u16,
    /// Raw payload bytes.
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

impl AdvertisementSection {
    /// A manufacturer-specific section.
    #[must_use]
    pub fn manufacturer(company_id: u16, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: SectionKind::Manufacturer,
            id: company_id,
            data: data.into(),
        }
    }

    /// A 16-bit service data section.
    #[must_use]
    pub fn service_data(uuid16: u16, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: SectionKind::ServiceData,
            id: uuid16,
            data: data.into(),
        }
    }

    /// Size of this section once encoded as an AD structure (length + type + id + data).
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        2 + self.kind.identifier_len() + self.data.len()
    }

    /// Whether `other` has the same kind and identifier.
    #[must_use]
    pub fn same_slot(&self, other: &Self) -> bool {
        self.kind == other.kind && self.id == other.id
    }
}

impl fmt::Display for AdvertisementSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = hex::encode(&self.data);
        match self.kind {
            SectionKind::Manufacturer => write!(f, "0x{:04X}: {data}", self.id),
            SectionKind::ServiceData => write!(f, "service 0x{:04X}: {data}", self.id),
            SectionKind::DataType(ad_type) => write!(f, "type 0x{ad_type:02X}: {data}"),
        }
    }
}

/// Serialises payload bytes as a lowercase hex string.
pub(crate) mod hex_bytes {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Scan samples
// ============================================================================

/// PDU type of a received advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvertisementType {
    /// `ADV_IND`.
    ConnectableUndirected,
    /// `ADV_DIRECT_IND`.
    ConnectableDirected,
    /// `ADV_SCAN_IND`.
    ScannableUndirected,
    /// `ADV_NONCONN_IND`.
    NonConnectableUndirected,
    /// `SCAN_RSP`.
    ScanResponse,
    /// Any extended advertising PDU.
    Extended,
    /// The transport did not report the PDU type.
    Unknown,
}

impl fmt::Display for AdvertisementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectableUndirected => "ConnectableUndirected",
            Self::ConnectableDirected => "ConnectableDirected",
            Self::ScannableUndirected => "ScannableUndirected",
            Self::NonConnectableUndirected => "NonConnectableUndirected",
            Self::ScanResponse => "ScanResponse",
            Self::Extended => "Extended",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// One observed advertisement. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSample {
    /// When the transport observed the advertisement.
    pub timestamp: DateTime<Utc>,
    /// Sender address.
    pub address: DeviceAddress,
    /// Raw signal strength in dBm.
    pub rssi_dbm: i16,
    /// PDU type.
    pub advertisement_type: AdvertisementType,
    /// Advertised local name, if any.
    pub local_name: Option<String>,
    /// Advertised sections, in arrival order.
    pub sections: Vec<AdvertisementSection>,
}

impl ScanSample {
    /// A sample observed now with no name and no sections.
    #[must_use]
    pub fn new(address: DeviceAddress, rssi_dbm: i16) -> Self {
        Self {
            timestamp: Utc::now(),
            address,
            rssi_dbm,
            advertisement_type: AdvertisementType::NonConnectableUndirected,
            local_name: None,
            sections: Vec::new(),
        }
    }

    /// Adds an advertised section.
    #[must_use]
    pub fn with_section(mut self, section: AdvertisementSection) -> Self {
        self.sections.push(section);
        self
    }

    /// Sets the advertised local name.
    #[must_use]
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    /// Sets the PDU type.
    #[must_use]
    pub const fn with_type(mut self, advertisement_type: AdvertisementType) -> Self {
        self.advertisement_type = advertisement_type;
        self
    }

    /// First manufacturer section, if any.
    #[must_use]
    pub fn first_manufacturer_section(&self) -> Option<&AdvertisementSection> {
        self.sections
            .iter()
            .find(|s| s.kind == SectionKind::Manufacturer)
    }

    /// Checks the sample is something a radio could have produced.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::MalformedSample`] for an implausible RSSI or an
    /// oversized section.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_RSSI_DBM..=MAX_RSSI_DBM).contains(&self.rssi_dbm) {
            return Err(BeaconError::MalformedSample(format!(
                "rssi {} dBm outside [{MIN_RSSI_DBM}, {MAX_RSSI_DBM}]",
                self.rssi_dbm
            )));
        }
        if let Some(section) = self.sections.iter().find(|s| s.data.len() > MAX_SECTION_LEN) {
            return Err(BeaconError::MalformedSample(format!(
                "section {:?}/0x{:04X} is {} bytes (max {MAX_SECTION_LEN})",
                section.kind,
                section.id,
                section.data.len()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Radio status
// ============================================================================

/// Hysteresis-filtered proximity of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityState {
    /// No qualifying sample seen yet.
    #[default]
    Unknown,
    /// Signal at or above the in-range threshold.
    InRange,
    /// Demoted after the out-of-range timeout.
    OutOfRange,
}

impl fmt::Display for ProximityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "Unknown",
            Self::InRange => "InRange",
            Self::OutOfRange => "OutOfRange",
        })
    }
}

/// Error enumerant reported by a scan/advertise transport.
///
/// Success is represented by the absence of a value (`Option<TransportError>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportError {
    /// The radio is off or missing.
    RadioNotAvailable,
    /// The radio is busy serving other clients.
    ResourceInUse,
    /// The remote device is not connected.
    DeviceNotConnected,
    /// Blocked by system policy.
    DisabledByPolicy,
    /// Turned off by the user.
    DisabledByUser,
    /// The operation is not supported.
    NotSupported,
    /// The transport does not support the operation.
    TransportNotSupported,
    /// User consent is required.
    ConsentRequired,
    /// Anything else.
    OtherError,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Formats an optional transport error the way status text reports it.
#[must_use]
pub fn describe_error(error: Option<TransportError>) -> String {
    error.map_or_else(|| "Success".to_string(), |e| e.to_string())
}

/// Status of a broadcast as reported by the advertise transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublisherStatus {
    /// Validated and queued, waiting for radio time.
    Waiting,
    /// Being broadcast.
    Started,
    /// Stopped on request.
    Stopped,
    /// Stopped by the transport.
    Aborted,
}

impl fmt::Display for PublisherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Waiting => "Waiting",
            Self::Started => "Started",
            Self::Stopped => "Stopped",
            Self::Aborted => "Aborted",
        })
    }
}

/// LE physical layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phy {
    /// LE 1M.
    #[default]
    Uncoded1M,
    /// LE 2M (secondary channel only).
    Uncoded2M,
    /// LE Coded.
    Coded,
}

/// Scan duty-cycle preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanParameters {
    /// Continuous scanning.
    #[default]
    LowLatency,
    /// Share the radio with other technologies.
    CoexistenceOptimized,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_address_display_and_parse() {
        let addr = DeviceAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x0F]);
        assert_eq!(addr.to_string(), "AA:BB:CC:DD:EE:0F");
        assert_eq!("AA:BB:CC:DD:EE:0F".parse::<DeviceAddress>().unwrap(), addr);
        assert!("AA:BB:CC".parse::<DeviceAddress>().is_err());
        assert!("AA:BB:CC:DD:EE:FF:00".parse::<DeviceAddress>().is_err());
        assert!("GG:BB:CC:DD:EE:FF".parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn test_section_display_matches_status_text() {
        let section = AdvertisementSection::manufacturer(0xFFFE, [0x34, 0x12]);
        assert_eq!(section.to_string(), "0xFFFE: 3412");
        assert_eq!(section.encoded_len(), 6);
    }

    #[test]
    fn test_section_hex_serialization() {
        let section = AdvertisementSection::manufacturer(0xFFFE, [0x34, 0x12]);
        let json = serde_json::to_string(&section).unwrap();
        assert!(json.contains("\"data\":\"3412\""));
        assert!(json.contains("\"kind\":\"manufacturer\""));
        let back: AdvertisementSection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, section);
    }

    #[test]
    fn test_sample_validation() {
        let addr = DeviceAddress::default();
        assert!(ScanSample::new(addr, -60).validate().is_ok());
        assert!(ScanSample::new(addr, -128).validate().is_err());
        assert!(ScanSample::new(addr, 21).validate().is_err());

        let oversized = ScanSample::new(addr, -60)
            .with_section(AdvertisementSection::manufacturer(1, vec![0; MAX_SECTION_LEN + 1]));
        assert!(matches!(
            oversized.validate(),
            Err(BeaconError::MalformedSample(_))
        ));
    }

    #[test]
    fn test_describe_error() {
        assert_eq!(describe_error(None), "Success");
        assert_eq!(
            describe_error(Some(TransportError::DisabledByPolicy)),
            "DisabledByPolicy"
        );
    }
}
