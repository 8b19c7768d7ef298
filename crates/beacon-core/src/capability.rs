//! Adapter feature probing.
//!
//! Capabilities only ever narrow a configuration: a missing feature causes
//! the dependent fields to be reset to their defaults, never an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Optional LE features of the local adapter.
///
/// Everything defaults to unsupported. None of the specific flags count
/// unless `extended_features` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterCapabilities {
    /// The adapter supports Bluetooth 5 extended advertising at all.
    pub extended_features: bool,
    /// LE Coded PHY.
    pub coded_phy: bool,
    /// LE 2M PHY.
    pub uncoded_2m_phy: bool,
    /// Pattern filtering offloaded to the controller.
    pub hardware_filter_offload: bool,
}

impl AdapterCapabilities {
    /// Everything supported. Useful for simulated radios.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            extended_features: true,
            coded_phy: true,
            uncoded_2m_phy: true,
            hardware_filter_offload: true,
        }
    }

    /// Whether scanning / advertising on LE Coded is allowed.
    #[must_use]
    pub const fn supports_coded_phy(&self) -> bool {
        self.extended_features && self.coded_phy
    }

    /// Whether advertising on LE 2M is allowed.
    #[must_use]
    pub const fn supports_2m_phy(&self) -> bool {
        self.extended_features && self.uncoded_2m_phy
    }

    /// Whether hardware filtering and coexistence-optimised scanning are allowed.
    #[must_use]
    pub const fn supports_hardware_filter(&self) -> bool {
        self.extended_features && self.hardware_filter_offload
    }

    /// Whether publishers may pick secondary PHYs freely.
    #[must_use]
    pub const fn supports_publisher_phys(&self) -> bool {
        self.supports_2m_phy() && self.supports_coded_phy()
    }
}

/// Source of [`AdapterCapabilities`].
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// Queries the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BeaconError::DeviceUnavailable`] if no adapter can be queried.
    async fn capabilities(&self) -> Result<AdapterCapabilities>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_supported_by_default() {
        let caps = AdapterCapabilities::default();
        assert!(!caps.supports_coded_phy());
        assert!(!caps.supports_2m_phy());
        assert!(!caps.supports_hardware_filter());
    }

    #[test]
    fn test_specific_flags_require_extended_features() {
        let caps = AdapterCapabilities {
            extended_features: false,
            ..AdapterCapabilities::all()
        };
        assert!(!caps.supports_coded_phy());
        assert!(!caps.supports_publisher_phys());

        assert!(AdapterCapabilities::all().supports_publisher_phys());
    }

    #[test]
    fn test_publisher_phys_need_both() {
        let caps = AdapterCapabilities {
            extended_features: true,
            coded_phy: true,
            ..AdapterCapabilities::default()
        };
        assert!(caps.supports_coded_phy());
        assert!(!caps.supports_publisher_phys());
    }
}
