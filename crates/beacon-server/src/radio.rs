//! Radio selection.
//!
//! With the `bluetooth` feature the server drives a BlueZ adapter. Without
//! it, a simulated radio stands in so the API can be exercised on machines
//! with no Bluetooth hardware.

use std::sync::Arc;

use beacon_core::Radio;

#[cfg(not(any(feature = "bluetooth", feature = "mock-bluetooth")))]
compile_error!("beacon-server needs the `bluetooth` or `mock-bluetooth` feature");

/// Opens the radio the engines run on.
///
/// `adapter` names a BlueZ adapter such as `hci0`; `None` picks the default.
///
/// # Errors
///
/// Returns an error if the Bluetooth session or adapter cannot be opened.
#[cfg(feature = "bluetooth")]
pub async fn open(adapter: Option<&str>) -> beacon_core::Result<Arc<dyn Radio>> {
    let radio = beacon_core::BluerRadio::new(adapter).await?;
    Ok(Arc::new(radio))
}

/// Opens the radio the engines run on.
///
/// Built without the `bluetooth` feature, this is always the simulated radio.
///
/// # Errors
///
/// Never fails.
#[cfg(all(feature = "mock-bluetooth", not(feature = "bluetooth")))]
#[allow(clippy::unused_async)]
pub async fn open(adapter: Option<&str>) -> beacon_core::Result<Arc<dyn Radio>> {
    tracing::info!(?adapter, "Using simulated radio");
    Ok(Arc::new(beacon_core::MockRadio::new()))
}

#[cfg(all(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
mod tests {
    use super::*;
    use beacon_core::CapabilityProbe;

    #[tokio::test]
    async fn test_open_simulated_radio() {
        let radio = open(None).await.unwrap();
        let caps = radio.capabilities().await.unwrap();
        assert!(caps.extended_features);
    }
}
