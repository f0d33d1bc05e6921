//! One-shot pairing of the selected device.

use crate::domain::models::DeviceIdentity;
use crate::infrastructure::bluetooth::platform::{BleStack, PairingStatus};
use crate::infrastructure::status::StatusSink;
use anyhow::Result;
use tracing::{info, warn};

/// Pair `device` and report the platform's result status
pub async fn pair_device(
    stack: &dyn BleStack,
    device: Option<&DeviceIdentity>,
    status: &StatusSink,
) -> Result<PairingStatus> {
    let Some(device) = device else {
        status.error("No device selected to pair");
        anyhow::bail!("No device selected");
    };

    info!("Pairing {} ({})", device.display_name(), device.id);
    status.info(format!("Pairing started. Please wait... ({})", device.display_name()));

    let result = match stack.pair(&device.id).await {
        Ok(result) => result,
        Err(e) => {
            warn!("Pairing request failed: {}", e);
            status.error(format!("Pairing failed: {}", e));
            return Err(e.into());
        }
    };

    let message = format!("Pairing result = {:?}", result);
    if result.is_success() {
        info!("{}", message);
        status.success(message);
    } else {
        warn!("{}", message);
        status.error(message);
    }
    Ok(result)
}
