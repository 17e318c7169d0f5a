use serde::{Deserialize, Serialize};

use crate::errors::{EmulatorError, EmulatorResult};

/// API access credentials of a single virtual device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCredentials {
    /// Catenis device ID the credentials belong to
    pub device_id: String,
    /// Shared secret used to sign API requests on behalf of the device
    pub api_access_secret: String,
}

impl DeviceCredentials {
    pub fn validate(&self) -> EmulatorResult<()> {
        if self.device_id.is_empty() {
            return Err(EmulatorError::validation("device ID must not be empty"));
        }

        Ok(())
    }
}

/// Install document accepted by the control plane: a single credentials
/// object or a list of them. Either form replaces the whole registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CredentialsInstall {
    One(DeviceCredentials),
    Many(Vec<DeviceCredentials>),
}

impl CredentialsInstall {
    pub fn into_entries(self) -> Vec<DeviceCredentials> {
        match self {
            CredentialsInstall::One(entry) => vec![entry],
            CredentialsInstall::Many(entries) => entries,
        }
    }
}
