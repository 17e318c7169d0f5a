use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::{EmulatorError, EmulatorResult};

/// Closed set of notification events a device can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationEvent {
    #[serde(rename = "new-msg-received")]
    NewMsgReceived,
    #[serde(rename = "sent-msg-read")]
    SentMsgRead,
    #[serde(rename = "asset-received")]
    AssetReceived,
    #[serde(rename = "asset-confirmed")]
    AssetConfirmed,
    #[serde(rename = "final-msg-progress")]
    FinalMsgProgress,
    #[serde(rename = "asset-export-outcome")]
    AssetExportOutcome,
    #[serde(rename = "asset-migration-outcome")]
    AssetMigrationOutcome,
    #[serde(rename = "nf-token-received")]
    NfTokenReceived,
    #[serde(rename = "nf-token-confirmed")]
    NfTokenConfirmed,
    #[serde(rename = "nf-asset-issuance-outcome")]
    NfAssetIssuanceOutcome,
    #[serde(rename = "nf-token-retrieval-outcome")]
    NfTokenRetrievalOutcome,
    #[serde(rename = "nf-token-transfer-outcome")]
    NfTokenTransferOutcome,
}

impl NotificationEvent {
    pub const ALL: [NotificationEvent; 12] = [
        NotificationEvent::NewMsgReceived,
        NotificationEvent::SentMsgRead,
        NotificationEvent::AssetReceived,
        NotificationEvent::AssetConfirmed,
        NotificationEvent::FinalMsgProgress,
        NotificationEvent::AssetExportOutcome,
        NotificationEvent::AssetMigrationOutcome,
        NotificationEvent::NfTokenReceived,
        NotificationEvent::NfTokenConfirmed,
        NotificationEvent::NfAssetIssuanceOutcome,
        NotificationEvent::NfTokenRetrievalOutcome,
        NotificationEvent::NfTokenTransferOutcome,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::NewMsgReceived => "new-msg-received",
            NotificationEvent::SentMsgRead => "sent-msg-read",
            NotificationEvent::AssetReceived => "asset-received",
            NotificationEvent::AssetConfirmed => "asset-confirmed",
            NotificationEvent::FinalMsgProgress => "final-msg-progress",
            NotificationEvent::AssetExportOutcome => "asset-export-outcome",
            NotificationEvent::AssetMigrationOutcome => "asset-migration-outcome",
            NotificationEvent::NfTokenReceived => "nf-token-received",
            NotificationEvent::NfTokenConfirmed => "nf-token-confirmed",
            NotificationEvent::NfAssetIssuanceOutcome => "nf-asset-issuance-outcome",
            NotificationEvent::NfTokenRetrievalOutcome => "nf-token-retrieval-outcome",
            NotificationEvent::NfTokenTransferOutcome => "nf-token-transfer-outcome",
        }
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationEvent {
    type Err = EmulatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationEvent::ALL
            .iter()
            .find(|event| event.as_str() == s)
            .copied()
            .ok_or_else(|| {
                EmulatorError::validation(format!("unknown notification event: {}", s))
            })
    }
}

/// Notification payload installed for a (device, event) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    /// Message delivered to subscribed channels, verbatim
    pub data: String,
    /// Milliseconds to wait before delivering; zero or absent delivers
    /// immediately
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Two-level table mapping device ID and event to the installed
/// notification message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotifyContext(pub HashMap<String, HashMap<NotificationEvent, NotificationMessage>>);

impl NotifyContext {
    pub fn message(
        &self,
        device_id: &str,
        event: NotificationEvent,
    ) -> Option<&NotificationMessage> {
        self.0.get(device_id).and_then(|by_event| by_event.get(&event))
    }

    pub fn validate(&self) -> EmulatorResult<()> {
        if self.0.keys().any(|device_id| device_id.is_empty()) {
            return Err(EmulatorError::validation("device ID must not be empty"));
        }

        Ok(())
    }
}
