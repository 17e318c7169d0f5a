use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::errors::{EmulatorError, EmulatorResult};
use crate::models::credentials::DeviceCredentials;
use crate::models::http_context::HttpContext;
use crate::models::notification::{NotificationEvent, NotificationMessage, NotifyContext};

/// In-memory store of the emulator's programmable state: the device
/// credentials registry, the HTTP expectation and the notification table.
///
/// Every setter validates the new document and then swaps it in whole, so
/// readers observe either the previous or the new value, never a mix.
/// Readers take snapshots; an in-flight request keeps matching against the
/// context it started with even if the control plane replaces it.
#[derive(Default)]
pub struct ContextStore {
    credentials: RwLock<HashMap<String, String>>,
    http_context: RwLock<Option<Arc<HttpContext>>>,
    notify_context: RwLock<Option<Arc<NotifyContext>>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the device credentials registry.
    pub fn set_credentials(&self, entries: Vec<DeviceCredentials>) -> EmulatorResult<()> {
        for entry in &entries {
            entry.validate()?;
        }

        let registry: HashMap<String, String> = entries
            .into_iter()
            .map(|entry| (entry.device_id, entry.api_access_secret))
            .collect();

        let mut credentials = self
            .credentials
            .write()
            .map_err(|e| EmulatorError::internal(e.to_string()))?;
        *credentials = registry;

        Ok(())
    }

    /// List the installed credentials, ordered by device ID.
    pub fn credentials(&self) -> EmulatorResult<Vec<DeviceCredentials>> {
        let credentials = self
            .credentials
            .read()
            .map_err(|e| EmulatorError::internal(e.to_string()))?;

        let mut entries: Vec<DeviceCredentials> = credentials
            .iter()
            .map(|(device_id, api_access_secret)| DeviceCredentials {
                device_id: device_id.clone(),
                api_access_secret: api_access_secret.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.device_id.cmp(&b.device_id));

        Ok(entries)
    }

    pub fn api_access_secret(&self, device_id: &str) -> EmulatorResult<Option<String>> {
        let credentials = self
            .credentials
            .read()
            .map_err(|e| EmulatorError::internal(e.to_string()))?;

        Ok(credentials.get(device_id).cloned())
    }

    /// Install a new HTTP expectation, replacing any previous one.
    pub fn set_http_context(&self, context: HttpContext) -> EmulatorResult<()> {
        context.validate()?;

        let mut slot = self
            .http_context
            .write()
            .map_err(|e| EmulatorError::internal(e.to_string()))?;
        *slot = Some(Arc::new(context));

        Ok(())
    }

    pub fn http_context(&self) -> EmulatorResult<Option<Arc<HttpContext>>> {
        let slot = self
            .http_context
            .read()
            .map_err(|e| EmulatorError::internal(e.to_string()))?;

        Ok(slot.clone())
    }

    /// Install a new notification table, replacing any previous one.
    pub fn set_notify_context(&self, context: NotifyContext) -> EmulatorResult<()> {
        context.validate()?;

        let mut slot = self
            .notify_context
            .write()
            .map_err(|e| EmulatorError::internal(e.to_string()))?;
        *slot = Some(Arc::new(context));

        Ok(())
    }

    pub fn notify_context(&self) -> EmulatorResult<Option<Arc<NotifyContext>>> {
        let slot = self
            .notify_context
            .read()
            .map_err(|e| EmulatorError::internal(e.to_string()))?;

        Ok(slot.clone())
    }

    /// Look up the notification message installed for a (device, event)
    /// pair.
    pub fn notify_message(
        &self,
        device_id: &str,
        event: NotificationEvent,
    ) -> EmulatorResult<Option<NotificationMessage>> {
        let context = self.notify_context()?;

        Ok(context
            .as_ref()
            .and_then(|table| table.message(device_id, event).cloned()))
    }
}
