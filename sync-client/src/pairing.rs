//! Pairing dialog driver.
//!
//! Wraps the pure [`PairingDialog`] from sync-core with the backend calls.
//! Requesting a code is exclusive: a new request or closing the dialog makes
//! any outstanding response stale, and a stale code is never shown.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use inkwell_sync_core::{DialogState, PairingCode, PairingDialog, PairingRole, StaleGuard};
use inkwell_sync_types::{DeviceId, DeviceRecord};
use tracing::{debug, info, warn};

use crate::backend::SyncBackend;
use crate::error::ClientError;

/// One open pairing dialog.
pub struct PairingFlow<B: SyncBackend> {
    backend: Arc<B>,
    current: DeviceId,
    guard: StaleGuard,
    dialog: Mutex<PairingDialog>,
}

impl<B: SyncBackend> PairingFlow<B> {
    /// Open a dialog for `role` on the device `current`.
    pub fn new(backend: Arc<B>, current: DeviceId, role: PairingRole) -> Self {
        Self {
            backend,
            current,
            guard: StaleGuard::new(),
            dialog: Mutex::new(PairingDialog::new(role)),
        }
    }

    fn dialog(&self) -> MutexGuard<'_, PairingDialog> {
        self.dialog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the service for a fresh code to show.
    ///
    /// Returns `Ok(None)` if the response arrived after a newer request or
    /// after the dialog was closed.
    pub async fn request_code(&self, server_url: &str) -> Result<Option<PairingCode>, ClientError> {
        self.dialog().begin_request()?;
        let token = self.guard.begin();

        let result = self.backend.generate_pairing_code(server_url).await;
        if self.guard.is_stale(token) {
            debug!("discarding superseded pairing code");
            return Ok(None);
        }

        match result {
            Ok(code) => {
                self.dialog().code_received(code.clone());
                info!("pairing code ready");
                Ok(Some(code))
            }
            Err(e) => {
                self.dialog().failed(e.to_string());
                warn!(error = %e, "pairing code request failed");
                Err(e.into())
            }
        }
    }

    /// Redeem a code typed or pasted by the user.
    ///
    /// Only surrounding whitespace is trimmed. On failure the error is also
    /// shown inline and device state is untouched.
    pub async fn submit_code(&self, input: &str) -> Result<DeviceRecord, ClientError> {
        let begun = self.dialog().begin_submit(input);
        let code = match begun {
            Ok(code) => code,
            Err(e) => {
                self.dialog().failed(e.to_string());
                return Err(e.into());
            }
        };

        match self.backend.complete_pairing(&code).await {
            Ok(info) => {
                let record = DeviceRecord::from_info(info, &self.current);
                // Pairing happened on the service even if the dialog was closed meanwhile.
                self.dialog().submit_succeeded(record.clone());
                info!(device = %record.device_id, name = %record.name, "device paired");
                Ok(record)
            }
            Err(e) => {
                self.dialog().failed(e.to_string());
                warn!(error = %e, "pairing rejected");
                Err(e.into())
            }
        }
    }

    /// Close the dialog. Any shown code expires and late responses are dropped.
    pub fn close(&self) {
        self.guard.reset();
        self.dialog().close();
    }

    /// The dialog's role.
    pub fn role(&self) -> PairingRole {
        self.dialog().role()
    }

    /// Current dialog state.
    pub fn state(&self) -> DialogState {
        self.dialog().state().clone()
    }

    /// The code currently shown, if any.
    pub fn code(&self) -> Option<PairingCode> {
        self.dialog().code().cloned()
    }

    /// The inline error, if the last attempt failed.
    pub fn error(&self) -> Option<String> {
        self.dialog().error().map(str::to_string)
    }
}
