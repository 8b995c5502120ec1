//! Device pairing codes and the pairing dialog state.
//!
//! This module provides:
//! - [`PairingCode`]: the `{visual, canonical}` pair shown by the initiator
//! - [`PairingTicket`]: minting and validating `sk-pair_v1.` codes (used by
//!   the bundled relay; clients treat the canonical string as opaque)
//! - [`PairingDialog`]: the show-code / enter-code dialog lifecycle
//!
//! The pairing flow:
//! 1. Device A requests a code for a server URL and shows it (QR + text)
//! 2. Device B types or scans the canonical string and submits it
//! 3. The service registers B as trusted and returns its device record
//! 4. The code is consumed and cannot be submitted again

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use inkwell_sync_types::DeviceRecord;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Prefix of every canonical pairing string minted by the bundled relay.
pub const PAIRING_CODE_PREFIX: &str = "sk-pair_v1.";

/// Default lifetime of a pairing ticket (10 minutes).
pub const DEFAULT_PAIRING_TTL: Duration = Duration::from_secs(600);

/// Error type for pairing operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairingError {
    /// Nothing was entered.
    #[error("pairing code is empty")]
    EmptyCode,
    /// The canonical string is not a pairing code.
    #[error("malformed pairing code: {0}")]
    MalformedCode(String),
    /// The visual payload could not be decoded.
    #[error("invalid pairing payload: {0}")]
    InvalidPayload(String),
    /// Version mismatch.
    #[error("unsupported pairing version: {0}")]
    UnsupportedVersion(u32),
    /// The code has expired or was superseded.
    #[error("pairing code has expired")]
    Expired,
    /// The code was never issued by this service.
    #[error("unknown pairing code")]
    UnknownCode,
    /// The code was already consumed by a previous pairing.
    #[error("pairing code was already used")]
    AlreadyUsed,
    /// The dialog session already completed.
    #[error("pairing already completed")]
    AlreadyPaired,
    /// The dialog was closed.
    #[error("pairing dialog is closed")]
    DialogClosed,
}

/// A pairing code as displayed by the initiating device.
///
/// Never persisted; dropped when the dialog closes or a new code is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingCode {
    /// Encoded payload for QR rendering.
    pub visual: String,
    /// The string a user types or pastes on the other device.
    pub canonical: String,
}

/// Trim surrounding whitespace from user input; nothing else is altered.
pub fn normalize_input(input: &str) -> Result<String, PairingError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(PairingError::EmptyCode);
    }
    Ok(trimmed.to_string())
}

/// Payload carried inside the visual encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VisualPayload {
    version: u32,
    server_url: String,
    code: String,
    expires_at: u64,
}

/// A pairing code as tracked by the service that minted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingTicket {
    /// Server the responder must contact.
    pub server_url: String,
    /// The canonical `sk-pair_v1.` string.
    pub canonical: String,
    /// Unix timestamp when the ticket was created.
    pub created_at: u64,
    /// Unix timestamp when the ticket expires.
    pub expires_at: u64,
}

impl PairingTicket {
    /// Mint a ticket with the default TTL.
    pub fn mint(server_url: &str) -> Self {
        Self::mint_with_ttl(server_url, DEFAULT_PAIRING_TTL)
    }

    /// Mint a ticket with a custom TTL.
    ///
    /// The secret part is 10 random bytes (80 bits) in base32.
    pub fn mint_with_ttl(server_url: &str, ttl: Duration) -> Self {
        let mut secret = [0u8; 10];
        getrandom::getrandom(&mut secret).expect("getrandom failed");
        let now = unix_now();

        Self {
            server_url: server_url.to_string(),
            canonical: format!("{}{}", PAIRING_CODE_PREFIX, base32_encode(&secret)),
            created_at: now,
            expires_at: now + ttl.as_secs(),
        }
    }

    /// Check if the ticket has expired.
    pub fn is_expired(&self) -> bool {
        unix_now() >= self.expires_at
    }

    /// The `{visual, canonical}` pair handed to the initiator.
    pub fn to_code(&self) -> PairingCode {
        let payload = VisualPayload {
            version: 1,
            server_url: self.server_url.clone(),
            code: self.canonical.clone(),
            expires_at: self.expires_at,
        };
        let json = serde_json::to_string(&payload).expect("pairing payload serialization failed");

        PairingCode {
            visual: URL_SAFE_NO_PAD.encode(json.as_bytes()),
            canonical: self.canonical.clone(),
        }
    }

    /// Check that `canonical` has the shape of a minted code.
    pub fn validate_canonical(canonical: &str) -> Result<(), PairingError> {
        let secret = canonical
            .strip_prefix(PAIRING_CODE_PREFIX)
            .ok_or_else(|| PairingError::MalformedCode("missing sk-pair_v1 prefix".into()))?;

        if secret.is_empty() {
            return Err(PairingError::MalformedCode("missing secret".into()));
        }
        if !secret.chars().all(is_base32_char) {
            return Err(PairingError::MalformedCode(
                "invalid characters (must be A-Z or 2-7)".into(),
            ));
        }
        Ok(())
    }
}

/// Recover the canonical string from a scanned visual payload.
pub fn canonical_from_visual(visual: &str) -> Result<String, PairingError> {
    let json_bytes = URL_SAFE_NO_PAD
        .decode(visual.trim())
        .map_err(|e| PairingError::InvalidPayload(format!("base64 decode: {}", e)))?;

    let payload: VisualPayload = serde_json::from_slice(&json_bytes)
        .map_err(|e| PairingError::InvalidPayload(format!("json parse: {}", e)))?;

    if payload.version != 1 {
        return Err(PairingError::UnsupportedVersion(payload.version));
    }
    if unix_now() >= payload.expires_at {
        return Err(PairingError::Expired);
    }

    Ok(payload.code)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Encode bytes as base32 (RFC 4648, uppercase, no padding).
fn base32_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    let mut result = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut bits = 0u32;
    let mut bit_count = 0;

    for &byte in bytes {
        bits = (bits << 8) | (byte as u32);
        bit_count += 8;

        while bit_count >= 5 {
            bit_count -= 5;
            let index = ((bits >> bit_count) & 0x1F) as usize;
            result.push(ALPHABET[index] as char);
        }
    }

    if bit_count > 0 {
        let index = ((bits << (5 - bit_count)) & 0x1F) as usize;
        result.push(ALPHABET[index] as char);
    }

    result
}

fn is_base32_char(c: char) -> bool {
    matches!(c, 'A'..='Z' | '2'..='7')
}

/// Which side of the pairing a dialog is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingRole {
    /// Shows a code.
    Initiator,
    /// Enters a code.
    Responder,
}

/// Lifecycle of one pairing dialog session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogState {
    /// Open, nothing requested yet.
    Idle,
    /// Waiting for the service to mint a code.
    Requesting,
    /// A code is on screen.
    Showing(PairingCode),
    /// A code was submitted and the service has not answered.
    Submitting,
    /// Pairing completed. Terminal.
    Paired(DeviceRecord),
    /// The last attempt failed; the user may retry.
    Failed(String),
    /// The dialog was dismissed. Terminal.
    Closed,
}

/// State of a pairing dialog, no I/O.
#[derive(Debug, Clone)]
pub struct PairingDialog {
    role: PairingRole,
    state: DialogState,
}

impl PairingDialog {
    /// Open a dialog in the given role.
    pub fn new(role: PairingRole) -> Self {
        Self {
            role,
            state: DialogState::Idle,
        }
    }

    /// The dialog's role.
    pub fn role(&self) -> PairingRole {
        self.role
    }

    /// Current state.
    pub fn state(&self) -> &DialogState {
        &self.state
    }

    /// The code currently on screen, if any.
    pub fn code(&self) -> Option<&PairingCode> {
        match &self.state {
            DialogState::Showing(code) => Some(code),
            _ => None,
        }
    }

    /// The inline error, if the last attempt failed.
    pub fn error(&self) -> Option<&str> {
        match &self.state {
            DialogState::Failed(message) => Some(message),
            _ => None,
        }
    }

    /// Whether the dialog reached `Paired` or `Closed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, DialogState::Paired(_) | DialogState::Closed)
    }

    fn ensure_open(&self) -> Result<(), PairingError> {
        match self.state {
            DialogState::Paired(_) => Err(PairingError::AlreadyPaired),
            DialogState::Closed => Err(PairingError::DialogClosed),
            _ => Ok(()),
        }
    }

    /// Begin requesting a code. Any code on screen is expired.
    pub fn begin_request(&mut self) -> Result<(), PairingError> {
        self.ensure_open()?;
        self.state = DialogState::Requesting;
        Ok(())
    }

    /// The service minted a code. Ignored unless a request is outstanding.
    pub fn code_received(&mut self, code: PairingCode) -> bool {
        if self.state != DialogState::Requesting {
            return false;
        }
        self.state = DialogState::Showing(code);
        true
    }

    /// Begin submitting user input; returns the trimmed code to send.
    pub fn begin_submit(&mut self, input: &str) -> Result<String, PairingError> {
        self.ensure_open()?;
        let code = normalize_input(input)?;
        self.state = DialogState::Submitting;
        Ok(code)
    }

    /// The service accepted the code. Ignored unless a submit is outstanding.
    pub fn submit_succeeded(&mut self, record: DeviceRecord) -> bool {
        if self.state != DialogState::Submitting {
            return false;
        }
        self.state = DialogState::Paired(record);
        true
    }

    /// A request or submit failed. Terminal states are left untouched.
    pub fn failed(&mut self, message: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.state = DialogState::Failed(message.into());
        true
    }

    /// Dismiss the dialog. Any code on screen is dropped.
    pub fn close(&mut self) {
        if !matches!(self.state, DialogState::Paired(_)) {
            self.state = DialogState::Closed;
        }
    }
}
