//! Error types for registry mutations and persistence

use thiserror::Error;

/// Errors that can occur while mutating or persisting the registry
///
/// Validation errors are raised before anything is touched, so a failed
/// mutation leaves the registry unchanged.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Referenced entity does not exist
    #[error("unknown {kind}: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Required field missing from an upsert payload
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Button references no existing switch
    #[error("button must reference an existing switch")]
    UnknownSwitch,

    /// Button mask is zero, negative, or has more than one bit set
    #[error("button mask must be a single-bit value greater than zero, got {0}")]
    InvalidMask(i64),

    /// Another button on the same switch already uses the mask
    #[error("button mask {mask} already assigned on switch {switch_id}")]
    DuplicateMask { switch_id: String, mask: i64 },

    /// Switch already has as many buttons as it is configured for
    #[error("switch {switch_id} already has its configured {limit} buttons")]
    ButtonLimit { switch_id: String, limit: u8 },

    /// SSR bit index outside 0..=9
    #[error("SSR bit index must be between 0 and {max}, got {got}")]
    InvalidSsrBit { got: i64, max: u8 },

    /// SSR bit already used by another entry
    #[error("bit {0} is already assigned to another SSR")]
    DuplicateSsrBit(u8),

    /// Maximum number of SSR entries reached
    #[error("maximum of {0} SSR entries reached")]
    SsrLimit(usize),

    /// Patch-panel port number out of range
    #[error("port_number must be between 1 and {max}, got {got}")]
    InvalidPort { got: i64, max: u8 },

    /// Persistence I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistence (de)serialization failure
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl RegistryError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        RegistryError::NotFound {
            kind,
            id: id.into(),
        }
    }
}
