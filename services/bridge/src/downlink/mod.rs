//! C1: Downlink Adapter — the seam between the bridge and the hierarchical
//! typed parameter bus (e.g. rbus). The real bus client is out of scope for
//! this repository; this module defines the contract and ships only an
//! in-memory test double (see [`mock`]).

pub mod mock;

use bridge_protocol::{AccessMode, Attributes, RowField};

/// One leaf value as returned by the downlink bus: its raw string form plus
/// the bus-native type code (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkValue {
    pub value: String,
    pub data_type: u8,
}

/// Contract the Protocol Engine and WebConfig Engine use to reach the
/// downlink bus. Every method is synchronous: the real rbus client is a
/// blocking C API wrapped behind this trait, and the mock used by tests is
/// in-memory, so there is no `.await` to model at this seam.
pub trait DownlinkAdapter: Send + Sync {
    /// Establish the bus connection under the given component name.
    fn open(&mut self, component: &str) -> Result<(), DownlinkError>;

    /// Release the bus connection.
    fn close(&mut self) -> Result<(), DownlinkError>;

    /// Resolve a single fully-qualified parameter name.
    fn get(&self, name: &str) -> Result<DownlinkValue, DownlinkError>;

    /// Resolve every parameter matching a wildcard/subtree prefix (`Device.X.`
    /// or `Device.X.*`). Returns the fully-qualified name alongside each
    /// value.
    fn expand_wildcard(&self, prefix: &str) -> Result<Vec<(String, DownlinkValue)>, DownlinkError>;

    /// Write a single parameter.
    fn set(&mut self, name: &str, value: &str, data_type: u8) -> Result<(), DownlinkError>;

    /// Read the notify/access attributes of a parameter.
    fn get_attributes(&self, name: &str) -> Result<Attributes, DownlinkError>;

    /// Write the notify/access attributes of a parameter.
    fn set_attributes(&mut self, name: &str, attributes: &Attributes) -> Result<(), DownlinkError>;

    /// Append a row to a table, returning the bus-assigned row name.
    fn add_table_row(
        &mut self,
        table_name: &str,
        row_data: &[RowField],
    ) -> Result<String, DownlinkError>;

    /// Delete a single table row by its fully-qualified row name.
    fn delete_table_row(&mut self, row_name: &str) -> Result<(), DownlinkError>;

    /// Replace every row of a table atomically.
    fn replace_table(
        &mut self,
        table_name: &str,
        table_data: &[Vec<RowField>],
    ) -> Result<(), DownlinkError>;

    /// Register interest in change events under a parameter/subtree.
    fn subscribe(&mut self, name: &str) -> Result<(), DownlinkError>;

    /// Cancel a prior subscription.
    fn unsubscribe(&mut self, name: &str) -> Result<(), DownlinkError>;
}

/// Enforce the write-only/read-only access mode before touching the bus.
/// Shared by both the real adapter (not implemented here) and the mock so
/// the access check lives in exactly one place.
pub fn check_writable(access: AccessMode) -> Result<(), DownlinkError> {
    if access == AccessMode::ReadOnly {
        return Err(DownlinkError::Forbidden("parameter is read-only".into()));
    }
    Ok(())
}

#[derive(Debug)]
pub enum DownlinkError {
    NotFound(String),
    Forbidden(String),
    Timeout(String),
    Transport(String),
    Internal(String),
}

impl std::fmt::Display for DownlinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownlinkError::NotFound(s) => write!(f, "not found: {}", s),
            DownlinkError::Forbidden(s) => write!(f, "forbidden: {}", s),
            DownlinkError::Timeout(s) => write!(f, "timeout: {}", s),
            DownlinkError::Transport(s) => write!(f, "transport error: {}", s),
            DownlinkError::Internal(s) => write!(f, "internal error: {}", s),
        }
    }
}

impl std::error::Error for DownlinkError {}
