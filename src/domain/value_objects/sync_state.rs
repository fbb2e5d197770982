use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the remote service has confirmed a record's current value.
///
/// Stored and indexed as an integer code: index keys must be a type the
/// storage engine can key on, never a raw boolean.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Synced = 0,
    Pending = 1,
    Failed = 2,
}

impl SyncState {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Result<Self, String> {
        match code {
            0 => Ok(SyncState::Synced),
            1 => Ok(SyncState::Pending),
            2 => Ok(SyncState::Failed),
            other => Err(format!("Unknown sync state code: {other}")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Synced => "synced",
            SyncState::Pending => "pending",
            SyncState::Failed => "failed",
        }
    }

    pub fn is_confirmed(self) -> bool {
        matches!(self, SyncState::Synced)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
