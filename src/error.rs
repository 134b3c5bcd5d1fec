use std::time::Duration;
use thiserror::Error;

use crate::sheet::StoreError;

/// Coarse classification used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; nothing was written.
    Validation,
    /// Duplicate registration; nothing was written.
    Conflict,
    /// The ledger lock could not be taken in time; nothing was written.
    Contention,
    /// The roster store failed mid-batch; earlier writes may remain.
    Store,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid submission: {0}")]
    InvalidFormat(String),
    #[error("ids not on the masterlist: {}", .0.join(", "))]
    UnknownIds(Vec<String>),
    #[error("ids already registered: {}", .0.join(", "))]
    AlreadyRegistered(Vec<String>),
    #[error("timed out after {0:?} waiting for the ledger lock")]
    LockTimeout(Duration),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidFormat(_) | LedgerError::UnknownIds(_) => ErrorKind::Validation,
            LedgerError::AlreadyRegistered(_) => ErrorKind::Conflict,
            LedgerError::LockTimeout(_) => ErrorKind::Contention,
            LedgerError::Store(_) => ErrorKind::Store,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Contention
    }

    /// Text shown to the person who submitted the batch.
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::InvalidFormat(msg) => msg.clone(),
            LedgerError::UnknownIds(ids) => format!(
                "❌ The following ID(s) is / are not valid:\n{}",
                ids.join("\n")
            ),
            LedgerError::AlreadyRegistered(ids) => format!(
                "❌ The following ID(s) has / have already been registered:\n{}",
                ids.join("\n")
            ),
            LedgerError::LockTimeout(_) => {
                "⏳ The attendance sheet is busy right now. Please send the same IDs again in a moment."
                    .to_string()
            }
            LedgerError::Store(_) => {
                "❌ Something went wrong while updating the attendance sheet. Please check the sheet before resubmitting."
                    .to_string()
            }
        }
    }
}
