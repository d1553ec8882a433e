//! Error taxonomy for sync passes.
//!
//! Every collaborator (source provider, content store, index provider,
//! persisted state) reports failures through [`SyncError`]. The variant
//! decides how the caller reacts:
//!
//! | Variant | Retry the pass? |
//! |---------|-----------------|
//! | `Authentication` | No, credentials must be fixed first |
//! | `NotFound` | No, the resource or path is gone |
//! | `Network` / `ProviderUnavailable` | Yes |
//! | `Consistency` | No, surfaced for an operator |
//! | `SyncInProgress` | Later, once the running pass ends |

/// Result alias used by every collaborator trait.
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("authentication failed for {target}: {message}")]
    Authentication { target: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("consistency violation: {0}")]
    Consistency(String),

    #[error("a sync pass is already running for resource {0}")]
    SyncInProgress(i64),

    #[error("persisted state error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether re-running the whole pass can be expected to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::ProviderUnavailable(_))
    }

    /// Short machine-readable label, used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Authentication { .. } => "authentication",
            SyncError::NotFound(_) => "not_found",
            SyncError::Network(_) => "network",
            SyncError::ProviderUnavailable(_) => "provider_unavailable",
            SyncError::Consistency(_) => "consistency",
            SyncError::SyncInProgress(_) => "sync_in_progress",
            SyncError::Storage(_) => "storage",
            SyncError::Io(_) => "io",
        }
    }

    pub fn auth(target: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Authentication {
            target: target.into(),
            message: message.into(),
        }
    }
}
