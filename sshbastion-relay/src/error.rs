use thiserror::Error;

/// Error kinds observable at the session-coordinator boundary.
///
/// Each variant's `Display` text is the exact user-visible message written
/// to the inbound channel before the session closes, where the originating
/// system specifies one.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Error processing server selection (Invalid ACL).")]
    AclInvalid,

    #[error("Error processing server selection (Invalid selection).")]
    SelectionFailed,

    #[error("Error processing server selection (Unknown server).")]
    ServerNotFound,

    #[error("Error opening session recording.")]
    AuditBindFailed(#[source] std::io::Error),

    #[error("Connect failed: {0}")]
    DialFailed(#[source] anyhow::Error),

    #[error("Connect failed: HOST KEY VALIDATION FAILED - POSSIBLE MITM BETWEEN RELAY AND REMOTE")]
    HostKeyMismatch,
}
