//! Error Types
//!
//! Error taxonomy returned to the window-system adapter, plus the
//! collaborator faults it is built from.

use thiserror::Error;

/// X11 core error code for `BadDrawable`.
pub const BAD_DRAWABLE: u8 = 9;

/// Errors surfaced by sessions and drawables.
#[derive(Debug, Error)]
pub enum WseglError {
    /// Session setup failed (no device, context creation, version mismatch,
    /// connection open). Not retried.
    #[error("cannot initialise display session: {0}")]
    Initialization(String),

    /// The display does not name a local X server.
    #[error("native display is not a local X display")]
    BadNativeDisplay,

    /// A null native window handle was supplied.
    #[error("native window handle is null")]
    BadNativeWindow,

    /// A null native pixmap handle was supplied.
    #[error("native pixmap handle is null")]
    BadNativePixmap,

    /// Only the default native engine can be waited on.
    #[error("native engine {0} is not supported")]
    BadNativeEngine(u32),

    /// Format or kind mismatch between a config and a drawable or client buffer.
    #[error("bad config: {0}")]
    BadConfig(String),

    /// The drawable must be recreated by the caller.
    #[error("bad drawable: {0}")]
    BadDrawable(String),

    /// Allocation, shared-memory attach or device import failed.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Transport or server-side protocol failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ConnectionFault),
}

pub type Result<T, E = WseglError> = std::result::Result<T, E>;

/// A server-reported error, reduced to the fields used for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerError {
    pub error_code: u8,
    pub major_opcode: u8,
    pub minor_opcode: u16,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} on request {}.{}",
            self.error_code, self.major_opcode, self.minor_opcode
        )
    }
}

/// Failure reported by a [`DisplayConnection`](crate::protocol::DisplayConnection).
#[derive(Debug, Clone, Error)]
pub enum ConnectionFault {
    #[error("{0} extension is not available")]
    MissingExtension(&'static str),

    #[error("X11 error {0}")]
    Server(ServerError),

    #[error("display connection failed: {0}")]
    Transport(String),
}

/// Failure reported by a [`DeviceMemory`](crate::device::DeviceMemory) service.
#[derive(Debug, Clone, Error)]
pub enum DeviceFault {
    #[error("no device available")]
    NoDevice,

    #[error("device context creation failed: {0}")]
    Context(String),

    #[error("device memory operation failed: {0}")]
    Memory(String),
}
