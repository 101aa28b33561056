//! WSEGL DRI2
//!
//! Client side of DRI2 buffer negotiation for an X11 window-system adapter.
//! A [`SessionRegistry`] hands out one shared display session per process;
//! each window or pixmap becomes a [`Drawable`] that negotiates the server's
//! current buffers, keeps a device mapping of the one to render into, and
//! presents by asking the server to copy back to front.

pub mod config;
pub mod device;
pub mod drawable;
pub mod error;
pub mod format;
pub mod protocol;
pub mod readback;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use drawable::Drawable;
pub use error::{ConnectionFault, DeviceFault, Result, WseglError};
pub use format::PixelFormat;
pub use readback::{LinearLayout, RowOrder};
pub use session::{Capabilities, DisplaySession, SessionHandle, SessionOptions, SessionRegistry};
pub use types::{
    Attachment, BufferName, DrawableConfig, DrawableKind, DrawableKinds, NativeDrawable,
    RenderParams,
};
