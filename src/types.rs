//! Shared Types
//!
//! Strong identifiers for native resources and buffer names, drawable kinds,
//! configs and the render parameters handed back to the renderer.

use bitflags::bitflags;
use std::ptr::NonNull;

use crate::error::WseglError;
use crate::format::PixelFormat;

/// X11 window or pixmap id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeDrawable(pub u32);

impl NativeDrawable {
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// XFixes region id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId(pub u32);

/// X visual id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VisualId(pub u32);

/// SysV shared-memory id exported by the server as a buffer name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShmName(pub u32);

/// Which server buffer a drawable is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferName {
    /// A shared-memory segment exported by the server.
    Exported(ShmName),
    /// No export: render straight into the device frame buffer.
    FrameBuffer,
}

impl BufferName {
    /// Wire value the server uses for the frame buffer.
    pub const FRAME_BUFFER_WIRE: u32 = u32::MAX;

    pub fn from_wire(name: u32) -> Self {
        if name == Self::FRAME_BUFFER_WIRE {
            Self::FrameBuffer
        } else {
            Self::Exported(ShmName(name))
        }
    }
}

/// Buffer attachment points of a DRI2 drawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    FrontLeft,
    BackLeft,
}

impl Attachment {
    pub fn wire(self) -> u32 {
        match self {
            Self::FrontLeft => 0,
            Self::BackLeft => 1,
        }
    }
}

bitflags! {
    /// Drawable kinds a config can render to
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DrawableKinds: u32 {
        const WINDOW = 1 << 0;
        const PIXMAP = 1 << 1;
    }
}

/// Kind of a single drawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawableKind {
    Window,
    Pixmap,
}

impl DrawableKind {
    pub fn flag(self) -> DrawableKinds {
        match self {
            Self::Window => DrawableKinds::WINDOW,
            Self::Pixmap => DrawableKinds::PIXMAP,
        }
    }

    /// Attachments requested from the server on every negotiation.
    pub fn requested_attachments(self) -> &'static [Attachment] {
        match self {
            Self::Window => &[Attachment::BackLeft, Attachment::FrontLeft],
            Self::Pixmap => &[Attachment::FrontLeft],
        }
    }

    pub(crate) fn null_handle_error(self) -> WseglError {
        match self {
            Self::Window => WseglError::BadNativeWindow,
            Self::Pixmap => WseglError::BadNativePixmap,
        }
    }
}

/// A renderable configuration enumerated from the server's visuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawableConfig {
    pub pixel_format: PixelFormat,
    pub kinds: DrawableKinds,
    pub native_visual_id: VisualId,
    pub native_renderable: bool,
}

/// Opaque driver handle attached to a device mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivateHandle(pub u64);

/// Parameters the renderer draws with. Source and render parameters are the
/// same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderParams {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Row length in pixels.
    pub stride: u32,
    pub linear_address: NonNull<u8>,
    pub hw_address: u32,
    pub private: PrivateHandle,
}
