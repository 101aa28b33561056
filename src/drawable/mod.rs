//! Drawables
//!
//! Per-drawable state: the native id, negotiated format and geometry, the
//! server buffer currently bound and the device mapping that backs it.

mod negotiate;
mod present;

use std::ptr::NonNull;

use tracing::{debug, warn};

use crate::device::MemoryMapping;
use crate::error::{Result, WseglError};
use crate::format::{PixelFormat, aligned_stride};
use crate::session::DisplaySession;
use crate::types::{BufferName, DrawableConfig, DrawableKind, NativeDrawable, RenderParams};

/// Device mapping held by a drawable.
#[derive(Debug)]
pub(crate) enum ActiveMapping {
    /// A server-exported segment wrapped into the device. The mapping and the
    /// attached segment are released together.
    Imported {
        mapping: MemoryMapping,
        segment: NonNull<u8>,
    },
    /// The device frame buffer, owned by the device.
    FrameBuffer { mapping: MemoryMapping },
}

impl ActiveMapping {
    fn mapping(&self) -> &MemoryMapping {
        match self {
            Self::Imported { mapping, .. } | Self::FrameBuffer { mapping } => mapping,
        }
    }
}

/// A window or pixmap negotiated over DRI2.
pub struct Drawable<'s> {
    session: &'s DisplaySession,
    native: NativeDrawable,
    kind: DrawableKind,
    pixel_format: PixelFormat,
    width: u32,
    height: u32,
    stride: u32,
    buffer: Option<BufferName>,
    mapping: Option<ActiveMapping>,
    treated_as_pixmap: bool,
    destroyed: bool,
}

impl<'s> Drawable<'s> {
    /// Validate `native` against `config` and register it with the server.
    pub fn create(
        session: &'s DisplaySession,
        native: NativeDrawable,
        config: &DrawableConfig,
        kind: DrawableKind,
    ) -> Result<Self> {
        if native.is_null() {
            return Err(kind.null_handle_error());
        }

        if !config.kinds.contains(kind.flag()) {
            return Err(WseglError::BadConfig(format!(
                "config does not support {kind:?} drawables"
            )));
        }

        let geometry = session.connection().get_geometry(native).map_err(|e| {
            warn!("Failed to get geometry of drawable {:#x}: {}", native.0, e);
            WseglError::BadDrawable(format!("geometry query failed: {e}"))
        })?;

        let pixel_format = PixelFormat::from_depth(geometry.depth).ok_or_else(|| {
            WseglError::BadDrawable(format!("unsupported depth {}", geometry.depth))
        })?;

        if pixel_format != config.pixel_format {
            return Err(WseglError::BadConfig(format!(
                "drawable is {:?}, config is {:?}",
                pixel_format, config.pixel_format
            )));
        }

        session.protocol().create_drawable(native)?;

        debug!(
            "Created {:?} drawable {:#x} ({}x{}, {:?})",
            kind, native.0, geometry.width, geometry.height, pixel_format
        );

        Ok(Self {
            session,
            native,
            kind,
            pixel_format,
            width: geometry.width,
            height: geometry.height,
            stride: aligned_stride(geometry.width),
            buffer: None,
            mapping: None,
            treated_as_pixmap: false,
            destroyed: false,
        })
    }

    pub fn native(&self) -> NativeDrawable {
        self.native
    }

    pub fn kind(&self) -> DrawableKind {
        self.kind
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row length in pixels.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Server buffer currently bound, `None` before the first negotiation.
    pub fn buffer_name(&self) -> Option<BufferName> {
        self.buffer
    }

    pub fn has_mapping(&self) -> bool {
        self.mapping.is_some()
    }

    pub fn is_treated_as_pixmap(&self) -> bool {
        self.treated_as_pixmap
    }

    pub fn session(&self) -> &'s DisplaySession {
        self.session
    }

    /// Parameters of the active mapping.
    pub fn render_params(&self) -> Option<RenderParams> {
        let mapping = self.mapping.as_ref()?.mapping();
        Some(RenderParams {
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format,
            stride: self.stride,
            linear_address: mapping.linear_address,
            hw_address: mapping.hw_address,
            private: mapping.private,
        })
    }

    /// CPU view of the active mapping.
    pub(crate) fn mapped_bytes(&self) -> Option<&[u8]> {
        let mapping = self.mapping.as_ref()?.mapping();
        // The mapping stays attached and covers `size` bytes until it is
        // released, which needs `&mut self`.
        Some(unsafe { std::slice::from_raw_parts(mapping.linear_address.as_ptr(), mapping.size) })
    }

    /// Unregister from the server and release the mapping.
    ///
    /// A BadDrawable for a drawable the server already destroyed is not an
    /// error. Any other protocol failure is returned once the mapping has
    /// been released.
    pub fn destroy(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;

        let result = self.session.protocol().destroy_drawable(self.native);
        self.release_mapping();
        debug!("Destroyed drawable {:#x}", self.native.0);
        result
    }

    /// Release the active mapping, if any. The device frame buffer is only
    /// forgotten, never freed.
    fn release_mapping(&mut self) {
        let session = self.session;
        self.buffer = None;
        match self.mapping.take() {
            Some(ActiveMapping::Imported { mapping, segment }) => {
                session.device().free(session.context(), mapping);
                session.shared_memory().detach(segment);
            }
            Some(ActiveMapping::FrameBuffer { mapping }) => {
                debug!(
                    "Dropping frame buffer mapping {:#x} of drawable {:#x}",
                    mapping.hw_address, self.native.0
                );
            }
            None => {}
        }
    }
}

impl Drop for Drawable<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("Failed to destroy drawable {:#x}: {}", self.native.0, e);
        }
    }
}
