//! Buffer negotiation: reconcile a drawable with the buffers the server
//! currently holds for it and keep a device mapping of the right one.

use tracing::{debug, trace, warn};

use super::{ActiveMapping, Drawable};
use crate::device::shm::{page_size, page_span};
use crate::error::{Result, WseglError};
use crate::protocol::BufferDescriptor;
use crate::types::{BufferName, DrawableKind, RenderParams};

impl Drawable<'_> {
    /// Bring the drawable's mapping in line with the server and return the
    /// parameters to render with.
    ///
    /// Validation failures leave the drawable untouched. A pixmap that has
    /// been negotiated and not presented since is returned from cache; a
    /// server-side resize is not seen until the next present.
    pub fn negotiate(&mut self) -> Result<RenderParams> {
        if self.treated_as_pixmap {
            if let Some(params) = self.render_params() {
                trace!("Pixmap {:#x} served from cache", self.native.0);
                return Ok(params);
            }
        }

        let requested = self.kind.requested_attachments();
        let set = self
            .session
            .protocol()
            .get_buffers(self.native, requested)
            .map_err(|e| {
                warn!("GetBuffers failed for drawable {:#x}: {}", self.native.0, e);
                WseglError::OutOfMemory(format!("buffer query failed: {e}"))
            })?;

        if set.buffers.len() != requested.len() {
            return Err(WseglError::BadDrawable(format!(
                "server returned {} buffers, expected {}",
                set.buffers.len(),
                requested.len()
            )));
        }

        if (set.width, set.height) != (self.width, self.height) {
            return Err(WseglError::BadDrawable(format!(
                "server size {}x{} differs from {}x{}",
                set.width, set.height, self.width, self.height
            )));
        }

        let buffer = set.buffers[0];
        if buffer.cpp == 0 {
            return Err(WseglError::BadDrawable("zero bytes per pixel".into()));
        }
        let stride = buffer.pitch / buffer.cpp;

        if self.mapping.is_none() || self.buffer != Some(buffer.name) {
            self.import(&buffer)?;
        }

        self.stride = stride;
        if self.kind == DrawableKind::Pixmap {
            self.treated_as_pixmap = true;
        }

        self.render_params()
            .ok_or_else(|| WseglError::BadDrawable("no active mapping".into()))
    }

    /// Replace the active mapping with one backing `buffer`. The old mapping
    /// is released before the new one is acquired.
    fn import(&mut self, buffer: &BufferDescriptor) -> Result<()> {
        let size = buffer.pitch as usize * self.height as usize;
        if size == 0 {
            return Err(WseglError::BadDrawable("empty buffer".into()));
        }

        self.release_mapping();

        let session = self.session;
        let mapping = match buffer.name {
            BufferName::FrameBuffer => {
                let mapping = session
                    .device()
                    .frame_buffer(session.context(), 0)
                    .map_err(|e| WseglError::OutOfMemory(format!("frame buffer: {e}")))?;
                ActiveMapping::FrameBuffer { mapping }
            }
            BufferName::Exported(name) => {
                let shm = session.shared_memory();
                let segment = shm.attach(name).map_err(|e| {
                    warn!("Failed to attach shm segment {}: {}", name.0, e);
                    WseglError::OutOfMemory(format!("shm attach {}: {e}", name.0))
                })?;

                let contiguous = page_span(size, page_size()) == 1;
                match session
                    .device()
                    .wrap(session.context(), segment, contiguous, size)
                {
                    Ok(mapping) => ActiveMapping::Imported { mapping, segment },
                    Err(e) => {
                        shm.detach(segment);
                        return Err(WseglError::OutOfMemory(format!("device wrap: {e}")));
                    }
                }
            }
        };

        debug!(
            "Drawable {:#x} mapped {:?} ({} bytes) at {:#x}",
            self.native.0,
            buffer.name,
            size,
            mapping.mapping().hw_address
        );

        self.mapping = Some(mapping);
        self.buffer = Some(buffer.name);
        Ok(())
    }
}
