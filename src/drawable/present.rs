//! Presentation: ask the server to copy the back buffer to the front.

use tracing::trace;

use super::Drawable;
use crate::error::Result;
use crate::protocol::Rect;
use crate::types::Attachment;

impl Drawable<'_> {
    /// Copy the whole back buffer to the front buffer.
    ///
    /// The temporary region is destroyed even when the copy fails. Presenting
    /// also ends the pixmap fast path, so the next negotiation queries the
    /// server again.
    pub fn present(&mut self) -> Result<()> {
        let conn = self.session.connection();
        let rect = Rect {
            x: 0,
            y: 0,
            width: u16::try_from(self.width).unwrap_or(u16::MAX),
            height: u16::try_from(self.height).unwrap_or(u16::MAX),
        };

        self.treated_as_pixmap = false;

        let region = conn.create_region(rect)?;
        let copied = self.session.protocol().copy_region(
            self.native,
            region,
            Attachment::FrontLeft,
            Attachment::BackLeft,
        );
        let destroyed = conn.destroy_region(region);

        trace!("Presented drawable {:#x}", self.native.0);
        copied?;
        destroyed?;
        Ok(())
    }
}
