//! Readback
//!
//! Copies rendered pixels into native pixmaps with PutImage: either the
//! active mapping of a drawable, or a caller-owned linear buffer.

use tracing::debug;

use crate::drawable::Drawable;
use crate::error::{Result, WseglError};
use crate::format::PixelFormat;
use crate::protocol::ImageBlit;
use crate::session::DisplaySession;
use crate::types::NativeDrawable;

/// Layout of a linear pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearLayout {
    pub width: u32,
    pub height: u32,
    /// Row length in pixels.
    pub stride: u32,
    pub pixel_format: PixelFormat,
}

/// Order rows are stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrder {
    TopDown,
    /// First row in memory is the bottom row of the image.
    BottomUp,
}

/// Tightly packed rows, each padded to 32 bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedRows {
    pub scanline: usize,
    pub data: Vec<u8>,
}

/// Repack `src` into top-down rows padded to 4 bytes.
pub fn pack_rows(src: &[u8], layout: &LinearLayout, order: RowOrder) -> Result<PackedRows> {
    let bpp = layout.pixel_format.bytes_per_pixel() as usize;
    let width = layout.width as usize;
    let height = layout.height as usize;

    if layout.stride < layout.width {
        return Err(WseglError::BadConfig(format!(
            "stride {} is shorter than width {}",
            layout.stride, layout.width
        )));
    }

    let row_bytes = width * bpp;
    let pitch = layout.stride as usize * bpp;
    let required = match height {
        0 => 0,
        h => (h - 1) * pitch + row_bytes,
    };
    if src.len() < required {
        return Err(WseglError::BadConfig(format!(
            "source holds {} bytes, layout needs {}",
            src.len(),
            required
        )));
    }

    let scanline = row_bytes.next_multiple_of(4);
    let mut data = vec![0u8; scanline * height];

    for (row, out) in data.chunks_exact_mut(scanline.max(1)).enumerate().take(height) {
        let src_row = match order {
            RowOrder::TopDown => row,
            RowOrder::BottomUp => height - 1 - row,
        };
        let start = src_row * pitch;
        out[..row_bytes].copy_from_slice(&src[start..start + row_bytes]);
    }

    Ok(PackedRows { scanline, data })
}

/// Validate `target` against `format` and send the packed rows.
fn put_rows(
    session: &DisplaySession,
    target: NativeDrawable,
    layout: &LinearLayout,
    rows: PackedRows,
) -> Result<()> {
    let conn = session.connection();
    let format = layout.pixel_format;

    let geometry = conn
        .get_geometry(target)
        .map_err(|e| WseglError::BadConfig(format!("target pixmap: {e}")))?;

    if geometry.depth != format.bits_per_pixel() {
        return Err(WseglError::BadConfig(format!(
            "target depth {} does not hold {:?}",
            geometry.depth, format
        )));
    }

    let width = u16::try_from(layout.width)
        .map_err(|_| WseglError::BadConfig(format!("width {} too large", layout.width)))?;
    // Rows are addressed with signed 16-bit coordinates.
    let height = i16::try_from(layout.height)
        .map(|h| h as u16)
        .map_err(|_| WseglError::BadConfig(format!("height {} too large", layout.height)))?;

    let image = ImageBlit {
        width,
        height,
        depth: geometry.depth,
        bits_per_pixel: format.bits_per_pixel(),
        scanline: rows.scanline,
        masks: format.rgb_masks(),
        data: rows.data,
    };

    conn.put_image(target, &image)?;
    debug!(
        "Copied {}x{} {:?} to pixmap {:#x}",
        width, height, format, target.0
    );
    Ok(())
}

impl Drawable<'_> {
    /// Copy the drawable's current contents into the pixmap `target`.
    pub fn copy_to_pixmap(&self, target: NativeDrawable) -> Result<()> {
        let params = self
            .render_params()
            .ok_or_else(|| WseglError::BadDrawable("drawable has no buffer mapped".into()))?;
        let src = self
            .mapped_bytes()
            .ok_or_else(|| WseglError::BadDrawable("drawable has no buffer mapped".into()))?;

        let layout = LinearLayout {
            width: params.width,
            height: params.height,
            stride: params.stride,
            pixel_format: params.pixel_format,
        };
        let rows = pack_rows(src, &layout, RowOrder::TopDown)?;
        put_rows(self.session(), target, &layout, rows)
    }
}

impl DisplaySession {
    /// Copy a caller-owned linear buffer into the pixmap `target`.
    pub fn copy_from_linear_buffer(
        &self,
        src: &[u8],
        layout: &LinearLayout,
        order: RowOrder,
        target: NativeDrawable,
    ) -> Result<()> {
        let rows = pack_rows(src, layout, order)?;
        put_rows(self, target, layout, rows)
    }
}
