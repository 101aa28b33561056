//! X11 Connection
//!
//! [`DisplayConnection`] over an x11rb `RustConnection`, using the DRI2 and
//! XFixes protocol modules.

use std::ops::Range;

use tracing::{debug, trace, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::{ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::protocol::dri2::ConnectionExt as Dri2Ext;
use x11rb::protocol::xfixes::{self, ConnectionExt as XFixesExt};
use x11rb::protocol::xproto::{ConnectionExt as XprotoExt, CreateGCAux, ImageFormat, Rectangle};
use x11rb::rust_connection::RustConnection;

use super::{
    Connector, DisplayConnection, ExtensionCodes, Geometry, ImageBlit, Rect, VisualInfo,
    WireBuffer, WireBuffers,
};
use crate::error::{ConnectionFault, ServerError};
use crate::types::{NativeDrawable, RegionId, VisualId};

/// Fixed size of a PutImage request header.
const PUT_IMAGE_HEADER: usize = 24;

/// A connection to an X server.
pub struct X11Display {
    conn: RustConnection,
    screen_num: usize,
    name: String,
    have_fixes: bool,
}

impl X11Display {
    /// Connect to `display`, or to `$DISPLAY` when `None`.
    pub fn connect(display: Option<&str>) -> Result<Self, ConnectionFault> {
        let name = display
            .map(|s| s.to_string())
            .or_else(|| std::env::var("DISPLAY").ok())
            .unwrap_or_else(|| ":0".into());

        let (conn, screen_num) = x11rb::connect(Some(&name))
            .map_err(|e| ConnectionFault::Transport(format!("{name}: {e}")))?;

        // XFixes requires a version handshake before any region request.
        let have_fixes = conn
            .extension_information(xfixes::X11_EXTENSION_NAME)
            .map_err(transport)?
            .is_some();

        if have_fixes {
            let version = conn
                .xfixes_query_version(5, 0)
                .map_err(transport)?
                .reply()
                .map_err(reply_fault)?;
            debug!(
                "XFixes extension {}.{}",
                version.major_version, version.minor_version
            );
        } else {
            warn!("XFixes extension not available, presentation will fail");
        }

        debug!("Connected to X display {} (screen {})", name, screen_num);

        Ok(Self {
            conn,
            screen_num,
            name,
            have_fixes,
        })
    }

    /// The underlying x11rb connection.
    pub fn connection(&self) -> &RustConnection {
        &self.conn
    }

    pub fn screen_num(&self) -> usize {
        self.screen_num
    }
}

impl Drop for X11Display {
    fn drop(&mut self) {
        debug!("Closing X display {}", self.name);
    }
}

impl DisplayConnection for X11Display {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn query_extension(&self, name: &'static str) -> Result<Option<ExtensionCodes>, ConnectionFault> {
        let info = self.conn.extension_information(name).map_err(transport)?;
        Ok(info.map(|info| ExtensionCodes {
            major_opcode: info.major_opcode,
            first_event: info.first_event,
            first_error: info.first_error,
        }))
    }

    fn dri2_query_version(&self, major: u32, minor: u32) -> Result<(u32, u32), ConnectionFault> {
        let reply = self
            .conn
            .dri2_query_version(major, minor)
            .map_err(transport)?
            .reply()
            .map_err(reply_fault)?;
        Ok((reply.major_version, reply.minor_version))
    }

    fn dri2_create_drawable(&self, drawable: NativeDrawable) -> Result<(), ConnectionFault> {
        self.conn
            .dri2_create_drawable(drawable.0)
            .map_err(transport)?
            .check()
            .map_err(reply_fault)
    }

    fn dri2_get_buffers(
        &self,
        drawable: NativeDrawable,
        attachments: &[u32],
    ) -> Result<WireBuffers, ConnectionFault> {
        let reply = self
            .conn
            .dri2_get_buffers(drawable.0, attachments.len() as u32, attachments)
            .map_err(transport)?
            .reply()
            .map_err(reply_fault)?;

        Ok(WireBuffers {
            width: reply.width,
            height: reply.height,
            buffers: reply
                .buffers
                .iter()
                .map(|b| WireBuffer {
                    attachment: u32::from(b.attachment),
                    name: b.name,
                    pitch: b.pitch,
                    cpp: b.cpp,
                    flags: b.flags,
                })
                .collect(),
        })
    }

    fn dri2_destroy_drawable(&self, drawable: NativeDrawable) -> Result<(), ConnectionFault> {
        self.conn
            .dri2_destroy_drawable(drawable.0)
            .map_err(transport)?
            .check()
            .map_err(reply_fault)
    }

    fn dri2_copy_region(
        &self,
        drawable: NativeDrawable,
        region: RegionId,
        dest: u32,
        src: u32,
    ) -> Result<(), ConnectionFault> {
        self.conn
            .dri2_copy_region(drawable.0, region.0, dest, src)
            .map_err(transport)?
            .reply()
            .map_err(reply_fault)?;
        Ok(())
    }

    fn get_geometry(&self, drawable: NativeDrawable) -> Result<Geometry, ConnectionFault> {
        let reply = self
            .conn
            .get_geometry(drawable.0)
            .map_err(transport)?
            .reply()
            .map_err(reply_fault)?;

        Ok(Geometry {
            x: reply.x.into(),
            y: reply.y.into(),
            width: reply.width.into(),
            height: reply.height.into(),
            border_width: reply.border_width.into(),
            depth: reply.depth,
        })
    }

    fn visuals(&self) -> Vec<VisualInfo> {
        self.conn
            .setup()
            .roots
            .iter()
            .flat_map(|screen| screen.allowed_depths.iter())
            .flat_map(|depth| {
                depth.visuals.iter().map(move |visual| VisualInfo {
                    visual_id: VisualId(visual.visual_id),
                    depth: depth.depth,
                })
            })
            .collect()
    }

    fn create_region(&self, rect: Rect) -> Result<RegionId, ConnectionFault> {
        if !self.have_fixes {
            return Err(ConnectionFault::MissingExtension(xfixes::X11_EXTENSION_NAME));
        }

        let region = self.conn.generate_id().map_err(id_fault)?;
        self.conn
            .xfixes_create_region(
                region,
                &[Rectangle {
                    x: rect.x,
                    y: rect.y,
                    width: rect.width,
                    height: rect.height,
                }],
            )
            .map_err(transport)?;
        Ok(RegionId(region))
    }

    fn destroy_region(&self, region: RegionId) -> Result<(), ConnectionFault> {
        self.conn
            .xfixes_destroy_region(region.0)
            .map_err(transport)?;
        Ok(())
    }

    fn put_image(&self, target: NativeDrawable, image: &ImageBlit) -> Result<(), ConnectionFault> {
        trace!(
            "PutImage {}x{} depth {} masks {:#x}/{:#x}/{:#x} to {:#x}",
            image.width,
            image.height,
            image.depth,
            image.masks.red,
            image.masks.green,
            image.masks.blue,
            target.0
        );

        if image.data.is_empty() || image.scanline == 0 {
            return Ok(());
        }
        if image.data.len() < usize::from(image.height) * image.scanline {
            return Err(ConnectionFault::Transport(format!(
                "image data holds {} bytes, {} rows of {} needed",
                image.data.len(),
                image.height,
                image.scanline
            )));
        }

        let gc = self.conn.generate_id().map_err(id_fault)?;
        self.conn
            .create_gc(gc, target.0, &CreateGCAux::new())
            .map_err(transport)?;

        let strips = match strip_layout(
            image.height,
            image.scanline,
            self.conn.maximum_request_bytes(),
        ) {
            Ok(strips) => strips,
            Err(fault) => {
                self.conn.free_gc(gc).map_err(transport)?;
                return Err(fault);
            }
        };

        let mut result = Ok(());
        for strip in strips {
            let sent = self.conn.put_image(
                ImageFormat::Z_PIXMAP,
                target.0,
                gc,
                image.width,
                strip.rows,
                0,
                strip.dst_y,
                0,
                image.depth,
                &image.data[strip.bytes],
            );
            if let Err(e) = sent {
                result = Err(transport(e));
                break;
            }
        }

        self.conn.free_gc(gc).map_err(transport)?;
        result
    }

    fn sync(&self) -> Result<(), ConnectionFault> {
        self.conn
            .get_input_focus()
            .map_err(transport)?
            .reply()
            .map_err(reply_fault)?;
        Ok(())
    }
}

/// One PutImage request worth of rows.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Strip {
    dst_y: i16,
    rows: u16,
    bytes: Range<usize>,
}

/// Split `height` rows of `scanline` bytes into strips of whole rows that
/// each fit a request of at most `max_request_bytes`.
fn strip_layout(
    height: u16,
    scanline: usize,
    max_request_bytes: usize,
) -> Result<Vec<Strip>, ConnectionFault> {
    if height == 0 || scanline == 0 {
        return Ok(Vec::new());
    }

    let max_payload = max_request_bytes.saturating_sub(PUT_IMAGE_HEADER);
    let rows_per_strip = (max_payload / scanline).clamp(1, usize::from(height));

    let mut strips = Vec::new();
    let mut row = 0usize;
    while row < usize::from(height) {
        let rows = rows_per_strip.min(usize::from(height) - row);
        let dst_y = i16::try_from(row).map_err(|_| {
            ConnectionFault::Transport(format!("image row {row} beyond the 16-bit coordinate range"))
        })?;
        strips.push(Strip {
            dst_y,
            // rows <= height, which is a u16
            rows: rows as u16,
            bytes: row * scanline..(row + rows) * scanline,
        });
        row += rows;
    }

    Ok(strips)
}

/// Opens [`X11Display`] connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct X11Connector;

impl Connector for X11Connector {
    fn open(&self, display: Option<&str>) -> Result<Box<dyn DisplayConnection>, ConnectionFault> {
        Ok(Box::new(X11Display::connect(display)?))
    }
}

fn transport(e: ConnectionError) -> ConnectionFault {
    ConnectionFault::Transport(e.to_string())
}

fn reply_fault(e: ReplyError) -> ConnectionFault {
    match e {
        ReplyError::ConnectionError(e) => transport(e),
        ReplyError::X11Error(e) => ConnectionFault::Server(ServerError {
            error_code: e.error_code,
            major_opcode: e.major_opcode,
            minor_opcode: e.minor_opcode,
        }),
    }
}

fn id_fault(e: ReplyOrIdError) -> ConnectionFault {
    match e {
        ReplyOrIdError::ConnectionError(e) => transport(e),
        ReplyOrIdError::X11Error(e) => ConnectionFault::Server(ServerError {
            error_code: e.error_code,
            major_opcode: e.major_opcode,
            minor_opcode: e.minor_opcode,
        }),
        ReplyOrIdError::IdsExhausted => ConnectionFault::Transport("XID space exhausted".into()),
    }
}
