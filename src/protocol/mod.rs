//! Buffer Exchange Protocol
//!
//! The DRI2 requests used to negotiate drawable buffers, expressed over an
//! abstract [`DisplayConnection`]. Wire encoding is left to the connection;
//! this layer binds the extension, types the replies and decides which
//! server errors are tolerated.

pub mod x11;

use tracing::{debug, warn};

use crate::error::{BAD_DRAWABLE, ConnectionFault, Result, ServerError};
use crate::format::RgbMasks;
use crate::types::{Attachment, BufferName, NativeDrawable, RegionId, VisualId};

/// Extension name as advertised by the server.
pub const DRI2_EXTENSION_NAME: &str = "DRI2";

/// Protocol version this client speaks.
pub const DRI2_MAJOR: u32 = 1;
pub const DRI2_MINOR: u32 = 0;

/// DRI2 minor opcode of DestroyDrawable.
pub const DRI2_DESTROY_DRAWABLE: u16 = 4;

/// Opcode/event/error bases of a bound extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionCodes {
    pub major_opcode: u8,
    pub first_event: u8,
    pub first_error: u8,
}

/// Result of a geometry query on a native drawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub border_width: u32,
    pub depth: u8,
}

/// A visual advertised by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisualInfo {
    pub visual_id: VisualId,
    pub depth: u8,
}

/// Rectangle in drawable coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

/// One buffer as it appears in a GetBuffers reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireBuffer {
    pub attachment: u32,
    pub name: u32,
    pub pitch: u32,
    pub cpp: u32,
    pub flags: u32,
}

/// Raw GetBuffers reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireBuffers {
    pub width: u32,
    pub height: u32,
    pub buffers: Vec<WireBuffer>,
}

/// A Z-format image ready to be sent with PutImage. Rows in `data` are
/// `scanline` bytes long, padded to 32 bits.
#[derive(Debug, Clone)]
pub struct ImageBlit {
    pub width: u16,
    pub height: u16,
    pub depth: u8,
    pub bits_per_pixel: u8,
    pub scanline: usize,
    pub masks: RgbMasks,
    pub data: Vec<u8>,
}

/// The display-server connection this crate drives.
///
/// Every call is a blocking round trip (or a request followed by a checked
/// sync where the request has no reply).
pub trait DisplayConnection {
    /// Display string the connection was opened with (e.g. `:0`).
    fn display_name(&self) -> &str;

    fn query_extension(&self, name: &'static str) -> Result<Option<ExtensionCodes>, ConnectionFault>;

    fn dri2_query_version(&self, major: u32, minor: u32) -> Result<(u32, u32), ConnectionFault>;

    fn dri2_create_drawable(&self, drawable: NativeDrawable) -> Result<(), ConnectionFault>;

    fn dri2_get_buffers(
        &self,
        drawable: NativeDrawable,
        attachments: &[u32],
    ) -> Result<WireBuffers, ConnectionFault>;

    fn dri2_destroy_drawable(&self, drawable: NativeDrawable) -> Result<(), ConnectionFault>;

    fn dri2_copy_region(
        &self,
        drawable: NativeDrawable,
        region: RegionId,
        dest: u32,
        src: u32,
    ) -> Result<(), ConnectionFault>;

    fn get_geometry(&self, drawable: NativeDrawable) -> Result<Geometry, ConnectionFault>;

    /// All visuals of all screens.
    fn visuals(&self) -> Vec<VisualInfo>;

    fn create_region(&self, rect: Rect) -> Result<RegionId, ConnectionFault>;

    fn destroy_region(&self, region: RegionId) -> Result<(), ConnectionFault>;

    fn put_image(&self, target: NativeDrawable, image: &ImageBlit) -> Result<(), ConnectionFault>;

    /// Round trip that flushes every pending request.
    fn sync(&self) -> Result<(), ConnectionFault>;
}

/// Opens display connections on behalf of a session registry.
pub trait Connector {
    fn open(&self, display: Option<&str>) -> Result<Box<dyn DisplayConnection>, ConnectionFault>;
}

/// Negotiated protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
}

impl ProtocolVersion {
    pub fn is_supported(self) -> bool {
        self.major == DRI2_MAJOR && self.minor >= DRI2_MINOR
    }
}

/// A buffer descriptor taken from a GetBuffers reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub attachment: u32,
    pub name: BufferName,
    /// Row pitch in bytes.
    pub pitch: u32,
    /// Bytes per pixel.
    pub cpp: u32,
    pub flags: u32,
}

impl From<WireBuffer> for BufferDescriptor {
    fn from(buffer: WireBuffer) -> Self {
        Self {
            attachment: buffer.attachment,
            name: BufferName::from_wire(buffer.name),
            pitch: buffer.pitch,
            cpp: buffer.cpp,
            flags: buffer.flags,
        }
    }
}

/// Current buffer state of a drawable as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSet {
    pub width: u32,
    pub height: u32,
    pub buffers: Vec<BufferDescriptor>,
}

/// DRI2 bound to one connection.
pub struct BufferExchange<'c> {
    conn: &'c dyn DisplayConnection,
    codes: ExtensionCodes,
}

impl<'c> BufferExchange<'c> {
    /// Bind to a connection whose extension codes are already known.
    pub fn new(conn: &'c dyn DisplayConnection, codes: ExtensionCodes) -> Self {
        Self { conn, codes }
    }

    /// Discover the extension on `conn`.
    pub fn bind(conn: &'c dyn DisplayConnection) -> Result<Self> {
        let codes = conn
            .query_extension(DRI2_EXTENSION_NAME)?
            .ok_or(ConnectionFault::MissingExtension(DRI2_EXTENSION_NAME))?;

        debug!(
            "DRI2 extension: opcode {}, first event {}, first error {}",
            codes.major_opcode, codes.first_event, codes.first_error
        );

        Ok(Self { conn, codes })
    }

    pub fn codes(&self) -> ExtensionCodes {
        self.codes
    }

    pub fn query_version(&self) -> Result<ProtocolVersion> {
        let (major, minor) = self.conn.dri2_query_version(DRI2_MAJOR, DRI2_MINOR)?;
        Ok(ProtocolVersion { major, minor })
    }

    pub fn create_drawable(&self, drawable: NativeDrawable) -> Result<()> {
        self.conn.dri2_create_drawable(drawable)?;
        Ok(())
    }

    pub fn get_buffers(&self, drawable: NativeDrawable, attachments: &[Attachment]) -> Result<BufferSet> {
        let wire: Vec<u32> = attachments.iter().map(|a| a.wire()).collect();
        let reply = self.conn.dri2_get_buffers(drawable, &wire)?;

        Ok(BufferSet {
            width: reply.width,
            height: reply.height,
            buffers: reply.buffers.into_iter().map(BufferDescriptor::from).collect(),
        })
    }

    /// Release server-side tracking. A BadDrawable raised by this very
    /// request means the server already destroyed the drawable and is not
    /// reported.
    pub fn destroy_drawable(&self, drawable: NativeDrawable) -> Result<()> {
        match self.conn.dri2_destroy_drawable(drawable) {
            Ok(()) => Ok(()),
            Err(ConnectionFault::Server(err)) if self.is_destroy_race(&err) => {
                warn!(
                    "Drawable {:#x} already gone on the server, ignoring BadDrawable",
                    drawable.0
                );
                Ok(())
            }
            Err(fault) => Err(fault.into()),
        }
    }

    pub fn copy_region(
        &self,
        drawable: NativeDrawable,
        region: RegionId,
        dest: Attachment,
        src: Attachment,
    ) -> Result<()> {
        self.conn
            .dri2_copy_region(drawable, region, dest.wire(), src.wire())?;
        Ok(())
    }

    fn is_destroy_race(&self, err: &ServerError) -> bool {
        err.major_opcode == self.codes.major_opcode
            && err.minor_opcode == DRI2_DESTROY_DRAWABLE
            && err.error_code == BAD_DRAWABLE
    }
}
