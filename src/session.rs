//! Display Session
//!
//! One display connection, one device context and the enumerated configs,
//! shared by every drawable of the process. Sessions are handed out by a
//! [`SessionRegistry`] owned by the host; a [`SessionHandle`] is the
//! reference: cloning or re-acquiring adds one, dropping removes one, and the
//! last drop tears the session down.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::device::shm::SharedMemory;
use crate::device::{ContextHandle, DeviceMemory, DisplayInfo};
use crate::drawable::Drawable;
use crate::error::{Result, WseglError};
use crate::format::PixelFormat;
use crate::protocol::{
    BufferExchange, Connector, DisplayConnection, ExtensionCodes, ProtocolVersion, VisualInfo,
};
use crate::types::{DrawableConfig, DrawableKind, DrawableKinds, NativeDrawable};

/// The only native engine [`DisplaySession::wait_native`] accepts.
pub const DEFAULT_NATIVE_ENGINE: u32 = 0;

/// Shared reference to the live session.
pub type SessionHandle = Rc<DisplaySession>;

/// Options used when a registry opens a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Display opened when the caller supplies no connection.
    pub display: Option<String>,
    pub use_hw_sync: bool,
}

impl From<&SessionConfig> for SessionOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            display: config.display.clone(),
            use_hw_sync: config.use_hw_sync,
        }
    }
}

/// Capabilities advertised to the host renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub windows_use_hw_sync: bool,
}

/// Hands out the process-wide [`DisplaySession`].
pub struct SessionRegistry {
    connector: Box<dyn Connector>,
    device: Rc<dyn DeviceMemory>,
    shm: Rc<dyn SharedMemory>,
    options: SessionOptions,
    live: RefCell<Weak<DisplaySession>>,
}

impl SessionRegistry {
    pub fn new(
        connector: Box<dyn Connector>,
        device: Rc<dyn DeviceMemory>,
        shm: Rc<dyn SharedMemory>,
        options: SessionOptions,
    ) -> Self {
        Self {
            connector,
            device,
            shm,
            options,
            live: RefCell::new(Weak::new()),
        }
    }

    /// Take a reference to the session, opening it on first use.
    ///
    /// With `connection == None` the configured display is opened and owned
    /// by the session. A connection passed while a session is already live is
    /// ignored; the live session keeps the one it was opened with.
    ///
    /// The session holds one reference to a caller connection and never
    /// closes it itself. The caller must keep its own clone alive for as long
    /// as it owns the connection: if the session holds the last reference, the
    /// connection closes when the session does.
    pub fn acquire(&self, connection: Option<Rc<dyn DisplayConnection>>) -> Result<SessionHandle> {
        if let Some(session) = self.live.borrow().upgrade() {
            debug!(
                "Reusing display session (references: {})",
                Rc::strong_count(&session)
            );
            return Ok(session);
        }

        let session = Rc::new(self.open(connection)?);
        *self.live.borrow_mut() = Rc::downgrade(&session);
        Ok(session)
    }

    /// Give back a reference. The last one closes the session.
    pub fn release(&self, handle: SessionHandle) {
        drop(handle);
        debug!("Display session released (references: {})", self.ref_count());
    }

    /// Number of live references to the session, 0 when closed.
    pub fn ref_count(&self) -> usize {
        self.live.borrow().strong_count()
    }

    /// Check that `connection` (or the configured display, opened for the
    /// check) is a local X display.
    pub fn is_display_valid(&self, connection: Option<&dyn DisplayConnection>) -> Result<()> {
        let valid = match connection {
            Some(conn) => is_local_display(conn.display_name()),
            None => {
                let conn = self
                    .connector
                    .open(self.options.display.as_deref())
                    .map_err(|_| WseglError::BadNativeDisplay)?;
                is_local_display(conn.display_name())
            }
        };

        if valid {
            Ok(())
        } else {
            Err(WseglError::BadNativeDisplay)
        }
    }

    fn open(&self, connection: Option<Rc<dyn DisplayConnection>>) -> Result<DisplaySession> {
        let (connection, owns_connection) = match connection {
            Some(conn) => (conn, false),
            None => {
                let conn = self
                    .connector
                    .open(self.options.display.as_deref())
                    .map_err(|e| WseglError::Initialization(format!("cannot open display: {e}")))?;
                (Rc::from(conn), true)
            }
        };
        // Any early return below drops `connection`, closing it if we opened it.

        let device = Rc::clone(&self.device);
        let devices = device
            .enumerate_devices()
            .map_err(|e| WseglError::Initialization(e.to_string()))?;
        let device_id = *devices
            .first()
            .ok_or_else(|| WseglError::Initialization("no compatible device found".into()))?;

        let context = device
            .create_context(device_id)
            .map_err(|e| WseglError::Initialization(e.to_string()))?;

        let (display_info, codes, version) = match negotiate_display(&*connection, &*device, context) {
            Ok(negotiated) => negotiated,
            Err(e) => {
                device.destroy_context(context);
                return Err(e);
            }
        };

        let visuals = connection.visuals();
        if visuals.is_empty() {
            device.destroy_context(context);
            return Err(WseglError::BadNativeDisplay);
        }
        let configs = enumerate_configs(&visuals);

        info!(
            "Display session opened on {} (DRI2 {}.{}, {} configs, own connection: {})",
            connection.display_name(),
            version.major,
            version.minor,
            configs.len(),
            owns_connection
        );

        Ok(DisplaySession {
            connection,
            owns_connection,
            device,
            shm: Rc::clone(&self.shm),
            context,
            display_info,
            codes,
            version,
            configs,
            capabilities: Capabilities {
                windows_use_hw_sync: self.options.use_hw_sync,
            },
        })
    }
}

fn negotiate_display(
    connection: &dyn DisplayConnection,
    device: &dyn DeviceMemory,
    context: ContextHandle,
) -> Result<(DisplayInfo, ExtensionCodes, ProtocolVersion)> {
    let display_info = device
        .display_info(context)
        .map_err(|e| WseglError::Initialization(e.to_string()))?;

    let protocol = BufferExchange::bind(connection)
        .map_err(|e| WseglError::Initialization(e.to_string()))?;
    let version = protocol
        .query_version()
        .map_err(|e| WseglError::Initialization(e.to_string()))?;

    if !version.is_supported() {
        return Err(WseglError::Initialization(format!(
            "unsupported DRI2 version {}.{}",
            version.major, version.minor
        )));
    }

    Ok((display_info, protocol.codes(), version))
}

/// Turn server visuals into drawable configs. Depth 16 becomes 565, 24 and
/// 32 become 8888; other depths are skipped.
pub fn enumerate_configs(visuals: &[VisualInfo]) -> Vec<DrawableConfig> {
    visuals
        .iter()
        .filter_map(|visual| {
            PixelFormat::from_depth(visual.depth).map(|pixel_format| DrawableConfig {
                pixel_format,
                kinds: DrawableKinds::WINDOW | DrawableKinds::PIXMAP,
                native_visual_id: visual.visual_id,
                native_renderable: true,
            })
        })
        .collect()
}

fn is_local_display(name: &str) -> bool {
    name.starts_with(':')
}

/// The live session.
pub struct DisplaySession {
    connection: Rc<dyn DisplayConnection>,
    owns_connection: bool,
    device: Rc<dyn DeviceMemory>,
    shm: Rc<dyn SharedMemory>,
    context: ContextHandle,
    display_info: DisplayInfo,
    codes: ExtensionCodes,
    version: ProtocolVersion,
    configs: Vec<DrawableConfig>,
    capabilities: Capabilities,
}

impl DisplaySession {
    pub fn connection(&self) -> &dyn DisplayConnection {
        &*self.connection
    }

    pub fn owns_connection(&self) -> bool {
        self.owns_connection
    }

    pub fn device(&self) -> &dyn DeviceMemory {
        &*self.device
    }

    pub fn shared_memory(&self) -> &dyn SharedMemory {
        &*self.shm
    }

    pub fn context(&self) -> ContextHandle {
        self.context
    }

    pub fn display_info(&self) -> DisplayInfo {
        self.display_info
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn configs(&self) -> &[DrawableConfig] {
        &self.configs
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// DRI2 requests over this session's connection.
    pub fn protocol(&self) -> BufferExchange<'_> {
        BufferExchange::new(&*self.connection, self.codes)
    }

    pub fn create_window_drawable(
        &self,
        window: NativeDrawable,
        config: &DrawableConfig,
    ) -> Result<Drawable<'_>> {
        Drawable::create(self, window, config, DrawableKind::Window)
    }

    pub fn create_pixmap_drawable(
        &self,
        pixmap: NativeDrawable,
        config: &DrawableConfig,
    ) -> Result<Drawable<'_>> {
        Drawable::create(self, pixmap, config, DrawableKind::Pixmap)
    }

    /// Block until the server has processed every request sent so far.
    pub fn wait_idle(&self) -> Result<()> {
        self.connection.sync()?;
        Ok(())
    }

    /// Wait for native rendering on `engine` to finish.
    pub fn wait_native(&self, engine: u32) -> Result<()> {
        if engine != DEFAULT_NATIVE_ENGINE {
            return Err(WseglError::BadNativeEngine(engine));
        }
        self.wait_idle()
    }
}

impl Drop for DisplaySession {
    fn drop(&mut self) {
        self.device.destroy_context(self.context);

        if self.owns_connection {
            if Rc::strong_count(&self.connection) > 1 {
                warn!("Self-owned display connection is still referenced elsewhere");
            }
            info!(
                "Display session closed, closing {}",
                self.connection.display_name()
            );
        } else {
            info!("Display session closed, connection left to its owner");
        }
    }
}
