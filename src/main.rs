//! wsegl-probe
//!
//! Opens a window on the local X server and drives it through the DRI2
//! buffer cycle with the software device: negotiate, present, repeat.

use std::rc::Rc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use x11rb::COPY_DEPTH_FROM_PARENT;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt, CreateWindowAux, EventMask, WindowClass};

use wsegl_dri2::device::shm::SysvSharedMemory;
use wsegl_dri2::device::software::SoftwareDevice;
use wsegl_dri2::protocol::DisplayConnection;
use wsegl_dri2::protocol::x11::{X11Connector, X11Display};
use wsegl_dri2::{
    Config, DrawableConfig, NativeDrawable, PixelFormat, SessionOptions, SessionRegistry,
    WseglError,
};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "wsegl_dri2=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting wsegl-probe");

    let config = Config::load().context("Failed to load configuration")?;

    let display = Rc::new(
        X11Display::connect(config.session.display.as_deref())
            .context("Failed to connect to X server")?,
    );

    let (window, depth) = create_window(&display, config.probe.width, config.probe.height)?;
    info!(
        "Created {}x{} window {:#x} (depth {})",
        config.probe.width, config.probe.height, window, depth
    );

    let registry = SessionRegistry::new(
        Box::new(X11Connector),
        Rc::new(SoftwareDevice::new(&config.software_device)),
        Rc::new(SysvSharedMemory),
        SessionOptions::from(&config.session),
    );

    registry
        .is_display_valid(Some(&*display))
        .with_context(|| format!("{} is not a local display", display.display_name()))?;

    let shared: Rc<dyn DisplayConnection> = display.clone();
    let session = registry.acquire(Some(shared)).context("Failed to open display session")?;
    info!(
        "Session ready: DRI2 {}.{}, {} configs, hw sync {}",
        session.version().major,
        session.version().minor,
        session.configs().len(),
        session.capabilities().windows_use_hw_sync
    );

    let drawable_config = config_for_depth(session.configs(), depth)?;

    let native = NativeDrawable(window);
    let mut drawable = session.create_window_drawable(native, &drawable_config)?;

    let mut presented = 0u32;
    for frame in 0..config.probe.frames {
        match drawable.negotiate() {
            Ok(params) => {
                debug!(
                    "Frame {}: {}x{} stride {} at {:#x}",
                    frame, params.width, params.height, params.stride, params.hw_address
                );
            }
            Err(WseglError::BadDrawable(reason)) => {
                warn!("Frame {}: drawable is stale ({}), recreating", frame, reason);
                if let Err(e) = drawable.destroy() {
                    warn!("Failed to destroy stale drawable: {}", e);
                }
                drawable = session.create_window_drawable(native, &drawable_config)?;
                continue;
            }
            Err(e) => {
                warn!("Frame {}: negotiation failed, skipping: {}", frame, e);
                continue;
            }
        }

        if let Err(e) = drawable.present() {
            warn!("Frame {}: present failed: {}", frame, e);
            continue;
        }
        presented += 1;
    }

    session.wait_idle()?;
    info!("Presented {} of {} frames", presented, config.probe.frames);

    drawable.destroy()?;
    registry.release(session);

    display.connection().destroy_window(window)?;
    display.connection().flush()?;

    info!("wsegl-probe finished");
    Ok(())
}

/// The window config whose pixel format matches `depth`.
fn config_for_depth(configs: &[DrawableConfig], depth: u8) -> Result<DrawableConfig> {
    let format = PixelFormat::from_depth(depth)
        .with_context(|| format!("No pixel format for depth {depth}"))?;
    configs
        .iter()
        .find(|c| c.pixel_format == format)
        .copied()
        .with_context(|| format!("No config for {format:?}"))
}

/// Create and map a plain window on the default screen.
fn create_window(display: &X11Display, width: u16, height: u16) -> Result<(u32, u8)> {
    let conn = display.connection();
    let screen = conn
        .setup()
        .roots
        .get(display.screen_num())
        .context("Default screen not found")?;

    let window = conn.generate_id()?;
    conn.create_window(
        COPY_DEPTH_FROM_PARENT,
        window,
        screen.root,
        0,
        0,
        width,
        height,
        0,
        WindowClass::INPUT_OUTPUT,
        screen.root_visual,
        &CreateWindowAux::new()
            .background_pixel(screen.black_pixel)
            .event_mask(EventMask::STRUCTURE_NOTIFY),
    )?;
    conn.map_window(window)?;
    conn.flush()?;

    Ok((window, screen.root_depth))
}
