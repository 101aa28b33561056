//! Scripted collaborators for unit tests.
//!
//! Each mock records what it was asked to do so tests can check call counts
//! and ordering without a display server or a GPU.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::rc::Rc;

use crate::device::shm::SharedMemory;
use crate::device::{ContextHandle, DeviceId, DeviceMemory, DisplayInfo, MemoryMapping};
use crate::error::{BAD_DRAWABLE, ConnectionFault, DeviceFault, ServerError};
use crate::format::{PixelFormat, aligned_stride};
use crate::protocol::{
    Connector, DisplayConnection, ExtensionCodes, Geometry, ImageBlit, Rect, VisualInfo,
    WireBuffer, WireBuffers,
};
use crate::session::{DisplaySession, SessionOptions, SessionRegistry};
use crate::types::{DrawableConfig, NativeDrawable, PrivateHandle, RegionId, ShmName, VisualId};

pub const TEST_DRI2_OPCODE: u8 = 140;

/// 100x60 depth 24 window.
pub const WINDOW: NativeDrawable = NativeDrawable(0x20_0001);
/// 100x60 depth 24 pixmap.
pub const PIXMAP: NativeDrawable = NativeDrawable(0x20_0002);
/// Readback targets.
pub const TARGET_16: NativeDrawable = NativeDrawable(0x30_0001);
pub const TARGET_32: NativeDrawable = NativeDrawable(0x30_0002);

pub const MOCK_FRAME_BUFFER_HW: u32 = 0xF000_0000;
const MOCK_FRAME_BUFFER_SIZE: usize = 1 << 20;
const MOCK_SEGMENT_SIZE: usize = 1 << 20;

/// Server behaviour and request log shared by every [`MockDisplay`] opened
/// from the same script.
pub struct DisplayScript {
    pub has_dri2: bool,
    pub version: (u32, u32),
    pub visuals: Vec<VisualInfo>,
    pub geometries: HashMap<NativeDrawable, Geometry>,

    /// One-shot GetBuffers replies, used before `sticky_buffers`.
    pub buffer_replies: VecDeque<Result<WireBuffers, ConnectionFault>>,
    pub sticky_buffers: Option<WireBuffers>,
    pub requested_attachments: Vec<Vec<u32>>,
    pub get_buffers_calls: usize,

    pub create_error: Option<ConnectionFault>,
    pub created: Vec<NativeDrawable>,
    pub destroy_error: Option<ConnectionFault>,
    pub destroyed: Vec<NativeDrawable>,

    pub copy_error: Option<ConnectionFault>,
    pub copies: Vec<(NativeDrawable, RegionId, u32, u32)>,
    pub region_error: Option<ConnectionFault>,
    pub regions_created: Vec<Rect>,
    pub regions_destroyed: Vec<RegionId>,
    next_region: u32,

    pub images: Vec<(NativeDrawable, ImageBlit)>,

    pub syncs: usize,
    pub sync_error: Option<ConnectionFault>,

    pub fail_open: bool,
    pub opened: usize,
    pub closed: usize,
}

impl Default for DisplayScript {
    fn default() -> Self {
        let mut script = Self {
            has_dri2: true,
            version: (1, 0),
            visuals: vec![
                VisualInfo { visual_id: VisualId(0x21), depth: 24 },
                VisualInfo { visual_id: VisualId(0x22), depth: 16 },
                VisualInfo { visual_id: VisualId(0x23), depth: 8 },
            ],
            geometries: HashMap::new(),
            buffer_replies: VecDeque::new(),
            sticky_buffers: None,
            requested_attachments: Vec::new(),
            get_buffers_calls: 0,
            create_error: None,
            created: Vec::new(),
            destroy_error: None,
            destroyed: Vec::new(),
            copy_error: None,
            copies: Vec::new(),
            region_error: None,
            regions_created: Vec::new(),
            regions_destroyed: Vec::new(),
            next_region: 0,
            images: Vec::new(),
            syncs: 0,
            sync_error: None,
            fail_open: false,
            opened: 0,
            closed: 0,
        };
        script.set_geometry(WINDOW, 100, 60, 24);
        script.set_geometry(PIXMAP, 100, 60, 24);
        script.set_geometry(TARGET_16, 64, 64, 16);
        script.set_geometry(TARGET_32, 128, 128, 32);
        script
    }
}

fn wire_buffers(width: u32, height: u32, buffers: &[(u32, u32, u32, u32)]) -> WireBuffers {
    WireBuffers {
        width,
        height,
        buffers: buffers
            .iter()
            .map(|&(attachment, name, pitch, cpp)| WireBuffer {
                attachment,
                name,
                pitch,
                cpp,
                flags: 0,
            })
            .collect(),
    }
}

impl DisplayScript {
    pub fn set_geometry(&mut self, drawable: NativeDrawable, width: u32, height: u32, depth: u8) {
        self.geometries.insert(
            drawable,
            Geometry {
                x: 0,
                y: 0,
                width,
                height,
                border_width: 0,
                depth,
            },
        );
    }

    /// Queue one GetBuffers reply of `(attachment, name, pitch, cpp)`.
    pub fn push_buffers(&mut self, width: u32, height: u32, buffers: &[(u32, u32, u32, u32)]) {
        self.buffer_replies
            .push_back(Ok(wire_buffers(width, height, buffers)));
    }

    /// Reply used whenever the queue is empty.
    pub fn set_buffers(&mut self, width: u32, height: u32, buffers: &[(u32, u32, u32, u32)]) {
        self.sticky_buffers = Some(wire_buffers(width, height, buffers));
    }

    /// Back and front 32-bit buffers, both named `name`.
    pub fn set_window_buffers(&mut self, width: u32, height: u32, name: u32) {
        let pitch = aligned_stride(width) * 4;
        self.set_buffers(width, height, &[(1, name, pitch, 4), (0, name, pitch, 4)]);
    }

    /// A single 32-bit front buffer named `name`.
    pub fn set_pixmap_buffers(&mut self, width: u32, height: u32, name: u32) {
        let pitch = aligned_stride(width) * 4;
        self.set_buffers(width, height, &[(0, name, pitch, 4)]);
    }
}

pub struct MockDisplay {
    name: String,
    script: Rc<RefCell<DisplayScript>>,
}

impl MockDisplay {
    pub fn new(name: &str) -> Self {
        Self::with_script(name, Rc::new(RefCell::new(DisplayScript::default())))
    }

    pub fn with_script(name: &str, script: Rc<RefCell<DisplayScript>>) -> Self {
        Self {
            name: name.to_string(),
            script,
        }
    }

    pub fn script(&self) -> &Rc<RefCell<DisplayScript>> {
        &self.script
    }
}

impl Drop for MockDisplay {
    fn drop(&mut self) {
        self.script.borrow_mut().closed += 1;
    }
}

impl DisplayConnection for MockDisplay {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn query_extension(&self, name: &'static str) -> Result<Option<ExtensionCodes>, ConnectionFault> {
        let script = self.script.borrow();
        Ok((name == "DRI2" && script.has_dri2).then_some(ExtensionCodes {
            major_opcode: TEST_DRI2_OPCODE,
            first_event: 90,
            first_error: 150,
        }))
    }

    fn dri2_query_version(&self, _major: u32, _minor: u32) -> Result<(u32, u32), ConnectionFault> {
        Ok(self.script.borrow().version)
    }

    fn dri2_create_drawable(&self, drawable: NativeDrawable) -> Result<(), ConnectionFault> {
        let mut script = self.script.borrow_mut();
        if let Some(fault) = script.create_error.take() {
            return Err(fault);
        }
        script.created.push(drawable);
        Ok(())
    }

    fn dri2_get_buffers(
        &self,
        _drawable: NativeDrawable,
        attachments: &[u32],
    ) -> Result<WireBuffers, ConnectionFault> {
        let mut script = self.script.borrow_mut();
        script.get_buffers_calls += 1;
        script.requested_attachments.push(attachments.to_vec());

        match script.buffer_replies.pop_front() {
            Some(reply) => reply,
            None => script
                .sticky_buffers
                .clone()
                .ok_or_else(|| ConnectionFault::Transport("no buffers scripted".into())),
        }
    }

    fn dri2_destroy_drawable(&self, drawable: NativeDrawable) -> Result<(), ConnectionFault> {
        let mut script = self.script.borrow_mut();
        script.destroyed.push(drawable);
        match script.destroy_error.take() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    fn dri2_copy_region(
        &self,
        drawable: NativeDrawable,
        region: RegionId,
        dest: u32,
        src: u32,
    ) -> Result<(), ConnectionFault> {
        let mut script = self.script.borrow_mut();
        script.copies.push((drawable, region, dest, src));
        match script.copy_error.take() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    fn get_geometry(&self, drawable: NativeDrawable) -> Result<Geometry, ConnectionFault> {
        self.script
            .borrow()
            .geometries
            .get(&drawable)
            .copied()
            .ok_or(ConnectionFault::Server(ServerError {
                error_code: BAD_DRAWABLE,
                major_opcode: 14,
                minor_opcode: 0,
            }))
    }

    fn visuals(&self) -> Vec<VisualInfo> {
        self.script.borrow().visuals.clone()
    }

    fn create_region(&self, rect: Rect) -> Result<RegionId, ConnectionFault> {
        let mut script = self.script.borrow_mut();
        if let Some(fault) = script.region_error.take() {
            return Err(fault);
        }
        script.next_region += 1;
        script.regions_created.push(rect);
        Ok(RegionId(script.next_region))
    }

    fn destroy_region(&self, region: RegionId) -> Result<(), ConnectionFault> {
        self.script.borrow_mut().regions_destroyed.push(region);
        Ok(())
    }

    fn put_image(&self, target: NativeDrawable, image: &ImageBlit) -> Result<(), ConnectionFault> {
        self.script.borrow_mut().images.push((target, image.clone()));
        Ok(())
    }

    fn sync(&self) -> Result<(), ConnectionFault> {
        let mut script = self.script.borrow_mut();
        script.syncs += 1;
        match script.sync_error.take() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }
}

/// Opens [`MockDisplay`]s sharing one script.
pub struct MockConnector {
    script: Rc<RefCell<DisplayScript>>,
}

impl MockConnector {
    pub fn new(script: Rc<RefCell<DisplayScript>>) -> Self {
        Self { script }
    }
}

impl Connector for MockConnector {
    fn open(&self, display: Option<&str>) -> Result<Box<dyn DisplayConnection>, ConnectionFault> {
        let mut script = self.script.borrow_mut();
        if script.fail_open {
            return Err(ConnectionFault::Transport("connection refused".into()));
        }
        script.opened += 1;
        drop(script);

        Ok(Box::new(MockDisplay::with_script(
            display.unwrap_or(":0"),
            Rc::clone(&self.script),
        )))
    }
}

#[derive(Debug)]
pub struct DeviceLog {
    pub devices: u32,
    pub fail_context: bool,
    pub fail_display_info: bool,
    pub fail_wrap: bool,
    pub fail_frame_buffer: bool,
    pub contexts_created: usize,
    pub contexts_destroyed: usize,
    /// `(size, contiguous)` of every successful wrap.
    pub wraps: Vec<(usize, bool)>,
    /// Device addresses passed to `free`.
    pub frees: Vec<u32>,
    pub frame_buffer_calls: usize,
}

impl Default for DeviceLog {
    fn default() -> Self {
        Self {
            devices: 1,
            fail_context: false,
            fail_display_info: false,
            fail_wrap: false,
            fail_frame_buffer: false,
            contexts_created: 0,
            contexts_destroyed: 0,
            wraps: Vec::new(),
            frees: Vec::new(),
            frame_buffer_calls: 0,
        }
    }
}

impl DeviceLog {
    /// Wrapped mappings not yet freed.
    pub fn live_mappings(&self) -> usize {
        self.wraps.len() - self.frees.len()
    }
}

pub struct MockDevice {
    pub log: RefCell<DeviceLog>,
    frame_buffer: RefCell<Box<[u8]>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            log: RefCell::new(DeviceLog::default()),
            frame_buffer: RefCell::new(vec![0u8; MOCK_FRAME_BUFFER_SIZE].into_boxed_slice()),
        }
    }
}

impl MockDevice {
    pub fn frame_buffer_address(&self) -> NonNull<u8> {
        NonNull::new(self.frame_buffer.borrow_mut().as_mut_ptr()).unwrap()
    }
}

impl DeviceMemory for MockDevice {
    fn enumerate_devices(&self) -> Result<Vec<DeviceId>, DeviceFault> {
        Ok((0..self.log.borrow().devices).map(DeviceId).collect())
    }

    fn create_context(&self, _device: DeviceId) -> Result<ContextHandle, DeviceFault> {
        let mut log = self.log.borrow_mut();
        if log.fail_context {
            return Err(DeviceFault::Context("scripted failure".into()));
        }
        log.contexts_created += 1;
        Ok(ContextHandle(log.contexts_created as u64))
    }

    fn destroy_context(&self, _context: ContextHandle) {
        self.log.borrow_mut().contexts_destroyed += 1;
    }

    fn display_info(&self, _context: ContextHandle) -> Result<DisplayInfo, DeviceFault> {
        if self.log.borrow().fail_display_info {
            return Err(DeviceFault::Context("scripted failure".into()));
        }
        Ok(DisplayInfo {
            width: 1024,
            height: 768,
            stride: 4096,
            max_flip_chains: 0,
        })
    }

    fn wrap(
        &self,
        _context: ContextHandle,
        base: NonNull<u8>,
        contiguous: bool,
        size: usize,
    ) -> Result<MemoryMapping, DeviceFault> {
        let mut log = self.log.borrow_mut();
        if log.fail_wrap {
            return Err(DeviceFault::Memory("scripted failure".into()));
        }
        log.wraps.push((size, contiguous));
        let index = log.wraps.len() as u32;

        Ok(MemoryMapping {
            linear_address: base,
            hw_address: 0x8000_0000 + index * 0x10_0000,
            private: PrivateHandle(u64::from(index)),
            size,
        })
    }

    fn free(&self, _context: ContextHandle, mapping: MemoryMapping) {
        self.log.borrow_mut().frees.push(mapping.hw_address);
    }

    fn frame_buffer(&self, _context: ContextHandle, _index: u32) -> Result<MemoryMapping, DeviceFault> {
        let mut log = self.log.borrow_mut();
        log.frame_buffer_calls += 1;
        if log.fail_frame_buffer {
            return Err(DeviceFault::Memory("scripted failure".into()));
        }

        Ok(MemoryMapping {
            linear_address: self.frame_buffer_address(),
            hw_address: MOCK_FRAME_BUFFER_HW,
            private: PrivateHandle(0),
            size: MOCK_FRAME_BUFFER_SIZE,
        })
    }
}

#[derive(Debug, Default)]
pub struct ShmLog {
    pub fail_attach: bool,
    pub attaches: Vec<ShmName>,
    pub detaches: Vec<NonNull<u8>>,
}

/// Segments are created on first attach and live as long as the mock.
#[derive(Default)]
pub struct MockShm {
    pub log: RefCell<ShmLog>,
    segments: RefCell<HashMap<u32, Box<[u8]>>>,
}

impl MockShm {
    /// Attached segments not yet detached.
    pub fn live(&self) -> usize {
        let log = self.log.borrow();
        log.attaches.len() - log.detaches.len()
    }

    pub fn fill(&self, name: u32, byte: u8) {
        if let Some(segment) = self.segments.borrow_mut().get_mut(&name) {
            segment.fill(byte);
        }
    }
}

impl SharedMemory for MockShm {
    fn attach(&self, name: ShmName) -> std::io::Result<NonNull<u8>> {
        let mut log = self.log.borrow_mut();
        if log.fail_attach {
            return Err(std::io::Error::from_raw_os_error(libc::EINVAL));
        }
        log.attaches.push(name);

        let mut segments = self.segments.borrow_mut();
        let segment = segments
            .entry(name.0)
            .or_insert_with(|| vec![0u8; MOCK_SEGMENT_SIZE].into_boxed_slice());
        Ok(NonNull::new(segment.as_mut_ptr()).unwrap())
    }

    fn detach(&self, addr: NonNull<u8>) {
        self.log.borrow_mut().detaches.push(addr);
    }
}

/// A registry wired to scripted collaborators.
pub struct Fixture {
    pub script: Rc<RefCell<DisplayScript>>,
    pub device: Rc<MockDevice>,
    pub shm: Rc<MockShm>,
    pub registry: SessionRegistry,
}

impl Fixture {
    pub fn new() -> Self {
        let script = Rc::new(RefCell::new(DisplayScript::default()));
        let device = Rc::new(MockDevice::default());
        let shm = Rc::new(MockShm::default());

        let registry = SessionRegistry::new(
            Box::new(MockConnector::new(Rc::clone(&script))),
            Rc::clone(&device) as Rc<dyn DeviceMemory>,
            Rc::clone(&shm) as Rc<dyn SharedMemory>,
            SessionOptions {
                display: None,
                use_hw_sync: true,
            },
        );

        Self {
            script,
            device,
            shm,
            registry,
        }
    }

    pub fn config(&self, session: &DisplaySession, format: PixelFormat) -> DrawableConfig {
        *session
            .configs()
            .iter()
            .find(|c| c.pixel_format == format)
            .unwrap()
    }

    pub fn config_8888(&self, session: &DisplaySession) -> DrawableConfig {
        self.config(session, PixelFormat::Argb8888)
    }

    pub fn config_565(&self, session: &DisplaySession) -> DrawableConfig {
        self.config(session, PixelFormat::Rgb565)
    }
}
