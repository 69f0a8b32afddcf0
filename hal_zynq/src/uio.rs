//! Linux UIO platform.
//!
//! On the SoC the FPGA is exported to userspace through the kernel's
//! userspace I/O driver. The device node gives us both facilities:
//!
//! - `mmap` of map N (offset `N * page_size`) exposes a register window
//! - `read` blocks until the line fires and returns the 32-bit event count;
//!   writing `1u32` unmasks the line again, writing `0u32` masks it
//!
//! The interrupt domain is a dedicated thread that waits on the device and
//! runs the trampoline.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use hal::{HalConfig, IrqLine, MemoryWindow, SetupError};
use tracing::{debug, error, warn};

use crate::gic::{InterruptController, IrqFrame, IrqTrampoline};
use crate::mmio::{Mmio, VolatileMmio};
use crate::platform::Platform;

/// How long the interrupt thread waits before re-checking for shutdown
const POLL_TIMEOUT_MS: libc::c_int = 100;

/// Platform backed by a UIO device node
#[derive(Debug)]
pub struct UioPlatform {
    config: HalConfig,
    device: Option<Arc<File>>,
}

impl UioPlatform {
    /// Creates a platform for the device named in `config`
    ///
    /// The device is opened lazily by `setup()`.
    pub fn new(config: HalConfig) -> Result<Self, SetupError> {
        config
            .validate()
            .map_err(|err| SetupError::InvalidConfig(err.to_string()))?;
        Ok(Self {
            config,
            device: None,
        })
    }

    /// The configuration this platform was built from
    pub fn config(&self) -> &HalConfig {
        &self.config
    }

    /// Maps the I/O controller register window named by `io_map`
    pub fn map_io_registers(&mut self) -> Result<UioMapping, SetupError> {
        let map = self.config.io_map.ok_or_else(|| {
            SetupError::InvalidConfig("no io_map configured".to_string())
        })?;
        let len = map_size(&self.config.device, map)?;
        let device = self.device()?;
        UioMapping::map(&device, map, len)
    }

    fn device(&mut self) -> Result<Arc<File>, SetupError> {
        if let Some(device) = &self.device {
            return Ok(device.clone());
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.config.device)
            .map_err(|err| {
                SetupError::WindowUnavailable(format!(
                    "{}: {}",
                    self.config.device.display(),
                    err
                ))
            })?;
        let device = Arc::new(file);
        self.device = Some(device.clone());
        Ok(device)
    }
}

impl Platform for UioPlatform {
    type Window = UioMapping;
    type Controller = UioInterrupts;

    fn map_window(&mut self, window: MemoryWindow) -> Result<UioMapping, SetupError> {
        let map = self.config.memory_map;
        let available = map_size(&self.config.device, map)?;
        if available < window.byte_len() {
            return Err(SetupError::WindowUnavailable(format!(
                "map{} holds {:#x} bytes, window needs {:#x}",
                map,
                available,
                window.byte_len()
            )));
        }
        let device = self.device()?;
        UioMapping::map(&device, map, window.byte_len())
    }

    fn interrupt_controller(&mut self) -> Result<UioInterrupts, SetupError> {
        let device = self
            .device()
            .map_err(|err| SetupError::ControllerUnavailable(err.to_string()))?;
        Ok(UioInterrupts::new(device, self.config.io_line()))
    }
}

/// A UIO register map, unmapped on drop
#[derive(Debug)]
pub struct UioMapping {
    mmio: VolatileMmio,
}

impl UioMapping {
    fn map(device: &File, map: u32, len: usize) -> Result<Self, SetupError> {
        // SAFETY: sysconf has no preconditions.
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page <= 0 {
            return Err(SetupError::WindowUnavailable(
                "cannot determine page size".to_string(),
            ));
        }
        let offset = map as libc::off_t * page as libc::off_t;

        // SAFETY: a fresh shared mapping of the device; the kernel validates
        // length and offset against the UIO map.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                device.as_raw_fd(),
                offset,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(SetupError::WindowUnavailable(format!(
                "mmap of map{} failed: {}",
                map,
                io::Error::last_os_error()
            )));
        }
        let base = NonNull::new(base.cast::<u8>()).ok_or_else(|| {
            SetupError::WindowUnavailable(format!("mmap of map{} returned null", map))
        })?;

        debug!(map, len, "UIO map attached");
        // SAFETY: the mapping is page aligned, `len` bytes long, and lives
        // until `Drop` unmaps it.
        let mmio = unsafe { VolatileMmio::new(base, len) };
        Ok(Self { mmio })
    }
}

impl Mmio for UioMapping {
    fn len(&self) -> usize {
        self.mmio.len()
    }

    fn read_u16(&mut self, offset: usize) -> u16 {
        self.mmio.read_u16(offset)
    }

    fn write_u16(&mut self, offset: usize, value: u16) {
        self.mmio.write_u16(offset, value)
    }

    fn read_u32(&mut self, offset: usize) -> u32 {
        self.mmio.read_u32(offset)
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.mmio.write_u32(offset, value)
    }
}

impl Drop for UioMapping {
    fn drop(&mut self) {
        // SAFETY: base/len are exactly what `mmap` returned in `map`.
        let rc = unsafe { libc::munmap(self.mmio.base().as_ptr().cast(), self.mmio.len()) };
        if rc != 0 {
            warn!(err = %io::Error::last_os_error(), "munmap failed");
        }
    }
}

/// A connected line: trampoline waiting for `enable`, or a running thread
struct Worker {
    trampoline: Option<IrqTrampoline>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Interrupt controller backed by the UIO device's event interface
///
/// A UIO device carries exactly one interrupt line.
pub struct UioInterrupts {
    device: Arc<File>,
    line: IrqLine,
    workers: HashMap<IrqLine, Worker>,
    failed: Arc<AtomicBool>,
}

impl UioInterrupts {
    fn new(device: Arc<File>, line: IrqLine) -> Self {
        Self {
            device,
            line,
            workers: HashMap::new(),
            failed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl std::fmt::Debug for UioInterrupts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UioInterrupts")
            .field("line", &self.line)
            .field("connected", &self.workers.contains_key(&self.line))
            .field("failed", &self.failed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl InterruptController for UioInterrupts {
    fn connect(&mut self, line: IrqLine, trampoline: IrqTrampoline) -> Result<(), SetupError> {
        if line != self.line || self.workers.contains_key(&line) {
            return Err(SetupError::LineBindFailed(line));
        }
        self.workers.insert(
            line,
            Worker {
                trampoline: Some(trampoline),
                stop: Arc::new(AtomicBool::new(false)),
                thread: None,
            },
        );
        Ok(())
    }

    fn enable(&mut self, line: IrqLine) -> Result<(), SetupError> {
        let worker = self
            .workers
            .get_mut(&line)
            .ok_or(SetupError::LineBindFailed(line))?;
        let Some(trampoline) = worker.trampoline.take() else {
            return Ok(());
        };

        set_line_mask(&self.device, true)
            .map_err(|err| SetupError::ControllerUnavailable(err.to_string()))?;

        let device = self.device.clone();
        let stop = worker.stop.clone();
        let failed = self.failed.clone();
        let thread = thread::Builder::new()
            .name(format!("uio-irq-{}", line.id()))
            .spawn(move || {
                if interrupt_loop(&device, line, &trampoline, &stop).is_err() {
                    failed.store(true, Ordering::SeqCst);
                }
            })
            .map_err(|err| SetupError::ControllerUnavailable(err.to_string()))?;
        worker.thread = Some(thread);
        Ok(())
    }

    fn disconnect(&mut self, line: IrqLine) {
        let Some(mut worker) = self.workers.remove(&line) else {
            return;
        };
        if let Err(err) = set_line_mask(&self.device, false) {
            warn!(%err, "failed to mask UIO interrupt");
        }
        worker.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = worker.thread.take() {
            if thread.join().is_err() {
                error!(line = line.id(), "interrupt thread panicked");
            }
        }
    }

    fn link_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

impl Drop for UioInterrupts {
    fn drop(&mut self) {
        let lines: Vec<IrqLine> = self.workers.keys().copied().collect();
        for line in lines {
            self.disconnect(line);
        }
    }
}

/// Delivers events until `stop` is set; an error ends delivery for good
fn interrupt_loop(
    device: &File,
    line: IrqLine,
    trampoline: &IrqTrampoline,
    stop: &AtomicBool,
) -> io::Result<()> {
    while !stop.load(Ordering::SeqCst) {
        match wait_for_event(device) {
            Ok(Some(event_count)) => {
                let mut frame = IrqFrame::new(line, event_count);
                trampoline(&mut frame);
                if frame.is_acknowledged() {
                    if let Err(err) = set_line_mask(device, true) {
                        error!(%err, line = line.id(), "failed to re-arm UIO interrupt");
                        return Err(err);
                    }
                }
            }
            Ok(None) => {}
            Err(err) => {
                error!(%err, line = line.id(), "UIO interrupt wait failed");
                return Err(err);
            }
        }
    }
    Ok(())
}

/// Waits up to `POLL_TIMEOUT_MS` for an event; returns its count
fn wait_for_event(device: &File) -> io::Result<Option<u32>> {
    let mut pfd = libc::pollfd {
        fd: device.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: `pfd` is a valid pollfd for the duration of the call.
    let rc = unsafe { libc::poll(&mut pfd, 1, POLL_TIMEOUT_MS) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        return if err.kind() == io::ErrorKind::Interrupted {
            Ok(None)
        } else {
            Err(err)
        };
    }
    if rc == 0 {
        return Ok(None);
    }

    let mut raw = [0u8; 4];
    let mut reader = device;
    reader.read_exact(&mut raw)?;
    Ok(Some(u32::from_ne_bytes(raw)))
}

fn set_line_mask(device: &File, enabled: bool) -> io::Result<()> {
    let mut writer = device;
    writer.write_all(&u32::from(enabled).to_ne_bytes())
}

/// Size in bytes of UIO map `map`, as reported by sysfs
fn map_size(device: &Path, map: u32) -> Result<usize, SetupError> {
    let name = device.file_name().ok_or_else(|| {
        SetupError::WindowUnavailable(format!("{}: not a device node", device.display()))
    })?;
    let path = PathBuf::from("/sys/class/uio")
        .join(name)
        .join("maps")
        .join(format!("map{}", map))
        .join("size");
    let text = fs::read_to_string(&path)
        .map_err(|err| SetupError::WindowUnavailable(format!("{}: {}", path.display(), err)))?;
    parse_map_size(&text).ok_or_else(|| {
        SetupError::WindowUnavailable(format!("{}: malformed size {:?}", path.display(), text))
    })
}

fn parse_map_size(text: &str) -> Option<usize> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))?;
    usize::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_map_size() {
        assert_eq!(parse_map_size("0x00010000\n"), Some(0x10000));
        assert_eq!(parse_map_size("0X1000"), Some(0x1000));
        assert_eq!(parse_map_size("4096"), None);
        assert_eq!(parse_map_size("0xzz"), None);
    }

    #[test]
    fn test_platform_rejects_invalid_config() {
        let config = HalConfig {
            window_words: 0,
            ..HalConfig::default()
        };
        assert!(matches!(
            UioPlatform::new(config),
            Err(SetupError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_device_is_window_unavailable() {
        let config = HalConfig {
            device: PathBuf::from("/dev/socdp8-missing-uio"),
            ..HalConfig::default()
        };
        let mut platform = UioPlatform::new(config).unwrap();
        assert!(matches!(
            platform.map_window(MemoryWindow::pdp8()),
            Err(SetupError::WindowUnavailable(_))
        ));
        assert!(matches!(
            platform.interrupt_controller(),
            Err(SetupError::ControllerUnavailable(_))
        ));
    }

    #[test]
    fn test_io_registers_need_io_map() {
        let mut platform = UioPlatform::new(HalConfig::default()).unwrap();
        assert!(matches!(
            platform.map_io_registers(),
            Err(SetupError::InvalidConfig(_))
        ));
    }
}
