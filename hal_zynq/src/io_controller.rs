//! FPGA I/O controller registers.
//!
//! Peripheral devices of the emulated PDP-8 are served by an I/O controller
//! in the fabric. Each of the 64 device ids owns one 32-bit register:
//!
//! ```text
//!  31    28 27  26 25 24 23 22 21 20 19 18 17 16 15 14 13 12  11        0
//! +--------+---+-----+-----+-----+-----+-----+-----+-----+---+-----------+
//! |        |new| int |rload|acclr|acld |fset |fclr |skip |sow|   data    |
//! +--------+---+-----+-----+-----+-----+-----+-----+-----+---+-----------+
//! ```
//!
//! `sow` is set-flag-on-write; the two-bit fields select which IOP pulse
//! performs the action. Register 0 doubles as the clear-flag strobe and
//! registers 64/65 hold the device flag bitmap.

use thiserror::Error;
use tracing::debug;

use crate::mmio::Mmio;

/// Number of device ids served by the controller
pub const DEVICE_COUNT: u8 = 64;

const CLEAR_FLAG_REGISTER: usize = 0;
const FLAGS_REGISTER: usize = 64;

/// Bytes the register window must span: device registers plus both flag
/// registers
pub const WINDOW_BYTES: usize = (FLAGS_REGISTER + 2) * 4;

const DATA_MASK: u32 = 0o7777;
const SET_FLAG_ON_WRITE: u32 = 1 << 12;
const NEW_DATA: u32 = 1 << 27;

/// Errors that can occur while programming the I/O controller
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum IoControllerError {
    /// Device id is not below `DEVICE_COUNT`
    #[error("Invalid device id: {0}")]
    InvalidDevice(u8),

    /// IOP select does not fit in two bits
    #[error("Invalid IOP select for {field}: {value}")]
    InvalidIop { field: &'static str, value: u8 },

    /// The mapped window does not reach the flag registers
    #[error("I/O controller window holds {len:#x} bytes, needs {needed:#x}")]
    WindowTooSmall { len: usize, needed: usize },
}

/// Static configuration of one peripheral device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoDeviceConfig {
    pub dev_id: u8,
    pub set_flag_on_write: bool,
    pub iop_for_skip_flag: u8,
    pub iop_for_flag_clear: u8,
    pub iop_for_flag_set: u8,
    pub iop_for_ac_load: u8,
    pub iop_for_ac_clear: u8,
    pub iop_for_register_load: u8,
    pub iop_for_interrupt: u8,
}

impl IoDeviceConfig {
    /// Encodes the configuration word for this device
    pub fn encode(&self) -> Result<u32, IoControllerError> {
        check_device(self.dev_id)?;

        let fields = [
            ("iop_for_skip_flag", self.iop_for_skip_flag, 13),
            ("iop_for_flag_clear", self.iop_for_flag_clear, 15),
            ("iop_for_flag_set", self.iop_for_flag_set, 17),
            ("iop_for_ac_load", self.iop_for_ac_load, 19),
            ("iop_for_ac_clear", self.iop_for_ac_clear, 21),
            ("iop_for_register_load", self.iop_for_register_load, 23),
            ("iop_for_interrupt", self.iop_for_interrupt, 25),
        ];

        let mut config = if self.set_flag_on_write {
            SET_FLAG_ON_WRITE
        } else {
            0
        };
        for (field, value, shift) in fields {
            if value > 0b11 {
                return Err(IoControllerError::InvalidIop { field, value });
            }
            config |= u32::from(value) << shift;
        }
        Ok(config)
    }
}

/// Contents of a device register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRegister {
    /// 12-bit data word
    pub data: u16,
    /// Set by the fabric when the CPU loaded new data
    pub new_data: bool,
}

/// Device flag bitmap, bit `n` for device id `n`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceFlags(pub u64);

impl DeviceFlags {
    /// Returns whether the flag of `dev_id` is raised
    pub fn is_set(&self, dev_id: u8) -> bool {
        dev_id < DEVICE_COUNT && self.0 & (1 << dev_id) != 0
    }
}

/// Driver for the I/O controller register window
#[derive(Debug)]
pub struct IoController<M: Mmio> {
    mmio: M,
    devices: Vec<IoDeviceConfig>,
}

impl<M: Mmio> IoController<M> {
    /// Takes over a register window spanning at least [`WINDOW_BYTES`]
    pub fn new(mmio: M) -> Result<Self, IoControllerError> {
        if mmio.len() < WINDOW_BYTES {
            return Err(IoControllerError::WindowTooSmall {
                len: mmio.len(),
                needed: WINDOW_BYTES,
            });
        }
        Ok(Self {
            mmio,
            devices: Vec::new(),
        })
    }

    /// Programs the configuration word of a device
    ///
    /// Registering an id again replaces the previous configuration.
    pub fn register_device(&mut self, config: IoDeviceConfig) -> Result<(), IoControllerError> {
        let word = config.encode()?;
        self.mmio.write_u32(device_register(config.dev_id), word);
        self.devices.retain(|device| device.dev_id != config.dev_id);
        self.devices.push(config);
        debug!(dev_id = config.dev_id, config = word, "I/O device registered");
        Ok(())
    }

    /// Devices registered so far, in registration order
    pub fn devices(&self) -> &[IoDeviceConfig] {
        &self.devices
    }

    /// Replaces the data word of a device and clears its new-data flag
    pub fn write_device_register(
        &mut self,
        dev_id: u8,
        data: u16,
    ) -> Result<(), IoControllerError> {
        check_device(dev_id)?;
        let offset = device_register(dev_id);
        let mut reg = self.mmio.read_u32(offset);
        reg &= !DATA_MASK;
        reg &= !NEW_DATA;
        reg |= u32::from(data) & DATA_MASK;
        self.mmio.write_u32(offset, reg);
        Ok(())
    }

    /// Reads the data word and new-data flag of a device
    pub fn read_device_register(
        &mut self,
        dev_id: u8,
    ) -> Result<DeviceRegister, IoControllerError> {
        check_device(dev_id)?;
        let reg = self.mmio.read_u32(device_register(dev_id));
        Ok(DeviceRegister {
            data: (reg & DATA_MASK) as u16,
            new_data: reg & NEW_DATA != 0,
        })
    }

    /// Clears the flag of a device
    pub fn clear_device_flag(&mut self, dev_id: u8) -> Result<(), IoControllerError> {
        check_device(dev_id)?;
        // The strobe register takes the id in big-endian byte order.
        self.mmio.write_u32(
            register(CLEAR_FLAG_REGISTER),
            u32::from(dev_id).swap_bytes(),
        );
        Ok(())
    }

    /// Reads the flag bitmap of all devices
    pub fn poll_flags(&mut self) -> DeviceFlags {
        let lo = self.mmio.read_u32(register(FLAGS_REGISTER));
        let hi = self.mmio.read_u32(register(FLAGS_REGISTER + 1));
        DeviceFlags((u64::from(hi) << 32) | u64::from(lo))
    }

    /// Polls the flags once and pairs every registered device with its flag
    pub fn scan(&mut self) -> Vec<(IoDeviceConfig, bool)> {
        let flags = self.poll_flags();
        self.devices
            .iter()
            .map(|device| (*device, flags.is_set(device.dev_id)))
            .collect()
    }

    /// Releases the register window
    pub fn into_inner(self) -> M {
        self.mmio
    }
}

fn check_device(dev_id: u8) -> Result<(), IoControllerError> {
    if dev_id < DEVICE_COUNT {
        Ok(())
    } else {
        Err(IoControllerError::InvalidDevice(dev_id))
    }
}

fn register(index: usize) -> usize {
    index * 4
}

fn device_register(dev_id: u8) -> usize {
    register(usize::from(dev_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::{FakeMmio, MmioAccess};

    fn controller() -> (IoController<FakeMmio>, FakeMmio) {
        let mmio = FakeMmio::new(WINDOW_BYTES);
        (IoController::new(mmio.clone()).unwrap(), mmio)
    }

    fn tty_keyboard() -> IoDeviceConfig {
        IoDeviceConfig {
            dev_id: 3,
            set_flag_on_write: false,
            iop_for_skip_flag: 1,
            iop_for_flag_clear: 2,
            iop_for_ac_load: 2,
            iop_for_ac_clear: 2,
            ..IoDeviceConfig::default()
        }
    }

    #[test]
    fn test_encode_config() {
        let config = IoDeviceConfig {
            dev_id: 4,
            set_flag_on_write: true,
            iop_for_skip_flag: 1,
            iop_for_flag_clear: 2,
            iop_for_flag_set: 0,
            iop_for_ac_load: 3,
            iop_for_ac_clear: 0,
            iop_for_register_load: 1,
            iop_for_interrupt: 2,
        };
        let expected = (1 << 12) | (1 << 13) | (2 << 15) | (3 << 19) | (1 << 23) | (2 << 25);
        assert_eq!(config.encode(), Ok(expected));
    }

    #[test]
    fn test_encode_rejects_wide_iop() {
        let config = IoDeviceConfig {
            iop_for_interrupt: 4,
            ..IoDeviceConfig::default()
        };
        assert_eq!(
            config.encode(),
            Err(IoControllerError::InvalidIop {
                field: "iop_for_interrupt",
                value: 4
            })
        );
    }

    #[test]
    fn test_register_device_writes_config() {
        let (mut io, mmio) = controller();
        let config = tty_keyboard();
        io.register_device(config).unwrap();

        assert_eq!(mmio.peek_u32(12), config.encode().unwrap());
        assert_eq!(io.devices(), &[config]);
    }

    #[test]
    fn test_reregister_replaces_entry() {
        let (mut io, _mmio) = controller();
        io.register_device(tty_keyboard()).unwrap();
        let updated = IoDeviceConfig {
            set_flag_on_write: true,
            ..tty_keyboard()
        };
        io.register_device(updated).unwrap();
        assert_eq!(io.devices(), &[updated]);
    }

    #[test]
    fn test_invalid_device() {
        let (mut io, _mmio) = controller();
        assert_eq!(
            io.write_device_register(64, 0),
            Err(IoControllerError::InvalidDevice(64))
        );
        assert_eq!(
            io.read_device_register(200),
            Err(IoControllerError::InvalidDevice(200))
        );
    }

    #[test]
    fn test_write_device_register_preserves_config() {
        let (mut io, mmio) = controller();
        io.register_device(tty_keyboard()).unwrap();
        let config = mmio.peek_u32(12);
        mmio.hardware_write_u32(12, config | NEW_DATA | 0o1111);

        io.write_device_register(3, 0o17777).unwrap();

        assert_eq!(mmio.peek_u32(12), config | 0o7777);
    }

    #[test]
    fn test_read_device_register() {
        let (mut io, mmio) = controller();
        mmio.hardware_write_u32(8, NEW_DATA | SET_FLAG_ON_WRITE | 0o0215);

        assert_eq!(
            io.read_device_register(2),
            Ok(DeviceRegister {
                data: 0o0215,
                new_data: true
            })
        );
    }

    #[test]
    fn test_clear_device_flag_is_big_endian() {
        let (mut io, mmio) = controller();
        io.clear_device_flag(3).unwrap();

        assert_eq!(
            mmio.accesses(),
            vec![MmioAccess::Write32 {
                offset: 0,
                value: 0x0300_0000
            }]
        );
    }

    #[test]
    fn test_window_without_flag_registers_is_rejected() {
        let mmio = FakeMmio::new(64 * 4);
        assert_eq!(
            IoController::new(mmio.clone()).err(),
            Some(IoControllerError::WindowTooSmall {
                len: 64 * 4,
                needed: 66 * 4
            })
        );
        assert!(mmio.accesses().is_empty());
    }

    #[test]
    fn test_window_exactly_reaching_flag_registers() {
        let mut io = IoController::new(FakeMmio::new(66 * 4)).unwrap();
        assert_eq!(io.poll_flags(), DeviceFlags(0));
        io.register_device(IoDeviceConfig {
            dev_id: DEVICE_COUNT - 1,
            ..IoDeviceConfig::default()
        })
        .unwrap();
    }

    #[test]
    fn test_poll_flags() {
        let (mut io, mmio) = controller();
        mmio.hardware_write_u32(64 * 4, 1 << 3);
        mmio.hardware_write_u32(65 * 4, 1 << 1);

        let flags = io.poll_flags();
        assert!(flags.is_set(3));
        assert!(flags.is_set(33));
        assert!(!flags.is_set(4));
        assert!(!flags.is_set(64));
    }

    #[test]
    fn test_scan_pairs_devices_with_flags() {
        let (mut io, mmio) = controller();
        let keyboard = tty_keyboard();
        let printer = IoDeviceConfig {
            dev_id: 4,
            set_flag_on_write: true,
            ..IoDeviceConfig::default()
        };
        io.register_device(keyboard).unwrap();
        io.register_device(printer).unwrap();
        mmio.hardware_write_u32(64 * 4, 1 << 4);

        assert_eq!(io.scan(), vec![(keyboard, false), (printer, true)]);
    }
}
