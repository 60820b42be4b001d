//! Si7021 relative-humidity sensor on top of the bus engine.
//!
//! The driver only builds transfers and decodes results. Completion is
//! reported through the scheduler like any other event, so a measurement is
//! a two-step affair: start it, then decode once the read event is handled.

use embedded_hal::delay::DelayNs;

use crate::node::{
    bus::{BusEngine, BusPeripheral, Transfer},
    energy::Arbiter,
    error::BusError,
    events::Events,
};

/// Fixed 7-bit bus address.
pub const ADDRESS: u8 = 0x40;

/// Worst-case time from power-on to the first accepted command.
pub const POWER_UP_MS: u32 = 80;

/// Command set (datasheet table 11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    ReadIdByte1First = 0x0F,
    ReadHeaterControl = 0x11,
    WriteHeaterControl = 0x51,
    ReadFirmwareRev0 = 0x84,
    ReadFirmwareRev1 = 0xB8,
    ReadIdByte2First = 0xC9,
    ReadTemperatureFromPreviousRh = 0xE0,
    MeasureTemperatureHoldMaster = 0xE3,
    MeasureRhHoldMaster = 0xE5,
    WriteUserRegister1 = 0xE6,
    ReadUserRegister1 = 0xE7,
    MeasureTemperatureNoHold = 0xF3,
    MeasureRhNoHold = 0xF5,
    ReadIdByte1Second = 0xFA,
    ReadIdByte2Second = 0xFC,
    Reset = 0xFE,
}

impl Command {
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Events the driver posts on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Si7021Config {
    /// Posted when a humidity read completes.
    pub read_done: Events,
    /// Posted when a register write completes.
    pub write_done: Events,
}

/// Converts a raw 16-bit humidity code to %RH.
///
/// `125 × raw / 65536 − 6`. Takes `u32` so the full-scale end point
/// `65536 → 119.0` is representable.
pub fn relative_humidity(raw: u32) -> f32 {
    (125.0 * raw as f32) / 65536.0 - 6.0
}

pub struct Si7021 {
    config: Si7021Config,
}

impl Si7021 {
    pub const fn new(config: Si7021Config) -> Self {
        Self { config }
    }

    /// Blocks for the sensor's power-up time. Call once before the first
    /// transaction.
    pub fn power_up(&self, delay: &mut impl DelayNs) {
        delay.delay_ms(POWER_UP_MS);
    }

    /// Starts a hold-master humidity measurement returning two bytes.
    pub fn start_humidity_read<P: BusPeripheral, const N: usize>(
        &self,
        bus: &BusEngine<P, N>,
        arbiter: &Arbiter,
    ) -> Result<(), BusError> {
        let transfer = Transfer::read(ADDRESS, 2, self.config.read_done)
            .with_command(Command::MeasureRhHoldMaster.code());
        bus.start(arbiter, transfer)
    }

    /// Starts a write of user register 1 (resolution and heater bits).
    pub fn start_write_user_register<P: BusPeripheral, const N: usize>(
        &self,
        bus: &BusEngine<P, N>,
        arbiter: &Arbiter,
        value: u8,
    ) -> Result<(), BusError> {
        let payload = [value];
        let transfer = Transfer::write(ADDRESS, &payload, self.config.write_done)
            .with_command(Command::WriteUserRegister1.code());
        bus.start(arbiter, transfer)
    }

    /// Decodes the result of the last completed humidity read.
    ///
    /// The raw code is assembled most-significant byte first inside a
    /// critical section, since the bus interrupt replaces the result when
    /// the next read completes. Returns `None` unless the last completed
    /// read returned exactly two bytes.
    pub fn decode_relative_humidity<P: BusPeripheral, const N: usize>(
        &self,
        bus: &BusEngine<P, N>,
    ) -> Option<f32> {
        let raw = bus.with_data(|data| match data {
            [msb, lsb] => Some(u16::from_be_bytes([*msb, *lsb])),
            _ => None,
        })?;
        Some(relative_humidity(u32::from(raw)))
    }
}
