//! Test support utilities - only compiled in test builds.

use heapless::Vec;

use crate::node::{
    bus::{BusFlags, BusPeripheral},
    energy::{EnergyMode, SleepControl},
};

/// Peripheral call recorded by [`FakeBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Start(u8),
    Write(u8),
    Read,
    Ack,
    Nack,
    Stop,
    Abort,
}

/// Scripted bus peripheral: tests latch flags, the engine consumes them.
pub struct FakeBus {
    pub flags: BusFlags,
    pub rx: u8,
    pub ops: Vec<Op, 32>,
}

impl FakeBus {
    pub const fn new() -> Self {
        Self {
            flags: BusFlags::NONE,
            rx: 0,
            ops: Vec::new(),
        }
    }

    /// Latches `flags` as if the hardware had raised them.
    pub fn latch(&mut self, flags: BusFlags) {
        self.flags = self.flags | flags;
    }

    /// Latches a received byte.
    pub fn latch_byte(&mut self, byte: u8) {
        self.rx = byte;
        self.latch(BusFlags::RXDATAV);
    }

    fn record(&mut self, op: Op) {
        self.ops.push(op).expect("FakeBus op log full");
    }
}

impl Default for FakeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BusPeripheral for FakeBus {
    fn take_flags(&mut self) -> BusFlags {
        core::mem::take(&mut self.flags)
    }

    fn start(&mut self, header: u8) {
        self.record(Op::Start(header));
    }

    fn write(&mut self, byte: u8) {
        self.record(Op::Write(byte));
    }

    fn read(&mut self) -> u8 {
        self.record(Op::Read);
        self.rx
    }

    fn ack(&mut self) {
        self.record(Op::Ack);
    }

    fn nack(&mut self) {
        self.record(Op::Nack);
    }

    fn stop(&mut self) {
        self.record(Op::Stop);
    }

    fn abort(&mut self) {
        self.record(Op::Abort);
    }
}

/// Sleep control that remembers what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingSleep {
    pub last: Option<EnergyMode>,
    pub count: usize,
}

impl SleepControl for RecordingSleep {
    fn enter(&mut self, mode: EnergyMode) {
        self.last = Some(mode);
        self.count += 1;
    }
}

/// Delay that only adds up the requested time.
#[derive(Debug, Default)]
pub struct CountingDelay {
    pub total_ns: u64,
}

impl embedded_hal::delay::DelayNs for CountingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }
}
