use core::ops::BitOr;

/// Latched bus interrupt flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusFlags(u8);

impl BusFlags {
    pub const NONE: Self = Self(0);
    /// Acknowledge received.
    pub const ACK: Self = Self(1 << 0);
    /// Not-acknowledge received.
    pub const NACK: Self = Self(1 << 1);
    /// Receive data valid.
    pub const RXDATAV: Self = Self(1 << 2);
    /// Master stop condition completed.
    pub const MSTOP: Self = Self(1 << 3);

    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for BusFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Register-level access to a bus master peripheral.
///
/// Implemented by the board support layer. The engine calls these only from
/// inside a critical section, either from the bus interrupt or from
/// [`BusEngine::start`](super::BusEngine::start).
pub trait BusPeripheral {
    /// Returns the latched flags of enabled interrupts and clears them.
    fn take_flags(&mut self) -> BusFlags;

    /// Issues a start (or repeated start) condition followed by `header`.
    fn start(&mut self, header: u8);

    /// Queues one byte for transmission.
    fn write(&mut self, byte: u8);

    /// Reads the byte that raised [`BusFlags::RXDATAV`].
    fn read(&mut self) -> u8;

    /// Acknowledges the last received byte.
    fn ack(&mut self);

    /// Rejects the last received byte.
    fn nack(&mut self);

    /// Issues a stop condition.
    fn stop(&mut self);

    /// Abandons whatever the peripheral is doing and frees the bus.
    fn abort(&mut self);
}
