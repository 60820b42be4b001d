use core::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// A set of deferred-work requests, one bit per event kind.
///
/// The numeric value of each event is chosen by the application. Events from
/// different producers (timer, external interrupt, bus) must use disjoint bits.
///
/// ```
/// use sensor_node_core::node::Events;
///
/// const TIMER_UF: Events = Events::from_bits(0x04);
/// const HUM_READ: Events = Events::from_bits(0x20);
///
/// let both = TIMER_UF | HUM_READ;
/// assert!(both.contains(TIMER_UF));
/// assert_eq!(both.bits(), 0x24);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Events(u32);

impl Events {
    /// The empty set.
    pub const NONE: Self = Self(0);

    /// Wraps a raw bit pattern.
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The event at bit position `index`.
    ///
    /// # Panics
    /// Panics if `index >= 32`.
    #[inline]
    pub const fn bit(index: u32) -> Self {
        assert!(index < 32, "event bit index out of range");
        Self(1 << index)
    }

    /// Returns the raw bit pattern.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if every bit of `other` is set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if `self` and `other` share at least one bit.
    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Number of distinct events in the set.
    #[inline]
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterates the set one event at a time, lowest bit position first.
    pub fn iter(self) -> EventIter {
        let bitmap = bitmaps::Bitmap::<32>::from_value(self.0);
        EventIter {
            next: bitmap.first_index(),
            bitmap,
        }
    }
}

impl BitOr for Events {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Events {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for Events {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl IntoIterator for Events {
    type Item = Events;
    type IntoIter = EventIter;

    fn into_iter(self) -> EventIter {
        self.iter()
    }
}

/// Iterator over the single-bit events of an [`Events`] set.
#[derive(Debug, Clone)]
pub struct EventIter {
    bitmap: bitmaps::Bitmap<32>,
    next: Option<usize>,
}

impl Iterator for EventIter {
    type Item = Events;

    fn next(&mut self) -> Option<Events> {
        let index = self.next?;
        self.next = self.bitmap.next_index(index);
        Some(Events(1 << index))
    }
}
