use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};

use crate::node::error::ArbiterError;

/// Processor energy modes, shallowest first.
///
/// `Em0` is fully running, `Em4` is the deepest shutdown-like state. Each
/// step down retains less of the chip: `Em2` still clocks low-frequency
/// peripherals such as the sensor bus, `Em3` only keeps asynchronous ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum EnergyMode {
    Em0 = 0,
    Em1 = 1,
    Em2 = 2,
    Em3 = 3,
    Em4 = 4,
}

impl EnergyMode {
    /// Number of modes tracked by the arbiter.
    pub const COUNT: usize = 5;

    /// All modes, shallowest first.
    pub const ALL: [EnergyMode; Self::COUNT] = [
        EnergyMode::Em0,
        EnergyMode::Em1,
        EnergyMode::Em2,
        EnergyMode::Em3,
        EnergyMode::Em4,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The next deeper mode, or `None` at `Em4`.
    pub const fn deeper(self) -> Option<Self> {
        match self {
            EnergyMode::Em0 => Some(EnergyMode::Em1),
            EnergyMode::Em1 => Some(EnergyMode::Em2),
            EnergyMode::Em2 => Some(EnergyMode::Em3),
            EnergyMode::Em3 => Some(EnergyMode::Em4),
            EnergyMode::Em4 => None,
        }
    }

    /// The next shallower mode, or `None` at `Em0`.
    pub const fn shallower(self) -> Option<Self> {
        match self {
            EnergyMode::Em0 => None,
            EnergyMode::Em1 => Some(EnergyMode::Em0),
            EnergyMode::Em2 => Some(EnergyMode::Em1),
            EnergyMode::Em3 => Some(EnergyMode::Em2),
            EnergyMode::Em4 => Some(EnergyMode::Em3),
        }
    }
}

impl TryFrom<u8> for EnergyMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        EnergyMode::ALL.get(value as usize).copied().ok_or(value)
    }
}

/// Platform hook that actually halts the core.
///
/// Called with interrupts enabled; returns once an interrupt has woken the
/// processor.
pub trait SleepControl {
    fn enter(&mut self, mode: EnergyMode);
}

/// Sleep control that never halts. Useful on hosts and in bring-up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSleep;

impl SleepControl for NoSleep {
    fn enter(&mut self, _mode: EnergyMode) {}
}

/// Reference-counted sleep vetoes.
///
/// A vote on mode `m` means "do not sleep in `m` or deeper". Independent
/// peripherals place and release votes without knowing about each other;
/// the arbiter sleeps one mode shallower than the shallowest vetoed mode.
pub struct Arbiter {
    votes: Mutex<RefCell<[u8; EnergyMode::COUNT]>>,
}

impl Arbiter {
    pub const fn new() -> Self {
        Self {
            votes: Mutex::new(RefCell::new([0; EnergyMode::COUNT])),
        }
    }

    /// Drops every outstanding vote.
    pub fn open(&self) {
        critical_section::with(|cs| *self.votes.borrow_ref_mut(cs) = [0; EnergyMode::COUNT]);
    }

    /// Forbids sleeping in `mode` or deeper until a matching [`unblock`](Self::unblock).
    pub fn block(&self, mode: EnergyMode) -> Result<(), ArbiterError> {
        critical_section::with(|cs| self.block_in(cs, mode))
    }

    /// Releases one vote previously placed with [`block`](Self::block).
    ///
    /// Releasing a mode with no outstanding vote is an error and leaves the
    /// counter at zero.
    pub fn unblock(&self, mode: EnergyMode) -> Result<(), ArbiterError> {
        critical_section::with(|cs| self.unblock_in(cs, mode))
    }

    /// The shallowest mode carrying a vote, or `Em4` if none does.
    pub fn current_blocked_depth(&self) -> EnergyMode {
        critical_section::with(|cs| self.current_blocked_depth_in(cs))
    }

    /// Outstanding votes on `mode`.
    pub fn votes(&self, mode: EnergyMode) -> u8 {
        critical_section::with(|cs| self.votes.borrow_ref(cs)[mode.index()])
    }

    /// [`block`](Self::block) for callers already inside a critical section.
    pub fn block_in(&self, cs: CriticalSection<'_>, mode: EnergyMode) -> Result<(), ArbiterError> {
        let mut votes = self.votes.borrow_ref_mut(cs);
        let slot = &mut votes[mode.index()];
        match slot.checked_add(1) {
            Some(n) => {
                *slot = n;
                Ok(())
            }
            None => {
                #[cfg(feature = "defmt")]
                defmt::warn!("vote counter overflow on {}", mode);
                Err(ArbiterError::Overflow(mode))
            }
        }
    }

    /// [`unblock`](Self::unblock) for callers already inside a critical section.
    pub fn unblock_in(
        &self,
        cs: CriticalSection<'_>,
        mode: EnergyMode,
    ) -> Result<(), ArbiterError> {
        let mut votes = self.votes.borrow_ref_mut(cs);
        let slot = &mut votes[mode.index()];
        match slot.checked_sub(1) {
            Some(n) => {
                *slot = n;
                Ok(())
            }
            None => {
                #[cfg(feature = "defmt")]
                defmt::warn!("unbalanced unblock of {}", mode);
                Err(ArbiterError::Underflow(mode))
            }
        }
    }

    /// [`current_blocked_depth`](Self::current_blocked_depth) for callers
    /// already inside a critical section.
    pub fn current_blocked_depth_in(&self, cs: CriticalSection<'_>) -> EnergyMode {
        let votes = self.votes.borrow_ref(cs);
        EnergyMode::ALL
            .into_iter()
            .find(|mode| votes[mode.index()] != 0)
            .unwrap_or(EnergyMode::Em4)
    }

    /// The mode [`enter_sleep`](Self::enter_sleep) would halt in, if any.
    ///
    /// Votes on `Em0` or `Em1` keep the core running; otherwise the core
    /// sleeps one mode shallower than the blocked one, and never deeper
    /// than `Em3`.
    pub fn sleep_target_in(&self, cs: CriticalSection<'_>) -> Option<EnergyMode> {
        match self.current_blocked_depth_in(cs) {
            EnergyMode::Em0 | EnergyMode::Em1 => None,
            EnergyMode::Em2 => Some(EnergyMode::Em1),
            EnergyMode::Em3 => Some(EnergyMode::Em2),
            EnergyMode::Em4 => Some(EnergyMode::Em3),
        }
    }

    /// Halts in the deepest mode the current votes allow.
    ///
    /// The decision is taken inside a critical section; the section is left
    /// before `sleep` halts the core so the waking interrupt can run.
    /// Returns the mode entered, or `None` if the votes keep the core awake.
    pub fn enter_sleep(&self, sleep: &mut impl SleepControl) -> Option<EnergyMode> {
        let target = critical_section::with(|cs| self.sleep_target_in(cs));
        if let Some(mode) = target {
            sleep.enter(mode);
        }
        target
    }
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new()
    }
}
