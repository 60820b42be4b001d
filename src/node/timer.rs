use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};

use crate::node::{
    energy::{Arbiter, EnergyMode},
    error::TimerError,
    events::Events,
    scheduler::Scheduler,
};

/// Interrupt sources of the periodic timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerSource {
    Compare0,
    Compare1,
    Underflow,
}

impl TimerSource {
    /// Sources in the order the interrupt handler services them.
    pub const ALL: [TimerSource; 3] = [
        TimerSource::Compare0,
        TimerSource::Compare1,
        TimerSource::Underflow,
    ];

    const fn flag(self) -> u8 {
        match self {
            TimerSource::Compare0 => 1 << 0,
            TimerSource::Compare1 => 1 << 1,
            TimerSource::Underflow => 1 << 2,
        }
    }
}

/// Latched timer interrupt flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerFlags(u8);

impl TimerFlags {
    pub const NONE: Self = Self(0);

    pub const fn from_source(source: TimerSource) -> Self {
        Self(source.flag())
    }

    pub const fn with(self, source: TimerSource) -> Self {
        Self(self.0 | source.flag())
    }

    pub const fn contains(self, source: TimerSource) -> bool {
        self.0 & source.flag() != 0
    }
}

/// Register-level access to the timer.
pub trait TimerPeripheral {
    /// Returns the latched flags of enabled interrupts and clears them.
    fn take_flags(&mut self) -> TimerFlags;

    /// Starts or stops counting.
    fn set_enabled(&mut self, enabled: bool);
}

/// Which event each timer source posts. `None` leaves the source disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    pub compare0: Option<Events>,
    pub compare1: Option<Events>,
    pub underflow: Option<Events>,
    /// Mode vetoed while the timer runs. The timer stops counting in `Em4`.
    pub block_mode: EnergyMode,
}

impl TimerConfig {
    pub const fn new() -> Self {
        Self {
            compare0: None,
            compare1: None,
            underflow: None,
            block_mode: EnergyMode::Em4,
        }
    }

    pub const fn event(&self, source: TimerSource) -> Option<Events> {
        match source {
            TimerSource::Compare0 => self.compare0,
            TimerSource::Compare1 => self.compare1,
            TimerSource::Underflow => self.underflow,
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner<T> {
    peripheral: T,
    config: TimerConfig,
    running: bool,
}

/// Free-running timer that turns its interrupts into scheduler events.
pub struct PeriodicTimer<T> {
    inner: Mutex<RefCell<Inner<T>>>,
}

impl<T: TimerPeripheral> PeriodicTimer<T> {
    pub const fn new(peripheral: T, config: TimerConfig) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                peripheral,
                config,
                running: false,
            })),
        }
    }

    /// Starts the timer. The sleep vote is placed on the stopped-to-running
    /// transition only; starting a running timer does nothing.
    pub fn start(&self, arbiter: &Arbiter) -> Result<(), TimerError> {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if inner.running {
                return Ok(());
            }
            arbiter.block_in(cs, inner.config.block_mode)?;
            inner.peripheral.set_enabled(true);
            inner.running = true;
            Ok(())
        })
    }

    /// Stops the timer and releases its sleep vote.
    pub fn stop(&self, arbiter: &Arbiter) -> Result<(), TimerError> {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if !inner.running {
                return Ok(());
            }
            arbiter.unblock_in(cs, inner.config.block_mode)?;
            inner.peripheral.set_enabled(false);
            inner.running = false;
            Ok(())
        })
    }

    pub fn is_running(&self) -> bool {
        critical_section::with(|cs| self.inner.borrow_ref(cs).running)
    }

    /// Timer interrupt entry point.
    ///
    /// Posts the configured event of every latched source. A latched source
    /// with no configured event means the interrupt was enabled by mistake
    /// and is reported as [`TimerError::UnexpectedSource`].
    pub fn on_interrupt(&self, scheduler: &Scheduler) -> Result<(), TimerError> {
        critical_section::with(|cs| self.on_interrupt_in(cs, scheduler))
    }

    /// [`on_interrupt`](Self::on_interrupt) for callers already inside a
    /// critical section.
    pub fn on_interrupt_in(
        &self,
        cs: CriticalSection<'_>,
        scheduler: &Scheduler,
    ) -> Result<(), TimerError> {
        let mut inner = self.inner.borrow_ref_mut(cs);
        let flags = inner.peripheral.take_flags();

        for source in TimerSource::ALL {
            if !flags.contains(source) {
                continue;
            }
            match inner.config.event(source) {
                Some(events) => scheduler.post_in(cs, events),
                None => {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("timer interrupt from disabled source {}", source);
                    return Err(TimerError::UnexpectedSource(source));
                }
            }
        }
        Ok(())
    }

    pub fn with_peripheral<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs).peripheral))
    }
}
