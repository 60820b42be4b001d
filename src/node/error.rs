use crate::node::{
    bus::{BusEvent, BusState},
    energy::EnergyMode,
    timer::TimerSource,
};

/// Unbalanced use of the energy-mode arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArbiterError {
    /// `block` would push the vote counter past its maximum.
    Overflow(EnergyMode),
    /// `unblock` was called on a mode with no outstanding vote.
    Underflow(EnergyMode),
}

impl core::fmt::Display for ArbiterError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ArbiterError::Overflow(mode) => write!(f, "vote counter overflow for {mode:?}"),
            ArbiterError::Underflow(mode) => write!(f, "unbalanced unblock of {mode:?}"),
        }
    }
}

/// Bus protocol violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// A transaction is already outstanding.
    Busy,
    /// Transfer length is zero for a read or exceeds the buffer capacity.
    InvalidLength,
    /// Device address does not fit in 7 bits.
    InvalidAddress(u8),
    /// The hardware reported an event the current state does not accept.
    UnexpectedEvent { state: BusState, event: BusEvent },
    /// No completing event arrived within the configured tick budget.
    Timeout,
    /// The engine's sleep vote could not be placed or released.
    Arbiter(ArbiterError),
}

impl core::fmt::Display for BusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BusError::Busy => write!(f, "bus transaction already in progress"),
            BusError::InvalidLength => write!(f, "transfer length out of range"),
            BusError::InvalidAddress(addr) => write!(f, "invalid 7-bit address {addr:#04x}"),
            BusError::UnexpectedEvent { state, event } => {
                write!(f, "unexpected {event:?} in state {state:?}")
            }
            BusError::Timeout => write!(f, "bus transaction timed out"),
            BusError::Arbiter(e) => write!(f, "bus sleep vote: {e}"),
        }
    }
}

impl From<ArbiterError> for BusError {
    fn from(e: ArbiterError) -> Self {
        BusError::Arbiter(e)
    }
}

/// Timer interrupt misconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerError {
    /// A source fired that was never enabled.
    UnexpectedSource(TimerSource),
    /// The timer's sleep vote could not be placed or released.
    Arbiter(ArbiterError),
}

impl core::fmt::Display for TimerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TimerError::UnexpectedSource(src) => {
                write!(f, "interrupt from disabled timer source {src:?}")
            }
            TimerError::Arbiter(e) => write!(f, "timer sleep vote: {e}"),
        }
    }
}

impl From<ArbiterError> for TimerError {
    fn from(e: ArbiterError) -> Self {
        TimerError::Arbiter(e)
    }
}

/// Any fault the core can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    Arbiter(ArbiterError),
    Bus(BusError),
    Timer(TimerError),
}

impl core::fmt::Display for Fault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Fault::Arbiter(e) => write!(f, "arbiter: {e}"),
            Fault::Bus(e) => write!(f, "bus: {e}"),
            Fault::Timer(e) => write!(f, "timer: {e}"),
        }
    }
}

impl From<ArbiterError> for Fault {
    fn from(e: ArbiterError) -> Self {
        Fault::Arbiter(e)
    }
}

impl From<BusError> for Fault {
    fn from(e: BusError) -> Self {
        Fault::Bus(e)
    }
}

impl From<TimerError> for Fault {
    fn from(e: TimerError) -> Self {
        Fault::Timer(e)
    }
}

/// Turns a detected fault into a halt.
///
/// Every fault in this crate signals a programming or wiring defect, never a
/// transient condition, so the firmware default is to stop at the first one.
/// On target the panic handler decides what a halt looks like (breakpoint,
/// LED, reset). Host tests match on the `Result` instead.
pub trait FailFast<T> {
    /// Returns the success value or panics with the fault's message.
    fn fail_fast(self) -> T;
}

impl<T, E: core::fmt::Display> FailFast<T> for Result<T, E> {
    #[track_caller]
    fn fail_fast(self) -> T {
        match self {
            Ok(v) => v,
            Err(e) => panic!("fault: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_fast_passes_success_through() {
        let ok: Result<u8, BusError> = Ok(7);
        assert_eq!(ok.fail_fast(), 7);
    }

    #[test]
    #[should_panic(expected = "unbalanced unblock")]
    fn fail_fast_panics_with_fault_message() {
        let err: Result<(), ArbiterError> = Err(ArbiterError::Underflow(EnergyMode::Em2));
        err.fail_fast();
    }

    #[test]
    fn fault_wraps_component_errors() {
        assert_eq!(Fault::from(BusError::Busy), Fault::Bus(BusError::Busy));
        assert_eq!(
            BusError::from(ArbiterError::Overflow(EnergyMode::Em0)),
            BusError::Arbiter(ArbiterError::Overflow(EnergyMode::Em0))
        );
    }
}
