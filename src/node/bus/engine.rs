use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};

use crate::node::{
    bus::{
        peripheral::{BusFlags, BusPeripheral},
        transaction::{BusAction, BusEvent, BusState, Transaction, Transfer},
    },
    energy::{Arbiter, EnergyMode},
    error::BusError,
    scheduler::Scheduler,
};

/// Bus engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Mode voted against for the duration of a transaction. The bus clock
    /// stops below `Em1`, so by default `Em2` and deeper are vetoed.
    pub block_mode: EnergyMode,
    /// Abandon a transaction after this many [`BusEngine::tick`] calls.
    /// `None` waits forever.
    pub timeout_ticks: Option<u16>,
}

impl BusConfig {
    pub const fn new() -> Self {
        Self {
            block_mode: EnergyMode::Em2,
            timeout_ticks: None,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner<P, const N: usize> {
    peripheral: P,
    config: BusConfig,
    tx: Transaction<N>,
}

/// Interrupt-driven bus master running one transaction at a time.
///
/// `N` is the data buffer capacity in bytes. The engine owns its buffers: a
/// write copies its payload in at [`start`](Self::start), and a completed
/// read is kept aside until the next completed read, to be read back with
/// [`with_data`](Self::with_data) even after another transaction started.
pub struct BusEngine<P, const N: usize> {
    inner: Mutex<RefCell<Inner<P, N>>>,
}

impl<P: BusPeripheral, const N: usize> BusEngine<P, N> {
    pub const fn new(peripheral: P, config: BusConfig) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                peripheral,
                config,
                tx: Transaction::new(),
            })),
        }
    }

    /// Starts a transaction.
    ///
    /// Places the configured sleep vote, sends the start condition and the
    /// address byte, and enters [`BusState::RequestResource`]. Fails with
    /// [`BusError::Busy`] while another transaction is outstanding, leaving
    /// that transaction untouched.
    pub fn start(&self, arbiter: &Arbiter, transfer: Transfer<'_>) -> Result<(), BusError> {
        critical_section::with(|cs| self.start_in(cs, arbiter, transfer))
    }

    /// [`start`](Self::start) for callers already inside a critical section.
    pub fn start_in(
        &self,
        cs: CriticalSection<'_>,
        arbiter: &Arbiter,
        transfer: Transfer<'_>,
    ) -> Result<(), BusError> {
        let mut inner = self.inner.borrow_ref_mut(cs);
        if inner.tx.state != BusState::Idle {
            return Err(BusError::Busy);
        }

        arbiter.block_in(cs, inner.config.block_mode)?;
        let header = match inner.tx.begin(&transfer) {
            Ok(header) => header,
            Err(e) => {
                arbiter.unblock_in(cs, inner.config.block_mode)?;
                return Err(e);
            }
        };

        #[cfg(feature = "defmt")]
        defmt::trace!(
            "bus start addr={=u8:#x} dir={} len={=usize}",
            transfer.address,
            transfer.direction,
            transfer.len
        );

        inner.peripheral.start(header);
        Ok(())
    }

    /// Bus interrupt entry point.
    ///
    /// Takes the latched flags and feeds them to the state machine in a
    /// fixed order: ack, nack, received data, stop. On completion the
    /// transfer's completion events are posted and the sleep vote released.
    /// On any protocol violation the peripheral is aborted, the transaction
    /// dropped, the vote released and the violation returned.
    pub fn on_interrupt(&self, scheduler: &Scheduler, arbiter: &Arbiter) -> Result<(), BusError> {
        critical_section::with(|cs| self.on_interrupt_in(cs, scheduler, arbiter))
    }

    /// [`on_interrupt`](Self::on_interrupt) for callers already inside a
    /// critical section.
    pub fn on_interrupt_in(
        &self,
        cs: CriticalSection<'_>,
        scheduler: &Scheduler,
        arbiter: &Arbiter,
    ) -> Result<(), BusError> {
        let mut inner = self.inner.borrow_ref_mut(cs);
        let flags = inner.peripheral.take_flags();

        if flags.contains(BusFlags::ACK) {
            inner.step(cs, scheduler, arbiter, BusEvent::Ack)?;
        }
        if flags.contains(BusFlags::NACK) {
            inner.step(cs, scheduler, arbiter, BusEvent::Nack)?;
        }
        if flags.contains(BusFlags::RXDATAV) {
            let byte = inner.peripheral.read();
            inner.step(cs, scheduler, arbiter, BusEvent::Received(byte))?;
        }
        if flags.contains(BusFlags::MSTOP) {
            inner.step(cs, scheduler, arbiter, BusEvent::Stopped)?;
        }
        Ok(())
    }

    /// Advances the timeout counter of the outstanding transaction.
    ///
    /// Call from a periodic event. With [`BusConfig::timeout_ticks`] set, a
    /// transaction still outstanding after that many ticks is aborted like a
    /// protocol violation and [`BusError::Timeout`] is returned.
    pub fn tick(&self, arbiter: &Arbiter) -> Result<(), BusError> {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let Some(limit) = inner.config.timeout_ticks else {
                return Ok(());
            };
            if inner.tx.state == BusState::Idle {
                return Ok(());
            }

            inner.tx.ticks = inner.tx.ticks.saturating_add(1);
            if inner.tx.ticks >= limit {
                return Err(inner.fault(cs, arbiter, BusError::Timeout));
            }
            Ok(())
        })
    }

    /// True while a transaction is outstanding.
    pub fn is_busy(&self) -> bool {
        self.state() != BusState::Idle
    }

    pub fn state(&self) -> BusState {
        critical_section::with(|cs| self.inner.borrow_ref(cs).tx.state)
    }

    pub fn config(&self) -> BusConfig {
        critical_section::with(|cs| self.inner.borrow_ref(cs).config)
    }

    /// Reads the bytes of the last completed read, in arrival order, inside
    /// a critical section.
    ///
    /// Empty until a read completes. Writes, aborted transactions and reads
    /// still in flight leave it unchanged.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        critical_section::with(|cs| f(self.inner.borrow_ref(cs).tx.last_read.as_slice()))
    }

    /// Gives the board layer access to the peripheral, e.g. to enable
    /// interrupts after reset.
    pub fn with_peripheral<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs).peripheral))
    }
}

impl<P: BusPeripheral, const N: usize> Inner<P, N> {
    fn step(
        &mut self,
        cs: CriticalSection<'_>,
        scheduler: &Scheduler,
        arbiter: &Arbiter,
        event: BusEvent,
    ) -> Result<(), BusError> {
        let action = match self.tx.advance(event) {
            Ok(action) => action,
            Err(e) => return Err(self.fault(cs, arbiter, e)),
        };

        match action {
            BusAction::None => {}
            BusAction::Write(byte) => self.peripheral.write(byte),
            BusAction::Restart(header) => self.peripheral.start(header),
            BusAction::Ack => self.peripheral.ack(),
            BusAction::NackThenStop => {
                self.peripheral.nack();
                self.peripheral.stop();
            }
            BusAction::Stop => self.peripheral.stop(),
            BusAction::Complete(events) => {
                #[cfg(feature = "defmt")]
                defmt::trace!("bus complete, posting {=u32:#x}", events.bits());
                scheduler.post_in(cs, events);
                arbiter.unblock_in(cs, self.config.block_mode)?;
            }
        }
        Ok(())
    }

    /// Drops the transaction after a fault and returns the fault.
    fn fault(&mut self, cs: CriticalSection<'_>, arbiter: &Arbiter, error: BusError) -> BusError {
        #[cfg(feature = "defmt")]
        defmt::warn!("bus fault in {}: {}", self.tx.state, error);

        self.peripheral.abort();
        self.tx.reset();
        // Release failure means someone else unbalanced the table; `error` wins
        if let Err(_imbalance) = arbiter.unblock_in(cs, self.config.block_mode) {
            #[cfg(feature = "defmt")]
            defmt::warn!("vote release failed after bus fault: {}", _imbalance);
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{
        error::ArbiterError,
        events::Events,
        test_support::{FakeBus, Op},
    };

    const EVT: Events = Events::from_bits(0x20);
    const OTHER: Events = Events::from_bits(0x10);

    type TestEngine = BusEngine<FakeBus, 4>;

    fn engine() -> TestEngine {
        BusEngine::new(FakeBus::new(), BusConfig::default())
    }

    fn fire(engine: &TestEngine, scheduler: &Scheduler, arbiter: &Arbiter, flags: BusFlags) {
        engine.with_peripheral(|p| p.latch(flags));
        engine.on_interrupt(scheduler, arbiter).unwrap();
    }

    fn fire_byte(engine: &TestEngine, scheduler: &Scheduler, arbiter: &Arbiter, byte: u8) {
        engine.with_peripheral(|p| p.latch_byte(byte));
        engine.on_interrupt(scheduler, arbiter).unwrap();
    }

    #[test]
    fn full_read_transaction() {
        let scheduler = Scheduler::new();
        let arbiter = Arbiter::new();
        let engine = engine();

        assert_eq!(engine.state(), BusState::Idle);
        engine
            .start(&arbiter, Transfer::read(0x40, 2, EVT))
            .unwrap();
        assert_eq!(engine.state(), BusState::RequestResource);
        assert!(engine.is_busy());
        assert_eq!(arbiter.current_blocked_depth(), EnergyMode::Em2);

        fire(&engine, &scheduler, &arbiter, BusFlags::ACK);
        assert_eq!(engine.state(), BusState::DataPhase);

        fire_byte(&engine, &scheduler, &arbiter, 0x66);
        assert_eq!(engine.state(), BusState::DataPhase);
        fire_byte(&engine, &scheduler, &arbiter, 0x4E);
        assert_eq!(engine.state(), BusState::Stop);
        assert!(scheduler.pending().is_empty());

        fire(&engine, &scheduler, &arbiter, BusFlags::MSTOP);
        assert_eq!(engine.state(), BusState::Idle);
        assert!(!engine.is_busy());
        assert_eq!(scheduler.pending(), EVT);
        assert_eq!(arbiter.current_blocked_depth(), EnergyMode::Em4);

        engine.with_data(|data| assert_eq!(data, &[0x66, 0x4E]));
        engine.with_peripheral(|p| {
            assert_eq!(
                p.ops.as_slice(),
                &[
                    Op::Start(0x81),
                    Op::Read,
                    Op::Ack,
                    Op::Read,
                    Op::Nack,
                    Op::Stop,
                ]
            );
        });
    }

    #[test]
    fn completion_is_posted_exactly_once() {
        let scheduler = Scheduler::new();
        let arbiter = Arbiter::new();
        let engine = engine();

        engine
            .start(&arbiter, Transfer::read(0x40, 1, EVT))
            .unwrap();
        fire(&engine, &scheduler, &arbiter, BusFlags::ACK);
        fire_byte(&engine, &scheduler, &arbiter, 0x01);
        fire(&engine, &scheduler, &arbiter, BusFlags::MSTOP);

        let mut runs = 0;
        scheduler.drain(|event| {
            assert_eq!(event, EVT);
            runs += 1;
        });
        assert_eq!(runs, 1);

        // A stray stop afterwards is a violation, not a second completion
        engine.with_peripheral(|p| p.latch(BusFlags::MSTOP));
        assert!(engine.on_interrupt(&scheduler, &arbiter).is_err());
        assert!(scheduler.pending().is_empty());
    }

    #[test]
    fn start_while_busy_is_rejected_without_side_effects() {
        let scheduler = Scheduler::new();
        let arbiter = Arbiter::new();
        let engine = engine();

        engine
            .start(&arbiter, Transfer::read(0x40, 2, EVT))
            .unwrap();
        fire(&engine, &scheduler, &arbiter, BusFlags::ACK);
        fire_byte(&engine, &scheduler, &arbiter, 0xAB);
        engine.with_data(|data| assert!(data.is_empty()));

        let ops_before = engine.with_peripheral(|p| p.ops.len());
        assert_eq!(
            engine.start(&arbiter, Transfer::write(0x41, &[1], OTHER)),
            Err(BusError::Busy)
        );

        assert_eq!(engine.state(), BusState::DataPhase);
        assert_eq!(arbiter.votes(EnergyMode::Em2), 1);
        assert_eq!(engine.with_peripheral(|p| p.ops.len()), ops_before);

        // In-flight transaction completes with its own completion event
        fire_byte(&engine, &scheduler, &arbiter, 0xCD);
        fire(&engine, &scheduler, &arbiter, BusFlags::MSTOP);
        assert_eq!(scheduler.pending(), EVT);
        assert_eq!(arbiter.votes(EnergyMode::Em2), 0);
        engine.with_data(|data| assert_eq!(data, &[0xAB, 0xCD]));
    }

    #[test]
    fn completed_read_outlives_next_start() {
        let scheduler = Scheduler::new();
        let arbiter = Arbiter::new();
        let engine = engine();

        engine
            .start(&arbiter, Transfer::read(0x40, 2, EVT))
            .unwrap();
        fire(&engine, &scheduler, &arbiter, BusFlags::ACK);
        fire_byte(&engine, &scheduler, &arbiter, 0x80);
        fire_byte(&engine, &scheduler, &arbiter, 0x80);
        fire(&engine, &scheduler, &arbiter, BusFlags::MSTOP);

        engine
            .start(&arbiter, Transfer::read(0x40, 2, EVT))
            .unwrap();
        fire(&engine, &scheduler, &arbiter, BusFlags::ACK);
        fire_byte(&engine, &scheduler, &arbiter, 0x01);
        engine.with_data(|data| assert_eq!(data, &[0x80, 0x80]));

        // A fault drops the in-flight read, not the completed one
        engine.with_peripheral(|p| p.latch(BusFlags::NACK));
        assert!(engine.on_interrupt(&scheduler, &arbiter).is_err());
        engine.with_data(|data| assert_eq!(data, &[0x80, 0x80]));
    }

    #[test]
    fn completed_write_does_not_replace_read_data() {
        let scheduler = Scheduler::new();
        let arbiter = Arbiter::new();
        let engine = engine();

        engine
            .start(&arbiter, Transfer::write(0x40, &[0x12, 0x34], OTHER))
            .unwrap();
        for _ in 0..3 {
            fire(&engine, &scheduler, &arbiter, BusFlags::ACK);
        }
        fire(&engine, &scheduler, &arbiter, BusFlags::MSTOP);

        assert_eq!(scheduler.pending(), OTHER);
        engine.with_data(|data| assert!(data.is_empty()));
    }

    #[test]
    fn completion_is_posted_even_if_vote_release_fails() {
        let scheduler = Scheduler::new();
        let arbiter = Arbiter::new();
        let engine = engine();

        engine
            .start(&arbiter, Transfer::read(0x40, 1, EVT))
            .unwrap();
        fire(&engine, &scheduler, &arbiter, BusFlags::ACK);
        fire_byte(&engine, &scheduler, &arbiter, 0x42);
        // Someone else released the engine's vote
        arbiter.unblock(EnergyMode::Em2).unwrap();

        engine.with_peripheral(|p| p.latch(BusFlags::MSTOP));
        assert_eq!(
            engine.on_interrupt(&scheduler, &arbiter),
            Err(BusError::Arbiter(ArbiterError::Underflow(EnergyMode::Em2)))
        );
        assert_eq!(scheduler.pending(), EVT);
        assert!(!engine.is_busy());
        engine.with_data(|data| assert_eq!(data, &[0x42]));
    }

    #[test]
    fn fault_reports_protocol_error_over_vote_imbalance() {
        let scheduler = Scheduler::new();
        let arbiter = Arbiter::new();
        let engine = engine();

        engine
            .start(&arbiter, Transfer::read(0x40, 2, EVT))
            .unwrap();
        arbiter.unblock(EnergyMode::Em2).unwrap();

        engine.with_peripheral(|p| p.latch(BusFlags::NACK));
        assert_eq!(
            engine.on_interrupt(&scheduler, &arbiter),
            Err(BusError::UnexpectedEvent {
                state: BusState::RequestResource,
                event: BusEvent::Nack,
            })
        );
        assert!(!engine.is_busy());
        assert_eq!(arbiter.votes(EnergyMode::Em2), 0);
    }

    #[test]
    fn invalid_request_releases_vote() {
        let arbiter = Arbiter::new();
        let engine = engine();

        assert_eq!(
            engine.start(&arbiter, Transfer::read(0x40, 9, EVT)),
            Err(BusError::InvalidLength)
        );
        assert_eq!(arbiter.votes(EnergyMode::Em2), 0);
        assert!(!engine.is_busy());
        engine.with_peripheral(|p| assert!(p.ops.is_empty()));
    }

    #[test]
    fn nack_aborts_and_resets() {
        let scheduler = Scheduler::new();
        let arbiter = Arbiter::new();
        let engine = engine();

        engine
            .start(&arbiter, Transfer::read(0x40, 2, EVT))
            .unwrap();
        engine.with_peripheral(|p| p.latch(BusFlags::NACK));

        assert_eq!(
            engine.on_interrupt(&scheduler, &arbiter),
            Err(BusError::UnexpectedEvent {
                state: BusState::RequestResource,
                event: BusEvent::Nack,
            })
        );
        assert_eq!(engine.state(), BusState::Idle);
        assert_eq!(arbiter.current_blocked_depth(), EnergyMode::Em4);
        assert!(scheduler.pending().is_empty());
        engine.with_peripheral(|p| assert_eq!(p.ops.last(), Some(&Op::Abort)));

        // Engine is usable again
        engine
            .start(&arbiter, Transfer::read(0x40, 2, EVT))
            .unwrap();
    }

    #[test]
    fn partial_data_is_dropped_on_fault() {
        let scheduler = Scheduler::new();
        let arbiter = Arbiter::new();
        let engine = engine();

        engine
            .start(&arbiter, Transfer::read(0x40, 2, EVT))
            .unwrap();
        fire(&engine, &scheduler, &arbiter, BusFlags::ACK);
        fire_byte(&engine, &scheduler, &arbiter, 0x12);

        // Stop before the second byte
        engine.with_peripheral(|p| p.latch(BusFlags::MSTOP));
        assert!(engine.on_interrupt(&scheduler, &arbiter).is_err());
        engine.with_data(|data| assert!(data.is_empty()));
    }

    #[test]
    fn write_with_command_sequence() {
        let scheduler = Scheduler::new();
        let arbiter = Arbiter::new();
        let engine = engine();

        engine
            .start(
                &arbiter,
                Transfer::write(0x40, &[0x3A], OTHER).with_command(0xE6),
            )
            .unwrap();
        fire(&engine, &scheduler, &arbiter, BusFlags::ACK);
        assert_eq!(engine.state(), BusState::CommandTransmit);
        fire(&engine, &scheduler, &arbiter, BusFlags::ACK);
        assert_eq!(engine.state(), BusState::DataPhase);
        fire(&engine, &scheduler, &arbiter, BusFlags::ACK);
        assert_eq!(engine.state(), BusState::Stop);
        fire(&engine, &scheduler, &arbiter, BusFlags::MSTOP);

        assert_eq!(scheduler.pending(), OTHER);
        engine.with_peripheral(|p| {
            assert_eq!(
                p.ops.as_slice(),
                &[
                    Op::Start(0x80),
                    Op::Write(0xE6),
                    Op::Write(0x3A),
                    Op::Stop,
                ]
            );
        });
    }

    #[test]
    fn flags_latched_together_are_processed_in_order() {
        let scheduler = Scheduler::new();
        let arbiter = Arbiter::new();
        let engine = engine();

        engine
            .start(&arbiter, Transfer::read(0x40, 1, EVT))
            .unwrap();
        // Address ack and the only data byte land in one interrupt
        engine.with_peripheral(|p| {
            p.latch(BusFlags::ACK);
            p.latch_byte(0x5A);
        });
        engine.on_interrupt(&scheduler, &arbiter).unwrap();
        assert_eq!(engine.state(), BusState::Stop);
    }

    #[test]
    fn timeout_disabled_by_default() {
        let arbiter = Arbiter::new();
        let engine = engine();

        engine
            .start(&arbiter, Transfer::read(0x40, 2, EVT))
            .unwrap();
        for _ in 0..1000 {
            engine.tick(&arbiter).unwrap();
        }
        assert!(engine.is_busy());
    }

    #[test]
    fn timeout_aborts_stalled_transaction() {
        let arbiter = Arbiter::new();
        let config = BusConfig {
            timeout_ticks: Some(3),
            ..BusConfig::default()
        };
        let engine: TestEngine = BusEngine::new(FakeBus::new(), config);

        // Ticks while idle do nothing
        engine.tick(&arbiter).unwrap();

        engine
            .start(&arbiter, Transfer::read(0x40, 2, EVT))
            .unwrap();
        engine.tick(&arbiter).unwrap();
        engine.tick(&arbiter).unwrap();
        assert_eq!(engine.tick(&arbiter), Err(BusError::Timeout));

        assert!(!engine.is_busy());
        assert_eq!(arbiter.votes(EnergyMode::Em2), 0);
        engine.with_peripheral(|p| assert_eq!(p.ops.last(), Some(&Op::Abort)));
    }

    #[test]
    fn custom_block_mode_is_voted() {
        let scheduler = Scheduler::new();
        let arbiter = Arbiter::new();
        let config = BusConfig {
            block_mode: EnergyMode::Em1,
            ..BusConfig::default()
        };
        let engine: TestEngine = BusEngine::new(FakeBus::new(), config);

        engine
            .start(&arbiter, Transfer::write(0x40, &[], EVT))
            .unwrap();
        assert_eq!(arbiter.current_blocked_depth(), EnergyMode::Em1);
        fire(&engine, &scheduler, &arbiter, BusFlags::ACK);
        fire(&engine, &scheduler, &arbiter, BusFlags::MSTOP);
        assert_eq!(arbiter.current_blocked_depth(), EnergyMode::Em4);
    }

    #[test]
    fn vote_overflow_prevents_start() {
        let arbiter = Arbiter::new();
        let engine = engine();
        for _ in 0..u8::MAX {
            arbiter.block(EnergyMode::Em2).unwrap();
        }

        assert_eq!(
            engine.start(&arbiter, Transfer::read(0x40, 2, EVT)),
            Err(BusError::Arbiter(ArbiterError::Overflow(EnergyMode::Em2)))
        );
        assert!(!engine.is_busy());
    }
}
