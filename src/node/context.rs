use crate::node::{
    bus::{BusConfig, BusEngine, BusPeripheral, Transfer},
    energy::{Arbiter, EnergyMode, SleepControl},
    error::BusError,
    events::Events,
    scheduler::Scheduler,
};

/// Scheduler, arbiter and bus engine of one node, wired together.
///
/// Everything takes `&self`, so a node can be a `static` shared by the main
/// loop and the interrupt handlers, or a local owned by `main` in tests.
/// Components can also be used on their own; a node is just the usual
/// wiring.
pub struct Node<P, const N: usize> {
    scheduler: Scheduler,
    arbiter: Arbiter,
    bus: BusEngine<P, N>,
}

impl<P: BusPeripheral, const N: usize> Node<P, N> {
    pub const fn new(peripheral: P, config: BusConfig) -> Self {
        Self {
            scheduler: Scheduler::new(),
            arbiter: Arbiter::new(),
            bus: BusEngine::new(peripheral, config),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn arbiter(&self) -> &Arbiter {
        &self.arbiter
    }

    pub fn bus(&self) -> &BusEngine<P, N> {
        &self.bus
    }

    /// Resets pending events and sleep votes. Call once during start-up,
    /// before enabling interrupts that post events or place votes.
    pub fn open(&self) {
        self.scheduler.open();
        self.arbiter.open();
    }

    /// Sleeps if no work is pending.
    ///
    /// The pending check and the choice of mode happen in one critical
    /// section; the core halts after leaving it. Returns the mode entered.
    pub fn idle(&self, sleep: &mut impl SleepControl) -> Option<EnergyMode> {
        let target = critical_section::with(|cs| {
            if !self.scheduler.pending_in(cs).is_empty() {
                return None;
            }
            self.arbiter.sleep_target_in(cs)
        });
        if let Some(mode) = target {
            sleep.enter(mode);
        }
        target
    }

    /// Runs `handler` for each pending event, lowest bit first.
    pub fn dispatch(&self, handler: impl FnMut(Events)) -> Events {
        self.scheduler.drain(handler)
    }

    /// One main-loop iteration: sleep if idle, then dispatch.
    pub fn run_once(
        &self,
        sleep: &mut impl SleepControl,
        handler: impl FnMut(Events),
    ) -> Events {
        self.idle(sleep);
        self.dispatch(handler)
    }

    pub fn start_transfer(&self, transfer: Transfer<'_>) -> Result<(), BusError> {
        self.bus.start(&self.arbiter, transfer)
    }

    /// Body of the platform's bus interrupt handler.
    pub fn bus_interrupt(&self) -> Result<(), BusError> {
        self.bus.on_interrupt(&self.scheduler, &self.arbiter)
    }

    /// Forwards a timeout tick to the bus engine.
    pub fn bus_tick(&self) -> Result<(), BusError> {
        self.bus.tick(&self.arbiter)
    }
}
