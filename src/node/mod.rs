pub mod builder;
pub mod bus;
pub mod context;
pub mod energy;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod si7021;
pub mod timer;

#[cfg(test)]
mod test_support;

pub use builder::NodeBuilder;
pub use bus::{BusConfig, BusEngine, BusFlags, BusPeripheral, BusState, Direction, Transfer};
pub use context::Node;
pub use energy::{Arbiter, EnergyMode, NoSleep, SleepControl};
pub use error::{ArbiterError, BusError, FailFast, Fault, TimerError};
pub use events::Events;
pub use scheduler::Scheduler;
pub use si7021::{Si7021, Si7021Config};
pub use timer::{PeriodicTimer, TimerConfig, TimerFlags, TimerPeripheral, TimerSource};

pub mod prelude {
    pub use super::{
        Arbiter, ArbiterError, BusConfig, BusEngine, BusError, BusFlags, BusPeripheral, BusState,
        Direction, EnergyMode, Events, FailFast, Fault, NoSleep, Node, NodeBuilder,
        PeriodicTimer, Scheduler, Si7021, Si7021Config, SleepControl, TimerConfig, TimerError,
        TimerFlags, TimerPeripheral, TimerSource, Transfer,
    };
}
