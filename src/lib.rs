//! A `no_std`, no-alloc concurrency core for battery-powered sensor nodes.
//!
//! Interrupt handlers hand work to a cooperative main loop, and the processor
//! sleeps in the deepest energy mode its active peripherals allow.
//!
//! # Features
//!
//! - **Event scheduler** - Bitmask mailbox from interrupt context to main loop
//! - **Energy-mode arbiter** - Reference-counted sleep vetoes per mode
//! - **Bus engine** - Interrupt-driven addressed bus transactions as a state machine
//! - **Si7021 driver** - Humidity measurement and decode on top of the bus engine
//! - **Periodic timer** - Timer interrupts turned into scheduler events
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  post   ┌──────────────┐  drain  ┌──────────────────┐
//! │ Timer ISR        │────────▶│  Scheduler   │────────▶│   Main loop      │
//! │ Bus ISR          │         │  (bitmask)   │         │                  │
//! └────────┬─────────┘         └──────────────┘         │  idle() ─┐       │
//!          │ block/unblock     ┌──────────────┐  mode   │          ▼       │
//!          └──────────────────▶│   Arbiter    │────────▶│  SleepControl    │
//!                              │ (vote table) │         └──────────────────┘
//!                              └──────────────┘
//! ```
//!
//! - **Producers** post events and place sleep votes from interrupt context
//! - **The main loop** sleeps while nothing is pending, then runs one handler per event
//! - **All shared state** lives behind `critical_section::Mutex`; every access takes a critical section
//!
//! Faults (unbalanced votes, bus protocol violations, unexpected interrupt
//! sources) come back as `Result`s. Firmware that wants the classic
//! assert-and-halt behavior calls [`FailFast::fail_fast`](node::FailFast::fail_fast).
//!
//! # Example
//!
//! ```rust,no_run
//! use sensor_node_core::prelude::*;
//! # struct Twi;
//! # impl BusPeripheral for Twi {
//! #     fn take_flags(&mut self) -> BusFlags { BusFlags::NONE }
//! #     fn start(&mut self, _: u8) {}
//! #     fn write(&mut self, _: u8) {}
//! #     fn read(&mut self) -> u8 { 0 }
//! #     fn ack(&mut self) {}
//! #     fn nack(&mut self) {}
//! #     fn stop(&mut self) {}
//! #     fn abort(&mut self) {}
//! # }
//!
//! const HUM_READ: Events = Events::from_bits(0x20);
//! const HUM_WRITE: Events = Events::from_bits(0x10);
//!
//! static NODE: Node<Twi, 2> = Node::new(Twi, BusConfig::new());
//!
//! // Bus interrupt handler
//! fn i2c0_irq() {
//!     NODE.bus_interrupt().fail_fast();
//! }
//!
//! let sensor = Si7021::new(Si7021Config { read_done: HUM_READ, write_done: HUM_WRITE });
//! NODE.open();
//! sensor.start_humidity_read(NODE.bus(), NODE.arbiter()).fail_fast();
//!
//! loop {
//!     NODE.run_once(&mut NoSleep, |event| {
//!         if event == HUM_READ {
//!             let _rh = sensor.decode_relative_humidity(NODE.bus());
//!         }
//!     });
//! #   i2c0_irq();
//! }
//! ```

#![deny(unsafe_code)]
#![no_std]

pub mod node;

pub mod prelude {
    pub use crate::node::prelude::*;
}
