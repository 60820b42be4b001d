//! Interrupt-driven bus master.
//!
//! The [`transaction`] module holds the protocol as a pure state machine;
//! [`BusEngine`] wraps it in a critical section together with the
//! [`BusPeripheral`] it drives, the sleep vote and the completion post.

pub mod engine;
pub mod peripheral;
pub mod transaction;

pub use engine::{BusConfig, BusEngine};
pub use peripheral::{BusFlags, BusPeripheral};
pub use transaction::{BusAction, BusEvent, BusState, Direction, Transfer, address_byte};
