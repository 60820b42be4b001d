use crate::node::{
    bus::{BusConfig, BusPeripheral},
    context::Node,
    energy::EnergyMode,
};

/// Fluent construction of a [`Node`].
///
/// ```
/// # use sensor_node_core::node::{NodeBuilder, bus::{BusFlags, BusPeripheral}};
/// # struct Twi;
/// # impl BusPeripheral for Twi {
/// #     fn take_flags(&mut self) -> BusFlags { BusFlags::NONE }
/// #     fn start(&mut self, _: u8) {}
/// #     fn write(&mut self, _: u8) {}
/// #     fn read(&mut self) -> u8 { 0 }
/// #     fn ack(&mut self) {}
/// #     fn nack(&mut self) {}
/// #     fn stop(&mut self) {}
/// #     fn abort(&mut self) {}
/// # }
/// let node = NodeBuilder::new(Twi)
///     .buffer_capacity::<2>()
///     .timeout_ticks(4)
///     .build();
/// node.open();
/// assert!(!node.bus().is_busy());
/// ```
pub struct NodeBuilder<P, const N: usize> {
    peripheral: P,
    config: BusConfig,
}

impl<P: BusPeripheral> NodeBuilder<P, 0> {
    pub fn new(peripheral: P) -> Self {
        NodeBuilder {
            peripheral,
            config: BusConfig::new(),
        }
    }

    /// Sets the bus data buffer capacity in bytes.
    pub fn buffer_capacity<const N: usize>(self) -> NodeBuilder<P, N> {
        NodeBuilder {
            peripheral: self.peripheral,
            config: self.config,
        }
    }
}

impl<P: BusPeripheral, const N: usize> NodeBuilder<P, N> {
    /// Mode the bus vetoes while a transaction is outstanding.
    pub fn block_mode(mut self, mode: EnergyMode) -> Self {
        self.config.block_mode = mode;
        self
    }

    /// Abandon transactions after `ticks` calls to [`Node::bus_tick`].
    pub fn timeout_ticks(mut self, ticks: u16) -> Self {
        self.config.timeout_ticks = Some(ticks);
        self
    }

    /// # Panics
    /// Panics if the buffer capacity is zero.
    pub fn build(self) -> Node<P, N> {
        assert!(N > 0, "bus buffer capacity must be at least one byte");
        Node::new(self.peripheral, self.config)
    }
}
