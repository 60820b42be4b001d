use heapless::Vec;

use crate::node::{error::BusError, events::Events};

/// Transfer direction as encoded in the address byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Write = 0,
    Read = 1,
}

/// Protocol phase of the bus engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusState {
    /// No transaction outstanding.
    Idle,
    /// Start condition and address byte sent, waiting for the address ack.
    RequestResource,
    /// Command byte sent (and, for reads, the repeated start that follows it).
    CommandTransmit,
    /// Payload bytes moving.
    DataPhase,
    /// Stop condition requested, waiting for the bus to release.
    Stop,
}

/// Hardware event fed into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusEvent {
    /// The addressed device acknowledged the last byte.
    Ack,
    /// The addressed device rejected the last byte.
    Nack,
    /// A byte arrived from the device.
    Received(u8),
    /// The stop condition completed.
    Stopped,
}

/// Side effect the engine applies after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusAction {
    /// Wait for the next hardware event.
    None,
    /// Transmit one byte.
    Write(u8),
    /// Issue a repeated start followed by the given address byte.
    Restart(u8),
    /// Acknowledge the received byte to request another.
    Ack,
    /// Reject the final received byte and release the bus.
    NackThenStop,
    /// Release the bus.
    Stop,
    /// Transaction finished; post these events.
    Complete(Events),
}

/// Builds the address byte: 7-bit address followed by the direction bit.
#[inline]
pub const fn address_byte(address: u8, direction: Direction) -> u8 {
    (address << 1) | direction as u8
}

/// A request to the bus engine.
///
/// ```
/// use sensor_node_core::node::{Events, bus::{Direction, Transfer}};
///
/// let done = Events::from_bits(0x20);
/// let t = Transfer::read(0x40, 2, done).with_command(0xE5);
/// assert_eq!(t.direction, Direction::Read);
/// assert_eq!(t.len, 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer<'a> {
    /// 7-bit device address.
    pub address: u8,
    pub direction: Direction,
    /// Register or command byte sent before the payload.
    pub command: Option<u8>,
    /// Bytes to send. Empty for reads.
    pub data: &'a [u8],
    /// Bytes to move in the data phase.
    pub len: usize,
    /// Posted to the scheduler when the stop condition completes.
    pub completion: Events,
}

impl<'a> Transfer<'a> {
    pub const fn read(address: u8, len: usize, completion: Events) -> Self {
        Self {
            address,
            direction: Direction::Read,
            command: None,
            data: &[],
            len,
            completion,
        }
    }

    pub const fn write(address: u8, data: &'a [u8], completion: Events) -> Self {
        Self {
            address,
            direction: Direction::Write,
            command: None,
            data,
            len: data.len(),
            completion,
        }
    }

    pub const fn with_command(mut self, command: u8) -> Self {
        self.command = Some(command);
        self
    }
}

/// The single in-flight transaction of a bus engine.
///
/// `advance` is the whole protocol: it maps `(state, event)` to the next
/// state plus the action to perform, without touching hardware.
pub(crate) struct Transaction<const N: usize> {
    pub(crate) state: BusState,
    address: u8,
    direction: Direction,
    command: Option<u8>,
    restarted: bool,
    expected: usize,
    transferred: usize,
    pub(crate) buffer: Vec<u8, N>,
    /// Bytes of the last read that reached its stop condition. Only a
    /// completed read replaces it.
    pub(crate) last_read: Vec<u8, N>,
    completion: Events,
    pub(crate) ticks: u16,
}

impl<const N: usize> Transaction<N> {
    pub(crate) const fn new() -> Self {
        Self {
            state: BusState::Idle,
            address: 0,
            direction: Direction::Write,
            command: None,
            restarted: false,
            expected: 0,
            transferred: 0,
            buffer: Vec::new(),
            last_read: Vec::new(),
            completion: Events::NONE,
            ticks: 0,
        }
    }

    /// Validates `t` and loads it. Returns the first address byte to send.
    ///
    /// Leaves `self` untouched on error.
    pub(crate) fn begin(&mut self, t: &Transfer<'_>) -> Result<u8, BusError> {
        if self.state != BusState::Idle {
            return Err(BusError::Busy);
        }
        if t.address > 0x7F {
            return Err(BusError::InvalidAddress(t.address));
        }
        let len_ok = match t.direction {
            Direction::Read => t.len > 0 && t.len <= N && t.data.is_empty(),
            Direction::Write => t.len == t.data.len() && t.len <= N,
        };
        if !len_ok {
            return Err(BusError::InvalidLength);
        }

        self.buffer.clear();
        if t.direction == Direction::Write {
            self.buffer
                .extend_from_slice(t.data)
                .map_err(|_| BusError::InvalidLength)?;
        }
        self.address = t.address;
        self.direction = t.direction;
        self.command = t.command;
        self.restarted = false;
        self.expected = t.len;
        self.transferred = 0;
        self.completion = t.completion;
        self.ticks = 0;
        self.state = BusState::RequestResource;

        // A command is always written, so a read with a command starts as a
        // write and turns around after the command byte.
        let first = match self.command {
            Some(_) => Direction::Write,
            None => self.direction,
        };
        Ok(address_byte(self.address, first))
    }

    /// Drops the transaction and any partial data. The last completed read
    /// survives.
    pub(crate) fn reset(&mut self) {
        self.state = BusState::Idle;
        self.buffer.clear();
        self.restarted = false;
        self.expected = 0;
        self.transferred = 0;
        self.completion = Events::NONE;
        self.ticks = 0;
    }

    pub(crate) fn advance(&mut self, event: BusEvent) -> Result<BusAction, BusError> {
        match (self.state, event) {
            (BusState::RequestResource, BusEvent::Ack) => match self.command {
                Some(command) => {
                    self.state = BusState::CommandTransmit;
                    Ok(BusAction::Write(command))
                }
                None => Ok(self.enter_data_phase()),
            },
            (BusState::CommandTransmit, BusEvent::Ack) => match self.direction {
                Direction::Read if !self.restarted => {
                    self.restarted = true;
                    Ok(BusAction::Restart(address_byte(self.address, Direction::Read)))
                }
                Direction::Read | Direction::Write => Ok(self.enter_data_phase()),
            },
            (BusState::DataPhase, BusEvent::Received(byte))
                if self.direction == Direction::Read =>
            {
                self.buffer.push(byte).map_err(|_| BusError::InvalidLength)?;
                self.transferred += 1;
                if self.transferred < self.expected {
                    Ok(BusAction::Ack)
                } else {
                    self.state = BusState::Stop;
                    Ok(BusAction::NackThenStop)
                }
            }
            (BusState::DataPhase, BusEvent::Ack) if self.direction == Direction::Write => {
                Ok(self.next_write())
            }
            (BusState::Stop, BusEvent::Stopped) => {
                self.state = BusState::Idle;
                if self.direction == Direction::Read {
                    self.last_read = self.buffer.clone();
                }
                Ok(BusAction::Complete(self.completion))
            }
            (state, event) => Err(BusError::UnexpectedEvent { state, event }),
        }
    }

    fn enter_data_phase(&mut self) -> BusAction {
        match self.direction {
            Direction::Read => {
                self.state = BusState::DataPhase;
                BusAction::None
            }
            Direction::Write => self.next_write(),
        }
    }

    fn next_write(&mut self) -> BusAction {
        match self.buffer.get(self.transferred) {
            Some(&byte) => {
                self.transferred += 1;
                self.state = BusState::DataPhase;
                BusAction::Write(byte)
            }
            None => {
                self.state = BusState::Stop;
                BusAction::Stop
            }
        }
    }
}
