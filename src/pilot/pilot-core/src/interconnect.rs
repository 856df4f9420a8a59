use heapless::spsc::Queue;

use crate::control::{DecodedInst, InterruptCond};

/// Single-slot channel between two pipeline stages
///
/// A full slot is the "ready" level of the handshake: the producer may only fill
/// an empty slot and the consumer empties it when it takes the value.
pub struct Slot<T> {
    cell: Queue<T, 2>, // capacity N - 1, so exactly one value
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self { cell: Queue::new() }
    }

    /// Publishes `value` if the slot is empty
    pub fn offer(&mut self, value: T) -> bool {
        self.cell.enqueue(value).is_ok()
    }

    /// Publishes `value`, replacing anything not yet consumed
    pub fn force(&mut self, value: T) {
        self.cell.dequeue();
        // The slot was just emptied, so this cannot fail
        let _ = self.cell.enqueue(value);
    }

    pub fn take(&mut self) -> Option<T> {
        self.cell.dequeue()
    }

    pub fn peek(&self) -> Option<&T> {
        self.cell.peek()
    }

    pub fn clear(&mut self) {
        self.cell.dequeue();
    }

    pub fn is_full(&self) -> bool {
        !self.cell.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.cell.is_empty()
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Instruction word tagged with the address it was fetched from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchedWord {
    pub word: u16,
    pub addr: u32,
}

/// All handshake lines between the stages
#[derive(Default)]
pub struct Interconnect {
    pub fetched: Slot<FetchedWord>,
    pub decoded: Slot<DecodedInst>,
    pub execute_branch: Slot<u32>,
    pub predicted_branch: Slot<u32>,
    pub resteer: Slot<u32>, // execute -> decode flush with the new stream address
    pub memory_backoff: bool,
    pub interrupt_request: Option<InterruptCond>,
}

/// Lines the fetch unit may touch
pub struct FetchPorts<'a> {
    pub word_out: &'a mut Slot<FetchedWord>,
    pub execute_branch: &'a mut Slot<u32>,
    pub predicted_branch: &'a mut Slot<u32>,
    pub memory_backoff: bool,
}

/// Lines the decode unit may touch
pub struct DecodePorts<'a> {
    pub word_in: &'a mut Slot<FetchedWord>,
    pub inst_out: &'a mut Slot<DecodedInst>,
    pub predicted_branch: &'a mut Slot<u32>,
    pub resteer: &'a mut Slot<u32>,
    pub execute_branch_pending: bool,
    pub interrupt_request: Option<InterruptCond>,
}

/// Lines the execute unit may touch
pub struct ExecutePorts<'a> {
    pub inst_in: &'a mut Slot<DecodedInst>,
    pub execute_branch: &'a mut Slot<u32>,
    pub resteer: &'a mut Slot<u32>,
    pub memory_backoff: &'a mut bool,
    pub interrupt_request: &'a mut Option<InterruptCond>,
}

impl Interconnect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn fetch_ports(&mut self) -> FetchPorts<'_> {
        FetchPorts {
            word_out: &mut self.fetched,
            execute_branch: &mut self.execute_branch,
            predicted_branch: &mut self.predicted_branch,
            memory_backoff: self.memory_backoff,
        }
    }

    pub fn decode_ports(&mut self) -> DecodePorts<'_> {
        DecodePorts {
            word_in: &mut self.fetched,
            inst_out: &mut self.decoded,
            predicted_branch: &mut self.predicted_branch,
            resteer: &mut self.resteer,
            execute_branch_pending: self.execute_branch.is_full(),
            interrupt_request: self.interrupt_request,
        }
    }

    pub fn execute_ports(&mut self) -> ExecutePorts<'_> {
        ExecutePorts {
            inst_in: &mut self.decoded,
            execute_branch: &mut self.execute_branch,
            resteer: &mut self.resteer,
            memory_backoff: &mut self.memory_backoff,
            interrupt_request: &mut self.interrupt_request,
        }
    }
}
