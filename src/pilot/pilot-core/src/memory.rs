use log::{trace, warn};

use crate::constants::address_space::ADDRESS_MASK;

/// Handshake between the core and whatever sits on its memory bus
///
/// A request is only accepted while the controller is idle. `data_ready` reports
/// that the last accepted request has completed, and for reads `get_data` then
/// holds the value. Both stay valid until the next request is accepted.
pub trait MemoryController {
    fn read_assert(&mut self, is_16bit: bool, addr: u32) -> bool;
    fn write_assert(&mut self, is_16bit: bool, addr: u32, data: u16) -> bool;
    fn data_ready(&self) -> bool;
    fn get_data(&self) -> u16;
    /// Advances the controller by one half-cycle
    fn tick(&mut self);
}

/// Byte-addressed storage behind a bus controller
pub trait MemoryType {
    /// `None` when nothing is mapped at `addr`
    fn read(&self, addr: u32) -> Option<u8>;
    /// `false` when nothing is mapped at `addr`
    fn write(&mut self, addr: u32, value: u8) -> bool;
}

// Value seen on the data lines when nothing drives them
const OPEN_BUS: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusState {
    Ready,
    ReadBusy,
    WriteBusy,
}

/// Little-endian bus controller with optional wait states
pub struct BusController<T: MemoryType> {
    memory: T,
    state: BusState,
    addr: u32,
    data_in: u16,  // write data latched at assert time
    data_out: u16, // read data presented to the core
    is_16bit: bool,
    data_valid: bool,
    wait_states: u8,
    remaining: u8,
}

impl<T: MemoryType> BusController<T> {
    pub fn new(memory: T) -> Self {
        Self {
            memory,
            state: BusState::Ready,
            addr: 0,
            data_in: 0,
            data_out: 0,
            is_16bit: false,
            data_valid: false,
            wait_states: 0,
            remaining: 0,
        }
    }

    /// Adds `wait_states` extra half-cycles to every access
    pub fn with_wait_states(mut self, wait_states: u8) -> Self {
        self.wait_states = wait_states;
        self
    }

    pub fn memory(&self) -> &T {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut T {
        &mut self.memory
    }

    pub fn is_busy(&self) -> bool {
        self.state != BusState::Ready
    }

    #[allow(dead_code)]
    pub fn reset(&mut self) {
        self.state = BusState::Ready;
        self.data_valid = false;
        self.remaining = 0;
    }

    fn read_byte(&self, addr: u32) -> u8 {
        let addr = addr & ADDRESS_MASK;
        match self.memory.read(addr) {
            Some(value) => value,
            None => {
                warn!("Read from unmapped address {:06x}", addr);
                OPEN_BUS
            }
        }
    }

    fn write_byte(&mut self, addr: u32, value: u8) {
        let addr = addr & ADDRESS_MASK;
        if !self.memory.write(addr, value) {
            warn!("Write to unmapped address {:06x}", addr);
        }
    }

    fn complete(&mut self) {
        match self.state {
            BusState::ReadBusy => {
                let lo = self.read_byte(self.addr) as u16;
                self.data_out = if self.is_16bit {
                    lo | (self.read_byte(self.addr + 1) as u16) << 8
                } else {
                    lo
                };
                self.data_valid = true;
                trace!(
                    "RD{} [{:06x}] = {:04x}",
                    if self.is_16bit { 16 } else { 8 },
                    self.addr,
                    self.data_out
                );
            }
            BusState::WriteBusy => {
                self.write_byte(self.addr, self.data_in as u8);
                if self.is_16bit {
                    self.write_byte(self.addr + 1, (self.data_in >> 8) as u8);
                }
                self.data_valid = true;
                trace!(
                    "WR{} [{:06x}] = {:04x}",
                    if self.is_16bit { 16 } else { 8 },
                    self.addr,
                    self.data_in
                );
            }
            BusState::Ready => {}
        }
        self.state = BusState::Ready;
    }
}

impl<T: MemoryType> MemoryController for BusController<T> {
    fn read_assert(&mut self, is_16bit: bool, addr: u32) -> bool {
        if self.state != BusState::Ready {
            return false;
        }
        self.state = BusState::ReadBusy;
        self.addr = addr & ADDRESS_MASK;
        self.is_16bit = is_16bit;
        self.data_valid = false;
        self.remaining = self.wait_states;
        true
    }

    fn write_assert(&mut self, is_16bit: bool, addr: u32, data: u16) -> bool {
        if self.state != BusState::Ready {
            return false;
        }
        self.state = BusState::WriteBusy;
        self.addr = addr & ADDRESS_MASK;
        self.is_16bit = is_16bit;
        self.data_in = data;
        self.data_valid = false;
        self.remaining = self.wait_states;
        true
    }

    fn data_ready(&self) -> bool {
        self.state == BusState::Ready && self.data_valid
    }

    fn get_data(&self) -> u16 {
        self.data_out
    }

    fn tick(&mut self) {
        if self.state == BusState::Ready {
            return;
        }
        if self.remaining > 0 {
            self.remaining -= 1;
            return;
        }
        self.complete();
    }
}

/// RAM of `N` bytes mirrored across the whole address space
///
/// `N` must be a power of two.
pub struct Ram<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> Ram<N> {
    pub fn new() -> Self {
        Self { bytes: [0; N] }
    }

    #[allow(dead_code)]
    pub fn reset(&mut self) {
        self.bytes = [0; N];
    }

    fn index(addr: u32) -> usize {
        addr as usize & (N - 1)
    }

    /// Copies `image` into memory starting at `addr`
    pub fn load(&mut self, addr: u32, image: &[u8]) {
        for (offset, byte) in image.iter().enumerate() {
            self.bytes[Self::index(addr + offset as u32)] = *byte;
        }
    }

    /// Copies little-endian 16-bit words into memory starting at `addr`
    pub fn load_words(&mut self, addr: u32, words: &[u16]) {
        for (offset, word) in words.iter().enumerate() {
            let at = addr + 2 * offset as u32;
            self.bytes[Self::index(at)] = *word as u8;
            self.bytes[Self::index(at + 1)] = (*word >> 8) as u8;
        }
    }

    pub fn read_word(&self, addr: u32) -> u16 {
        self.bytes[Self::index(addr)] as u16 | (self.bytes[Self::index(addr + 1)] as u16) << 8
    }
}

impl<const N: usize> Default for Ram<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> MemoryType for Ram<N> {
    fn read(&self, addr: u32) -> Option<u8> {
        Some(self.bytes[Self::index(addr)])
    }

    fn write(&mut self, addr: u32, value: u8) -> bool {
        self.bytes[Self::index(addr)] = value;
        true
    }
}
