use log::debug;

use crate::constants::address_space::WORD_ADDRESS_MASK;
use crate::constants::pipeline::PREFETCH_DEPTH;
use crate::interconnect::{FetchPorts, FetchedWord, Slot};
use crate::memory::MemoryController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchPhase {
    Half1Ready,
    Half1MemWait,
    Half1Dequeue,
    Half2Ready,
    Half2Branch,
    Half2MemAssert,
}

/// Prefetch unit
///
/// Words enter the queue at slot 0 and move one slot per cycle towards slot 4,
/// from where they are handed to decode.
pub struct FetchUnit {
    queue: [Option<FetchedWord>; PREFETCH_DEPTH],
    mem_addr: u32,     // word address of the next sequential read
    read_addr: u32,    // byte address of the read in flight
    waiting: bool,     // a read is in flight
    discard: bool,     // the read in flight belongs to a flushed stream
    arrived: Option<FetchedWord>,
    phase: FetchPhase,
}

impl FetchUnit {
    pub fn new() -> Self {
        Self {
            queue: [None; PREFETCH_DEPTH],
            mem_addr: 0,
            read_addr: 0,
            waiting: false,
            discard: false,
            arrived: None,
            phase: FetchPhase::Half1Ready,
        }
    }

    /// Restarts fetching at byte address `addr`
    pub fn reset(&mut self, addr: u32) {
        *self = Self::new();
        self.mem_addr = (addr >> 1) & WORD_ADDRESS_MASK;
    }

    /// Number of valid words in the prefetch queue
    pub fn queued(&self) -> usize {
        self.queue.iter().filter(|slot| slot.is_some()).count()
    }

    fn queue_full(&self) -> bool {
        self.queue.iter().all(|slot| slot.is_some())
    }

    fn shift_queue(&mut self) {
        for i in (1..PREFETCH_DEPTH).rev() {
            if self.queue[i].is_none() {
                self.queue[i] = self.queue[i - 1].take();
            }
        }
    }

    /// Picks up a completed read so no other bus user can overwrite it
    fn collect<M: MemoryController>(&mut self, memctl: &M) {
        if !self.waiting || !memctl.data_ready() {
            return;
        }
        self.waiting = false;
        if self.discard {
            self.discard = false;
        } else {
            self.arrived = Some(FetchedWord {
                word: memctl.get_data(),
                addr: self.read_addr,
            });
        }
    }

    pub fn half1<M: MemoryController>(&mut self, halted: bool, memctl: &mut M, ports: FetchPorts<'_>) {
        if halted {
            return;
        }

        if self.phase == FetchPhase::Half1Ready {
            self.shift_queue();
            self.phase = FetchPhase::Half1MemWait;
        }

        if self.phase == FetchPhase::Half1MemWait {
            self.collect(memctl);
            if self.waiting {
                return;
            }
            if self.arrived.is_some() && self.queue[0].is_none() {
                self.queue[0] = self.arrived.take();
            }
            self.phase = FetchPhase::Half1Dequeue;
        }

        if self.phase == FetchPhase::Half1Dequeue {
            if ports.word_out.is_empty() {
                if let Some(word) = self.queue[PREFETCH_DEPTH - 1].take() {
                    ports.word_out.offer(word);
                }
            }
            self.phase = FetchPhase::Half2Ready;
        }
    }

    pub fn half2<M: MemoryController>(&mut self, halted: bool, memctl: &mut M, ports: FetchPorts<'_>) {
        if halted {
            return;
        }

        if self.phase == FetchPhase::Half2Ready {
            self.collect(memctl);
            self.phase = FetchPhase::Half2Branch;
        }

        if self.phase == FetchPhase::Half2Branch {
            // Execute's redirect wins over, and cancels, a pending prediction
            let target = match ports.execute_branch.take() {
                Some(addr) => {
                    ports.predicted_branch.clear();
                    Some(addr)
                }
                None => ports.predicted_branch.take(),
            };
            if let Some(addr) = target {
                self.flush(addr, ports.word_out);
            }
            self.phase = FetchPhase::Half2MemAssert;
        }

        if self.phase == FetchPhase::Half2MemAssert {
            if !self.waiting && self.arrived.is_none() && !ports.memory_backoff && !self.queue_full() {
                let addr = self.mem_addr << 1;
                if !memctl.read_assert(true, addr) {
                    return;
                }
                self.waiting = true;
                self.read_addr = addr;
                self.mem_addr = (self.mem_addr + 1) & WORD_ADDRESS_MASK;
            }
            self.phase = FetchPhase::Half1Ready;
        }
    }

    fn flush(&mut self, addr: u32, word_out: &mut Slot<FetchedWord>) {
        debug!("Fetch redirected to {:06x}", addr);
        word_out.clear();
        self.queue = [None; PREFETCH_DEPTH];
        self.arrived = None;
        self.mem_addr = (addr >> 1) & WORD_ADDRESS_MASK;
        if self.waiting {
            self.discard = true;
        }
    }
}

impl Default for FetchUnit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod fetch_tests {
    use super::*;
    use crate::interconnect::Interconnect;
    use crate::memory::{BusController, Ram};

    fn bus_with_words(addr: u32, words: &[u16]) -> BusController<Ram<0x1000>> {
        let mut ram = Ram::new();
        ram.load_words(addr, words);
        BusController::new(ram)
    }

    fn cycle(fetch: &mut FetchUnit, bus: &mut BusController<Ram<0x1000>>, ic: &mut Interconnect) {
        fetch.half1(false, bus, ic.fetch_ports());
        bus.tick();
        fetch.half2(false, bus, ic.fetch_ports());
        bus.tick();
    }

    #[test]
    fn test_delivers_words_in_order() {
        let mut bus = bus_with_words(0x100, &[0x1111, 0x2222, 0x3333, 0x4444]);
        let mut ic = Interconnect::new();
        let mut fetch = FetchUnit::new();
        fetch.reset(0x100);

        let mut seen = heapless::Vec::<FetchedWord, 8>::new();
        for _ in 0..20 {
            cycle(&mut fetch, &mut bus, &mut ic);
            if let Some(word) = ic.fetched.take() {
                seen.push(word).unwrap();
            }
            if seen.len() == 4 {
                break;
            }
        }
        assert_eq!(seen[0], FetchedWord { word: 0x1111, addr: 0x100 });
        assert_eq!(seen[1], FetchedWord { word: 0x2222, addr: 0x102 });
        assert_eq!(seen[2], FetchedWord { word: 0x3333, addr: 0x104 });
        assert_eq!(seen[3], FetchedWord { word: 0x4444, addr: 0x106 });
    }

    #[test]
    fn test_queue_never_exceeds_depth() {
        let mut bus = bus_with_words(0, &[0; 16]);
        let mut ic = Interconnect::new();
        let mut fetch = FetchUnit::new();

        // Nobody consumes the word channel
        for _ in 0..32 {
            cycle(&mut fetch, &mut bus, &mut ic);
            assert!(fetch.queued() <= PREFETCH_DEPTH);
        }
        assert_eq!(fetch.queued(), PREFETCH_DEPTH);
        assert!(ic.fetched.is_full());
    }

    #[test]
    fn test_backoff_blocks_reads() {
        let mut bus = bus_with_words(0, &[0; 4]);
        let mut ic = Interconnect::new();
        let mut fetch = FetchUnit::new();
        ic.memory_backoff = true;
        for _ in 0..4 {
            cycle(&mut fetch, &mut bus, &mut ic);
        }
        assert_eq!(fetch.queued(), 0);
        assert!(ic.fetched.is_empty());
    }

    #[test]
    fn test_redirect_drops_old_stream() {
        let mut bus = bus_with_words(0x100, &[0xAAAA; 8]);
        bus.memory_mut().load_words(0x200, &[0xBBBB; 8]);
        let mut ic = Interconnect::new();
        let mut fetch = FetchUnit::new();
        fetch.reset(0x100);

        for _ in 0..3 {
            cycle(&mut fetch, &mut bus, &mut ic);
        }
        assert!(fetch.queued() > 0);

        ic.execute_branch.force(0x200);
        ic.predicted_branch.force(0x300);
        fetch.half1(false, &mut bus, ic.fetch_ports());
        bus.tick();
        fetch.half2(false, &mut bus, ic.fetch_ports());
        bus.tick();
        assert!(ic.fetched.is_empty());
        assert!(ic.predicted_branch.is_empty());
        assert_eq!(fetch.queued(), 0);

        // Only the eight loaded words at the new stream are checked
        let mut delivered = 0;
        for _ in 0..40 {
            cycle(&mut fetch, &mut bus, &mut ic);
            if let Some(word) = ic.fetched.take() {
                assert_eq!(word, FetchedWord { word: 0xBBBB, addr: 0x200 + 2 * delivered });
                delivered += 1;
            }
            if delivered == 8 {
                break;
            }
        }
        assert_eq!(delivered, 8);
    }

    #[test]
    fn test_halted_does_nothing() {
        let mut bus = bus_with_words(0, &[0x1234]);
        let mut ic = Interconnect::new();
        let mut fetch = FetchUnit::new();
        for _ in 0..4 {
            fetch.half1(true, &mut bus, ic.fetch_ports());
            fetch.half2(true, &mut bus, ic.fetch_ports());
            bus.tick();
        }
        assert!(!bus.is_busy());
        assert_eq!(fetch.queued(), 0);
    }
}
