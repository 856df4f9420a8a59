use log::{debug, trace};

use crate::constants::address_space::PGC_MASK;
use crate::control::DecodedInst;
use crate::decoder::Decoder;
use crate::interconnect::{DecodePorts, FetchedWord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodePhase {
    Ready,
    ReadOperands,
    Dispatch,
}

/// Decode stage
///
/// Pulls words from the prefetch channel, assembles them into `DecodedInst`
/// records and hands those to execute. Statically known branch targets are
/// sent back to fetch so it can start on the new stream early.
pub struct DecodeUnit {
    decoder: Decoder,
    phase: DecodePhase,
    next_pc: u32,                  // address of the next expected word
    pending: Option<DecodedInst>,  // finished, not yet accepted by execute
    irq_injected: bool,
}

impl DecodeUnit {
    pub fn new() -> Self {
        Self {
            decoder: Decoder::new(),
            phase: DecodePhase::Ready,
            next_pc: 0,
            pending: None,
            irq_injected: false,
        }
    }

    /// Drops any partial instruction and expects the stream at `addr`
    pub fn reset(&mut self, addr: u32) {
        self.decoder.reset();
        self.phase = DecodePhase::Ready;
        self.next_pc = addr & PGC_MASK;
        self.pending = None;
        self.irq_injected = false;
    }

    pub fn next_pc(&self) -> u32 {
        self.next_pc
    }

    pub fn half1(&mut self, halted: bool, ports: DecodePorts<'_>) {
        self.step(halted, ports);
    }

    pub fn half2(&mut self, halted: bool, ports: DecodePorts<'_>) {
        self.step(halted, ports);
    }

    fn step(&mut self, halted: bool, mut ports: DecodePorts<'_>) {
        if halted {
            return;
        }

        if let Some(addr) = ports.resteer.take() {
            debug!("Decode resteered to {:06x}", addr);
            self.reset(addr);
            ports.word_in.clear();
        }

        if ports.interrupt_request.is_none() {
            self.irq_injected = false;
        }

        if self.phase == DecodePhase::Dispatch {
            self.dispatch(&mut ports);
            if self.phase == DecodePhase::Dispatch {
                return;
            }
        }

        if self.phase == DecodePhase::Ready {
            match ports.interrupt_request {
                // A repeat prefix and the instruction it repeats stay together
                Some(cond) if !self.irq_injected && !self.decoder.in_repeat_prefix() => {
                    trace!("Injecting {:?} before {:06x}", cond, self.next_pc);
                    self.decoder.decode_interrupt(cond, self.next_pc);
                    self.irq_injected = true;
                    self.finish(&mut ports);
                    return;
                }
                _ => {}
            }

            let fetched = match self.take_word(&mut ports) {
                Some(fetched) => fetched,
                None => return,
            };
            self.decoder.decode(fetched.word, fetched.addr);
            if self.decoder.words_to_read() == 0 {
                self.finish(&mut ports);
                return;
            }
            self.phase = DecodePhase::ReadOperands;
        }

        if self.phase == DecodePhase::ReadOperands {
            while self.decoder.words_to_read() > 0 {
                match self.take_word(&mut ports) {
                    Some(fetched) => self.decoder.push_word(fetched.word),
                    None => return,
                }
            }
            self.finish(&mut ports);
        }
    }

    /// Takes the next in-order word, dropping words from a stale stream
    fn take_word(&mut self, ports: &mut DecodePorts<'_>) -> Option<FetchedWord> {
        if ports.execute_branch_pending || ports.predicted_branch.is_full() {
            return None;
        }
        let fetched = ports.word_in.take()?;
        if fetched.addr != self.next_pc {
            trace!(
                "Dropping word {:04x} from {:06x}, expecting {:06x}",
                fetched.word,
                fetched.addr,
                self.next_pc
            );
            return None;
        }
        self.next_pc = (self.next_pc + 2) & PGC_MASK;
        Some(fetched)
    }

    fn finish(&mut self, ports: &mut DecodePorts<'_>) {
        let mut inst = self.decoder.finish(self.next_pc);
        if let Some(target) = self.decoder.predicted_target() {
            trace!("Predicting branch to {:06x}", target);
            ports.predicted_branch.force(target);
            inst.predicted = true;
            self.next_pc = target;
        }
        self.pending = Some(inst);
        self.phase = DecodePhase::Dispatch;
        self.dispatch(ports);
    }

    fn dispatch(&mut self, ports: &mut DecodePorts<'_>) {
        if ports.inst_out.is_full() {
            return;
        }
        if let Some(inst) = self.pending.take() {
            ports.inst_out.offer(inst);
        }
        self.phase = DecodePhase::Ready;
    }
}

impl Default for DecodeUnit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod decode_tests {
    use super::*;
    use crate::control::{BranchDest, InterruptCond, MicroKind};
    use crate::interconnect::Interconnect;

    fn feed(unit: &mut DecodeUnit, ic: &mut Interconnect, word: u16, addr: u32) {
        assert!(ic.fetched.offer(FetchedWord { word, addr }));
        unit.half1(false, ic.decode_ports());
        unit.half2(false, ic.decode_ports());
    }

    #[test]
    fn test_single_word_instruction() {
        let mut ic = Interconnect::new();
        let mut unit = DecodeUnit::new();
        unit.reset(0x1000);
        feed(&mut unit, &mut ic, 0x0000, 0x1000);
        let inst = ic.decoded.take().unwrap();
        assert_eq!(inst.inst_pgc, 0x1002);
        assert_eq!(unit.next_pc(), 0x1002);
    }

    #[test]
    fn test_collects_extension_words() {
        let mut ic = Interconnect::new();
        let mut unit = DecodeUnit::new();
        unit.reset(0x1000);
        // ADD.B L0,#5
        feed(&mut unit, &mut ic, 0x38C0, 0x1000);
        assert!(ic.decoded.is_empty());
        feed(&mut unit, &mut ic, 0x0005, 0x1002);
        let inst = ic.decoded.take().unwrap();
        assert_eq!(inst.words.len(), 2);
        assert_eq!(inst.word(1), 0x0005);
        assert_eq!(inst.inst_pgc, 0x1004);
    }

    #[test]
    fn test_out_of_order_word_dropped() {
        let mut ic = Interconnect::new();
        let mut unit = DecodeUnit::new();
        unit.reset(0x1000);
        feed(&mut unit, &mut ic, 0x0000, 0x2000);
        assert!(ic.decoded.is_empty());
        assert_eq!(unit.next_pc(), 0x1000);
    }

    #[test]
    fn test_waits_for_pending_redirect() {
        let mut ic = Interconnect::new();
        let mut unit = DecodeUnit::new();
        unit.reset(0x1000);
        ic.execute_branch.force(0x3000);
        feed(&mut unit, &mut ic, 0x0000, 0x1000);
        assert!(ic.decoded.is_empty());
        assert!(ic.fetched.is_full());
    }

    #[test]
    fn test_holds_instruction_until_execute_takes_it() {
        let mut ic = Interconnect::new();
        let mut unit = DecodeUnit::new();
        unit.reset(0x1000);
        feed(&mut unit, &mut ic, 0x0000, 0x1000);
        feed(&mut unit, &mut ic, 0x0000, 0x1002);
        assert_eq!(ic.decoded.take().unwrap().inst_pgc, 0x1002);

        unit.half1(false, ic.decode_ports());
        assert_eq!(ic.decoded.take().unwrap().inst_pgc, 0x1004);
    }

    #[test]
    fn test_predicts_relative_branch() {
        let mut ic = Interconnect::new();
        let mut unit = DecodeUnit::new();
        unit.reset(0x1000);
        // JR.S +2 words
        feed(&mut unit, &mut ic, 0xEE02, 0x1000);
        let inst = ic.decoded.take().unwrap();
        assert!(inst.predicted);
        assert_eq!(ic.predicted_branch.peek(), Some(&0x1006));
        assert_eq!(unit.next_pc(), 0x1006);

        // No more words until fetch has acted on the prediction
        feed(&mut unit, &mut ic, 0x0000, 0x1006);
        assert!(ic.decoded.is_empty());
    }

    #[test]
    fn test_resteer_discards_partial_instruction() {
        let mut ic = Interconnect::new();
        let mut unit = DecodeUnit::new();
        unit.reset(0x1000);
        feed(&mut unit, &mut ic, 0x38C0, 0x1000);
        ic.resteer.force(0x4000);
        feed(&mut unit, &mut ic, 0x0000, 0x4000);
        // The word offered alongside the resteer belongs to the old stream
        assert!(ic.decoded.is_empty());
        feed(&mut unit, &mut ic, 0x0000, 0x4000);
        assert_eq!(ic.decoded.take().unwrap().inst_pgc, 0x4002);
    }

    #[test]
    fn test_injects_interrupt_once() {
        let mut ic = Interconnect::new();
        let mut unit = DecodeUnit::new();
        unit.reset(0x1000);
        ic.interrupt_request = Some(InterruptCond::Irq2);
        unit.half1(false, ic.decode_ports());
        let inst = ic.decoded.take().unwrap();
        assert!(inst.interrupt);
        assert_eq!(inst.interrupt_cond, InterruptCond::Irq2);
        assert_eq!(inst.inst_pgc, 0x1000);

        feed(&mut unit, &mut ic, 0x0000, 0x1000);
        let inst = ic.decoded.take().unwrap();
        assert!(!inst.interrupt);
    }

    #[test]
    fn test_no_interrupt_after_repeat_prefix() {
        let mut ic = Interconnect::new();
        let mut unit = DecodeUnit::new();
        unit.reset(0x1000);
        // REPI 2
        feed(&mut unit, &mut ic, 0xFE02, 0x1000);
        let repi = ic.decoded.take().unwrap();
        assert_eq!(repi.repeat_op.map(|spec| spec.kind), Some(MicroKind::Repi));

        ic.interrupt_request = Some(InterruptCond::Nmi);
        feed(&mut unit, &mut ic, 0x0000, 0x1002);
        let inst = ic.decoded.take().unwrap();
        assert!(!inst.interrupt);
        assert_ne!(inst.branch_dest, BranchDest::Illegal);

        unit.half1(false, ic.decode_ports());
        assert!(ic.decoded.take().unwrap().interrupt);
    }

    #[test]
    fn test_halted_does_nothing() {
        let mut ic = Interconnect::new();
        let mut unit = DecodeUnit::new();
        unit.reset(0x1000);
        ic.fetched.offer(FetchedWord { word: 0, addr: 0x1000 });
        unit.half1(true, ic.decode_ports());
        unit.half2(true, ic.decode_ports());
        assert!(ic.fetched.is_full());
        assert!(ic.decoded.is_empty());
    }
}
