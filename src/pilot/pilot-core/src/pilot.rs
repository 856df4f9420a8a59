use log::debug;

use crate::constants::address_space::PGC_MASK;
use crate::control::InterruptCond;
use crate::decode::DecodeUnit;
use crate::error::CoreError;
use crate::execute::ExecuteUnit;
use crate::fetch::FetchUnit;
use crate::interconnect::Interconnect;
use crate::memory::MemoryController;
use crate::registers::Registers;

/// The whole core: three pipeline stages, their handshakes and the memory bus
pub struct Pilot<M: MemoryController> {
    regs: Registers,
    memctl: M,
    interconnect: Interconnect,
    fetch: FetchUnit,
    decode: DecodeUnit,
    execute: ExecuteUnit,
    cycles: u64, // Total cycles executed
}

impl<M: MemoryController> Pilot<M> {
    pub fn new(memctl: M) -> Self {
        Self {
            regs: Registers::new(),
            memctl,
            interconnect: Interconnect::new(),
            fetch: FetchUnit::new(),
            decode: DecodeUnit::new(),
            execute: ExecuteUnit::new(),
            cycles: 0,
        }
    }

    /// Clears all state and starts fetching at `entry`
    pub fn reset(&mut self, entry: u32) {
        let entry = entry & PGC_MASK;
        debug!("Reset to {:06x}", entry);
        self.regs.reset();
        self.regs.pgc = entry;
        self.interconnect.reset();
        self.fetch.reset(entry);
        self.decode.reset(entry);
        self.execute.reset();
        self.cycles = 0;
    }

    /// Clock is stopped and nothing can restart it this cycle
    pub fn is_halted(&self) -> bool {
        self.regs.disable_clk && self.interconnect.interrupt_request.is_none()
    }

    /// Raises an interrupt request; a request not yet taken is replaced
    pub fn request_interrupt(&mut self, cond: InterruptCond) {
        debug!("Interrupt request {:?}", cond);
        self.interconnect.interrupt_request = Some(cond);
    }

    pub fn half1(&mut self) -> Result<(), CoreError> {
        let halted = self.is_halted();
        self.fetch
            .half1(halted, &mut self.memctl, self.interconnect.fetch_ports());
        self.decode.half1(halted, self.interconnect.decode_ports());
        let result = self.execute.half1(
            halted,
            &mut self.regs,
            &mut self.memctl,
            self.interconnect.execute_ports(),
        );
        self.memctl.tick();
        result
    }

    pub fn half2(&mut self) -> Result<(), CoreError> {
        let halted = self.is_halted();
        self.fetch
            .half2(halted, &mut self.memctl, self.interconnect.fetch_ports());
        self.decode.half2(halted, self.interconnect.decode_ports());
        let result = self.execute.half2(
            halted,
            &mut self.regs,
            &mut self.memctl,
            self.interconnect.execute_ports(),
        );
        self.memctl.tick();
        result
    }

    /// Runs both halves of one clock cycle
    pub fn cycle(&mut self) -> Result<(), CoreError> {
        self.half1()?;
        self.half2()?;
        self.cycles += 1;
        Ok(())
    }

    /// Cycles until the core halts, returning the number of cycles it took
    pub fn run_until_halt(&mut self, max_cycles: u64) -> Result<u64, CoreError> {
        let start = self.cycles;
        while !self.is_halted() {
            if self.cycles - start >= max_cycles {
                return Err(CoreError::CycleLimit(max_cycles));
            }
            self.cycle()?;
        }
        Ok(self.cycles - start)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    pub fn memory(&self) -> &M {
        &self.memctl
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memctl
    }
}
