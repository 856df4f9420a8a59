extern crate clap;
use crossbeam_channel::bounded; // Ctrl-C notification
use log::{error, info, warn};

use pilot_core::constants::address_space::ADDRESS_MASK;
use pilot_core::constants::vectors;
use pilot_core::control::InterruptCond;
use pilot_core::memory::{BusController, MemoryType};
use pilot_core::registers::Registers;
use pilot_core::{CoreError, Pilot};

// Full 24-bit address space
const MEMORY_SIZE: usize = 1 << 24;

/// Flat RAM covering the whole address space
struct VecMemory {
    bytes: Vec<u8>,
}

impl VecMemory {
    fn new() -> Self {
        Self {
            bytes: vec![0; MEMORY_SIZE],
        }
    }

    fn load(&mut self, base: u32, image: &[u8]) -> Result<(), String> {
        let start = base as usize;
        let end = start + image.len();
        if end > MEMORY_SIZE {
            return Err(format!(
                "image of {} bytes does not fit at {:06x}",
                image.len(),
                base
            ));
        }
        self.bytes[start..end].copy_from_slice(image);
        Ok(())
    }
}

impl MemoryType for VecMemory {
    fn read(&self, addr: u32) -> Option<u8> {
        self.bytes.get(addr as usize).copied()
    }

    fn write(&mut self, addr: u32, value: u8) -> bool {
        match self.bytes.get_mut(addr as usize) {
            Some(byte) => {
                *byte = value;
                true
            }
            None => false,
        }
    }
}

/// Everything the `run` subcommand needs
struct RunConfig {
    image: String,
    base: u32,
    entry: u32,
    max_cycles: u64, // 0 runs until HALT
    wait_states: u8,
    sp: Option<u32>,
    irq_period: u64, // 0 disables the periodic interrupt
    irq: InterruptCond,
    dump: bool,
}

/// Configures command-line interface using clap
fn get_cli_config<'a>() -> clap::ArgMatches<'a> {
    let description = "Cycle-level model of the Pilot pipelined CPU";
    clap::App::new("Pilot CPU model")
        .version("0.1")
        .about(description)
        .subcommand(
            clap::SubCommand::with_name("run")
                .about("Load a flat binary image and run it")
                .arg(
                    clap::Arg::with_name("IMAGE")
                        .help("Raw little-endian program image")
                        .required(true)
                        .index(1),
                )
                .arg(
                    clap::Arg::with_name("base")
                        .long("base")
                        .takes_value(true)
                        .default_value("0")
                        .help("Load address of the image"),
                )
                .arg(
                    clap::Arg::with_name("entry")
                        .long("entry")
                        .takes_value(true)
                        .help("Start address, the reset vector when omitted"),
                )
                .arg(
                    clap::Arg::with_name("cycles")
                        .long("cycles")
                        .takes_value(true)
                        .default_value("0")
                        .help("Stop after this many cycles, 0 runs until HALT"),
                )
                .arg(
                    clap::Arg::with_name("wait-states")
                        .long("wait-states")
                        .takes_value(true)
                        .default_value("0")
                        .help("Extra half-cycles per memory access"),
                )
                .arg(
                    clap::Arg::with_name("sp")
                        .long("sp")
                        .takes_value(true)
                        .help("Initial stack pointer"),
                )
                .arg(
                    clap::Arg::with_name("irq-period")
                        .long("irq-period")
                        .takes_value(true)
                        .default_value("0")
                        .help("Raise an interrupt every this many cycles"),
                )
                .arg(
                    clap::Arg::with_name("irq-level")
                        .long("irq-level")
                        .takes_value(true)
                        .default_value("7")
                        .help("Level of the periodic interrupt, 0 is NMI"),
                )
                .arg(
                    clap::Arg::with_name("dump")
                        .long("dump")
                        .help("Print the registers on exit"),
                ),
        )
        .subcommand(clap::SubCommand::with_name("regs").about("Print the register state after reset"))
        .get_matches()
}

/// Parses decimal or 0x-prefixed hexadecimal
fn parse_number(name: &str, text: &str) -> Result<u64, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse::<u64>(),
    };
    parsed.map_err(|e| format!("invalid --{} value '{}': {}", name, text, e))
}

fn number_arg(matches: &clap::ArgMatches, name: &str) -> Result<Option<u64>, String> {
    match matches.value_of(name) {
        Some(text) => parse_number(name, text).map(Some),
        None => Ok(None),
    }
}

/// Narrows an address option to the 24-bit bus
fn to_address(name: &str, value: u64) -> Result<u32, String> {
    if value > ADDRESS_MASK as u64 {
        return Err(format!("invalid --{} {:#x}, addresses are 24 bits", name, value));
    }
    Ok(value as u32)
}

fn address_arg(matches: &clap::ArgMatches, name: &str) -> Result<Option<u32>, String> {
    number_arg(matches, name)?
        .map(|value| to_address(name, value))
        .transpose()
}

impl RunConfig {
    fn from_matches(matches: &clap::ArgMatches) -> Result<RunConfig, String> {
        let image = matches.value_of("IMAGE").unwrap_or_default().to_string();
        let level = number_arg(matches, "irq-level")?.unwrap_or(7);
        let irq = InterruptCond::from_level(level as u8)
            .filter(|_| level < 8)
            .ok_or_else(|| format!("invalid --irq-level {}", level))?;
        let wait_states = number_arg(matches, "wait-states")?.unwrap_or(0);
        if wait_states > u8::MAX as u64 {
            return Err(format!("invalid --wait-states {}", wait_states));
        }

        Ok(RunConfig {
            image,
            base: address_arg(matches, "base")?.unwrap_or(0),
            entry: address_arg(matches, "entry")?.unwrap_or(vectors::RESET),
            max_cycles: number_arg(matches, "cycles")?.unwrap_or(0),
            wait_states: wait_states as u8,
            sp: address_arg(matches, "sp")?,
            irq_period: number_arg(matches, "irq-period")?.unwrap_or(0),
            irq,
            dump: matches.is_present("dump"),
        })
    }
}

fn dump_registers(regs: &Registers) {
    for (i, value) in regs.regs.iter().enumerate() {
        println!("P{}  {:06x}", i, value);
    }
    println!("PGC {:06x}", regs.pgc);
    println!("WF  {:04x}  IRL {}", regs.wf, regs.irl());
    println!("REPI {:02x}  REPR {:02x}", regs.repi, regs.repr);
    println!("HALT {}", regs.disable_clk);
}

fn run(config: RunConfig) -> Result<(), String> {
    let (signal_sender, signal_receiver) = bounded(1);
    ctrlc::set_handler(move || {
        if signal_sender.is_full() {
            std::process::exit(-1); // Second Ctrl-C while the first is pending
        }
        let _send_result = signal_sender.send(());
    })
    .map_err(|e| format!("Signal handler failed: {:?}", e))?;

    let image = std::fs::read(&config.image).map_err(|e| format!("{}: {}", config.image, e))?;
    let mut memory = VecMemory::new();
    memory.load(config.base, &image)?;
    info!("Loaded {} bytes at {:06x}", image.len(), config.base);

    let bus = BusController::new(memory).with_wait_states(config.wait_states);
    let mut cpu = Pilot::new(bus);
    cpu.reset(config.entry);
    if let Some(sp) = config.sp {
        cpu.registers_mut().set_sp(sp);
    }

    let mut result: Result<(), CoreError> = Ok(());
    loop {
        if !signal_receiver.is_empty() {
            warn!("Interrupted after {} cycles", cpu.cycles());
            break;
        }
        if config.max_cycles != 0 && cpu.cycles() >= config.max_cycles {
            info!("Cycle limit reached");
            break;
        }
        if config.irq_period != 0 && cpu.cycles() % config.irq_period == config.irq_period - 1 {
            cpu.request_interrupt(config.irq);
        }
        if cpu.is_halted() && config.irq_period == 0 {
            info!("HALT after {} cycles", cpu.cycles());
            break;
        }
        if let Err(e) = cpu.cycle() {
            result = Err(e);
            break;
        }
    }

    if config.dump {
        dump_registers(cpu.registers());
        println!("CYCLES {}", cpu.cycles());
    }
    result.map_err(|e| format!("Core stopped at {:06x}: {}", cpu.registers().pgc, e))
}

/// Main entry point for the Pilot model
fn main() {
    env_logger::init();

    let cli_matches = get_cli_config();
    let outcome = match cli_matches.subcommand() {
        ("run", Some(matches)) => RunConfig::from_matches(matches).and_then(run),
        ("regs", _) => {
            let mut regs = Registers::new();
            regs.pgc = vectors::RESET;
            dump_registers(&regs);
            Ok(())
        }
        _ => Err("No subcommand given, try --help".to_string()),
    };

    if let Err(e) = outcome {
        error!("{}", e);
        std::process::exit(1);
    }
}
