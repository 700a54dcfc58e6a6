// shell.rs
//
// Command interpreter for the IronVeil prompt.

use std::fmt::Display;
use std::str::FromStr;

use rand::rngs::SmallRng;
use thiserror::Error;

use nexis::{
    Algorithm, BlockId, Kernel, NexisError, Pid, Priority, ProfileKind, SimConfig,
};

use crate::{dashboard, workload};

const ACCENT: &str = "\x1b[38;5;208m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid value '{value}': {reason}")]
    Parse { value: String, reason: String },

    #[error("machine is not booted, type 'boot' first")]
    NotBooted,

    #[error("no such block: {0}")]
    UnknownBlock(u64),

    #[error("block {block} belongs to PID {pid}, use 'term {pid}' instead")]
    BlockInUse { block: u64, pid: Pid },

    #[error(transparent)]
    Nexis(#[from] NexisError),

    #[error("terminal: {0}")]
    Io(#[from] std::io::Error),
}

type ShellResult = Result<(), ShellError>;

pub enum Flow {
    Continue,
    Exit,
}

fn parse<T>(value: &str) -> Result<T, ShellError>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse().map_err(|e: T::Err| ShellError::Parse {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Decimal or `0x` hex address
fn parse_address(value: &str) -> Result<u64, ShellError> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| ShellError::Parse {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn arg<'a>(args: &[&'a str], idx: usize, usage: &'static str) -> Result<&'a str, ShellError> {
    args.get(idx).copied().ok_or(ShellError::Usage(usage))
}

pub struct Shell {
    config: SimConfig,
    profile: ProfileKind,
    kernel: Option<Kernel>,
    rng: SmallRng,
}

impl Shell {
    pub fn new(config: SimConfig, profile: ProfileKind, rng: SmallRng) -> Self {
        Self {
            config,
            profile,
            kernel: None,
            rng,
        }
    }

    pub fn execute(&mut self, line: &str) -> Flow {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            return Flow::Continue;
        };
        let args: Vec<&str> = words.collect();

        let result = match cmd {
            "help" => {
                help();
                Ok(())
            }
            "clear" | "cls" => {
                print!("\x1b[2J\x1b[H");
                Ok(())
            }
            "boot" => self.boot(),
            "exit" | "quit" => {
                if let Some(kernel) = self.kernel.take() {
                    kernel.shutdown();
                }
                println!("{}Exiting IronVeil CLI...{}", ACCENT, RESET);
                return Flow::Exit;
            }
            _ => match self.kernel.as_ref() {
                Some(kernel) => machine_command(kernel, &mut self.rng, cmd, &args),
                None if is_machine_command(cmd) => Err(ShellError::NotBooted),
                None => {
                    println!("{}Unknown command: {}{}", RED, cmd, RESET);
                    Ok(())
                }
            },
        };

        if let Err(e) = result {
            println!("{}{}{}", RED, e, RESET);
        }
        Flow::Continue
    }

    pub fn boot(&mut self) -> ShellResult {
        if let Some(kernel) = &self.kernel {
            kernel.boot()?;
            return Ok(());
        }
        let kernel = Kernel::new(self.config.clone(), self.profile.build())?;
        let init = kernel.boot()?;

        let profile = kernel.profile();
        println!("{}{}{}", ACCENT, profile.boot_banner(), RESET);
        println!(
            "init is PID {}, {} services, shell {}",
            init,
            profile.services().len(),
            profile.shell_command()
        );
        println!(
            "scheduler: {} every {} ms, quantum {} ms | memory: {} KiB in {}-byte pages",
            self.config.scheduler.algorithm,
            self.config.scheduler.tick_ms,
            self.config.scheduler.quantum_ms,
            kernel.memory().total_size() / 1024,
            kernel.memory().page_size()
        );
        self.kernel = Some(kernel);
        Ok(())
    }
}

const MACHINE_COMMANDS: &[&str] = &[
    "ps", "spawn", "kill", "term", "block", "unblock", "suspend", "resume", "nice", "algo", "tick",
    "stats", "mem", "alloc", "free", "pin", "unpin", "swapin", "peek", "poke", "load", "top", "env",
];

fn is_machine_command(cmd: &str) -> bool {
    MACHINE_COMMANDS.contains(&cmd)
}

fn help() {
    println!("{}Available commands:{}", ACCENT, RESET);
    let lines = [
        ("help", "Show this help message"),
        ("clear", "Clear the screen"),
        ("boot", "Boot the simulated machine"),
        ("ps", "List processes"),
        ("spawn <name> [prio] [nice]", "Create a process"),
        ("term <pid>", "Terminate a process"),
        ("kill <pid>", "Kill a process"),
        ("block [pid]", "Block the running process"),
        ("unblock <pid>", "Wake a blocked process"),
        ("suspend <pid>", "Suspend a process"),
        ("resume <pid>", "Resume a suspended process"),
        ("nice <pid> <n>", "Set niceness (-20..19)"),
        ("algo [name]", "Show or switch the scheduling algorithm"),
        ("tick [n]", "Advance the scheduler by hand"),
        ("stats", "Scheduler statistics"),
        ("mem", "Memory and cache statistics"),
        ("alloc <bytes>", "Allocate a memory block"),
        ("free <block>", "Free a memory block"),
        ("pin <block>", "Exclude a block from swapping"),
        ("unpin <block>", "Allow a block to be swapped"),
        ("swapin <block>", "Bring a block's swapped pages back"),
        ("peek <addr> <len>", "Hex dump memory"),
        ("poke <addr> <text>", "Write text to memory"),
        ("load [n]", "Spawn n random processes"),
        ("top", "Live dashboard"),
        ("env", "Profile environment"),
        ("exit", "Quit IronVeil CLI"),
    ];
    for (cmd, what) in lines {
        println!("  {:<28} - {}", cmd, what);
    }
}

fn machine_command(kernel: &Kernel, rng: &mut SmallRng, cmd: &str, args: &[&str]) -> ShellResult {
    let scheduler = kernel.scheduler();
    let memory = kernel.memory();

    match cmd {
        "ps" => ps(kernel),
        "spawn" => {
            let name = arg(args, 0, "spawn <name> [priority] [nice]")?;
            let priority = args.get(1).map(|v| parse::<Priority>(v)).transpose()?.unwrap_or_default();
            let nice = args.get(2).map(|v| parse::<i32>(v)).transpose()?.unwrap_or(0);
            let pid = kernel.create_process(name, "user", priority, nice)?;
            println!("Started {} as PID {}", name, pid);
        }
        "term" | "kill" => {
            let pid: Pid = parse(arg(args, 0, "term|kill <pid>")?)?;
            let process = if cmd == "kill" {
                kernel.kill_process(pid)?
            } else {
                kernel.terminate_process(pid)?
            };
            println!("{} (PID {}) is now {}", process.name, pid, process.state());
        }
        "block" => {
            let pid = match args.first() {
                Some(v) => parse(v)?,
                None => scheduler.current().ok_or(ShellError::Usage("block <pid> (nothing is running)"))?,
            };
            scheduler.block_process(pid)?;
            println!("PID {} blocked", pid);
        }
        "unblock" => scheduler.unblock_process(parse(arg(args, 0, "unblock <pid>")?)?)?,
        "suspend" => scheduler.suspend_process(parse(arg(args, 0, "suspend <pid>")?)?)?,
        "resume" => scheduler.resume_process(parse(arg(args, 0, "resume <pid>")?)?)?,
        "nice" => {
            let pid: Pid = parse(arg(args, 0, "nice <pid> <n>")?)?;
            let nice: i32 = parse(arg(args, 1, "nice <pid> <n>")?)?;
            scheduler.set_nice(pid, nice)?;
        }
        "algo" => match args.first() {
            Some(name) => {
                let algorithm: Algorithm = parse(name)?;
                scheduler.set_algorithm(algorithm)?;
                println!("Scheduling algorithm: {}", algorithm);
            }
            None => {
                let names: Vec<String> = Algorithm::ALL.iter().map(ToString::to_string).collect();
                println!("Current: {} (available: {})", scheduler.algorithm(), names.join(", "));
            }
        },
        "tick" => {
            let n: u64 = args.first().map(|v| parse(v)).transpose()?.unwrap_or(1);
            for _ in 0..n {
                scheduler.tick();
            }
            let summary = scheduler.summary();
            println!(
                "clock {} ms, running {:?}, {} context switches",
                summary.clock_ms, summary.running, summary.context_switches
            );
        }
        "stats" => stats(kernel),
        "mem" => mem(kernel),
        "alloc" => {
            let size: i64 = parse(arg(args, 0, "alloc <bytes>")?)?;
            let block = memory.allocate(size)?;
            println!("Allocated {}", block);
        }
        "free" => {
            let id: u64 = parse(arg(args, 0, "free <block>")?)?;
            let block = memory.block(BlockId(id)).ok_or(ShellError::UnknownBlock(id))?;
            let owner = scheduler
                .processes()
                .into_iter()
                .find(|p| p.memory.as_ref().map(|b| b.id()) == Some(block.id()));
            if let Some(owner) = owner {
                return Err(ShellError::BlockInUse { block: id, pid: owner.pid() });
            }
            memory.free(&block);
            println!("Freed {}", block);
        }
        "pin" | "unpin" => {
            let id: u64 = parse(arg(args, 0, "pin|unpin <block>")?)?;
            let pages = if cmd == "pin" {
                memory.pin(BlockId(id))?
            } else {
                memory.unpin(BlockId(id))?
            };
            println!("{} pages {}ned", pages, cmd);
        }
        "swapin" => {
            let id: u64 = parse(arg(args, 0, "swapin <block>")?)?;
            let pages = memory.swap_in(BlockId(id))?;
            println!("{} pages swapped in", pages);
        }
        "peek" => {
            let address = parse_address(arg(args, 0, "peek <addr> <len>")?)?;
            let len: usize = parse(arg(args, 1, "peek <addr> <len>")?)?;
            hexdump(address, &memory.read(address, len)?);
        }
        "poke" => {
            let address = parse_address(arg(args, 0, "poke <addr> <text>")?)?;
            if args.len() < 2 {
                return Err(ShellError::Usage("poke <addr> <text>"));
            }
            let text = args[1..].join(" ");
            memory.write(address, text.as_bytes())?;
            println!("Wrote {} bytes at {:#x}", text.len(), address);
        }
        "load" => {
            let n: usize = args.first().map(|v| parse(v)).transpose()?.unwrap_or(8);
            let workload = workload::spawn_random(kernel, rng, n);
            println!(
                "Spawned {} processes ({} failed)",
                workload.spawned.len(),
                workload.failed.len()
            );
        }
        "top" => dashboard::run(kernel, rng)?,
        "env" => {
            for (key, value) in kernel.profile().environment() {
                println!("{}={}", key, value);
            }
        }
        _ => println!("{}Unknown command: {}{}", RED, cmd, RESET),
    }
    Ok(())
}

fn ps(kernel: &Kernel) {
    let scheduler = kernel.scheduler();
    let current = scheduler.current();
    println!(
        "{}{:>6} {:<16} {:<10} {:<10} {:<9} {:>5} {:>9} {:>8}{}",
        ACCENT, "PID", "NAME", "OWNER", "STATE", "PRIO", "NICE", "CPU ms", "MEM KiB", RESET
    );
    for p in scheduler.processes() {
        let marker = if current == Some(p.pid()) { '*' } else { ' ' };
        println!(
            "{}{:>5} {:<16} {:<10} {:<10} {:<9} {:>5} {:>9} {:>8}",
            marker,
            p.pid(),
            p.name,
            p.owner,
            p.state().to_string(),
            p.priority.to_string(),
            p.nice(),
            p.cpu_time_ms,
            p.memory_usage / 1024
        );
    }
}

fn stats(kernel: &Kernel) {
    let scheduler = kernel.scheduler();
    let summary = scheduler.summary();
    println!(
        "{}{}{} clock {} ms, {} ticks ({} idle), {} dispatches, {} context switches",
        ACCENT,
        summary.algorithm,
        RESET,
        summary.clock_ms,
        summary.ticks,
        summary.idle_ticks,
        summary.dispatches,
        summary.context_switches
    );
    println!(
        "{:>6} {:>9} {:>9} {:>9} {:>9} {:>10}",
        "PID", "CPU ms", "WAIT ms", "SWITCHES", "AVG BURST", "LAST SCHED"
    );
    for (pid, s) in scheduler.statistics() {
        println!(
            "{:>6} {:>9} {:>9} {:>9} {:>9} {:>10}",
            pid, s.total_cpu_time, s.waiting_time, s.context_switches, s.average_burst, s.last_scheduled
        );
    }
}

fn mem(kernel: &Kernel) {
    let memory = kernel.memory();
    let stats = memory.statistics();
    println!(
        "{}memory{} {} / {} KiB used ({:.1}%), {} KiB free, {} live blocks",
        ACCENT,
        RESET,
        stats.used_size / 1024,
        stats.total_size / 1024,
        stats.used_ratio() * 100.0,
        stats.free_size / 1024,
        stats.live_blocks
    );
    println!(
        "allocations {}, frees {}, page faults {}, swap out {}, swap in {}, swapped pages {}",
        stats.total_allocations,
        stats.total_deallocations,
        stats.total_page_faults,
        stats.total_swap_outs,
        stats.total_swap_ins,
        stats.swapped_pages
    );
    for (name, cache) in [("L1", &stats.l1), ("L2", &stats.l2), ("L3", &stats.l3)] {
        println!(
            "{} hit rate {:5.1}% ({} hits, {} misses, {} evictions, {}/{} lines)",
            name,
            cache.hit_rate() * 100.0,
            cache.hits,
            cache.misses,
            cache.evictions,
            cache.lines,
            cache.capacity_lines
        );
    }
    for block in memory.blocks() {
        println!("  {}", block);
    }
}

fn hexdump(address: u64, bytes: &[u8]) {
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        println!("{:#010x}  {:<47}  {}", address + (i * 16) as u64, hex.join(" "), ascii);
    }
}
