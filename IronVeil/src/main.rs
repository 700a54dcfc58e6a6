mod dashboard;
mod logger;
mod shell;
mod workload;

use std::io::{self, Write};
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

use clap::{ArgAction, Parser};
use log::{info, warn};
use rand::rngs::SmallRng;
use rand::SeedableRng;

use nexis::{Algorithm, ProfileKind, SimConfig};

use shell::{Flow, Shell};

#[derive(Parser)]
#[command(name = "ironveil")]
#[command(author, version, about = "Drive a simulated Nexis machine from a shell")]
struct Cli {
    /// JSON configuration file (defaults to <config dir>/ironveil/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scheduling algorithm, overrides the configuration
    #[arg(short, long)]
    algorithm: Option<Algorithm>,

    /// Operating system personality: linux, windows or mac
    #[arg(short, long, default_value = "linux")]
    profile: ProfileKind,

    /// Boot the machine before showing the prompt
    #[arg(short, long)]
    boot: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ironveil").join("config.json"))
}

fn load_config(cli: &Cli) -> SimConfig {
    let path = cli
        .config
        .clone()
        .or_else(|| default_config_path().filter(|p| p.exists()));

    let mut config = match path {
        Some(path) => match SimConfig::load(&path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring {}: {}", path.display(), e);
                defaults_for(cli.profile)
            }
        },
        None => defaults_for(cli.profile),
    };

    if let Some(algorithm) = cli.algorithm {
        config.scheduler.algorithm = algorithm;
    }
    config
}

fn defaults_for(profile: ProfileKind) -> SimConfig {
    let mut config = SimConfig::default();
    config.memory.total_size = profile.build().default_memory_size();
    config
}

fn main() {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    let config = load_config(&cli);
    let mut shell = Shell::new(config, cli.profile, SmallRng::from_entropy());

    banner();
    if cli.boot {
        if let Err(e) = shell.boot() {
            eprintln!("\x1b[31m{}\x1b[0m", e);
        }
    }

    loop {
        print!("\x1b[38;5;208mironveil>\x1b[0m ");
        let _ = io::stdout().flush();

        let mut input = String::new();
        let line = match io::stdin().read_line(&mut input) {
            Ok(0) => "exit",
            Ok(_) => input.trim(),
            Err(e) => {
                eprintln!("\x1b[31mstdin: {}\x1b[0m", e);
                "exit"
            }
        };

        if let Flow::Exit = shell.execute(line) {
            break;
        }
    }
}

fn banner() {
    let banner_lines = [
        "██╗██████╗  ██████╗ ███╗   ██╗██╗   ██╗███████╗██╗██╗     ",
        "██║██╔══██╗██╔═══██╗████╗  ██║██║   ██║██╔════╝██║██║     ",
        "██║██████╔╝██║   ██║██╔██╗ ██║██║   ██║█████╗  ██║██║     ",
        "██║██╔══██╗██║   ██║██║╚██╗██║╚██╗ ██╔╝██╔══╝  ██║██║     ",
        "██║██║  ██║╚██████╔╝██║ ╚████║ ╚████╔╝ ███████╗██║███████╗",
        "╚═╝╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═══╝  ╚═══╝  ╚══════╝╚═╝╚══════╝",
    ];
    print!("\x1b[2J\x1b[H");
    for line in &banner_lines {
        for c in line.chars() {
            print!("\x1b[38;5;208m{}\x1b[0m", c);
            let _ = io::stdout().flush();
            sleep(Duration::from_millis(2));
        }
        println!();
    }
    println!();
}
