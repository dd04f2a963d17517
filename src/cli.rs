/// CLI definitions and argument types.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use ppusim::SimConfig;

#[derive(Parser, Debug)]
#[command(name = "cellgdb")]
#[command(about = "GDB remote debugging server for an emulated Cell PPU")]
#[command(version)]
pub struct Cli {
    /// Listen address: host:port, :port or a Unix socket path (empty disables the server)
    #[arg(short, long, env = "CELLGDB_LISTEN")]
    pub listen: Option<String>,

    /// JSON server configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of simulated PPU threads
    #[arg(long, default_value = "1")]
    pub threads: usize,

    /// Initial program counter, also the base of guest memory
    #[arg(long, default_value = "0x10000", value_parser = parse_u32)]
    pub entry: u32,

    /// Size of guest memory in bytes
    #[arg(long, default_value = "0x10000", value_parser = parse_u32)]
    pub memory_size: u32,

    /// Microseconds to wait after each simulated instruction
    #[arg(long, default_value = "100")]
    pub cycle_delay_us: u64,

    /// Start emulation right away instead of waiting for the debugger to continue
    #[arg(long)]
    pub start: bool,

    /// Enable verbose output (packet level tracing)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn sim_config(&self) -> SimConfig {
        SimConfig {
            threads: self.threads,
            entry: self.entry,
            memory_size: self.memory_size,
            cycle_delay: Duration::from_micros(self.cycle_delay_us),
            ..SimConfig::default()
        }
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal u32
fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid value {:?}: {}", s, e))
}
