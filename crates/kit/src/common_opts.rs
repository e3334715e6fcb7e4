//! Common CLI options shared across commands

use clap::Parser;
use std::fmt;

use crate::utils::parse_memory_to_mb;

pub const DEFAULT_MEMORY_USER_STR: &str = "2G";
const DEFAULT_CORES: u32 = 2;

/// Hardware for machines created without a descriptor
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
pub struct MachineOpts {
    #[clap(
        long = "memory",
        default_value = DEFAULT_MEMORY_USER_STR,
        value_parser = parse_memory_to_mb,
        help = "Memory size for disk-only images (e.g. 2G, 2048M, or plain number for MB)"
    )]
    pub memory_mb: u32,

    /// Number of CPU cores for disk-only images
    #[clap(long, default_value_t = DEFAULT_CORES, value_parser = clap::value_parser!(u32).range(1..))]
    pub cores: u32,
}

impl Default for MachineOpts {
    fn default() -> Self {
        Self {
            memory_mb: 2048,
            cores: DEFAULT_CORES,
        }
    }
}

impl fmt::Display for MachineOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} MB memory, {} cores", self.memory_mb, self.cores)
    }
}
