mod common;

pub use common::{display_name_for, parse_memory_to_mb};
