pub mod config;
pub mod driver;
pub mod patterns;

pub use config::{TrafficConfig, TrafficPatternSpec};
pub use driver::TrafficDriver;
pub use patterns::{opcode_from_mnemonic, PatternEngine};
