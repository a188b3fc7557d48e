use serde::Deserialize;

use crate::sim::config::Config;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    pub requests_per_pattern: u32,
    pub max_inflight: usize,
    pub base_address: u32,
    pub span_bytes: u32,
    pub seed: u64,
    pub patterns: Vec<TrafficPatternSpec>,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            requests_per_pattern: 256,
            max_inflight: 8,
            base_address: 0x1000,
            span_bytes: 64 << 10,
            seed: 0,
            patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficPatternSpec {
    /// Opcode mnemonic, e.g. "load_w" or "store_line".
    pub op: String,
    /// "strided" or "random".
    pub kind: String,
    pub stride: u32,
    pub count: Option<u32>,
}

impl Default for TrafficPatternSpec {
    fn default() -> Self {
        Self {
            op: "load_w".to_string(),
            kind: "strided".to_string(),
            stride: 4,
            count: None,
        }
    }
}
