use anyhow::bail;
use phf::phf_map;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::mem::flit::RequestFlit;
use crate::mem::metadata::{NetworkDestination, RequestMetadata};
use crate::mem::opcode::MemoryOpcode;
use crate::traffic::config::{TrafficConfig, TrafficPatternSpec};

static MNEMONICS: phf::Map<&'static str, MemoryOpcode> = phf_map! {
    "load_w" => MemoryOpcode::LoadW,
    "load_hw" => MemoryOpcode::LoadHw,
    "load_b" => MemoryOpcode::LoadB,
    "store_w" => MemoryOpcode::StoreW,
    "store_hw" => MemoryOpcode::StoreHw,
    "store_b" => MemoryOpcode::StoreB,
    "load_linked" => MemoryOpcode::LoadLinked,
    "store_conditional" => MemoryOpcode::StoreConditional,
    "load_and_add" => MemoryOpcode::LoadAndAdd,
    "load_and_or" => MemoryOpcode::LoadAndOr,
    "load_and_and" => MemoryOpcode::LoadAndAnd,
    "load_and_xor" => MemoryOpcode::LoadAndXor,
    "exchange" => MemoryOpcode::Exchange,
    "fetch_line" => MemoryOpcode::FetchLine,
    "ipk_read" => MemoryOpcode::IpkRead,
    "store_line" => MemoryOpcode::StoreLine,
    "memset_line" => MemoryOpcode::MemsetLine,
    "push_line" => MemoryOpcode::PushLine,
    "validate_line" => MemoryOpcode::ValidateLine,
    "flush_line" => MemoryOpcode::FlushLine,
    "invalidate_line" => MemoryOpcode::InvalidateLine,
    "flush_all_lines" => MemoryOpcode::FlushAllLines,
    "invalidate_all_lines" => MemoryOpcode::InvalidateAllLines,
};

pub fn opcode_from_mnemonic(name: &str) -> Option<MemoryOpcode> {
    MNEMONICS.get(name).copied()
}

#[derive(Debug, Clone)]
enum PatternKind {
    Strided { stride: u32 },
    Random,
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    op: MemoryOpcode,
    kind: PatternKind,
    count: u32,
}

/// Compiles the configured workload into a stream of request packets,
/// round-robined over the core channels.
pub struct PatternEngine {
    patterns: Vec<CompiledPattern>,
    base: u32,
    span: u32,
    rng: StdRng,
    pattern_idx: usize,
    req_idx: u32,
    num_cores: usize,
    next_core: usize,
    tile: u8,
}

impl PatternEngine {
    pub fn compile(
        config: &TrafficConfig,
        num_cores: usize,
        tile: u8,
    ) -> Result<Self, anyhow::Error> {
        let specs: Vec<TrafficPatternSpec> = if config.patterns.is_empty() {
            // a write-then-read sweep keeps the default run self-checking
            vec![
                TrafficPatternSpec {
                    op: "store_w".to_string(),
                    ..TrafficPatternSpec::default()
                },
                TrafficPatternSpec::default(),
            ]
        } else {
            config.patterns.clone()
        };

        let mut patterns = Vec::with_capacity(specs.len());
        for spec in &specs {
            let op = match opcode_from_mnemonic(&spec.op) {
                Some(op) => op,
                None => bail!("unknown opcode mnemonic '{}'", spec.op),
            };
            let kind = match spec.kind.as_str() {
                "strided" => PatternKind::Strided { stride: spec.stride.max(1) },
                "random" => PatternKind::Random,
                other => bail!("unknown pattern kind '{}'", other),
            };
            patterns.push(CompiledPattern {
                op,
                kind,
                count: spec.count.unwrap_or(config.requests_per_pattern).max(1),
            });
        }

        Ok(Self {
            patterns,
            base: config.base_address,
            span: config.span_bytes.max(4),
            rng: StdRng::seed_from_u64(config.seed),
            pattern_idx: 0,
            req_idx: 0,
            num_cores: num_cores.max(1),
            next_core: 0,
            tile,
        })
    }

    fn next_address(&mut self) -> u32 {
        let pattern = &self.patterns[self.pattern_idx];
        let offset = match pattern.kind {
            PatternKind::Strided { stride } => {
                (self.req_idx.wrapping_mul(stride)) % self.span
            }
            PatternKind::Random => self.rng.gen_range(0..self.span / 4) * 4,
        };
        self.base.wrapping_add(offset)
    }

    pub fn next_packet(&mut self) -> Option<Vec<RequestFlit>> {
        if self.pattern_idx >= self.patterns.len() {
            return None;
        }
        let addr = self.next_address();
        let (op, count) = {
            let pattern = &self.patterns[self.pattern_idx];
            (pattern.op, pattern.count)
        };

        let destination = NetworkDestination::new(self.tile, self.next_core as u8);
        self.next_core = (self.next_core + 1) % self.num_cores;

        let mut packet = Vec::with_capacity(1 + op.payload_flits() as usize);
        packet.push(RequestFlit::head(addr, RequestMetadata::new(op, destination)));
        let payloads = op.payload_flits();
        for i in 0..payloads {
            let word = self.req_idx.wrapping_mul(0x9e37_79b9).wrapping_add(i);
            packet.push(RequestFlit::payload(word, i == payloads - 1));
        }

        self.req_idx += 1;
        if self.req_idx >= count {
            self.req_idx = 0;
            self.pattern_idx += 1;
        }
        Some(packet)
    }
}
