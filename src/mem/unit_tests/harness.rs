use std::sync::Arc;

use crate::base::behavior::ModuleBehaviors;
use crate::mem::bank::{BankConfig, MemoryBank};
use crate::mem::flit::{RequestFlit, ResponseFlit};
use crate::mem::metadata::{MemLevel, NetworkDestination, RequestMetadata};
use crate::mem::opcode::MemoryOpcode;
use crate::sim::main_mem::{MainMemConfig, MainMemory};

/// Channel the bank under test uses for its own fetch/write-back traffic.
pub const BANK_CHANNEL: u8 = 15;

pub fn head(op: MemoryOpcode, addr: u32, channel: u8) -> RequestFlit {
    RequestFlit::head(addr, RequestMetadata::new(op, NetworkDestination::new(0, channel)))
}

pub fn packet(op: MemoryOpcode, addr: u32, channel: u8, payload: &[u32]) -> Vec<RequestFlit> {
    assert_eq!(op.payload_flits() as usize, payload.len(), "packet shape");
    let mut flits = vec![head(op, addr, channel)];
    for (i, word) in payload.iter().enumerate() {
        flits.push(RequestFlit::payload(*word, i == payload.len() - 1));
    }
    flits
}

/// A single bank wired straight to a backing memory, with every upstream
/// request logged for inspection.
pub struct BankHarness {
    pub bank: MemoryBank,
    pub mem: MainMemory,
    pub responses: Vec<ResponseFlit>,
    pub pushed: Vec<(usize, RequestFlit)>,
    pub upstream_log: Vec<RequestFlit>,
}

impl BankHarness {
    pub fn new(config: BankConfig) -> Self {
        Self::with_latency(config, 4)
    }

    pub fn with_latency(config: BankConfig, latency: u64) -> Self {
        let bank = MemoryBank::new(
            "bank_under_test",
            Arc::new(config),
            MemLevel::L1,
            NetworkDestination::new(0, BANK_CHANNEL),
        );
        Self {
            bank,
            mem: MainMemory::new(MainMemConfig { latency }),
            responses: Vec::new(),
            pushed: Vec::new(),
            upstream_log: Vec::new(),
        }
    }

    pub fn submit(&mut self, flits: &[RequestFlit]) {
        for flit in flits {
            assert!(self.bank.push_request(*flit), "bank input overflow");
        }
    }

    pub fn tick(&mut self) {
        self.bank.tick_one();
        self.mem.tick_one();
        while let Some(flit) = self.bank.pop_upstream_request() {
            self.upstream_log.push(flit);
            self.mem.push_request(flit);
        }
        loop {
            let flit = match self.mem.peek_response() {
                Some(flit) => *flit,
                None => break,
            };
            if flit.destination.channel == BANK_CHANNEL {
                if !self.bank.push_upstream_response(flit) {
                    break;
                }
                self.mem.pop_response();
            } else {
                self.mem.pop_response();
                self.responses.push(flit);
            }
        }
        while let Some(flit) = self.bank.pop_response() {
            self.responses.push(flit);
        }
        while let Some(push) = self.bank.pop_sibling_push() {
            self.pushed.push(push);
        }
    }

    pub fn run(&mut self, cycles: u64) {
        for _ in 0..cycles {
            self.tick();
        }
    }

    /// Tick until both the bank and the memory go quiet.
    pub fn run_until_quiet(&mut self) {
        for _ in 0..1000 {
            self.tick();
            if self.bank.quiescent() && self.mem.quiescent() {
                return;
            }
        }
        panic!("bank did not go quiet within 1000 cycles");
    }

    pub fn run_until_responses(&mut self, count: usize) {
        for _ in 0..1000 {
            if self.responses.len() >= count {
                return;
            }
            self.tick();
        }
        panic!(
            "expected {} responses, got {}",
            count,
            self.responses.len()
        );
    }

    pub fn upstream_heads(&self, op: MemoryOpcode) -> Vec<RequestFlit> {
        self.upstream_log
            .iter()
            .filter(|flit| flit.is_head() && flit.metadata.opcode == op)
            .copied()
            .collect()
    }
}
