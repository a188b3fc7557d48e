use std::sync::Arc;

use crate::base::behavior::ModuleBehaviors;
use crate::base::mem::HasMemory;
use crate::mem::bank::BankConfig;
use crate::mem::claim::BankGroup;
use crate::mem::flit::{RequestFlit, ResponseFlit};
use crate::mem::metadata::MemLevel;
use crate::mem::opcode::MemoryOpcode as Op;
use crate::mem::unit_tests::harness::{head, packet};
use crate::sim::main_mem::{MainMemConfig, MainMemory};

const CHANNEL_BASE: u8 = 4;

/// Bank group on a broadcast bus, wired to a backing memory.
struct GroupHarness {
    group: BankGroup,
    mem: MainMemory,
    collectors: Vec<Vec<RequestFlit>>,
    responses: Vec<ResponseFlit>,
}

impl GroupHarness {
    fn new(num_banks: usize) -> Self {
        let group = BankGroup::new(
            "bank_",
            Arc::new(BankConfig::default()),
            MemLevel::L2,
            num_banks,
            CHANNEL_BASE,
            0,
        );
        Self {
            group,
            mem: MainMemory::new(MainMemConfig { latency: 4 }),
            collectors: (0..num_banks).map(|_| Vec::new()).collect(),
            responses: Vec::new(),
        }
    }

    fn submit(&mut self, flits: &[RequestFlit]) {
        for flit in flits {
            assert!(self.group.push_request(*flit), "bus overflow");
        }
    }

    fn tick(&mut self) {
        self.group.tick_one();
        self.mem.tick_one();
        for j in 0..self.group.num_banks() {
            while let Some(flit) = self.group.banks_mut()[j].pop_upstream_request() {
                self.collectors[j].push(flit);
                if flit.ends_packet() {
                    for flit in self.collectors[j].drain(..) {
                        self.mem.push_request(flit);
                    }
                }
            }
        }
        loop {
            let flit = match self.mem.peek_response() {
                Some(flit) => *flit,
                None => break,
            };
            if flit.destination.channel >= CHANNEL_BASE {
                let bank = (flit.destination.channel - CHANNEL_BASE) as usize;
                if !self.group.banks_mut()[bank].push_upstream_response(flit) {
                    break;
                }
                self.mem.pop_response();
            } else {
                self.mem.pop_response();
                self.responses.push(flit);
            }
        }
        for j in 0..self.group.num_banks() {
            while let Some(flit) = self.group.banks_mut()[j].pop_response() {
                self.responses.push(flit);
            }
        }
    }

    fn run_until_responses(&mut self, count: usize) {
        for _ in 0..1000 {
            if self.responses.len() >= count {
                return;
            }
            self.tick();
        }
        panic!("expected {} responses, got {}", count, self.responses.len());
    }

    fn accesses(&self) -> Vec<u64> {
        self.group.banks().iter().map(|b| b.stats().accesses).collect()
    }
}

#[test]
fn responsible_bank_claims_a_cold_miss() {
    let mut h = GroupHarness::new(2);
    h.mem.write_word(0x20, 77).unwrap();
    // line 1 hashes to bank 1
    h.submit(&[head(Op::LoadW, 0x20, 0)]);
    h.run_until_responses(1);
    assert_eq!(77, h.responses[0].data);
    assert_eq!(vec![0, 1], h.accesses());
}

#[test]
fn hitting_bank_claims_ahead_of_the_responsible_one() {
    let mut h = GroupHarness::new(2);
    // bank 0 holds the line even though bank 1 is the hashed home
    h.group.banks_mut()[0].preload(0x20, &[55]);
    h.submit(&[head(Op::LoadW, 0x20, 0)]);
    h.run_until_responses(1);
    assert_eq!(55, h.responses[0].data);
    assert_eq!(vec![1, 0], h.accesses());
}

#[test]
fn exactly_one_bank_serves_each_request() {
    let mut h = GroupHarness::new(4);
    for i in 0..8u8 {
        h.submit(&[head(Op::LoadW, i as u32 * 0x20, i % 4)]);
    }
    h.run_until_responses(8);
    assert_eq!(8u64, h.accesses().iter().sum::<u64>());
    // line-interleaved hash spreads the cold misses evenly
    assert_eq!(vec![2, 2, 2, 2], h.accesses());
}

#[test]
fn store_line_packet_streams_to_its_owner() {
    let words: Vec<u32> = (30..38).collect();
    let mut h = GroupHarness::new(2);
    h.submit(&packet(Op::StoreLine, 0x40, 1, &words));
    for _ in 0..40 {
        h.tick();
    }
    h.submit(&[head(Op::FetchLine, 0x40, 2)]);
    h.run_until_responses(8);
    let data: Vec<u32> = h.responses.iter().map(|f| f.data).collect();
    assert_eq!(words, data);
    // the store validated its line; nothing was ever fetched upstream
    assert!(h.mem.quiescent());
}

#[test]
fn scratchpad_requests_go_to_the_hashed_bank() {
    let mut h = GroupHarness::new(2);
    let mut store = packet(Op::StoreW, 0x24, 1, &[123]);
    store[0].metadata.scratchpad_l2 = true;
    h.submit(&store);
    let mut load = vec![head(Op::LoadW, 0x24, 2)];
    load[0].metadata.scratchpad_l2 = true;
    h.submit(&load);
    h.run_until_responses(1);
    assert_eq!(123, h.responses[0].data);
    // both requests landed on bank 1, and neither went upstream
    assert_eq!(vec![0, 2], h.accesses());
    assert!(h.mem.quiescent());
}

#[test]
fn back_to_back_packets_claim_independently() {
    let mut h = GroupHarness::new(2);
    h.mem.write_word(0x20, 1).unwrap();
    h.mem.write_word(0x40, 2).unwrap();
    h.submit(&[head(Op::LoadW, 0x20, 0)]); // home bank 1
    h.submit(&[head(Op::LoadW, 0x40, 1)]); // home bank 0
    h.run_until_responses(2);
    assert_eq!(vec![1, 1], h.accesses());
}
