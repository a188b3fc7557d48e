use std::sync::Arc;

use log::debug;

use crate::base::behavior::ModuleBehaviors;
use crate::mem::address::BYTES_PER_LINE;
use crate::mem::bank::{BankConfig, MemoryBank};
use crate::mem::flit::RequestFlit;
use crate::mem::metadata::{MemLevel, NetworkDestination};
use crate::mem::queue::FlitQueue;

/// Per-bank ownership state for one broadcast request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    /// No claim on the current request.
    Idle,
    /// Tag-missed locally; waiting one cycle to see if a sibling claims.
    Wait,
    /// Claimed; forwarding flits into this bank's own pipeline.
    Acknowledge,
}

/// A group of banks sharing one broadcast request bus. Each request is
/// claimed by exactly one bank without a central arbiter: a bank claims
/// immediately on a local tag hit; otherwise the statically hashed
/// responsible bank claims after a one-cycle grace window in which no
/// sibling has claimed.
pub struct BankGroup {
    banks: Vec<MemoryBank>,
    bus: FlitQueue<RequestFlit>,
    claims: Vec<ClaimState>,
    owner: Option<usize>,
}

impl BankGroup {
    pub fn new(
        name_prefix: &str,
        config: Arc<BankConfig>,
        level: MemLevel,
        num_banks: usize,
        channel_base: u8,
        tile: u8,
    ) -> Self {
        assert!(num_banks.is_power_of_two(), "bank group must be a power of two");
        let mut group_config = *config;
        group_config.group_banks = num_banks;
        let group_config = Arc::new(group_config);
        let banks = (0..num_banks)
            .map(|i| {
                MemoryBank::new(
                    format!("{name_prefix}{i}"),
                    Arc::clone(&group_config),
                    level,
                    NetworkDestination::new(tile, channel_base + i as u8),
                )
            })
            .collect();
        Self {
            banks,
            bus: FlitQueue::new(group_config.queue_depth),
            claims: vec![ClaimState::Idle; num_banks],
            owner: None,
        }
    }

    pub fn num_banks(&self) -> usize {
        self.banks.len()
    }

    pub fn banks(&self) -> &[MemoryBank] {
        &self.banks
    }

    pub fn banks_mut(&mut self) -> &mut [MemoryBank] {
        &mut self.banks
    }

    /// Broadcast-bus ingress.
    pub fn push_request(&mut self, flit: RequestFlit) -> bool {
        self.bus.try_enq(flit)
    }

    pub fn bus_has_space(&self) -> bool {
        self.bus.has_space()
    }

    /// The bank statically responsible for an address: the line-interleaved
    /// hash designates exactly one claimant, which is what guarantees
    /// liveness when every bank tag-misses.
    pub fn responsible_bank(&self, addr: u32) -> usize {
        (addr / BYTES_PER_LINE) as usize % self.banks.len()
    }

    pub fn quiescent(&self) -> bool {
        self.owner.is_none() && self.bus.is_empty() && self.banks.iter().all(MemoryBank::quiescent)
    }

    fn resolve_owner(&mut self) {
        let head = match self.bus.peek() {
            Some(flit) => *flit,
            None => return,
        };
        assert!(head.is_head(), "ownership resolution on a payload flit");
        let addr = head.address();
        let responsible = self.responsible_bank(addr);

        // Scratchpad requests never tag-hit; the hash decides immediately.
        let scratchpad = self.banks[responsible].serves_scratchpad(&head.metadata);
        let claimant = if scratchpad {
            Some(responsible)
        } else if let Some(hit) = self.banks.iter().position(|b| b.claim_hit(&head)) {
            Some(hit)
        } else if self.claims[responsible] == ClaimState::Wait {
            // grace cycle elapsed with no sibling claim
            Some(responsible)
        } else {
            self.claims[responsible] = ClaimState::Wait;
            None
        };

        if let Some(owner) = claimant {
            debug!(
                "{}: claimed request @ {:#010x}",
                self.banks[owner].name(),
                addr
            );
            self.claims[responsible] = ClaimState::Idle;
            self.claims[owner] = ClaimState::Acknowledge;
            self.owner = Some(owner);
        }
    }

    fn stream_to_owner(&mut self) {
        let owner = match self.owner {
            Some(owner) => owner,
            None => return,
        };
        while let Some(flit) = self.bus.peek() {
            let flit = *flit;
            if !self.banks[owner].has_input_space() {
                break;
            }
            self.bus.try_deq();
            let ok = self.banks[owner].push_request(flit);
            assert!(ok);
            if flit.ends_packet() {
                self.claims[owner] = ClaimState::Idle;
                self.owner = None;
                break;
            }
        }
    }
}

impl ModuleBehaviors for BankGroup {
    fn tick_one(&mut self) {
        if self.owner.is_none() {
            self.resolve_owner();
        }
        self.stream_to_owner();
        self.banks.iter_mut().for_each(MemoryBank::tick_one);
    }

    fn reset(&mut self) {
        self.bus.clear();
        self.claims.fill(ClaimState::Idle);
        self.owner = None;
        self.banks.iter_mut().for_each(MemoryBank::reset);
    }
}
