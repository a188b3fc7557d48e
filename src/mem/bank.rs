use std::ops::AddAssign;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::base::behavior::ModuleBehaviors;
use crate::mem::address::{
    line_base, MemoryAddr, SramAddress, BYTES_PER_LINE, BYTES_PER_WORD, WORDS_PER_LINE,
};
use crate::mem::decode::decode_operation;
use crate::mem::flit::{RequestFlit, ResponseFlit};
use crate::mem::metadata::{MemLevel, NetworkDestination, RequestMetadata};
use crate::mem::opcode::MemoryOpcode;
use crate::mem::operation::scalar::AccessWidth;
use crate::mem::operation::{MemoryOperation, OperationBase};
use crate::mem::queue::FlitQueue;
use crate::mem::reservation::ReservationTable;
use crate::mem::storage::BankStorage;
use crate::sim::config::Config;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    pub lines: usize,
    pub queue_depth: usize,
    pub hit_under_miss: bool,
    pub scratchpad: bool,
    pub readonly_fatal: bool,
    pub reservation_capacity: usize,
    pub group_banks: usize,
}

impl Config for BankConfig {}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            lines: 64,
            queue_depth: 16,
            hit_under_miss: false,
            scratchpad: false,
            readonly_fatal: false,
            reservation_capacity: 8,
            group_banks: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BankStats {
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
    pub refills: u64,
    pub lines_flushed: u64,
    pub forwarded: u64,
    pub results_sent: u64,
    pub sc_failures: u64,
}

impl AddAssign<&BankStats> for BankStats {
    fn add_assign(&mut self, other: &BankStats) {
        self.accesses = self.accesses.saturating_add(other.accesses);
        self.hits = self.hits.saturating_add(other.hits);
        self.misses = self.misses.saturating_add(other.misses);
        self.refills = self.refills.saturating_add(other.refills);
        self.lines_flushed = self.lines_flushed.saturating_add(other.lines_flushed);
        self.forwarded = self.forwarded.saturating_add(other.forwarded);
        self.results_sent = self.results_sent.saturating_add(other.results_sent);
        self.sc_failures = self.sc_failures.saturating_add(other.sc_failures);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankState {
    Idle,
    Request,
    Allocate,
    Flush,
    Refill,
}

/// The bank-side surface operations run against: the SRAM and its metadata,
/// the reservation table, the result queue, and the rendezvous slots through
/// which an operation hands miss/write-back work to the controller.
pub struct BankCore {
    pub(crate) storage: BankStorage,
    pub(crate) reservations: ReservationTable,
    pub(crate) stats: BankStats,
    group_banks: usize,
    miss_request: Option<MemoryAddr>,
    writeback_request: Option<usize>,
    output: FlitQueue<ResponseFlit>,
    push_out: FlitQueue<(usize, RequestFlit)>,
}

impl BankCore {
    fn new(config: &BankConfig) -> Self {
        Self {
            storage: BankStorage::new(config.lines, config.group_banks, config.readonly_fatal),
            reservations: ReservationTable::new(config.reservation_capacity),
            stats: BankStats::default(),
            group_banks: config.group_banks.max(1),
            miss_request: None,
            writeback_request: None,
            output: FlitQueue::new(config.queue_depth),
            push_out: FlitQueue::new(config.queue_depth),
        }
    }

    pub fn probe(&self, addr: MemoryAddr, scratchpad: bool) -> Option<SramAddress> {
        self.storage.probe(addr, scratchpad)
    }

    /// Called by an operation whose target line is absent; the controller
    /// picks this up and fetches the line.
    pub fn request_line(&mut self, addr: MemoryAddr) {
        self.miss_request = Some(line_base(addr));
    }

    /// Claim the slot for a full-line write without fetching. Returns `None`
    /// while a dirty victim still has to be written back first.
    pub fn validate_line(&mut self, addr: MemoryAddr, scratchpad: bool) -> Option<SramAddress> {
        if scratchpad {
            return self.storage.probe(addr, true);
        }
        if self.writeback_request.is_some() {
            return None;
        }
        if let Some((victim, dirty)) = self.storage.victim(addr) {
            if victim != line_base(addr) {
                if dirty {
                    self.writeback_request = Some(self.storage.slot_of(addr));
                    return None;
                }
                self.reservations.clear_range(victim, BYTES_PER_LINE);
            }
        }
        Some(self.storage.claim(addr, false))
    }

    pub fn request_writeback(&mut self, slot: usize) {
        debug_assert!(self.writeback_request.is_none());
        self.writeback_request = Some(slot);
    }

    pub fn writeback_busy(&self) -> bool {
        self.writeback_request.is_some()
    }

    pub fn invalidate(&mut self, addr: MemoryAddr, scratchpad: bool) {
        if !scratchpad {
            self.reservations.clear_range(line_base(addr), BYTES_PER_LINE);
        }
        self.storage.invalidate(addr, scratchpad);
    }

    pub fn invalidate_slot(&mut self, slot: usize) {
        self.storage.invalidate_slot(slot);
    }

    pub fn slot_of(&self, addr: MemoryAddr) -> usize {
        self.storage.slot_of(addr)
    }

    pub fn slot_tag(&self, slot: usize) -> Option<MemoryAddr> {
        self.storage.slot_tag(slot)
    }

    pub fn slot_dirty(&self, slot: usize) -> bool {
        self.storage.slot_dirty(slot)
    }

    pub fn line_count(&self) -> usize {
        self.storage.line_count()
    }

    pub fn group_banks(&self) -> usize {
        self.group_banks
    }

    pub fn read_word(&self, sram: SramAddress) -> u32 {
        self.storage.read_word(sram)
    }

    pub fn read_scalar(&self, sram: SramAddress, width: AccessWidth) -> u32 {
        match width {
            AccessWidth::Word => self.storage.read_word(sram),
            AccessWidth::Half => self.storage.read_halfword(sram),
            AccessWidth::Byte => self.storage.read_byte(sram),
        }
    }

    /// Scalar write path: read-only check, width merge, reservation kill.
    pub fn write_scalar(
        &mut self,
        addr: MemoryAddr,
        sram: SramAddress,
        data: u32,
        width: AccessWidth,
        scratchpad: bool,
    ) {
        self.storage.check_write(addr);
        match width {
            AccessWidth::Word => self.storage.write_word(sram, data, scratchpad),
            AccessWidth::Half => self.storage.write_halfword(sram, data, scratchpad),
            AccessWidth::Byte => self.storage.write_byte(sram, data, scratchpad),
        }
        self.reservations.clear_word(addr);
    }

    pub fn write_line_word(
        &mut self,
        addr: MemoryAddr,
        sram: SramAddress,
        data: u32,
        scratchpad: bool,
    ) {
        self.storage.check_write(addr);
        self.storage.write_word(sram, data, scratchpad);
        self.reservations.clear_word(addr);
    }

    pub fn can_send(&self) -> bool {
        self.output.has_space()
    }

    pub fn send(&mut self, destination: NetworkDestination, data: u32, last: bool) {
        let ok = self.output.try_enq(ResponseFlit::new(data, destination, last));
        assert!(ok, "send without output space");
        self.stats.results_sent = self.stats.results_sent.saturating_add(1);
    }

    pub fn can_push(&self) -> bool {
        self.push_out.has_space()
    }

    pub fn push_to_sibling(&mut self, target: usize, flit: RequestFlit) {
        let ok = self.push_out.try_enq((target, flit));
        assert!(ok, "push without forward space");
    }
}

/// Victim line snapshotted for write-back, streamed upstream one word per
/// cycle as a `StoreLine` packet.
struct FlushJob {
    addr: MemoryAddr,
    words: [u32; WORDS_PER_LINE as usize],
    head_sent: bool,
    sent: usize,
}

struct RefillJob {
    addr: MemoryAddr,
    sram: SramAddress,
    received: u32,
}

/// Per-bank cache/scratchpad storage controller. Owns the SRAM and the
/// request/response queues and runs decoded operations to completion,
/// handling misses, victim write-back, refill and (optionally)
/// hit-under-miss.
pub struct MemoryBank {
    name: String,
    level: MemLevel,
    config: Arc<BankConfig>,
    state: BankState,
    active: Option<Box<dyn MemoryOperation>>,
    /// Operation parked on an outstanding miss.
    missing: Option<Box<dyn MemoryOperation>>,
    input: FlitQueue<RequestFlit>,
    upstream_req: FlitQueue<RequestFlit>,
    upstream_resp: FlitQueue<ResponseFlit>,
    flush: Option<FlushJob>,
    flush_resume: BankState,
    refill: Option<RefillJob>,
    fetch_to_send: Option<MemoryAddr>,
    alloc_addr: Option<MemoryAddr>,
    own_channel: NetworkDestination,
    cycle: u64,
    pub(crate) core: BankCore,
}

impl MemoryBank {
    pub fn new(
        name: impl Into<String>,
        config: Arc<BankConfig>,
        level: MemLevel,
        own_channel: NetworkDestination,
    ) -> Self {
        let core = BankCore::new(&config);
        Self {
            name: name.into(),
            level,
            state: BankState::Idle,
            active: None,
            missing: None,
            input: FlitQueue::new(config.queue_depth),
            upstream_req: FlitQueue::new(config.queue_depth),
            upstream_resp: FlitQueue::new(2 * WORDS_PER_LINE as usize),
            flush: None,
            flush_resume: BankState::Idle,
            refill: None,
            fetch_to_send: None,
            alloc_addr: None,
            own_channel,
            cycle: 0,
            config,
            core,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> MemLevel {
        self.level
    }

    pub fn stats(&self) -> BankStats {
        self.core.stats
    }

    pub fn push_request(&mut self, flit: RequestFlit) -> bool {
        self.input.try_enq(flit)
    }

    pub fn has_input_space(&self) -> bool {
        self.input.has_space()
    }

    pub fn pop_response(&mut self) -> Option<ResponseFlit> {
        self.core.output.try_deq()
    }

    pub fn peek_response(&self) -> Option<&ResponseFlit> {
        self.core.output.peek()
    }

    pub fn pop_upstream_request(&mut self) -> Option<RequestFlit> {
        self.upstream_req.try_deq()
    }

    pub fn peek_upstream_request(&self) -> Option<&RequestFlit> {
        self.upstream_req.peek()
    }

    pub fn push_upstream_response(&mut self, flit: ResponseFlit) -> bool {
        self.upstream_resp.try_enq(flit)
    }

    pub fn pop_sibling_push(&mut self) -> Option<(usize, RequestFlit)> {
        self.core.push_out.try_deq()
    }

    /// Read-only tag probe used by the ownership resolver: true on a local
    /// cache hit. Scratchpad requests never claim by hit; the statically
    /// responsible bank takes them.
    pub fn claim_hit(&self, head: &RequestFlit) -> bool {
        if self.serves_scratchpad(&head.metadata) {
            return false;
        }
        self.core.storage.contains(head.address(), false)
    }

    /// Whether this bank would serve the request in scratchpad mode, by its
    /// own configuration or the request's per-level flag.
    pub fn serves_scratchpad(&self, metadata: &RequestMetadata) -> bool {
        self.config.scratchpad || metadata.scratchpad_at(self.level)
    }

    /// Bulk initialization: write a flat word array without going through
    /// the wire protocol. Lines come up valid and clean.
    pub fn preload(&mut self, base: MemoryAddr, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            let addr = base + i as u32 * BYTES_PER_WORD;
            let sram = match self.core.storage.probe(addr, self.config.scratchpad) {
                Some(sram) => sram,
                None => self.core.storage.claim(addr, false),
            };
            self.core.storage.write_word_raw(sram, *word);
        }
    }

    pub fn add_readonly(&mut self, start: MemoryAddr, size: u32) {
        self.core.storage.add_readonly(start, size);
    }

    pub fn quiescent(&self) -> bool {
        self.state == BankState::Idle
            && self.active.is_none()
            && self.missing.is_none()
            && self.flush.is_none()
            && self.refill.is_none()
            && self.input.is_empty()
            && self.upstream_req.is_empty()
            && self.upstream_resp.is_empty()
            && self.core.output.is_empty()
            && self.core.push_out.is_empty()
    }

    /// A new request may start if one is waiting and either nothing is
    /// missing, or hit-under-miss admits it: already a hit, and bound for a
    /// different destination than the parked operation (requests sharing a
    /// destination are never reordered).
    fn can_accept_request(&self) -> bool {
        let head = match self.input.peek() {
            Some(flit) if flit.is_head() => flit,
            _ => return false,
        };
        let missing = match &self.missing {
            None => return true,
            Some(op) => op,
        };
        if !self.config.hit_under_miss {
            return false;
        }
        let meta = head.metadata;
        if meta.return_to == missing.base().destination {
            return false;
        }
        let scratchpad = self.config.scratchpad || meta.scratchpad_at(self.level);
        self.core.storage.contains(head.address(), scratchpad)
    }

    fn accept_request(&mut self) {
        let head = self.input.try_deq().expect("accept without a queued head");
        self.core.stats.accesses = self.core.stats.accesses.saturating_add(1);
        let op = decode_operation(&head, self.level, self.config.scratchpad);
        if !op.needs_forwarding()
            && self
                .core
                .storage
                .contains(head.address(), op.base().scratchpad)
        {
            self.core.stats.hits = self.core.stats.hits.saturating_add(1);
        }
        debug!(
            "{}: cycle {}: {} @ {:#010x} for {:?}",
            self.name,
            self.cycle,
            op.name(),
            head.address(),
            head.metadata.return_to
        );
        self.active = Some(op);
        self.state = BankState::Request;
    }

    /// Move arriving payload flits into the operation whose packet is still
    /// streaming. Packets are contiguous on the wire, so at most one parked
    /// or active operation expects payloads at any time.
    fn deliver_payloads(&mut self) {
        loop {
            match self.input.peek() {
                Some(flit) if !flit.is_head() => {}
                _ => break,
            }
            let flit = self.input.try_deq().unwrap();
            if let Some(op) = self
                .active
                .as_mut()
                .filter(|op| op.base().awaiting_payloads > 0)
            {
                op.base_mut().deliver_payload(flit.data);
            } else if let Some(op) = self
                .missing
                .as_mut()
                .filter(|op| op.base().awaiting_payloads > 0)
            {
                op.base_mut().deliver_payload(flit.data);
            } else {
                panic!("{}: stray payload flit with no receiving operation", self.name);
            }
        }
    }

    fn finish_state(&mut self, completed: bool) -> BankState {
        if !completed {
            BankState::Request
        } else if self.missing.is_some() {
            BankState::Allocate
        } else {
            BankState::Idle
        }
    }

    fn step_request(&mut self) {
        let mut op = self
            .active
            .take()
            .expect("request state without an active operation");
        if op.needs_forwarding() {
            let done = Self::step_forward(&mut self.upstream_req, op.base_mut());
            if done {
                self.core.stats.forwarded = self.core.stats.forwarded.saturating_add(1);
                debug!("{}: forwarded {} @ {:#010x}", self.name, op.name(), op.base().address);
                self.state = self.finish_state(true);
            } else {
                self.active = Some(op);
            }
            return;
        }
        if !op.preconditions_met() {
            op.prepare(&mut self.core);
            if let Some(line) = self.core.miss_request.take() {
                self.core.stats.misses = self.core.stats.misses.saturating_add(1);
                debug!("{}: miss @ {:#010x}", self.name, line);
                self.alloc_addr = Some(line);
                self.fetch_to_send = Some(line);
                self.missing = Some(op);
                self.state = BankState::Allocate;
                self.step_allocate();
                return;
            }
            if self.core.writeback_request.is_some() {
                // validate blocked behind a dirty victim
                self.active = Some(op);
                self.start_writeback(BankState::Request);
                return;
            }
        }
        if op.preconditions_met() {
            op.execute(&mut self.core);
        }
        let completed = op.complete();
        if completed {
            debug!("{}: completed {}", self.name, op.name());
        } else {
            self.active = Some(op);
        }
        let resume = self.finish_state(completed);
        if self.core.writeback_request.is_some() {
            self.start_writeback(resume);
        } else {
            self.state = resume;
        }
    }

    fn step_forward(upstream: &mut FlitQueue<RequestFlit>, base: &mut OperationBase) -> bool {
        if !base.forwarded_head {
            if !upstream.has_space() {
                return false;
            }
            upstream.try_enq(RequestFlit::head(base.address, base.metadata));
            base.forwarded_head = true;
        }
        while base.payload_ready() && upstream.has_space() {
            let last = base.awaiting_payloads == 0 && base.payload_buffer.len() == 1;
            let word = base.take_payload();
            upstream.try_enq(RequestFlit::payload(word, last));
        }
        base.forwarded_head && base.awaiting_payloads == 0 && base.payload_buffer.is_empty()
    }

    fn start_writeback(&mut self, resume: BankState) {
        let slot = self
            .core
            .writeback_request
            .take()
            .expect("writeback without a requested slot");
        let addr = self
            .core
            .storage
            .slot_tag(slot)
            .expect("writeback of an invalid slot");
        let words = self.core.storage.read_slot(slot);
        self.core.storage.mark_clean(slot);
        self.flush = Some(FlushJob {
            addr,
            words,
            head_sent: false,
            sent: 0,
        });
        self.flush_resume = resume;
        self.state = BankState::Flush;
    }

    fn step_flush(&mut self) {
        let job = self.flush.as_mut().expect("flush state without a flush job");
        if !job.head_sent {
            if self.upstream_req.has_space() {
                let meta = RequestMetadata {
                    opcode: MemoryOpcode::StoreLine,
                    return_to: self.own_channel,
                    ..RequestMetadata::default()
                };
                self.upstream_req.try_enq(RequestFlit::head(job.addr, meta));
                job.head_sent = true;
            }
            return;
        }
        if job.sent < WORDS_PER_LINE as usize && self.upstream_req.has_space() {
            let last = job.sent == WORDS_PER_LINE as usize - 1;
            self.upstream_req
                .try_enq(RequestFlit::payload(job.words[job.sent], last));
            job.sent += 1;
        }
        if job.sent == WORDS_PER_LINE as usize {
            self.core.stats.lines_flushed = self.core.stats.lines_flushed.saturating_add(1);
            debug!("{}: flushed line {:#010x}", self.name, job.addr);
            self.flush = None;
            self.state = self.flush_resume;
        }
    }

    fn step_allocate(&mut self) {
        // the fetch goes out first; a dirty victim's write-back overlaps the
        // refill latency
        if let Some(line) = self.fetch_to_send {
            if self.upstream_req.has_space() {
                let meta = RequestMetadata {
                    opcode: MemoryOpcode::FetchLine,
                    return_to: self.own_channel,
                    ..RequestMetadata::default()
                };
                self.upstream_req.try_enq(RequestFlit::head(line, meta));
                self.fetch_to_send = None;
            }
        }
        if self.refill.is_none() {
            // resolve the victim, then reserve the slot
            let addr = self.alloc_addr.expect("allocate without a missing line");
            match self.core.storage.victim(addr) {
                Some((victim, true)) => {
                    self.core.reservations.clear_range(victim, BYTES_PER_LINE);
                    self.core.writeback_request = Some(self.core.storage.slot_of(addr));
                    self.start_writeback(BankState::Allocate);
                    return;
                }
                Some((victim, false)) => {
                    self.core.reservations.clear_range(victim, BYTES_PER_LINE);
                }
                None => {}
            }
            let sram = self.core.storage.reserve_for_refill(addr);
            self.refill = Some(RefillJob {
                addr,
                sram,
                received: 0,
            });
        }
        if self.refill.is_some() && self.fetch_to_send.is_none() && !self.upstream_resp.is_empty() {
            self.state = BankState::Refill;
            self.step_refill();
            return;
        }
        // hit-under-miss: admit a compatible hit while the refill is pending
        if self.config.hit_under_miss && self.active.is_none() && self.can_accept_request() {
            self.accept_request();
            self.step_request();
        }
    }

    fn step_refill(&mut self) {
        let job = self.refill.as_mut().expect("refill state without a refill job");
        if let Some(flit) = self.upstream_resp.try_deq() {
            self.core
                .storage
                .write_word_raw(job.sram + job.received * BYTES_PER_WORD, flit.data);
            self.core
                .reservations
                .clear_word(job.addr + job.received * BYTES_PER_WORD);
            job.received += 1;
            if job.received == WORDS_PER_LINE {
                assert!(flit.last, "refill packet longer than a line");
                self.core.storage.refill_done();
                self.core.stats.refills = self.core.stats.refills.saturating_add(1);
                debug!("{}: refilled {:#010x}", self.name, job.addr);
                self.refill = None;
                self.alloc_addr = None;
                assert!(self.active.is_none(), "refill completed under an active operation");
                let mut op = self
                    .missing
                    .take()
                    .expect("refill completed with no parked operation");
                op.base_mut().missed = false;
                self.active = Some(op);
                self.state = BankState::Request;
            }
        }
    }

    fn step_idle(&mut self) {
        debug_assert!(self.missing.is_none(), "idle with a parked miss");
        if self.can_accept_request() {
            self.accept_request();
            self.step_request();
        }
    }
}

impl ModuleBehaviors for MemoryBank {
    fn tick_one(&mut self) {
        self.cycle += 1;
        self.deliver_payloads();
        match self.state {
            BankState::Idle => self.step_idle(),
            BankState::Request => self.step_request(),
            BankState::Allocate => self.step_allocate(),
            BankState::Flush => self.step_flush(),
            BankState::Refill => self.step_refill(),
        }
    }

    fn reset(&mut self) {
        self.state = BankState::Idle;
        self.active = None;
        self.missing = None;
        self.flush = None;
        self.refill = None;
        self.fetch_to_send = None;
        self.alloc_addr = None;
        self.input.clear();
        self.upstream_req.clear();
        self.upstream_resp.clear();
        self.core.output.clear();
        self.core.push_out.clear();
        self.core.miss_request = None;
        self.core.writeback_request = None;
        self.core.storage.reset();
        self.core.reservations.reset();
    }
}
