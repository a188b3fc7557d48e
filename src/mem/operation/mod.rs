use smallvec::SmallVec;

use crate::mem::address::{MemoryAddr, SramAddress};
use crate::mem::bank::BankCore;
use crate::mem::flit::RequestFlit;
use crate::mem::metadata::{MemLevel, NetworkDestination, RequestMetadata};

pub mod atomic;
pub mod control;
pub mod line;
pub mod scalar;

/// State shared by every in-flight memory operation: the wire request it was
/// created from, its progress counters, and the SRAM position resolved by
/// `prepare`.
#[derive(Debug)]
pub struct OperationBase {
    pub address: MemoryAddr,
    pub metadata: RequestMetadata,
    pub destination: NetworkDestination,
    pub level: MemLevel,
    pub scratchpad: bool,
    /// Payload words that have not yet arrived from the network.
    pub awaiting_payloads: u32,
    /// Payload words that have arrived but not been consumed.
    pub payload_buffer: SmallVec<[u32; 8]>,
    pub results_remaining: u32,
    pub sram: Option<SramAddress>,
    pub missed: bool,
    pub forwarded_head: bool,
}

impl OperationBase {
    pub fn new(head: &RequestFlit, level: MemLevel, bank_scratchpad: bool) -> Self {
        let metadata = head.metadata;
        Self {
            address: head.address(),
            metadata,
            destination: metadata.return_to,
            level,
            scratchpad: bank_scratchpad || metadata.scratchpad_at(level),
            awaiting_payloads: metadata.opcode.payload_flits(),
            payload_buffer: SmallVec::new(),
            results_remaining: metadata.opcode.result_flits(),
            sram: None,
            missed: false,
            forwarded_head: false,
        }
    }

    pub fn deliver_payload(&mut self, word: u32) {
        assert!(self.awaiting_payloads > 0, "stray payload flit");
        self.awaiting_payloads -= 1;
        self.payload_buffer.push(word);
    }

    pub fn payload_ready(&self) -> bool {
        !self.payload_buffer.is_empty()
    }

    pub fn take_payload(&mut self) -> u32 {
        self.payload_buffer.remove(0)
    }

    /// Load-style residency step: resolve the SRAM position, or flag a miss
    /// so the controller fetches the line.
    pub fn probe_or_allocate(&mut self, core: &mut BankCore) {
        if self.sram.is_some() {
            return;
        }
        match core.probe(self.address, self.scratchpad) {
            Some(sram) => {
                self.sram = Some(sram);
                self.missed = false;
            }
            None => {
                self.missed = true;
                core.request_line(self.address);
            }
        }
    }

    /// Full-line-write residency step: claim the slot without fetching. The
    /// claim is deferred while a dirty victim still needs writing back.
    pub fn probe_or_validate(&mut self, core: &mut BankCore) {
        if self.sram.is_some() {
            return;
        }
        if let Some(sram) = core.probe(self.address, self.scratchpad) {
            self.sram = Some(sram);
            return;
        }
        self.sram = core.validate_line(self.address, self.scratchpad);
    }
}

/// Uniform lifecycle of every memory operation. The controller calls
/// `prepare` until `preconditions_met`, then `execute` until `complete`.
pub trait MemoryOperation {
    fn base(&self) -> &OperationBase;
    fn base_mut(&mut self) -> &mut OperationBase;

    /// Non-blocking preparatory step; safe to call repeatedly.
    fn prepare(&mut self, core: &mut BankCore);

    /// True once the operation may begin transferring data.
    fn preconditions_met(&self) -> bool;

    /// One unit of work per call.
    fn execute(&mut self, core: &mut BankCore);

    fn complete(&self) -> bool {
        let base = self.base();
        self.preconditions_met()
            && base.awaiting_payloads == 0
            && base.payload_buffer.is_empty()
            && base.results_remaining == 0
    }

    /// True if this bank is not responsible for the address and the request
    /// must be passed on to the next hierarchy level unmodified.
    fn needs_forwarding(&self) -> bool {
        let base = self.base();
        base.metadata.opcode.is_directory_update() || base.metadata.skips(base.level)
    }

    fn name(&self) -> &'static str {
        self.base().metadata.opcode.mnemonic()
    }
}

/// Implements the `base`/`base_mut` accessors for an operation struct whose
/// shared state lives in a `base` field.
macro_rules! operation_base {
    () => {
        fn base(&self) -> &OperationBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut OperationBase {
            &mut self.base
        }
    };
}

pub(crate) use operation_base;
