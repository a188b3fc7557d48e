use crate::mem::address::align_down;
use crate::mem::bank::BankCore;
use crate::mem::flit::RequestFlit;
use crate::mem::metadata::MemLevel;
use crate::mem::operation::scalar::{check_alignment, AccessWidth};
use crate::mem::operation::{operation_base, MemoryOperation, OperationBase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmwKind {
    Add,
    Or,
    And,
    Xor,
    Exchange,
}

impl RmwKind {
    fn combine(self, old: u32, operand: u32) -> u32 {
        match self {
            Self::Add => old.wrapping_add(operand),
            Self::Or => old | operand,
            Self::And => old & operand,
            Self::Xor => old ^ operand,
            Self::Exchange => operand,
        }
    }
}

/// Read-modify-write atomic. Phase 1 reads the old word and returns it as
/// the result; phase 2 combines it with the incoming payload and writes
/// back. Both phases run inside `execute`, gated by whether a result or a
/// payload is currently outstanding.
pub struct AtomicRmw {
    base: OperationBase,
    kind: RmwKind,
    old: Option<u32>,
}

impl AtomicRmw {
    pub fn new(head: &RequestFlit, level: MemLevel, bank_scratchpad: bool, kind: RmwKind) -> Self {
        Self {
            base: OperationBase::new(head, level, bank_scratchpad),
            kind,
            old: None,
        }
    }
}

impl MemoryOperation for AtomicRmw {
    operation_base!();

    fn prepare(&mut self, core: &mut BankCore) {
        self.base.probe_or_allocate(core);
    }

    fn preconditions_met(&self) -> bool {
        self.base.sram.is_some()
    }

    fn execute(&mut self, core: &mut BankCore) {
        let sram = self.base.sram.expect("atomic executed before allocation");
        match self.old {
            None => {
                if !core.can_send() {
                    return;
                }
                check_alignment(self.base.address, AccessWidth::Word);
                let old = core.read_scalar(sram, AccessWidth::Word);
                core.send(self.base.destination, old, true);
                self.base.results_remaining -= 1;
                self.old = Some(old);
            }
            Some(old) => {
                if !self.base.payload_ready() {
                    return;
                }
                let operand = self.base.take_payload();
                let merged = self.kind.combine(old, operand);
                core.write_scalar(
                    self.base.address,
                    sram,
                    merged,
                    AccessWidth::Word,
                    self.base.scratchpad,
                );
            }
        }
    }
}

/// Load-linked: a word load that additionally registers a reservation for
/// the requester.
pub struct LoadLinked {
    base: OperationBase,
}

impl LoadLinked {
    pub fn new(head: &RequestFlit, level: MemLevel, bank_scratchpad: bool) -> Self {
        Self {
            base: OperationBase::new(head, level, bank_scratchpad),
        }
    }
}

impl MemoryOperation for LoadLinked {
    operation_base!();

    fn prepare(&mut self, core: &mut BankCore) {
        self.base.probe_or_allocate(core);
    }

    fn preconditions_met(&self) -> bool {
        self.base.sram.is_some()
    }

    fn execute(&mut self, core: &mut BankCore) {
        if self.base.results_remaining == 0 || !core.can_send() {
            return;
        }
        check_alignment(self.base.address, AccessWidth::Word);
        let sram = self.base.sram.expect("load-linked executed before allocation");
        let value = core.read_scalar(sram, AccessWidth::Word);
        core.reservations
            .make(self.base.destination, align_down(self.base.address, 4), sram);
        core.send(self.base.destination, value, true);
        self.base.results_remaining -= 1;
    }
}

/// Store-conditional. Phase 1 checks residency and reservation validity and
/// emits a boolean success flit; a stale reservation is a normal outcome,
/// never a failed precondition. Phase 2 consumes the payload and writes only
/// if phase 1 succeeded.
pub struct StoreConditional {
    base: OperationBase,
    success: Option<bool>,
}

impl StoreConditional {
    pub fn new(head: &RequestFlit, level: MemLevel, bank_scratchpad: bool) -> Self {
        Self {
            base: OperationBase::new(head, level, bank_scratchpad),
            success: None,
        }
    }
}

impl MemoryOperation for StoreConditional {
    operation_base!();

    fn prepare(&mut self, _core: &mut BankCore) {}

    fn preconditions_met(&self) -> bool {
        true
    }

    fn execute(&mut self, core: &mut BankCore) {
        match self.success {
            None => {
                if !core.can_send() {
                    return;
                }
                let resident = core.probe(self.base.address, self.base.scratchpad);
                let ok = resident.is_some()
                    && core
                        .reservations
                        .check(self.base.destination, align_down(self.base.address, 4));
                if ok {
                    self.base.sram = resident;
                } else {
                    core.stats.sc_failures = core.stats.sc_failures.saturating_add(1);
                }
                core.send(self.base.destination, ok as u32, true);
                self.base.results_remaining -= 1;
                self.success = Some(ok);
            }
            Some(ok) => {
                if !self.base.payload_ready() {
                    return;
                }
                check_alignment(self.base.address, AccessWidth::Word);
                let data = self.base.take_payload();
                if ok {
                    let sram = self.base.sram.expect("successful sc must be resident");
                    core.write_scalar(
                        self.base.address,
                        sram,
                        data,
                        AccessWidth::Word,
                        self.base.scratchpad,
                    );
                }
            }
        }
    }
}
