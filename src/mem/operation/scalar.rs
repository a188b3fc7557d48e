use log::warn;

use crate::mem::address::{is_aligned, MemoryAddr};
use crate::mem::bank::BankCore;
use crate::mem::flit::RequestFlit;
use crate::mem::metadata::MemLevel;
use crate::mem::operation::{operation_base, MemoryOperation, OperationBase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessWidth {
    Byte = 1,
    Half = 2,
    Word = 4,
}

impl AccessWidth {
    pub fn bytes(self) -> u32 {
        self as u32
    }
}

/// Misaligned accesses are masked down to the required alignment; the
/// simulation continues.
pub(crate) fn check_alignment(addr: MemoryAddr, width: AccessWidth) {
    if !is_aligned(addr, width.bytes()) {
        warn!(
            "misaligned {}-byte access @ {:#010x}, masking",
            width.bytes(),
            addr
        );
    }
}

/// Scalar load of a word, halfword or byte: allocate the line, read once,
/// emit one result flit.
pub struct ScalarLoad {
    base: OperationBase,
    width: AccessWidth,
}

impl ScalarLoad {
    pub fn new(head: &RequestFlit, level: MemLevel, bank_scratchpad: bool, width: AccessWidth) -> Self {
        Self {
            base: OperationBase::new(head, level, bank_scratchpad),
            width,
        }
    }
}

impl MemoryOperation for ScalarLoad {
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
        check_alignment(self.base.address, self.width);
        let sram = self.base.sram.expect("load executed before allocation");
        let value = core.read_scalar(sram, self.width);
        core.send(self.base.destination, value, true);
        self.base.results_remaining -= 1;
    }
}

/// Scalar store: allocate the line (write-allocate), consume one payload
/// word, merge it at the target width.
pub struct ScalarStore {
    base: OperationBase,
    width: AccessWidth,
}

impl ScalarStore {
    pub fn new(head: &RequestFlit, level: MemLevel, bank_scratchpad: bool, width: AccessWidth) -> Self {
        Self {
            base: OperationBase::new(head, level, bank_scratchpad),
            width,
        }
    }
}

impl MemoryOperation for ScalarStore {
    operation_base!();

    fn prepare(&mut self, core: &mut BankCore) {
        self.base.probe_or_allocate(core);
    }

    fn preconditions_met(&self) -> bool {
        self.base.sram.is_some()
    }

    fn execute(&mut self, core: &mut BankCore) {
        if !self.base.payload_ready() {
            return;
        }
        check_alignment(self.base.address, self.width);
        let sram = self.base.sram.expect("store executed before allocation");
        let data = self.base.take_payload();
        core.write_scalar(
            self.base.address,
            sram,
            data,
            self.width,
            self.base.scratchpad,
        );
    }
}
