use crate::mem::address::{line_base, line_offset, BYTES_PER_WORD, WORDS_PER_LINE};
use crate::mem::bank::BankCore;
use crate::mem::flit::RequestFlit;
use crate::mem::metadata::MemLevel;
use crate::mem::opcode::MemoryOpcode;
use crate::mem::operation::{operation_base, MemoryOperation, OperationBase};

/// A fetched instruction word terminates its packet when its most
/// significant bit is set.
pub const IPK_EOP_MASK: u32 = 0x8000_0000;

/// Read a whole cache line, one word per cycle.
pub struct FetchLine {
    base: OperationBase,
    cursor: u32,
}

impl FetchLine {
    pub fn new(head: &RequestFlit, level: MemLevel, bank_scratchpad: bool) -> Self {
        Self {
            base: OperationBase::new(head, level, bank_scratchpad),
            cursor: 0,
        }
    }
}

impl MemoryOperation for FetchLine {
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
        let line_sram =
            self.base.sram.expect("line access before allocation") - line_offset(self.base.address);
        let word = core.read_word(line_sram + self.cursor * BYTES_PER_WORD);
        let last = self.cursor == WORDS_PER_LINE - 1;
        core.send(self.base.destination, word, last);
        self.cursor += 1;
        self.base.results_remaining -= 1;
    }
}

/// Instruction-packet read: like `FetchLine`, but terminates the moment a
/// fetched word carries the end-of-packet marker or the line boundary is
/// reached.
pub struct IpkRead {
    base: OperationBase,
    cursor: u32,
}

impl IpkRead {
    pub fn new(head: &RequestFlit, level: MemLevel, bank_scratchpad: bool) -> Self {
        Self {
            base: OperationBase::new(head, level, bank_scratchpad),
            cursor: 0,
        }
    }
}

impl MemoryOperation for IpkRead {
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
        let line_sram =
            self.base.sram.expect("line access before allocation") - line_offset(self.base.address);
        let word = core.read_word(line_sram + self.cursor * BYTES_PER_WORD);
        let last = self.cursor == WORDS_PER_LINE - 1 || word & IPK_EOP_MASK != 0;
        core.send(self.base.destination, word, last);
        self.cursor += 1;
        self.base.results_remaining = if last {
            0
        } else {
            self.base.results_remaining - 1
        };
    }
}

/// Write a whole cache line. The slot is validated, never fetched: every
/// word gets overwritten.
pub struct StoreLine {
    base: OperationBase,
    cursor: u32,
}

impl StoreLine {
    pub fn new(head: &RequestFlit, level: MemLevel, bank_scratchpad: bool) -> Self {
        Self {
            base: OperationBase::new(head, level, bank_scratchpad),
            cursor: 0,
        }
    }
}

impl MemoryOperation for StoreLine {
    operation_base!();

    fn prepare(&mut self, core: &mut BankCore) {
        self.base.probe_or_validate(core);
    }

    fn preconditions_met(&self) -> bool {
        self.base.sram.is_some()
    }

    fn execute(&mut self, core: &mut BankCore) {
        if !self.base.payload_ready() {
            return;
        }
        let line_sram =
            self.base.sram.expect("line access before allocation") - line_offset(self.base.address);
        let addr = line_base(self.base.address) + self.cursor * BYTES_PER_WORD;
        let data = self.base.take_payload();
        core.write_line_word(
            addr,
            line_sram + self.cursor * BYTES_PER_WORD,
            data,
            self.base.scratchpad,
        );
        self.cursor += 1;
    }
}

/// Fill a line with a single payload word, reused for every iteration.
pub struct MemsetLine {
    base: OperationBase,
    value: Option<u32>,
    cursor: u32,
}

impl MemsetLine {
    pub fn new(head: &RequestFlit, level: MemLevel, bank_scratchpad: bool) -> Self {
        Self {
            base: OperationBase::new(head, level, bank_scratchpad),
            value: None,
            cursor: 0,
        }
    }
}

impl MemoryOperation for MemsetLine {
    operation_base!();

    fn prepare(&mut self, core: &mut BankCore) {
        self.base.probe_or_validate(core);
    }

    fn preconditions_met(&self) -> bool {
        self.base.sram.is_some()
    }

    fn execute(&mut self, core: &mut BankCore) {
        let value = match self.value {
            Some(value) => value,
            None => {
                if !self.base.payload_ready() {
                    return;
                }
                let value = self.base.take_payload();
                self.value = Some(value);
                value
            }
        };
        if self.cursor >= WORDS_PER_LINE {
            return;
        }
        let line_sram =
            self.base.sram.expect("line access before allocation") - line_offset(self.base.address);
        let addr = line_base(self.base.address) + self.cursor * BYTES_PER_WORD;
        core.write_line_word(
            addr,
            line_sram + self.cursor * BYTES_PER_WORD,
            value,
            self.base.scratchpad,
        );
        self.cursor += 1;
    }

    fn complete(&self) -> bool {
        self.preconditions_met()
            && self.base.awaiting_payloads == 0
            && self.base.payload_buffer.is_empty()
            && self.cursor == WORDS_PER_LINE
    }
}

/// Re-emit the incoming line as a store to the bank encoded in the
/// address's low bits; nothing is written locally.
pub struct PushLine {
    base: OperationBase,
    head_sent: bool,
    cursor: u32,
}

impl PushLine {
    pub fn new(head: &RequestFlit, level: MemLevel, bank_scratchpad: bool) -> Self {
        Self {
            base: OperationBase::new(head, level, bank_scratchpad),
            head_sent: false,
            cursor: 0,
        }
    }

    fn target_bank(&self, core: &BankCore) -> usize {
        (self.base.address as usize) & (core.group_banks() - 1)
    }
}

impl MemoryOperation for PushLine {
    operation_base!();

    fn prepare(&mut self, _core: &mut BankCore) {}

    fn preconditions_met(&self) -> bool {
        true
    }

    fn execute(&mut self, core: &mut BankCore) {
        if !self.head_sent {
            if !core.can_push() {
                return;
            }
            let target = self.target_bank(core);
            let mut metadata = self.base.metadata;
            metadata.opcode = MemoryOpcode::StoreLine;
            let head = RequestFlit::head(line_base(self.base.address), metadata);
            core.push_to_sibling(target, head);
            self.head_sent = true;
            return;
        }
        if !self.base.payload_ready() || !core.can_push() {
            return;
        }
        let target = self.target_bank(core);
        let word = self.base.take_payload();
        let last = self.cursor == WORDS_PER_LINE - 1;
        core.push_to_sibling(target, RequestFlit::payload(word, last));
        self.cursor += 1;
    }

    fn complete(&self) -> bool {
        self.head_sent && self.base.awaiting_payloads == 0 && self.base.payload_buffer.is_empty()
    }
}
