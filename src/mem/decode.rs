use crate::mem::flit::RequestFlit;
use crate::mem::metadata::MemLevel;
use crate::mem::opcode::MemoryOpcode as Op;
use crate::mem::operation::atomic::{AtomicRmw, LoadLinked, RmwKind, StoreConditional};
use crate::mem::operation::control::{
    DirectoryUpdate, FlushLine, InvalidateLine, LineSweep, SweepKind, ValidateLine,
};
use crate::mem::operation::line::{FetchLine, IpkRead, MemsetLine, PushLine, StoreLine};
use crate::mem::operation::scalar::{AccessWidth, ScalarLoad, ScalarStore};
use crate::mem::operation::MemoryOperation;

/// Pure dispatch from a request's head flit to the matching operation.
/// A payload opcode reaching the decoder means the instruction stream is
/// malformed; that is fatal, not a runtime condition.
pub fn decode_operation(
    head: &RequestFlit,
    level: MemLevel,
    bank_scratchpad: bool,
) -> Box<dyn MemoryOperation> {
    let sp = bank_scratchpad;
    match head.metadata.opcode {
        Op::LoadW => Box::new(ScalarLoad::new(head, level, sp, AccessWidth::Word)),
        Op::LoadHw => Box::new(ScalarLoad::new(head, level, sp, AccessWidth::Half)),
        Op::LoadB => Box::new(ScalarLoad::new(head, level, sp, AccessWidth::Byte)),
        Op::StoreW => Box::new(ScalarStore::new(head, level, sp, AccessWidth::Word)),
        Op::StoreHw => Box::new(ScalarStore::new(head, level, sp, AccessWidth::Half)),
        Op::StoreB => Box::new(ScalarStore::new(head, level, sp, AccessWidth::Byte)),
        Op::LoadAndAdd => Box::new(AtomicRmw::new(head, level, sp, RmwKind::Add)),
        Op::LoadAndOr => Box::new(AtomicRmw::new(head, level, sp, RmwKind::Or)),
        Op::LoadAndAnd => Box::new(AtomicRmw::new(head, level, sp, RmwKind::And)),
        Op::LoadAndXor => Box::new(AtomicRmw::new(head, level, sp, RmwKind::Xor)),
        Op::Exchange => Box::new(AtomicRmw::new(head, level, sp, RmwKind::Exchange)),
        Op::LoadLinked => Box::new(LoadLinked::new(head, level, sp)),
        Op::StoreConditional => Box::new(StoreConditional::new(head, level, sp)),
        Op::FetchLine => Box::new(FetchLine::new(head, level, sp)),
        Op::IpkRead => Box::new(IpkRead::new(head, level, sp)),
        Op::StoreLine => Box::new(StoreLine::new(head, level, sp)),
        Op::MemsetLine => Box::new(MemsetLine::new(head, level, sp)),
        Op::PushLine => Box::new(PushLine::new(head, level, sp)),
        Op::ValidateLine => Box::new(ValidateLine::new(head, level, sp)),
        Op::FlushLine => Box::new(FlushLine::new(head, level, sp)),
        Op::InvalidateLine => Box::new(InvalidateLine::new(head, level, sp)),
        Op::FlushAllLines => Box::new(LineSweep::new(head, level, sp, SweepKind::Flush)),
        Op::InvalidateAllLines => Box::new(LineSweep::new(head, level, sp, SweepKind::Invalidate)),
        Op::UpdateDirectoryEntry | Op::UpdateDirectoryMask => {
            Box::new(DirectoryUpdate::new(head, level, sp))
        }
        Op::Payload | Op::PayloadEop => {
            panic!("invalid option: payload opcode at the decoder")
        }
    }
}
