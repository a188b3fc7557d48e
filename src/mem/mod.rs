pub mod address;
pub mod bank;
pub mod claim;
pub mod decode;
pub mod directory;
pub mod flit;
pub mod metadata;
pub mod opcode;
pub mod operation;
pub mod queue;
pub mod reservation;
pub mod storage;

#[cfg(test)]
mod unit_tests;

pub use bank::{BankConfig, BankState, BankStats, MemoryBank};
pub use claim::{BankGroup, ClaimState};
pub use decode::decode_operation;
pub use directory::{Directory, DirectoryEntry};
pub use flit::{RequestFlit, ResponseFlit};
pub use metadata::{MemLevel, NetworkDestination, RequestMetadata};
pub use opcode::MemoryOpcode;
pub use operation::MemoryOperation;
pub use reservation::ReservationTable;
