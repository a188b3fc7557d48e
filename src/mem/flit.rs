use crate::mem::address::MemoryAddr;
use crate::mem::metadata::{NetworkDestination, RequestMetadata};
use crate::mem::opcode::MemoryOpcode;

/// One unit of a request packet. Head flits carry an address and the packet
/// metadata; payload flits carry a data word and no address.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestFlit {
    pub data: u32,
    pub metadata: RequestMetadata,
}

impl RequestFlit {
    pub fn head(address: MemoryAddr, metadata: RequestMetadata) -> Self {
        assert!(
            !metadata.opcode.is_payload(),
            "head flit cannot carry a payload opcode"
        );
        Self {
            data: address,
            metadata,
        }
    }

    pub fn payload(word: u32, last: bool) -> Self {
        let opcode = if last {
            MemoryOpcode::PayloadEop
        } else {
            MemoryOpcode::Payload
        };
        Self {
            data: word,
            metadata: RequestMetadata {
                opcode,
                ..RequestMetadata::default()
            },
        }
    }

    pub fn is_head(&self) -> bool {
        !self.metadata.opcode.is_payload()
    }

    /// Only head flits carry an address.
    pub fn address(&self) -> MemoryAddr {
        assert!(self.is_head(), "payload flits carry no address");
        self.data
    }

    pub fn ends_packet(&self) -> bool {
        self.metadata.opcode.ends_packet()
    }
}

/// Single-word response flit tagged with its network destination.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseFlit {
    pub data: u32,
    pub destination: NetworkDestination,
    pub last: bool,
}

impl ResponseFlit {
    pub fn new(data: u32, destination: NetworkDestination, last: bool) -> Self {
        Self {
            data,
            destination,
            last,
        }
    }
}
