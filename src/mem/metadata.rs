use num_traits::FromPrimitive;

use crate::mem::opcode::MemoryOpcode;

/// Position of a bank in the memory hierarchy. Banks are level-parameterized;
/// the level selects which scratchpad/skip flag of a request applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemLevel {
    L1,
    L2,
}

/// Return address of a request: the network endpoint its results go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkDestination {
    pub tile: u8,
    pub channel: u8,
}

impl NetworkDestination {
    pub fn new(tile: u8, channel: u8) -> Self {
        Self { tile, channel }
    }
}

/// Wire-format companion of every request flit. Immutable once a transaction
/// has started.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestMetadata {
    pub opcode: MemoryOpcode,
    pub scratchpad_l1: bool,
    pub scratchpad_l2: bool,
    pub skip_l1: bool,
    pub skip_l2: bool,
    pub return_to: NetworkDestination,
}

impl RequestMetadata {
    pub fn new(opcode: MemoryOpcode, return_to: NetworkDestination) -> Self {
        Self {
            opcode,
            return_to,
            ..Self::default()
        }
    }

    pub fn scratchpad_at(&self, level: MemLevel) -> bool {
        match level {
            MemLevel::L1 => self.scratchpad_l1,
            MemLevel::L2 => self.scratchpad_l2,
        }
    }

    pub fn skips(&self, level: MemLevel) -> bool {
        match level {
            MemLevel::L1 => self.skip_l1,
            MemLevel::L2 => self.skip_l2,
        }
    }

    /// True if the head flit carrying this metadata is the whole packet.
    pub fn ends_packet(&self) -> bool {
        self.opcode.ends_packet()
    }

    /// Pack into the wire encoding:
    /// bits 0-4 opcode, 5 scratchpad-L1, 6 scratchpad-L2, 7 skip-L1,
    /// 8 skip-L2, 9-16 return tile, 17-20 return channel.
    pub fn encode(&self) -> u32 {
        let mut bits = self.opcode as u32;
        bits |= (self.scratchpad_l1 as u32) << 5;
        bits |= (self.scratchpad_l2 as u32) << 6;
        bits |= (self.skip_l1 as u32) << 7;
        bits |= (self.skip_l2 as u32) << 8;
        bits |= (self.return_to.tile as u32) << 9;
        bits |= ((self.return_to.channel as u32) & 0xf) << 17;
        bits
    }

    pub fn decode(bits: u32) -> Self {
        let opcode = MemoryOpcode::from_u32(bits & 0x1f)
            .unwrap_or_else(|| panic!("invalid opcode bits {:#x} in metadata", bits & 0x1f));
        Self {
            opcode,
            scratchpad_l1: bits & (1 << 5) != 0,
            scratchpad_l2: bits & (1 << 6) != 0,
            skip_l1: bits & (1 << 7) != 0,
            skip_l2: bits & (1 << 8) != 0,
            return_to: NetworkDestination {
                tile: ((bits >> 9) & 0xff) as u8,
                channel: ((bits >> 17) & 0xf) as u8,
            },
        }
    }
}
