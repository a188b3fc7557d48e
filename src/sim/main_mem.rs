use std::collections::{HashMap, VecDeque};

use log::warn;
use serde::Deserialize;
use smallvec::SmallVec;

use crate::base::behavior::ModuleBehaviors;
use crate::base::mem::HasMemory;
use crate::mem::address::{line_base, BYTES_PER_WORD, WORDS_PER_LINE};
use crate::mem::flit::{RequestFlit, ResponseFlit};
use crate::mem::opcode::MemoryOpcode;
use crate::mem::operation::line::IPK_EOP_MASK;
use crate::sim::config::Config;

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct MainMemConfig {
    pub latency: u64,
}

impl Config for MainMemConfig {}

impl Default for MainMemConfig {
    fn default() -> Self {
        Self { latency: 40 }
    }
}

struct Packet {
    head: RequestFlit,
    payload: SmallVec<[u32; 8]>,
}

/// Next-hierarchy-level collaborator: a sparse word store behind a fixed
/// service latency. Consumes whole request packets and produces tagged
/// response flits; anything read before being written is zero.
pub struct MainMemory {
    latency: u64,
    cycle: u64,
    words: HashMap<u32, u32>,
    input: VecDeque<RequestFlit>,
    assembling: Option<Packet>,
    pending: VecDeque<(u64, Packet)>,
    responses: VecDeque<ResponseFlit>,
}

impl MainMemory {
    pub fn new(config: MainMemConfig) -> Self {
        Self {
            latency: config.latency,
            cycle: 0,
            words: HashMap::new(),
            input: VecDeque::new(),
            assembling: None,
            pending: VecDeque::new(),
            responses: VecDeque::new(),
        }
    }

    pub fn push_request(&mut self, flit: RequestFlit) {
        self.input.push_back(flit);
    }

    pub fn peek_response(&self) -> Option<&ResponseFlit> {
        self.responses.front()
    }

    pub fn pop_response(&mut self) -> Option<ResponseFlit> {
        self.responses.pop_front()
    }

    pub fn quiescent(&self) -> bool {
        self.input.is_empty()
            && self.assembling.is_none()
            && self.pending.is_empty()
            && self.responses.is_empty()
    }

    fn read(&self, addr: u32) -> u32 {
        *self.words.get(&(addr & !0x3)).unwrap_or(&0)
    }

    fn write(&mut self, addr: u32, data: u32) {
        self.words.insert(addr & !0x3, data);
    }

    fn write_masked(&mut self, addr: u32, data: u32, mask: u32, shift: u32) {
        let old = self.read(addr);
        let merged = (old & !(mask << shift)) | ((data & mask) << shift);
        self.write(addr, merged);
    }

    fn assemble(&mut self) {
        while let Some(flit) = self.input.pop_front() {
            let packet = if flit.is_head() {
                assert!(
                    self.assembling.is_none(),
                    "head flit interrupts an unfinished packet"
                );
                self.assembling = Some(Packet {
                    head: flit,
                    payload: SmallVec::new(),
                });
                self.assembling.as_mut().unwrap()
            } else {
                let packet = self
                    .assembling
                    .as_mut()
                    .expect("payload flit with no packet in progress");
                packet.payload.push(flit.data);
                packet
            };
            let expected = packet.head.metadata.opcode.payload_flits();
            if packet.payload.len() as u32 == expected {
                if expected > 0 {
                    assert!(flit.ends_packet(), "packet missing its end-of-packet flit");
                }
                let packet = self.assembling.take().unwrap();
                self.pending.push_back((self.cycle + self.latency, packet));
            }
        }
    }

    fn serve(&mut self, packet: Packet) {
        use MemoryOpcode as Op;
        let meta = packet.head.metadata;
        let addr = packet.head.address();
        let dest = meta.return_to;
        match meta.opcode {
            Op::FetchLine => {
                let base = line_base(addr);
                for i in 0..WORDS_PER_LINE {
                    let word = self.read(base + i * BYTES_PER_WORD);
                    self.responses.push_back(ResponseFlit::new(
                        word,
                        dest,
                        i == WORDS_PER_LINE - 1,
                    ));
                }
            }
            Op::IpkRead => {
                let base = line_base(addr);
                for i in 0..WORDS_PER_LINE {
                    let word = self.read(base + i * BYTES_PER_WORD);
                    let last = i == WORDS_PER_LINE - 1 || word & IPK_EOP_MASK != 0;
                    self.responses.push_back(ResponseFlit::new(word, dest, last));
                    if last {
                        break;
                    }
                }
            }
            Op::StoreLine | Op::PushLine => {
                let base = line_base(addr);
                for (i, word) in packet.payload.iter().enumerate() {
                    self.write(base + i as u32 * BYTES_PER_WORD, *word);
                }
            }
            Op::MemsetLine => {
                let base = line_base(addr);
                for i in 0..WORDS_PER_LINE {
                    self.write(base + i * BYTES_PER_WORD, packet.payload[0]);
                }
            }
            Op::LoadW | Op::LoadLinked => {
                let word = self.read(addr);
                self.responses.push_back(ResponseFlit::new(word, dest, true));
            }
            Op::LoadHw => {
                let half = (self.read(addr) >> ((addr & 2) * 8)) & 0xffff;
                self.responses.push_back(ResponseFlit::new(half, dest, true));
            }
            Op::LoadB => {
                let byte = (self.read(addr) >> ((addr & 3) * 8)) & 0xff;
                self.responses.push_back(ResponseFlit::new(byte, dest, true));
            }
            Op::StoreW => self.write(addr, packet.payload[0]),
            Op::StoreHw => self.write_masked(addr, packet.payload[0], 0xffff, (addr & 2) * 8),
            Op::StoreB => self.write_masked(addr, packet.payload[0], 0xff, (addr & 3) * 8),
            Op::StoreConditional => {
                // no reservation tracking below the banks; a conditional
                // store reaching this level always succeeds
                self.write(addr, packet.payload[0]);
                self.responses.push_back(ResponseFlit::new(1, dest, true));
            }
            Op::LoadAndAdd | Op::LoadAndOr | Op::LoadAndAnd | Op::LoadAndXor | Op::Exchange => {
                let old = self.read(addr);
                let operand = packet.payload[0];
                let merged = match meta.opcode {
                    Op::LoadAndAdd => old.wrapping_add(operand),
                    Op::LoadAndOr => old | operand,
                    Op::LoadAndAnd => old & operand,
                    Op::LoadAndXor => old ^ operand,
                    _ => operand,
                };
                self.write(addr, merged);
                self.responses.push_back(ResponseFlit::new(old, dest, true));
            }
            Op::ValidateLine
            | Op::FlushLine
            | Op::InvalidateLine
            | Op::FlushAllLines
            | Op::InvalidateAllLines => {}
            Op::UpdateDirectoryEntry | Op::UpdateDirectoryMask => {
                warn!("directory update reached main memory, dropping");
            }
            Op::Payload | Op::PayloadEop => unreachable!("assembled packet headed by a payload"),
        }
    }
}

impl ModuleBehaviors for MainMemory {
    fn tick_one(&mut self) {
        self.cycle += 1;
        self.assemble();
        while self
            .pending
            .front()
            .map_or(false, |(ready, _)| *ready <= self.cycle)
        {
            let (_, packet) = self.pending.pop_front().unwrap();
            self.serve(packet);
        }
    }

    fn reset(&mut self) {
        self.words.clear();
        self.input.clear();
        self.assembling = None;
        self.pending.clear();
        self.responses.clear();
    }
}

impl HasMemory for MainMemory {
    fn read_word_impl(&mut self, addr: u32) -> u32 {
        self.read(addr)
    }

    fn write_word_impl(&mut self, addr: u32, data: u32) {
        self.write(addr, data);
    }
}
