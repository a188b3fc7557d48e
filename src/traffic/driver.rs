use log::debug;

use crate::mem::flit::ResponseFlit;
use crate::sim::top::Tile;
use crate::traffic::config::TrafficConfig;
use crate::traffic::patterns::PatternEngine;

/// Issues the compiled workload against a tile, bounded by an in-flight
/// window, and retires the responses.
pub struct TrafficDriver {
    engine: PatternEngine,
    max_inflight: usize,
    inflight: usize,
    issued_packets: u64,
    retired_flits: u64,
    done_issuing: bool,
}

impl TrafficDriver {
    pub fn new(
        config: &TrafficConfig,
        num_cores: usize,
        tile: u8,
    ) -> Result<Self, anyhow::Error> {
        Ok(Self {
            engine: PatternEngine::compile(config, num_cores, tile)?,
            max_inflight: config.max_inflight.max(1),
            inflight: 0,
            issued_packets: 0,
            retired_flits: 0,
            done_issuing: false,
        })
    }

    /// Submit packets until the in-flight window is full or the workload is
    /// exhausted. Returns the number of packets issued this cycle.
    pub fn issue(&mut self, cycle: u64, tile: &mut Tile) -> u64 {
        let mut issued = 0;
        while !self.done_issuing && self.inflight < self.max_inflight {
            match self.engine.next_packet() {
                Some(packet) => {
                    let head = &packet[0];
                    debug!(
                        "cycle {}: issue {} @ {:#010x}",
                        cycle,
                        head.metadata.opcode.mnemonic(),
                        head.address()
                    );
                    if head.metadata.opcode.result_flits() > 0 {
                        self.inflight += 1;
                    }
                    tile.submit_packet(&packet);
                    self.issued_packets += 1;
                    issued += 1;
                }
                None => {
                    self.done_issuing = true;
                }
            }
        }
        issued
    }

    pub fn retire(&mut self, cycle: u64, flit: &ResponseFlit) {
        debug!(
            "cycle {}: retire {:#010x} for {:?}",
            cycle, flit.data, flit.destination
        );
        self.retired_flits += 1;
        if flit.last {
            self.inflight = self.inflight.saturating_sub(1);
        }
    }

    pub fn done(&self) -> bool {
        self.done_issuing && self.inflight == 0
    }

    pub fn issued_packets(&self) -> u64 {
        self.issued_packets
    }

    pub fn retired_flits(&self) -> u64 {
        self.retired_flits
    }
}
