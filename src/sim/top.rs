use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use anyhow::bail;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::base::behavior::ModuleBehaviors;
use crate::base::mem::HasMemory;
use crate::mem::address::{BYTES_PER_LINE, BYTES_PER_WORD};
use crate::mem::bank::{BankConfig, BankStats, MemoryBank};
use crate::mem::claim::BankGroup;
use crate::mem::directory::Directory;
use crate::mem::flit::{RequestFlit, ResponseFlit};
use crate::mem::metadata::{MemLevel, NetworkDestination};
use crate::sim::config::{Config, SimConfig};
use crate::sim::elf::ProgramImage;
use crate::sim::main_mem::{MainMemConfig, MainMemory};
use crate::traffic::driver::TrafficDriver;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TileConfig {
    pub id: u8,
    pub num_cores: usize,
    pub num_l1_banks: usize,
    pub num_l2_banks: usize,
    pub directory_size: usize,
    pub directory_shift: u32,
    pub l1: BankConfig,
    pub l2: BankConfig,
}

impl Config for TileConfig {}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            id: 0,
            num_cores: 4,
            num_l1_banks: 4,
            num_l2_banks: 4,
            directory_size: 16,
            directory_shift: 5,
            l1: BankConfig::default(),
            l2: BankConfig {
                lines: 256,
                ..BankConfig::default()
            },
        }
    }
}

/// Gathers flits back into whole packets so they can be handed to the next
/// stage atomically; the interconnect delivers packets contiguously.
#[derive(Default)]
struct PacketCollector {
    flits: Vec<RequestFlit>,
}

impl PacketCollector {
    fn push(&mut self, flit: RequestFlit) -> Option<Vec<RequestFlit>> {
        self.flits.push(flit);
        if flit.ends_packet() {
            Some(std::mem::take(&mut self.flits))
        } else {
            None
        }
    }

    fn is_empty(&self) -> bool {
        self.flits.is_empty()
    }
}

/// One tile of the chip: per-core L1 banks in front of the directory, a
/// shared-bus L2 bank group behind it, and the off-tile backing memory.
/// Response channels: [0, num_cores) cores, then L1 banks, then L2 banks.
pub struct Tile {
    id: u8,
    num_cores: usize,
    l1_banks: Vec<MemoryBank>,
    l1_staging: Vec<VecDeque<RequestFlit>>,
    l1_collectors: Vec<PacketCollector>,
    push_collectors: Vec<PacketCollector>,
    directory: Directory,
    l2: BankGroup,
    l2_staging: VecDeque<RequestFlit>,
    l2_collectors: Vec<PacketCollector>,
    main_mem: MainMemory,
    outbox: VecDeque<ResponseFlit>,
}

impl Tile {
    pub fn new(config: &TileConfig, main_mem_config: MainMemConfig) -> Self {
        let channels = config.num_cores + config.num_l1_banks + config.num_l2_banks;
        assert!(channels <= 16, "channel space is 4 bits wide");
        assert!(config.num_l1_banks.is_power_of_two());

        let l1_channel_base = config.num_cores as u8;
        let l2_channel_base = (config.num_cores + config.num_l1_banks) as u8;

        let mut l1_config = config.l1;
        l1_config.group_banks = config.num_l1_banks;
        let l1_config = Arc::new(l1_config);
        let l1_banks = (0..config.num_l1_banks)
            .map(|i| {
                MemoryBank::new(
                    format!("l1_bank_{i}"),
                    Arc::clone(&l1_config),
                    MemLevel::L1,
                    NetworkDestination::new(config.id, l1_channel_base + i as u8),
                )
            })
            .collect();

        let l2 = BankGroup::new(
            "l2_bank_",
            Arc::new(config.l2),
            MemLevel::L2,
            config.num_l2_banks,
            l2_channel_base,
            config.id,
        );

        Self {
            id: config.id,
            num_cores: config.num_cores,
            l1_banks,
            l1_staging: (0..config.num_l1_banks).map(|_| VecDeque::new()).collect(),
            l1_collectors: (0..config.num_l1_banks)
                .map(|_| PacketCollector::default())
                .collect(),
            push_collectors: (0..config.num_l1_banks)
                .map(|_| PacketCollector::default())
                .collect(),
            directory: Directory::new(config.directory_size, config.directory_shift, config.id),
            l2,
            l2_staging: VecDeque::new(),
            l2_collectors: (0..config.num_l2_banks)
                .map(|_| PacketCollector::default())
                .collect(),
            main_mem: MainMemory::new(main_mem_config),
            outbox: VecDeque::new(),
        }
    }

    pub fn num_cores(&self) -> usize {
        self.num_cores
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut Directory {
        &mut self.directory
    }

    pub fn main_mem_mut(&mut self) -> &mut MainMemory {
        &mut self.main_mem
    }

    pub fn l1_banks(&self) -> &[MemoryBank] {
        &self.l1_banks
    }

    /// Requests are interleaved over the L1 banks at line granularity.
    fn home_bank(&self, addr: u32) -> usize {
        (addr / BYTES_PER_LINE) as usize % self.l1_banks.len()
    }

    /// Hand a whole request packet to the tile. Flits of one packet are
    /// delivered to their bank back to back.
    pub fn submit_packet(&mut self, flits: &[RequestFlit]) {
        let head = flits.first().expect("empty packet");
        let bank = self.home_bank(head.address());
        self.l1_staging[bank].extend(flits.iter().copied());
    }

    pub fn pop_outbox(&mut self) -> Option<ResponseFlit> {
        self.outbox.pop_front()
    }

    /// Write a program image into the backing memory and register
    /// non-writable segments as read-only ranges in every bank.
    pub fn load_image(&mut self, image: &ProgramImage) -> Result<(), anyhow::Error> {
        for segment in &image.segments {
            self.main_mem.load_image(segment.base, &segment.words)?;
            if !segment.writable {
                let size = segment.words.len() as u32 * BYTES_PER_WORD;
                for bank in &mut self.l1_banks {
                    bank.add_readonly(segment.base, size);
                }
                for bank in self.l2.banks_mut() {
                    bank.add_readonly(segment.base, size);
                }
            }
        }
        Ok(())
    }

    pub fn l1_stats(&self) -> BankStats {
        let mut stats = BankStats::default();
        for bank in &self.l1_banks {
            stats += &bank.stats();
        }
        stats
    }

    pub fn l2_stats(&self) -> BankStats {
        let mut stats = BankStats::default();
        for bank in self.l2.banks() {
            stats += &bank.stats();
        }
        stats
    }

    pub fn quiescent(&self) -> bool {
        self.outbox.is_empty()
            && self.l2_staging.is_empty()
            && self.l1_staging.iter().all(VecDeque::is_empty)
            && self.l1_collectors.iter().all(PacketCollector::is_empty)
            && self.push_collectors.iter().all(PacketCollector::is_empty)
            && self.l2_collectors.iter().all(PacketCollector::is_empty)
            && self.l1_banks.iter().all(MemoryBank::quiescent)
            && self.l2.quiescent()
            && self.main_mem.quiescent()
    }

    fn drain_l1_staging(&mut self) {
        for (staging, bank) in self.l1_staging.iter_mut().zip(self.l1_banks.iter_mut()) {
            while staging.front().is_some() && bank.has_input_space() {
                let flit = staging.pop_front().unwrap();
                bank.push_request(flit);
            }
        }
    }

    fn drain_l2_staging(&mut self) {
        while !self.l2_staging.is_empty() && self.l2.bus_has_space() {
            let flit = self.l2_staging.pop_front().unwrap();
            self.l2.push_request(flit);
        }
    }

    /// L1 miss traffic and forwarded packets pass through the directory on
    /// their way to the shared L2 tier. Directory updates are intercepted
    /// and applied here; everything else gets its head flit rewritten.
    fn route_l1_upstream(&mut self) {
        for i in 0..self.l1_banks.len() {
            while let Some(flit) = self.l1_banks[i].pop_upstream_request() {
                let packet = match self.l1_collectors[i].push(flit) {
                    Some(packet) => packet,
                    None => continue,
                };
                let mut head = packet[0];
                if head.metadata.opcode.is_directory_update() {
                    assert_eq!(2, packet.len(), "directory update carries one payload word");
                    self.directory
                        .apply_update(head.metadata.opcode, head.address(), packet[1].data);
                    continue;
                }
                let target_tile = self.directory.update_request(&mut head);
                if target_tile != self.id {
                    // single-tile assembly: remote homes resolve locally
                    debug!(
                        "directory redirect to tile {} served locally @ {:#010x}",
                        target_tile,
                        head.address()
                    );
                }
                self.l2_staging.push_back(head);
                self.l2_staging.extend(packet[1..].iter().copied());
            }
        }
    }

    /// Pushed lines re-enter a sibling L1 bank as store packets.
    fn route_l1_pushes(&mut self) {
        for i in 0..self.l1_banks.len() {
            while let Some((target, flit)) = self.l1_banks[i].pop_sibling_push() {
                if let Some(packet) = self.push_collectors[i].push(flit) {
                    self.l1_staging[target].extend(packet);
                }
            }
        }
    }

    fn route_l2_upstream(&mut self) {
        for j in 0..self.l2.num_banks() {
            while let Some(flit) = self.l2.banks_mut()[j].pop_upstream_request() {
                if let Some(packet) = self.l2_collectors[j].push(flit) {
                    for flit in packet {
                        self.main_mem.push_request(flit);
                    }
                }
            }
        }
    }

    fn deliver_response(&mut self, flit: ResponseFlit) -> bool {
        let channel = flit.destination.channel as usize;
        if channel < self.num_cores {
            self.outbox.push_back(flit);
            return true;
        }
        let l1_end = self.num_cores + self.l1_banks.len();
        if channel < l1_end {
            return self.l1_banks[channel - self.num_cores].push_upstream_response(flit);
        }
        let l2_index = channel - l1_end;
        assert!(l2_index < self.l2.num_banks(), "response to unknown channel");
        self.l2.banks_mut()[l2_index].push_upstream_response(flit)
    }

    fn route_responses(&mut self) {
        for i in 0..self.l1_banks.len() {
            loop {
                let flit = match self.l1_banks[i].peek_response() {
                    Some(flit) => *flit,
                    None => break,
                };
                if !self.deliver_response(flit) {
                    break;
                }
                self.l1_banks[i].pop_response();
            }
        }
        for j in 0..self.l2.num_banks() {
            loop {
                let flit = match self.l2.banks_mut()[j].peek_response() {
                    Some(flit) => *flit,
                    None => break,
                };
                if !self.deliver_response(flit) {
                    break;
                }
                self.l2.banks_mut()[j].pop_response();
            }
        }
        loop {
            let flit = match self.main_mem.peek_response() {
                Some(flit) => *flit,
                None => break,
            };
            if !self.deliver_response(flit) {
                break;
            }
            self.main_mem.pop_response();
        }
    }
}

impl ModuleBehaviors for Tile {
    fn tick_one(&mut self) {
        self.drain_l1_staging();
        self.drain_l2_staging();
        self.l1_banks.iter_mut().for_each(MemoryBank::tick_one);
        self.l2.tick_one();
        self.main_mem.tick_one();
        self.route_l1_upstream();
        self.route_l1_pushes();
        self.route_l2_upstream();
        self.route_responses();
    }

    fn reset(&mut self) {
        self.l1_banks.iter_mut().for_each(MemoryBank::reset);
        self.l2.reset();
        self.main_mem.reset();
        self.l1_staging.iter_mut().for_each(VecDeque::clear);
        self.l2_staging.clear();
        self.outbox.clear();
    }
}

#[derive(Debug, Serialize)]
pub struct SimSummary {
    pub cycles: u64,
    pub issued_packets: u64,
    pub retired_flits: u64,
    pub l1: BankStats,
    pub l2: BankStats,
}

pub struct TesseraTopConfig {
    pub sim: SimConfig,
    pub tile: TileConfig,
    pub main_mem: MainMemConfig,
}

/// Top level: one tile plus the run loop with timeout and stall detection.
pub struct TesseraTop {
    pub tile: Tile,
    timeout: u64,
    stall_limit: u64,
    cycle: u64,
}

impl TesseraTop {
    pub fn new(config: &TesseraTopConfig) -> Self {
        Self {
            tile: Tile::new(&config.tile, config.main_mem),
            timeout: config.sim.timeout,
            stall_limit: config.sim.stall_limit,
            cycle: 0,
        }
    }

    pub fn load_image(&mut self, path: &Path) -> Result<(), anyhow::Error> {
        let image = ProgramImage::load(path)?;
        self.tile.load_image(&image)
    }

    pub fn simulate(&mut self, driver: &mut TrafficDriver) -> Result<SimSummary, anyhow::Error> {
        let mut last_progress = 0u64;
        while self.cycle < self.timeout {
            self.cycle += 1;
            let issued = driver.issue(self.cycle, &mut self.tile);
            self.tile.tick_one();
            let mut retired = 0u64;
            while let Some(flit) = self.tile.pop_outbox() {
                driver.retire(self.cycle, &flit);
                retired += 1;
            }
            if issued > 0 || retired > 0 {
                last_progress = self.cycle;
            }
            if driver.done() && self.tile.quiescent() {
                info!("simulation finished at cycle {}", self.cycle);
                return Ok(self.summary(driver));
            }
            if self.cycle.saturating_sub(last_progress) > self.stall_limit {
                bail!(
                    "deadlock detected: no progress since cycle {} (now at {})",
                    last_progress,
                    self.cycle
                );
            }
        }
        bail!("simulation timed out after {} cycles", self.timeout)
    }

    fn summary(&self, driver: &TrafficDriver) -> SimSummary {
        SimSummary {
            cycles: self.cycle,
            issued_packets: driver.issued_packets(),
            retired_flits: driver.retired_flits(),
            l1: self.tile.l1_stats(),
            l2: self.tile.l2_stats(),
        }
    }
}
