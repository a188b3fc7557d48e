use crate::base::behavior::ModuleBehaviors;
use crate::base::mem::HasMemory;
use crate::mem::directory::DirectoryEntry;
use crate::mem::flit::ResponseFlit;
use crate::mem::opcode::MemoryOpcode as Op;
use crate::mem::unit_tests::harness::{head, packet};
use crate::sim::main_mem::MainMemConfig;
use crate::sim::top::{Tile, TileConfig};

fn small_tile() -> Tile {
    let config = TileConfig {
        num_cores: 2,
        num_l1_banks: 2,
        num_l2_banks: 2,
        ..TileConfig::default()
    };
    Tile::new(&config, MainMemConfig { latency: 2 })
}

fn run_until_responses(tile: &mut Tile, count: usize) -> Vec<ResponseFlit> {
    let mut collected = Vec::new();
    for _ in 0..2000 {
        tile.tick_one();
        while let Some(flit) = tile.pop_outbox() {
            collected.push(flit);
        }
        if collected.len() >= count {
            return collected;
        }
    }
    panic!("expected {} responses, got {}", count, collected.len());
}

fn run_until_quiet(tile: &mut Tile) {
    for _ in 0..2000 {
        tile.tick_one();
        while tile.pop_outbox().is_some() {}
        if tile.quiescent() {
            return;
        }
    }
    panic!("tile did not go quiet");
}

#[test]
fn load_flows_through_both_levels() {
    let mut tile = small_tile();
    tile.main_mem_mut().write_word(0x104, 4242).unwrap();
    tile.submit_packet(&[head(Op::LoadW, 0x104, 0)]);
    let responses = run_until_responses(&mut tile, 1);
    assert_eq!(4242, responses[0].data);
    assert_eq!(0, responses[0].destination.channel);
    // the L1 miss was served by an L2 bank
    assert_eq!(1, tile.l1_stats().misses);
    assert_eq!(1, tile.l2_stats().accesses);
}

#[test]
fn store_then_load_round_trips_across_the_tile() {
    let mut tile = small_tile();
    tile.submit_packet(&packet(Op::StoreW, 0x204, 0, &[1357]));
    run_until_quiet(&mut tile);
    tile.submit_packet(&[head(Op::LoadW, 0x204, 1)]);
    let responses = run_until_responses(&mut tile, 1);
    assert_eq!(1357, responses[0].data);
}

#[test]
fn second_miss_to_same_line_hits_in_l2() {
    let mut tile = small_tile();
    tile.main_mem_mut().write_word(0x100, 9).unwrap();
    tile.submit_packet(&[head(Op::LoadW, 0x100, 0)]);
    run_until_responses(&mut tile, 1);
    // evict from L1 by touching the conflicting line, then reload
    tile.submit_packet(&[head(Op::LoadW, 0x100 + 0x40 * 64 * 2, 0)]);
    run_until_responses(&mut tile, 1);
    let l2_hits_before = tile.l2_stats().hits;
    tile.submit_packet(&[head(Op::LoadW, 0x100, 1)]);
    let responses = run_until_responses(&mut tile, 1);
    assert_eq!(9, responses[0].data);
    assert!(tile.l2_stats().hits > l2_hits_before, "L2 should hit");
}

#[test]
fn directory_update_packet_is_intercepted() {
    let mut tile = small_tile();
    let entry = DirectoryEntry {
        tile: 0,
        replacement: 3,
        scratchpad: true,
    };
    // index field of 0x40 at the default shift of 5 is bucket 2
    tile.submit_packet(&packet(Op::UpdateDirectoryEntry, 0x40, 0, &[entry.encode()]));
    run_until_quiet(&mut tile);
    assert_eq!(entry, tile.directory().entry(0x40));
    // the update never reached an L2 bank or memory
    assert_eq!(0, tile.l2_stats().accesses);
}

#[test]
fn directory_redirect_still_round_trips() {
    let mut tile = small_tile();
    // remap bucket 2 onto bucket 3; stores and loads see the same rewrite
    tile.directory_mut().set_entry(
        2,
        DirectoryEntry {
            tile: 0,
            replacement: 3,
            scratchpad: false,
        },
    );
    tile.submit_packet(&packet(Op::StoreW, 0x44, 0, &[86]));
    run_until_quiet(&mut tile);
    tile.submit_packet(&[head(Op::LoadW, 0x44, 1)]);
    let responses = run_until_responses(&mut tile, 1);
    assert_eq!(86, responses[0].data);
}

#[test]
fn pushed_line_lands_in_the_target_l1_bank() {
    let words: Vec<u32> = (50..58).collect();
    let mut tile = small_tile();
    // line 0x100 homes on bank 0; target bank 1 rides in the low bits
    tile.submit_packet(&packet(Op::PushLine, 0x101, 0, &words));
    run_until_quiet(&mut tile);
    let bank1 = &tile.l1_banks()[1];
    assert_eq!(1, bank1.stats().accesses, "push arrives as a store");
    // nothing was written through to the backing memory
    assert_eq!(0, tile.main_mem_mut().read_word(0x100).unwrap());
}

#[test]
fn flush_line_writes_through_to_memory() {
    let mut tile = small_tile();
    tile.submit_packet(&packet(Op::StoreW, 0x304, 0, &[27]));
    run_until_quiet(&mut tile);
    tile.submit_packet(&[head(Op::FlushLine, 0x304, 0)]);
    run_until_quiet(&mut tile);
    // the line now sits dirty in L2; a skip-L1 flush pushes it to memory
    let mut flush_l2 = vec![head(Op::FlushLine, 0x304, 0)];
    flush_l2[0].metadata.skip_l1 = true;
    tile.submit_packet(&flush_l2);
    run_until_quiet(&mut tile);
    assert_eq!(27, tile.main_mem_mut().read_word(0x304).unwrap());
}
