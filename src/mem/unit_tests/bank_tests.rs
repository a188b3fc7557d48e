use crate::base::mem::HasMemory;
use crate::mem::bank::BankConfig;
use crate::mem::opcode::MemoryOpcode as Op;
use crate::mem::unit_tests::harness::{head, packet, BankHarness};

#[test]
fn cold_miss_fetches_exactly_one_line() {
    let mut h = BankHarness::new(BankConfig::default());
    h.mem.write_word(0x104, 321).unwrap();
    h.submit(&[head(Op::LoadW, 0x104, 1)]);
    h.run_until_responses(1);
    assert_eq!(321, h.responses[0].data);
    let fetches = h.upstream_heads(Op::FetchLine);
    assert_eq!(1, fetches.len());
    assert_eq!(0x100, fetches[0].address(), "fetch targets the line base");
    let stats = h.bank.stats();
    assert_eq!(1, stats.misses);
    assert_eq!(1, stats.refills);
}

#[test]
fn second_access_to_refilled_line_hits() {
    let mut h = BankHarness::new(BankConfig::default());
    h.submit(&[head(Op::LoadW, 0x104, 1)]);
    h.run_until_responses(1);
    h.submit(&[head(Op::LoadW, 0x108, 2)]);
    h.run_until_responses(2);
    assert_eq!(1, h.upstream_heads(Op::FetchLine).len());
    assert_eq!(1, h.bank.stats().hits);
}

#[test]
fn dirty_victim_is_written_back_before_reuse() {
    let mut h = BankHarness::new(BankConfig::default());
    // 64 lines: 0x100 and 0x900 share a slot
    h.submit(&packet(Op::StoreW, 0x100, 1, &[0xaa]));
    h.run_until_quiet();
    h.submit(&[head(Op::LoadW, 0x900, 1)]);
    h.run_until_responses(1);
    let flushes = h.upstream_heads(Op::StoreLine);
    assert_eq!(1, flushes.len());
    assert_eq!(0x100, flushes[0].address());
    assert_eq!(0xaa, h.mem.read_word(0x100).unwrap());
    // the evicted line is refetched with its written value intact
    h.submit(&[head(Op::LoadW, 0x100, 2)]);
    h.run_until_responses(2);
    assert_eq!(0xaa, h.responses[1].data);
}

#[test]
fn clean_victim_is_dropped_silently() {
    let mut h = BankHarness::new(BankConfig::default());
    h.submit(&[head(Op::LoadW, 0x100, 1)]);
    h.run_until_responses(1);
    h.submit(&[head(Op::LoadW, 0x900, 1)]);
    h.run_until_responses(2);
    assert!(h.upstream_heads(Op::StoreLine).is_empty());
    assert_eq!(2, h.upstream_heads(Op::FetchLine).len());
}

#[test]
fn consecutive_misses_to_distinct_lines_all_complete() {
    let mut h = BankHarness::new(BankConfig::default());
    for i in 0..4u32 {
        h.mem.write_word(0x100 + i * 0x40, 100 + i).unwrap();
    }
    for i in 0..4u8 {
        h.submit(&[head(Op::LoadW, 0x100 + i as u32 * 0x40, i)]);
    }
    h.run_until_responses(4);
    for i in 0..4 {
        assert_eq!(100 + i as u32, h.responses[i].data);
        assert_eq!(i as u8, h.responses[i].destination.channel);
    }
}

#[test]
fn hit_under_miss_lets_a_hit_overtake_the_miss() {
    let config = BankConfig {
        hit_under_miss: true,
        ..BankConfig::default()
    };
    let mut h = BankHarness::with_latency(config, 20);
    h.bank.preload(0x40, &[55]);
    h.submit(&[head(Op::LoadW, 0x800, 1)]); // miss, destination 1
    h.submit(&[head(Op::LoadW, 0x40, 2)]); // hit, destination 2
    h.run_until_responses(2);
    assert_eq!(2, h.responses[0].destination.channel, "hit overtakes");
    assert_eq!(55, h.responses[0].data);
    assert_eq!(1, h.responses[1].destination.channel);
}

#[test]
fn shared_destination_is_never_reordered() {
    let config = BankConfig {
        hit_under_miss: true,
        ..BankConfig::default()
    };
    let mut h = BankHarness::with_latency(config, 20);
    h.bank.preload(0x40, &[55]);
    h.submit(&[head(Op::LoadW, 0x800, 1)]); // miss
    h.submit(&[head(Op::LoadW, 0x40, 1)]); // hit, same destination
    h.run_until_responses(2);
    assert_eq!(0, h.responses[0].data, "miss response must come first");
    assert_eq!(55, h.responses[1].data);
}

#[test]
fn hit_under_miss_disabled_serializes_everything() {
    let mut h = BankHarness::with_latency(BankConfig::default(), 20);
    h.bank.preload(0x40, &[55]);
    h.submit(&[head(Op::LoadW, 0x800, 1)]);
    h.submit(&[head(Op::LoadW, 0x40, 2)]);
    h.run_until_responses(2);
    assert_eq!(1, h.responses[0].destination.channel);
    assert_eq!(2, h.responses[1].destination.channel);
}

#[test]
fn miss_under_miss_is_not_admitted() {
    let config = BankConfig {
        hit_under_miss: true,
        ..BankConfig::default()
    };
    let mut h = BankHarness::with_latency(config, 20);
    h.submit(&[head(Op::LoadW, 0x800, 1)]);
    h.submit(&[head(Op::LoadW, 0x840, 2)]); // also a miss: must wait
    h.run_until_responses(2);
    assert_eq!(1, h.responses[0].destination.channel);
    assert_eq!(2, h.responses[1].destination.channel);
}

#[test]
fn eviction_invalidates_reservations_on_the_victim() {
    let mut h = BankHarness::new(BankConfig::default());
    h.submit(&[head(Op::LoadLinked, 0x100, 1)]);
    h.run_until_responses(1);
    // clean eviction of the reserved line
    h.submit(&[head(Op::LoadW, 0x900, 2)]);
    h.run_until_responses(2);
    h.submit(&packet(Op::StoreConditional, 0x100, 1, &[9]));
    h.run_until_responses(3);
    assert_eq!(0, h.responses[2].data, "sc must fail after its line left");
}

#[test]
fn stats_account_for_every_request() {
    let mut h = BankHarness::new(BankConfig::default());
    h.submit(&[head(Op::LoadW, 0x100, 1)]);
    h.run_until_responses(1);
    h.submit(&[head(Op::LoadW, 0x104, 1)]);
    h.run_until_responses(2);
    let stats = h.bank.stats();
    assert_eq!(2, stats.accesses);
    assert_eq!(1, stats.misses);
    assert_eq!(1, stats.hits);
    assert_eq!(2, stats.results_sent);
}
