use crate::mem::address::{MemoryAddr, SramAddress, BYTES_PER_WORD};
use crate::mem::metadata::NetworkDestination;

/// One outstanding load-linked reservation.
#[derive(Debug, Clone, Copy, Default)]
struct Reservation {
    requester: NetworkDestination,
    address: MemoryAddr,
    sram: SramAddress,
    valid: bool,
}

/// Tracks load-linked reservations for one bank. A reservation stays valid
/// until any write touches its word or its slot is recycled; the table has a
/// fixed capacity and replaces entries round-robin.
#[derive(Debug)]
pub struct ReservationTable {
    entries: Vec<Reservation>,
    next_victim: usize,
}

impl ReservationTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: vec![Reservation::default(); capacity.max(1)],
            next_victim: 0,
        }
    }

    pub fn make(
        &mut self,
        requester: NetworkDestination,
        address: MemoryAddr,
        sram: SramAddress,
    ) {
        // A requester holds at most one reservation; reuse its slot.
        let slot = self
            .entries
            .iter()
            .position(|r| r.valid && r.requester == requester)
            .unwrap_or_else(|| {
                let slot = self.next_victim;
                self.next_victim = (self.next_victim + 1) % self.entries.len();
                slot
            });
        self.entries[slot] = Reservation {
            requester,
            address,
            sram,
            valid: true,
        };
    }

    pub fn check(&self, requester: NetworkDestination, address: MemoryAddr) -> bool {
        self.entries
            .iter()
            .any(|r| r.valid && r.requester == requester && r.address == address)
    }

    /// Invalidate every reservation covering the written word, regardless of
    /// who wrote it.
    pub fn clear_word(&mut self, address: MemoryAddr) {
        let word = address & !(BYTES_PER_WORD - 1);
        for r in &mut self.entries {
            if r.valid && (r.address & !(BYTES_PER_WORD - 1)) == word {
                r.valid = false;
            }
        }
    }

    /// Invalidate every reservation within `[base, base + size)`. Used when a
    /// whole line is refilled, flushed away or invalidated.
    pub fn clear_range(&mut self, base: MemoryAddr, size: u32) {
        for r in &mut self.entries {
            if r.valid && r.address >= base && r.address < base.saturating_add(size) {
                r.valid = false;
            }
        }
    }

    pub fn reset(&mut self) {
        for r in &mut self.entries {
            r.valid = false;
        }
        self.next_victim = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest(channel: u8) -> NetworkDestination {
        NetworkDestination::new(0, channel)
    }

    #[test]
    fn reservation_survives_until_write() {
        let mut table = ReservationTable::new(4);
        table.make(dest(1), 0x100, 0);
        assert!(table.check(dest(1), 0x100));
        table.clear_word(0x100);
        assert!(!table.check(dest(1), 0x100));
    }

    #[test]
    fn write_clears_all_matching_reservations() {
        let mut table = ReservationTable::new(4);
        table.make(dest(1), 0x100, 0);
        table.make(dest(2), 0x100, 0);
        table.clear_word(0x102); // same word, different byte
        assert!(!table.check(dest(1), 0x100));
        assert!(!table.check(dest(2), 0x100));
    }

    #[test]
    fn unrelated_write_leaves_reservation() {
        let mut table = ReservationTable::new(4);
        table.make(dest(1), 0x100, 0);
        table.clear_word(0x104);
        assert!(table.check(dest(1), 0x100));
    }

    #[test]
    fn capacity_overflow_replaces_round_robin() {
        let mut table = ReservationTable::new(2);
        table.make(dest(1), 0x100, 0);
        table.make(dest(2), 0x200, 0);
        table.make(dest(3), 0x300, 0);
        assert!(!table.check(dest(1), 0x100));
        assert!(table.check(dest(2), 0x200));
        assert!(table.check(dest(3), 0x300));
    }

    #[test]
    fn requester_keeps_single_reservation() {
        let mut table = ReservationTable::new(4);
        table.make(dest(1), 0x100, 0);
        table.make(dest(1), 0x200, 0);
        assert!(!table.check(dest(1), 0x100));
        assert!(table.check(dest(1), 0x200));
    }

    #[test]
    fn range_clear_covers_line() {
        let mut table = ReservationTable::new(4);
        table.make(dest(1), 0x104, 4);
        table.make(dest(2), 0x120, 0);
        table.clear_range(0x100, 32);
        assert!(!table.check(dest(1), 0x104));
        assert!(table.check(dest(2), 0x120));
    }
}
