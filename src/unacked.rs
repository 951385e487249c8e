//! The queue of datagram updates that have been sent but not acknowledged.
//!
//! Entries sit in send order, so send times are non-decreasing from the
//! front: the retransmission sweep can stop at the first entry that is still
//! young enough.

use std::collections::VecDeque;

use crate::region::Region;

#[derive(Debug)]
pub struct UnackedEntry {
    pub seq_num: u32,
    /// Millisecond timestamp of the datagram send.
    pub send_time: u64,
    pub num_bytes: u32,
    /// Pixels this update covered on the client, as of encoding time.
    pub region: Region,
}

#[derive(Debug, Default)]
pub struct UnackedQueue {
    entries: VecDeque<UnackedEntry>,
}

impl UnackedQueue {
    pub fn new() -> UnackedQueue {
        UnackedQueue { entries: VecDeque::new() }
    }

    pub fn push_back(&mut self, entry: UnackedEntry) {
        self.entries.push_back(entry);
    }

    /// Removes the entry acknowledged by `seq_num` and returns its send time
    /// and size for RTT and throughput accounting. A duplicate or late ack
    /// finds nothing and returns `None`.
    pub fn delete_by_seq(&mut self, seq_num: u32) -> Option<(u64, u32)> {
        let index = self.entries.iter().position(|e| e.seq_num == seq_num)?;
        let entry = self.entries.remove(index).unwrap();
        Some((entry.send_time, entry.num_bytes))
    }

    /// Expires every entry older than `timeout`, unioning its region into
    /// `modified` so the pixels are re-encoded on the next push. Entries are
    /// in send order, so the scan stops at the first young entry.
    pub fn age_scan(&mut self, now: u64, timeout: u64, modified: &mut Region) {
        while let Some(entry) = self.entries.front() {
            if now.saturating_sub(entry.send_time) <= timeout {
                break;
            }
            let entry = self.entries.pop_front().unwrap();
            *modified = modified.union(&entry.region);
        }
    }

    /// A freshly computed update covers `region`; any in-flight entry loses
    /// that area and is retired outright once nothing of it remains.
    pub fn subtract_region(&mut self, region: &Region) {
        self.entries.retain_mut(|entry| {
            entry.region = entry.region.subtract(region);
            !entry.region.is_empty()
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnackedEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Rect;

    fn entry(seq_num: u32, send_time: u64, rect: Rect) -> UnackedEntry {
        UnackedEntry {
            seq_num,
            send_time,
            num_bytes: 100,
            region: Region::from_rect(rect),
        }
    }

    #[test]
    fn delete_by_seq_returns_timing_and_removes() {
        let mut queue = UnackedQueue::new();
        queue.push_back(entry(1, 1000, Rect::new(0, 0, 10, 10)));
        queue.push_back(entry(2, 1010, Rect::new(10, 0, 20, 10)));

        assert_eq!(queue.delete_by_seq(1), Some((1000, 100)));
        assert_eq!(queue.len(), 1);
        // duplicate ack
        assert_eq!(queue.delete_by_seq(1), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn age_scan_removes_exactly_the_expired_prefix() {
        let mut queue = UnackedQueue::new();
        queue.push_back(entry(1, 1000, Rect::new(0, 0, 10, 10)));
        queue.push_back(entry(2, 1050, Rect::new(10, 0, 20, 10)));
        queue.push_back(entry(3, 1100, Rect::new(20, 0, 30, 10)));

        let mut modified = Region::new();
        // timeout 100 at t=1160: entries older than 1060 expire
        queue.age_scan(1160, 100, &mut modified);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.iter().next().unwrap().seq_num, 3);
        assert_eq!(modified.area(), 200);
    }

    #[test]
    fn age_scan_keeps_everything_when_young() {
        let mut queue = UnackedQueue::new();
        queue.push_back(entry(1, 1000, Rect::new(0, 0, 10, 10)));
        let mut modified = Region::new();
        queue.age_scan(1050, 100, &mut modified);
        assert_eq!(queue.len(), 1);
        assert!(modified.is_empty());
    }

    #[test]
    fn subtract_region_trims_and_retires() {
        let mut queue = UnackedQueue::new();
        queue.push_back(entry(1, 1000, Rect::new(0, 0, 10, 10)));
        queue.push_back(entry(2, 1010, Rect::new(0, 0, 40, 10)));

        let fresh = Region::from_rect(Rect::new(0, 0, 20, 10));
        queue.subtract_region(&fresh);

        // entry 1 was fully covered and is gone; entry 2 lost its left half
        assert_eq!(queue.len(), 1);
        let survivor = queue.iter().next().unwrap();
        assert_eq!(survivor.seq_num, 2);
        assert!(survivor.region.intersect(&fresh).is_empty());
        assert_eq!(survivor.region.area(), 200);
    }

    #[test]
    fn clear_drops_all_entries() {
        let mut queue = UnackedQueue::new();
        for seq in 0..5 {
            queue.push_back(entry(seq, 1000 + u64::from(seq), Rect::new(0, 0, 10, 10)));
        }
        queue.clear();
        assert!(queue.is_empty());
    }
}
