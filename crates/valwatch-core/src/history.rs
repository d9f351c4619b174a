//! Attendance history: a fixed-size sliding window of the last N observed
//! blocks per validator, oldest first.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::BlockRecord;

/// One attendance observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub height: u64,
    pub found: bool,
}

/// Sliding window of attendance entries in strictly increasing height order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlocksHistory {
    window: VecDeque<HistoryEntry>,
}

impl BlocksHistory {
    /// Append an observation, evicting the oldest entries beyond `limit`.
    ///
    /// Entries at or below the newest height are ignored so the window stays
    /// strictly increasing. Returns `true` if the entry was appended.
    pub fn push(&mut self, entry: HistoryEntry, limit: usize) -> bool {
        if let Some(last) = self.window.back() {
            if entry.height <= last.height {
                return false;
            }
        }
        self.window.push_back(entry);
        while self.window.len() > limit {
            self.window.pop_front();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<&HistoryEntry> {
        self.window.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.window.iter()
    }

    pub fn missed(&self) -> usize {
        self.window.iter().filter(|e| !e.found).count()
    }
}

impl FromIterator<HistoryEntry> for BlocksHistory {
    fn from_iter<I: IntoIterator<Item = HistoryEntry>>(iter: I) -> Self {
        Self {
            window: iter.into_iter().collect(),
        }
    }
}

/// Percentage of attended blocks in `history`, rounded to two decimals.
/// An empty history reports 0.
pub fn calculate_uptime(history: &BlocksHistory) -> f64 {
    if history.is_empty() {
        return 0.0;
    }
    let found = history.len() - history.missed();
    round2(found as f64 / history.len() as f64 * 100.0)
}

/// Share of `blocks` proposed by `hex_address`, in percent.
pub fn proposal_share(blocks: &[BlockRecord], hex_address: &str) -> f64 {
    if blocks.is_empty() {
        return 0.0;
    }
    let proposed = blocks
        .iter()
        .filter(|b| b.proposer_address.eq_ignore_ascii_case(hex_address))
        .count();
    round2(proposed as f64 / blocks.len() as f64 * 100.0)
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(height: u64, found: bool) -> HistoryEntry {
        HistoryEntry { height, found }
    }

    #[test]
    fn window_never_exceeds_limit() {
        let mut h = BlocksHistory::default();
        for height in 1..=500 {
            h.push(entry(height, height % 7 != 0), 100);
            assert!(h.len() <= 100);
        }
        assert_eq!(h.len(), 100);
        assert_eq!(h.iter().next().map(|e| e.height), Some(401));
        assert_eq!(h.last().map(|e| e.height), Some(500));
    }

    #[test]
    fn rejects_non_increasing_height() {
        let mut h = BlocksHistory::default();
        assert!(h.push(entry(10, true), 5));
        assert!(!h.push(entry(10, false), 5));
        assert!(!h.push(entry(9, false), 5));
        assert!(h.push(entry(12, false), 5), "gaps are tolerated");
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn uptime_seventy_percent() {
        let h: BlocksHistory = (1..=10)
            .map(|height| entry(height, !matches!(height, 2 | 5 | 9)))
            .collect();
        assert_eq!(calculate_uptime(&h), 70.00);
        assert_eq!(format!("{:.2}", calculate_uptime(&h)), "70.00");
    }

    #[test]
    fn uptime_rounds_to_two_decimals() {
        let h: BlocksHistory = (1..=3).map(|height| entry(height, height != 1)).collect();
        assert_eq!(calculate_uptime(&h), 66.67);
        assert_eq!(calculate_uptime(&BlocksHistory::default()), 0.0);
    }

    #[test]
    fn proposal_share_counts_matching_proposer() {
        let blocks: Vec<BlockRecord> = (1..=8)
            .map(|height| BlockRecord {
                height,
                proposer_address: if height % 4 == 0 { "AB12".into() } else { "CD34".into() },
                tx_count: 0,
            })
            .collect();
        assert_eq!(proposal_share(&blocks, "ab12"), 25.0);
        assert_eq!(proposal_share(&[], "AB12"), 0.0);
    }

    #[test]
    fn serializes_as_plain_sequence() {
        let h: BlocksHistory = vec![entry(1, true), entry(2, false)].into_iter().collect();
        let json = serde_json::to_value(&h).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"height": 1, "found": true}, {"height": 2, "found": false}])
        );
    }
}
