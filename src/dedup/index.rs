//! Nearest-fingerprint lookup structures.
//!
//! Both indexes answer the same question: among the fingerprints inserted so
//! far, which is closest to a query, provided it is strictly closer than the
//! threshold? When several are equally close the earliest inserted wins, so
//! results never depend on the index chosen.

use std::collections::HashMap;

use super::Fingerprint;
use crate::config::DedupIndexKind;

/// Lookup of previously accepted fingerprints.
pub trait FingerprintIndex: Send {
    /// The canonical name of the closest entry with distance `< threshold`.
    fn find_match(&self, fingerprint: Fingerprint, threshold: u32) -> Option<&str>;

    /// Register a new canonical entry.
    fn insert(&mut self, fingerprint: Fingerprint, canonical: String);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build the configured index.
#[must_use]
pub fn build_index(kind: DedupIndexKind, threshold: u32) -> Box<dyn FingerprintIndex> {
    match kind {
        DedupIndexKind::Linear => Box::new(LinearIndex::default()),
        DedupIndexKind::Bucketed => Box::new(BucketedIndex::new(threshold)),
    }
}

/// Closest entry among `candidates` (indices into `entries`, ascending).
fn closest<'a>(
    entries: &'a [(Fingerprint, String)],
    candidates: impl Iterator<Item = usize>,
    fingerprint: Fingerprint,
    threshold: u32,
) -> Option<&'a str> {
    let mut best: Option<(u32, usize)> = None;

    for index in candidates {
        let distance = entries[index].0.distance(fingerprint);
        if distance >= threshold {
            continue;
        }
        let better = match best {
            None => true,
            Some((best_distance, best_index)) => {
                distance < best_distance || (distance == best_distance && index < best_index)
            }
        };
        if better {
            best = Some((distance, index));
        }
    }

    best.map(|(_, index)| entries[index].1.as_str())
}

/// Full scan over every entry.
#[derive(Debug, Default)]
pub struct LinearIndex {
    entries: Vec<(Fingerprint, String)>,
}

impl FingerprintIndex for LinearIndex {
    fn find_match(&self, fingerprint: Fingerprint, threshold: u32) -> Option<&str> {
        closest(&self.entries, 0..self.entries.len(), fingerprint, threshold)
    }

    fn insert(&mut self, fingerprint: Fingerprint, canonical: String) {
        self.entries.push((fingerprint, canonical));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Block-partitioned Hamming index.
///
/// The 64 bits are cut into `threshold` blocks. Two fingerprints closer than
/// `threshold` differ in at most `threshold - 1` bits, so at least one block
/// is identical; only entries sharing a block with the query are compared.
#[derive(Debug)]
pub struct BucketedIndex {
    entries: Vec<(Fingerprint, String)>,
    blocks: Vec<(u32, u32)>,
    tables: Vec<HashMap<u64, Vec<usize>>>,
}

impl BucketedIndex {
    /// Index tuned for queries with `threshold`. Larger thresholds still
    /// answer correctly by scanning every entry.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        let count = threshold.clamp(1, Fingerprint::BITS);
        let base = Fingerprint::BITS / count;
        let extra = Fingerprint::BITS % count;

        let mut blocks = Vec::with_capacity(count as usize);
        let mut start = 0;
        for i in 0..count {
            let width = base + u32::from(i < extra);
            blocks.push((start, width));
            start += width;
        }

        Self {
            entries: Vec::new(),
            tables: vec![HashMap::new(); blocks.len()],
            blocks,
        }
    }

    fn block_key(fingerprint: Fingerprint, (start, width): (u32, u32)) -> u64 {
        let mask = if width >= 64 {
            u64::MAX
        } else {
            (1u64 << width) - 1
        };
        (fingerprint.0 >> start) & mask
    }
}

impl FingerprintIndex for BucketedIndex {
    fn find_match(&self, fingerprint: Fingerprint, threshold: u32) -> Option<&str> {
        if threshold == 0 {
            return None;
        }
        if threshold as usize > self.blocks.len() {
            return closest(&self.entries, 0..self.entries.len(), fingerprint, threshold);
        }

        let mut candidates: Vec<usize> = self
            .blocks
            .iter()
            .zip(&self.tables)
            .filter_map(|(block, table)| table.get(&Self::block_key(fingerprint, *block)))
            .flatten()
            .copied()
            .collect();
        candidates.sort_unstable();
        candidates.dedup();

        closest(&self.entries, candidates.into_iter(), fingerprint, threshold)
    }

    fn insert(&mut self, fingerprint: Fingerprint, canonical: String) {
        let index = self.entries.len();
        for (block, table) in self.blocks.iter().zip(&mut self.tables) {
            table
                .entry(Self::block_key(fingerprint, *block))
                .or_default()
                .push(index);
        }
        self.entries.push((fingerprint, canonical));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random fingerprints.
    fn xorshift(state: &mut u64) -> u64 {
        *state ^= *state << 13;
        *state ^= *state >> 7;
        *state ^= *state << 17;
        *state
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut index = LinearIndex::default();
        index.insert(Fingerprint(0), "a.jpg".to_string());

        assert_eq!(index.find_match(Fingerprint(0b1), 2), Some("a.jpg"));
        assert_eq!(index.find_match(Fingerprint(0b11), 2), None);
        assert_eq!(index.find_match(Fingerprint(0), 0), None);
    }

    #[test]
    fn test_closest_wins_then_earliest() {
        let mut index = LinearIndex::default();
        index.insert(Fingerprint(0b0011), "first.jpg".to_string());
        index.insert(Fingerprint(0b0101), "second.jpg".to_string());
        index.insert(Fingerprint(0b0000_0001), "closest.jpg".to_string());

        // Distances 2, 2, 1.
        assert_eq!(index.find_match(Fingerprint(0), 5), Some("closest.jpg"));
        // Distances 1, 1, 2: earliest inserted wins.
        assert_eq!(index.find_match(Fingerprint(0b0111), 5), Some("first.jpg"));
    }

    #[test]
    fn test_bucketed_block_layout_covers_all_bits() {
        for threshold in [1, 2, 3, 7, 10, 64, 100] {
            let index = BucketedIndex::new(threshold);
            let total: u32 = index.blocks.iter().map(|(_, w)| w).sum();
            assert_eq!(total, 64, "threshold {threshold}");
        }
    }

    #[test]
    fn test_bucketed_matches_linear() {
        let mut state = 0x9E37_79B9_7F4A_7C15;
        let base: Vec<u64> = (0..200).map(|_| xorshift(&mut state)).collect();

        for threshold in [1, 2, 4, 8] {
            let mut linear = LinearIndex::default();
            let mut bucketed = BucketedIndex::new(threshold);

            for (i, bits) in base.iter().enumerate() {
                // Near-duplicates of earlier entries mixed with fresh values.
                let fp = if i % 3 == 0 && i > 0 {
                    Fingerprint(base[i / 3] ^ (1 << (i % 64)))
                } else {
                    Fingerprint(*bits)
                };

                assert_eq!(
                    linear.find_match(fp, threshold),
                    bucketed.find_match(fp, threshold),
                    "threshold {threshold}, entry {i}"
                );
                if linear.find_match(fp, threshold).is_none() {
                    linear.insert(fp, format!("{i}.jpg"));
                    bucketed.insert(fp, format!("{i}.jpg"));
                }
            }
            assert_eq!(linear.len(), bucketed.len());
        }
    }

    #[test]
    fn test_bucketed_larger_query_threshold_still_correct() {
        let mut index = BucketedIndex::new(2);
        index.insert(Fingerprint(0), "a.jpg".to_string());
        assert_eq!(index.find_match(Fingerprint(0b1111), 5), Some("a.jpg"));
    }
}
