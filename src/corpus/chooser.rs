//! Weighted-random mutation target chooser: a sum-of-weights tree
//! supporting O(log N) pick and insert (§9 Design Notes), needed once the
//! mutable corpus grows into the tens of thousands of entries.
//!
//! Grounded on the teacher's `scheduler.rs` `SortedDroppingScheduler`
//! (vote-weighted corpus-entry selection), generalized from its
//! vote/visit bookkeeping to a plain Fenwick-tree weighted pick since this
//! engine's weights are fixed at insertion time (always 1, per §4.7)
//! rather than updated by a voting mechanism.

/// A binary indexed tree (Fenwick tree) over per-entry weights, mapping
/// each live entry to an opaque `id` so the corpus can remove entries
/// without shifting every other entry's index.
#[derive(Debug, Default)]
pub struct WeightedChooser {
    tree: Vec<u64>,
    ids: Vec<Option<u64>>,
    total_weight: u64,
}

impl WeightedChooser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.total_weight == 0
    }

    pub fn len(&self) -> usize {
        self.ids.iter().filter(|x| x.is_some()).count()
    }

    /// Appends a new entry with the given weight (must be > 0) and returns
    /// its index, used later for removal.
    pub fn insert(&mut self, id: u64, weight: u32) -> usize {
        let index = self.ids.len();
        self.ids.push(Some(id));
        self.tree.push(0);
        self.add_weight(index, weight as i64);
        index
    }

    /// Zeroes out an entry's weight so it is never picked again, without
    /// perturbing the indices of other entries.
    pub fn remove(&mut self, index: usize) {
        if index >= self.ids.len() || self.ids[index].is_none() {
            return;
        }
        let current = self.weight_at(index);
        self.add_weight(index, -(current as i64));
        self.ids[index] = None;
    }

    fn weight_at(&self, index: usize) -> u64 {
        self.prefix_sum(index + 1) - self.prefix_sum(index)
    }

    fn add_weight(&mut self, index: usize, delta: i64) {
        self.total_weight = (self.total_weight as i64 + delta) as u64;
        let mut i = index + 1;
        while i <= self.tree.len() {
            self.tree[i - 1] = (self.tree[i - 1] as i64 + delta) as u64;
            i += i & i.wrapping_neg();
        }
    }

    fn prefix_sum(&self, count: usize) -> u64 {
        let mut i = count;
        let mut sum = 0u64;
        while i > 0 {
            sum += self.tree[i - 1];
            i -= i & i.wrapping_neg();
        }
        sum
    }

    /// Returns the id at the smallest prefix-sum index exceeding `target`.
    fn find(&self, target: u64) -> Option<usize> {
        let mut index = 0usize;
        let mut remaining = target;
        let mut bit = self.tree.len().next_power_of_two();
        while bit > 0 {
            let next = index + bit;
            if next <= self.tree.len() && self.tree[next - 1] <= remaining {
                index = next;
                remaining -= self.tree[next - 1];
            }
            bit >>= 1;
        }
        if index < self.ids.len() {
            Some(index)
        } else {
            None
        }
    }

    pub fn pick(&self, rng: &mut impl rand::Rng) -> Option<u64> {
        if self.is_empty() {
            return None;
        }
        let target = rng.gen_range(0..self.total_weight);
        let index = self.find(target)?;
        self.ids[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn empty_chooser_never_picks() {
        let chooser = WeightedChooser::new();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(chooser.pick(&mut rng), None);
    }

    #[test]
    fn removed_entries_are_never_picked() {
        let mut chooser = WeightedChooser::new();
        let idx_a = chooser.insert(1, 1);
        chooser.insert(2, 1);
        chooser.remove(idx_a);

        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            assert_eq!(chooser.pick(&mut rng), Some(2));
        }
    }

    #[test]
    fn single_entry_is_always_picked() {
        let mut chooser = WeightedChooser::new();
        chooser.insert(77, 1);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(chooser.pick(&mut rng), Some(77));
    }
}
