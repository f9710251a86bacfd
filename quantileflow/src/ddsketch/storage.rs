// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Bucket stores mapping a bucket index to the number of values it holds.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::collections::btree_map;
use std::collections::vec_deque;
use std::iter::Enumerate;

/// Dense store of counts over the contiguous index range `[min_index, max_index]`.
///
/// Counts live in a double-ended buffer addressed by `index - min_index`, so the range can grow at
/// either end in amortized constant time. When the span exceeds `max_buckets`, the store collapses
/// bucket pairs at the ends of the range: the pair of lowest positions and the pair of highest
/// positions are compared, and the one with the smaller combined count is merged into its inner
/// bucket. Ties collapse the low end, which preserves resolution in the upper tail.
#[derive(Debug, Clone, PartialEq)]
pub struct ContiguousStorage {
    counts: VecDeque<u64>,
    min_index: i32,
    total_count: u64,
    max_buckets: usize,
}

impl ContiguousStorage {
    /// Creates a store that keeps at most `max_buckets` positions.
    ///
    /// # Panics
    ///
    /// Panics if `max_buckets` is 0.
    pub fn new(max_buckets: usize) -> Self {
        assert!(max_buckets > 0, "max_buckets must be at least 1");
        Self {
            counts: VecDeque::new(),
            min_index: 0,
            total_count: 0,
            max_buckets,
        }
    }

    /// Creates a store that never collapses.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Returns the current bucket budget.
    pub fn max_buckets(&self) -> usize {
        self.max_buckets
    }

    /// Changes the bucket budget, collapsing immediately if the span exceeds it.
    ///
    /// Returns the number of collapsed pairs.
    ///
    /// # Panics
    ///
    /// Panics if `max_buckets` is 0.
    pub fn set_max_buckets(&mut self, max_buckets: usize) -> usize {
        assert!(max_buckets > 0, "max_buckets must be at least 1");
        self.max_buckets = max_buckets;
        self.collapse()
    }

    /// Returns the sum of all counts.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Returns true if no value is counted.
    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }

    /// Returns the number of positions between the lowest and highest index, inclusive.
    pub fn span(&self) -> usize {
        self.counts.len()
    }

    /// Returns the lowest index of the range, if any.
    pub fn min_index(&self) -> Option<i32> {
        (!self.counts.is_empty()).then_some(self.min_index)
    }

    /// Returns the highest index of the range, if any.
    pub fn max_index(&self) -> Option<i32> {
        (!self.counts.is_empty()).then(|| self.top_index())
    }

    /// Returns the count held at `index`.
    pub fn count_at(&self, index: i32) -> u64 {
        self.position(index)
            .map(|position| self.counts[position])
            .unwrap_or(0)
    }

    /// Increments the count at `index`.
    ///
    /// Returns the number of bucket pairs collapsed to stay within budget.
    pub fn add(&mut self, index: i32) -> usize {
        self.add_count(index, 1)
    }

    /// Adds `count` to the bucket at `index`.
    ///
    /// Returns the number of bucket pairs collapsed to stay within budget.
    pub fn add_count(&mut self, index: i32, count: u64) -> usize {
        if count == 0 {
            return 0;
        }
        self.total_count += count;

        if self.counts.is_empty() {
            self.counts.push_back(count);
            self.min_index = index;
            return 0;
        }
        if let Some(position) = self.position(index) {
            self.counts[position] += count;
            return 0;
        }

        let above = index > self.top_index();
        let gap = if above {
            (index as i64 - self.top_index() as i64 - 1) as u64
        } else {
            (self.min_index as i64 - index as i64 - 1) as u64
        };
        let new_span = self.counts.len() as u64 + gap + 1;
        if new_span <= self.max_buckets as u64 {
            self.extend_with_zeros(above, gap);
            self.push_end(above, count);
            return 0;
        }
        self.add_far(above, gap, count, new_span - self.max_buckets as u64)
    }

    /// Decrements the count at `index`.
    ///
    /// Returns false, leaving the store unchanged, if the bucket is empty.
    pub fn remove(&mut self, index: i32) -> bool {
        let Some(position) = self.position(index) else {
            return false;
        };
        if self.counts[position] == 0 {
            return false;
        }
        self.counts[position] -= 1;
        self.total_count -= 1;
        self.trim();
        true
    }

    /// Returns the smallest index whose cumulative count exceeds `rank`.
    ///
    /// Ranks beyond the total count resolve to the highest non-empty index.
    pub fn key_at_rank(&self, rank: u64) -> Option<i32> {
        if self.is_empty() {
            return None;
        }
        let mut cumulative = 0;
        let mut last_non_empty = self.min_index;
        for (position, count) in self.counts.iter().enumerate() {
            cumulative += count;
            if *count > 0 {
                last_non_empty = self.min_index + position as i32;
            }
            if cumulative > rank {
                return Some(last_non_empty);
            }
        }
        Some(last_non_empty)
    }

    /// Adds every count of `other` into this store, collapsing as needed.
    ///
    /// Returns the number of collapsed pairs.
    pub fn merge(&mut self, other: &ContiguousStorage) -> usize {
        let mut collapsed = 0;
        for (index, count) in other.iter() {
            collapsed += self.add_count(index, count);
        }
        collapsed
    }

    /// Collapses end pairs until the span fits the budget.
    ///
    /// Returns the number of collapsed pairs.
    pub fn collapse(&mut self) -> usize {
        let mut collapsed = 0;
        while self.counts.len() > self.max_buckets {
            let len = self.counts.len();
            let low = self.counts[0] + self.counts[1];
            let high = self.counts[len - 1] + self.counts[len - 2];
            self.collapse_end(low > high);
            collapsed += 1;
        }
        collapsed
    }

    /// Iterates over non-empty buckets in ascending index order.
    pub fn iter(&self) -> ContiguousIter<'_> {
        ContiguousIter {
            counts: self.counts.iter().enumerate(),
            min_index: self.min_index,
        }
    }

    /// Removes every count, keeping the budget.
    pub fn clear(&mut self) {
        self.counts.clear();
        self.min_index = 0;
        self.total_count = 0;
    }

    fn top_index(&self) -> i32 {
        self.min_index + self.counts.len() as i32 - 1
    }

    fn position(&self, index: i32) -> Option<usize> {
        if self.counts.is_empty() || index < self.min_index || index > self.top_index() {
            None
        } else {
            Some((index as i64 - self.min_index as i64) as usize)
        }
    }

    fn extend_with_zeros(&mut self, above: bool, gap: u64) {
        for _ in 0..gap {
            self.push_end(above, 0);
        }
    }

    fn push_end(&mut self, above: bool, count: u64) {
        if above {
            self.counts.push_back(count);
        } else {
            self.counts.push_front(count);
            self.min_index -= 1;
        }
    }

    /// Merges the end bucket into its neighbour. `high` selects the upper end.
    fn collapse_end(&mut self, high: bool) {
        if high {
            if let Some(last) = self.counts.pop_back() {
                if let Some(neighbour) = self.counts.back_mut() {
                    *neighbour += last;
                }
            }
        } else if let Some(first) = self.counts.pop_front() {
            self.min_index += 1;
            if let Some(neighbour) = self.counts.front_mut() {
                *neighbour += first;
            }
        }
    }

    /// Places `count` at a position `gap + 1` beyond the current range and collapses `steps`
    /// times, without materializing the empty positions in between.
    ///
    /// The count being added is the outer end of the range and the existing buckets the inner
    /// end. While empty positions separate them, every outer pair sums to `count` and every inner
    /// pair only involves existing buckets, so runs of identical decisions are applied at once.
    fn add_far(&mut self, above: bool, mut gap: u64, count: u64, mut steps: u64) -> usize {
        let collapsed = steps as usize;
        while steps > 0 && gap > 0 {
            let inner = if self.counts.len() >= 2 {
                if above {
                    self.counts[0] + self.counts[1]
                } else {
                    self.counts[self.counts.len() - 1] + self.counts[self.counts.len() - 2]
                }
            } else {
                self.counts[0]
            };
            // ties go to the low end, which is the inner end when growing upwards
            let inner_wins = if above { inner <= count } else { inner < count };
            if !inner_wins {
                // the outer count slides inwards over empty positions
                let run = steps.min(gap);
                gap -= run;
                steps -= run;
            } else if self.counts.len() >= 2 {
                self.collapse_end(!above);
                steps -= 1;
            } else {
                // a lone inner bucket slides towards the new count over empty positions
                let run = steps.min(gap);
                if above {
                    self.min_index += run as i32;
                } else {
                    self.min_index -= run as i32;
                }
                gap -= run;
                steps -= run;
            }
        }

        self.extend_with_zeros(above, gap);
        self.push_end(above, count);
        let remaining = self.collapse();
        debug_assert_eq!(remaining as u64, steps);
        collapsed
    }

    fn trim(&mut self) {
        while self.counts.len() > 1 && self.counts.front() == Some(&0) {
            self.counts.pop_front();
            self.min_index += 1;
        }
        while self.counts.len() > 1 && self.counts.back() == Some(&0) {
            self.counts.pop_back();
        }
        if self.total_count == 0 {
            self.clear();
        }
    }
}

/// Iterator over the non-empty buckets of a [`ContiguousStorage`].
pub struct ContiguousIter<'a> {
    counts: Enumerate<vec_deque::Iter<'a, u64>>,
    min_index: i32,
}

impl Iterator for ContiguousIter<'_> {
    type Item = (i32, u64);

    fn next(&mut self) -> Option<Self::Item> {
        for (position, count) in self.counts.by_ref() {
            if *count > 0 {
                return Some((self.min_index + position as i32, *count));
            }
        }
        None
    }
}

/// Sparse store of counts keyed by bucket index. It never collapses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseStorage {
    counts: BTreeMap<i32, u64>,
    total_count: u64,
}

impl SparseStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the sum of all counts.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Returns true if no value is counted.
    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }

    /// Returns the number of non-empty buckets.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns the count held at `index`.
    pub fn count_at(&self, index: i32) -> u64 {
        self.counts.get(&index).copied().unwrap_or(0)
    }

    /// Increments the count at `index`.
    pub fn add(&mut self, index: i32) {
        self.add_count(index, 1);
    }

    /// Adds `count` to the bucket at `index`.
    pub fn add_count(&mut self, index: i32, count: u64) {
        if count == 0 {
            return;
        }
        *self.counts.entry(index).or_insert(0) += count;
        self.total_count += count;
    }

    /// Decrements the count at `index`, dropping the bucket when it empties.
    ///
    /// Returns false, leaving the store unchanged, if the bucket is empty.
    pub fn remove(&mut self, index: i32) -> bool {
        let btree_map::Entry::Occupied(mut entry) = self.counts.entry(index) else {
            return false;
        };
        *entry.get_mut() -= 1;
        if *entry.get() == 0 {
            entry.remove();
        }
        self.total_count -= 1;
        true
    }

    /// Returns the smallest index whose cumulative count exceeds `rank`.
    ///
    /// Ranks beyond the total count resolve to the highest index.
    pub fn key_at_rank(&self, rank: u64) -> Option<i32> {
        let mut cumulative = 0;
        for (index, count) in &self.counts {
            cumulative += count;
            if cumulative > rank {
                return Some(*index);
            }
        }
        self.counts.keys().next_back().copied()
    }

    /// Adds every count of `other` into this store.
    pub fn merge(&mut self, other: &SparseStorage) {
        for (index, count) in other.iter() {
            self.add_count(index, count);
        }
    }

    /// Iterates over non-empty buckets in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, u64)> + '_ {
        self.counts.iter().map(|(index, count)| (*index, *count))
    }

    /// Removes every count.
    pub fn clear(&mut self) {
        self.counts.clear();
        self.total_count = 0;
    }
}

/// Bucket store selected once per sketch from its [`BucketPolicy`](super::BucketPolicy).
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    /// Dense store with a bucket budget.
    Contiguous(ContiguousStorage),
    /// Unbounded sparse store.
    Sparse(SparseStorage),
}

impl Storage {
    /// Returns the sum of all counts.
    pub fn total_count(&self) -> u64 {
        match self {
            Storage::Contiguous(store) => store.total_count(),
            Storage::Sparse(store) => store.total_count(),
        }
    }

    /// Returns true if no value is counted.
    pub fn is_empty(&self) -> bool {
        self.total_count() == 0
    }

    /// Returns the count held at `index`.
    pub fn count_at(&self, index: i32) -> u64 {
        match self {
            Storage::Contiguous(store) => store.count_at(index),
            Storage::Sparse(store) => store.count_at(index),
        }
    }

    /// Adds `count` to the bucket at `index`, returning the number of collapsed pairs.
    pub fn add_count(&mut self, index: i32, count: u64) -> usize {
        match self {
            Storage::Contiguous(store) => store.add_count(index, count),
            Storage::Sparse(store) => {
                store.add_count(index, count);
                0
            }
        }
    }

    /// Decrements the count at `index`; false if the bucket is empty.
    pub fn remove(&mut self, index: i32) -> bool {
        match self {
            Storage::Contiguous(store) => store.remove(index),
            Storage::Sparse(store) => store.remove(index),
        }
    }

    /// Returns the smallest index whose cumulative count exceeds `rank`.
    pub fn key_at_rank(&self, rank: u64) -> Option<i32> {
        match self {
            Storage::Contiguous(store) => store.key_at_rank(rank),
            Storage::Sparse(store) => store.key_at_rank(rank),
        }
    }

    /// Adds every count of `other`, returning the number of collapsed pairs.
    ///
    /// Stores of different variants are merged bucket by bucket.
    pub fn merge(&mut self, other: &Storage) -> usize {
        match (self, other) {
            (Storage::Contiguous(store), Storage::Contiguous(other)) => store.merge(other),
            (Storage::Sparse(store), Storage::Sparse(other)) => {
                store.merge(other);
                0
            }
            (store, other) => other
                .iter()
                .map(|(index, count)| store.add_count(index, count))
                .sum(),
        }
    }

    /// Sets the bucket budget of a contiguous store, collapsing if needed.
    pub fn set_max_buckets(&mut self, max_buckets: usize) -> usize {
        match self {
            Storage::Contiguous(store) => store.set_max_buckets(max_buckets),
            Storage::Sparse(_) => 0,
        }
    }

    /// Returns the number of buckets held in memory.
    pub fn footprint(&self) -> usize {
        match self {
            Storage::Contiguous(store) => store.span(),
            Storage::Sparse(store) => store.len(),
        }
    }

    /// Iterates over non-empty buckets in ascending index order.
    pub fn iter(&self) -> StorageIter<'_> {
        match self {
            Storage::Contiguous(store) => StorageIter::Contiguous(store.iter()),
            Storage::Sparse(store) => StorageIter::Sparse(store.counts.iter()),
        }
    }

    /// Removes every count.
    pub fn clear(&mut self) {
        match self {
            Storage::Contiguous(store) => store.clear(),
            Storage::Sparse(store) => store.clear(),
        }
    }
}

/// Iterator over the non-empty buckets of a [`Storage`].
pub enum StorageIter<'a> {
    #[doc(hidden)]
    Contiguous(ContiguousIter<'a>),
    #[doc(hidden)]
    Sparse(btree_map::Iter<'a, i32, u64>),
}

impl Iterator for StorageIter<'_> {
    type Item = (i32, u64);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            StorageIter::Contiguous(iter) => iter.next(),
            StorageIter::Sparse(iter) => iter.next().map(|(index, count)| (*index, *count)),
        }
    }
}
