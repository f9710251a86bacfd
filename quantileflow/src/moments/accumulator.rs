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

/// Running power sums of the values counted by a [`MomentSketch`](super::MomentSketch).
///
/// Values are accumulated after the optional `asinh` transform, so `min`, `max` and every power
/// sum describe the transformed values.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentAccumulator {
    power_sums: Vec<f64>,
    min: f64,
    max: f64,
    count: u64,
    compress: bool,
}

impl MomentAccumulator {
    /// Creates an accumulator tracking power sums of order `0..=num_moments`.
    pub fn new(num_moments: usize, compress: bool) -> Self {
        Self {
            power_sums: vec![0.0; num_moments + 1],
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            count: 0,
            compress,
        }
    }

    pub(crate) fn from_parts(
        power_sums: Vec<f64>,
        min: f64,
        max: f64,
        count: u64,
        compress: bool,
    ) -> Self {
        Self {
            power_sums,
            min,
            max,
            count,
            compress,
        }
    }

    /// Returns the highest tracked order.
    pub fn num_moments(&self) -> usize {
        self.power_sums.len() - 1
    }

    /// Returns true if values go through `asinh` before being accumulated.
    pub fn is_compressed(&self) -> bool {
        self.compress
    }

    /// Returns the power sums `sum(v^k)` for `k` in `0..=num_moments`.
    pub fn power_sums(&self) -> &[f64] {
        &self.power_sums
    }

    /// Returns the number of accumulated values.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns true if no value was accumulated.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the smallest transformed value, if any.
    pub fn min(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.min)
    }

    /// Returns the largest transformed value, if any.
    pub fn max(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.max)
    }

    /// Maps a value into the accumulated domain.
    pub fn transform(&self, value: f64) -> f64 {
        if self.compress { value.asinh() } else { value }
    }

    /// Maps an accumulated value back to the input domain.
    pub fn inverse_transform(&self, value: f64) -> f64 {
        if self.compress { value.sinh() } else { value }
    }

    /// Returns true if accumulating `value` keeps every power sum finite.
    pub fn can_add(&self, value: f64) -> bool {
        let value = self.transform(value);
        let mut power = 1.0;
        self.power_sums.iter().all(|sum| {
            let fits = (sum + power).is_finite();
            power *= value;
            fits
        })
    }

    /// Returns true if merging `other` keeps every power sum finite.
    pub fn can_merge(&self, other: &MomentAccumulator) -> bool {
        self.power_sums
            .iter()
            .zip(&other.power_sums)
            .all(|(sum, other)| (sum + other).is_finite())
    }

    /// Accumulates a finite value.
    pub fn add(&mut self, value: f64) {
        let value = self.transform(value);
        let mut power = 1.0;
        for sum in self.power_sums.iter_mut() {
            *sum += power;
            power *= value;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.count += 1;
    }

    /// Adds the power sums of an accumulator of the same shape.
    pub fn merge(&mut self, other: &MomentAccumulator) {
        debug_assert_eq!(self.power_sums.len(), other.power_sums.len());
        debug_assert_eq!(self.compress, other.compress);
        for (sum, other) in self.power_sums.iter_mut().zip(&other.power_sums) {
            *sum += other;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.count += other.count;
    }

    /// Returns `E[v^k]` for `k` in `0..=num_moments`.
    pub fn raw_moments(&self) -> Vec<f64> {
        let count = self.count as f64;
        self.power_sums.iter().map(|sum| sum / count).collect()
    }

    /// Forgets every accumulated value.
    pub fn clear(&mut self) {
        self.power_sums.iter_mut().for_each(|sum| *sum = 0.0);
        self.min = f64::INFINITY;
        self.max = f64::NEG_INFINITY;
        self.count = 0;
    }
}
