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

use tracing::trace;

use super::MAX_NUM_BUCKETS;
use super::serialization::FLAG_CLAMP;
use super::serialization::FLAG_EMPTY;
use super::serialization::PREAMBLE_LONGS_EMPTY;
use super::serialization::PREAMBLE_LONGS_NON_EMPTY;
use super::serialization::SERIAL_VERSION;
use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::codec::assert::ensure_fully_consumed;
use crate::codec::assert::ensure_preamble_longs_in;
use crate::codec::assert::ensure_serial_version_is;
use crate::codec::assert::insufficient_data;
use crate::codec::family::Family;
use crate::common::BatchOutcome;
use crate::common::Shape;
use crate::common::SummaryStatistics;
use crate::common::check_rank;
use crate::error::Error;

/// What an [`HdrHistogram`] does with values outside `[min_value, max_value]`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutOfRangePolicy {
    /// Fail with [`ErrorKind::ValueOutOfDomain`](crate::error::ErrorKind::ValueOutOfDomain).
    #[default]
    Reject,
    /// Count the value at the nearest boundary.
    Clamp,
}

/// Histogram over a fixed range with logarithmically spaced buckets.
///
/// See the [hdr module level documentation](crate::hdr) for more.
#[derive(Debug, Clone, PartialEq)]
pub struct HdrHistogram {
    counts: Vec<u64>,
    min_value: f64,
    max_value: f64,
    // log2(max_value) - log2(min_value), which stays finite when the ratio itself overflows
    log_ratio: f64,
    total_count: u64,
    policy: OutOfRangePolicy,
}

impl HdrHistogram {
    /// Creates a histogram that rejects out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ConfigInvalid`](crate::error::ErrorKind::ConfigInvalid) unless
    /// `num_buckets` is in `[1, MAX_NUM_BUCKETS]`, `min_value` is positive and `max_value` is
    /// finite and greater than `min_value`.
    pub fn new(num_buckets: usize, min_value: f64, max_value: f64) -> Result<Self, Error> {
        Self::with_policy(num_buckets, min_value, max_value, OutOfRangePolicy::Reject)
    }

    /// Creates a histogram with the given out-of-range policy.
    ///
    /// # Examples
    ///
    /// ```
    /// # use quantileflow::hdr::{HdrHistogram, OutOfRangePolicy};
    /// let mut histogram =
    ///     HdrHistogram::with_policy(10, 1.0, 1000.0, OutOfRangePolicy::Clamp).unwrap();
    /// histogram.insert(5000.0).unwrap();
    /// assert_eq!(histogram.bucket_count(9), Some(1));
    /// ```
    pub fn with_policy(
        num_buckets: usize,
        min_value: f64,
        max_value: f64,
        policy: OutOfRangePolicy,
    ) -> Result<Self, Error> {
        if !(1..=MAX_NUM_BUCKETS).contains(&num_buckets) {
            return Err(Error::config_invalid(format!(
                "num_buckets must be in [1, {MAX_NUM_BUCKETS}], got {num_buckets}"
            )));
        }
        if !(min_value.is_finite() && min_value > 0.0) {
            return Err(Error::config_invalid(format!(
                "min_value must be positive and finite, got {min_value}"
            )));
        }
        if !(max_value.is_finite() && max_value > min_value) {
            return Err(Error::config_invalid(format!(
                "max_value must be finite and greater than min_value {min_value}, got {max_value}"
            )));
        }

        Ok(Self {
            counts: vec![0; num_buckets],
            min_value,
            max_value,
            log_ratio: max_value.log2() - min_value.log2(),
            total_count: 0,
            policy,
        })
    }

    /// Returns the number of buckets.
    pub fn num_buckets(&self) -> usize {
        self.counts.len()
    }

    /// Returns the lower end of the range.
    pub fn min_value(&self) -> f64 {
        self.min_value
    }

    /// Returns the upper end of the range.
    pub fn max_value(&self) -> f64 {
        self.max_value
    }

    /// Returns the out-of-range policy.
    pub fn out_of_range_policy(&self) -> OutOfRangePolicy {
        self.policy
    }

    /// Returns the number of counted values.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Returns true if no value is counted.
    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }

    /// Returns the count of every bucket.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Returns the count of a bucket, or `None` if `index` is out of bounds.
    pub fn bucket_count(&self, index: usize) -> Option<u64> {
        self.counts.get(index).copied()
    }

    /// Returns the `[lower, upper)` value range of a bucket, or `None` if `index` is out of
    /// bounds. The last bucket also holds `max_value`.
    pub fn bucket_bounds(&self, index: usize) -> Option<(f64, f64)> {
        (index < self.counts.len()).then(|| (self.boundary(index), self.boundary(index + 1)))
    }

    /// Returns the number of buckets held in memory.
    pub fn storage_footprint(&self) -> usize {
        self.counts.len()
    }

    /// Counts a value.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ValueOutOfDomain`](crate::error::ErrorKind::ValueOutOfDomain),
    /// leaving the histogram unchanged, if the value is not finite, or lies outside the range
    /// under [`OutOfRangePolicy::Reject`].
    pub fn insert(&mut self, value: f64) -> Result<(), Error> {
        let index = self.bucket_index(value)?;
        self.counts[index] += 1;
        self.total_count += 1;
        Ok(())
    }

    /// Counts every value of a batch, reporting the values that were rejected.
    pub fn insert_batch(&mut self, values: &[f64]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for (position, value) in values.iter().enumerate() {
            outcome.record(position, *value, self.insert(*value));
        }
        if !outcome.is_complete() {
            trace!(
                inserted = outcome.inserted(),
                rejected = outcome.rejected().len(),
                "hdr histogram batch insert skipped values"
            );
        }
        outcome
    }

    /// Returns the approximate value at the given normalized rank.
    ///
    /// The bucket holding rank `rank * total_count` is located and the value is interpolated
    /// linearly by the position of that rank among the bucket's values. A rank of 1 returns the
    /// upper bound of the highest non-empty bucket.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidArgument`](crate::error::ErrorKind::InvalidArgument) if `rank`
    /// is not in `[0, 1]` and [`ErrorKind::EmptySketch`](crate::error::ErrorKind::EmptySketch)
    /// if the histogram is empty.
    pub fn quantile(&self, rank: f64) -> Result<f64, Error> {
        check_rank(rank)?;
        if self.is_empty() {
            return Err(Error::empty_sketch());
        }

        let target = rank * self.total_count as f64;
        let mut cumulative = 0u64;
        let mut last_non_empty = 0;
        for (index, count) in self.counts.iter().enumerate() {
            if *count == 0 {
                continue;
            }
            last_non_empty = index;
            let next = cumulative + count;
            if next as f64 > target {
                let (lower, upper) = (self.boundary(index), self.boundary(index + 1));
                let fraction = (target - cumulative as f64) / *count as f64;
                return Ok(lower + fraction * (upper - lower));
            }
            cumulative = next;
        }
        Ok(self.boundary(last_non_empty + 1))
    }

    /// Merges another histogram into this one.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IncompatibleMerge`](crate::error::ErrorKind::IncompatibleMerge),
    /// leaving this histogram unchanged, unless both have the same range and number of buckets.
    pub fn merge(&mut self, other: &HdrHistogram) -> Result<(), Error> {
        if self.counts.len() != other.counts.len()
            || self.min_value != other.min_value
            || self.max_value != other.max_value
        {
            return Err(Error::incompatible_merge("histogram layouts differ")
                .with_context(
                    "self",
                    format!(
                        "{} buckets over [{}, {}]",
                        self.counts.len(),
                        self.min_value,
                        self.max_value
                    ),
                )
                .with_context(
                    "other",
                    format!(
                        "{} buckets over [{}, {}]",
                        other.counts.len(),
                        other.min_value,
                        other.max_value
                    ),
                ));
        }

        for (count, other) in self.counts.iter_mut().zip(&other.counts) {
            *count += other;
        }
        self.total_count += other.total_count;
        Ok(())
    }

    /// Returns quartiles and bucket-approximated moments of the counted values.
    ///
    /// Moments weigh each bucket's midpoint by its count.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::EmptySketch`](crate::error::ErrorKind::EmptySketch) if the histogram
    /// is empty.
    pub fn summary_statistics(&self) -> Result<SummaryStatistics, Error> {
        if self.is_empty() {
            return Err(Error::empty_sketch());
        }

        let total = self.total_count as f64;
        let mut raw = [1.0, 0.0, 0.0, 0.0, 0.0];
        for (index, count) in self.counts.iter().enumerate() {
            if *count == 0 {
                continue;
            }
            let midpoint = (self.boundary(index) + self.boundary(index + 1)) / 2.0;
            let weight = *count as f64 / total;
            let mut power = 1.0;
            for moment in raw.iter_mut().skip(1) {
                power *= midpoint;
                *moment += weight * power;
            }
        }
        let shape = Shape::from_raw_moments(&raw);

        Ok(SummaryStatistics {
            count: self.total_count,
            min: Some(self.quantile(0.0)?),
            q1: Some(self.quantile(0.25)?),
            median: Some(self.quantile(0.5)?),
            q3: Some(self.quantile(0.75)?),
            max: Some(self.quantile(1.0)?),
            mean: Some(shape.mean),
            variance: Some(shape.variance),
            skewness: shape.skewness,
            kurtosis: shape.kurtosis,
            degraded: false,
        })
    }

    /// Removes every counted value, keeping the configuration.
    pub fn clear(&mut self) {
        self.counts.iter_mut().for_each(|count| *count = 0);
        self.total_count = 0;
    }

    fn bucket_index(&self, value: f64) -> Result<usize, Error> {
        if !value.is_finite() {
            return Err(Error::out_of_domain(value, "value must be finite"));
        }
        let value = if (self.min_value..=self.max_value).contains(&value) {
            value
        } else {
            match self.policy {
                OutOfRangePolicy::Reject => {
                    return Err(Error::out_of_domain(
                        value,
                        format!(
                            "value is outside [{}, {}]",
                            self.min_value, self.max_value
                        ),
                    ));
                }
                OutOfRangePolicy::Clamp => value.clamp(self.min_value, self.max_value),
            }
        };

        let num_buckets = self.counts.len();
        let position =
            (value.log2() - self.min_value.log2()) * num_buckets as f64 / self.log_ratio;
        Ok((position.floor().max(0.0) as usize).min(num_buckets - 1))
    }

    // Lower bound of bucket `index`, or the upper bound of bucket `index - 1`.
    fn boundary(&self, index: usize) -> f64 {
        let num_buckets = self.counts.len();
        if index == 0 {
            self.min_value
        } else if index >= num_buckets {
            self.max_value
        } else {
            let exponent = index as f64 * self.log_ratio / num_buckets as f64;
            (self.min_value.log2() + exponent).exp2()
        }
    }
}

// Serialization
impl HdrHistogram {
    /// Serializes the histogram to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let is_empty = self.is_empty();
        let size = 8 * PREAMBLE_LONGS_NON_EMPTY as usize + 8 * self.counts.len();
        let mut bytes = SketchBytes::with_capacity(size);

        let flags = (if is_empty { FLAG_EMPTY } else { 0 })
            | (match self.policy {
                OutOfRangePolicy::Reject => 0,
                OutOfRangePolicy::Clamp => FLAG_CLAMP,
            });
        bytes.write_u8(if is_empty {
            PREAMBLE_LONGS_EMPTY
        } else {
            PREAMBLE_LONGS_NON_EMPTY
        });
        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u8(Family::HDR_HISTOGRAM.id);
        bytes.write_u8(flags);
        bytes.write_u32_le(self.counts.len() as u32);
        bytes.write_f64_le(self.min_value);
        bytes.write_f64_le(self.max_value);

        if is_empty {
            return bytes.into_bytes();
        }
        bytes.write_u64_le(self.total_count);
        for count in &self.counts {
            bytes.write_u64_le(*count);
        }
        bytes.into_bytes()
    }

    /// Deserializes a histogram from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::MalformedDeserializeData`](crate::error::ErrorKind::MalformedDeserializeData)
    /// if the bytes are truncated or inconsistent, and
    /// [`ErrorKind::ConfigInvalid`](crate::error::ErrorKind::ConfigInvalid) if the encoded
    /// configuration is invalid.
    pub fn deserialize(bytes: &[u8]) -> Result<HdrHistogram, Error> {
        let mut cursor = SketchSlice::new(bytes);

        let preamble_longs = cursor
            .read_u8()
            .map_err(insufficient_data("preamble_longs"))?;
        let serial_version = cursor
            .read_u8()
            .map_err(insufficient_data("serial_version"))?;
        let family_id = cursor.read_u8().map_err(insufficient_data("family_id"))?;
        let flags = cursor.read_u8().map_err(insufficient_data("flags"))?;
        let num_buckets = cursor
            .read_u32_le()
            .map_err(insufficient_data("num_buckets"))?;
        let min_value = cursor.read_f64_le().map_err(insufficient_data("min_value"))?;
        let max_value = cursor.read_f64_le().map_err(insufficient_data("max_value"))?;

        Family::HDR_HISTOGRAM.validate_id(family_id)?;
        ensure_serial_version_is(SERIAL_VERSION, serial_version)?;
        let is_empty = (flags & FLAG_EMPTY) != 0;
        ensure_preamble_longs_in(
            &[if is_empty {
                PREAMBLE_LONGS_EMPTY
            } else {
                PREAMBLE_LONGS_NON_EMPTY
            }],
            preamble_longs,
        )?;

        let policy = if (flags & FLAG_CLAMP) != 0 {
            OutOfRangePolicy::Clamp
        } else {
            OutOfRangePolicy::Reject
        };
        let mut histogram =
            HdrHistogram::with_policy(num_buckets as usize, min_value, max_value, policy)?;
        if is_empty {
            ensure_fully_consumed(cursor.remaining())?;
            return Ok(histogram);
        }

        let total_count = cursor
            .read_u64_le()
            .map_err(insufficient_data("total_count"))?;
        let mut sum = 0u64;
        for count in histogram.counts.iter_mut() {
            *count = cursor.read_u64_le().map_err(insufficient_data("counts"))?;
            sum = sum
                .checked_add(*count)
                .ok_or_else(|| Error::deserial("bucket counts overflow u64"))?;
        }
        ensure_fully_consumed(cursor.remaining())?;

        if sum != total_count || total_count == 0 {
            return Err(Error::deserial(format!(
                "bucket counts sum to {sum}, expected a non-zero total of {total_count}"
            )));
        }
        histogram.total_count = total_count;
        Ok(histogram)
    }
}
