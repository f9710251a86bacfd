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

use tracing::debug;
use tracing::trace;

use super::builder::DDSketchBuilder;
use super::mapping::IndexMapping;
use super::mapping::MappingKind;
use super::policy::BucketPolicy;
use super::serialization::BUCKET_SIZE_BYTES;
use super::serialization::FLAG_EMPTY;
use super::serialization::FLAG_NEGATIVE_VALUES;
use super::serialization::PREAMBLE_LONGS_EMPTY;
use super::serialization::PREAMBLE_LONGS_NON_EMPTY;
use super::serialization::SERIAL_VERSION;
use super::storage::Storage;
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

/// Where a value is counted.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Zero,
    Positive(i32),
    Negative(i32),
}

/// DDSketch for estimating quantiles with a relative-error guarantee.
///
/// See the [ddsketch module level documentation](crate::ddsketch) for more.
#[derive(Debug, Clone, PartialEq)]
pub struct DDSketch {
    mapping: IndexMapping,
    policy: BucketPolicy,
    negative_values: bool,
    positive: Storage,
    negative: Storage,
    zero_count: u64,
}

impl DDSketch {
    /// Creates a sketch with the given relative accuracy and default settings: logarithmic
    /// mapping, unlimited buckets and negative values accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ConfigInvalid`](crate::error::ErrorKind::ConfigInvalid) if
    /// `relative_accuracy` is not in `(0, 1)`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use quantileflow::ddsketch::DDSketch;
    /// let mut sketch = DDSketch::new(0.01).unwrap();
    /// sketch.insert(42.0).unwrap();
    /// assert_eq!(sketch.count(), 1);
    /// ```
    pub fn new(relative_accuracy: f64) -> Result<Self, Error> {
        Self::builder().relative_accuracy(relative_accuracy).build()
    }

    /// Returns a builder to configure a sketch.
    pub fn builder() -> DDSketchBuilder {
        DDSketchBuilder::default()
    }

    pub(super) fn make(mapping: IndexMapping, policy: BucketPolicy, negative_values: bool) -> Self {
        Self {
            mapping,
            policy,
            negative_values,
            positive: policy.new_storage(),
            negative: policy.new_storage(),
            zero_count: 0,
        }
    }

    /// Returns the configured relative accuracy.
    pub fn relative_accuracy(&self) -> f64 {
        self.mapping.relative_accuracy()
    }

    /// Returns the mapping scheme.
    pub fn mapping_kind(&self) -> MappingKind {
        self.mapping.kind()
    }

    /// Returns the index mapping.
    pub fn mapping(&self) -> &IndexMapping {
        &self.mapping
    }

    /// Returns the bucket policy.
    pub fn bucket_policy(&self) -> BucketPolicy {
        self.policy
    }

    /// Returns true if negative values are accepted.
    pub fn negative_values(&self) -> bool {
        self.negative_values
    }

    /// Returns the number of counted values.
    pub fn count(&self) -> u64 {
        self.positive.total_count() + self.negative.total_count() + self.zero_count
    }

    /// Returns the number of values counted as zero.
    pub fn zero_count(&self) -> u64 {
        self.zero_count
    }

    /// Returns true if the sketch has not counted any value.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Returns the store of positive values.
    pub fn positive_store(&self) -> &Storage {
        &self.positive
    }

    /// Returns the store of negative values, keyed on their magnitude.
    pub fn negative_store(&self) -> &Storage {
        &self.negative
    }

    /// Returns the number of buckets held in memory by both stores.
    pub fn storage_footprint(&self) -> usize {
        self.positive.footprint() + self.negative.footprint()
    }

    /// Counts a value.
    ///
    /// Zero and magnitudes below [`IndexMapping::min_indexable_value`] are counted as zero.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ValueOutOfDomain`](crate::error::ErrorKind::ValueOutOfDomain),
    /// leaving the sketch unchanged, if the value is not finite, is negative while negative
    /// values are disabled, or its magnitude exceeds [`IndexMapping::max_indexable_value`].
    pub fn insert(&mut self, value: f64) -> Result<(), Error> {
        let slot = self.locate(value)?;
        if let Some(budget) = self.dynamic_budget(self.count() + 1) {
            self.apply_budget(budget);
        }
        self.add_to(slot, 1);
        Ok(())
    }

    /// Counts every value of a batch.
    ///
    /// Values that cannot be counted are skipped and reported in the returned outcome. Under the
    /// dynamic policy the bucket budget is checked once, after the whole batch.
    pub fn insert_batch(&mut self, values: &[f64]) -> BatchOutcome {
        if let Some(budget) = self.dynamic_budget(self.count() + values.len() as u64) {
            self.apply_budget(budget);
        }

        let mut outcome = BatchOutcome::default();
        for (position, value) in values.iter().enumerate() {
            let result = self.locate(*value).map(|slot| self.add_to(slot, 1));
            outcome.record(position, *value, result);
        }

        if let Some(budget) = self.dynamic_budget(self.count()) {
            self.apply_budget(budget);
        }
        if !outcome.is_complete() {
            trace!(
                inserted = outcome.inserted(),
                rejected = outcome.rejected().len(),
                "ddsketch batch insert skipped values"
            );
        }
        outcome
    }

    /// Removes one occurrence of a value from the bucket it maps to.
    ///
    /// Returns `false`, leaving the sketch unchanged, if that bucket is empty.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ValueOutOfDomain`](crate::error::ErrorKind::ValueOutOfDomain) for
    /// values [`insert`](Self::insert) would reject.
    pub fn delete(&mut self, value: f64) -> Result<bool, Error> {
        let removed = match self.locate(value)? {
            Slot::Zero if self.zero_count > 0 => {
                self.zero_count -= 1;
                true
            }
            Slot::Zero => false,
            Slot::Positive(index) => self.positive.remove(index),
            Slot::Negative(index) => self.negative.remove(index),
        };
        if !removed {
            debug!(value, "ddsketch delete found no value in the target bucket");
        }
        Ok(removed)
    }

    /// Returns the approximate value at the given normalized rank.
    ///
    /// The returned value is within the relative accuracy of the value of rank
    /// `round(rank * (count - 1))` among the counted values.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidArgument`](crate::error::ErrorKind::InvalidArgument) if `rank`
    /// is not in `[0, 1]` and [`ErrorKind::EmptySketch`](crate::error::ErrorKind::EmptySketch)
    /// if the sketch is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// # use quantileflow::ddsketch::DDSketch;
    /// let mut sketch = DDSketch::new(0.01).unwrap();
    /// for i in 1..=100 {
    ///     sketch.insert(i as f64).unwrap();
    /// }
    /// let median = sketch.quantile(0.5).unwrap();
    /// assert!((49.0..=51.0).contains(&median));
    /// ```
    pub fn quantile(&self, rank: f64) -> Result<f64, Error> {
        check_rank(rank)?;
        let count = self.count();
        if count == 0 {
            return Err(Error::empty_sketch());
        }

        let target = (rank * (count - 1) as f64).round() as u64;
        let negative_count = self.negative.total_count();
        if target < negative_count {
            // the negative store is ordered by magnitude, so walk it from the far end
            let index = self
                .negative
                .key_at_rank(negative_count - 1 - target)
                .ok_or_else(Error::empty_sketch)?;
            return Ok(-self.mapping.value(index));
        }

        let target = target - negative_count;
        if target < self.zero_count {
            return Ok(0.0);
        }

        let index = self
            .positive
            .key_at_rank(target - self.zero_count)
            .ok_or_else(Error::empty_sketch)?;
        Ok(self.mapping.value(index))
    }

    /// Returns the approximate smallest counted value.
    pub fn min_value(&self) -> Result<f64, Error> {
        self.quantile(0.0)
    }

    /// Returns the approximate largest counted value.
    pub fn max_value(&self) -> Result<f64, Error> {
        self.quantile(1.0)
    }

    /// Merges another sketch into this one.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IncompatibleMerge`](crate::error::ErrorKind::IncompatibleMerge),
    /// leaving this sketch unchanged, unless both sketches share the same mapping scheme,
    /// relative accuracy, bucket policy and negative value setting.
    pub fn merge(&mut self, other: &DDSketch) -> Result<(), Error> {
        self.check_compatible(other)?;
        if other.is_empty() {
            return Ok(());
        }

        if let Some(budget) = self.dynamic_budget(self.count() + other.count()) {
            self.apply_budget(budget);
        }
        let collapsed =
            self.positive.merge(&other.positive) + self.negative.merge(&other.negative);
        self.zero_count += other.zero_count;
        self.log_collapse(collapsed);
        Ok(())
    }

    /// Returns quartiles and bucket-approximated moments of the counted values.
    ///
    /// Mean, variance, skewness and kurtosis are computed from the representative value of each
    /// bucket, so they carry the relative error of the mapping.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::EmptySketch`](crate::error::ErrorKind::EmptySketch) if the sketch is
    /// empty.
    pub fn summary_statistics(&self) -> Result<SummaryStatistics, Error> {
        if self.is_empty() {
            return Err(Error::empty_sketch());
        }

        let count = self.count() as f64;
        let mut raw = [0.0; 5];
        let mut accumulate = |value: f64, weight: u64| {
            let weight = weight as f64 / count;
            let mut power = 1.0;
            for moment in raw.iter_mut().skip(1) {
                power *= value;
                *moment += weight * power;
            }
        };
        for (index, weight) in self.positive.iter() {
            accumulate(self.mapping.value(index), weight);
        }
        for (index, weight) in self.negative.iter() {
            accumulate(-self.mapping.value(index), weight);
        }
        let shape = Shape::from_raw_moments(&raw);

        Ok(SummaryStatistics {
            count: self.count(),
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
        self.positive = self.policy.new_storage();
        self.negative = self.policy.new_storage();
        self.zero_count = 0;
    }

    fn locate(&self, value: f64) -> Result<Slot, Error> {
        if !value.is_finite() {
            return Err(Error::out_of_domain(value, "value must be finite"));
        }
        if value < 0.0 && !self.negative_values {
            return Err(Error::out_of_domain(
                value,
                "negative values are disabled for this sketch",
            ));
        }

        let magnitude = value.abs();
        if magnitude < self.mapping.min_indexable_value() {
            return Ok(Slot::Zero);
        }
        if magnitude > self.mapping.max_indexable_value() {
            return Err(Error::out_of_domain(
                value,
                format!(
                    "magnitude exceeds the largest indexable value {}",
                    self.mapping.max_indexable_value()
                ),
            ));
        }

        let index = self.mapping.index(magnitude);
        Ok(if value > 0.0 {
            Slot::Positive(index)
        } else {
            Slot::Negative(index)
        })
    }

    fn add_to(&mut self, slot: Slot, count: u64) {
        let collapsed = match slot {
            Slot::Zero => {
                self.zero_count += count;
                0
            }
            Slot::Positive(index) => self.positive.add_count(index, count),
            Slot::Negative(index) => self.negative.add_count(index, count),
        };
        self.log_collapse(collapsed);
    }

    fn dynamic_budget(&self, count: u64) -> Option<usize> {
        match self.policy {
            BucketPolicy::Dynamic => Some(BucketPolicy::dynamic_limit(count)),
            _ => None,
        }
    }

    fn apply_budget(&mut self, budget: usize) {
        let collapsed =
            self.positive.set_max_buckets(budget) + self.negative.set_max_buckets(budget);
        self.log_collapse(collapsed);
    }

    fn log_collapse(&self, collapsed: usize) {
        if collapsed > 0 {
            debug!(
                collapsed,
                footprint = self.storage_footprint(),
                policy = ?self.policy,
                "ddsketch collapsed buckets to stay within budget"
            );
        }
    }

    fn check_compatible(&self, other: &DDSketch) -> Result<(), Error> {
        if self.mapping.kind() != other.mapping.kind() {
            return Err(Error::incompatible_merge("mapping schemes differ")
                .with_context("self", format!("{:?}", self.mapping.kind()))
                .with_context("other", format!("{:?}", other.mapping.kind())));
        }
        if self.mapping.relative_accuracy() != other.mapping.relative_accuracy() {
            return Err(Error::incompatible_merge("relative accuracies differ")
                .with_context("self", self.mapping.relative_accuracy())
                .with_context("other", other.mapping.relative_accuracy()));
        }
        if self.policy != other.policy {
            return Err(Error::incompatible_merge("bucket policies differ")
                .with_context("self", format!("{:?}", self.policy))
                .with_context("other", format!("{:?}", other.policy)));
        }
        if self.negative_values != other.negative_values {
            return Err(Error::incompatible_merge("negative value settings differ"));
        }
        Ok(())
    }
}

// Serialization
impl DDSketch {
    /// Serializes the sketch to bytes.
    ///
    /// Only the configuration and the bucket counts are written.
    pub fn serialize(&self) -> Vec<u8> {
        let is_empty = self.is_empty();
        let num_buckets = self.positive.iter().count() + self.negative.iter().count();
        let size = 8 * PREAMBLE_LONGS_NON_EMPTY as usize + 8 + num_buckets * BUCKET_SIZE_BYTES;
        let mut bytes = SketchBytes::with_capacity(size);

        let flags = (if is_empty { FLAG_EMPTY } else { 0 })
            | (if self.negative_values {
                FLAG_NEGATIVE_VALUES
            } else {
                0
            });
        let max_buckets = match self.policy {
            BucketPolicy::Fixed { max_buckets } => u32::try_from(max_buckets).unwrap_or(u32::MAX),
            _ => 0,
        };

        bytes.write_u8(if is_empty {
            PREAMBLE_LONGS_EMPTY
        } else {
            PREAMBLE_LONGS_NON_EMPTY
        });
        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u8(Family::DDSKETCH.id);
        bytes.write_u8(flags);
        bytes.write_u8(self.mapping.kind().id());
        bytes.write_u8(self.policy.id());
        bytes.write_u16_le(0);
        bytes.write_f64_le(self.mapping.relative_accuracy());
        bytes.write_u32_le(max_buckets);
        bytes.write_u32_le(0);

        if is_empty {
            return bytes.into_bytes();
        }

        bytes.write_u64_le(self.zero_count);
        for store in [&self.positive, &self.negative] {
            bytes.write_u32_le(store.iter().count() as u32);
            for (index, count) in store.iter() {
                bytes.write_i32_le(index);
                bytes.write_u64_le(count);
            }
        }
        bytes.into_bytes()
    }

    /// Deserializes a sketch from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::MalformedDeserializeData`](crate::error::ErrorKind::MalformedDeserializeData)
    /// if the bytes are truncated or inconsistent, and
    /// [`ErrorKind::ConfigInvalid`](crate::error::ErrorKind::ConfigInvalid) if the encoded
    /// configuration is invalid.
    pub fn deserialize(bytes: &[u8]) -> Result<DDSketch, Error> {
        let mut cursor = SketchSlice::new(bytes);

        let preamble_longs = cursor
            .read_u8()
            .map_err(insufficient_data("preamble_longs"))?;
        let serial_version = cursor
            .read_u8()
            .map_err(insufficient_data("serial_version"))?;
        let family_id = cursor.read_u8().map_err(insufficient_data("family_id"))?;
        let flags = cursor.read_u8().map_err(insufficient_data("flags"))?;
        let mapping_id = cursor.read_u8().map_err(insufficient_data("mapping"))?;
        let policy_id = cursor.read_u8().map_err(insufficient_data("policy"))?;
        let _unused = cursor.read_u16_le().map_err(insufficient_data("unused"))?;
        let relative_accuracy = cursor
            .read_f64_le()
            .map_err(insufficient_data("relative_accuracy"))?;
        let max_buckets = cursor
            .read_u32_le()
            .map_err(insufficient_data("max_buckets"))?;
        let _unused = cursor.read_u32_le().map_err(insufficient_data("unused"))?;

        Family::DDSKETCH.validate_id(family_id)?;
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

        let mapping = MappingKind::from_id(mapping_id)
            .ok_or_else(|| Error::deserial(format!("unknown mapping id: {mapping_id}")))?;
        let policy = BucketPolicy::from_parts(policy_id, max_buckets)
            .ok_or_else(|| Error::deserial(format!("unknown bucket policy id: {policy_id}")))?;
        let mut sketch = DDSketch::builder()
            .relative_accuracy(relative_accuracy)
            .mapping(mapping)
            .bucket_policy(policy)
            .negative_values((flags & FLAG_NEGATIVE_VALUES) != 0)
            .build()?;

        if is_empty {
            ensure_fully_consumed(cursor.remaining())?;
            return Ok(sketch);
        }

        sketch.zero_count = cursor
            .read_u64_le()
            .map_err(insufficient_data("zero_count"))?;
        let positive = sketch.read_buckets(&mut cursor, "positive buckets")?;
        let negative = sketch.read_buckets(&mut cursor, "negative buckets")?;
        ensure_fully_consumed(cursor.remaining())?;

        if !negative.is_empty() && !sketch.negative_values {
            return Err(Error::deserial(
                "negative buckets present while negative values are disabled",
            ));
        }
        let total = positive
            .iter()
            .chain(negative.iter())
            .try_fold(sketch.zero_count, |total, (_, count)| {
                total.checked_add(*count)
            })
            .ok_or_else(|| Error::deserial("total count overflows u64"))?;
        if total == 0 {
            return Err(Error::deserial("non-empty sketch holds no values"));
        }

        if let Some(budget) = sketch.dynamic_budget(total) {
            sketch.apply_budget(budget);
        }
        for (index, count) in positive {
            sketch.add_to(Slot::Positive(index), count);
        }
        for (index, count) in negative {
            sketch.add_to(Slot::Negative(index), count);
        }
        Ok(sketch)
    }

    fn read_buckets(
        &self,
        cursor: &mut SketchSlice<'_>,
        tag: &'static str,
    ) -> Result<Vec<(i32, u64)>, Error> {
        let num_buckets = cursor.read_u32_le().map_err(insufficient_data(tag))? as usize;
        if num_buckets > cursor.remaining() / BUCKET_SIZE_BYTES {
            return Err(Error::insufficient_data(tag));
        }

        let lowest = self.mapping.index(self.mapping.min_indexable_value());
        let highest = self.mapping.index(self.mapping.max_indexable_value());
        let mut buckets = Vec::with_capacity(num_buckets);
        let mut previous = None;
        for _ in 0..num_buckets {
            let index = cursor.read_i32_le().map_err(insufficient_data(tag))?;
            let count = cursor.read_u64_le().map_err(insufficient_data(tag))?;
            if count == 0 {
                return Err(Error::deserial(format!("empty bucket {index} in {tag}")));
            }
            if !(lowest..=highest).contains(&index) {
                return Err(Error::deserial(format!(
                    "bucket index {index} in {tag} is outside [{lowest}, {highest}]"
                )));
            }
            if previous.is_some_and(|previous| index <= previous) {
                return Err(Error::deserial(format!(
                    "bucket indices in {tag} must be strictly ascending"
                )));
            }
            previous = Some(index);
            buckets.push((index, count));
        }
        Ok(buckets)
    }
}
