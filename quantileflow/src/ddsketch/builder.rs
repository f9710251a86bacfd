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

use super::DEFAULT_RELATIVE_ACCURACY;
use super::mapping::IndexMapping;
use super::mapping::MappingKind;
use super::policy::BucketPolicy;
use super::sketch::DDSketch;
use crate::error::Error;

/// Builder for creating [`DDSketch`] instances.
///
/// # Examples
///
/// ```
/// use quantileflow::ddsketch::BucketPolicy;
/// use quantileflow::ddsketch::DDSketch;
/// use quantileflow::ddsketch::MappingKind;
///
/// let sketch = DDSketch::builder()
///     .relative_accuracy(0.02)
///     .mapping(MappingKind::CubicInterpolation)
///     .bucket_policy(BucketPolicy::Fixed { max_buckets: 512 })
///     .negative_values(false)
///     .build()
///     .unwrap();
///
/// assert_eq!(sketch.relative_accuracy(), 0.02);
/// assert!(!sketch.negative_values());
/// ```
#[derive(Debug, Clone)]
pub struct DDSketchBuilder {
    relative_accuracy: f64,
    mapping: MappingKind,
    bucket_policy: BucketPolicy,
    negative_values: bool,
}

impl Default for DDSketchBuilder {
    fn default() -> Self {
        Self {
            relative_accuracy: DEFAULT_RELATIVE_ACCURACY,
            mapping: MappingKind::Logarithmic,
            bucket_policy: BucketPolicy::default(),
            negative_values: true,
        }
    }
}

impl DDSketchBuilder {
    /// Sets the relative accuracy, which must be in `(0, 1)`.
    pub fn relative_accuracy(mut self, relative_accuracy: f64) -> Self {
        self.relative_accuracy = relative_accuracy;
        self
    }

    /// Sets the value-to-bucket mapping scheme.
    pub fn mapping(mut self, mapping: MappingKind) -> Self {
        self.mapping = mapping;
        self
    }

    /// Sets how the number of buckets is bounded.
    pub fn bucket_policy(mut self, bucket_policy: BucketPolicy) -> Self {
        self.bucket_policy = bucket_policy;
        self
    }

    /// Sets whether negative values are accepted.
    ///
    /// When disabled, inserting a negative value fails with
    /// [`ErrorKind::ValueOutOfDomain`](crate::error::ErrorKind::ValueOutOfDomain).
    pub fn negative_values(mut self, negative_values: bool) -> Self {
        self.negative_values = negative_values;
        self
    }

    /// Builds the sketch.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ConfigInvalid`](crate::error::ErrorKind::ConfigInvalid) if the
    /// relative accuracy is not in `(0, 1)` or a fixed policy has no buckets.
    pub fn build(self) -> Result<DDSketch, Error> {
        let mapping = IndexMapping::new(self.mapping, self.relative_accuracy)?;
        self.bucket_policy.validate()?;
        Ok(DDSketch::make(
            mapping,
            self.bucket_policy,
            self.negative_values,
        ))
    }
}
