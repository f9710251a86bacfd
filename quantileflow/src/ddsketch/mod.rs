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

//! DDSketch implementation for estimating quantiles with a relative-error guarantee.
//!
//! DDSketch maps every value to a bucket whose boundaries grow geometrically by a factor
//! `gamma = (1 + accuracy) / (1 - accuracy)`, and keeps an exact count per bucket. Any quantile
//! it returns is within the configured relative accuracy of the true value of that rank.
//! Negative values are kept in a mirrored store keyed on their magnitude, and zero has an exact
//! counter of its own.
//!
//! Sketches built with the same configuration can be merged, and the result is the same as if
//! all values had been inserted into a single sketch.
//!
//! # Usage
//!
//! ```rust
//! # use quantileflow::ddsketch::DDSketch;
//! let mut a = DDSketch::new(0.01).unwrap();
//! let mut b = DDSketch::new(0.01).unwrap();
//! for i in 0..100 {
//!     a.insert(i as f64).unwrap();
//!     b.insert((i + 100) as f64).unwrap();
//! }
//! a.merge(&b).unwrap();
//! let p75 = a.quantile(0.75).unwrap();
//! assert!((p75 - 150.0).abs() <= 150.0 * 0.01);
//! ```
//!
//! # Bucket policies
//!
//! - [`BucketPolicy::Unlimited`] keeps every bucket in a sparse map.
//! - [`BucketPolicy::Fixed`] bounds the span of each store and collapses the extreme buckets,
//!   giving up accuracy in the tail with the fewest values.
//! - [`BucketPolicy::Dynamic`] grows the bound with the logarithm of the number of values.

mod builder;
mod mapping;
mod policy;
mod serialization;
mod sketch;
mod storage;

pub use self::builder::DDSketchBuilder;
pub use self::mapping::IndexMapping;
pub use self::mapping::MappingKind;
pub use self::policy::BucketPolicy;
pub use self::sketch::DDSketch;
pub use self::storage::ContiguousIter;
pub use self::storage::ContiguousStorage;
pub use self::storage::SparseStorage;
pub use self::storage::Storage;
pub use self::storage::StorageIter;

/// Default relative accuracy.
pub const DEFAULT_RELATIVE_ACCURACY: f64 = 0.01;
/// Default bucket budget for [`BucketPolicy::Fixed`].
pub const DEFAULT_MAX_BUCKETS: usize = 2048;
/// Smallest bucket budget of [`BucketPolicy::Dynamic`].
pub const DYNAMIC_MIN_BUCKETS: usize = 32;
