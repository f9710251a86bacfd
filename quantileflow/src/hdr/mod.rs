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

//! Fixed-range histogram with logarithmic buckets.
//!
//! An HdrHistogram splits `[min_value, max_value]` into `num_buckets` buckets of equal width in
//! `log2` space, so every bucket spans the same ratio of values. Bucket boundaries are fixed at
//! construction, which makes inserting and merging simple array updates. Quantiles are
//! interpolated linearly inside the bucket holding the requested rank.
//!
//! Values outside the range are either rejected or clamped to the nearest boundary, as chosen
//! with [`OutOfRangePolicy`].
//!
//! # Usage
//!
//! ```rust
//! # use quantileflow::hdr::HdrHistogram;
//! let mut histogram = HdrHistogram::new(8, 1.0, 256.0).unwrap();
//! for exponent in 0..8 {
//!     histogram.insert(2f64.powi(exponent)).unwrap();
//! }
//! assert_eq!(histogram.quantile(0.5).unwrap(), 16.0);
//! ```

mod serialization;
mod sketch;

pub use self::sketch::HdrHistogram;
pub use self::sketch::OutOfRangePolicy;

/// Largest supported number of buckets.
pub const MAX_NUM_BUCKETS: usize = 1 << 20;
