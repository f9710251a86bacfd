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

//! Binary layout constants for HdrHistogram.
//!
//! ```text
//! long 0: preamble_longs u8 | serial_version u8 | family_id u8 | flags u8 | num_buckets u32
//! long 1: min_value f64
//! long 2: max_value f64
//! long 3: total_count u64                     (non-empty only)
//! then (non-empty only): num_buckets x count u64
//! ```

use crate::codec::family::Family;

/// Serialization version.
pub const SERIAL_VERSION: u8 = 1;

/// Preamble longs of an empty histogram.
pub const PREAMBLE_LONGS_EMPTY: u8 = Family::HDR_HISTOGRAM.min_pre_longs;
/// Preamble longs of a histogram holding values.
pub const PREAMBLE_LONGS_NON_EMPTY: u8 = Family::HDR_HISTOGRAM.max_pre_longs;

/// Flag indicating the histogram is empty.
pub const FLAG_EMPTY: u8 = 1 << 0;
/// Flag indicating out-of-range values are clamped.
pub const FLAG_CLAMP: u8 = 1 << 1;
