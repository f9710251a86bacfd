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

//! Mergeable streaming quantile sketches.
//!
//! This crate provides three sketches that summarize a stream of numeric values in bounded
//! memory and answer approximate quantile queries:
//!
//! - [`ddsketch::DDSketch`] guarantees a relative error on every quantile.
//! - [`moments::MomentSketch`] keeps a constant number of power sums and reconstructs the
//!   distribution with a maximum-entropy solver.
//! - [`hdr::HdrHistogram`] counts values in fixed logarithmic buckets over a known range.
//!
//! Every sketch supports `insert`, `insert_batch`, `quantile`, `merge`,
//! `summary_statistics`, `serialize` and `deserialize`. Sketches are single-writer: parallel
//! ingestion uses one sketch per worker and merges them afterwards.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod common;
pub mod ddsketch;
pub mod error;
pub mod hdr;
pub mod moments;

mod codec;
