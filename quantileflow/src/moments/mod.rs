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

//! Moment-based quantile sketch.
//!
//! A MomentSketch keeps only the power sums `sum(v^k)` of the values it counts, together with
//! their minimum and maximum. Inserting and merging are a handful of additions, and the sketch
//! has a constant size. Quantiles are answered by reconstructing the maximum-entropy
//! distribution that matches the moments: the domain is rescaled to `[-1, 1]`, the power sums are
//! turned into Chebyshev moments, and Newton's method solves for the density, which is then
//! integrated into a CDF. The reconstruction is cached until the next mutation.
//!
//! Mean, variance, skewness and kurtosis follow exactly from the power sums. A sketch created
//! with [`MomentSketch::with_compression`] accumulates `asinh(v)`, which copes with heavy tails.
//!
//! If the solver hits its iteration cap, queries still answer with a best-effort estimate, and
//! the degradation is visible through [`Estimate`], [`MomentSketch::last_convergence`] and
//! [`SummaryStatistics::degraded`](crate::common::SummaryStatistics::degraded).
//!
//! # Usage
//!
//! ```rust
//! # use quantileflow::moments::MomentSketch;
//! let mut sketch = MomentSketch::new(10).unwrap();
//! for i in 0..1000 {
//!     sketch.insert(i as f64).unwrap();
//! }
//! let estimate = sketch.estimate_quantile(0.5).unwrap();
//! assert!((estimate.value - 499.5).abs() < 25.0);
//! ```

mod accumulator;
mod serialization;
mod sketch;
mod solver;

pub use self::accumulator::MomentAccumulator;
pub use self::sketch::Estimate;
pub use self::sketch::MomentSketch;
pub use self::solver::Convergence;
pub use self::solver::DEFAULT_GRID_SIZE;
pub use self::solver::DEFAULT_MAX_ITERATIONS;
pub use self::solver::DEFAULT_TOLERANCE;
pub use self::solver::MaxEntSolver;

/// Default number of tracked moments.
pub const DEFAULT_NUM_MOMENTS: usize = 10;
/// Minimum number of tracked moments.
pub const MIN_NUM_MOMENTS: usize = 2;
/// Maximum number of tracked moments.
pub const MAX_NUM_MOMENTS: usize = 20;
