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
use tracing::warn;

use super::MAX_NUM_MOMENTS;
use super::MIN_NUM_MOMENTS;
use super::accumulator::MomentAccumulator;
use super::serialization::FLAG_COMPRESSED;
use super::serialization::FLAG_EMPTY;
use super::serialization::PREAMBLE_LONGS_EMPTY;
use super::serialization::PREAMBLE_LONGS_NON_EMPTY;
use super::serialization::SERIAL_VERSION;
use super::solver::Convergence;
use super::solver::MaxEntSolver;
use super::solver::chebyshev_moments;
use super::solver::valid_prefix;
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

/// A quantile estimate together with the state of the solve that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    /// The estimated value.
    pub value: f64,
    /// Whether the maximum-entropy solve converged.
    pub convergence: Convergence,
}

impl Estimate {
    /// Returns true if the estimate comes from a solve that did not converge.
    pub fn is_degraded(&self) -> bool {
        !self.convergence.is_converged()
    }

    /// Returns the value, or [`ErrorKind::NonConvergence`](crate::error::ErrorKind::NonConvergence)
    /// if the solve did not converge.
    pub fn into_result(self) -> Result<f64, Error> {
        match self.convergence {
            Convergence::Converged { .. } => Ok(self.value),
            Convergence::NotConverged {
                iterations,
                gradient_norm,
            } => Err(Error::non_convergence(iterations, gradient_norm)
                .with_context("estimate", self.value)),
        }
    }
}

/// Density reconstructed from the moments, in the accumulated domain.
#[derive(Debug, Clone)]
struct Reconstruction {
    center: f64,
    radius: f64,
    grid: Vec<f64>,
    mass: Vec<f64>,
    cdf: Vec<f64>,
    convergence: Convergence,
}

impl Reconstruction {
    fn point(value: f64) -> Self {
        Self {
            center: value,
            radius: 0.0,
            grid: vec![-1.0, 1.0],
            mass: vec![0.5, 0.5],
            cdf: vec![0.0, 1.0],
            convergence: Convergence::Converged { iterations: 0 },
        }
    }

    fn quantile(&self, rank: f64) -> f64 {
        let last = self.cdf.len() - 1;
        let i = self.cdf.partition_point(|c| *c < rank);
        let y = if i == 0 {
            self.grid[0]
        } else if i > last {
            self.grid[last]
        } else {
            let (lo, hi) = (self.cdf[i - 1], self.cdf[i]);
            let fraction = if hi > lo { (rank - lo) / (hi - lo) } else { 0.0 };
            self.grid[i - 1] + fraction * (self.grid[i] - self.grid[i - 1])
        };
        self.center + self.radius * y
    }

    fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.grid
            .iter()
            .zip(&self.mass)
            .map(|(y, mass)| (self.center + self.radius * y, *mass))
    }
}

/// Moment-based quantile sketch with maximum-entropy reconstruction.
///
/// See the [moments module level documentation](crate::moments) for more.
#[derive(Debug, Clone)]
pub struct MomentSketch {
    accumulator: MomentAccumulator,
    max_value: Option<f64>,
    solver: MaxEntSolver,
    cache: Option<Reconstruction>,
    dirty: bool,
}

impl MomentSketch {
    /// Creates a sketch tracking power sums up to order `num_moments`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ConfigInvalid`](crate::error::ErrorKind::ConfigInvalid) if
    /// `num_moments` is not in `[MIN_NUM_MOMENTS, MAX_NUM_MOMENTS]`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use quantileflow::moments::MomentSketch;
    /// let mut sketch = MomentSketch::new(10).unwrap();
    /// for i in 0..1000 {
    ///     sketch.insert(i as f64).unwrap();
    /// }
    /// let stats = sketch.summary_statistics().unwrap();
    /// assert_eq!(stats.mean, Some(499.5));
    /// ```
    pub fn new(num_moments: usize) -> Result<Self, Error> {
        Self::make(num_moments, None)
    }

    /// Creates a sketch that accumulates `asinh(v)` instead of `v`.
    ///
    /// The transform widens the dynamic range the moments can describe at the cost of precision
    /// in the tails. Values with a magnitude above `max_value` are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ConfigInvalid`](crate::error::ErrorKind::ConfigInvalid) if
    /// `num_moments` is out of range or `max_value` is not a positive finite number.
    pub fn with_compression(num_moments: usize, max_value: f64) -> Result<Self, Error> {
        if !(max_value.is_finite() && max_value > 0.0) {
            return Err(Error::config_invalid(format!(
                "max_value must be positive and finite, got {max_value}"
            )));
        }
        Self::make(num_moments, Some(max_value))
    }

    fn make(num_moments: usize, max_value: Option<f64>) -> Result<Self, Error> {
        if !(MIN_NUM_MOMENTS..=MAX_NUM_MOMENTS).contains(&num_moments) {
            return Err(Error::config_invalid(format!(
                "num_moments must be in [{MIN_NUM_MOMENTS}, {MAX_NUM_MOMENTS}], got {num_moments}"
            )));
        }
        Ok(Self {
            accumulator: MomentAccumulator::new(num_moments, max_value.is_some()),
            max_value,
            solver: MaxEntSolver::default(),
            cache: None,
            dirty: true,
        })
    }

    /// Replaces the solver used to reconstruct the distribution.
    pub fn with_solver(mut self, solver: MaxEntSolver) -> Self {
        self.solver = solver;
        self.dirty = true;
        self
    }

    /// Returns the highest tracked moment order.
    pub fn num_moments(&self) -> usize {
        self.accumulator.num_moments()
    }

    /// Returns true if values are compressed with `asinh`.
    pub fn is_compressed(&self) -> bool {
        self.accumulator.is_compressed()
    }

    /// Returns the largest accepted magnitude of a compressed sketch.
    pub fn max_value(&self) -> Option<f64> {
        self.max_value
    }

    /// Returns the solver used to reconstruct the distribution.
    pub fn solver(&self) -> &MaxEntSolver {
        &self.solver
    }

    /// Returns the power sums, of `asinh(v)` for a compressed sketch.
    pub fn power_sums(&self) -> &[f64] {
        self.accumulator.power_sums()
    }

    /// Returns the number of counted values.
    pub fn count(&self) -> u64 {
        self.accumulator.count()
    }

    /// Returns true if the sketch has not counted any value.
    pub fn is_empty(&self) -> bool {
        self.accumulator.is_empty()
    }

    /// Returns the exact smallest counted value.
    pub fn min(&self) -> Option<f64> {
        self.accumulator
            .min()
            .map(|min| self.accumulator.inverse_transform(min))
    }

    /// Returns the exact largest counted value.
    pub fn max(&self) -> Option<f64> {
        self.accumulator
            .max()
            .map(|max| self.accumulator.inverse_transform(max))
    }

    /// Returns the number of power sums held in memory.
    pub fn storage_footprint(&self) -> usize {
        self.accumulator.power_sums().len()
    }

    /// Returns the convergence of the most recent solve, if any.
    pub fn last_convergence(&self) -> Option<Convergence> {
        self.cache.as_ref().map(|cache| cache.convergence)
    }

    /// Counts a value.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ValueOutOfDomain`](crate::error::ErrorKind::ValueOutOfDomain),
    /// leaving the sketch unchanged, if the value is not finite, its magnitude exceeds the
    /// `max_value` of a compressed sketch, or its powers would overflow the power sums.
    pub fn insert(&mut self, value: f64) -> Result<(), Error> {
        self.check_value(value)?;
        self.accumulator.add(value);
        self.dirty = true;
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
                "moment sketch batch insert skipped values"
            );
        }
        outcome
    }

    /// Merges another sketch into this one.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IncompatibleMerge`](crate::error::ErrorKind::IncompatibleMerge),
    /// leaving this sketch unchanged, unless both sketches track the same number of moments with
    /// the same compression setting and their combined power sums stay finite.
    pub fn merge(&mut self, other: &MomentSketch) -> Result<(), Error> {
        if self.num_moments() != other.num_moments() {
            return Err(Error::incompatible_merge("numbers of moments differ")
                .with_context("self", self.num_moments())
                .with_context("other", other.num_moments()));
        }
        if self.is_compressed() != other.is_compressed() || self.max_value != other.max_value {
            return Err(Error::incompatible_merge("compression settings differ"));
        }
        if other.is_empty() {
            return Ok(());
        }
        if !self.accumulator.can_merge(&other.accumulator) {
            return Err(Error::incompatible_merge("combined power sums overflow f64"));
        }
        self.accumulator.merge(&other.accumulator);
        self.dirty = true;
        Ok(())
    }

    /// Returns the approximate value at the given normalized rank.
    ///
    /// When the solver does not converge the best-effort estimate is still returned, use
    /// [`estimate_quantile`](Self::estimate_quantile) to tell the two apart.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidArgument`](crate::error::ErrorKind::InvalidArgument) if `rank`
    /// is not in `[0, 1]` and [`ErrorKind::EmptySketch`](crate::error::ErrorKind::EmptySketch)
    /// if the sketch is empty.
    pub fn quantile(&mut self, rank: f64) -> Result<f64, Error> {
        self.estimate_quantile(rank).map(|estimate| estimate.value)
    }

    /// Returns the approximate value at the given normalized rank with its convergence state.
    ///
    /// The distribution is reconstructed on the first query after a mutation and cached.
    pub fn estimate_quantile(&mut self, rank: f64) -> Result<Estimate, Error> {
        check_rank(rank)?;
        let reconstruction = self.reconstruction()?;
        let value = reconstruction.quantile(rank);
        let convergence = reconstruction.convergence;
        Ok(Estimate {
            value: self.to_input_domain(value),
            convergence,
        })
    }

    /// Returns summary statistics of the counted values.
    ///
    /// For an uncompressed sketch, mean, variance, skewness and kurtosis are exact functions of
    /// the power sums. For a compressed sketch they are integrated from the reconstructed
    /// density. Quartiles always come from the reconstruction, and `degraded` is set when its
    /// solve did not converge.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::EmptySketch`](crate::error::ErrorKind::EmptySketch) if the sketch is
    /// empty.
    pub fn summary_statistics(&mut self) -> Result<SummaryStatistics, Error> {
        let compressed = self.is_compressed();
        let raw = self.accumulator.raw_moments();
        let reconstruction = self.reconstruction()?;
        let degraded = !reconstruction.convergence.is_converged();
        let (q1, median, q3) = (
            reconstruction.quantile(0.25),
            reconstruction.quantile(0.5),
            reconstruction.quantile(0.75),
        );

        let shape = if compressed {
            let mut moments = [1.0, 0.0, 0.0, 0.0, 0.0];
            for (x, mass) in reconstruction.points() {
                let value = x.sinh();
                let mut power = 1.0;
                for moment in moments.iter_mut().skip(1) {
                    power *= value;
                    *moment += mass * power;
                }
            }
            Shape::from_raw_moments(&moments)
        } else {
            Shape::from_raw_moments(&raw[..raw.len().min(5)])
        };

        Ok(SummaryStatistics {
            count: self.count(),
            min: self.min(),
            q1: Some(self.to_input_domain(q1)),
            median: Some(self.to_input_domain(median)),
            q3: Some(self.to_input_domain(q3)),
            max: self.max(),
            mean: Some(shape.mean),
            variance: Some(shape.variance),
            skewness: shape.skewness,
            kurtosis: shape.kurtosis,
            degraded,
        })
    }

    /// Removes every counted value, keeping the configuration.
    pub fn clear(&mut self) {
        self.accumulator.clear();
        self.cache = None;
        self.dirty = true;
    }

    fn check_value(&self, value: f64) -> Result<(), Error> {
        if !value.is_finite() {
            return Err(Error::out_of_domain(value, "value must be finite"));
        }
        if let Some(max_value) = self.max_value.filter(|max_value| value.abs() > *max_value) {
            return Err(Error::out_of_domain(
                value,
                format!("magnitude exceeds max_value {max_value}"),
            ));
        }
        if !self.accumulator.can_add(value) {
            return Err(Error::out_of_domain(
                value,
                format!(
                    "power {} of the value overflows the power sums",
                    self.num_moments()
                ),
            ));
        }
        Ok(())
    }

    fn to_input_domain(&self, value: f64) -> f64 {
        let value = self.accumulator.inverse_transform(value);
        let (Some(min), Some(max)) = (self.min(), self.max()) else {
            return value;
        };
        value.clamp(min, max)
    }

    fn reconstruction(&mut self) -> Result<&Reconstruction, Error> {
        let (Some(min), Some(max)) = (self.accumulator.min(), self.accumulator.max()) else {
            return Err(Error::empty_sketch());
        };
        if self.dirty || self.cache.is_none() {
            self.cache = Some(self.reconstruct(min, max));
            self.dirty = false;
        }
        self.cache.as_ref().ok_or_else(Error::empty_sketch)
    }

    fn reconstruct(&self, min: f64, max: f64) -> Reconstruction {
        let radius = max / 2.0 - min / 2.0;
        let center = min / 2.0 + max / 2.0;
        if radius <= 0.0 {
            return Reconstruction::point(min);
        }

        let moments = chebyshev_moments(&self.accumulator.raw_moments(), center, radius);
        let active = valid_prefix(&moments);
        if active < moments.len() {
            debug!(
                active,
                tracked = moments.len(),
                "dropped moments that lost precision"
            );
        }

        let solution = self.solver.solve(&moments[..active]);
        match solution.convergence {
            Convergence::Converged { iterations } => debug!(
                iterations,
                active_moments = active,
                "maximum-entropy solve converged"
            ),
            Convergence::NotConverged {
                iterations,
                gradient_norm,
            } => warn!(
                iterations,
                gradient_norm,
                active_moments = active,
                "maximum-entropy solve did not converge, using best-effort density"
            ),
        }

        Reconstruction {
            center,
            radius,
            grid: solution.grid,
            mass: solution.mass,
            cdf: solution.cdf,
            convergence: solution.convergence,
        }
    }
}

// Serialization
impl MomentSketch {
    /// Serializes the sketch to bytes.
    ///
    /// Only the configuration, extremes and power sums are written; the reconstruction is
    /// recomputed after deserialization.
    pub fn serialize(&self) -> Vec<u8> {
        let is_empty = self.is_empty();
        let size = 8 * PREAMBLE_LONGS_NON_EMPTY as usize + 8 * (self.storage_footprint() + 2);
        let mut bytes = SketchBytes::with_capacity(size);

        let flags = (if is_empty { FLAG_EMPTY } else { 0 })
            | (if self.is_compressed() {
                FLAG_COMPRESSED
            } else {
                0
            });
        bytes.write_u8(if is_empty {
            PREAMBLE_LONGS_EMPTY
        } else {
            PREAMBLE_LONGS_NON_EMPTY
        });
        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u8(Family::MOMENTS.id);
        bytes.write_u8(flags);
        bytes.write_u8(self.num_moments() as u8);
        bytes.write_u8(0);
        bytes.write_u16_le(0);
        bytes.write_f64_le(self.max_value.unwrap_or(0.0));

        let (Some(min), Some(max)) = (self.accumulator.min(), self.accumulator.max()) else {
            return bytes.into_bytes();
        };
        bytes.write_u64_le(self.count());
        bytes.write_f64_le(min);
        bytes.write_f64_le(max);
        for sum in self.power_sums() {
            bytes.write_f64_le(*sum);
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
    pub fn deserialize(bytes: &[u8]) -> Result<MomentSketch, Error> {
        let mut cursor = SketchSlice::new(bytes);

        let preamble_longs = cursor
            .read_u8()
            .map_err(insufficient_data("preamble_longs"))?;
        let serial_version = cursor
            .read_u8()
            .map_err(insufficient_data("serial_version"))?;
        let family_id = cursor.read_u8().map_err(insufficient_data("family_id"))?;
        let flags = cursor.read_u8().map_err(insufficient_data("flags"))?;
        let num_moments = cursor.read_u8().map_err(insufficient_data("num_moments"))?;
        let _unused = cursor.read_u8().map_err(insufficient_data("unused"))?;
        let _unused = cursor.read_u16_le().map_err(insufficient_data("unused"))?;
        let max_value = cursor.read_f64_le().map_err(insufficient_data("max_value"))?;

        Family::MOMENTS.validate_id(family_id)?;
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

        let mut sketch = if (flags & FLAG_COMPRESSED) != 0 {
            MomentSketch::with_compression(num_moments as usize, max_value)?
        } else {
            MomentSketch::new(num_moments as usize)?
        };
        if is_empty {
            ensure_fully_consumed(cursor.remaining())?;
            return Ok(sketch);
        }

        let count = cursor.read_u64_le().map_err(insufficient_data("count"))?;
        let min = cursor.read_f64_le().map_err(insufficient_data("min"))?;
        let max = cursor.read_f64_le().map_err(insufficient_data("max"))?;
        let mut power_sums = Vec::with_capacity(num_moments as usize + 1);
        for _ in 0..=num_moments {
            let sum = cursor
                .read_f64_le()
                .map_err(insufficient_data("power_sums"))?;
            power_sums.push(sum);
        }
        ensure_fully_consumed(cursor.remaining())?;

        if count == 0 {
            return Err(Error::deserial("non-empty sketch holds no values"));
        }
        if !(min.is_finite() && max.is_finite() && min <= max) {
            return Err(Error::deserial(format!(
                "invalid extremes: min {min}, max {max}"
            )));
        }
        if power_sums[0] != count as f64 {
            return Err(Error::deserial(format!(
                "power sum of order 0 is {}, expected the count {count}",
                power_sums[0]
            )));
        }
        if power_sums.iter().any(|sum| !sum.is_finite()) {
            return Err(Error::deserial("power sums must be finite"));
        }

        sketch.accumulator =
            MomentAccumulator::from_parts(power_sums, min, max, count, sketch.is_compressed());
        Ok(sketch)
    }
}
