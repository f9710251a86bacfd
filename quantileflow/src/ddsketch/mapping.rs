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

use std::f64::consts::LN_2;

use crate::error::Error;

// Coefficients of the cubic `A*s^3 + B*s^2 + C*s` approximating `log2(1 + s)` on `[0, 1)`.
const CUBIC_A: f64 = 6.0 / 35.0;
const CUBIC_B: f64 = -3.0 / 5.0;
const CUBIC_C: f64 = 10.0 / 7.0;

const EXPONENT_MASK: u64 = 0x7ff0_0000_0000_0000;
const SIGNIFICAND_MASK: u64 = 0x000f_ffff_ffff_ffff;
const EXPONENT_BIAS: i64 = 1023;
const ONE_BITS: u64 = 0x3ff0_0000_0000_0000;

/// Floating-point allowance on top of the relative accuracy for the interpolating mappings.
const INTERPOLATION_SLACK: f64 = 1e-9;

/// The scheme used to turn a positive value into a bucket index.
///
/// All schemes guarantee that [`IndexMapping::value`] of the bucket a value lands in is within
/// the relative accuracy of that value. The interpolating schemes replace the logarithm with a
/// piecewise polynomial evaluated on the binary exponent and significand, which is cheaper to
/// compute. To keep the guarantee they use proportionally more buckets: about 44% more for
/// linear interpolation and 1% more for cubic interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingKind {
    /// Exact logarithm: `index = ceil(ln(v) / ln(gamma))`.
    Logarithmic,
    /// Linear interpolation of `log2` between powers of two.
    LinearInterpolation,
    /// Cubic interpolation of `log2` between powers of two.
    CubicInterpolation,
}

impl MappingKind {
    /// Ratio between the number of buckets used by this scheme and by the exact logarithm.
    ///
    /// This is `1 / min(d log2_approx(v) / d ln(v))` over an octave, which is the factor needed for
    /// consecutive bucket boundaries to stay within `gamma` of each other.
    fn correcting_factor(self) -> f64 {
        match self {
            MappingKind::Logarithmic => 1.0,
            MappingKind::LinearInterpolation => 1.0 / LN_2,
            MappingKind::CubicInterpolation => 1.0 / (CUBIC_C * LN_2),
        }
    }

    /// Extra relative error this scheme may show on top of the configured accuracy.
    ///
    /// The logarithmic mapping is exact up to floating-point rounding. The interpolating
    /// mappings invert their polynomial numerically, which is allowed an additional
    /// `1e-9 * relative_accuracy`.
    pub fn error_slack(self, relative_accuracy: f64) -> f64 {
        match self {
            MappingKind::Logarithmic => 0.0,
            MappingKind::LinearInterpolation | MappingKind::CubicInterpolation => {
                INTERPOLATION_SLACK * relative_accuracy
            }
        }
    }

    pub(crate) fn id(self) -> u8 {
        match self {
            MappingKind::Logarithmic => 0,
            MappingKind::LinearInterpolation => 1,
            MappingKind::CubicInterpolation => 2,
        }
    }

    pub(crate) fn from_id(id: u8) -> Option<MappingKind> {
        match id {
            0 => Some(MappingKind::Logarithmic),
            1 => Some(MappingKind::LinearInterpolation),
            2 => Some(MappingKind::CubicInterpolation),
            _ => None,
        }
    }
}

/// Bijection between positive values and bucket indices with a bounded relative error.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMapping {
    kind: MappingKind,
    relative_accuracy: f64,
    gamma: f64,
    // Index units per unit of `log2` (or of `ln` for the logarithmic kind).
    multiplier: f64,
    // `ln(2 / (1 + gamma))`, the midpoint correction of the logarithmic kind.
    log_midpoint: f64,
    min_indexable: f64,
    max_indexable: f64,
}

impl IndexMapping {
    /// Creates a mapping of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ConfigInvalid`](crate::error::ErrorKind::ConfigInvalid) if
    /// `relative_accuracy` is not in `(0, 1)`, or is so small that bucket indices would not fit
    /// in an `i32`.
    pub fn new(kind: MappingKind, relative_accuracy: f64) -> Result<Self, Error> {
        if !(relative_accuracy > 0.0 && relative_accuracy < 1.0) {
            return Err(Error::config_invalid(format!(
                "relative accuracy must be in (0, 1), got {relative_accuracy}"
            )));
        }

        let gamma = (1.0 + relative_accuracy) / (1.0 - relative_accuracy);
        let ln_gamma = (2.0 * relative_accuracy / (1.0 - relative_accuracy)).ln_1p();
        let multiplier = match kind {
            MappingKind::Logarithmic => 1.0 / ln_gamma,
            _ => kind.correcting_factor() * LN_2 / ln_gamma,
        };

        // log2 of any finite f64 lies in [-1075, 1024].
        let max_abs_index = 1075.0 * LN_2 * kind.correcting_factor() / ln_gamma + 1.0;
        if max_abs_index >= i32::MAX as f64 {
            return Err(Error::config_invalid(format!(
                "relative accuracy {relative_accuracy} is too small to index every f64"
            )));
        }

        Ok(Self {
            kind,
            relative_accuracy,
            gamma,
            multiplier,
            log_midpoint: (2.0 / (1.0 + gamma)).ln(),
            min_indexable: f64::MIN_POSITIVE * gamma,
            max_indexable: f64::MAX / gamma,
        })
    }

    /// Returns the mapping scheme.
    pub fn kind(&self) -> MappingKind {
        self.kind
    }

    /// Returns the configured relative accuracy.
    pub fn relative_accuracy(&self) -> f64 {
        self.relative_accuracy
    }

    /// Returns `gamma = (1 + accuracy) / (1 - accuracy)`.
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Returns the guaranteed bound on the relative error of [`value`](Self::value), including
    /// the slack of the interpolating schemes.
    pub fn relative_error_bound(&self) -> f64 {
        self.relative_accuracy + self.kind.error_slack(self.relative_accuracy)
    }

    /// Smallest value that gets its own bucket. Smaller magnitudes are counted as zero.
    pub fn min_indexable_value(&self) -> f64 {
        self.min_indexable
    }

    /// Largest value that can be indexed.
    pub fn max_indexable_value(&self) -> f64 {
        self.max_indexable
    }

    /// Returns the index of the bucket holding `value`.
    ///
    /// `value` must lie in `[min_indexable_value, max_indexable_value]`.
    pub fn index(&self, value: f64) -> i32 {
        debug_assert!(
            value >= self.min_indexable && value <= self.max_indexable,
            "value {value} is not indexable"
        );
        let scaled = match self.kind {
            MappingKind::Logarithmic => value.ln() * self.multiplier,
            MappingKind::LinearInterpolation => {
                let (exponent, significand) = split(value);
                (exponent + significand) * self.multiplier
            }
            MappingKind::CubicInterpolation => {
                let (exponent, s) = split(value);
                (exponent + ((CUBIC_A * s + CUBIC_B) * s + CUBIC_C) * s) * self.multiplier
            }
        };
        scaled.ceil() as i32
    }

    /// Returns the representative value of a bucket.
    ///
    /// This is the value with the smallest worst-case relative error against anything the bucket
    /// may hold.
    pub fn value(&self, index: i32) -> f64 {
        match self.kind {
            MappingKind::Logarithmic => (index as f64 / self.multiplier + self.log_midpoint).exp(),
            _ => {
                let lower = self.lower_bound(index);
                let upper = self.upper_bound(index);
                // harmonic mean, written so that it cannot overflow
                2.0 * lower / (1.0 + lower / upper)
            }
        }
    }

    /// Returns the exclusive lower boundary of a bucket.
    pub fn lower_bound(&self, index: i32) -> f64 {
        self.upper_bound(index - 1)
    }

    /// Returns the inclusive upper boundary of a bucket.
    pub fn upper_bound(&self, index: i32) -> f64 {
        let scaled = index as f64 / self.multiplier;
        match self.kind {
            MappingKind::Logarithmic => scaled.exp(),
            MappingKind::LinearInterpolation => {
                let exponent = scaled.floor();
                join(exponent, scaled - exponent)
            }
            MappingKind::CubicInterpolation => {
                let exponent = scaled.floor();
                join(exponent, cubic_inverse(scaled - exponent))
            }
        }
    }
}

/// Splits a normal positive value into its binary exponent and `significand - 1` in `[0, 1)`.
fn split(value: f64) -> (f64, f64) {
    let bits = value.to_bits();
    let exponent = ((bits & EXPONENT_MASK) >> 52) as i64 - EXPONENT_BIAS;
    let significand = f64::from_bits((bits & SIGNIFICAND_MASK) | ONE_BITS) - 1.0;
    (exponent as f64, significand)
}

/// Inverse of [`split`].
fn join(exponent: f64, significand: f64) -> f64 {
    (1.0 + significand) * 2f64.powi(exponent as i32)
}

/// Solves `A*s^3 + B*s^2 + C*s = x` for `s` in `[0, 1)` with Cardano's formula.
fn cubic_inverse(x: f64) -> f64 {
    let d0 = CUBIC_B * CUBIC_B - 3.0 * CUBIC_A * CUBIC_C;
    let d1 = 2.0 * CUBIC_B.powi(3) - 9.0 * CUBIC_A * CUBIC_B * CUBIC_C
        - 27.0 * CUBIC_A * CUBIC_A * x;
    let p = ((d1 - (d1 * d1 - 4.0 * d0.powi(3)).sqrt()) / 2.0).cbrt();
    -(CUBIC_B + p + d0 / p) / (3.0 * CUBIC_A)
}
