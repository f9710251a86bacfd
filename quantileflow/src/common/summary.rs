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

/// Summary of a distribution as estimated by a sketch.
///
/// Fields a sketch cannot estimate are `None`. `count` is always exact.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SummaryStatistics {
    /// Number of values the sketch has counted.
    pub count: u64,
    /// Estimated minimum.
    pub min: Option<f64>,
    /// Estimated first quartile.
    pub q1: Option<f64>,
    /// Estimated median.
    pub median: Option<f64>,
    /// Estimated third quartile.
    pub q3: Option<f64>,
    /// Estimated maximum.
    pub max: Option<f64>,
    /// Mean of the counted values.
    pub mean: Option<f64>,
    /// Population variance.
    pub variance: Option<f64>,
    /// Population skewness.
    pub skewness: Option<f64>,
    /// Population excess kurtosis (0 for a normal distribution).
    pub kurtosis: Option<f64>,
    /// True if some fields come from a best-effort estimate with degraded accuracy.
    pub degraded: bool,
}

/// Central moment statistics derived from the first four raw moments `E[x^k]`.
pub(crate) struct Shape {
    pub mean: f64,
    pub variance: f64,
    pub skewness: Option<f64>,
    pub kurtosis: Option<f64>,
}

impl Shape {
    /// Derives mean, variance, skewness and excess kurtosis from raw moments.
    ///
    /// `raw[k]` holds `E[x^k]` for `k` in `1..=4`; `raw[0]` is ignored. Missing orders yield
    /// `None` for the statistics that need them.
    pub fn from_raw_moments(raw: &[f64]) -> Shape {
        let m1 = raw[1];
        let variance = match raw.get(2) {
            Some(m2) => (m2 - m1 * m1).max(0.0),
            None => 0.0,
        };
        let std_dev = variance.sqrt();
        let degenerate = std_dev <= f64::EPSILON * m1.abs().max(1.0);

        let skewness = match raw.get(3) {
            Some(_) if degenerate => None,
            Some(m3) => {
                let central = m3 - 3.0 * m1 * raw[2] + 2.0 * m1.powi(3);
                Some(central / std_dev.powi(3))
            }
            None => None,
        };
        let kurtosis = match raw.get(4) {
            Some(_) if degenerate => None,
            Some(m4) => {
                let central =
                    m4 - 4.0 * m1 * raw[3] + 6.0 * m1 * m1 * raw[2] - 3.0 * m1.powi(4);
                Some(central / (variance * variance) - 3.0)
            }
            None => None,
        };

        Shape {
            mean: m1,
            variance,
            skewness,
            kurtosis,
        }
    }
}
