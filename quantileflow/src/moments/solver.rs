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

//! Maximum-entropy reconstruction of a density on `[-1, 1]` from its Chebyshev moments.
//!
//! The density `f(y) = exp(sum(lambda_j * T_j(y)))` maximizing entropy under the constraints
//! `E[T_j] = mu_j` minimizes the convex potential
//! `G(lambda) = integral(f) - sum(lambda_j * mu_j)`. Its gradient is the moment mismatch and its
//! Hessian is the Gram matrix of the Chebyshev basis under `f`, so Newton's method with a
//! backtracking line search finds the multipliers. Integrals use the trapezoid rule on a uniform
//! grid.

/// Default number of grid points.
pub const DEFAULT_GRID_SIZE: usize = 1001;
/// Default cap on Newton iterations.
pub const DEFAULT_MAX_ITERATIONS: usize = 200;
/// Default tolerance on the Euclidean norm of the gradient.
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

const MAX_LINE_SEARCH_STEPS: usize = 60;
const ARMIJO_FACTOR: f64 = 1e-4;
const MAX_DAMPING_ATTEMPTS: usize = 8;
// Chebyshev moments of any distribution on [-1, 1] lie in [-1, 1].
const MOMENT_BOUND: f64 = 1.0 + 1e-9;

/// Outcome of a maximum-entropy solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Convergence {
    /// The gradient norm fell below the tolerance.
    Converged {
        /// Newton steps taken.
        iterations: usize,
    },
    /// The solver stopped before reaching the tolerance; the density is a best-effort estimate.
    NotConverged {
        /// Newton steps taken.
        iterations: usize,
        /// Euclidean norm of the gradient at the returned multipliers.
        gradient_norm: f64,
    },
}

impl Convergence {
    /// Returns true if the solve reached its tolerance.
    pub fn is_converged(&self) -> bool {
        matches!(self, Convergence::Converged { .. })
    }

    /// Returns the number of Newton steps taken.
    pub fn iterations(&self) -> usize {
        match self {
            Convergence::Converged { iterations } => *iterations,
            Convergence::NotConverged { iterations, .. } => *iterations,
        }
    }
}

/// Newton solver for the maximum-entropy multipliers.
///
/// # Examples
///
/// ```
/// # use quantileflow::moments::MaxEntSolver;
/// let solver = MaxEntSolver::default().with_max_iterations(50).with_tolerance(1e-8);
/// assert_eq!(solver.max_iterations(), 50);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaxEntSolver {
    grid_size: usize,
    max_iterations: usize,
    tolerance: f64,
}

impl Default for MaxEntSolver {
    fn default() -> Self {
        Self {
            grid_size: DEFAULT_GRID_SIZE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// Density reconstructed on the solver grid.
#[derive(Debug, Clone)]
pub(crate) struct Solution {
    /// Grid points in `[-1, 1]`.
    pub grid: Vec<f64>,
    /// Probability mass of each grid point, summing to one.
    pub mass: Vec<f64>,
    /// Cumulative distribution at each grid point, from 0 to 1.
    pub cdf: Vec<f64>,
    pub convergence: Convergence,
}

struct Evaluation {
    potential: f64,
    gradient: Vec<f64>,
    // unnormalized density at each grid point
    values: Vec<f64>,
}

impl MaxEntSolver {
    /// Sets the cap on Newton iterations.
    ///
    /// # Panics
    ///
    /// Panics if `max_iterations` is 0.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        assert!(max_iterations > 0, "max_iterations must be at least 1");
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the tolerance on the gradient norm.
    ///
    /// # Panics
    ///
    /// Panics if `tolerance` is not positive.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        assert!(tolerance > 0.0, "tolerance must be positive, got {tolerance}");
        self.tolerance = tolerance;
        self
    }

    /// Sets the number of grid points.
    ///
    /// # Panics
    ///
    /// Panics if `grid_size` is less than 3.
    pub fn with_grid_size(mut self, grid_size: usize) -> Self {
        assert!(grid_size >= 3, "grid_size must be at least 3, got {grid_size}");
        self.grid_size = grid_size;
        self
    }

    /// Returns the cap on Newton iterations.
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Returns the tolerance on the gradient norm.
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Returns the number of grid points.
    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    /// Solves for the density matching `moments`, where `moments[0]` is 1.
    pub(crate) fn solve(&self, moments: &[f64]) -> Solution {
        let n = self.grid_size;
        let step = 2.0 / (n - 1) as f64;
        let grid: Vec<f64> = (0..n).map(|i| -1.0 + step * i as f64).collect();
        let weights: Vec<f64> = (0..n)
            .map(|i| if i == 0 || i == n - 1 { step / 2.0 } else { step })
            .collect();
        let basis = chebyshev_basis(&grid, moments.len());

        let mut lambdas = vec![0.0; moments.len()];
        lambdas[0] = 0.5f64.ln();
        let mut current = evaluate(&lambdas, moments, &basis, &weights);
        let mut iterations = 0;

        while iterations < self.max_iterations && norm(&current.gradient) >= self.tolerance {
            let hessian = gram_matrix(&current.values, &basis, &weights);
            let rhs: Vec<f64> = current.gradient.iter().map(|g| -g).collect();
            let Some(direction) = solve_damped(&hessian, &rhs) else {
                break;
            };
            let slope = dot(&current.gradient, &direction);
            if slope.is_nan() || slope >= 0.0 {
                break;
            }

            let mut accepted = None;
            let mut t = 1.0;
            for _ in 0..MAX_LINE_SEARCH_STEPS {
                let candidate: Vec<f64> = lambdas
                    .iter()
                    .zip(&direction)
                    .map(|(lambda, d)| lambda + t * d)
                    .collect();
                let evaluation = evaluate(&candidate, moments, &basis, &weights);
                if evaluation.potential <= current.potential + ARMIJO_FACTOR * t * slope {
                    accepted = Some((candidate, evaluation));
                    break;
                }
                t *= 0.5;
            }
            let Some((candidate, evaluation)) = accepted else {
                break;
            };
            lambdas = candidate;
            current = evaluation;
            iterations += 1;
        }

        let gradient_norm = norm(&current.gradient);
        let convergence = if gradient_norm < self.tolerance {
            Convergence::Converged { iterations }
        } else {
            Convergence::NotConverged {
                iterations,
                gradient_norm,
            }
        };

        let (mass, cdf) = discretize(&current.values, &weights, step);
        Solution {
            grid,
            mass,
            cdf,
            convergence,
        }
    }
}

/// Converts raw moments `E[x^k]` of a distribution on `[center - radius, center + radius]` into
/// Chebyshev moments `E[T_k(y)]` of `y = (x - center) / radius`.
pub(crate) fn chebyshev_moments(raw: &[f64], center: f64, radius: f64) -> Vec<f64> {
    let len = raw.len();
    let scaled: Vec<f64> = raw
        .iter()
        .enumerate()
        .map(|(k, moment)| moment / radius.powi(k as i32))
        .collect();
    let shift = -center / radius;

    // E[y^j] = sum_i C(j, i) E[(x / radius)^i] shift^(j - i)
    let mut binomial = vec![1.0; 1];
    let mut shifted = Vec::with_capacity(len);
    for j in 0..len {
        if j > 0 {
            let mut next = vec![1.0; j + 1];
            for i in 1..j {
                next[i] = binomial[i - 1] + binomial[i];
            }
            binomial = next;
        }
        let moment = (0..=j)
            .map(|i| binomial[i] * scaled[i] * shift.powi((j - i) as i32))
            .sum::<f64>();
        shifted.push(moment);
    }

    chebyshev_coefficients(len)
        .iter()
        .map(|coefficients| {
            coefficients
                .iter()
                .zip(&shifted)
                .map(|(c, m)| c * m)
                .sum()
        })
        .collect()
}

/// Returns the longest prefix of Chebyshev moments that a distribution could have.
///
/// Higher moments lose precision first, so once one is out of range it and all later ones are
/// dropped.
pub(crate) fn valid_prefix(moments: &[f64]) -> usize {
    moments
        .iter()
        .position(|moment| !(moment.is_finite() && moment.abs() <= MOMENT_BOUND))
        .unwrap_or(moments.len())
        .max(1)
}

/// Power-basis coefficients of `T_0 .. T_{len-1}`.
fn chebyshev_coefficients(len: usize) -> Vec<Vec<f64>> {
    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(len);
    for j in 0..len {
        let mut row = vec![0.0; len];
        match j {
            0 => row[0] = 1.0,
            1 => row[1] = 1.0,
            _ => {
                for i in 0..len {
                    let shifted = if i > 0 { 2.0 * rows[j - 1][i - 1] } else { 0.0 };
                    row[i] = shifted - rows[j - 2][i];
                }
            }
        }
        rows.push(row);
    }
    rows
}

/// Values of `T_0 .. T_{len-1}` at each grid point, one row per polynomial.
fn chebyshev_basis(grid: &[f64], len: usize) -> Vec<Vec<f64>> {
    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(len);
    for j in 0..len {
        let row = match j {
            0 => vec![1.0; grid.len()],
            1 => grid.to_vec(),
            _ => grid
                .iter()
                .enumerate()
                .map(|(i, y)| 2.0 * y * rows[j - 1][i] - rows[j - 2][i])
                .collect(),
        };
        rows.push(row);
    }
    rows
}

fn evaluate(
    lambdas: &[f64],
    moments: &[f64],
    basis: &[Vec<f64>],
    weights: &[f64],
) -> Evaluation {
    let values: Vec<f64> = (0..weights.len())
        .map(|i| {
            let exponent: f64 = lambdas.iter().zip(basis).map(|(l, row)| l * row[i]).sum();
            exponent.exp()
        })
        .collect();

    let gradient: Vec<f64> = basis
        .iter()
        .zip(moments)
        .map(|(row, moment)| {
            let integral: f64 = row
                .iter()
                .zip(&values)
                .zip(weights)
                .map(|((t, f), w)| w * f * t)
                .sum();
            integral - moment
        })
        .collect();

    // T_0 = 1, so the first gradient entry holds the integral of the density minus one
    let integral = gradient[0] + moments[0];
    let potential = integral - dot(lambdas, moments);
    Evaluation {
        potential,
        gradient,
        values,
    }
}

fn gram_matrix(values: &[f64], basis: &[Vec<f64>], weights: &[f64]) -> Vec<Vec<f64>> {
    let len = basis.len();
    let mut matrix = vec![vec![0.0; len]; len];
    for j in 0..len {
        for k in 0..=j {
            let entry: f64 = (0..weights.len())
                .map(|i| weights[i] * values[i] * basis[j][i] * basis[k][i])
                .sum();
            matrix[j][k] = entry;
            matrix[k][j] = entry;
        }
    }
    matrix
}

/// Solves `matrix * x = rhs` by Cholesky factorization, adding growing ridge terms to the
/// diagonal while the matrix is not numerically positive definite.
fn solve_damped(matrix: &[Vec<f64>], rhs: &[f64]) -> Option<Vec<f64>> {
    let scale = matrix
        .iter()
        .enumerate()
        .map(|(i, row)| row[i].abs())
        .fold(0.0, f64::max);
    let mut damping = 0.0;
    for attempt in 0..MAX_DAMPING_ATTEMPTS {
        if let Some(x) = cholesky_solve(matrix, rhs, damping) {
            return Some(x);
        }
        damping = scale * 1e-12 * 100f64.powi(attempt as i32);
    }
    None
}

fn cholesky_solve(matrix: &[Vec<f64>], rhs: &[f64], damping: f64) -> Option<Vec<f64>> {
    let len = rhs.len();
    let mut lower = vec![vec![0.0; len]; len];
    for j in 0..len {
        let mut diagonal = matrix[j][j] + damping;
        for k in 0..j {
            diagonal -= lower[j][k] * lower[j][k];
        }
        if !(diagonal.is_finite() && diagonal > 0.0) {
            return None;
        }
        let diagonal = diagonal.sqrt();
        lower[j][j] = diagonal;
        for i in (j + 1)..len {
            let mut entry = matrix[i][j];
            for k in 0..j {
                entry -= lower[i][k] * lower[j][k];
            }
            lower[i][j] = entry / diagonal;
        }
    }

    // forward then backward substitution
    let mut y = vec![0.0; len];
    for i in 0..len {
        let mut sum = rhs[i];
        for k in 0..i {
            sum -= lower[i][k] * y[k];
        }
        y[i] = sum / lower[i][i];
    }
    let mut x = vec![0.0; len];
    for i in (0..len).rev() {
        let mut sum = y[i];
        for k in (i + 1)..len {
            sum -= lower[k][i] * x[k];
        }
        x[i] = sum / lower[i][i];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Normalizes the grid density into point masses and a trapezoid CDF.
fn discretize(values: &[f64], weights: &[f64], step: f64) -> (Vec<f64>, Vec<f64>) {
    let n = values.len();
    let values: Vec<f64> = values
        .iter()
        .map(|v| if v.is_finite() { *v } else { 0.0 })
        .collect();

    let mut cdf = Vec::with_capacity(n);
    cdf.push(0.0);
    for i in 1..n {
        cdf.push(cdf[i - 1] + step * (values[i - 1] + values[i]) / 2.0);
    }
    let total = cdf[n - 1];
    let mut mass: Vec<f64> = values.iter().zip(weights).map(|(v, w)| v * w).collect();

    if total > 0.0 && total.is_finite() {
        cdf.iter_mut().for_each(|c| *c /= total);
        mass.iter_mut().for_each(|m| *m /= total);
    } else {
        // nothing usable was reconstructed: fall back to a uniform density
        for (i, c) in cdf.iter_mut().enumerate() {
            *c = i as f64 / (n - 1) as f64;
        }
        mass = weights.iter().map(|w| w / 2.0).collect();
    }
    (mass, cdf)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}
