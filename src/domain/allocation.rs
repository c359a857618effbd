//! Portfolio weight allocation.
//!
//! Risk parity equalizes each asset's contribution to portfolio variance over
//! a trailing covariance window. It is solved by cyclical coordinate descent
//! on the convex formulation
//!
//!   min ½ xᵀΣx − Σ bᵢ ln xᵢ,  bᵢ = 1/n
//!
//! whose minimizer, normalized to sum to one, is the equal-risk portfolio.
//! Degenerate inputs never raise: they fall back to simpler schemes and the
//! fallback is reported on the returned `Allocation`.

use crate::domain::dataset::CompleteDataset;
use crate::domain::ohlcv::Symbol;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

pub const DEFAULT_MAX_SINGLE_ALLOCATION: f64 = 0.40;
pub const DEFAULT_COVARIANCE_WINDOW: usize = 60;
pub const DEFAULT_MIN_HISTORY: usize = 20;
pub const DEFAULT_MAX_ITERATIONS: usize = 500;
pub const DEFAULT_TOLERANCE: f64 = 1e-8;

/// Cholesky pivots of the correlation matrix below this mark it singular.
const SINGULAR_PIVOT: f64 = 1e-10;
const VARIANCE_FLOOR: f64 = 1e-18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMethod {
    EqualWeight,
    InverseVolatility,
    RiskParity,
}

impl fmt::Display for AllocationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AllocationMethod::EqualWeight => "equal_weight",
            AllocationMethod::InverseVolatility => "inverse_volatility",
            AllocationMethod::RiskParity => "risk_parity",
        };
        f.write_str(s)
    }
}

impl FromStr for AllocationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equal_weight" | "equal" => Ok(AllocationMethod::EqualWeight),
            "inverse_volatility" | "inverse_vol" => Ok(AllocationMethod::InverseVolatility),
            "risk_parity" => Ok(AllocationMethod::RiskParity),
            other => Err(format!(
                "unknown allocation method '{}' (expected equal_weight, inverse_volatility or risk_parity)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllocationConstraints {
    pub max_single_allocation: f64,
    pub covariance_window: usize,
    pub min_history: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for AllocationConstraints {
    fn default() -> Self {
        Self {
            max_single_allocation: DEFAULT_MAX_SINGLE_ALLOCATION,
            covariance_window: DEFAULT_COVARIANCE_WINDOW,
            min_history: DEFAULT_MIN_HISTORY,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl AllocationConstraints {
    /// Cap actually enforced for `n` assets. Below `1/n` no fully invested
    /// portfolio can satisfy it, so it is relaxed to `1/n`.
    pub fn effective_cap(&self, n: usize) -> f64 {
        if n == 0 {
            return self.max_single_allocation;
        }
        self.max_single_allocation.max(1.0 / n as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackReason {
    SingleCandidate,
    InsufficientHistory { available: usize, required: usize },
    ZeroVariance { symbol: Symbol },
    NumericalInstability { reason: String },
    CapRelaxed { cap: f64 },
}

impl FallbackReason {
    /// Short label, matching the serialized `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            FallbackReason::SingleCandidate => "single_candidate",
            FallbackReason::InsufficientHistory { .. } => "insufficient_history",
            FallbackReason::ZeroVariance { .. } => "zero_variance",
            FallbackReason::NumericalInstability { .. } => "numerical_instability",
            FallbackReason::CapRelaxed { .. } => "cap_relaxed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub weights: BTreeMap<Symbol, f64>,
    pub method_used: AllocationMethod,
    pub fallback: Option<FallbackReason>,
}

impl Allocation {
    pub fn cash() -> Self {
        Self {
            weights: BTreeMap::new(),
            method_used: AllocationMethod::EqualWeight,
            fallback: None,
        }
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }
}

/// Aligned close-to-close returns for a set of symbols: row `t` of every
/// column refers to the same pair of trading dates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReturnsHistory {
    columns: BTreeMap<Symbol, Vec<f64>>,
    observations: usize,
}

impl ReturnsHistory {
    /// Builds from explicit columns, truncated to the shortest.
    pub fn new(columns: BTreeMap<Symbol, Vec<f64>>) -> Self {
        let observations = columns.values().map(Vec::len).min().unwrap_or(0);
        let columns = columns
            .into_iter()
            .map(|(s, mut v)| {
                let drop = v.len() - observations;
                v.drain(..drop);
                (s, v)
            })
            .collect();
        Self {
            columns,
            observations,
        }
    }

    /// Up to `window` most recent returns over the dates on which every
    /// symbol traded, using only bars dated at or before `as_of`.
    pub fn from_dataset(
        dataset: &CompleteDataset,
        symbols: &[Symbol],
        as_of: NaiveDate,
        window: usize,
    ) -> Self {
        let series: Vec<_> = symbols
            .iter()
            .filter_map(|s| dataset.symbol_data(s).map(|d| (s, d)))
            .collect();
        if series.len() != symbols.len() || symbols.is_empty() || window == 0 {
            return Self::default();
        }

        let upto = dataset.timeline.partition_point(|d| *d <= as_of);
        let mut aligned: Vec<Vec<f64>> = Vec::with_capacity(window + 1);
        for date in dataset.timeline[..upto].iter().rev() {
            let closes: Option<Vec<f64>> = series
                .iter()
                .map(|(_, data)| data.get_point(*date).map(|p| p.close))
                .collect();
            if let Some(closes) = closes {
                aligned.push(closes);
                if aligned.len() == window + 1 {
                    break;
                }
            }
        }
        aligned.reverse();

        let mut columns: BTreeMap<Symbol, Vec<f64>> = BTreeMap::new();
        for (col, (symbol, _)) in series.iter().enumerate() {
            let returns = aligned
                .windows(2)
                .map(|w| {
                    if w[0][col] > 0.0 {
                        w[1][col] / w[0][col] - 1.0
                    } else {
                        0.0
                    }
                })
                .collect();
            columns.insert((*symbol).clone(), returns);
        }
        Self::new(columns)
    }

    pub fn len(&self) -> usize {
        self.observations
    }

    pub fn is_empty(&self) -> bool {
        self.observations == 0
    }

    pub fn returns(&self, symbol: &str) -> Option<&[f64]> {
        self.columns.get(symbol).map(Vec::as_slice)
    }

    /// Sample covariance (n - 1) of the given symbols, in order.
    pub fn covariance(&self, symbols: &[Symbol]) -> Option<Vec<Vec<f64>>> {
        if self.observations < 2 {
            return None;
        }
        let cols: Vec<&[f64]> = symbols
            .iter()
            .map(|s| self.returns(s))
            .collect::<Option<_>>()?;
        let n = self.observations as f64;
        let means: Vec<f64> = cols.iter().map(|c| c.iter().sum::<f64>() / n).collect();

        let k = cols.len();
        let mut cov = vec![vec![0.0; k]; k];
        for i in 0..k {
            for j in i..k {
                let c = cols[i]
                    .iter()
                    .zip(cols[j])
                    .map(|(a, b)| (a - means[i]) * (b - means[j]))
                    .sum::<f64>()
                    / (n - 1.0);
                cov[i][j] = c;
                cov[j][i] = c;
            }
        }
        Some(cov)
    }
}

pub fn allocate(
    candidates: &[Symbol],
    history: &ReturnsHistory,
    method: AllocationMethod,
    constraints: &AllocationConstraints,
) -> Allocation {
    let n = candidates.len();
    match n {
        0 => return Allocation::cash(),
        1 => {
            return Allocation {
                weights: BTreeMap::from([(candidates[0].clone(), 1.0)]),
                method_used: AllocationMethod::EqualWeight,
                fallback: Some(FallbackReason::SingleCandidate),
            };
        }
        _ => {}
    }

    if constraints.max_single_allocation * (n as f64) < 1.0 {
        debug!(
            n,
            cap = constraints.max_single_allocation,
            "cap below 1/n, using equal weight"
        );
        return equal_allocation(
            candidates,
            Some(FallbackReason::CapRelaxed {
                cap: constraints.effective_cap(n),
            }),
        );
    }

    if method == AllocationMethod::EqualWeight {
        return equal_allocation(candidates, None);
    }

    let required = constraints.min_history.max(2);
    if history.len() < required {
        debug!(available = history.len(), required, "insufficient return history");
        return equal_allocation(
            candidates,
            Some(FallbackReason::InsufficientHistory {
                available: history.len(),
                required,
            }),
        );
    }

    let Some(cov) = history.covariance(candidates) else {
        return equal_allocation(
            candidates,
            Some(FallbackReason::InsufficientHistory {
                available: 0,
                required,
            }),
        );
    };

    if let Some(i) = (0..n).find(|&i| cov[i][i].is_nan() || cov[i][i] <= VARIANCE_FLOOR) {
        debug!(symbol = %candidates[i], "zero variance asset");
        return equal_allocation(
            candidates,
            Some(FallbackReason::ZeroVariance {
                symbol: candidates[i].clone(),
            }),
        );
    }

    let (raw, method_used, fallback) = match method {
        AllocationMethod::InverseVolatility => {
            (inverse_volatility(&cov), AllocationMethod::InverseVolatility, None)
        }
        _ => match risk_parity(&cov, constraints.max_iterations, constraints.tolerance) {
            Ok(w) => (w, AllocationMethod::RiskParity, None),
            Err(reason) => {
                warn!(%reason, "risk parity unstable, using inverse volatility");
                (
                    inverse_volatility(&cov),
                    AllocationMethod::InverseVolatility,
                    Some(FallbackReason::NumericalInstability { reason }),
                )
            }
        },
    };

    let capped = apply_cap(
        raw,
        constraints.max_single_allocation,
        constraints.max_iterations,
    );

    Allocation {
        weights: candidates.iter().cloned().zip(capped).collect(),
        method_used,
        fallback,
    }
}

fn equal_allocation(candidates: &[Symbol], fallback: Option<FallbackReason>) -> Allocation {
    let w = 1.0 / candidates.len() as f64;
    Allocation {
        weights: candidates.iter().map(|s| (s.clone(), w)).collect(),
        method_used: AllocationMethod::EqualWeight,
        fallback,
    }
}

/// Weights proportional to 1/σ, ignoring correlation.
pub fn inverse_volatility(cov: &[Vec<f64>]) -> Vec<f64> {
    let inv: Vec<f64> = (0..cov.len()).map(|i| 1.0 / cov[i][i].sqrt()).collect();
    let total: f64 = inv.iter().sum();
    inv.iter().map(|v| v / total).collect()
}

/// Checks positive definiteness through a Cholesky factorization of the
/// correlation matrix.
fn is_well_conditioned(cov: &[Vec<f64>]) -> bool {
    let n = cov.len();
    let sd: Vec<f64> = (0..n).map(|i| cov[i][i].sqrt()).collect();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let corr = cov[i][j] / (sd[i] * sd[j]);
            let s: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let pivot = corr - s;
                if pivot.is_nan() || pivot <= SINGULAR_PIVOT {
                    return false;
                }
                l[i][j] = pivot.sqrt();
            } else {
                l[i][j] = (corr - s) / l[j][j];
            }
        }
    }
    true
}

/// Equal risk contribution weights, or the reason they could not be found.
pub fn risk_parity(
    cov: &[Vec<f64>],
    max_iterations: usize,
    tolerance: f64,
) -> Result<Vec<f64>, String> {
    let n = cov.len();
    if !is_well_conditioned(cov) {
        return Err("covariance matrix is singular or ill-conditioned".to_string());
    }

    let budget = 1.0 / n as f64;
    let mut x: Vec<f64> = (0..n).map(|i| 1.0 / cov[i][i].sqrt()).collect();
    let mut previous = normalized(&x);

    for iteration in 0..max_iterations {
        for i in 0..n {
            let cross: f64 = (0..n).filter(|&j| j != i).map(|j| cov[i][j] * x[j]).sum();
            let var = cov[i][i];
            x[i] = (-cross + (cross * cross + 4.0 * var * budget).sqrt()) / (2.0 * var);
        }

        if x.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(format!("solver diverged at iteration {}", iteration));
        }

        let current = normalized(&x);
        let change = current
            .iter()
            .zip(&previous)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        if change < tolerance {
            debug!(iterations = iteration + 1, "risk parity converged");
            return Ok(current);
        }
        previous = current;
    }

    Err(format!("no convergence after {} iterations", max_iterations))
}

fn normalized(x: &[f64]) -> Vec<f64> {
    let total: f64 = x.iter().sum();
    x.iter().map(|v| v / total).collect()
}

/// Caps weights at `cap` and hands the excess to uncapped assets in
/// proportion to their weight, repeating until nothing exceeds the cap.
pub fn apply_cap(mut weights: Vec<f64>, cap: f64, max_iterations: usize) -> Vec<f64> {
    let cap = if weights.is_empty() {
        cap
    } else {
        cap.max(1.0 / weights.len() as f64)
    };

    for _ in 0..max_iterations.max(weights.len()) {
        let excess: f64 = weights.iter().map(|w| (w - cap).max(0.0)).sum();
        if excess <= 1e-15 {
            break;
        }
        let uncapped: f64 = weights.iter().filter(|w| **w < cap).sum();
        if uncapped <= 0.0 {
            break;
        }
        for w in weights.iter_mut() {
            if *w >= cap {
                *w = cap;
            } else {
                *w += excess * *w / uncapped;
            }
        }
    }

    for w in weights.iter_mut() {
        *w = w.min(cap);
    }
    weights
}
