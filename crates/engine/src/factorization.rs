//! Latent-factor collaborative filtering.
//!
//! Factorizes the sparse rating matrix into low-rank user and item factors
//! with per-user/per-item biases, trained by alternating least squares. Each
//! half-step solves a k×k ridge system per row via Cholesky decomposition,
//! so the regularized objective is non-increasing across iterations. Only
//! observed entries enter the loss; absent cells are unknown, not zero.
//!
//! Training is reproducible bit for bit: factor initialization draws from a
//! seeded `StdRng` and every pass iterates rows and sorted adjacency lists
//! in index order.

use std::sync::Arc;

use dashmap::DashMap;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RecommenderError, Result};
use crate::matrix::{IndexMap, RatingMatrix};
use crate::types::RatingScale;

/// Hyperparameters for the factorization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorizationConfig {
    /// Number of latent factors (rank k).
    pub rank: usize,
    /// L2 regularization on the factor rows (lambda).
    pub regularization: f32,
    /// Damping applied to the bias estimates.
    pub bias_regularization: f32,
    /// Iteration budget; exceeding it without meeting the tolerance is a
    /// convergence failure.
    pub max_iterations: usize,
    /// Minimum relative objective improvement per iteration.
    pub convergence_tolerance: f32,
    /// Seed for factor initialization.
    pub random_seed: u64,
}

impl Default for FactorizationConfig {
    fn default() -> Self {
        Self {
            rank: 32,
            regularization: 0.1,
            bias_regularization: 10.0,
            max_iterations: 100,
            convergence_tolerance: 1e-4,
            random_seed: 42,
        }
    }
}

impl FactorizationConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.rank == 0 {
            return Err(RecommenderError::Data("rank must be at least 1".to_string()));
        }
        if !(self.regularization.is_finite() && self.regularization > 0.0) {
            return Err(RecommenderError::Data(
                "regularization must be a positive finite value".to_string(),
            ));
        }
        if !(self.bias_regularization.is_finite() && self.bias_regularization >= 0.0) {
            return Err(RecommenderError::Data(
                "bias regularization must be non-negative and finite".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(RecommenderError::Data(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !(self.convergence_tolerance.is_finite() && self.convergence_tolerance >= 0.0) {
            return Err(RecommenderError::Data(
                "convergence tolerance must be non-negative and finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-run training diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub iterations_run: usize,
    pub converged: bool,
    /// Regularized objective after each iteration.
    pub objective_history: Vec<f32>,
}

/// A trained latent-factor model. Immutable after training; a retrain
/// produces a fresh instance and the old one is dropped wholesale.
#[derive(Debug, Serialize, Deserialize)]
pub struct LatentFactorModel {
    config: FactorizationConfig,
    scale: RatingScale,
    global_mean: f32,
    user_biases: Vec<f32>,
    item_biases: Vec<f32>,
    /// n_users × k
    user_factors: Array2<f32>,
    /// n_items × k
    item_factors: Array2<f32>,
    users: IndexMap,
    items: IndexMap,
    /// Per user, `(item_index, score)` sorted by item index.
    rated: Vec<Vec<(usize, f32)>>,
    /// Full predicted score vector per user, filled lazily. Dies with the
    /// model instance on retrain.
    #[serde(skip, default)]
    score_cache: DashMap<usize, Arc<Vec<f32>>>,
}

impl LatentFactorModel {
    /// Trains on the observed entries of `matrix`.
    pub fn train(
        matrix: &RatingMatrix,
        config: FactorizationConfig,
    ) -> Result<(Self, TrainingReport)> {
        config.validate()?;

        let n_users = matrix.n_users();
        let n_items = matrix.n_items();
        let k = config.rank;
        let lambda = f64::from(config.regularization);

        let user_adj = matrix.user_adjacency();
        let item_adj = matrix.item_adjacency();

        let global_mean = matrix.global_mean();
        let user_biases = damped_biases(&user_adj, |_, score| score - global_mean, config.bias_regularization);
        let item_biases = damped_biases(
            &item_adj,
            |user, score| score - global_mean - user_biases[user],
            config.bias_regularization,
        );

        let mut rng = StdRng::seed_from_u64(config.random_seed);
        let mut user_factors = random_factors(&mut rng, n_users, k);
        let mut item_factors = random_factors(&mut rng, n_items, k);

        let initial = regularized_objective(
            &user_adj,
            &user_factors,
            &item_factors,
            global_mean,
            &user_biases,
            &item_biases,
            lambda,
        );
        debug!(objective = initial, "starting als from random factors");

        let mut history = Vec::with_capacity(config.max_iterations);
        let mut previous = initial;
        let mut last_improvement = f32::INFINITY;
        let mut converged = false;
        let mut iterations_run = 0;

        for iteration in 0..config.max_iterations {
            iterations_run = iteration + 1;

            user_factors = solve_factor_rows(&user_adj, &item_factors, k, lambda, |u, i, score| {
                score - global_mean - user_biases[u] - item_biases[i]
            })?;
            item_factors = solve_factor_rows(&item_adj, &user_factors, k, lambda, |i, u, score| {
                score - global_mean - user_biases[u] - item_biases[i]
            })?;

            let objective = regularized_objective(
                &user_adj,
                &user_factors,
                &item_factors,
                global_mean,
                &user_biases,
                &item_biases,
                lambda,
            );
            history.push(objective as f32);
            debug!(iteration, objective, "als iteration complete");

            let improvement = ((previous - objective) / previous.abs().max(1e-12)) as f32;
            last_improvement = improvement;
            if improvement < config.convergence_tolerance {
                converged = true;
                break;
            }
            previous = objective;
        }

        if !converged {
            return Err(RecommenderError::Convergence {
                iterations: iterations_run,
                last_improvement,
            });
        }

        let model = Self {
            config,
            scale: matrix.scale(),
            global_mean,
            user_biases,
            item_biases,
            user_factors,
            item_factors,
            users: matrix.users().clone(),
            items: matrix.items().clone(),
            rated: user_adj,
            score_cache: DashMap::new(),
        };
        let report = TrainingReport {
            iterations_run,
            converged,
            objective_history: history,
        };
        Ok((model, report))
    }

    /// Predicted score for a known user-item pair, clipped into the scale.
    pub fn predict(&self, user_id: &str, item_id: &str) -> Result<f32> {
        let u = self
            .users
            .index_of(user_id)
            .ok_or_else(|| RecommenderError::unknown_user(user_id))?;
        let i = self
            .items
            .index_of(item_id)
            .ok_or_else(|| RecommenderError::unknown_item(item_id))?;
        Ok(self.predict_index(u, i))
    }

    fn predict_index(&self, u: usize, i: usize) -> f32 {
        let raw = self.global_mean
            + self.user_biases[u]
            + self.item_biases[i]
            + self.user_factors.row(u).dot(&self.item_factors.row(i));
        self.scale.clip(raw)
    }

    /// The full clipped score vector for one user, cached across calls so
    /// repeated top-n queries cost a lookup instead of O(n_items · k).
    fn scores_for_user(&self, u: usize) -> Arc<Vec<f32>> {
        if let Some(cached) = self.score_cache.get(&u) {
            return Arc::clone(&cached);
        }
        let scores: Arc<Vec<f32>> = Arc::new(
            (0..self.items.len())
                .map(|i| self.predict_index(u, i))
                .collect(),
        );
        self.score_cache.insert(u, Arc::clone(&scores));
        scores
    }

    /// Top-n items the user has not rated, sorted by predicted score
    /// descending with item-id-ascending tie-break.
    pub fn recommend(&self, user_id: &str, n: usize) -> Result<Vec<(String, f32)>> {
        Ok(self
            .candidates(user_id)?
            .into_iter()
            .take(n)
            .collect())
    }

    /// All unrated items for the user, ranked. The blender consumes the full
    /// list so blending happens before truncation.
    pub(crate) fn candidates(&self, user_id: &str) -> Result<Vec<(String, f32)>> {
        let u = self
            .users
            .index_of(user_id)
            .ok_or_else(|| RecommenderError::unknown_user(user_id))?;

        let scores = self.scores_for_user(u);
        let rated = &self.rated[u];

        let mut ranked: Vec<(String, f32)> = (0..self.items.len())
            .filter(|&i| rated.binary_search_by_key(&i, |&(idx, _)| idx).is_err())
            .map(|i| {
                let id = self.items.id_at(i).unwrap_or_default().to_string();
                (id, scores[i])
            })
            .collect();

        ranked.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(ranked)
    }

    /// Nearest neighbors of an item in latent space (cosine over item
    /// factor rows), excluding the item itself.
    pub fn similar_items(&self, item_id: &str, n: usize) -> Result<Vec<(String, f32)>> {
        let target = self
            .items
            .index_of(item_id)
            .ok_or_else(|| RecommenderError::unknown_item(item_id))?;

        let target_row: Vec<f32> = self.item_factors.row(target).to_vec();
        let mut scored: Vec<(String, f32)> = (0..self.items.len())
            .filter(|&i| i != target)
            .map(|i| {
                let id = self.items.id_at(i).unwrap_or_default().to_string();
                let sim = cosine_similarity(&target_row, &self.item_factors.row(i).to_vec());
                (id, sim)
            })
            .collect();

        scored.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(n);
        Ok(scored)
    }

    pub fn user_index(&self, user_id: &str) -> Option<usize> {
        self.users.index_of(user_id)
    }

    pub fn item_index(&self, item_id: &str) -> Option<usize> {
        self.items.index_of(item_id)
    }

    /// How many ratings the user contributed to training.
    pub fn rating_count(&self, user_id: &str) -> Option<usize> {
        self.users.index_of(user_id).map(|u| self.rated[u].len())
    }

    pub(crate) fn rated_by_index(&self, u: usize) -> &[(usize, f32)] {
        &self.rated[u]
    }

    pub fn users(&self) -> &IndexMap {
        &self.users
    }

    pub fn items(&self) -> &IndexMap {
        &self.items
    }

    pub fn n_users(&self) -> usize {
        self.users.len()
    }

    pub fn n_items(&self) -> usize {
        self.items.len()
    }

    pub fn rank(&self) -> usize {
        self.config.rank
    }

    pub fn global_mean(&self) -> f32 {
        self.global_mean
    }

    pub fn scale(&self) -> RatingScale {
        self.scale
    }

    pub fn config(&self) -> &FactorizationConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn factors(&self) -> (&Array2<f32>, &Array2<f32>, &[f32], &[f32]) {
        (
            &self.user_factors,
            &self.item_factors,
            &self.user_biases,
            &self.item_biases,
        )
    }
}

/// Damped mean of per-row residuals: `sum(residual) / (damping + count)`.
fn damped_biases(
    adjacency: &[Vec<(usize, f32)>],
    residual: impl Fn(usize, f32) -> f32,
    damping: f32,
) -> Vec<f32> {
    adjacency
        .iter()
        .map(|neighbors| {
            let sum: f64 = neighbors
                .iter()
                .map(|&(other, score)| f64::from(residual(other, score)))
                .sum();
            (sum / f64::from(damping + neighbors.len() as f32)) as f32
        })
        .collect()
}

fn random_factors(rng: &mut StdRng, rows: usize, k: usize) -> Array2<f32> {
    let mut factors = Array2::<f32>::zeros((rows, k));
    for row in 0..rows {
        for col in 0..k {
            factors[[row, col]] = rng.gen_range(-0.1..0.1);
        }
    }
    factors
}

/// One ALS half-step: for each row, solve the k×k ridge normal equations
/// built from its observed neighbors.
fn solve_factor_rows(
    adjacency: &[Vec<(usize, f32)>],
    other_factors: &Array2<f32>,
    k: usize,
    lambda: f64,
    residual: impl Fn(usize, usize, f32) -> f32,
) -> Result<Array2<f32>> {
    let mut solved = Array2::<f32>::zeros((adjacency.len(), k));

    for (row, neighbors) in adjacency.iter().enumerate() {
        let mut a = Array2::<f64>::zeros((k, k));
        let mut b = Array1::<f64>::zeros(k);

        for &(col, score) in neighbors {
            let other = other_factors.row(col);
            let r = f64::from(residual(row, col, score));
            for i in 0..k {
                let oi = f64::from(other[i]);
                b[i] += r * oi;
                for j in 0..k {
                    a[[i, j]] += oi * f64::from(other[j]);
                }
            }
        }

        for i in 0..k {
            a[[i, i]] += lambda;
        }

        let x = cholesky_solve(&a, &b)?;
        for i in 0..k {
            solved[[row, i]] = x[i] as f32;
        }
    }

    Ok(solved)
}

/// Solves `A x = b` for symmetric positive definite `A` via Cholesky
/// decomposition with forward and backward substitution.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }

            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return Err(RecommenderError::Data(
                        "normal equations lost positive definiteness; increase regularization"
                            .to_string(),
                    ));
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // Forward substitution: L y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // Backward substitution: L^T x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Ok(x)
}

fn regularized_objective(
    user_adj: &[Vec<(usize, f32)>],
    user_factors: &Array2<f32>,
    item_factors: &Array2<f32>,
    global_mean: f32,
    user_biases: &[f32],
    item_biases: &[f32],
    lambda: f64,
) -> f64 {
    let mut sse = 0.0f64;
    for (u, neighbors) in user_adj.iter().enumerate() {
        for &(i, score) in neighbors {
            let residual = score - global_mean - user_biases[u] - item_biases[i];
            let approx = user_factors.row(u).dot(&item_factors.row(i));
            sse += f64::from(residual - approx).powi(2);
        }
    }

    let reg: f64 = user_factors.iter().map(|&x| f64::from(x).powi(2)).sum::<f64>()
        + item_factors.iter().map(|&x| f64::from(x).powi(2)).sum::<f64>();

    sse + lambda * reg
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
