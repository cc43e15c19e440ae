//! Offline evaluation and cross-validation.
//!
//! Splits the rating table, trains one collaborative model per fold, and
//! reports accuracy (RMSE/MAE) plus ranking quality (precision@K, recall@K,
//! coverage, intra-list diversity), per fold and aggregated. Folds are
//! independent and unshared, so they train in parallel. This harness drives
//! offline model selection and is never invoked on the serving path.

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RecommenderError, Result};
use crate::factorization::{FactorizationConfig, LatentFactorModel};
use crate::features::ContentIndex;
use crate::matrix::RatingMatrix;
use crate::types::{ItemMetadata, Rating, RatingScale};

/// How the rating table is partitioned into train/test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SplitStrategy {
    /// Single random split, stratified per user so every user keeps at
    /// least one train rating.
    Holdout { test_fraction: f32 },
    /// K disjoint test partitions over a global shuffle.
    KFold { folds: usize },
    /// Each user's most recent rating is held out; users with fewer than
    /// two ratings stay entirely in train.
    LeaveOneOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub strategy: SplitStrategy,
    /// Test scores at or above this value count as relevant ground truth.
    pub relevance_threshold: f32,
    /// K for precision@K / recall@K and the per-user lists behind coverage
    /// and diversity.
    pub top_k: usize,
    /// Seed for split shuffling (model seeding comes from `factorization`).
    pub seed: u64,
    pub factorization: FactorizationConfig,
    pub scale: RatingScale,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            strategy: SplitStrategy::Holdout { test_fraction: 0.2 },
            relevance_threshold: 4.0,
            top_k: 10,
            seed: 42,
            factorization: FactorizationConfig::default(),
            scale: RatingScale::default(),
        }
    }
}

/// Metrics for one train/test split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldMetrics {
    pub fold: usize,
    pub n_train: usize,
    pub n_test: usize,
    /// Test entries whose user or item was absent from the trained index.
    /// These are excluded from RMSE/MAE rather than penalized.
    pub skipped_predictions: usize,
    pub rmse: f64,
    pub mae: f64,
    pub precision_at_k: f64,
    pub recall_at_k: f64,
    /// Fraction of the trained catalog appearing in any user's top-K list.
    pub coverage: f64,
    /// Mean pairwise content dissimilarity within top-K lists; absent when
    /// no item metadata was supplied.
    pub diversity: Option<f64>,
}

/// Mean and sample standard deviation of one metric across folds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub std_dev: f64,
}

impl MetricSummary {
    fn over(values: &[f64]) -> Self {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std_dev = if values.len() > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        Self { mean, std_dev }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub rmse: MetricSummary,
    pub mae: MetricSummary,
    pub precision_at_k: MetricSummary,
    pub recall_at_k: MetricSummary,
    pub coverage: MetricSummary,
    pub diversity: Option<MetricSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub folds: Vec<FoldMetrics>,
    pub aggregate: AggregateMetrics,
}

pub struct Evaluator {
    config: EvaluationConfig,
}

impl Evaluator {
    pub fn new(config: EvaluationConfig) -> Self {
        Self { config }
    }

    /// Runs the configured protocol over `ratings`, using `catalog` for the
    /// diversity metric.
    pub fn evaluate(
        &self,
        ratings: &[Rating],
        catalog: &[ItemMetadata],
    ) -> Result<EvaluationReport> {
        if ratings.is_empty() {
            return Err(RecommenderError::Data(
                "cannot evaluate on an empty rating table".to_string(),
            ));
        }

        let content = ContentIndex::build(catalog);
        let splits = self.split(ratings)?;

        let folds: Vec<FoldMetrics> = splits
            .par_iter()
            .enumerate()
            .map(|(fold, (train, test))| self.evaluate_fold(fold, train, test, &content))
            .collect::<Result<Vec<_>>>()?;

        for fold in &folds {
            info!(
                fold = fold.fold,
                rmse = fold.rmse,
                mae = fold.mae,
                precision_at_k = fold.precision_at_k,
                recall_at_k = fold.recall_at_k,
                "fold evaluated"
            );
        }

        let aggregate = AggregateMetrics {
            rmse: MetricSummary::over(&collect(&folds, |f| f.rmse)),
            mae: MetricSummary::over(&collect(&folds, |f| f.mae)),
            precision_at_k: MetricSummary::over(&collect(&folds, |f| f.precision_at_k)),
            recall_at_k: MetricSummary::over(&collect(&folds, |f| f.recall_at_k)),
            coverage: MetricSummary::over(&collect(&folds, |f| f.coverage)),
            diversity: folds
                .iter()
                .map(|f| f.diversity)
                .collect::<Option<Vec<_>>>()
                .map(|values| MetricSummary::over(&values)),
        };

        Ok(EvaluationReport { folds, aggregate })
    }

    fn split(&self, ratings: &[Rating]) -> Result<Vec<(Vec<Rating>, Vec<Rating>)>> {
        match self.config.strategy {
            SplitStrategy::Holdout { test_fraction } => {
                if !(test_fraction > 0.0 && test_fraction < 1.0) {
                    return Err(RecommenderError::Data(format!(
                        "holdout test fraction {test_fraction} must lie in (0, 1)"
                    )));
                }
                Ok(vec![self.stratified_holdout(ratings, test_fraction)])
            }
            SplitStrategy::KFold { folds } => {
                if folds < 2 || folds > ratings.len() {
                    return Err(RecommenderError::Data(format!(
                        "fold count {folds} must lie in [2, {}]",
                        ratings.len()
                    )));
                }
                Ok(self.k_fold(ratings, folds))
            }
            SplitStrategy::LeaveOneOut => Ok(vec![leave_one_out(ratings)]),
        }
    }

    /// Per user: shuffle, keep the first rating in train unconditionally,
    /// hold out a `test_fraction` share of the rest.
    fn stratified_holdout(
        &self,
        ratings: &[Rating],
        test_fraction: f32,
    ) -> (Vec<Rating>, Vec<Rating>) {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let by_user = group_by_user(ratings);

        let mut train = Vec::new();
        let mut test = Vec::new();

        for (_, mut indices) in by_user {
            if indices.len() < 2 {
                train.extend(indices.iter().map(|&i| ratings[i].clone()));
                continue;
            }
            indices.shuffle(&mut rng);

            let n_test = ((indices.len() as f32 * test_fraction).round() as usize)
                .clamp(1, indices.len() - 1);
            for (position, &index) in indices.iter().enumerate() {
                if position < n_test {
                    test.push(ratings[index].clone());
                } else {
                    train.push(ratings[index].clone());
                }
            }
        }

        (train, test)
    }

    fn k_fold(&self, ratings: &[Rating], folds: usize) -> Vec<(Vec<Rating>, Vec<Rating>)> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut indices: Vec<usize> = (0..ratings.len()).collect();
        indices.shuffle(&mut rng);

        let mut assignment = vec![0usize; ratings.len()];
        for (position, &index) in indices.iter().enumerate() {
            assignment[index] = position % folds;
        }

        (0..folds)
            .map(|fold| {
                let mut train = Vec::new();
                let mut test = Vec::new();
                for (index, rating) in ratings.iter().enumerate() {
                    if assignment[index] == fold {
                        test.push(rating.clone());
                    } else {
                        train.push(rating.clone());
                    }
                }
                (train, test)
            })
            .collect()
    }

    fn evaluate_fold(
        &self,
        fold: usize,
        train: &[Rating],
        test: &[Rating],
        content: &ContentIndex,
    ) -> Result<FoldMetrics> {
        let matrix = RatingMatrix::from_ratings(train, self.config.scale)?;
        let (model, _) = LatentFactorModel::train(&matrix, self.config.factorization.clone())?;

        // Rating-value accuracy over test entries the model can score.
        let mut squared = 0.0f64;
        let mut absolute = 0.0f64;
        let mut scored = 0usize;
        let mut skipped = 0usize;

        for rating in test {
            match model.predict(&rating.user_id, &rating.item_id) {
                Ok(predicted) => {
                    let err = f64::from(rating.score) - f64::from(predicted);
                    squared += err * err;
                    absolute += err.abs();
                    scored += 1;
                }
                Err(RecommenderError::UnknownEntity { .. }) => skipped += 1,
                Err(other) => return Err(other),
            }
        }

        if scored == 0 {
            return Err(RecommenderError::Data(format!(
                "fold {fold}: no test entry could be scored against the trained index"
            )));
        }

        let rmse = (squared / scored as f64).sqrt();
        let mae = absolute / scored as f64;

        // Top-K lists for every trained user feed precision/recall,
        // coverage, and diversity. Ordered maps keep float accumulation
        // order (and thus results) identical across runs.
        let k = self.config.top_k;
        let mut top_k_lists: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for user_id in model.users().ids() {
            let items = model
                .recommend(user_id, k)?
                .into_iter()
                .map(|(item_id, _)| item_id)
                .collect();
            top_k_lists.insert(user_id.as_str(), items);
        }

        let mut relevant_by_user: BTreeMap<&str, HashSet<&str>> = BTreeMap::new();
        for rating in test {
            if rating.score >= self.config.relevance_threshold {
                relevant_by_user
                    .entry(rating.user_id.as_str())
                    .or_default()
                    .insert(rating.item_id.as_str());
            }
        }

        let mut precision_sum = 0.0f64;
        let mut recall_sum = 0.0f64;
        let mut ranked_users = 0usize;
        for (user_id, relevant) in &relevant_by_user {
            let Some(recommended) = top_k_lists.get(user_id) else {
                continue;
            };
            let hits = recommended
                .iter()
                .filter(|item| relevant.contains(item.as_str()))
                .count() as f64;
            precision_sum += hits / k as f64;
            recall_sum += hits / relevant.len() as f64;
            ranked_users += 1;
        }
        let precision_at_k = if ranked_users > 0 {
            precision_sum / ranked_users as f64
        } else {
            0.0
        };
        let recall_at_k = if ranked_users > 0 {
            recall_sum / ranked_users as f64
        } else {
            0.0
        };

        let recommended_catalog: HashSet<&str> = top_k_lists
            .values()
            .flat_map(|items| items.iter().map(String::as_str))
            .collect();
        let coverage = recommended_catalog.len() as f64 / model.n_items() as f64;

        let diversity = intra_list_diversity(&top_k_lists, content);

        Ok(FoldMetrics {
            fold,
            n_train: train.len(),
            n_test: test.len(),
            skipped_predictions: skipped,
            rmse,
            mae,
            precision_at_k,
            recall_at_k,
            coverage,
            diversity,
        })
    }
}

/// Mean pairwise content dissimilarity within each user's list, averaged
/// over users with at least two metadata-covered items.
fn intra_list_diversity(
    top_k_lists: &BTreeMap<&str, Vec<String>>,
    content: &ContentIndex,
) -> Option<f64> {
    if content.is_empty() {
        return None;
    }

    let mut user_sum = 0.0f64;
    let mut users = 0usize;

    for items in top_k_lists.values() {
        let covered: Vec<&String> = items.iter().filter(|i| content.contains(i)).collect();
        if covered.len() < 2 {
            continue;
        }

        let mut pair_sum = 0.0f64;
        let mut pairs = 0usize;
        for a in 0..covered.len() {
            for b in (a + 1)..covered.len() {
                if let Some(similarity) = content.similarity(covered[a], covered[b]) {
                    pair_sum += 1.0 - f64::from(similarity);
                    pairs += 1;
                }
            }
        }
        if pairs > 0 {
            user_sum += pair_sum / pairs as f64;
            users += 1;
        }
    }

    if users > 0 {
        Some(user_sum / users as f64)
    } else {
        None
    }
}

/// Hold out each user's most recent rating (ties resolved by input order),
/// keeping single-rating users entirely in train.
fn leave_one_out(ratings: &[Rating]) -> (Vec<Rating>, Vec<Rating>) {
    let by_user = group_by_user(ratings);

    let mut held_out: HashSet<usize> = HashSet::new();
    for (_, indices) in &by_user {
        if indices.len() < 2 {
            continue;
        }
        let most_recent = indices
            .iter()
            .copied()
            .max_by_key(|&i| (ratings[i].timestamp, i));
        if let Some(index) = most_recent {
            held_out.insert(index);
        }
    }

    let mut train = Vec::new();
    let mut test = Vec::new();
    for (index, rating) in ratings.iter().enumerate() {
        if held_out.contains(&index) {
            test.push(rating.clone());
        } else {
            train.push(rating.clone());
        }
    }
    (train, test)
}

/// Rating indices grouped per user, in deterministic first-appearance order.
fn group_by_user(ratings: &[Rating]) -> Vec<(&str, Vec<usize>)> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, rating) in ratings.iter().enumerate() {
        let entry = groups.entry(rating.user_id.as_str()).or_default();
        if entry.is_empty() {
            order.push(rating.user_id.as_str());
        }
        entry.push(index);
    }
    order
        .into_iter()
        .map(|user| {
            let indices = groups.remove(user).unwrap_or_default();
            (user, indices)
        })
        .collect()
}

fn collect(folds: &[FoldMetrics], metric: impl Fn(&FoldMetrics) -> f64) -> Vec<f64> {
    folds.iter().map(metric).collect()
}
