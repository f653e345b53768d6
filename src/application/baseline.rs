//! Baseline classifier over the cohort feature table.
//!
//! Logistic regression on standardized numeric columns plus one-hot
//! categorical levels, fitted by batch gradient descent on a seeded,
//! stratified train/test split. The held-out split is scored with AUROC,
//! AUPRC, accuracy, F1 and Brier score.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::domain::{CohortRecord, FeatureValue};
use crate::ports::{FeatureStore, COHORT_TABLE};
use crate::TwinError;

/// Default file name of the metrics JSON.
pub const METRICS_FILE: &str = "metrics.json";

/// Fewest cohort rows a train/test evaluation accepts.
pub const MIN_ROWS: usize = 10;

const DECISION_THRESHOLD: f64 = 0.5;

/// Error type for baseline training.
#[derive(Debug, thiserror::Error)]
pub enum BaselineError {
    #[error("Dataset too small for train/test evaluation: {0} rows")]
    TooSmall(usize),

    #[error("Each outcome class needs at least two rows (positives {positives}, negatives {negatives})")]
    SingleClass { positives: usize, negatives: usize },

    #[error("Invalid baseline configuration: {0}")]
    Config(String),
}

/// Training parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineConfig {
    pub seed: u64,
    /// Share of each class held out for testing
    pub test_fraction: f64,
    pub epochs: usize,
    pub learning_rate: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            test_fraction: 0.2,
            epochs: 300,
            learning_rate: 0.1,
        }
    }
}

impl BaselineConfig {
    /// # Errors
    /// Returns `BaselineError::Config` for a test fraction outside (0, 0.5],
    /// zero epochs or a non-positive learning rate.
    pub fn validate(&self) -> Result<(), BaselineError> {
        if !(self.test_fraction > 0.0 && self.test_fraction <= 0.5) {
            return Err(BaselineError::Config(format!(
                "test_fraction {} must be in (0, 0.5]",
                self.test_fraction
            )));
        }
        if self.epochs == 0 {
            return Err(BaselineError::Config("epochs must be at least 1".to_string()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(BaselineError::Config(format!(
                "learning_rate {} must be positive",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Held-out evaluation of the baseline model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineMetrics {
    pub auroc: f64,
    pub auprc: f64,
    pub accuracy: f64,
    pub f1: f64,
    pub brier_score: f64,
    pub train_rows: usize,
    pub test_rows: usize,
}

/// Split row indices into (train, test), holding out `test_fraction` of
/// each class (at least one row per class). Both lists are ascending.
#[must_use]
pub fn stratified_split(targets: &[u8], test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut positives: Vec<usize> = (0..targets.len()).filter(|&i| targets[i] == 1).collect();
    let mut negatives: Vec<usize> = (0..targets.len()).filter(|&i| targets[i] != 1).collect();
    positives.shuffle(&mut rng);
    negatives.shuffle(&mut rng);

    let held_out = |n: usize| ((n as f64 * test_fraction) as usize).max(1).min(n);
    let mut test: Vec<usize> = positives[..held_out(positives.len())]
        .iter()
        .chain(&negatives[..held_out(negatives.len())])
        .copied()
        .collect();
    test.sort_unstable();

    let held: BTreeSet<usize> = test.iter().copied().collect();
    let train = (0..targets.len()).filter(|i| !held.contains(i)).collect();
    (train, test)
}

#[derive(Debug, Clone, PartialEq)]
struct NumericColumn {
    name: String,
    mean: f64,
    std: f64,
}

/// Design-matrix encoder fitted on the training rows.
///
/// Row layout: bias, standardized numeric columns, then one indicator per
/// categorical level. Missing numbers take the training mean; unseen levels
/// encode as all zeros.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureEncoder {
    numeric: Vec<NumericColumn>,
    levels: BTreeMap<String, Vec<String>>,
}

impl FeatureEncoder {
    #[must_use]
    pub fn fit(rows: &[&CohortRecord]) -> Self {
        let mut numeric = Vec::new();
        let mut levels = BTreeMap::new();
        let Some(first) = rows.first() else {
            return Self { numeric, levels };
        };

        for (name, value) in &first.features {
            match value {
                FeatureValue::Number(_) => {
                    let values: Vec<f64> = rows
                        .iter()
                        .filter_map(|r| r.number(name))
                        .filter(|v| v.is_finite())
                        .collect();
                    let n = values.len().max(1) as f64;
                    let mean = values.iter().sum::<f64>() / n;
                    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                    let std = if var.sqrt() > 1e-12 { var.sqrt() } else { 1.0 };
                    numeric.push(NumericColumn {
                        name: name.clone(),
                        mean,
                        std,
                    });
                }
                FeatureValue::Text(_) => {
                    let seen: BTreeSet<String> = rows
                        .iter()
                        .filter_map(|r| r.features.get(name))
                        .map(ToString::to_string)
                        .collect();
                    levels.insert(name.clone(), seen.into_iter().collect());
                }
            }
        }
        Self { numeric, levels }
    }

    /// Encoded row length, bias included.
    #[must_use]
    pub fn width(&self) -> usize {
        1 + self.numeric.len() + self.levels.values().map(Vec::len).sum::<usize>()
    }

    #[must_use]
    pub fn encode(&self, record: &CohortRecord) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.width());
        row.push(1.0);
        for col in &self.numeric {
            let value = record
                .number(&col.name)
                .filter(|v| v.is_finite())
                .unwrap_or(col.mean);
            row.push((value - col.mean) / col.std);
        }
        for (name, levels) in &self.levels {
            let value = record.features.get(name).map(ToString::to_string);
            row.extend(
                levels
                    .iter()
                    .map(|level| f64::from(u8::from(value.as_deref() == Some(level.as_str())))),
            );
        }
        row
    }
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

/// Logistic regression weights over an encoded row (bias first).
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticModel {
    weights: Vec<f64>,
}

impl LogisticModel {
    /// Fit by full-batch gradient descent from zero weights.
    #[must_use]
    pub fn fit(rows: &[Vec<f64>], targets: &[u8], epochs: usize, learning_rate: f64) -> Self {
        let width = rows.first().map_or(0, Vec::len);
        let mut weights = vec![0.0; width];
        let n = rows.len().max(1) as f64;

        for _ in 0..epochs {
            let mut grad = vec![0.0; width];
            for (row, &target) in rows.iter().zip(targets) {
                let err = sigmoid(dot(&weights, row)) - f64::from(target);
                for (g, x) in grad.iter_mut().zip(row) {
                    *g += err * x;
                }
            }
            for (w, g) in weights.iter_mut().zip(&grad) {
                *w -= learning_rate * g / n;
            }
        }
        Self { weights }
    }

    #[must_use]
    pub fn predict(&self, row: &[f64]) -> f64 {
        sigmoid(dot(&self.weights, row))
    }

    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Indices ordered by descending score, grouped into runs of equal score.
fn score_groups(scores: &[f64]) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut groups: Vec<Vec<usize>> = Vec::new();
    for idx in order {
        match groups.last_mut() {
            Some(group) if scores[group[0]] == scores[idx] => group.push(idx),
            _ => groups.push(vec![idx]),
        }
    }
    groups
}

/// Area under the ROC curve (trapezoidal, ties share one step).
///
/// Returns 0.0 when either class is absent.
#[must_use]
pub fn auroc(targets: &[u8], scores: &[f64]) -> f64 {
    let pos = targets.iter().filter(|&&t| t == 1).count() as f64;
    let neg = targets.len() as f64 - pos;
    if pos == 0.0 || neg == 0.0 {
        return 0.0;
    }

    let (mut tp, mut fp) = (0.0, 0.0);
    let (mut prev_tpr, mut prev_fpr) = (0.0, 0.0);
    let mut area = 0.0;
    for group in score_groups(scores) {
        for idx in group {
            if targets[idx] == 1 {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
        }
        let (tpr, fpr) = (tp / pos, fp / neg);
        area += (fpr - prev_fpr) * (tpr + prev_tpr) / 2.0;
        prev_tpr = tpr;
        prev_fpr = fpr;
    }
    area
}

/// Area under the precision-recall curve (step-wise average precision).
///
/// Returns 0.0 when there are no positives.
#[must_use]
pub fn auprc(targets: &[u8], scores: &[f64]) -> f64 {
    let pos = targets.iter().filter(|&&t| t == 1).count() as f64;
    if pos == 0.0 {
        return 0.0;
    }

    let (mut tp, mut fp) = (0.0, 0.0);
    let mut prev_recall = 0.0;
    let mut area = 0.0;
    for group in score_groups(scores) {
        for idx in group {
            if targets[idx] == 1 {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
        }
        let recall = tp / pos;
        area += (recall - prev_recall) * tp / (tp + fp);
        prev_recall = recall;
    }
    area
}

fn predicted(scores: &[f64]) -> impl Iterator<Item = u8> + '_ {
    scores.iter().map(|&s| u8::from(s >= DECISION_THRESHOLD))
}

#[must_use]
pub fn accuracy(targets: &[u8], scores: &[f64]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let hits = targets.iter().zip(predicted(scores)).filter(|(t, p)| **t == *p).count();
    hits as f64 / targets.len() as f64
}

/// F1 at the 0.5 threshold; 0.0 without true positives.
#[must_use]
pub fn f1_score(targets: &[u8], scores: &[f64]) -> f64 {
    let (mut tp, mut fp, mut fn_) = (0.0, 0.0, 0.0);
    for (&t, p) in targets.iter().zip(predicted(scores)) {
        match (t, p) {
            (1, 1) => tp += 1.0,
            (0, 1) => fp += 1.0,
            (1, 0) => fn_ += 1.0,
            _ => {}
        }
    }
    if tp == 0.0 {
        return 0.0;
    }
    let precision = tp / (tp + fp);
    let recall = tp / (tp + fn_);
    2.0 * precision * recall / (precision + recall)
}

#[must_use]
pub fn brier_score(targets: &[u8], scores: &[f64]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let total: f64 = targets
        .iter()
        .zip(scores)
        .map(|(&t, &s)| (f64::from(t) - s).powi(2))
        .sum();
    total / targets.len() as f64
}

/// Train on a stratified split of `records` and score the held-out rows.
///
/// # Errors
/// Returns error for fewer than `MIN_ROWS` rows, a class with fewer than
/// two rows, or an invalid config.
pub fn train_and_evaluate(
    records: &[CohortRecord],
    config: &BaselineConfig,
) -> Result<BaselineMetrics, BaselineError> {
    config.validate()?;
    if records.len() < MIN_ROWS {
        return Err(BaselineError::TooSmall(records.len()));
    }
    let targets: Vec<u8> = records.iter().map(|r| u8::from(r.target != 0)).collect();
    let positives = targets.iter().filter(|&&t| t == 1).count();
    let negatives = targets.len() - positives;
    if positives < 2 || negatives < 2 {
        return Err(BaselineError::SingleClass { positives, negatives });
    }

    let (train_idx, test_idx) = stratified_split(&targets, config.test_fraction, config.seed);
    let train: Vec<&CohortRecord> = train_idx.iter().map(|&i| &records[i]).collect();
    let encoder = FeatureEncoder::fit(&train);

    let x_train: Vec<Vec<f64>> = train.iter().map(|r| encoder.encode(r)).collect();
    let y_train: Vec<u8> = train_idx.iter().map(|&i| targets[i]).collect();
    let model = LogisticModel::fit(&x_train, &y_train, config.epochs, config.learning_rate);

    let y_test: Vec<u8> = test_idx.iter().map(|&i| targets[i]).collect();
    let scores: Vec<f64> = test_idx
        .iter()
        .map(|&i| model.predict(&encoder.encode(&records[i])))
        .collect();

    tracing::debug!(
        "Baseline fitted: {} train rows, {} encoded columns",
        train_idx.len(),
        encoder.width()
    );

    Ok(BaselineMetrics {
        auroc: auroc(&y_test, &scores),
        auprc: auprc(&y_test, &scores),
        accuracy: accuracy(&y_test, &scores),
        f1: f1_score(&y_test, &scores),
        brier_score: brier_score(&y_test, &scores),
        train_rows: train_idx.len(),
        test_rows: test_idx.len(),
    })
}

/// Train on the stored cohort table and write the metrics JSON.
///
/// # Errors
/// Returns error if the cohort cannot be loaded, training fails or the
/// metrics file cannot be written.
pub fn run_baseline<F>(
    store: &F,
    config: &BaselineConfig,
    metrics_path: &Path,
) -> Result<BaselineMetrics, TwinError>
where
    F: FeatureStore,
    F::Error: Into<TwinError>,
{
    let records = store.load_table(COHORT_TABLE).map_err(Into::into)?;
    let metrics = train_and_evaluate(&records, config)?;

    if let Some(parent) = metrics_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(metrics_path, serde_json::to_string_pretty(&metrics)?)?;

    tracing::info!(
        "Baseline AUROC {:.4}, AUPRC {:.4}, Brier {:.4} on {} held-out rows",
        metrics.auroc,
        metrics.auprc,
        metrics.brier_score,
        metrics.test_rows
    );
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::SqliteFeatureStore;
    use crate::adapters::uci::{load_uci_str, MINI_CSV};

    fn record(id: usize, x: f64, group: &str, target: u8) -> CohortRecord {
        CohortRecord {
            patient_id: format!("pid_{id:016x}"),
            features: BTreeMap::from([
                ("x".to_string(), FeatureValue::Number(x)),
                ("group".to_string(), FeatureValue::Text(group.to_string())),
            ]),
            target,
        }
    }

    /// 40 rows where `x` separates the classes and `group` is noise.
    fn separable() -> Vec<CohortRecord> {
        (0..40)
            .map(|i| {
                let target = u8::from(i % 2 == 0);
                let x = if target == 1 { 5.0 + i as f64 * 0.1 } else { -5.0 - i as f64 * 0.1 };
                let group = if i % 3 == 0 { "a" } else { "b" };
                record(i, x, group, target)
            })
            .collect()
    }

    #[test]
    fn test_split_is_stratified_and_deterministic() {
        let targets: Vec<u8> = (0..50).map(|i| u8::from(i % 5 == 0)).collect();
        let (train, test) = stratified_split(&targets, 0.2, 42);

        assert_eq!(train.len() + test.len(), 50);
        assert!(train.iter().all(|i| !test.contains(i)));
        // 10 positives, 40 negatives
        assert_eq!(test.iter().filter(|&&i| targets[i] == 1).count(), 2);
        assert_eq!(test.iter().filter(|&&i| targets[i] == 0).count(), 8);

        assert_eq!(stratified_split(&targets, 0.2, 42), (train, test.clone()));
        assert_ne!(stratified_split(&targets, 0.2, 7).1, test);
    }

    #[test]
    fn test_split_holds_out_at_least_one_per_class() {
        let targets = [1, 1, 0, 0, 0];
        let (train, test) = stratified_split(&targets, 0.2, 1);
        assert_eq!(test.len(), 2);
        assert!(train.iter().any(|&i| targets[i] == 1));
        assert!(train.iter().any(|&i| targets[i] == 0));
    }

    #[test]
    fn test_encoder_layout() {
        let rows = separable();
        let refs: Vec<&CohortRecord> = rows.iter().collect();
        let encoder = FeatureEncoder::fit(&refs);
        // bias + x + group levels a, b
        assert_eq!(encoder.width(), 4);

        let encoded = encoder.encode(&record(99, 0.0, "a", 0));
        assert_eq!(encoded.len(), 4);
        assert!((encoded[0] - 1.0).abs() < f64::EPSILON);
        assert_eq!(&encoded[2..], &[1.0, 0.0]);

        let unseen = encoder.encode(&record(100, 0.0, "zzz", 0));
        assert_eq!(&unseen[2..], &[0.0, 0.0]);
    }

    #[test]
    fn test_ranking_metrics() {
        let y = [1, 1, 0, 0];
        assert!((auroc(&y, &[0.9, 0.8, 0.3, 0.1]) - 1.0).abs() < 1e-12);
        assert!(auroc(&y, &[0.1, 0.2, 0.8, 0.9]).abs() < 1e-12);
        assert!((auroc(&y, &[0.5; 4]) - 0.5).abs() < 1e-12);
        assert!((auprc(&y, &[0.9, 0.8, 0.3, 0.1]) - 1.0).abs() < 1e-12);
        assert_eq!(auroc(&[1, 1], &[0.2, 0.3]), 0.0);
    }

    #[test]
    fn test_threshold_metrics() {
        let y = [1, 0];
        assert!((brier_score(&y, &[0.8, 0.4]) - 0.1).abs() < 1e-12);
        assert!((accuracy(&y, &[0.8, 0.4]) - 1.0).abs() < 1e-12);
        assert!((f1_score(&y, &[0.8, 0.4]) - 1.0).abs() < 1e-12);
        assert_eq!(f1_score(&y, &[0.2, 0.9]), 0.0);
    }

    #[test]
    fn test_separable_cohort_scores_well() {
        let metrics = train_and_evaluate(&separable(), &BaselineConfig::default()).expect("Should train");
        assert_eq!(metrics.train_rows + metrics.test_rows, 40);
        assert!(metrics.auroc > 0.9);
        assert!(metrics.accuracy >= 0.75);
        assert!(metrics.brier_score < 0.25);
    }

    #[test]
    fn test_same_seed_same_metrics() {
        let records = load_uci_str(MINI_CSV).expect("Should load");
        let config = BaselineConfig::default();
        let a = train_and_evaluate(&records, &config).expect("Should train");
        let b = train_and_evaluate(&records, &config).expect("Should train");
        assert_eq!(a, b);
        for value in [a.auroc, a.auprc, a.accuracy, a.f1, a.brier_score] {
            assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn test_rejects_small_or_single_class_cohorts() {
        let rows = separable();
        assert!(matches!(
            train_and_evaluate(&rows[..5], &BaselineConfig::default()),
            Err(BaselineError::TooSmall(5))
        ));

        let one_class: Vec<CohortRecord> = rows.into_iter().filter(|r| r.target == 0).collect();
        assert!(matches!(
            train_and_evaluate(&one_class, &BaselineConfig::default()),
            Err(BaselineError::SingleClass { positives: 0, .. })
        ));

        let config = BaselineConfig {
            test_fraction: 0.9,
            ..BaselineConfig::default()
        };
        assert!(matches!(
            train_and_evaluate(&separable(), &config),
            Err(BaselineError::Config(_))
        ));
    }

    #[test]
    fn test_run_baseline_writes_metrics() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let store = SqliteFeatureStore::in_memory().expect("Should create store");
        store
            .save_table(COHORT_TABLE, &load_uci_str(MINI_CSV).expect("Should load"))
            .expect("Should save");

        let path = dir.path().join("reports").join(METRICS_FILE);
        let metrics = run_baseline(&store, &BaselineConfig::default(), &path).expect("Should run");

        let text = std::fs::read_to_string(&path).expect("Should read");
        let parsed: BaselineMetrics = serde_json::from_str(&text).expect("Should parse");
        assert_eq!(parsed, metrics);
        assert!(text.contains("\"brier_score\""));
    }

    #[test]
    fn test_run_baseline_without_cohort_fails() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let store = SqliteFeatureStore::in_memory().expect("Should create store");
        let result = run_baseline(&store, &BaselineConfig::default(), &dir.path().join(METRICS_FILE));
        assert!(result.is_err());
    }
}
