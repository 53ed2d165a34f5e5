//! End-to-end training run: read, build features, split, fit, evaluate, save

use crate::config::TrainingConfig;
use crate::data_source::{DataSource, DataSourceError};
use crate::feature_builder::FeatureBuilder;
use crate::models::logistic::{LinearModel, LogisticRegression, LogisticRegressionConfig};
use crate::models::{
    Model, ModelError, ModelInputError, ModelManifest, ModelStore, StoreError, TrainError, Trainer,
};
use crate::pipeline::{PredictionPipeline, DECISION_THRESHOLD};
use crate::types::{DropCounts, FeatureTable, Mode};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// Probabilities are clipped this far from 0 and 1 before taking logs.
const LOG_LOSS_EPS: f64 = 1e-15;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("training data has no outcome labels")]
    MissingTarget,
    #[error("no rows left after data quality filtering ({0:?})")]
    EmptyTrainingSet(DropCounts),
    #[error(transparent)]
    DataSource(#[from] DataSourceError),
    #[error(transparent)]
    Train(#[from] TrainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("holdout evaluation failed: {0}")]
    Evaluation(#[from] ModelError),
}

impl From<ModelInputError> for TrainingError {
    fn from(err: ModelInputError) -> Self {
        TrainingError::Evaluation(ModelError::Input(err))
    }
}

/// Scores of the fitted model on the held-out rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldoutMetrics {
    pub rows: usize,
    pub accuracy: f64,
    pub log_loss: f64,
    /// Observed no-show rate in the holdout
    pub positive_rate: f64,
    /// Share of holdout rows predicted as likely no-show
    pub predicted_positive_rate: f64,
}

/// Summary of one training run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub source: String,
    pub model_name: String,
    pub records_read: usize,
    pub dropped: DropCounts,
    pub parse_issues: usize,
    pub train_rows: usize,
    pub train_positive_rate: f64,
    /// `None` when the split left no rows to hold out
    pub holdout: Option<HoldoutMetrics>,
}

/// Output of a successful run.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub model: LinearModel,
    pub report: TrainingReport,
}

/// Settings for one training run.
#[derive(Debug, Clone)]
pub struct TrainingRun {
    model_name: String,
    test_size: f64,
    seed: u64,
    trainer: LogisticRegression,
    builder: FeatureBuilder,
}

impl TrainingRun {
    pub fn new(
        model_name: &str,
        test_size: f64,
        seed: u64,
        logistic: LogisticRegressionConfig,
    ) -> Self {
        Self {
            model_name: model_name.to_string(),
            test_size: test_size.clamp(0.0, 1.0),
            seed,
            trainer: LogisticRegression::new(logistic),
            builder: FeatureBuilder::new(),
        }
    }

    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(
            &config.model_name,
            config.test_size,
            config.seed,
            config.logistic.clone(),
        )
    }

    /// Run training and save the model through `store`.
    ///
    /// Nothing is saved unless every step succeeds.
    pub fn execute(
        &self,
        source: &dyn DataSource,
        store: &dyn ModelStore,
    ) -> Result<TrainedModel, TrainingError> {
        let records = source.read()?;
        info!(source = %source.describe(), records = records.len(), "Starting training run");

        let mut table = self.builder.build(&records, Mode::Training);
        let target = table.drop_target().ok_or(TrainingError::MissingTarget)?;

        if table.dropped.total() > 0 {
            warn!(
                age_out_of_range = table.dropped.age_out_of_range,
                negative_lead_time = table.dropped.negative_lead_time,
                missing_lead_time = table.dropped.missing_lead_time,
                "Rows dropped by data quality filters"
            );
        }
        if table.is_empty() {
            return Err(TrainingError::EmptyTrainingSet(table.dropped));
        }

        let (train_idx, test_idx) = stratified_split(&target, self.test_size, self.seed);
        let train = table.subset(&train_idx);
        let train_target: Vec<bool> = train_idx.iter().map(|&i| target[i]).collect();

        info!(
            train_rows = train_idx.len(),
            holdout_rows = test_idx.len(),
            seed = self.seed,
            "Holdout split"
        );

        let model = self.trainer.fit(&train, &train_target)?;

        let holdout = if test_idx.is_empty() {
            None
        } else {
            let test = table.subset(&test_idx);
            let test_target: Vec<bool> = test_idx.iter().map(|&i| target[i]).collect();
            Some(evaluate(&model, &test, &test_target)?)
        };

        store.save(
            &self.model_name,
            &ModelManifest::LogisticRegression(model.clone()),
        )?;

        let report = TrainingReport {
            source: source.describe(),
            model_name: self.model_name.clone(),
            records_read: records.len(),
            dropped: table.dropped,
            parse_issues: table.parse_issues.len(),
            train_rows: train_idx.len(),
            train_positive_rate: positive_rate(&train_target),
            holdout,
        };

        if let Some(metrics) = &report.holdout {
            info!(
                accuracy = metrics.accuracy,
                log_loss = metrics.log_loss,
                positive_rate = metrics.positive_rate,
                "Holdout evaluation"
            );
        }

        Ok(TrainedModel { model, report })
    }
}

/// Split row indices into (train, test), stratified by class.
///
/// Each class contributes `round(len * test_size)` rows to the test side,
/// but always keeps at least one row in training.
pub fn stratified_split(target: &[bool], test_size: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(target.len());
    let mut test = Vec::new();

    for class in [false, true] {
        let mut members: Vec<usize> = (0..target.len()).filter(|&i| target[i] == class).collect();
        if members.is_empty() {
            continue;
        }
        members.shuffle(&mut rng);

        let n_test = ((members.len() as f64 * test_size).round() as usize)
            .min(members.len() - 1);
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

fn evaluate(
    model: &dyn Model,
    table: &FeatureTable,
    target: &[bool],
) -> Result<HoldoutMetrics, TrainingError> {
    let mut correct = 0;
    let mut predicted_positive = 0;
    let mut loss = 0.0;

    for (vector, &actual) in table.rows.iter().zip(target) {
        let row = PredictionPipeline::align(&vector.to_row(), model.feature_names())?;
        let p = model.predict_probability(&row)?;

        let predicted = p >= DECISION_THRESHOLD;
        if predicted {
            predicted_positive += 1;
        }
        if predicted == actual {
            correct += 1;
        }

        let p = p.clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS);
        loss -= if actual { p.ln() } else { (1.0 - p).ln() };
    }

    let n = target.len() as f64;
    Ok(HoldoutMetrics {
        rows: target.len(),
        accuracy: correct as f64 / n,
        log_loss: loss / n,
        positive_rate: positive_rate(target),
        predicted_positive_rate: predicted_positive as f64 / n,
    })
}

fn positive_rate(target: &[bool]) -> f64 {
    if target.is_empty() {
        return 0.0;
    }
    target.iter().filter(|&&y| y).count() as f64 / target.len() as f64
}
