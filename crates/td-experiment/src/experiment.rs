//! The experiment aggregate: search space, optimization config, trials and
//! their observed data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use td_types::{
    ExperimentError, Metric, MetricIntent, Parameterization, ProblemConfig,
    SearchSpace, TdResult, TrialError, TrialKind, TrialStatus, validation_error,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::arm::{arm_name, signature_of, Arm};
use crate::data::{Data, DataRow};
use crate::generator_run::GeneratorRun;
use crate::trial::Trial;

pub type ExperimentId = Uuid;

/// Name given to the status quo arm.
pub const STATUS_QUO_ARM_NAME: &str = "status_quo";

/// One row of [`Experiment::to_table`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSummary {
    pub trial_index: usize,
    pub arm_name: String,
    pub trial_status: TrialStatus,
    pub generation_node: Option<String>,
    pub parameters: Parameterization,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    id: ExperimentId,
    name: String,
    search_space: SearchSpace,
    optimization_config: Option<ProblemConfig>,
    #[serde(default)]
    tracking_metrics: Vec<Metric>,
    #[serde(default)]
    status_quo: Option<Arm>,
    #[serde(default)]
    trials: Vec<Trial>,
    #[serde(default)]
    data: BTreeMap<usize, Data>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    db_id: Option<i64>,
}

impl Experiment {
    pub fn new(name: impl Into<String>, search_space: SearchSpace) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            search_space,
            optimization_config: None,
            tracking_metrics: Vec::new(),
            status_quo: None,
            trials: Vec::new(),
            data: BTreeMap::new(),
            created_at: Utc::now(),
            db_id: None,
        }
    }

    pub fn with_optimization_config(mut self, config: impl Into<ProblemConfig>) -> TdResult<Self> {
        self.set_optimization_config(config)?;
        Ok(self)
    }

    pub fn with_status_quo(mut self, parameters: Parameterization) -> TdResult<Self> {
        self.set_status_quo(parameters)?;
        Ok(self)
    }

    pub fn with_tracking_metric(mut self, metric: Metric) -> Self {
        self.tracking_metrics.push(metric);
        self
    }

    /// Relative constraints and thresholds need a status quo to resolve.
    pub fn set_optimization_config(&mut self, config: impl Into<ProblemConfig>) -> TdResult<()> {
        let config = config.into();
        if self.status_quo.is_none() {
            if let Some(metric) = config.first_relative_metric() {
                return Err(ExperimentError::RelativeConstraintWithoutStatusQuo {
                    metric: metric.to_string(),
                }
                .into());
            }
        }
        self.optimization_config = Some(config);
        Ok(())
    }

    pub fn set_status_quo(&mut self, parameters: Parameterization) -> TdResult<()> {
        self.search_space
            .validate_membership(&parameters)
            .map_err(|e| ExperimentError::StatusQuoOutsideSearchSpace {
                reason: e.to_string(),
            })?;
        let parameters = self.search_space.cast(&parameters)?;
        self.status_quo = Some(Arm::new(STATUS_QUO_ARM_NAME, parameters));
        Ok(())
    }

    pub fn id(&self) -> ExperimentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn search_space(&self) -> &SearchSpace {
        &self.search_space
    }

    pub fn optimization_config(&self) -> Option<&ProblemConfig> {
        self.optimization_config.as_ref()
    }

    pub fn tracking_metrics(&self) -> &[Metric] {
        &self.tracking_metrics
    }

    pub fn status_quo(&self) -> Option<&Arm> {
        self.status_quo.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn db_id(&self) -> Option<i64> {
        self.db_id
    }

    pub fn set_db_id(&mut self, db_id: Option<i64>) {
        self.db_id = db_id;
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn num_trials(&self) -> usize {
        self.trials.len()
    }

    pub fn trial(&self, index: usize) -> Result<&Trial, TrialError> {
        self.trials.get(index).ok_or(TrialError::NotFound { index })
    }

    pub fn trial_mut(&mut self, index: usize) -> Result<&mut Trial, TrialError> {
        self.trials.get_mut(index).ok_or(TrialError::NotFound { index })
    }

    pub fn trial_indices_with_status(&self, status: TrialStatus) -> Vec<usize> {
        let now = Utc::now();
        self.trials
            .iter()
            .filter(|t| t.status_at(now) == status)
            .map(Trial::index)
            .collect()
    }

    /// Config metrics followed by tracking metrics.
    pub fn metrics(&self) -> BTreeMap<String, Metric> {
        let mut metrics = self
            .optimization_config
            .as_ref()
            .map(ProblemConfig::metrics)
            .unwrap_or_default();
        for m in &self.tracking_metrics {
            metrics.entry(m.name.clone()).or_insert_with(|| m.clone());
        }
        metrics
    }

    pub fn metric_intents(&self) -> Vec<(Metric, MetricIntent)> {
        let mut intents = self
            .optimization_config
            .as_ref()
            .map(ProblemConfig::intents)
            .unwrap_or_default();
        intents.extend(
            self.tracking_metrics
                .iter()
                .map(|m| (m.clone(), MetricIntent::Tracking)),
        );
        intents
    }

    fn existing_arm_name(&self, parameters: &Parameterization) -> Option<String> {
        let signature = signature_of(parameters);
        self.status_quo
            .iter()
            .chain(self.trials.iter().flat_map(|t| t.arms().iter()))
            .find(|arm| arm.signature() == signature)
            .map(|arm| arm.name.clone())
    }

    /// Validate and name the arms of `run` for trial `trial_index`, starting
    /// at arm position `offset`. Known parameterizations keep their name.
    fn build_arms(
        &self,
        trial_index: usize,
        offset: usize,
        run: &GeneratorRun,
    ) -> TdResult<Vec<Arm>> {
        let mut arms: Vec<Arm> = Vec::with_capacity(run.len());
        for (position, parameters) in run.parameterizations.iter().enumerate() {
            self.search_space.validate_membership(parameters)?;
            let parameters = self.search_space.cast(parameters)?;
            let name = self
                .existing_arm_name(&parameters)
                .or_else(|| {
                    let signature = signature_of(&parameters);
                    arms.iter()
                        .find(|a| a.signature() == signature)
                        .map(|a| a.name.clone())
                })
                .unwrap_or_else(|| arm_name(trial_index, offset + position));
            arms.push(Arm::new(name, parameters));
        }
        Ok(arms)
    }

    /// Create a single-arm trial from a run holding one parameterization.
    pub fn new_trial(&mut self, run: GeneratorRun, ttl_seconds: Option<i64>) -> TdResult<usize> {
        if run.len() != 1 {
            return Err(TrialError::TooManyArms {
                index: self.trials.len(),
                arms: run.len(),
            }
            .into());
        }
        self.push_trial(TrialKind::Single, vec![run], ttl_seconds)
    }

    pub fn new_batch_trial(
        &mut self,
        runs: Vec<GeneratorRun>,
        ttl_seconds: Option<i64>,
    ) -> TdResult<usize> {
        self.push_trial(TrialKind::Batch, runs, ttl_seconds)
    }

    fn push_trial(
        &mut self,
        kind: TrialKind,
        runs: Vec<GeneratorRun>,
        ttl_seconds: Option<i64>,
    ) -> TdResult<usize> {
        if let Some(ttl) = ttl_seconds.filter(|&t| t <= 0) {
            return Err(validation_error!("trial TTL must be positive, got {} seconds", ttl));
        }
        let index = self.trials.len();
        let mut trial = Trial::new(index, kind).with_ttl_seconds(ttl_seconds);
        for run in runs {
            let arms = self.build_arms(index, trial.arms().len(), &run)?;
            trial.add_generator_run(run, arms)?;
        }
        debug!(trial = index, arms = trial.arms().len(), "Created trial");
        self.trials.push(trial);
        Ok(index)
    }

    /// Create and start a trial from hand-picked parameterizations.
    ///
    /// Returns the arms by name and the new trial's index.
    pub fn attach_trial(
        &mut self,
        parameterizations: Vec<Parameterization>,
        ttl_seconds: Option<i64>,
    ) -> TdResult<(BTreeMap<String, Parameterization>, usize)> {
        let kind = if parameterizations.len() == 1 {
            TrialKind::Single
        } else {
            TrialKind::Batch
        };
        let run = GeneratorRun::manual(parameterizations);
        let index = self.push_trial(kind, vec![run], ttl_seconds)?;
        self.mark_trial_running(index)?;
        let trial = self.trial(index)?;
        let arms = trial
            .arms()
            .iter()
            .map(|a| (a.name.clone(), a.parameters.clone()))
            .collect();
        Ok((arms, index))
    }

    pub fn stage_trial(&mut self, index: usize) -> TdResult<()> {
        self.trial_mut(index)?.mark_staged()?;
        Ok(())
    }

    pub fn mark_trial_running(&mut self, index: usize) -> TdResult<()> {
        self.trial_mut(index)?.mark_running()?;
        Ok(())
    }

    /// Attach data to a trial that still expects it.
    pub fn attach_data(&mut self, index: usize, data: Data) -> TdResult<()> {
        let trial = self.trial_mut(index)?;
        trial.expire_if_stale(Utc::now());
        let status = trial.recorded_status();
        if status.is_terminal() {
            return Err(TrialError::TerminalTrial { index, status }.into());
        }
        self.merge_data(index, data);
        Ok(())
    }

    /// Replace observations of a running, completed or early-stopped trial.
    pub fn update_trial_data(&mut self, index: usize, data: Data) -> TdResult<()> {
        let trial = self.trial_mut(index)?;
        trial.expire_if_stale(Utc::now());
        let status = trial.recorded_status();
        match status {
            TrialStatus::Running | TrialStatus::Completed | TrialStatus::EarlyStopped => {
                self.merge_data(index, data);
                Ok(())
            }
            TrialStatus::Failed | TrialStatus::Abandoned => {
                Err(TrialError::TerminalTrial { index, status }.into())
            }
            TrialStatus::Candidate | TrialStatus::Staged => Err(TrialError::UnsupportedTransition {
                index,
                from: status,
                to: TrialStatus::Running,
            }
            .into()),
        }
    }

    /// New rows replace earlier rows for the same arm and metric.
    fn merge_data(&mut self, index: usize, data: Data) {
        let incoming = data.with_trial_index(index);
        let existing = self.data.remove(&index).unwrap_or_default();
        let mut rows: Vec<DataRow> = existing
            .rows()
            .iter()
            .filter(|old| {
                !incoming
                    .rows()
                    .iter()
                    .any(|new| new.arm_name == old.arm_name && new.metric_name == old.metric_name)
            })
            .cloned()
            .collect();
        rows.extend(incoming.rows().iter().cloned());
        self.data.insert(index, Data::from_rows(rows));
    }

    pub fn complete_trial(&mut self, index: usize, data: Option<Data>) -> TdResult<()> {
        self.trial_mut(index)?.mark_completed()?;
        if let Some(data) = data {
            self.merge_data(index, data);
        }
        info!(trial = index, "Trial completed");
        Ok(())
    }

    pub fn early_stop_trial(&mut self, index: usize, data: Option<Data>) -> TdResult<()> {
        self.trial_mut(index)?.mark_early_stopped()?;
        if let Some(data) = data {
            self.merge_data(index, data);
        }
        info!(trial = index, "Trial early-stopped");
        Ok(())
    }

    pub fn mark_trial_failed(&mut self, index: usize, reason: Option<String>) -> TdResult<()> {
        self.trial_mut(index)?.mark_failed(reason)?;
        info!(trial = index, "Trial failed");
        Ok(())
    }

    pub fn abandon_trial(&mut self, index: usize, reason: Option<String>) -> TdResult<()> {
        self.trial_mut(index)?.mark_abandoned(reason)?;
        info!(trial = index, "Trial abandoned");
        Ok(())
    }

    /// Persist TTL expiry on every trial. Returns the indices that expired.
    pub fn refresh_ttl(&mut self) -> Vec<usize> {
        self.refresh_ttl_at(Utc::now())
    }

    pub fn refresh_ttl_at(&mut self, now: DateTime<Utc>) -> Vec<usize> {
        self.trials
            .iter_mut()
            .filter_map(|t| t.expire_if_stale(now).then(|| t.index()))
            .collect()
    }

    pub fn lookup_data(&self, index: usize) -> Option<&Data> {
        self.data.get(&index)
    }

    /// Data of trials that are running, completed or early-stopped.
    /// Failed and abandoned trials contribute nothing.
    pub fn fetch_data(&self, trial_indices: Option<&[usize]>) -> Data {
        let now = Utc::now();
        let parts: Vec<&Data> = self
            .data
            .iter()
            .filter(|(index, _)| trial_indices.map_or(true, |wanted| wanted.contains(index)))
            .filter(|(index, _)| {
                self.trials.get(**index).is_some_and(|t| {
                    matches!(
                        t.status_at(now),
                        TrialStatus::Running | TrialStatus::Completed | TrialStatus::EarlyStopped
                    )
                })
            })
            .map(|(_, data)| data)
            .collect();
        Data::from_multiple(parts)
    }

    /// Data usable for fitting and selection: completed and early-stopped
    /// trials only.
    pub fn completed_data(&self) -> Data {
        let now = Utc::now();
        let parts: Vec<&Data> = self
            .data
            .iter()
            .filter(|(index, _)| {
                self.trials
                    .get(**index)
                    .is_some_and(|t| t.status_at(now).has_usable_data())
            })
            .map(|(_, data)| data)
            .collect();
        Data::from_multiple(parts)
    }

    /// One row per arm per trial with its parameters and metric means.
    pub fn to_table(&self) -> Vec<ArmSummary> {
        let now = Utc::now();
        let mut rows = Vec::new();
        for trial in &self.trials {
            let means = self
                .data
                .get(&trial.index())
                .map(Data::means_by_arm)
                .unwrap_or_default();
            for arm in trial.arms() {
                rows.push(ArmSummary {
                    trial_index: trial.index(),
                    arm_name: arm.name.clone(),
                    trial_status: trial.status_at(now),
                    generation_node: trial.generation_node().map(str::to_string),
                    parameters: arm.parameters.clone(),
                    metrics: means.get(&arm.name).cloned().unwrap_or_default(),
                });
            }
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Evaluation;
    use td_types::{
        ComparisonOp, OptimizationConfig, OutcomeConstraint, ParameterValue, RangeParameter,
        SingleObjective, TdError,
    };

    fn space() -> SearchSpace {
        SearchSpace::new(
            vec![
                RangeParameter::float("x", 0.0, 1.0).unwrap().into(),
                RangeParameter::int("n", 1, 5).unwrap().into(),
            ],
            vec![],
        )
        .unwrap()
    }

    fn point(x: f64, n: i64) -> Parameterization {
        [
            ("x".to_string(), ParameterValue::Float(x)),
            ("n".to_string(), ParameterValue::Int(n)),
        ]
        .into()
    }

    fn observation(arm: &str, value: f64) -> Data {
        Data::from_evaluations(
            0,
            &BTreeMap::from([(
                arm.to_string(),
                Evaluation::from([("y".to_string(), (value, None))]),
            )]),
        )
    }

    #[test]
    fn arms_are_named_by_trial_and_position() {
        let mut experiment = Experiment::new("test", space());
        let run = GeneratorRun::new(vec![point(0.1, 1), point(0.2, 2)], "uniform");
        let index = experiment.new_batch_trial(vec![run], None).unwrap();
        let names: Vec<&str> = experiment.trials()[index]
            .arms()
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["0_0", "0_1"]);

        let again = GeneratorRun::new(vec![point(0.2, 2)], "uniform");
        let index = experiment.new_trial(again, None).unwrap();
        assert_eq!(experiment.trials()[index].arms()[0].name, "0_1");
    }

    #[test]
    fn out_of_space_arms_are_rejected() {
        let mut experiment = Experiment::new("test", space());
        let run = GeneratorRun::new(vec![point(2.0, 1)], "uniform");
        assert!(experiment.new_trial(run, None).is_err());
        assert_eq!(experiment.num_trials(), 0);
    }

    #[test]
    fn status_quo_must_be_in_space() {
        let experiment = Experiment::new("test", space());
        let err = experiment.with_status_quo(point(3.0, 1)).unwrap_err();
        assert!(err.to_string().contains("Status quo is outside the search space"));
    }

    #[test]
    fn relative_constraint_requires_status_quo() {
        let config = OptimizationConfig::new(
            SingleObjective::new(Metric::new("y"), true).unwrap().into(),
            vec![OutcomeConstraint::new(Metric::new("c"), ComparisonOp::Leq, 5.0, true)],
        )
        .unwrap();
        let mut experiment = Experiment::new("test", space());
        assert!(experiment.set_optimization_config(config.clone()).is_err());

        experiment.set_status_quo(point(0.5, 3)).unwrap();
        experiment.set_optimization_config(config).unwrap();
        assert_eq!(experiment.status_quo().unwrap().name, STATUS_QUO_ARM_NAME);
    }

    #[test]
    fn complete_and_fetch_data() {
        let mut experiment = Experiment::new("test", space());
        let (arms, index) = experiment.attach_trial(vec![point(0.3, 2)], None).unwrap();
        assert_eq!(arms.keys().collect::<Vec<_>>(), vec!["0_0"]);
        experiment
            .complete_trial(index, Some(observation("0_0", 1.5)))
            .unwrap();

        let (_, failed) = experiment.attach_trial(vec![point(0.4, 2)], None).unwrap();
        experiment.attach_data(failed, observation("1_0", 9.0)).unwrap();
        experiment.mark_trial_failed(failed, None).unwrap();

        let fetched = experiment.fetch_data(None);
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched.rows()[0].trial_index, 0);
        assert_eq!(experiment.completed_data().len(), 1);

        let err = experiment
            .attach_data(failed, observation("1_0", 1.0))
            .unwrap_err();
        assert!(err.to_string().contains("no longer expects data"));
    }

    #[test]
    fn update_replaces_observations_on_completed_trials() {
        let mut experiment = Experiment::new("test", space());
        let (_, index) = experiment.attach_trial(vec![point(0.3, 2)], None).unwrap();
        experiment
            .complete_trial(index, Some(observation("0_0", 1.0)))
            .unwrap();
        experiment
            .update_trial_data(index, observation("0_0", 2.0))
            .unwrap();
        let table = experiment.to_table();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].metrics["y"], 2.0);
        assert_eq!(table[0].trial_status, TrialStatus::Completed);

        experiment.abandon_trial(index, None).unwrap_err();
    }

    #[test]
    fn ttl_marks_trial_failed() {
        let mut experiment = Experiment::new("test", space());
        let (_, index) = experiment.attach_trial(vec![point(0.3, 2)], Some(1)).unwrap();
        let later = Utc::now() + chrono::Duration::seconds(10);
        assert_eq!(experiment.refresh_ttl_at(later), vec![index]);
        let err = experiment
            .complete_trial(index, Some(observation("0_0", 1.0)))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Trial error: Trial 0 has been marked FAILED, so it no longer expects data."
        );
    }

    #[test]
    fn huge_ttl_keeps_the_trial_running() {
        let mut experiment = Experiment::new("test", space());
        let (_, index) = experiment
            .attach_trial(vec![point(0.5, 1)], Some(i64::MAX))
            .unwrap();
        assert_eq!(experiment.trial(index).unwrap().status(), TrialStatus::Running);
        assert!(experiment.refresh_ttl().is_empty());
        assert_eq!(experiment.to_table().len(), 1);
        experiment
            .complete_trial(index, Some(observation("0_0", 1.0)))
            .unwrap();
        assert_eq!(experiment.completed_data().rows().len(), 1);
    }

    #[test]
    fn rejected_completion_leaves_no_data() {
        let mut experiment = Experiment::new("test", space());
        let run = GeneratorRun::new(vec![point(0.4, 2)], "uniform");
        let index = experiment.new_trial(run, None).unwrap();

        let err = experiment
            .complete_trial(index, Some(observation("0_0", 2.0)))
            .unwrap_err();
        assert!(matches!(
            err,
            TdError::Trial(TrialError::UnsupportedTransition { .. })
        ));
        assert!(experiment.lookup_data(index).is_none());
        assert!(experiment
            .early_stop_trial(index, Some(observation("0_0", 2.0)))
            .is_err());
        assert!(experiment.lookup_data(index).is_none());

        experiment.mark_trial_running(index).unwrap();
        experiment.complete_trial(index, None).unwrap();
        assert!(experiment.completed_data().rows().is_empty());
    }

    #[test]
    fn non_positive_ttl_is_rejected() {
        let mut experiment = Experiment::new("test", space());
        let err = experiment.attach_trial(vec![point(0.3, 2)], Some(0)).unwrap_err();
        assert!(matches!(err, TdError::Validation(_)));
        assert_eq!(experiment.num_trials(), 0);
    }

    #[test]
    fn experiment_round_trips_through_serde() {
        let mut experiment = Experiment::new("test", space()).with_tracking_metric(Metric::new("t"));
        let (_, index) = experiment.attach_trial(vec![point(0.3, 2)], None).unwrap();
        experiment
            .complete_trial(index, Some(observation("0_0", 1.0)))
            .unwrap();
        let json = serde_json::to_string(&experiment).unwrap();
        let back: Experiment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, experiment);
        assert!(matches!(
            back.metric_intents().last(),
            Some((_, MetricIntent::Tracking))
        ));
    }
}
