//! Trials and their status lifecycle.
//!
//! ```text
//! CANDIDATE -> STAGED -> RUNNING -> COMPLETED | EARLY_STOPPED
//!      \          \         \
//!       +----------+---------+---> FAILED | ABANDONED
//! ```
//!
//! A running trial whose TTL has elapsed reads as `FAILED`. The stored status
//! catches up when [`Trial::expire_if_stale`] is called.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use td_types::{TrialError, TrialKind, TrialStatus};
use tracing::warn;

use crate::arm::Arm;
use crate::generator_run::GeneratorRun;

/// Reason recorded when a trial fails by outliving its TTL.
pub const TTL_FAILURE_REASON: &str = "trial exceeded its time-to-live";

/// One or more arms evaluated together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TrialRecord", into = "TrialRecord")]
pub struct Trial {
    index: usize,
    kind: TrialKind,
    status: TrialStatus,
    arms: Vec<Arm>,
    arm_weights: Vec<f64>,
    generator_runs: Vec<GeneratorRun>,
    generation_node: Option<String>,
    ttl_seconds: Option<i64>,
    time_created: DateTime<Utc>,
    time_staged: Option<DateTime<Utc>>,
    time_run_started: Option<DateTime<Utc>>,
    time_completed: Option<DateTime<Utc>>,
    failed_reason: Option<String>,
    abandoned_reason: Option<String>,
    run_metadata: serde_json::Map<String, serde_json::Value>,
    db_id: Option<i64>,
}

/// Every field of a [`Trial`], settable for reconstruction from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub index: usize,
    pub kind: TrialKind,
    pub status: TrialStatus,
    #[serde(default)]
    pub arms: Vec<Arm>,
    #[serde(default)]
    pub arm_weights: Vec<f64>,
    #[serde(default)]
    pub generator_runs: Vec<GeneratorRun>,
    #[serde(default)]
    pub generation_node: Option<String>,
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
    pub time_created: DateTime<Utc>,
    #[serde(default)]
    pub time_staged: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_run_started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_completed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_reason: Option<String>,
    #[serde(default)]
    pub abandoned_reason: Option<String>,
    #[serde(default)]
    pub run_metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub db_id: Option<i64>,
}

impl From<TrialRecord> for Trial {
    fn from(r: TrialRecord) -> Self {
        Self {
            index: r.index,
            kind: r.kind,
            status: r.status,
            arms: r.arms,
            arm_weights: r.arm_weights,
            generator_runs: r.generator_runs,
            generation_node: r.generation_node,
            ttl_seconds: r.ttl_seconds,
            time_created: r.time_created,
            time_staged: r.time_staged,
            time_run_started: r.time_run_started,
            time_completed: r.time_completed,
            failed_reason: r.failed_reason,
            abandoned_reason: r.abandoned_reason,
            run_metadata: r.run_metadata,
            db_id: r.db_id,
        }
    }
}

impl From<Trial> for TrialRecord {
    fn from(t: Trial) -> Self {
        Self {
            index: t.index,
            kind: t.kind,
            status: t.status,
            arms: t.arms,
            arm_weights: t.arm_weights,
            generator_runs: t.generator_runs,
            generation_node: t.generation_node,
            ttl_seconds: t.ttl_seconds,
            time_created: t.time_created,
            time_staged: t.time_staged,
            time_run_started: t.time_run_started,
            time_completed: t.time_completed,
            failed_reason: t.failed_reason,
            abandoned_reason: t.abandoned_reason,
            run_metadata: t.run_metadata,
            db_id: t.db_id,
        }
    }
}

impl Trial {
    pub fn new(index: usize, kind: TrialKind) -> Self {
        Self {
            index,
            kind,
            status: TrialStatus::Candidate,
            arms: Vec::new(),
            arm_weights: Vec::new(),
            generator_runs: Vec::new(),
            generation_node: None,
            ttl_seconds: None,
            time_created: Utc::now(),
            time_staged: None,
            time_run_started: None,
            time_completed: None,
            failed_reason: None,
            abandoned_reason: None,
            run_metadata: serde_json::Map::new(),
            db_id: None,
        }
    }

    /// Rebuild a trial exactly as recorded, bypassing lifecycle checks.
    pub fn restore(record: TrialRecord) -> Self {
        record.into()
    }

    pub fn to_record(&self) -> TrialRecord {
        self.clone().into()
    }

    pub fn with_ttl_seconds(mut self, ttl_seconds: Option<i64>) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> TrialKind {
        self.kind
    }

    /// Current status, with TTL expiry applied as of now.
    pub fn status(&self) -> TrialStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> TrialStatus {
        if self.is_expired_at(now) {
            TrialStatus::Failed
        } else {
            self.status
        }
    }

    /// Status as stored, without TTL expiry.
    pub fn recorded_status(&self) -> TrialStatus {
        self.status
    }

    /// A deadline past the representable range never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match (self.status, self.ttl_seconds, self.time_run_started) {
            (TrialStatus::Running, Some(ttl), Some(started)) => Duration::try_seconds(ttl)
                .and_then(|ttl| started.checked_add_signed(ttl))
                .is_some_and(|deadline| deadline < now),
            _ => false,
        }
    }

    /// Persist a TTL-induced failure. Returns whether the trial expired.
    pub fn expire_if_stale(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_expired_at(now) {
            return false;
        }
        warn!(trial = self.index, "Trial exceeded its TTL, marking FAILED");
        self.status = TrialStatus::Failed;
        self.time_completed = Some(now);
        self.failed_reason = Some(TTL_FAILURE_REASON.to_string());
        true
    }

    pub fn arms(&self) -> &[Arm] {
        &self.arms
    }

    pub fn arm_weights(&self) -> &[f64] {
        &self.arm_weights
    }

    /// The only arm of a single-arm trial.
    pub fn arm(&self) -> Result<Option<&Arm>, TrialError> {
        if self.kind != TrialKind::Single {
            return Err(TrialError::TrialTypeMismatch {
                index: self.index,
                expected: TrialKind::Single,
                actual: self.kind,
            });
        }
        Ok(self.arms.first())
    }

    pub fn arm_by_name(&self, name: &str) -> Option<&Arm> {
        self.arms.iter().find(|a| a.name == name)
    }

    pub fn generator_runs(&self) -> &[GeneratorRun] {
        &self.generator_runs
    }

    pub fn generation_node(&self) -> Option<&str> {
        self.generation_node.as_deref()
    }

    pub fn ttl_seconds(&self) -> Option<i64> {
        self.ttl_seconds
    }

    pub fn time_created(&self) -> DateTime<Utc> {
        self.time_created
    }

    pub fn time_staged(&self) -> Option<DateTime<Utc>> {
        self.time_staged
    }

    pub fn time_run_started(&self) -> Option<DateTime<Utc>> {
        self.time_run_started
    }

    pub fn time_completed(&self) -> Option<DateTime<Utc>> {
        self.time_completed
    }

    pub fn failed_reason(&self) -> Option<&str> {
        self.failed_reason.as_deref()
    }

    pub fn abandoned_reason(&self) -> Option<&str> {
        self.abandoned_reason.as_deref()
    }

    pub fn run_metadata(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.run_metadata
    }

    pub fn run_metadata_mut(&mut self) -> &mut serde_json::Map<String, serde_json::Value> {
        &mut self.run_metadata
    }

    pub fn db_id(&self) -> Option<i64> {
        self.db_id
    }

    pub fn set_db_id(&mut self, db_id: Option<i64>) {
        self.db_id = db_id;
    }

    /// Attach a generator run together with the named arms built from it.
    ///
    /// Only candidate trials accept arms; single-arm trials hold one arm.
    pub fn add_generator_run(&mut self, run: GeneratorRun, arms: Vec<Arm>) -> Result<(), TrialError> {
        if self.status != TrialStatus::Candidate {
            return Err(TrialError::NotCandidate {
                index: self.index,
                status: self.status,
            });
        }
        if self.kind == TrialKind::Single && self.arms.len() + arms.len() > 1 {
            return Err(TrialError::TooManyArms {
                index: self.index,
                arms: self.arms.len() + arms.len(),
            });
        }
        let weights = if run.weights.len() == arms.len() {
            run.weights.clone()
        } else {
            vec![1.0; arms.len()]
        };
        if self.generation_node.is_none() {
            self.generation_node = run.node_name.clone();
        }
        self.arms.extend(arms);
        self.arm_weights.extend(weights);
        self.generator_runs.push(run);
        Ok(())
    }

    pub fn mark_staged(&mut self) -> Result<(), TrialError> {
        self.transition(TrialStatus::Staged, &[TrialStatus::Candidate])?;
        self.time_staged = Some(Utc::now());
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<(), TrialError> {
        self.transition(
            TrialStatus::Running,
            &[TrialStatus::Candidate, TrialStatus::Staged],
        )?;
        self.time_run_started = Some(Utc::now());
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<(), TrialError> {
        self.transition(TrialStatus::Completed, &[TrialStatus::Running])?;
        self.time_completed = Some(Utc::now());
        Ok(())
    }

    pub fn mark_early_stopped(&mut self) -> Result<(), TrialError> {
        self.transition(TrialStatus::EarlyStopped, &[TrialStatus::Running])?;
        self.time_completed = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: Option<String>) -> Result<(), TrialError> {
        self.transition(
            TrialStatus::Failed,
            &[TrialStatus::Candidate, TrialStatus::Staged, TrialStatus::Running],
        )?;
        self.time_completed = Some(Utc::now());
        self.failed_reason = reason;
        Ok(())
    }

    pub fn mark_abandoned(&mut self, reason: Option<String>) -> Result<(), TrialError> {
        self.transition(
            TrialStatus::Abandoned,
            &[TrialStatus::Candidate, TrialStatus::Staged, TrialStatus::Running],
        )?;
        self.time_completed = Some(Utc::now());
        self.abandoned_reason = reason;
        Ok(())
    }

    /// Fails with `TerminalTrial` from a terminal status and
    /// `UnsupportedTransition` from any other status not in `allowed_from`.
    fn transition(&mut self, to: TrialStatus, allowed_from: &[TrialStatus]) -> Result<(), TrialError> {
        self.expire_if_stale(Utc::now());
        if self.status.is_terminal() {
            return Err(TrialError::TerminalTrial {
                index: self.index,
                status: self.status,
            });
        }
        if !allowed_from.contains(&self.status) {
            return Err(TrialError::UnsupportedTransition {
                index: self.index,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use td_types::{Parameterization, ParameterValue};

    fn params(x: f64) -> Parameterization {
        [("x".to_string(), ParameterValue::Float(x))].into()
    }

    fn single_trial() -> Trial {
        let mut trial = Trial::new(0, TrialKind::Single);
        trial
            .add_generator_run(
                GeneratorRun::manual(vec![params(0.5)]),
                vec![Arm::new("0_0", params(0.5))],
            )
            .unwrap();
        trial
    }

    #[test]
    fn huge_ttl_never_expires() {
        let mut trial = single_trial().with_ttl_seconds(Some(i64::MAX));
        trial.mark_running().unwrap();
        let far_future = Utc::now() + Duration::days(365 * 1000);
        assert!(!trial.is_expired_at(far_future));
        assert_eq!(trial.status(), TrialStatus::Running);
        assert!(!trial.expire_if_stale(far_future));
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut trial = single_trial();
        assert_eq!(trial.status(), TrialStatus::Candidate);
        trial.mark_staged().unwrap();
        trial.mark_running().unwrap();
        assert!(trial.time_run_started().is_some());
        trial.mark_completed().unwrap();
        assert_eq!(trial.status(), TrialStatus::Completed);
        assert!(trial.time_completed().is_some());
    }

    #[test]
    fn terminal_trials_reject_transitions() {
        let mut trial = single_trial();
        trial.mark_running().unwrap();
        trial.mark_failed(Some("oom".into())).unwrap();
        let err = trial.mark_completed().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Trial 0 has been marked FAILED, so it no longer expects data."
        );
        assert!(matches!(
            trial.mark_abandoned(None),
            Err(TrialError::TerminalTrial { .. })
        ));
    }

    #[test]
    fn completing_a_candidate_is_unsupported() {
        let mut trial = single_trial();
        assert_eq!(
            trial.mark_completed().unwrap_err(),
            TrialError::UnsupportedTransition {
                index: 0,
                from: TrialStatus::Candidate,
                to: TrialStatus::Completed
            }
        );
    }

    #[test]
    fn single_arm_trials_hold_one_arm() {
        let mut trial = single_trial();
        trial.mark_running().unwrap();
        assert!(matches!(
            trial.add_generator_run(GeneratorRun::manual(vec![params(0.1)]), vec![]),
            Err(TrialError::NotCandidate { .. })
        ));

        let mut fresh = Trial::new(1, TrialKind::Single);
        let two = vec![Arm::new("1_0", params(0.1)), Arm::new("1_1", params(0.2))];
        assert!(matches!(
            fresh.add_generator_run(GeneratorRun::manual(vec![params(0.1), params(0.2)]), two),
            Err(TrialError::TooManyArms { arms: 2, .. })
        ));

        let batch = Trial::new(2, TrialKind::Batch);
        assert!(matches!(
            batch.arm(),
            Err(TrialError::TrialTypeMismatch { .. })
        ));
    }

    #[test]
    fn ttl_expiry_is_lazy() {
        let mut trial = single_trial().with_ttl_seconds(Some(1));
        trial.mark_running().unwrap();
        let later = Utc::now() + Duration::seconds(5);
        assert_eq!(trial.recorded_status(), TrialStatus::Running);
        assert_eq!(trial.status_at(later), TrialStatus::Failed);

        assert!(trial.expire_if_stale(later));
        assert_eq!(trial.recorded_status(), TrialStatus::Failed);
        assert_eq!(trial.failed_reason(), Some(TTL_FAILURE_REASON));
        assert!(!trial.expire_if_stale(later));
    }

    #[test]
    fn restore_round_trips_through_serde() {
        let mut trial = single_trial().with_ttl_seconds(Some(60));
        trial.mark_running().unwrap();
        trial.set_db_id(Some(7));
        let json = serde_json::to_string(&trial).unwrap();
        let back: Trial = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trial);

        let mut record = trial.to_record();
        record.status = TrialStatus::Completed;
        let restored = Trial::restore(record);
        assert_eq!(restored.recorded_status(), TrialStatus::Completed);
        assert_eq!(restored.db_id(), Some(7));
    }
}
