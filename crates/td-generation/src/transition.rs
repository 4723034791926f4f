//! Pure transition and blocking evaluation over a trial snapshot.

use crate::node::{CriterionKind, GenerationNode, TransitionCriterion};
use td_experiment::Experiment;
use td_types::TrialStatus;

/// What the strategy needs to know about one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialView {
    pub index: usize,
    pub status: TrialStatus,
    pub generation_node: Option<String>,
}

/// Trial statuses as seen at the start of a generation request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialSnapshot {
    pub trials: Vec<TrialView>,
    /// Node that produced the most recent generator run.
    pub last_generation_node: Option<String>,
}

impl TrialSnapshot {
    pub fn new(trials: Vec<TrialView>, last_generation_node: Option<String>) -> Self {
        Self {
            trials,
            last_generation_node,
        }
    }

    /// Statuses are read through TTL expiry.
    pub fn from_experiment(experiment: &Experiment, last_generation_node: Option<&str>) -> Self {
        let trials = experiment
            .trials()
            .iter()
            .map(|t| TrialView {
                index: t.index(),
                status: t.status(),
                generation_node: t.generation_node().map(str::to_string),
            })
            .collect();
        Self::new(trials, last_generation_node.map(str::to_string))
    }

    fn count(&self, node: &str, include: impl Fn(TrialStatus) -> bool) -> usize {
        self.trials
            .iter()
            .filter(|t| t.generation_node.as_deref() == Some(node) && include(t.status))
            .count()
    }
}

/// Current value of the quantity a criterion thresholds.
pub fn criterion_count(
    criterion: &TransitionCriterion,
    node: &GenerationNode,
    snapshot: &TrialSnapshot,
) -> usize {
    match criterion.kind {
        CriterionKind::MaxTrials => snapshot.count(&node.name, |s| {
            !matches!(s, TrialStatus::Failed | TrialStatus::Abandoned)
        }),
        CriterionKind::MinTrials => snapshot.count(&node.name, TrialStatus::has_usable_data),
        CriterionKind::MaxGenerationParallelism => {
            snapshot.count(&node.name, |s| !s.is_terminal())
        }
        CriterionKind::AutoTransitionAfterGen => {
            usize::from(snapshot.last_generation_node.as_deref() == Some(node.name.as_str()))
        }
    }
}

pub fn is_met(criterion: &TransitionCriterion, node: &GenerationNode, snapshot: &TrialSnapshot) -> bool {
    let count = criterion_count(criterion, node, snapshot);
    match criterion.kind {
        CriterionKind::AutoTransitionAfterGen => count > 0,
        _ => count >= criterion.threshold,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionDecision {
    Stay,
    /// Move to the named node, or finish the strategy when `None`.
    Transition { to: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeEvaluation {
    pub transition: TransitionDecision,
    /// Trials the node may still produce; `None` when unbounded.
    pub capacity: Option<usize>,
    pub block_reason: Option<String>,
}

/// Decide whether `node` should hand over and how much it may generate.
///
/// Criteria are grouped by target in declaration order; the first group whose
/// transition-blocking criteria are all met wins. Generation blocks are only
/// reported when `enforce_sequential` is set.
pub fn evaluate_node(
    node: &GenerationNode,
    snapshot: &TrialSnapshot,
    enforce_sequential: bool,
) -> NodeEvaluation {
    let mut groups: Vec<(&Option<String>, Vec<&TransitionCriterion>)> = Vec::new();
    for criterion in &node.transition_criteria {
        match groups.iter_mut().find(|(to, _)| **to == criterion.transition_to) {
            Some((_, members)) => members.push(criterion),
            None => groups.push((&criterion.transition_to, vec![criterion])),
        }
    }

    let transition = groups
        .iter()
        .find(|(_, members)| {
            let blocking: Vec<_> = members.iter().filter(|c| c.block_transition_if_unmet).collect();
            !blocking.is_empty() && blocking.iter().all(|c| is_met(c, node, snapshot))
        })
        .map_or(TransitionDecision::Stay, |(to, _)| TransitionDecision::Transition {
            to: (**to).clone(),
        });

    if !enforce_sequential {
        return NodeEvaluation {
            transition,
            capacity: None,
            block_reason: None,
        };
    }

    let mut capacity: Option<usize> = None;
    let mut block_reason = None;
    for criterion in node.transition_criteria.iter().filter(|c| c.block_gen_if_met) {
        let count = criterion_count(criterion, node, snapshot);
        let remaining = criterion.threshold.saturating_sub(count);
        capacity = Some(capacity.map_or(remaining, |c| c.min(remaining)));
        if remaining == 0 && block_reason.is_none() {
            block_reason = Some(match criterion.kind {
                CriterionKind::MaxGenerationParallelism => format!(
                    "Maximum parallelism for generation node {} reached ({} trials pending)",
                    node.name, count
                ),
                CriterionKind::MaxTrials => format!(
                    "Generation node {} has produced its {} trials and needs more completed trials before moving on",
                    node.name, criterion.threshold
                ),
                kind => format!("{kind} criterion of generation node {} is met", node.name),
            });
        }
    }

    NodeEvaluation {
        transition,
        capacity,
        block_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::GeneratorSpec;
    use crate::uniform::UniformGeneratorConfig;

    fn node() -> GenerationNode {
        GenerationNode::new("sobol", GeneratorSpec::Uniform(UniformGeneratorConfig::default()))
            .with_criterion(TransitionCriterion::max_trials(5).to("model"))
            .with_criterion(TransitionCriterion::min_trials(1).to("model"))
            .with_criterion(TransitionCriterion::max_generation_parallelism(5))
    }

    fn snapshot(statuses: &[TrialStatus]) -> TrialSnapshot {
        TrialSnapshot::new(
            statuses
                .iter()
                .enumerate()
                .map(|(index, &status)| TrialView {
                    index,
                    status,
                    generation_node: Some("sobol".to_string()),
                })
                .collect(),
            Some("sobol".to_string()),
        )
    }

    #[test]
    fn blocks_while_budget_is_spent_and_nothing_completed() {
        let eval = evaluate_node(&node(), &snapshot(&[TrialStatus::Running; 5]), true);
        assert_eq!(eval.transition, TransitionDecision::Stay);
        assert_eq!(eval.capacity, Some(0));
        assert!(eval.block_reason.is_some());

        let relaxed = evaluate_node(&node(), &snapshot(&[TrialStatus::Running; 5]), false);
        assert_eq!(relaxed.block_reason, None);
        assert_eq!(relaxed.capacity, None);
    }

    #[test]
    fn transitions_once_a_trial_completes() {
        let mut statuses = vec![TrialStatus::Running; 5];
        statuses[2] = TrialStatus::Completed;
        let eval = evaluate_node(&node(), &snapshot(&statuses), true);
        assert_eq!(
            eval.transition,
            TransitionDecision::Transition {
                to: Some("model".to_string())
            }
        );
    }

    #[test]
    fn failed_trials_do_not_spend_the_budget() {
        let mut statuses = vec![TrialStatus::Completed; 4];
        statuses.push(TrialStatus::Failed);
        let eval = evaluate_node(&node(), &snapshot(&statuses), true);
        assert_eq!(eval.transition, TransitionDecision::Stay);
        assert_eq!(eval.capacity, Some(1));
        assert_eq!(eval.block_reason, None);
    }

    #[test]
    fn auto_transition_follows_the_last_run() {
        let node = GenerationNode::new("a", GeneratorSpec::Uniform(UniformGeneratorConfig::default()))
            .with_criterion(TransitionCriterion::auto_transition_after_gen().to("b"));
        let fresh = TrialSnapshot::default();
        assert_eq!(evaluate_node(&node, &fresh, true).transition, TransitionDecision::Stay);

        let after = TrialSnapshot::new(Vec::new(), Some("a".to_string()));
        assert_eq!(
            evaluate_node(&node, &after, true).transition,
            TransitionDecision::Transition {
                to: Some("b".to_string())
            }
        );
    }

    #[test]
    fn parallelism_alone_never_transitions() {
        let node = GenerationNode::new("only", GeneratorSpec::Uniform(UniformGeneratorConfig::default()))
            .with_criterion(TransitionCriterion::max_generation_parallelism(2));
        let eval = evaluate_node(&node, &snapshot(&[]), true);
        assert_eq!(eval.transition, TransitionDecision::Stay);
        assert_eq!(eval.capacity, Some(2));
    }
}
