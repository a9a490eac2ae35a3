use std::sync::Arc;

use common_error::StrataResult;
use common_strata_config::PlanningConfig;

use super::rules::{PlanRuleBatch, RuleExecutionStrategy, StagePlanner};
use crate::{push_down::PushDownRegistry, spec::Spec};

pub struct PlannerConfig {
    // The upper bound on the number of passes a rule batch can run.
    // Depending on its configuration a rule batch may run fewer passes.
    // Default is 5
    pub max_passes: usize,
}

impl PlannerConfig {
    pub fn new(max_passes: usize) -> Self {
        Self { max_passes }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { max_passes: 5 }
    }
}

/// Runs rule batches over a validated query graph.
pub struct Planner {
    rule_batches: Vec<PlanRuleBatch>,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(rule_batches: Vec<PlanRuleBatch>, config: PlannerConfig) -> Self {
        Self {
            rule_batches,
            config,
        }
    }

    /// The default planner: a single stage-planning pass.
    pub fn with_stage_planning(
        push_down: Arc<PushDownRegistry>,
        planning_config: PlanningConfig,
    ) -> Self {
        Self::new(
            vec![PlanRuleBatch::new(
                vec![Box::new(StagePlanner::new(push_down, planning_config))],
                RuleExecutionStrategy::Once,
            )],
            PlannerConfig::default(),
        )
    }

    pub fn plan(&self, mut spec: Spec) -> StrataResult<Spec> {
        spec.validate()?;
        for batch in &self.rule_batches {
            spec = batch.optimize(spec, &self.config)?;
        }
        Ok(spec)
    }
}
