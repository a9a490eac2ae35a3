mod rule;
mod stage_planner;

pub use rule::{PlanRule, PlanRuleBatch, RuleExecutionStrategy, Transformed};
pub use stage_planner::StagePlanner;
