mod optimizer;
mod rules;

pub use optimizer::{Planner, PlannerConfig};
pub use rules::{PlanRule, PlanRuleBatch, RuleExecutionStrategy, StagePlanner, Transformed};
