use common_error::StrataResult;

use crate::{optimization::optimizer::PlannerConfig, spec::Spec};

/// Result of a rewrite, tagged with whether anything changed.
#[derive(Debug)]
pub struct Transformed<T> {
    pub data: T,
    pub transformed: bool,
}

impl<T> Transformed<T> {
    pub fn yes(data: T) -> Self {
        Self {
            data,
            transformed: true,
        }
    }

    pub fn no(data: T) -> Self {
        Self {
            data,
            transformed: false,
        }
    }

    pub fn transform_data<F>(self, f: F) -> StrataResult<Self>
    where
        F: FnOnce(T) -> StrataResult<Self>,
    {
        let Self { data, transformed } = self;
        let next = f(data)?;
        Ok(Self {
            data: next.data,
            transformed: transformed || next.transformed,
        })
    }
}

pub trait PlanRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn rewrite(&self, spec: Spec) -> StrataResult<Transformed<Spec>>;
}

pub enum RuleExecutionStrategy {
    // Apply the batch of rules only once.
    Once,
    // Apply the batch of rules to a fixed point, capped at Some(n) passes or the planner's
    // max passes.
    FixedPoint(Option<usize>),
}

pub struct PlanRuleBatch {
    rules: Vec<Box<dyn PlanRule>>,
    strategy: RuleExecutionStrategy,
}

// A batch of PlanRules, run in order until the batch's strategy is satisfied. The graph is
// revalidated after every rule that changed it.
impl PlanRuleBatch {
    pub fn new(rules: Vec<Box<dyn PlanRule>>, strategy: RuleExecutionStrategy) -> Self {
        Self { rules, strategy }
    }

    fn optimize_once(&self, spec: Spec) -> StrataResult<Transformed<Spec>> {
        self.rules
            .iter()
            .try_fold(Transformed::no(spec), |spec, rule| {
                spec.transform_data(|s| {
                    let rewritten = rule.rewrite(s)?;
                    if rewritten.transformed {
                        log::debug!("Plan rule {} rewrote the query graph", rule.name());
                        rewritten.data.validate()?;
                    }
                    Ok(rewritten)
                })
            })
    }

    pub fn optimize(&self, spec: Spec, config: &PlannerConfig) -> StrataResult<Spec> {
        match self.strategy {
            RuleExecutionStrategy::Once => Ok(self.optimize_once(spec)?.data),
            RuleExecutionStrategy::FixedPoint(passes) => {
                let passes =
                    passes.map_or(config.max_passes, |x| std::cmp::min(config.max_passes, x));
                let mut spec = spec;
                for _ in 0..passes {
                    let transformed = self.optimize_once(spec)?;
                    spec = transformed.data;
                    if !transformed.transformed {
                        break;
                    }
                }
                Ok(spec)
            }
        }
    }
}
