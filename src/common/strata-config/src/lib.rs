use serde::{Deserialize, Serialize};

/// Configurations used while rewriting a query spec before it runs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanningConfig {
    /// Whether the stage planner extracts push-down prefixes at all.
    pub enable_stage_planning: bool,
    /// Upper bound on the number of operations packed into one stage.
    pub max_stage_operations: Option<usize>,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            enable_stage_planning: true,
            max_stage_operations: None,
        }
    }
}

impl PlanningConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(enabled) = env_flag("STRATA_ENABLE_STAGE_PLANNING") {
            cfg.enable_stage_planning = enabled;
        }
        if let Some(max) = env_usize("STRATA_MAX_STAGE_OPERATIONS") {
            cfg.max_stage_operations = Some(max);
        }
        cfg
    }
}

/// Configurations for the execution of one query.
///
/// Should be treated as immutable for a given end-to-end execution; nested pipelines
/// spawned by a staged transformer share the configuration of their query.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Worker threads of the shared compute pool. `None` uses the available parallelism.
    pub num_worker_threads: Option<usize>,
    /// Number of nested pipelines a staged transformer may run at once when the query does
    /// not carry its own concurrency quota.
    pub stage_concurrency: usize,
    /// Allowed lateness, in nanoseconds, of the default after-watermark trigger.
    pub default_allowed_lateness_ns: i64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            num_worker_threads: None,
            stage_concurrency: 4,
            default_allowed_lateness_ns: 0,
        }
    }
}

impl ExecutionConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(threads) = env_usize("STRATA_NUM_WORKER_THREADS") {
            cfg.num_worker_threads = Some(threads);
        }
        if let Some(concurrency) = env_usize("STRATA_STAGE_CONCURRENCY") {
            cfg.stage_concurrency = concurrency.max(1);
        }
        cfg
    }

    /// Stage concurrency to use given a query's own quota, where zero means "unset".
    pub fn stage_concurrency_for(&self, concurrency_quota: usize) -> usize {
        if concurrency_quota > 0 {
            concurrency_quota
        } else {
            self.stage_concurrency.max(1)
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    match val.trim().to_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_overrides_default_concurrency() {
        let cfg = ExecutionConfig::default();
        assert_eq!(cfg.stage_concurrency_for(0), 4);
        assert_eq!(cfg.stage_concurrency_for(2), 2);

        let cfg = ExecutionConfig {
            stage_concurrency: 0,
            ..Default::default()
        };
        assert_eq!(cfg.stage_concurrency_for(0), 1);
    }

    #[test]
    fn configs_roundtrip_through_json() {
        let cfg = PlanningConfig {
            enable_stage_planning: false,
            max_stage_operations: Some(3),
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert_eq!(serde_json::from_str::<PlanningConfig>(&json).unwrap(), cfg);
    }
}
