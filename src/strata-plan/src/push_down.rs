use std::{collections::HashMap, fmt::Debug, sync::Arc};

use crate::{spec::Operation, stage::STAGE_KIND};

/// Kind identifiers of the built-in operation catalog.
pub mod kinds {
    pub const FROM: &str = "from";
    pub const RANGE: &str = "range";
    pub const FILTER: &str = "filter";
    pub const GROUP: &str = "group";
    pub const WINDOW: &str = "window";
    pub const FIRST: &str = "first";
    pub const LAST: &str = "last";
    pub const SUM: &str = "sum";
    pub const SAMPLE: &str = "sample";
}

/// Kinds left outside a stage when they end its staged chain.
pub const SKIP_POINT_KINDS: [&str; 3] = [kinds::GROUP, kinds::FILTER, kinds::WINDOW];

/// Kinds that re-key their output; a staged chain never continues past one.
pub const GROUPING_BOUNDARY_KINDS: [&str; 2] = [kinds::GROUP, kinds::WINDOW];

const DEFAULT_PUSH_DOWN_KINDS: [&str; 9] = [
    kinds::RANGE,
    kinds::FILTER,
    kinds::GROUP,
    kinds::WINDOW,
    kinds::FIRST,
    kinds::LAST,
    kinds::SUM,
    kinds::SAMPLE,
    kinds::FROM,
];

pub type PushDownPredicate = Arc<dyn Fn(&Operation) -> bool + Send + Sync>;

#[derive(Clone)]
enum Classification {
    Fixed(bool),
    Predicate(PushDownPredicate),
}

/// Kind-keyed push-down eligibility. Unregistered kinds are never eligible.
#[derive(Clone, Default)]
pub struct PushDownRegistry {
    kinds: HashMap<String, Classification>,
}

impl Debug for PushDownRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.kinds.keys().collect();
        kinds.sort();
        f.debug_struct("PushDownRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl PushDownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in DEFAULT_PUSH_DOWN_KINDS {
            registry.register(kind, true);
        }
        registry
    }

    pub fn register(&mut self, kind: &str, eligible: bool) -> &mut Self {
        self.kinds
            .insert(kind.to_string(), Classification::Fixed(eligible));
        self
    }

    /// Registers a per-operation decision for `kind`, e.g. one that inspects the payload.
    pub fn register_fn(&mut self, kind: &str, predicate: PushDownPredicate) -> &mut Self {
        self.kinds
            .insert(kind.to_string(), Classification::Predicate(predicate));
        self
    }

    pub fn is_push_down_op(&self, op: &Operation) -> bool {
        if op.kind() == STAGE_KIND {
            return false;
        }
        match self.kinds.get(op.kind()) {
            Some(Classification::Fixed(eligible)) => *eligible,
            Some(Classification::Predicate(predicate)) => predicate(op),
            None => false,
        }
    }
}
