use std::{any::Any, collections::HashMap, fmt::Debug, sync::Arc};

use common_error::{StrataError, StrataResult};
use strata_table::{Bounds, Time};

use crate::{
    spec::{Operation, ResourceManagement, Spec},
    stage::{create_stage_procedure_spec, STAGE_KIND},
};

/// Planner-side description of one operation, produced from its [`crate::OperationSpec`].
pub trait ProcedureSpec: Debug + Send + Sync {
    fn kind(&self) -> &str;
    fn as_any(&self) -> &dyn Any;

    /// Time range this procedure restricts its input to, if any.
    fn bounds(&self, _now: Time) -> Option<Bounds> {
        None
    }
}

pub fn procedure_spec_as<T: 'static>(spec: &dyn ProcedureSpec) -> StrataResult<&T> {
    spec.as_any().downcast_ref::<T>().ok_or_else(|| {
        StrataError::TypeError(format!(
            "procedure spec of kind {} is not a {}",
            spec.kind(),
            std::any::type_name::<T>()
        ))
    })
}

/// Opaque planning context handed to procedure-spec constructors.
pub trait Administration {
    fn now(&self) -> Time;
    fn resources(&self) -> &ResourceManagement;
}

#[derive(Clone, Debug, Default)]
pub struct PlanAdministration {
    now: Time,
    resources: ResourceManagement,
}

impl PlanAdministration {
    pub fn new(now: Time, resources: ResourceManagement) -> Self {
        Self { now, resources }
    }

    pub fn from_spec(spec: &Spec) -> Self {
        Self::new(spec.now, spec.resources.clone())
    }
}

impl Administration for PlanAdministration {
    fn now(&self) -> Time {
        self.now
    }

    fn resources(&self) -> &ResourceManagement {
        &self.resources
    }
}

pub type CreateProcedureSpec = Arc<
    dyn Fn(&Operation, &dyn Administration) -> StrataResult<Arc<dyn ProcedureSpec>> + Send + Sync,
>;

#[derive(Clone)]
struct ProcedureEntry {
    procedure_kind: String,
    create: CreateProcedureSpec,
}

/// Maps operation kinds to procedure-spec constructors.
#[derive(Clone)]
pub struct ProcedureRegistry {
    entries: HashMap<String, ProcedureEntry>,
}

impl Debug for ProcedureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.entries.keys().collect();
        kinds.sort();
        f.debug_struct("ProcedureRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl ProcedureRegistry {
    pub fn builder() -> ProcedureRegistryBuilder {
        ProcedureRegistryBuilder::new()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    pub fn create_procedure_spec(
        &self,
        op: &Operation,
        admin: &dyn Administration,
    ) -> StrataResult<Arc<dyn ProcedureSpec>> {
        let entry = self
            .entries
            .get(op.kind())
            .ok_or_else(|| StrataError::UnsupportedKind(op.kind().to_string()))?;
        let spec = (entry.create)(op, admin)?;
        if spec.kind() != entry.procedure_kind {
            return Err(StrataError::TypeError(format!(
                "operation {} produced a procedure spec of kind {}, expected {}",
                op.id,
                spec.kind(),
                entry.procedure_kind
            )));
        }
        Ok(spec)
    }
}

pub struct ProcedureRegistryBuilder {
    entries: HashMap<String, ProcedureEntry>,
}

impl Default for ProcedureRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcedureRegistryBuilder {
    /// Starts with the stage kind already registered.
    pub fn new() -> Self {
        let mut builder = Self {
            entries: HashMap::new(),
        };
        builder.register_procedure_spec(
            STAGE_KIND,
            Arc::new(create_stage_procedure_spec),
            STAGE_KIND,
        );
        builder
    }

    /// Registering a kind twice replaces the earlier constructor.
    pub fn register_procedure_spec(
        &mut self,
        op_kind: &str,
        create: CreateProcedureSpec,
        procedure_kind: &str,
    ) -> &mut Self {
        let previous = self.entries.insert(
            op_kind.to_string(),
            ProcedureEntry {
                procedure_kind: procedure_kind.to_string(),
                create,
            },
        );
        if previous.is_some() {
            log::debug!("Replacing procedure spec constructor for kind {op_kind}");
        }
        self
    }

    pub fn build(self) -> ProcedureRegistry {
        ProcedureRegistry {
            entries: self.entries,
        }
    }
}
