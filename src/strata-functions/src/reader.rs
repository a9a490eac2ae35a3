use std::{collections::HashMap, sync::Arc};

use common_error::{StrataError, StrataResult};
use futures::{stream, StreamExt};
use strata_execution::{SourceStream, TableReaderFactory};
use strata_plan::{
    kinds, procedure_spec_as, ProcedurePlan, ProcedureRegistry, Spec, GROUPING_BOUNDARY_KINDS,
};
use strata_table::Table;

use crate::{
    from::FromProcedureSpec,
    operator::{row_operator, TableOperator},
};

/// Storage held in memory, bucket by bucket.
///
/// Evaluates the staged specs it is handed: a `from` followed by a linear chain of
/// per-table operations. Kinds that re-key their input are not evaluated by storage.
pub struct MemoryTableReader {
    procedures: Arc<ProcedureRegistry>,
    buckets: HashMap<String, Vec<Table>>,
}

impl MemoryTableReader {
    pub fn new(procedures: Arc<ProcedureRegistry>) -> Self {
        Self {
            procedures,
            buckets: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_table(mut self, bucket: &str, table: Table) -> Self {
        self.buckets.entry(bucket.to_string()).or_default().push(table);
        self
    }

    fn compile(&self, spec: &Spec) -> StrataResult<(String, Vec<Box<dyn TableOperator>>)> {
        let plan = ProcedurePlan::build(spec, &self.procedures)?;
        let mut nodes = plan.nodes();
        let root = nodes
            .next()
            .ok_or_else(|| StrataError::InvalidPlan("storage was handed an empty spec".to_string()))?;
        if root.kind() != kinds::FROM || plan.roots().len() != 1 {
            return Err(StrataError::InvalidPlan(format!(
                "storage reads must start at a single {} operation, got {}",
                kinds::FROM,
                root.id
            )));
        }
        let bucket = procedure_spec_as::<FromProcedureSpec>(root.spec.as_ref())?
            .bucket
            .clone();
        let mut operators = vec![];
        for node in nodes {
            if node.predecessors.len() != 1 || node.successors.len() > 1 {
                return Err(StrataError::InvalidPlan(format!(
                    "storage only evaluates linear chains, {} branches",
                    node.id
                )));
            }
            if GROUPING_BOUNDARY_KINDS.contains(&node.kind()) {
                return Err(StrataError::UnsupportedKind(format!(
                    "storage cannot evaluate {}",
                    node.kind()
                )));
            }
            operators.push(row_operator(node.spec.as_ref(), node.bounds)?);
        }
        Ok((bucket, operators))
    }
}

impl TableReaderFactory for MemoryTableReader {
    fn create_reader(&self, spec: &Spec) -> StrataResult<SourceStream<'static>> {
        let (bucket, mut operators) = self.compile(spec)?;
        let stored = self.buckets.get(&bucket).ok_or_else(|| {
            StrataError::ValueError(format!("bucket {bucket} does not exist"))
        })?;
        let mut output = vec![];
        for table in stored {
            let mut tables = vec![table.copy()];
            for operator in &mut operators {
                let mut next = vec![];
                for table in tables {
                    next.extend(operator.execute(table)?.into_iter().filter(|t| !t.is_empty()));
                }
                tables = next;
            }
            output.extend(tables.into_iter().map(Ok));
        }
        log::debug!(
            "Read {} tables from bucket {bucket} through {} operators",
            output.len(),
            operators.len()
        );
        Ok(stream::iter(output).boxed())
    }
}
