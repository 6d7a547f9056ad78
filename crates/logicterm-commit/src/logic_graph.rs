//! Deciding whether an edited definition needs a new logic-graph version.

use logicterm_logic::{IsomorphismConfig, LogicalExpression, NodeCodec};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum LogicGraphUpdate {
    /// The new definition is equivalent to the last committed one.
    Unchanged,
    NewVersion {
        /// The new definition, numbered to reuse the previous version's node
        /// indices where nodes correspond. May contain holes where previous
        /// nodes were deleted.
        expression: LogicalExpression,
        /// Internal-encoding node records of `expression` with holes
        /// compacted, so record positions match `expression` indices only
        /// when it has no holes.
        data: Vec<Vec<u8>>,
        additions: usize,
        deletions: usize,
    },
}

/// Compare `new` against the last committed definition.
pub fn prepare_logic_graph_version(
    last_committed: Option<&LogicalExpression>,
    new: &LogicalExpression,
    config: &IsomorphismConfig,
) -> logicterm_logic::Result<LogicGraphUpdate> {
    new.validate()?;
    let Some(previous) = last_committed else {
        return Ok(LogicGraphUpdate::NewVersion {
            expression: new.clone(),
            data: new.to_data(NodeCodec::internal())?,
            additions: 0,
            deletions: 0,
        });
    };

    let result = new.find_isomorphisms(previous, config)?;
    if result.equivalent() {
        debug!(concept = new.concept_nid(), "logic graph unchanged");
        return Ok(LogicGraphUpdate::Unchanged);
    }

    let expression = result.isomorphic_expression().clone();
    let data = expression.to_data(NodeCodec::internal())?;
    debug!(
        concept = new.concept_nid(),
        additions = result.addition_roots().len(),
        deletions = result.deletion_roots().len(),
        solver = result.solver(),
        "logic graph changed"
    );
    Ok(LogicGraphUpdate::NewVersion {
        expression,
        data,
        additions: result.addition_roots().len(),
        deletions: result.deletion_roots().len(),
    })
}
