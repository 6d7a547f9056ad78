//! Validation run when components are added or committed.
//!
//! Checkers report problems as [`Alert`]s. An [`AlertType::Error`] alert
//! vetoes the commit of the component it concerns; other alerts are advisory.

use crate::model::{Component, SememePayload};
use logicterm_logic::{LogicalExpression, NodeCodec, Nid};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertType {
    Information,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub component_nid: Nid,
    pub checker: String,
    pub description: String,
}

impl Alert {
    pub fn is_error(&self) -> bool {
        self.alert_type == AlertType::Error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckPhase {
    AddUncommitted,
    Commit,
}

pub trait ChangeChecker: Send + Sync {
    fn name(&self) -> &str;

    /// Append any alerts about `component` to `alerts`.
    fn check(&self, component: &Component, alerts: &mut Vec<Alert>, phase: CheckPhase);
}

/// Rejects logic-graph sememe versions whose node records do not decode to a
/// valid expression.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogicGraphChecker;

impl ChangeChecker for LogicGraphChecker {
    fn name(&self) -> &str {
        "logic-graph"
    }

    fn check(&self, component: &Component, alerts: &mut Vec<Alert>, _phase: CheckPhase) {
        let Component::Sememe(sememe) = component else {
            return;
        };
        for version in sememe.versions.iter().filter(|v| v.stamp.is_uncommitted()) {
            let SememePayload::LogicGraph { data } = &version.payload else {
                continue;
            };
            let outcome =
                LogicalExpression::from_data(sememe.referenced_component, data, NodeCodec::internal())
                    .and_then(|expression| expression.validate());
            if let Err(err) = outcome {
                alerts.push(Alert {
                    alert_type: AlertType::Error,
                    component_nid: sememe.nid,
                    checker: self.name().to_string(),
                    description: format!("invalid logic graph: {err}"),
                });
            }
        }
    }
}
