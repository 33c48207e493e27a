//! Builds the minimal stage sequence for a query.
//!
//! ```text
//! confirmed, no overrides:  [populate?] collection ids(confirmed) [fields?]
//! otherwise:                [populate?] collection override… filter… [sort] [cursor] [limit] [fields?]
//! ```

use crate::stages::{CursorWindow, PipelineValue, Row, Stage};
use crate::store::{DocumentStore, OverrideLayer};
use crate::types::QueryEntry;

/// An ordered list of stages for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Composes the stages for `entry` given the pending overrides.
    ///
    /// An entry with a confirmed order and no overrides on its collection is
    /// trusted: its rows are the confirmed ids verbatim. Anything else is
    /// evaluated locally.
    pub fn build(overrides: &OverrideLayer, entry: &QueryEntry) -> Self {
        let query = &entry.query;
        let mut stages = Vec::new();

        if !query.populates.is_empty() {
            stages.push(Stage::Populate {
                collection: query.collection.clone(),
                populates: query.populates.clone(),
            });
        }
        stages.push(Stage::Collection(query.collection.clone()));

        let pending = overrides.collection(&query.collection);
        match (&entry.confirmed, pending) {
            (Some(confirmed), None) => {
                stages.push(Stage::DocumentIds(
                    confirmed.iter().map(|(_, id)| id.clone()).collect(),
                ));
            }
            (_, pending) => {
                for (id, patch) in pending.into_iter().flatten() {
                    stages.push(Stage::Override {
                        id: id.clone(),
                        patch: patch.clone(),
                    });
                }
                for clause in &query.where_clauses {
                    stages.push(Stage::Filter(clause.clone()));
                }
                if !query.order_by.is_empty() {
                    stages.push(Stage::Sort(query.order_by.clone()));
                }
                if query.has_cursor() {
                    stages.push(Stage::Cursor(CursorWindow {
                        order_by: query.order_by.clone(),
                        start_at: query.start_at.clone(),
                        start_after: query.start_after.clone(),
                        end_at: query.end_at.clone(),
                        end_before: query.end_before.clone(),
                    }));
                }
                if let Some(limit) = query.limit {
                    stages.push(Stage::Limit(limit));
                }
            }
        }

        if let Some(fields) = &query.fields {
            stages.push(Stage::Fields(fields.clone()));
        }

        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Whether the pipeline replays the confirmed order.
    pub fn is_trusted(&self) -> bool {
        self.stages
            .iter()
            .any(|stage| matches!(stage, Stage::DocumentIds(_)))
    }

    /// Runs every stage against the store. Holes are kept.
    pub fn run(&self, store: &DocumentStore) -> Vec<Row> {
        self.stages
            .iter()
            .fold(PipelineValue::Store(store), |value, stage| stage.apply(value))
            .into_rows()
    }
}
