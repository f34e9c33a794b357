use toologist_shared::{Identified, RowChange, ToolStats, TOOL_STATS_TABLE};
use uuid::Uuid;

use super::DataContext;
use crate::backend::Query;
use crate::resource::{ApplyOutcome, Resource};

/// View/favorite/click counters per tool.
#[derive(Clone)]
pub struct StatsStore {
    ctx: DataContext,
    stats: Resource<Vec<ToolStats>>,
    current: Resource<Option<ToolStats>>,
}

impl StatsStore {
    pub fn new(ctx: DataContext) -> Self {
        Self {
            ctx,
            stats: Resource::default(),
            current: Resource::default(),
        }
    }

    pub fn stats(&self) -> &Resource<Vec<ToolStats>> {
        &self.stats
    }

    pub fn current(&self) -> &Resource<Option<ToolStats>> {
        &self.current
    }

    pub async fn fetch_all(&self) -> ApplyOutcome {
        let query = Query::table(TOOL_STATS_TABLE).order("views", false);
        self.ctx.fetch_rows(&self.stats, query, "tool stats").await
    }

    pub async fn fetch_for_tool(&self, tool_id: Uuid) -> ApplyOutcome {
        let query = Query::table(TOOL_STATS_TABLE).eq("tool_id", tool_id);
        self.ctx.fetch_first(&self.current, query, "tool stats").await
    }

    /// Patch both views with a realtime change. Rows are keyed by tool.
    pub fn apply_change(&self, change: RowChange<ToolStats>) {
        match &change {
            RowChange::Insert { new } | RowChange::Update { new, .. } => {
                let stats = new.clone();
                self.current.update(|current| {
                    if current.as_ref().is_some_and(|c| c.tool_id == stats.tool_id) {
                        *current = Some(stats);
                    }
                });
            }
            RowChange::Delete { id: Some(id), .. } => {
                self.current.update(|current| {
                    if current.as_ref().is_some_and(|c| c.row_id() == *id) {
                        *current = None;
                    }
                });
            }
            RowChange::Delete { id: None, .. } => {}
        }
        self.stats
            .update(|rows| crate::realtime::apply_change(rows, change));
    }
}
