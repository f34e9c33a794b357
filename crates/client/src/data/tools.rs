use toologist_shared::{RowChange, Tool, TOOLS_TABLE};

use super::DataContext;
use crate::backend::{Filter, Query};
use crate::realtime::apply_change;
use crate::resource::{ApplyOutcome, ApplyPolicy, Resource};

/// Shorter search terms are not sent to the backend.
pub const MIN_SEARCH_CHARS: usize = 3;

/// Tool listings, search results and the tool on a detail page.
#[derive(Clone)]
pub struct ToolsStore {
    ctx: DataContext,
    tools: Resource<Vec<Tool>>,
    results: Resource<Vec<Tool>>,
    current: Resource<Option<Tool>>,
}

impl ToolsStore {
    pub fn new(ctx: DataContext) -> Self {
        Self::with_policy(ctx, ApplyPolicy::default())
    }

    pub fn with_policy(ctx: DataContext, policy: ApplyPolicy) -> Self {
        Self {
            ctx,
            tools: Resource::new(policy),
            results: Resource::new(policy),
            current: Resource::new(policy),
        }
    }

    pub fn tools(&self) -> &Resource<Vec<Tool>> {
        &self.tools
    }

    pub fn search_results(&self) -> &Resource<Vec<Tool>> {
        &self.results
    }

    pub fn current(&self) -> &Resource<Option<Tool>> {
        &self.current
    }

    pub async fn fetch_all(&self) -> ApplyOutcome {
        let query = Query::table(TOOLS_TABLE).order("name", true);
        self.ctx.fetch_rows(&self.tools, query, "tools").await
    }

    pub async fn fetch_by_category(&self, category_slug: &str) -> ApplyOutcome {
        let query = Query::table(TOOLS_TABLE)
            .eq("category", category_slug)
            .order("name", true);
        self.ctx.fetch_rows(&self.tools, query, "tools").await
    }

    pub async fn fetch_featured(&self) -> ApplyOutcome {
        let query = Query::table(TOOLS_TABLE)
            .eq("featured", true)
            .order("rating", false);
        self.ctx.fetch_rows(&self.tools, query, "featured tools").await
    }

    /// Case-insensitive match on name or description. Terms shorter than
    /// [`MIN_SEARCH_CHARS`] clear the results without a request.
    pub async fn search(&self, term: &str) -> ApplyOutcome {
        let term: String = term
            .trim()
            .chars()
            .filter(|c| !matches!(c, ',' | '(' | ')'))
            .collect();
        if term.chars().count() < MIN_SEARCH_CHARS {
            return self.results.resolve(Vec::new());
        }

        let pattern = format!("%{term}%");
        let query = Query::table(TOOLS_TABLE)
            .or(vec![
                Filter::ILike("name".to_string(), pattern.clone()),
                Filter::ILike("description".to_string(), pattern),
            ])
            .order("name", true);
        self.ctx.fetch_rows(&self.results, query, "search results").await
    }

    pub async fn fetch_by_slug(&self, slug: &str) -> ApplyOutcome {
        let query = Query::table(TOOLS_TABLE).eq("slug", slug);
        self.ctx.fetch_first(&self.current, query, "tool").await
    }

    /// Patch the listing with a realtime change.
    pub fn apply_change(&self, change: RowChange<Tool>) {
        self.tools.update(|rows| apply_change(rows, change));
    }
}
