//! PostgREST query builder.
//!
//! Only the operators the directory actually uses are modelled. A [`Query`]
//! renders to the `(key, value)` pairs PostgREST expects in the URL; the
//! in-memory backend used in tests evaluates the same structure.

use std::fmt::Display;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column=eq.value`
    Eq(String, String),
    /// `column=ilike.pattern`, `%` as wildcard
    ILike(String, String),
    /// `or=(a.ilike.x,b.eq.y)`
    Or(Vec<Filter>),
}

impl Filter {
    fn condition(&self) -> String {
        match self {
            Filter::Eq(_, value) => format!("eq.{value}"),
            Filter::ILike(_, pattern) => format!("ilike.{pattern}"),
            Filter::Or(filters) => format!(
                "({})",
                filters
                    .iter()
                    .map(Filter::inline)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        }
    }

    /// `column.op.value`, the form used inside `or=(...)`.
    fn inline(&self) -> String {
        match self {
            Filter::Eq(column, _) | Filter::ILike(column, _) => {
                format!("{column}.{}", self.condition())
            }
            Filter::Or(_) => format!("or{}", self.condition()),
        }
    }

    fn key(&self) -> &str {
        match self {
            Filter::Eq(column, _) | Filter::ILike(column, _) => column,
            Filter::Or(_) => "or",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub select: String,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            select: "*".to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.select = columns.to_string();
        self
    }

    pub fn eq(mut self, column: &str, value: impl Display) -> Self {
        self.filters
            .push(Filter::Eq(column.to_string(), value.to_string()));
        self
    }

    pub fn or(mut self, filters: Vec<Filter>) -> Self {
        self.filters.push(Filter::Or(filters));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// URL query pairs, unencoded.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("select".to_string(), self.select.clone())];
        for filter in &self.filters {
            pairs.push((filter.key().to_string(), filter.condition()));
        }
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
                .collect::<Vec<_>>()
                .join(",");
            pairs.push(("order".to_string(), order));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        pairs
    }

    /// Filter-only pairs, for PATCH and DELETE.
    pub fn filter_pairs(&self) -> Vec<(String, String)> {
        self.filters
            .iter()
            .map(|f| (f.key().to_string(), f.condition()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(key: &str, value: &str) -> (String, String) {
        (key.to_string(), value.to_string())
    }

    #[test]
    fn renders_filters_order_and_limit() {
        let query = Query::table("tools")
            .select("*,categories(name)")
            .eq("category", "writing")
            .order("rating", false)
            .order("name", true)
            .limit(20);

        assert_eq!(
            query.to_pairs(),
            vec![
                pair("select", "*,categories(name)"),
                pair("category", "eq.writing"),
                pair("order", "rating.desc,name.asc"),
                pair("limit", "20"),
            ]
        );
    }

    #[test]
    fn renders_or_group_inline() {
        let query = Query::table("tools").or(vec![
            Filter::ILike("name".to_string(), "%chat%".to_string()),
            Filter::ILike("description".to_string(), "%chat%".to_string()),
        ]);

        assert_eq!(
            query.filter_pairs(),
            vec![pair("or", "(name.ilike.%chat%,description.ilike.%chat%)")]
        );
    }
}
