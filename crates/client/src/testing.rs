//! In-memory backend and fixtures for store tests.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use toologist_shared::{
    ApiError, COLLECTION_TOOLS_TABLE, FAVORITES_TABLE, REVIEWS_TABLE, REVIEW_VOTES_TABLE,
    UNIQUE_VIOLATION, WALLET_TABLE,
};
use uuid::Uuid;

use crate::auth::{test_session, SessionHandle};
use crate::backend::{Backend, Filter, Query};
use crate::data::DataContext;
use crate::notify::{Notice, NoticeLevel, NoticeLog};

/// Tables as JSON rows, with the unique constraints of the real schema.
#[derive(Default)]
pub(crate) struct MockBackend {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    calls: AtomicUsize,
    held: Mutex<VecDeque<oneshot::Receiver<Result<Vec<Value>, ApiError>>>>,
    fail_next: Mutex<Option<ApiError>>,
}

fn unique_columns(table: &str) -> &'static [&'static str] {
    match table {
        FAVORITES_TABLE => &["user_id", "tool_id"],
        COLLECTION_TOOLS_TABLE => &["collection_id", "tool_id"],
        WALLET_TABLE => &["user_id", "tool_id"],
        REVIEW_VOTES_TABLE => &["review_id", "user_id"],
        REVIEWS_TABLE => &["tool_id", "user_id"],
        _ => &[],
    }
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn ilike(haystack: &str, pattern: &str) -> bool {
    let needle = pattern.trim_matches('%').to_lowercase();
    haystack.to_lowercase().contains(&needle)
}

fn matches(row: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(column, value) => text(row.get(column)) == *value,
        Filter::ILike(column, pattern) => ilike(&text(row.get(column)), pattern),
        Filter::Or(filters) => filters.iter().any(|f| matches(row, f)),
    }
}

fn compare(a: &Value, b: &Value, column: &str) -> CmpOrdering {
    match (a.get(column), b.get(column)) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (x, y) => text(x).cmp(&text(y)),
    }
}

impl MockBackend {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn seed(&self, table: &str, rows: Vec<Value>) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub(crate) fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Backend calls of any kind so far.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The next `select` waits for the returned sender and answers with
    /// whatever is sent through it.
    pub(crate) fn hold_next_select(&self) -> oneshot::Sender<Result<Vec<Value>, ApiError>> {
        let (tx, rx) = oneshot::channel();
        self.held.lock().unwrap().push_back(rx);
        tx
    }

    /// The next call of any kind fails with `error`.
    pub(crate) fn fail_next(&self, error: ApiError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    fn begin_call(&self) -> Result<(), ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fail_next.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn query_rows(&self, query: &Query) -> Vec<Value> {
        let tables = self.tables.lock().unwrap();
        let mut rows: Vec<Value> = tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| matches(row, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for order in query.order.iter().rev() {
            rows.sort_by(|a, b| {
                let ord = compare(a, b, &order.column);
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        rows
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, ApiError> {
        self.begin_call()?;
        let held = self.held.lock().unwrap().pop_front();
        match held {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(ApiError::Network("request dropped".to_string()))),
            None => Ok(self.query_rows(query)),
        }
    }

    async fn insert(&self, table: &str, mut row: Value) -> Result<Vec<Value>, ApiError> {
        self.begin_call()?;
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(table.to_string()).or_default();

        let unique = unique_columns(table);
        if !unique.is_empty()
            && rows
                .iter()
                .any(|existing| unique.iter().all(|c| existing.get(*c) == row.get(*c)))
        {
            return Err(ApiError::Backend {
                status: 409,
                code: UNIQUE_VIOLATION.to_string(),
                message: format!("duplicate key value violates unique constraint \"{table}_key\""),
                details: None,
            });
        }

        if let Some(object) = row.as_object_mut() {
            object
                .entry("id")
                .or_insert_with(|| json!(Uuid::new_v4()));
            object
                .entry("created_at")
                .or_insert_with(|| json!(Utc::now()));
        }
        rows.push(row.clone());
        Ok(vec![row])
    }

    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>, ApiError> {
        self.begin_call()?;
        let mut tables = self.tables.lock().unwrap();
        let mut updated = Vec::new();
        if let Some(rows) = tables.get_mut(&query.table) {
            for row in rows
                .iter_mut()
                .filter(|row| query.filters.iter().all(|f| matches(row, f)))
            {
                if let (Some(target), Some(changes)) = (row.as_object_mut(), patch.as_object()) {
                    for (key, value) in changes {
                        target.insert(key.clone(), value.clone());
                    }
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, query: &Query) -> Result<Vec<Value>, ApiError> {
        self.begin_call()?;
        let mut tables = self.tables.lock().unwrap();
        let mut removed = Vec::new();
        if let Some(rows) = tables.get_mut(&query.table) {
            rows.retain(|row| {
                let hit = query.filters.iter().all(|f| matches(row, f));
                if hit {
                    removed.push(row.clone());
                }
                !hit
            });
        }
        Ok(removed)
    }
}

/// A data context over a fresh [`MockBackend`].
pub(crate) struct Harness {
    pub(crate) backend: Arc<MockBackend>,
    pub(crate) session: SessionHandle,
    pub(crate) notices: NoticeLog,
    pub(crate) ctx: DataContext,
}

impl Harness {
    pub(crate) fn signed_out() -> Self {
        let backend = MockBackend::new();
        let session = SessionHandle::default();
        let notices = NoticeLog::new();
        let ctx = DataContext::new(backend.clone(), session.clone(), Arc::new(notices.clone()));
        Self {
            backend,
            session,
            notices,
            ctx,
        }
    }

    pub(crate) fn signed_in() -> Self {
        let harness = Self::signed_out();
        harness
            .session
            .set(Some(test_session(Uuid::new_v4())));
        harness
    }

    pub(crate) fn user_id(&self) -> Uuid {
        self.session.user_id().expect("harness is signed in")
    }

    pub(crate) fn last_notice(&self) -> Notice {
        self.notices.last().expect("a notice was sent")
    }

    pub(crate) fn notices_at(&self, level: NoticeLevel) -> Vec<Notice> {
        self.notices
            .notices()
            .into_iter()
            .filter(|n| n.level == level)
            .collect()
    }
}

pub(crate) fn tool_row(name: &str, category: &str) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "slug": name.to_lowercase().replace(' ', "-"),
        "name": name,
        "description": format!("{name} does AI things"),
        "category": category,
        "pricing": "freemium",
        "rating": 4.5,
        "review_count": 10,
        "featured": false,
        "created_at": Utc::now(),
    })
}
