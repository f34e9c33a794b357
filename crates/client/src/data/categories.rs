use toologist_shared::{Category, CATEGORIES_TABLE};

use super::DataContext;
use crate::backend::Query;
use crate::resource::{ApplyOutcome, Resource};

#[derive(Clone)]
pub struct CategoriesStore {
    ctx: DataContext,
    categories: Resource<Vec<Category>>,
}

impl CategoriesStore {
    pub fn new(ctx: DataContext) -> Self {
        Self {
            ctx,
            categories: Resource::default(),
        }
    }

    pub fn categories(&self) -> &Resource<Vec<Category>> {
        &self.categories
    }

    pub async fn fetch_all(&self) -> ApplyOutcome {
        let query = Query::table(CATEGORIES_TABLE).order("name", true);
        self.ctx.fetch_rows(&self.categories, query, "categories").await
    }

    pub fn by_slug(&self, slug: &str) -> Option<Category> {
        self.categories.data().into_iter().find(|c| c.slug == slug)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::testing::Harness;

    #[tokio::test]
    async fn loads_categories_by_name() {
        let h = Harness::signed_out();
        h.backend.seed(
            CATEGORIES_TABLE,
            vec![
                json!({ "id": Uuid::new_v4(), "name": "Writing", "slug": "writing", "tool_count": 12 }),
                json!({ "id": Uuid::new_v4(), "name": "Audio", "slug": "audio" }),
            ],
        );
        let store = CategoriesStore::new(h.ctx.clone());

        store.fetch_all().await;
        let names: Vec<_> = store.categories().data().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Audio", "Writing"]);
        assert_eq!(store.by_slug("writing").map(|c| c.tool_count), Some(12));
    }
}
