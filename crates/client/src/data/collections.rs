use toologist_shared::{
    Collection, NewCollection, NewCollectionTool, COLLECTIONS_TABLE, COLLECTION_TOOLS_TABLE,
};
use uuid::Uuid;

use super::{DataContext, Outcome};
use crate::backend::Query;
use crate::resource::{ApplyOutcome, Resource};

/// The signed-in user's collections with their tools embedded.
#[derive(Clone)]
pub struct CollectionsStore {
    ctx: DataContext,
    collections: Resource<Vec<Collection>>,
}

impl CollectionsStore {
    pub fn new(ctx: DataContext) -> Self {
        Self {
            ctx,
            collections: Resource::default(),
        }
    }

    pub fn collections(&self) -> &Resource<Vec<Collection>> {
        &self.collections
    }

    pub async fn fetch(&self) -> ApplyOutcome {
        let Some(user_id) = self.ctx.session().user_id() else {
            return self.collections.resolve(Vec::new());
        };
        let query = Query::table(COLLECTIONS_TABLE)
            .select("*, collection_tools(*, tools(*))")
            .eq("user_id", user_id)
            .order("created_at", false);
        self.ctx.fetch_rows(&self.collections, query, "collections").await
    }

    async fn refresh_after(&self, outcome: Outcome) -> Outcome {
        if matches!(outcome, Outcome::Done | Outcome::AlreadyExists) {
            self.fetch().await;
        }
        outcome
    }

    pub async fn create_collection(
        &self,
        name: &str,
        description: Option<String>,
        is_public: bool,
    ) -> Outcome {
        let name = name.trim();
        if name.is_empty() {
            return self.ctx.invalid("Collection name cannot be empty.");
        }
        let user_id = match self.ctx.require_user("create collections") {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        let row = NewCollection {
            user_id,
            name: name.to_string(),
            description,
            is_public,
        };
        let result = self.ctx.insert(COLLECTIONS_TABLE, &row).await;
        let outcome = self
            .ctx
            .settle_write(result, "create collection", "Collection created.", None);
        self.refresh_after(outcome).await
    }

    pub async fn delete_collection(&self, collection_id: Uuid) -> Outcome {
        let user_id = match self.ctx.require_user("manage collections") {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        let query = Query::table(COLLECTIONS_TABLE)
            .eq("id", collection_id)
            .eq("user_id", user_id);
        let result = self.ctx.delete(&query).await;
        let outcome = self
            .ctx
            .settle_change(result, "delete collection", "Collection deleted.");
        self.refresh_after(outcome).await
    }

    pub async fn add_tool_to_collection(&self, collection_id: Uuid, tool_id: Uuid) -> Outcome {
        if let Err(outcome) = self.ctx.require_user("manage collections") {
            return outcome;
        }

        let row = NewCollectionTool {
            collection_id,
            tool_id,
        };
        let result = self.ctx.insert(COLLECTION_TOOLS_TABLE, &row).await;
        let outcome = self.ctx.settle_write(
            result,
            "add tool to collection",
            "Added to collection.",
            Some("This tool is already in the collection."),
        );
        self.refresh_after(outcome).await
    }

    pub async fn remove_tool_from_collection(&self, collection_id: Uuid, tool_id: Uuid) -> Outcome {
        if let Err(outcome) = self.ctx.require_user("manage collections") {
            return outcome;
        }

        let query = Query::table(COLLECTION_TOOLS_TABLE)
            .eq("collection_id", collection_id)
            .eq("tool_id", tool_id);
        let result = self.ctx.delete(&query).await;
        let outcome = self.ctx.settle_change(
            result,
            "remove tool from collection",
            "Removed from collection.",
        );
        self.refresh_after(outcome).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoticeLevel;
    use crate::testing::Harness;

    #[tokio::test]
    async fn create_then_list() {
        let h = Harness::signed_in();
        let store = CollectionsStore::new(h.ctx.clone());

        let outcome = store
            .create_collection("  Writing stack ", Some("Daily tools".to_string()), false)
            .await;
        assert_eq!(outcome, Outcome::Done);

        let collections = store.collections().data();
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0].name, "Writing stack");
        assert_eq!(collections[0].user_id, h.user_id());
    }

    #[tokio::test]
    async fn blank_name_is_invalid() {
        let h = Harness::signed_in();
        let store = CollectionsStore::new(h.ctx.clone());

        assert!(matches!(
            store.create_collection("   ", None, true).await,
            Outcome::Invalid(_)
        ));
        assert_eq!(h.backend.calls(), 0);
    }

    #[tokio::test]
    async fn duplicate_tool_in_collection_is_informational() {
        let h = Harness::signed_in();
        let store = CollectionsStore::new(h.ctx.clone());
        let (collection, tool) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(store.add_tool_to_collection(collection, tool).await, Outcome::Done);
        assert_eq!(
            store.add_tool_to_collection(collection, tool).await,
            Outcome::AlreadyExists
        );
        assert_eq!(h.backend.rows(COLLECTION_TOOLS_TABLE).len(), 1);
        assert_eq!(h.last_notice().level, NoticeLevel::Info);

        assert_eq!(
            store.remove_tool_from_collection(collection, tool).await,
            Outcome::Done
        );
        assert!(h.backend.rows(COLLECTION_TOOLS_TABLE).is_empty());
        assert_eq!(
            store.remove_tool_from_collection(collection, tool).await,
            Outcome::NotFound
        );
    }

    #[tokio::test]
    async fn signed_out_mutations_make_no_calls() {
        let h = Harness::signed_out();
        let store = CollectionsStore::new(h.ctx.clone());

        assert_eq!(
            store.create_collection("Mine", None, false).await,
            Outcome::SignInRequired
        );
        assert_eq!(
            store
                .add_tool_to_collection(Uuid::new_v4(), Uuid::new_v4())
                .await,
            Outcome::SignInRequired
        );
        assert_eq!(h.backend.calls(), 0);
    }
}
