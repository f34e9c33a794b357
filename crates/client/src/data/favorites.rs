use toologist_shared::{NewFavorite, UserFavorite, FAVORITES_TABLE};
use uuid::Uuid;

use super::{DataContext, Outcome};
use crate::backend::Query;
use crate::resource::{ApplyOutcome, Resource};

/// The signed-in user's favorite tools.
#[derive(Clone)]
pub struct FavoritesStore {
    ctx: DataContext,
    favorites: Resource<Vec<UserFavorite>>,
}

impl FavoritesStore {
    pub fn new(ctx: DataContext) -> Self {
        Self {
            ctx,
            favorites: Resource::default(),
        }
    }

    pub fn favorites(&self) -> &Resource<Vec<UserFavorite>> {
        &self.favorites
    }

    /// Signed out, the list is simply empty.
    pub async fn fetch(&self) -> ApplyOutcome {
        let Some(user_id) = self.ctx.session().user_id() else {
            return self.favorites.resolve(Vec::new());
        };
        let query = Query::table(FAVORITES_TABLE)
            .select("*, tools(*)")
            .eq("user_id", user_id)
            .order("created_at", false);
        self.ctx.fetch_rows(&self.favorites, query, "favorites").await
    }

    pub fn is_favorite(&self, tool_id: Uuid) -> bool {
        self.favorites
            .snapshot()
            .data
            .iter()
            .any(|f| f.tool_id == tool_id)
    }

    pub async fn add_favorite(&self, tool_id: Uuid) -> Outcome {
        let user_id = match self.ctx.require_user("save favorites") {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        let row = NewFavorite { user_id, tool_id };
        let result = self.ctx.insert(FAVORITES_TABLE, &row).await;
        let outcome = self.ctx.settle_write(
            result,
            "add favorite",
            "Added to favorites.",
            Some("This tool is already in your favorites."),
        );
        if matches!(outcome, Outcome::Done | Outcome::AlreadyExists) {
            self.fetch().await;
        }
        outcome
    }

    pub async fn remove_favorite(&self, tool_id: Uuid) -> Outcome {
        let user_id = match self.ctx.require_user("manage favorites") {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        let query = Query::table(FAVORITES_TABLE)
            .eq("user_id", user_id)
            .eq("tool_id", tool_id);
        let result = self.ctx.delete(&query).await;
        let outcome = self
            .ctx
            .settle_change(result, "remove favorite", "Removed from favorites.");
        if outcome.is_done() {
            self.fetch().await;
        }
        outcome
    }

    /// Add or remove depending on the last fetched list.
    pub async fn toggle_favorite(&self, tool_id: Uuid) -> Outcome {
        if self.is_favorite(tool_id) {
            self.remove_favorite(tool_id).await
        } else {
            self.add_favorite(tool_id).await
        }
    }
}
