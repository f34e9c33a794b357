use toologist_shared::{Profile, ProfileUpdate, PROFILES_TABLE};
use uuid::Uuid;

use super::{DataContext, Outcome};
use crate::backend::Query;
use crate::resource::{ApplyOutcome, Resource};

#[derive(Clone)]
pub struct ProfileStore {
    ctx: DataContext,
    profile: Resource<Option<Profile>>,
}

impl ProfileStore {
    pub fn new(ctx: DataContext) -> Self {
        Self {
            ctx,
            profile: Resource::default(),
        }
    }

    pub fn profile(&self) -> &Resource<Option<Profile>> {
        &self.profile
    }

    pub async fn fetch(&self, user_id: Uuid) -> ApplyOutcome {
        let query = Query::table(PROFILES_TABLE).eq("id", user_id);
        self.ctx.fetch_first(&self.profile, query, "profile").await
    }

    /// The signed-in user's profile; cleared when signed out.
    pub async fn fetch_own(&self) -> ApplyOutcome {
        match self.ctx.session().user_id() {
            Some(user_id) => self.fetch(user_id).await,
            None => self.profile.resolve(None),
        }
    }

    /// Only the signed-in user's own row is ever patched.
    pub async fn update_profile(&self, changes: ProfileUpdate) -> Outcome {
        if changes
            .username
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return self.ctx.invalid("Username cannot be empty.");
        }
        let user_id = match self.ctx.require_user("edit your profile") {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        let query = Query::table(PROFILES_TABLE).eq("id", user_id);
        let result = self.ctx.update(&query, &changes).await;
        let outcome = self
            .ctx
            .settle_change(result, "update profile", "Profile saved.");
        if outcome.is_done() {
            self.fetch(user_id).await;
        }
        outcome
    }
}
