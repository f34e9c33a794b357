use std::sync::{Arc, Mutex};

use toologist_shared::{
    NewReview, Review, ReviewUpdate, ReviewVote, RowChange, REVIEWS_TABLE, REVIEW_VOTES_TABLE,
};
use uuid::Uuid;

use super::{DataContext, Outcome};
use crate::backend::Query;
use crate::realtime::apply_change;
use crate::resource::{ApplyOutcome, Resource};

const REVIEW_COLUMNS: &str = "*, profiles(username, avatar_url)";

/// Review form contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewDraft {
    pub rating: i32,
    pub title: Option<String>,
    pub content: String,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
}

fn rating_error(rating: i32) -> Option<&'static str> {
    (!(1..=5).contains(&rating)).then_some("Rating must be between 1 and 5.")
}

/// Reviews of one tool, newest first.
#[derive(Clone)]
pub struct ReviewsStore {
    ctx: DataContext,
    reviews: Resource<Vec<Review>>,
    tool_id: Arc<Mutex<Option<Uuid>>>,
}

impl ReviewsStore {
    pub fn new(ctx: DataContext) -> Self {
        Self {
            ctx,
            reviews: Resource::default(),
            tool_id: Arc::new(Mutex::new(None)),
        }
    }

    pub fn reviews(&self) -> &Resource<Vec<Review>> {
        &self.reviews
    }

    /// Tool whose reviews were loaded last.
    pub fn tool_id(&self) -> Option<Uuid> {
        self.tool_id.lock().ok().and_then(|id| *id)
    }

    pub async fn fetch_for_tool(&self, tool_id: Uuid) -> ApplyOutcome {
        if let Ok(mut current) = self.tool_id.lock() {
            *current = Some(tool_id);
        }
        let query = Query::table(REVIEWS_TABLE)
            .select(REVIEW_COLUMNS)
            .eq("tool_id", tool_id)
            .order("created_at", false);
        self.ctx.fetch_rows(&self.reviews, query, "reviews").await
    }

    async fn refresh(&self, tool_id: Uuid) {
        self.fetch_for_tool(tool_id).await;
    }

    pub async fn submit_review(&self, tool_id: Uuid, draft: ReviewDraft) -> Outcome {
        if let Some(message) = rating_error(draft.rating) {
            return self.ctx.invalid(message);
        }
        if draft.content.trim().is_empty() {
            return self.ctx.invalid("Please write a few words about the tool.");
        }
        let user_id = match self.ctx.require_user("write a review") {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        let row = NewReview {
            tool_id,
            user_id,
            rating: draft.rating,
            title: draft.title,
            content: draft.content.trim().to_string(),
            pros: draft.pros,
            cons: draft.cons,
        };
        let result = self.ctx.insert(REVIEWS_TABLE, &row).await;
        let outcome = self.ctx.settle_write(
            result,
            "submit review",
            "Review submitted.",
            Some("You have already reviewed this tool."),
        );
        if outcome.is_done() {
            self.refresh(tool_id).await;
        }
        outcome
    }

    /// Edit one of the signed-in user's reviews.
    pub async fn update_review(&self, review_id: Uuid, changes: ReviewUpdate) -> Outcome {
        if let Some(message) = changes.rating.and_then(rating_error) {
            return self.ctx.invalid(message);
        }
        let user_id = match self.ctx.require_user("edit your review") {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        let query = Query::table(REVIEWS_TABLE)
            .eq("id", review_id)
            .eq("user_id", user_id);
        let result = self.ctx.update(&query, &changes).await;
        let outcome = self
            .ctx
            .settle_change(result, "update review", "Review updated.");
        if let (true, Some(tool_id)) = (outcome.is_done(), self.tool_id()) {
            self.refresh(tool_id).await;
        }
        outcome
    }

    pub async fn delete_review(&self, review_id: Uuid) -> Outcome {
        let user_id = match self.ctx.require_user("delete your review") {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        let query = Query::table(REVIEWS_TABLE)
            .eq("id", review_id)
            .eq("user_id", user_id);
        let result = self.ctx.delete(&query).await;
        let outcome = self
            .ctx
            .settle_change(result, "delete review", "Review deleted.");
        if let (true, Some(tool_id)) = (outcome.is_done(), self.tool_id()) {
            self.refresh(tool_id).await;
        }
        outcome
    }

    /// Record whether a review was helpful. One vote per user and review.
    pub async fn vote_helpful(&self, review_id: Uuid, is_helpful: bool) -> Outcome {
        let user_id = match self.ctx.require_user("vote on reviews") {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        let vote = ReviewVote {
            review_id,
            user_id,
            is_helpful,
        };
        let result = self.ctx.insert(REVIEW_VOTES_TABLE, &vote).await;
        let outcome = self.ctx.settle_write(
            result,
            "record vote",
            "Thanks for your feedback!",
            Some("You already voted on this review."),
        );
        // helpful_count is maintained by a trigger.
        if let (true, Some(tool_id)) = (outcome.is_done(), self.tool_id()) {
            self.refresh(tool_id).await;
        }
        outcome
    }

    pub fn apply_change(&self, change: RowChange<Review>) {
        self.reviews.update(|rows| apply_change(rows, change));
    }
}
