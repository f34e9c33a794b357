//! Row types for the tables the directory reads and writes.
//!
//! Field names follow the Postgres column names, so these types deserialize
//! straight from PostgREST responses and from realtime change payloads.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Table names ---

pub const TOOLS_TABLE: &str = "tools";
pub const CATEGORIES_TABLE: &str = "categories";
pub const REVIEWS_TABLE: &str = "reviews";
pub const REVIEW_VOTES_TABLE: &str = "review_votes";
pub const FAVORITES_TABLE: &str = "user_favorites";
pub const COLLECTIONS_TABLE: &str = "collections";
pub const COLLECTION_TOOLS_TABLE: &str = "collection_tools";
pub const WALLET_TABLE: &str = "tool_wallet";
pub const TOOL_STATS_TABLE: &str = "tool_stats";
pub const PROFILES_TABLE: &str = "profiles";

/// Rows that carry a stable identifier, used to patch local lists from
/// realtime change events.
pub trait Identified {
    /// Primary-key column, as found in a delete event's `old_record`.
    const KEY_COLUMN: &'static str = "id";

    fn row_id(&self) -> String;
}

// --- Tools ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PricingTier {
    Free,
    Freemium,
    Paid,
    Enterprise,
    #[serde(untagged)]
    Other(String),
}

impl Default for PricingTier {
    fn default() -> Self {
        PricingTier::Other(String::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub pricing: PricingTier,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub review_count: i64,
    #[serde(default)]
    pub featured: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Identified for Tool {
    fn row_id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub tool_count: i64,
}

impl Identified for Category {
    fn row_id(&self) -> String {
        self.id.to_string()
    }
}

// --- Reviews ---

/// Author columns embedded into a review through `profiles(...)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewAuthor {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Review {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub user_id: Uuid,
    pub rating: i32,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    #[serde(default)]
    pub helpful_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "profiles", skip_serializing_if = "Option::is_none")]
    pub author: Option<ReviewAuthor>,
}

impl Identified for Review {
    fn row_id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewReview {
    pub tool_id: Uuid,
    pub user_id: Uuid,
    pub rating: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
}

/// Editable review columns. Unset fields are left out of the PATCH body.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReviewUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pros: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cons: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewVote {
    pub review_id: Uuid,
    pub user_id: Uuid,
    pub is_helpful: bool,
}

// --- Favorites ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserFavorite {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tool_id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "tools", skip_serializing_if = "Option::is_none")]
    pub tool: Option<Tool>,
}

impl Identified for UserFavorite {
    fn row_id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewFavorite {
    pub user_id: Uuid,
    pub tool_id: Uuid,
}

// --- Collections ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionTool {
    pub collection_id: Uuid,
    pub tool_id: Uuid,
    #[serde(default)]
    pub added_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "tools", skip_serializing_if = "Option::is_none")]
    pub tool: Option<Tool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Collection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collection_tools: Vec<CollectionTool>,
}

impl Identified for Collection {
    fn row_id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewCollection {
    pub user_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewCollectionTool {
    pub collection_id: Uuid,
    pub tool_id: Uuid,
}

// --- Wallet ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionType {
    Free,
    Paid,
    Trial,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletTool {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tool_id: Uuid,
    pub subscription_type: SubscriptionType,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub monthly_cost: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "tools", skip_serializing_if = "Option::is_none")]
    pub tool: Option<Tool>,
}

impl Identified for WalletTool {
    fn row_id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewWalletTool {
    pub user_id: Uuid,
    pub tool_id: Uuid,
    pub subscription_type: SubscriptionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_cost: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WalletUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<SubscriptionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_cost: Option<f64>,
}

// --- Stats & profiles ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolStats {
    pub tool_id: Uuid,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub favorites_count: i64,
    #[serde(default)]
    pub clicks: i64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Identified for ToolStats {
    const KEY_COLUMN: &'static str = "tool_id";

    fn row_id(&self) -> String {
        self.tool_id.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Identified for Profile {
    fn row_id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}
