use chrono::{Duration, NaiveDate};
use toologist_shared::{
    NewWalletTool, SubscriptionType, WalletTool, WalletUpdate, WALLET_TABLE,
};
use uuid::Uuid;

use super::{DataContext, Outcome};
use crate::backend::Query;
use crate::resource::{ApplyOutcome, Resource};

/// Items ending within this many days count as ending soon.
pub const ENDING_SOON_DAYS: i64 = 7;

/// Wallet form contents.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletEntry {
    pub tool_id: Uuid,
    pub subscription_type: SubscriptionType,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub monthly_cost: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalletSummary {
    pub total: usize,
    pub free: usize,
    pub paid: usize,
    pub trial: usize,
    /// Sum of `monthly_cost` over paid items.
    pub monthly_cost: f64,
    pub ending_soon: Vec<WalletTool>,
}

fn dates_error(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Option<&'static str> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => Some("End date cannot be before the start date."),
        _ => None,
    }
}

/// Subscriptions the signed-in user keeps track of.
#[derive(Clone)]
pub struct WalletStore {
    ctx: DataContext,
    items: Resource<Vec<WalletTool>>,
}

impl WalletStore {
    pub fn new(ctx: DataContext) -> Self {
        Self {
            ctx,
            items: Resource::default(),
        }
    }

    pub fn items(&self) -> &Resource<Vec<WalletTool>> {
        &self.items
    }

    pub async fn fetch(&self) -> ApplyOutcome {
        let Some(user_id) = self.ctx.session().user_id() else {
            return self.items.resolve(Vec::new());
        };
        let query = Query::table(WALLET_TABLE)
            .select("*, tools(*)")
            .eq("user_id", user_id)
            .order("created_at", false);
        self.ctx.fetch_rows(&self.items, query, "wallet").await
    }

    pub async fn add_to_wallet(&self, entry: WalletEntry) -> Outcome {
        if let Some(message) = dates_error(entry.start_date, entry.end_date) {
            return self.ctx.invalid(message);
        }
        let user_id = match self.ctx.require_user("use your wallet") {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        let row = NewWalletTool {
            user_id,
            tool_id: entry.tool_id,
            subscription_type: entry.subscription_type,
            start_date: entry.start_date,
            end_date: entry.end_date,
            notes: entry.notes,
            monthly_cost: entry.monthly_cost,
        };
        let result = self.ctx.insert(WALLET_TABLE, &row).await;
        let outcome = self.ctx.settle_write(
            result,
            "add to wallet",
            "Added to your wallet.",
            Some("This tool is already in your wallet."),
        );
        if matches!(outcome, Outcome::Done | Outcome::AlreadyExists) {
            self.fetch().await;
        }
        outcome
    }

    pub async fn update_wallet_item(&self, item_id: Uuid, changes: WalletUpdate) -> Outcome {
        let current = self.items.data().into_iter().find(|i| i.id == item_id);
        let start = changes
            .start_date
            .or_else(|| current.as_ref().and_then(|i| i.start_date));
        let end = changes
            .end_date
            .or_else(|| current.as_ref().and_then(|i| i.end_date));
        if let Some(message) = dates_error(start, end) {
            return self.ctx.invalid(message);
        }
        let user_id = match self.ctx.require_user("use your wallet") {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        let query = Query::table(WALLET_TABLE)
            .eq("id", item_id)
            .eq("user_id", user_id);
        let result = self.ctx.update(&query, &changes).await;
        let outcome = self
            .ctx
            .settle_change(result, "update wallet item", "Wallet updated.");
        if outcome.is_done() {
            self.fetch().await;
        }
        outcome
    }

    pub async fn remove_from_wallet(&self, item_id: Uuid) -> Outcome {
        let user_id = match self.ctx.require_user("use your wallet") {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        let query = Query::table(WALLET_TABLE)
            .eq("id", item_id)
            .eq("user_id", user_id);
        let result = self.ctx.delete(&query).await;
        let outcome = self
            .ctx
            .settle_change(result, "remove from wallet", "Removed from your wallet.");
        if outcome.is_done() {
            self.fetch().await;
        }
        outcome
    }

    /// Totals over the last fetched items.
    pub fn summary(&self, today: NaiveDate) -> WalletSummary {
        let items = self.items.data();
        let horizon = today + Duration::days(ENDING_SOON_DAYS);

        let mut summary = WalletSummary {
            total: items.len(),
            ..Default::default()
        };
        for item in items {
            match item.subscription_type {
                SubscriptionType::Free => summary.free += 1,
                SubscriptionType::Paid => {
                    summary.paid += 1;
                    summary.monthly_cost += item.monthly_cost.unwrap_or_default();
                }
                SubscriptionType::Trial => summary.trial += 1,
            }
            if item.end_date.is_some_and(|end| end >= today && end <= horizon) {
                summary.ending_soon.push(item);
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn entry(kind: SubscriptionType, end: Option<&str>, cost: Option<f64>) -> WalletEntry {
        WalletEntry {
            tool_id: Uuid::new_v4(),
            subscription_type: kind,
            start_date: Some(day("2024-01-01")),
            end_date: end.map(day),
            notes: None,
            monthly_cost: cost,
        }
    }

    #[tokio::test]
    async fn duplicate_wallet_item_is_informational() {
        let h = Harness::signed_in();
        let store = WalletStore::new(h.ctx.clone());
        let item = entry(SubscriptionType::Paid, None, Some(20.0));

        assert_eq!(store.add_to_wallet(item.clone()).await, Outcome::Done);
        assert_eq!(store.add_to_wallet(item).await, Outcome::AlreadyExists);
        assert_eq!(store.items().data().len(), 1);
    }

    #[tokio::test]
    async fn end_before_start_is_rejected() {
        let h = Harness::signed_in();
        let store = WalletStore::new(h.ctx.clone());

        let mut item = entry(SubscriptionType::Trial, Some("2023-12-01"), None);
        assert!(matches!(store.add_to_wallet(item.clone()).await, Outcome::Invalid(_)));

        item.end_date = Some(day("2024-02-01"));
        assert_eq!(store.add_to_wallet(item).await, Outcome::Done);
        let id = store.items().data()[0].id;

        let outcome = store
            .update_wallet_item(
                id,
                WalletUpdate {
                    end_date: Some(day("2023-06-01")),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(outcome, Outcome::Invalid(_)));
        assert_eq!(h.backend.calls(), 2);
    }

    #[tokio::test]
    async fn update_and_remove_refetch() {
        let h = Harness::signed_in();
        let store = WalletStore::new(h.ctx.clone());
        store
            .add_to_wallet(entry(SubscriptionType::Trial, Some("2024-02-01"), None))
            .await;
        let id = store.items().data()[0].id;

        let outcome = store
            .update_wallet_item(
                id,
                WalletUpdate {
                    subscription_type: Some(SubscriptionType::Paid),
                    monthly_cost: Some(12.5),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(store.items().data()[0].subscription_type, SubscriptionType::Paid);

        assert_eq!(store.remove_from_wallet(id).await, Outcome::Done);
        assert!(store.items().data().is_empty());
    }

    #[tokio::test]
    async fn summary_counts_costs_and_renewals() {
        let h = Harness::signed_in();
        let store = WalletStore::new(h.ctx.clone());
        store
            .add_to_wallet(entry(SubscriptionType::Paid, Some("2024-03-05"), Some(20.0)))
            .await;
        store
            .add_to_wallet(entry(SubscriptionType::Paid, None, Some(9.5)))
            .await;
        store
            .add_to_wallet(entry(SubscriptionType::Trial, Some("2024-03-20"), None))
            .await;
        store
            .add_to_wallet(entry(SubscriptionType::Free, None, None))
            .await;

        let summary = store.summary(day("2024-03-01"));
        assert_eq!(summary.total, 4);
        assert_eq!((summary.free, summary.paid, summary.trial), (1, 2, 1));
        assert!((summary.monthly_cost - 29.5).abs() < f64::EPSILON);
        assert_eq!(summary.ending_soon.len(), 1);
        assert_eq!(summary.ending_soon[0].end_date, Some(day("2024-03-05")));
    }
}
