//! Deal and price-drop alerts over Telegram
//!
//! Alerts are plain text. A failed send is logged and counted, it never
//! aborts the run.

use crate::analysis::{BatchSummary, DealType};
use crate::ingestion::types::{AnalyzedListing, PriceDrop, PropertyType, WriteStats};
use anyhow::Result;
use reqwest::Client;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// A saved search. Unset filters match everything.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub chat_id: i64,
    pub city: Option<String>,
    pub property_type: Option<PropertyType>,
    pub max_price: Option<Decimal>,
    pub min_score: Option<i16>,
    /// Empty means hot and good deals
    pub deal_types: Vec<DealType>,
}

impl Subscription {
    /// Listing falls inside the search's city, type and budget
    pub fn watches(&self, record: &AnalyzedListing) -> bool {
        let listing = &record.listing;

        if let Some(city) = &self.city {
            if !city.eq_ignore_ascii_case(&listing.city) {
                return false;
            }
        }

        if let Some(property_type) = self.property_type {
            if property_type != listing.property_type {
                return false;
            }
        }

        if let Some(max_price) = self.max_price {
            match listing.price {
                Some(price) if price <= max_price => {}
                _ => return false,
            }
        }

        true
    }

    /// Watched listing that is also a deal of the wanted kind and score
    pub fn matches(&self, record: &AnalyzedListing) -> bool {
        let analysis = &record.analysis;

        if !self.watches(record) {
            return false;
        }

        if let Some(min_score) = self.min_score {
            if i16::from(analysis.investment_score) < min_score {
                return false;
            }
        }

        if self.deal_types.is_empty() {
            analysis.deal_type.is_deal()
        } else {
            self.deal_types.contains(&analysis.deal_type)
        }
    }
}

/// Hot and good deals, best score first
pub fn alert_candidates(analyzed: &[AnalyzedListing]) -> Vec<&AnalyzedListing> {
    let mut candidates: Vec<&AnalyzedListing> = analyzed
        .iter()
        .filter(|r| r.analysis.deal_type.is_deal())
        .collect();

    candidates.sort_by(|a, b| b.analysis.investment_score.cmp(&a.analysis.investment_score));
    candidates
}

/// Price drops paired with the listing they were written for
pub fn price_drop_candidates<'a>(
    analyzed: &'a [AnalyzedListing],
    drops: &'a [PriceDrop],
) -> Vec<(&'a AnalyzedListing, &'a PriceDrop)> {
    drops
        .iter()
        .filter_map(|drop| {
            analyzed
                .iter()
                .find(|r| r.listing.external_id == drop.external_id)
                .map(|record| (record, drop))
        })
        .collect()
}

fn deal_label(deal_type: DealType) -> &'static str {
    match deal_type {
        DealType::HotDeal => "HOT DEAL",
        DealType::GoodDeal => "Good deal",
        DealType::FairPrice => "Fair price",
        DealType::Overpriced => "Overpriced",
    }
}

pub fn alert_text(record: &AnalyzedListing) -> String {
    let l = &record.listing;
    let a = &record.analysis;

    let mut lines = vec![format!("{}: {}", deal_label(a.deal_type), l.title)];

    match &l.district {
        Some(district) => lines.push(format!("{}, {} ({})", district, l.city, l.property_type)),
        None => lines.push(format!("{} ({})", l.city, l.property_type)),
    }

    if let Some(price) = l.price {
        lines.push(format!("Price: {} SAR", price.round_dp(0)));
    }

    if let (Some(ppsqm), Some(pct)) = (a.price_per_sqm, a.price_vs_market_percent) {
        lines.push(format!(
            "Price/sqm: {} ({}% vs market avg {})",
            ppsqm.round_dp(0),
            pct.round_dp(1),
            a.district_avg_price_per_sqm.round_dp(0)
        ));
    }

    if let Some(y) = a.estimated_annual_yield_percent {
        lines.push(format!("Estimated yield: {}%", y));
    }

    lines.push(format!("Score: {}/100", a.investment_score));

    if let Some(url) = &l.source_url {
        lines.push(url.clone());
    }

    lines.join("\n")
}

pub fn price_drop_text(record: &AnalyzedListing, drop: &PriceDrop) -> String {
    let l = &record.listing;

    let mut lines = vec![
        format!("PRICE DROP: {}", l.title),
        format!("Old price: {} SAR", drop.old_price.round_dp(0)),
        format!("New price: {} SAR", drop.new_price.round_dp(0)),
    ];

    if let Some(percent) = drop.percent() {
        lines.push(format!("Drop: {}%", percent));
    }

    lines.push(format!("Now: {}", deal_label(record.analysis.deal_type)));

    if let Some(url) = &l.source_url {
        lines.push(url.clone());
    }

    lines.join("\n")
}

pub fn summary_text(summary: &BatchSummary, writes: Option<&WriteStats>, alerts: &NotifyStats) -> String {
    let mut lines = vec![
        "Deal analysis run finished".to_string(),
        format!("Listings: {}", summary),
    ];

    if let Some(writes) = writes {
        lines.push(format!("Database: {}", writes));
    }

    lines.push(format!("Alerts: {} sent, {} failed", alerts.sent, alerts.failed));
    lines.join("\n")
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotifyStats {
    pub sent: usize,
    pub failed: usize,
}

impl std::ops::AddAssign for NotifyStats {
    fn add_assign(&mut self, other: Self) {
        self.sent += other.sent;
        self.failed += other.failed;
    }
}

pub struct TelegramNotifier {
    bot_token: String,
    client: Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self { bot_token, client })
    }

    pub async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API, self.bot_token);

        let params = [
            ("chat_id", chat_id.to_string()),
            ("text", text.to_string()),
            ("disable_web_page_preview", "true".to_string()),
        ];

        let response = self.client.post(&url).form(&params).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(anyhow::anyhow!("Telegram sendMessage failed: {}", status));
        }

        Ok(())
    }

    /// Send every alert candidate to every subscription it matches
    pub async fn send_alerts(
        &self,
        subscriptions: &[Subscription],
        analyzed: &[AnalyzedListing],
    ) -> NotifyStats {
        let mut stats = NotifyStats::default();
        let candidates = alert_candidates(analyzed);

        info!(
            "Matching {} deals against {} subscriptions",
            candidates.len(),
            subscriptions.len()
        );

        for record in candidates {
            let text = alert_text(record);

            for sub in subscriptions.iter().filter(|s| s.matches(record)) {
                self.deliver(sub, &record.listing.external_id, &text, &mut stats)
                    .await;
            }
        }

        info!("Alerts complete: {} sent, {} failed", stats.sent, stats.failed);

        stats
    }

    /// Tell every subscription watching a listing that its price went down
    pub async fn send_price_drops(
        &self,
        subscriptions: &[Subscription],
        analyzed: &[AnalyzedListing],
        drops: &[PriceDrop],
    ) -> NotifyStats {
        let mut stats = NotifyStats::default();

        for (record, drop) in price_drop_candidates(analyzed, drops) {
            let text = price_drop_text(record, drop);

            for sub in subscriptions.iter().filter(|s| s.watches(record)) {
                self.deliver(sub, &drop.external_id, &text, &mut stats).await;
            }
        }

        info!(
            "Price drop alerts complete: {} sent, {} failed",
            stats.sent, stats.failed
        );

        stats
    }

    async fn deliver(
        &self,
        sub: &Subscription,
        external_id: &str,
        text: &str,
        stats: &mut NotifyStats,
    ) {
        match self.send_text(sub.chat_id, text).await {
            Ok(()) => {
                debug!("Sent {} to subscription {}", external_id, sub.id);
                stats.sent += 1;
            }
            Err(e) => {
                warn!(
                    "Failed to alert subscription {} about {}: {}",
                    sub.id, external_id, e
                );
                stats.failed += 1;
            }
        }
    }

    pub async fn send_summary(&self, admin_chat_id: i64, text: &str) {
        if let Err(e) = self.send_text(admin_chat_id, text).await {
            warn!("Failed to send run summary: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{MetricsSource, PropertyAnalysis};
    use crate::ingestion::types::Listing;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn mock_record(id: &str, deal_type: DealType, score: u8) -> AnalyzedListing {
        AnalyzedListing {
            listing: Listing {
                external_id: id.to_string(),
                source: "aqar".to_string(),
                source_url: Some(format!("https://sa.aqar.fm/{}", id)),
                title: "Apartment in Al Yasmin".to_string(),
                price: Some(dec!(680000)),
                size_sqm: Some(dec!(170)),
                bedrooms: Some(3),
                city: "Riyadh".to_string(),
                district: Some("Al Yasmin".to_string()),
                property_type: PropertyType::Apartment,
                listed_at: None,
                scraped_at: Utc::now(),
            },
            analysis: PropertyAnalysis {
                property_id: id.to_string(),
                price_per_sqm: Some(dec!(4000)),
                district_avg_price_per_sqm: dec!(5000),
                price_vs_market_percent: Some(dec!(-20)),
                investment_score: score,
                deal_type,
                estimated_monthly_rent: Some(dec!(3683.33)),
                estimated_annual_rent: Some(dec!(44200)),
                estimated_annual_yield_percent: Some(dec!(6.5)),
                market_source: MetricsSource::Inventory,
                market_sample_size: 12,
                analyzed_at: Utc::now(),
            },
        }
    }

    fn open_subscription() -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            chat_id: 42,
            city: None,
            property_type: None,
            max_price: None,
            min_score: None,
            deal_types: Vec::new(),
        }
    }

    #[test]
    fn test_alert_candidates_sorted_by_score() {
        let records = vec![
            mock_record("aqar-1", DealType::GoodDeal, 70),
            mock_record("aqar-2", DealType::FairPrice, 95),
            mock_record("aqar-3", DealType::HotDeal, 90),
            mock_record("aqar-4", DealType::Overpriced, 10),
        ];

        let ids: Vec<&str> = alert_candidates(&records)
            .iter()
            .map(|r| r.listing.external_id.as_str())
            .collect();
        assert_eq!(ids, vec!["aqar-3", "aqar-1"]);
    }

    #[test]
    fn test_subscription_filters() {
        let record = mock_record("aqar-1", DealType::HotDeal, 85);

        assert!(open_subscription().matches(&record));

        let city = Subscription {
            city: Some("riyadh".to_string()),
            ..open_subscription()
        };
        assert!(city.matches(&record));

        let other_city = Subscription {
            city: Some("Jeddah".to_string()),
            ..open_subscription()
        };
        assert!(!other_city.matches(&record));

        let villas = Subscription {
            property_type: Some(PropertyType::Villa),
            ..open_subscription()
        };
        assert!(!villas.matches(&record));

        let budget = Subscription {
            max_price: Some(dec!(500000)),
            ..open_subscription()
        };
        assert!(!budget.matches(&record));

        let picky = Subscription {
            min_score: Some(90),
            ..open_subscription()
        };
        assert!(!picky.matches(&record));

        let good_only = Subscription {
            deal_types: vec![DealType::GoodDeal],
            ..open_subscription()
        };
        assert!(!good_only.matches(&record));
    }

    #[test]
    fn test_open_subscription_skips_fair_price() {
        let record = mock_record("aqar-1", DealType::FairPrice, 60);
        assert!(!open_subscription().matches(&record));
    }

    #[test]
    fn test_alert_text_is_plain() {
        let text = alert_text(&mock_record("aqar-1", DealType::HotDeal, 85));

        assert!(text.starts_with("HOT DEAL: Apartment in Al Yasmin"));
        assert!(text.contains("Al Yasmin, Riyadh (apartment)"));
        assert!(text.contains("Price: 680000 SAR"));
        assert!(text.contains("Price/sqm: 4000 (-20% vs market avg 5000)"));
        assert!(text.contains("Score: 85/100"));
        assert!(text.ends_with("https://sa.aqar.fm/aqar-1"));
    }

    fn drop_of(id: &str) -> PriceDrop {
        PriceDrop {
            external_id: id.to_string(),
            old_price: dec!(800000),
            new_price: dec!(680000),
        }
    }

    #[test]
    fn test_price_drop_goes_to_watchers_of_any_deal_type() {
        let record = mock_record("aqar-1", DealType::FairPrice, 55);

        // Not a deal, so no deal alert, but still watched for price drops
        assert!(!open_subscription().matches(&record));
        assert!(open_subscription().watches(&record));

        let other_city = Subscription {
            city: Some("Jeddah".to_string()),
            ..open_subscription()
        };
        assert!(!other_city.watches(&record));
    }

    #[test]
    fn test_price_drop_candidates_pair_by_id() {
        let records = vec![
            mock_record("aqar-1", DealType::FairPrice, 55),
            mock_record("aqar-2", DealType::HotDeal, 90),
        ];
        let drops = vec![drop_of("aqar-2"), drop_of("aqar-9")];

        let pairs = price_drop_candidates(&records, &drops);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.listing.external_id, "aqar-2");
    }

    #[test]
    fn test_price_drop_text() {
        let text = price_drop_text(&mock_record("aqar-1", DealType::GoodDeal, 75), &drop_of("aqar-1"));

        assert!(text.starts_with("PRICE DROP: Apartment in Al Yasmin"));
        assert!(text.contains("Old price: 800000 SAR"));
        assert!(text.contains("New price: 680000 SAR"));
        assert!(text.contains("Drop: 15"));
        assert!(text.contains("Now: Good deal"));
        assert!(text.ends_with("https://sa.aqar.fm/aqar-1"));
    }

    #[test]
    fn test_notify_stats_add() {
        let mut total = NotifyStats { sent: 2, failed: 1 };
        total += NotifyStats { sent: 3, failed: 0 };
        assert_eq!(total, NotifyStats { sent: 5, failed: 1 });
    }

    #[test]
    fn test_summary_text() {
        let summary = BatchSummary {
            total: 5,
            analyzed: 4,
            failed: 1,
            not_started: 0,
            cancelled: false,
        };
        let text = summary_text(&summary, None, &NotifyStats { sent: 2, failed: 0 });

        assert!(text.contains("Listings: total: 5, analyzed: 4, failed: 1"));
        assert!(text.contains("Alerts: 2 sent, 0 failed"));
        assert!(!text.contains("Database"));
    }
}
