//! Write functions - persist analyzed listings to PostgreSQL and read back market data

use crate::analysis::BatchSummary;
use crate::ingestion::types::{
    AnalysisRun, AnalyzedListing, InventoryPoint, PriceDrop, PriceHistorySource, StoredPrice,
    WriteStats,
};
use crate::notify::Subscription;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of writing one listing
#[derive(Debug, Clone, PartialEq, Eq)]
struct WriteOutcome {
    inserted: bool,
    price_changed: bool,
    price_drop: Option<PriceDrop>,
}

/// Upsert analyzed listings by external id, appending price history on change
pub async fn write_analyzed(db: &PgPool, analyzed: &[AnalyzedListing]) -> Result<WriteStats> {
    info!("Writing {} analyzed listings to database", analyzed.len());

    let mut stats = WriteStats::default();

    for record in analyzed {
        match write_single_listing(db, record).await {
            Ok(outcome) => {
                if outcome.inserted {
                    stats.inserted += 1;
                } else {
                    stats.updated += 1;
                }
                if outcome.price_changed {
                    stats.price_changes += 1;
                }
                if let Some(drop) = outcome.price_drop {
                    stats.price_drops.push(drop);
                }
            }
            Err(e) => {
                warn!("Failed to write listing {}: {:#}", record.listing.external_id, e);
                stats.errors += 1;
            }
        }
    }

    info!("Write complete: {}", stats);

    Ok(stats)
}

/// Decide whether a write needs a price history row.
/// First sighting of a priced listing is `InitialScrape`; a later different
/// price is `ScraperUpdate`; an unchanged or missing price records nothing.
pub fn price_history_source(
    stored: Option<&StoredPrice>,
    new_price: Option<Decimal>,
) -> Option<PriceHistorySource> {
    let new_price = new_price?;

    match stored {
        None => Some(PriceHistorySource::InitialScrape),
        Some(row) if row.price != Some(new_price) => Some(PriceHistorySource::ScraperUpdate),
        Some(_) => None,
    }
}

/// The stored price and the new one when the listing got cheaper
pub fn price_drop(
    external_id: &str,
    stored: Option<&StoredPrice>,
    new_price: Option<Decimal>,
) -> Option<PriceDrop> {
    let old_price = stored?.price?;
    let new_price = new_price?;
    if old_price <= Decimal::ZERO || new_price >= old_price {
        return None;
    }
    Some(PriceDrop {
        external_id: external_id.to_string(),
        old_price,
        new_price,
    })
}

/// Listing row and its price history row commit together or not at all
async fn write_single_listing(db: &PgPool, record: &AnalyzedListing) -> Result<WriteOutcome> {
    let l = &record.listing;
    let mut tx = db.begin().await?;

    let existing = find_existing_listing(&mut tx, &l.external_id).await?;
    let history = price_history_source(existing.as_ref(), l.price);

    let id = match &existing {
        None => {
            let id = insert_listing(&mut tx, record).await?;
            debug!("Inserted new listing: {}", l.external_id);
            id
        }
        Some(row) => {
            update_listing(&mut tx, row.id, record).await?;
            debug!("Updated listing: {} (id: {})", l.external_id, row.id);
            row.id
        }
    };

    if let (Some(source), Some(price)) = (history, l.price) {
        insert_price_history(&mut tx, id, price, record.analysis.price_per_sqm, source).await?;
    }

    tx.commit().await?;

    Ok(WriteOutcome {
        inserted: existing.is_none(),
        price_changed: history == Some(PriceHistorySource::ScraperUpdate),
        price_drop: price_drop(&l.external_id, existing.as_ref(), l.price),
    })
}

async fn find_existing_listing(
    conn: &mut PgConnection,
    external_id: &str,
) -> Result<Option<StoredPrice>> {
    let row = sqlx::query_as::<_, StoredPrice>(
        "SELECT id, price FROM properties WHERE external_id = $1 FOR UPDATE",
    )
    .bind(external_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row)
}

fn sample_size(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

async fn insert_listing(conn: &mut PgConnection, record: &AnalyzedListing) -> Result<Uuid> {
    let l = &record.listing;
    let a = &record.analysis;

    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO properties (
            external_id, source, source_url, title, price, size_sqm, bedrooms,
            city, district, property_type, listed_at, scraped_at,
            price_per_sqm, district_avg_price_per_sqm, price_vs_market_percent,
            investment_score, deal_type, estimated_monthly_rent, estimated_annual_rent,
            estimated_annual_yield_percent, market_source, market_sample_size,
            analyzed_at, is_active, updated_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
            $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, TRUE, NOW()
        )
        RETURNING id
        "#,
    )
    .bind(&l.external_id)
    .bind(&l.source)
    .bind(&l.source_url)
    .bind(&l.title)
    .bind(l.price)
    .bind(l.size_sqm)
    .bind(l.bedrooms)
    .bind(&l.city)
    .bind(&l.district)
    .bind(l.property_type)
    .bind(l.listed_at)
    .bind(l.scraped_at)
    .bind(a.price_per_sqm)
    .bind(a.district_avg_price_per_sqm)
    .bind(a.price_vs_market_percent)
    .bind(i16::from(a.investment_score))
    .bind(a.deal_type)
    .bind(a.estimated_monthly_rent)
    .bind(a.estimated_annual_rent)
    .bind(a.estimated_annual_yield_percent)
    .bind(a.market_source)
    .bind(sample_size(a.market_sample_size))
    .bind(a.analyzed_at)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

async fn update_listing(conn: &mut PgConnection, id: Uuid, record: &AnalyzedListing) -> Result<()> {
    let l = &record.listing;
    let a = &record.analysis;

    sqlx::query(
        r#"
        UPDATE properties SET
            source = $1, source_url = $2, title = $3, price = $4, size_sqm = $5,
            bedrooms = $6, city = $7, district = $8, property_type = $9,
            listed_at = COALESCE($10, listed_at), scraped_at = $11,
            price_per_sqm = $12, district_avg_price_per_sqm = $13,
            price_vs_market_percent = $14, investment_score = $15, deal_type = $16,
            estimated_monthly_rent = $17, estimated_annual_rent = $18,
            estimated_annual_yield_percent = $19, market_source = $20,
            market_sample_size = $21, analyzed_at = $22,
            is_active = TRUE, updated_at = NOW()
        WHERE id = $23
        "#,
    )
    .bind(&l.source)
    .bind(&l.source_url)
    .bind(&l.title)
    .bind(l.price)
    .bind(l.size_sqm)
    .bind(l.bedrooms)
    .bind(&l.city)
    .bind(&l.district)
    .bind(l.property_type)
    .bind(l.listed_at)
    .bind(l.scraped_at)
    .bind(a.price_per_sqm)
    .bind(a.district_avg_price_per_sqm)
    .bind(a.price_vs_market_percent)
    .bind(i16::from(a.investment_score))
    .bind(a.deal_type)
    .bind(a.estimated_monthly_rent)
    .bind(a.estimated_annual_rent)
    .bind(a.estimated_annual_yield_percent)
    .bind(a.market_source)
    .bind(sample_size(a.market_sample_size))
    .bind(a.analyzed_at)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_price_history(
    conn: &mut PgConnection,
    property_id: Uuid,
    price: Decimal,
    price_per_sqm: Option<Decimal>,
    source: PriceHistorySource,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO price_history (property_id, price, price_per_sqm, source)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(property_id)
    .bind(price)
    .bind(price_per_sqm)
    .bind(source.as_str())
    .execute(&mut *conn)
    .await?;

    debug!(
        "Inserted price history: property_id={}, price={}, source={}",
        property_id,
        price,
        source.as_str()
    );

    Ok(())
}

/// Stored price-per-area of every active listing that has one
pub async fn load_inventory(db: &PgPool) -> Result<Vec<InventoryPoint>> {
    let points = sqlx::query_as::<_, InventoryPoint>(
        r#"
        SELECT external_id, city, district, property_type, price_per_sqm
        FROM properties
        WHERE is_active AND price_per_sqm > 0
        "#,
    )
    .fetch_all(db)
    .await
    .context("Failed to load inventory")?;

    info!("Loaded {} inventory points", points.len());

    Ok(points)
}

/// `(city, average price-per-area, sample size)` for every city with active listings
pub async fn city_averages(db: &PgPool) -> Result<Vec<(String, Decimal, usize)>> {
    let rows = sqlx::query_as::<_, (String, Decimal, i64)>(
        r#"
        SELECT city, ROUND(AVG(price_per_sqm), 2), COUNT(*)
        FROM properties
        WHERE is_active AND price_per_sqm > 0
        GROUP BY city
        "#,
    )
    .fetch_all(db)
    .await
    .context("Failed to load city averages")?;

    Ok(rows
        .into_iter()
        .map(|(city, avg, n)| (city, avg, usize::try_from(n).unwrap_or(0)))
        .collect())
}

/// Active saved searches
pub async fn load_subscriptions(db: &PgPool) -> Result<Vec<Subscription>> {
    let subs = sqlx::query_as::<_, Subscription>(
        r#"
        SELECT id, chat_id, city, property_type, max_price, min_score, deal_types
        FROM subscriptions
        WHERE is_active
        "#,
    )
    .fetch_all(db)
    .await
    .context("Failed to load subscriptions")?;

    debug!("Loaded {} active subscriptions", subs.len());

    Ok(subs)
}

pub async fn log_run_start(db: &PgPool, listings_total: usize) -> Result<Uuid> {
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO analysis_runs (status, started_at, listings_total)
        VALUES ('started', NOW(), $1)
        RETURNING id
        "#,
    )
    .bind(sample_size(listings_total))
    .fetch_one(db)
    .await
    .context("Failed to log run start")?;

    Ok(id)
}

/// `cancelled` when Ctrl-C stopped the batch early, `completed` otherwise
pub fn run_status(summary: &BatchSummary) -> &'static str {
    if summary.cancelled {
        "cancelled"
    } else {
        "completed"
    }
}

pub async fn log_run_complete(db: &PgPool, run_id: Uuid, summary: &BatchSummary) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE analysis_runs
        SET status = $1,
            completed_at = NOW(),
            listings_analyzed = $2,
            listings_failed = $3,
            listings_not_started = $4
        WHERE id = $5
        "#,
    )
    .bind(run_status(summary))
    .bind(sample_size(summary.analyzed))
    .bind(sample_size(summary.failed))
    .bind(sample_size(summary.not_started))
    .bind(run_id)
    .execute(db)
    .await
    .context("Failed to log run completion")?;

    Ok(())
}

pub async fn log_run_failed(db: &PgPool, run_id: Uuid, error: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE analysis_runs
        SET status = 'failed',
            completed_at = NOW(),
            error_message = $1
        WHERE id = $2
        "#,
    )
    .bind(error)
    .bind(run_id)
    .execute(db)
    .await
    .context("Failed to log run failure")?;

    Ok(())
}

/// Most recent run, for the run summary
pub async fn latest_run(db: &PgPool) -> Result<Option<AnalysisRun>> {
    let run = sqlx::query_as::<_, AnalysisRun>(
        r#"
        SELECT id, status, started_at, completed_at,
               listings_total, listings_analyzed, listings_failed,
               listings_not_started, error_message
        FROM analysis_runs
        ORDER BY started_at DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(db)
    .await?;

    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{DealType, MetricsSource, PropertyAnalysis};
    use crate::ingestion::types::{Listing, PropertyType};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn stored(price: Option<Decimal>) -> StoredPrice {
        StoredPrice {
            id: Uuid::new_v4(),
            price,
        }
    }

    #[test]
    fn test_first_sighting_is_initial_scrape() {
        assert_eq!(
            price_history_source(None, Some(dec!(750000))),
            Some(PriceHistorySource::InitialScrape)
        );
    }

    #[test]
    fn test_changed_price_is_scraper_update() {
        let row = stored(Some(dec!(750000)));
        assert_eq!(
            price_history_source(Some(&row), Some(dec!(720000))),
            Some(PriceHistorySource::ScraperUpdate)
        );

        // A price appearing on a listing stored without one counts as a change
        let unpriced = stored(None);
        assert_eq!(
            price_history_source(Some(&unpriced), Some(dec!(720000))),
            Some(PriceHistorySource::ScraperUpdate)
        );
    }

    #[test]
    fn test_unchanged_or_missing_price_records_nothing() {
        let row = stored(Some(dec!(750000)));
        assert_eq!(price_history_source(Some(&row), Some(dec!(750000.00))), None);
        assert_eq!(price_history_source(Some(&row), None), None);
        assert_eq!(price_history_source(None, None), None);
    }

    #[test]
    fn test_lower_price_is_a_drop() {
        let row = stored(Some(dec!(800000)));
        let drop = price_drop("aqar-1", Some(&row), Some(dec!(720000))).unwrap();

        assert_eq!(drop.old_price, dec!(800000));
        assert_eq!(drop.new_price, dec!(720000));
        assert_eq!(drop.percent(), Some(dec!(10)));
    }

    #[test]
    fn test_only_lower_known_prices_are_drops() {
        let row = stored(Some(dec!(800000)));
        assert_eq!(price_drop("aqar-1", Some(&row), Some(dec!(850000))), None);
        assert_eq!(price_drop("aqar-1", Some(&row), Some(dec!(800000))), None);
        assert_eq!(price_drop("aqar-1", Some(&row), None), None);
        assert_eq!(price_drop("aqar-1", Some(&stored(None)), Some(dec!(1))), None);
        assert_eq!(price_drop("aqar-1", None, Some(dec!(720000))), None);
    }

    #[test]
    fn test_run_status() {
        let mut summary = BatchSummary {
            total: 10,
            analyzed: 4,
            failed: 1,
            not_started: 5,
            cancelled: true,
        };
        assert_eq!(run_status(&summary), "cancelled");

        summary.cancelled = false;
        assert_eq!(run_status(&summary), "completed");
    }

    #[test]
    fn test_sample_size_saturates() {
        assert_eq!(sample_size(12), 12);
        assert_eq!(sample_size(usize::MAX), i32::MAX);
    }

    fn mock_record(external_id: &str, price: Decimal) -> AnalyzedListing {
        let listing = Listing {
            external_id: external_id.to_string(),
            source: "aqar".to_string(),
            source_url: None,
            title: "Apartment".to_string(),
            price: Some(price),
            size_sqm: Some(dec!(100)),
            bedrooms: None,
            city: "Riyadh".to_string(),
            district: None,
            property_type: PropertyType::Apartment,
            listed_at: None,
            scraped_at: Utc::now(),
        };
        let analysis = PropertyAnalysis {
            property_id: external_id.to_string(),
            price_per_sqm: Some(price / dec!(100)),
            district_avg_price_per_sqm: dec!(4500),
            price_vs_market_percent: None,
            investment_score: 50,
            deal_type: DealType::FairPrice,
            estimated_monthly_rent: None,
            estimated_annual_rent: None,
            estimated_annual_yield_percent: None,
            market_source: MetricsSource::Placeholder,
            market_sample_size: 0,
            analyzed_at: Utc::now(),
        };
        AnalyzedListing { listing, analysis }
    }

    // Runs against a throwaway database created by sqlx from DATABASE_URL
    #[sqlx::test(migrations = "./migrations")]
    #[ignore] // Needs a live database
    async fn test_failed_history_write_rolls_back_listing(db: PgPool) {
        let first = write_analyzed(&db, &[mock_record("aqar-1", dec!(500000))])
            .await
            .unwrap();
        assert_eq!(first.inserted, 1);

        sqlx::query("DROP TABLE price_history").execute(&db).await.unwrap();

        // Price change needs a history row, which now fails
        let second = write_analyzed(&db, &[mock_record("aqar-1", dec!(450000))])
            .await
            .unwrap();
        assert_eq!(second.errors, 1);
        assert!(second.price_drops.is_empty());

        let stored: Option<Decimal> =
            sqlx::query_scalar("SELECT price FROM properties WHERE external_id = 'aqar-1'")
                .fetch_one(&db)
                .await
                .unwrap();
        assert_eq!(stored, Some(dec!(500000)));

        // A new listing with a price is not left behind without its history
        let third = write_analyzed(&db, &[mock_record("aqar-2", dec!(300000))])
            .await
            .unwrap();
        assert_eq!(third.errors, 1);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM properties")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore] // Needs a live database
    async fn test_price_drop_is_reported_once_written(db: PgPool) {
        write_analyzed(&db, &[mock_record("aqar-1", dec!(500000))])
            .await
            .unwrap();
        let stats = write_analyzed(&db, &[mock_record("aqar-1", dec!(450000))])
            .await
            .unwrap();

        assert_eq!(stats.updated, 1);
        assert_eq!(stats.price_changes, 1);
        assert_eq!(stats.price_drops.len(), 1);
        assert_eq!(stats.price_drops[0].old_price, dec!(500000));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore] // Needs a live database
    async fn test_large_values_fit_the_schema(db: PgPool) {
        let mut record = mock_record("aqar-1", dec!(900000000000000000000));
        record.analysis.price_vs_market_percent = Some(dec!(19999999999999999900.00));
        record.analysis.district_avg_price_per_sqm = dec!(4500);

        let stats = write_analyzed(&db, &[record]).await.unwrap();
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.inserted, 1);

        let inventory = load_inventory(&db).await.unwrap();
        assert_eq!(inventory[0].price_per_sqm, dec!(9000000000000000000));
    }

    #[tokio::test]
    #[ignore] // Needs a live database
    async fn test_city_averages_against_database() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let db = PgPool::connect(&url).await.unwrap();
        sqlx::migrate!("./migrations").run(&db).await.unwrap();

        let averages = city_averages(&db).await.unwrap();
        for (city, avg, n) in averages {
            assert!(n > 0, "{} has no samples", city);
            assert!(avg > Decimal::ZERO);
        }
    }
}
