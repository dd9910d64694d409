use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tracing::warn;

use nutri_db::Database;
use nutri_types::models::Market;

/// Sentinel for "active subscription, no cap".
pub const UNLIMITED: i64 = -1;

/// Outcome of the daily free-tier gate.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaDecision {
    pub can_analyze: bool,
    pub remaining: i64,
    pub next_reset_time: Option<NaiveDateTime>,
    pub requires_subscription: bool,
}

impl QuotaDecision {
    /// For subscribers `next_reset_time` reports when the subscription
    /// expires, not a quota reset.
    fn unlimited(expires_at: Option<NaiveDateTime>) -> Self {
        Self {
            can_analyze: true,
            remaining: UNLIMITED,
            next_reset_time: expires_at,
            requires_subscription: false,
        }
    }

    fn subscription_required() -> Self {
        Self {
            can_analyze: false,
            remaining: 0,
            next_reset_time: None,
            requires_subscription: true,
        }
    }
}

/// Decides whether an analysis may proceed and upserts today's counter row.
///
/// Policy, in order:
/// 1. An active unexpired subscription allows unconditionally (remaining -1,
///    next_reset_time carries the subscription expiry).
/// 2. Global-market users have no free tier: deny with requires_subscription.
///    Store failures stay a denial (fail-closed; they must subscribe anyway).
/// 3. Home-market free tier: compare today's counter against `limit`. Store
///    failures fail open so a transient outage never blocks paying intent.
///
/// `today` is the server-local calendar day; client-supplied dates are never
/// consulted, which is what defeats device-clock manipulation. This function
/// only decides; `record_analysis` does the bookkeeping after the gated
/// action succeeds.
pub fn check_and_track(
    db: &Database,
    user_id: &str,
    market: Market,
    limit: i64,
    today: NaiveDate,
) -> QuotaDecision {
    let now = Utc::now().to_rfc3339();
    match db.get_active_subscription(user_id, &now) {
        Ok(Some(sub)) => {
            let expires_at = sub
                .expires_at
                .parse::<DateTime<Utc>>()
                .ok()
                .map(|t| t.naive_utc());
            return QuotaDecision::unlimited(expires_at);
        }
        Ok(None) => {}
        Err(e) => {
            // Treated as "no subscription"; the market branch below decides
            // whether that fails open or closed.
            warn!("subscription lookup failed for {}: {:#}", user_id, e);
        }
    }

    if market == Market::Global {
        return QuotaDecision::subscription_required();
    }

    let date = today.format("%Y-%m-%d").to_string();
    match db.get_or_create_counter(user_id, &date) {
        Ok(count) => QuotaDecision {
            can_analyze: count < limit,
            remaining: (limit - count).max(0),
            next_reset_time: Some(midnight_after(today)),
            requires_subscription: false,
        },
        Err(e) => {
            warn!("analysis counter lookup failed for {}: {:#}", user_id, e);
            QuotaDecision {
                can_analyze: true,
                remaining: limit,
                next_reset_time: Some(midnight_after(today)),
                requires_subscription: false,
            }
        }
    }
}

/// Bookkeeping after a successful analysis. Never the authority for the
/// decision and never fails the request: an increment error is logged and
/// swallowed so the user is not charged for our bookkeeping failure.
pub fn record_analysis(db: &Database, user_id: &str, today: NaiveDate) {
    let date = today.format("%Y-%m-%d").to_string();
    if let Err(e) = db.increment_analysis_count(user_id, &date) {
        warn!("failed to record analysis for {}: {:#}", user_id, e);
    }
}

/// The quota resets at local midnight after `day`.
fn midnight_after(day: NaiveDate) -> NaiveDateTime {
    NaiveDateTime::new(day.succ_opt().unwrap_or(day), NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const LIMIT: i64 = 2;

    fn setup(market: &str) -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, &format!("user-{id}"), "hash", market)
            .unwrap();
        (db, id)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 25).unwrap()
    }

    #[test]
    fn home_market_free_tier_allows_limit_then_denies() {
        let (db, user) = setup("home");

        for _ in 0..LIMIT {
            let d = check_and_track(&db, &user, Market::Home, LIMIT, day());
            assert!(d.can_analyze);
            assert!(!d.requires_subscription);
            record_analysis(&db, &user, day());
        }

        let d = check_and_track(&db, &user, Market::Home, LIMIT, day());
        assert!(!d.can_analyze);
        assert_eq!(d.remaining, 0);
        assert_eq!(
            d.next_reset_time,
            Some(NaiveDateTime::new(
                NaiveDate::from_ymd_opt(2026, 8, 26).unwrap(),
                NaiveTime::MIN
            ))
        );
    }

    #[test]
    fn remaining_counts_down() {
        let (db, user) = setup("home");

        let d = check_and_track(&db, &user, Market::Home, LIMIT, day());
        assert_eq!(d.remaining, 2);
        record_analysis(&db, &user, day());

        let d = check_and_track(&db, &user, Market::Home, LIMIT, day());
        assert_eq!(d.remaining, 1);
    }

    #[test]
    fn global_market_denied_regardless_of_counter_state() {
        let (db, user) = setup("global");

        let d = check_and_track(&db, &user, Market::Global, LIMIT, day());
        assert!(!d.can_analyze);
        assert!(d.requires_subscription);

        // Even with no uses recorded at all, still denied.
        assert_eq!(db.get_or_create_counter(&user, "2026-08-25").unwrap(), 0);
        let d = check_and_track(&db, &user, Market::Global, LIMIT, day());
        assert!(!d.can_analyze);
        assert!(d.requires_subscription);
    }

    #[test]
    fn subscriber_is_unlimited_even_past_the_cap() {
        let (db, user) = setup("home");
        db.grant_subscription(
            &Uuid::new_v4().to_string(),
            &user,
            "2099-01-01T00:00:00+00:00",
        )
        .unwrap();

        for _ in 0..10 {
            record_analysis(&db, &user, day());
        }

        let d = check_and_track(&db, &user, Market::Home, LIMIT, day());
        assert!(d.can_analyze);
        assert_eq!(d.remaining, UNLIMITED);
        // Subscribers see the subscription expiry, not a quota reset.
        assert_eq!(
            d.next_reset_time,
            Some(NaiveDateTime::new(
                NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
                NaiveTime::MIN
            ))
        );
    }

    #[test]
    fn global_subscriber_is_allowed() {
        let (db, user) = setup("global");
        db.grant_subscription(
            &Uuid::new_v4().to_string(),
            &user,
            "2099-01-01T00:00:00+00:00",
        )
        .unwrap();

        let d = check_and_track(&db, &user, Market::Global, LIMIT, day());
        assert!(d.can_analyze);
        assert_eq!(d.remaining, UNLIMITED);
    }

    #[test]
    fn expired_subscription_falls_back_to_free_tier() {
        let (db, user) = setup("home");
        db.grant_subscription(
            &Uuid::new_v4().to_string(),
            &user,
            "2020-01-01T00:00:00+00:00",
        )
        .unwrap();

        let d = check_and_track(&db, &user, Market::Home, LIMIT, day());
        assert!(d.can_analyze);
        assert_eq!(d.remaining, LIMIT);
    }

    #[test]
    fn yesterdays_usage_does_not_suppress_today() {
        let (db, user) = setup("home");
        let yesterday = NaiveDate::from_ymd_opt(2026, 8, 24).unwrap();

        for _ in 0..LIMIT {
            record_analysis(&db, &user, yesterday);
        }
        let d = check_and_track(&db, &user, Market::Home, LIMIT, yesterday);
        assert!(!d.can_analyze);

        let d = check_and_track(&db, &user, Market::Home, LIMIT, day());
        assert!(d.can_analyze);
        assert_eq!(d.remaining, LIMIT);
    }
}
