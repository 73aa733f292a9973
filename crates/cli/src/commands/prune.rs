//! `murmur prune`: delete stored messages older than a cutoff.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use murmur_core::store::ContextStore;

pub async fn run(explicit: Option<&Path>, days: Option<u32>) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        super::load_unvalidated(explicit).map_err(|e| format!("Failed to load config: {e}"))?;
    let store = super::open_store(&config.memory).await?;

    let before = cutoff(Utc::now(), days);
    let removed = store.prune_messages(before).await?;

    println!("🧹 Pruned {removed} message(s) older than {}", before.to_rfc3339());
    Ok(())
}

/// `days` back from `now`, or UTC midnight of the current day.
fn cutoff(now: DateTime<Utc>, days: Option<u32>) -> DateTime<Utc> {
    match days {
        Some(days) => now - Duration::days(i64::from(days)),
        None => now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn default_cutoff_is_todays_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 17, 45, 12).unwrap();
        assert_eq!(cutoff(now, None), Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap());
    }

    #[test]
    fn days_count_back_from_now() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 17, 45, 12).unwrap();
        assert_eq!(
            cutoff(now, Some(7)),
            Utc.with_ymd_and_hms(2024, 3, 2, 17, 45, 12).unwrap()
        );
        assert_eq!(cutoff(now, Some(0)), now);
    }
}
