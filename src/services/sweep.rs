use std::{sync::Arc, time::Duration};

use chrono::Utc;

use crate::{error::Result, repositories::store::DocumentStore};

/// Burns every document whose expiry has passed. Returns how many rows
/// changed.
pub async fn burn_expired_now(store: &dyn DocumentStore) -> Result<u64> {
    let burned = store.burn_expired(Utc::now()).await?;
    if burned > 0 {
        tracing::info!("🧹 Expiry sweep burned {} document(s)", burned);
    } else {
        tracing::debug!("🧹 Expiry sweep found nothing to burn");
    }
    Ok(burned)
}

/// Runs the expiry sweep forever at a fixed interval.
///
/// Only speeds up what the resolver does lazily on the next access.
pub async fn run_expiry_sweep(store: Arc<dyn DocumentStore>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = burn_expired_now(store.as_ref()).await {
            tracing::error!("❌ Expiry sweep failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::document::NewDocument, repositories::sqlite::SqliteStore};
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    #[tokio::test]
    async fn sweep_burns_only_expired_rows() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        for (link, expires_at) in [
            ("past", Some(now - ChronoDuration::hours(1))),
            ("future", Some(now + ChronoDuration::hours(1))),
            ("never", None),
        ] {
            store
                .insert_document(&NewDocument {
                    id: Uuid::new_v4(),
                    user_id: Uuid::new_v4(),
                    link_id: link.to_string(),
                    title: link.to_string(),
                    file_path: format!("uploads/{link}.pdf"),
                    watermark_text: "CONFIDENTIAL".to_string(),
                    expires_at,
                    max_views: None,
                    created_at: now,
                })
                .await
                .unwrap();
        }

        assert_eq!(burn_expired_now(&store).await.unwrap(), 1);
        assert_eq!(burn_expired_now(&store).await.unwrap(), 0);
        assert!(store.find_by_link("past").await.unwrap().unwrap().is_burned);
        assert!(!store.find_by_link("future").await.unwrap().unwrap().is_burned);
        assert!(!store.find_by_link("never").await.unwrap().unwrap().is_burned);
    }
}
