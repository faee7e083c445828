use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::Engine;

fn now_min() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
        / 60
}

/// Background task that cancels pending reservations whose payment window
/// lapsed, so abandoned checkouts release their slot.
pub async fn run_sweeper(engine: Arc<Engine>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let stale = engine.collect_stale_pending(now_min());
        for (reservation_id, _instructor_id) in stale {
            match engine.cancel_reservation(reservation_id).await {
                Ok(_) => info!("cancelled unpaid reservation {reservation_id}"),
                Err(e) => {
                    // May already have transitioned — that's fine
                    tracing::debug!("sweeper skip {reservation_id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once appends since the last
/// compaction exceed `threshold`.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        if engine.wal_appends_since_compact().await >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("WAL compacted"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::PENDING_PAYMENT_WINDOW_MIN;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tarmac_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweeper_collects_lapsed_pending() {
        let path = test_wal_path("sweep_collect.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify, 7 * DAY_MIN).unwrap());

        let instructor_id = Ulid::new();
        engine
            .register_instructor(instructor_id, None, 0, 30, 0)
            .await
            .unwrap();

        let reservation_id = Ulid::new();
        engine
            .book_reservation(reservation_id, instructor_id, Ulid::new(), 1000, 60)
            .await
            .unwrap();

        // Not stale yet at booking time
        let now = now_min();
        assert!(engine.collect_stale_pending(now).is_empty());

        // Well past the payment window
        let later = now + PENDING_PAYMENT_WINDOW_MIN + 1;
        let stale = engine.collect_stale_pending(later);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0], (reservation_id, instructor_id));

        // Cancel it — no longer stale
        engine.cancel_reservation(reservation_id).await.unwrap();
        assert!(engine.collect_stale_pending(later).is_empty());
    }

    #[tokio::test]
    async fn confirmed_reservations_are_never_stale() {
        let path = test_wal_path("sweep_confirmed.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify, 7 * DAY_MIN).unwrap());

        let instructor_id = Ulid::new();
        engine
            .register_instructor(instructor_id, None, 0, 30, 0)
            .await
            .unwrap();

        let reservation_id = Ulid::new();
        engine
            .book_reservation(reservation_id, instructor_id, Ulid::new(), 1000, 60)
            .await
            .unwrap();
        engine.confirm_reservation(reservation_id).await.unwrap();

        let far_future = now_min() + 10 * PENDING_PAYMENT_WINDOW_MIN;
        assert!(engine.collect_stale_pending(far_future).is_empty());
    }
}
