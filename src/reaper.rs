use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::engine::EngineError;

/// Background task cancelling pending lessons whose payment window lapsed,
/// so an unpaid booking cannot hold a slot forever.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        for lesson_id in engine.collect_expired_pending(now) {
            match engine.cancel_lesson(lesson_id).await {
                Ok(_) => {
                    metrics::counter!(crate::observability::REAPED_PENDING_TOTAL).increment(1);
                    info!("reaped unpaid pending lesson {lesson_id}");
                }
                // Confirmed or cancelled between scan and cancel — fine.
                Err(EngineError::InvalidTransition { .. }) => {}
                Err(e) => tracing::debug!("reaper skip {lesson_id}: {e}"),
            }
        }
    }
}

/// Background task compacting the journal once append churn passes the
/// threshold.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.journal_appends_since_compact().await;
        if appends >= threshold {
            match engine.compact_journal().await {
                Ok(()) => info!("journal compacted after {appends} appends"),
                Err(e) => tracing::warn!("journal compaction failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::BusinessCalendar;
    use crate::config::SchedulePolicy;
    use crate::engine::BookingRequest;
    use crate::model::*;
    use crate::notify::{LogNotifier, NotifyHub};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tutord_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn now_ms() -> Ms {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as Ms
    }

    #[tokio::test]
    async fn reaper_cancels_expired_pending_lessons() {
        let policy = SchedulePolicy {
            min_notice_ms: 0,
            max_advance_ms: 365 * DAY_MS,
            payment_window_ms: 50, // expires almost immediately
            require_payment: true,
            calendar: BusinessCalendar::new(chrono_tz::UTC, 0, 24),
            ..SchedulePolicy::default()
        };
        let engine = Arc::new(
            Engine::new(
                test_wal_path("reap_pending.wal"),
                policy,
                Arc::new(NotifyHub::new()),
                Arc::new(LogNotifier),
            )
            .unwrap(),
        );

        let teacher = Ulid::new();
        engine.register_teacher(teacher, None).await.unwrap();

        let start = now_ms() + HOUR_MS;
        let lesson = engine
            .book_lesson(BookingRequest {
                id: Ulid::new(),
                teacher_id: teacher,
                student_id: Ulid::new(),
                start,
                end: start + 30 * MINUTE_MS,
                lesson_type: LessonType::Individual,
                level: LessonLevel::Beginner,
                price: 25.0,
                currency: "USD".into(),
                max_participants: 1,
                meeting: None,
            })
            .await
            .unwrap();
        assert_eq!(lesson.status, LessonStatus::Pending);

        // Let the payment window lapse, then let the reaper's first tick run.
        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::spawn(run_reaper(engine.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;

        let reaped = engine.get_lesson(lesson.id).await.unwrap();
        assert_eq!(reaped.status, LessonStatus::Cancelled);
    }
}
