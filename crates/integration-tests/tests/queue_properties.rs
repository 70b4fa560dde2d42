//! Queue lifecycle properties against the SQLite store

mod common;

use common::{email, memory, START};
use jobq_core::application::{
    CancelOptions, DoneOptions, GetJobOptions, ReadyOptions, RemoveOptions, RerunOptions, RestartOptions,
    SaveOptions,
};
use jobq_core::domain::{
    CalendarSchedule, JobStatus, PriorityLevel, RepeatOptions, RepeatWait, RetryBackoff,
    RetryOptions,
};
use jobq_core::port::{JobQuery, TimeProvider};

#[tokio::test]
async fn test_waiting_until_every_antecedent_completes() {
    let h = memory().await;
    h.engine.save(email("a").priority(-1), SaveOptions::default()).await.unwrap();
    h.engine.save(email("b"), SaveOptions::default()).await.unwrap();
    h.engine
        .save(email("c").depends(vec!["a".into(), "b".into()]), SaveOptions::default())
        .await
        .unwrap();
    assert_eq!(h.status("c").await, JobStatus::Waiting);

    let a = h.claim().await.unwrap();
    assert_eq!(a.id, "a");
    assert!(h.done(&a).await.completed);

    let c = h.job("c").await;
    assert_eq!(c.status, JobStatus::Waiting);
    assert_eq!(c.resolved, vec!["a".to_string()]);
    assert!(c.resolved.iter().all(|r| c.depends.contains(r)));

    let b = h.claim().await.unwrap();
    assert_eq!(b.id, "b");
    h.done(&b).await;

    let c = h.job("c").await;
    assert_eq!(c.status, JobStatus::Ready);
    assert_eq!(c.resolved.len(), c.depends.len());
}

#[tokio::test]
async fn test_delay_deps_holds_back_promoted_dependent() {
    let h = memory().await;
    h.engine.save(email("a"), SaveOptions::default()).await.unwrap();
    h.engine
        .save(email("b").depends(vec!["a".into()]), SaveOptions::default())
        .await
        .unwrap();

    let a = h.claim().await.unwrap();
    let outcome = h
        .engine
        .done(
            "a",
            a.run_id.as_deref().unwrap(),
            serde_json::json!(null),
            DoneOptions {
                delay_deps: Some(60_000),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(outcome.completed);

    let b = h.job("b").await;
    assert_eq!(b.status, JobStatus::Ready);
    assert_eq!(b.after, START + 60_000);
    assert!(h.claim().await.is_none());

    h.clock.advance(60_000);
    assert_eq!(h.claim().await.unwrap().id, "b");
}

#[tokio::test]
async fn test_priority_order_low_critical_normal() {
    let h = memory().await;
    for (id, level) in [
        ("low", PriorityLevel::Low),
        ("critical", PriorityLevel::Critical),
        ("normal", PriorityLevel::Normal),
    ] {
        h.engine
            .save(email(id).priority_level(level), SaveOptions::default())
            .await
            .unwrap();
    }

    let mut order = Vec::new();
    while let Some(job) = h.claim().await {
        order.push(job.id);
    }
    assert_eq!(order, vec!["critical", "normal", "low"]);
}

#[tokio::test]
async fn test_cycle_rejected_in_both_orders() {
    let h = memory().await;
    h.engine
        .save(email("x").depends(vec!["y".into()]), SaveOptions::default())
        .await
        .unwrap();
    let err = h
        .engine
        .save(email("y").depends(vec!["x".into()]), SaveOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(h.engine.get_job("y", GetJobOptions::default()).await.unwrap().is_none());

    let h = memory().await;
    h.engine
        .save(email("y").depends(vec!["x".into()]), SaveOptions::default())
        .await
        .unwrap();
    let err = h
        .engine
        .save(email("x").depends(vec!["y".into()]), SaveOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_exponential_backoff_offsets() {
    let h = memory().await;
    h.engine
        .save(
            email("a").retry(RetryOptions {
                retries: 3,
                until: None,
                wait: 100,
                backoff: RetryBackoff::Exponential,
            }),
            SaveOptions::default(),
        )
        .await
        .unwrap();

    for (attempt, offset) in [(1, 100), (2, 200), (3, 400)] {
        let job = h.claim().await.unwrap();
        let failed_at = h.clock.now_millis();
        assert!(h.fail(&job).await);

        let stored = h.job("a").await;
        assert_eq!(stored.status, JobStatus::Ready);
        assert_eq!(stored.retried, attempt);
        assert_eq!(stored.after - failed_at, offset);
        h.clock.advance(offset);
    }

    let job = h.claim().await.unwrap();
    h.fail(&job).await;
    let stored = h.job("a").await;
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.retried, stored.retries);
    assert_eq!(stored.failures.len(), 4);
}

#[tokio::test]
async fn test_failed_stays_failed_until_restart() {
    let h = memory().await;
    h.engine.save(email("a"), SaveOptions::default()).await.unwrap();
    let job = h.claim().await.unwrap();
    h.fail(&job).await;
    assert_eq!(h.status("a").await, JobStatus::Failed);

    h.clock.advance(3_600_000);
    h.server.sweep_once().await.unwrap();
    assert_eq!(h.status("a").await, JobStatus::Failed);
    assert!(h.claim().await.is_none());

    assert!(h
        .engine
        .restart(&["a".into()], RestartOptions::default())
        .await
        .unwrap());
    let restarted = h.job("a").await;
    assert_eq!(restarted.status, JobStatus::Ready);
    assert_eq!(restarted.retried, 0);
}

#[tokio::test]
async fn test_repeats_two_produce_two_occurrences() {
    let h = memory().await;
    h.engine
        .save(
            email("r").repeat(RepeatOptions {
                repeats: 2,
                until: None,
                wait: RepeatWait::Delay(1_000),
            }),
            SaveOptions::default(),
        )
        .await
        .unwrap();

    let mut occurrences = Vec::new();
    loop {
        let job = h.claim().await.unwrap();
        match h.done(&job).await.repeat_id {
            Some(next) => {
                let scheduled = h.job(&next).await;
                assert_eq!(scheduled.after, h.clock.now_millis() + 1_000);
                occurrences.push(next);
                h.clock.advance(1_000);
            }
            None => break,
        }
    }

    assert_eq!(occurrences.len(), 2);
    let completed = h
        .engine
        .find_jobs(&JobQuery::new().statuses(&[JobStatus::Completed]))
        .await
        .unwrap();
    assert_eq!(completed.len(), 3);
    assert!(h.claim().await.is_none());
}

#[tokio::test]
async fn test_calendar_schedule_sets_first_run() {
    let h = memory().await;
    h.engine
        .save(
            email("nightly").repeat(RepeatOptions {
                repeats: 1,
                until: None,
                wait: RepeatWait::Schedule(CalendarSchedule::new(
                    vec!["0 0 0 * * *".to_string()],
                    Vec::new(),
                )),
            }),
            SaveOptions::default(),
        )
        .await
        .unwrap();

    // START is 22:13:20 UTC; next midnight is 1h46m40s later
    let job = h.job("nightly").await;
    assert_eq!(job.after, START + 6_400_000);
    assert!(h.claim().await.is_none());
}

#[tokio::test]
async fn test_done_twice_is_noop() {
    let h = memory().await;
    h.engine.save(email("a"), SaveOptions::default()).await.unwrap();
    let job = h.claim().await.unwrap();

    assert!(h.done(&job).await.completed);
    let before = h.job("a").await;
    let second = h.done(&job).await;
    assert!(!second.completed);
    assert_eq!(h.job("a").await.log.len(), before.log.len());
}

#[tokio::test]
async fn test_pause_resume_and_force_ready() {
    let h = memory().await;
    h.engine
        .save(email("b").depends(vec!["missing".into()]), SaveOptions::default())
        .await
        .unwrap();
    assert!(h.engine.pause(&["b".into()]).await.unwrap());
    assert_eq!(h.status("b").await, JobStatus::Paused);
    assert!(h.engine.resume(&["b".into()]).await.unwrap());
    assert_eq!(h.status("b").await, JobStatus::Waiting);

    assert!(!h
        .engine
        .ready(&["b".into()], ReadyOptions::default())
        .await
        .unwrap());
    assert!(h
        .engine
        .ready(
            &["b".into()],
            ReadyOptions {
                time: None,
                force: true
            }
        )
        .await
        .unwrap());
    let b = h.job("b").await;
    assert_eq!(b.status, JobStatus::Ready);
    assert_eq!(b.resolved, b.depends);
}

#[tokio::test]
async fn test_cancel_cascade_and_remove() {
    let h = memory().await;
    h.engine.save(email("a"), SaveOptions::default()).await.unwrap();
    h.engine
        .save(email("b").depends(vec!["a".into()]), SaveOptions::default())
        .await
        .unwrap();
    h.engine
        .save(email("c").depends(vec!["b".into()]), SaveOptions::default())
        .await
        .unwrap();

    assert!(h
        .engine
        .cancel(&["a".into()], CancelOptions::default())
        .await
        .unwrap());
    for id in ["a", "b", "c"] {
        assert_eq!(h.status(id).await, JobStatus::Cancelled);
    }

    assert!(h
        .engine
        .remove(&["c".into()], RemoveOptions::default())
        .await
        .unwrap());
    assert!(h.engine.get_job("c", GetJobOptions::default()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_rerun_completed_job() {
    let h = memory().await;
    h.engine.save(email("a"), SaveOptions::default()).await.unwrap();
    let job = h.claim().await.unwrap();

    assert!(h
        .engine
        .rerun("a", RerunOptions::default())
        .await
        .unwrap()
        .is_none());

    h.done(&job).await;
    let new_id = h
        .engine
        .rerun("a", RerunOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_ne!(new_id, "a");
    assert_eq!(h.status(&new_id).await, JobStatus::Ready);
    assert_eq!(h.status("a").await, JobStatus::Completed);
}

#[tokio::test]
async fn test_history_hidden_unless_requested() {
    let h = memory().await;
    h.engine.save(email("a"), SaveOptions::default()).await.unwrap();

    let plain = h
        .engine
        .get_job("a", GetJobOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert!(plain.log.is_empty());
    assert!(!h.job("a").await.log.is_empty());
}

#[tokio::test]
async fn test_stats_counts_by_status() {
    let h = memory().await;
    h.engine.save(email("a"), SaveOptions::default()).await.unwrap();
    h.engine
        .save(email("b").depends(vec!["a".into()]), SaveOptions::default())
        .await
        .unwrap();

    let stats = h.engine.stats().await.unwrap();
    assert!(stats.contains(&(JobStatus::Ready, 1)));
    assert!(stats.contains(&(JobStatus::Waiting, 1)));
    assert!(stats.contains(&(JobStatus::Failed, 0)));
}
