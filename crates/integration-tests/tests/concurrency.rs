//! Concurrent workers against one on-disk SQLite store

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{email, open, temp_db, Harness, START};
use jobq_core::application::{DoneOptions, GetWorkRequest, SaveOptions};
use jobq_core::domain::JobStatus;
use jobq_core::port::time_provider::mocks::MockTimeProvider;
use jobq_core::port::JobQuery;

async fn file_harness() -> (Harness, String) {
    let db = temp_db();
    let h = open(&db, Arc::new(MockTimeProvider::new(START))).await;
    (h, db)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_work_never_shares_a_job() {
    let (h, db) = file_harness().await;
    const JOBS: usize = 40;
    const WORKERS: usize = 8;

    for n in 0..JOBS {
        h.engine
            .save(email(&format!("job-{:02}", n)), SaveOptions::default())
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..WORKERS {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            loop {
                let batch = engine
                    .get_work(&GetWorkRequest::new("email").max_jobs(3))
                    .await
                    .unwrap();
                if batch.is_empty() {
                    return claimed;
                }
                claimed.extend(batch.into_iter().map(|j| (j.id, j.run_id)));
            }
        }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for (id, run_id) in handle.await.unwrap() {
            total += 1;
            assert!(seen.insert(id.clone()), "{} handed out twice", id);

            let stored = h.job(&id).await;
            assert_eq!(stored.status, JobStatus::Running);
            assert_eq!(stored.run_id, run_id);
        }
    }
    assert_eq!(total, JOBS);

    let _ = std::fs::remove_file(&db);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_done_commits_once() {
    let (h, db) = file_harness().await;
    h.engine.save(email("a"), SaveOptions::default()).await.unwrap();
    let job = h.claim().await.unwrap();
    let run_id = job.run_id.unwrap();

    let mut handles = Vec::new();
    for n in 0..6 {
        let engine = h.engine.clone();
        let run_id = run_id.clone();
        handles.push(tokio::spawn(async move {
            engine
                .done("a", &run_id, serde_json::json!({ "worker": n }), DoneOptions::default())
                .await
                .unwrap()
                .completed
        }));
    }

    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);

    let stored = h.job("a").await;
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(
        stored
            .log
            .iter()
            .filter(|e| e.message == "Job completed")
            .count(),
        1
    );

    let _ = std::fs::remove_file(&db);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_done_racing_sweep_has_one_winner() {
    let (h, db) = file_harness().await;
    h.engine.save(email("a"), SaveOptions::default()).await.unwrap();
    let job = h.claim_with_lease(1_000).await;
    h.clock.advance(1_001);

    let server = h.server.clone();
    let sweep = tokio::spawn(async move { server.sweep_once().await.unwrap().repossessed });
    let engine = h.engine.clone();
    let run_id = job.run_id.clone().unwrap();
    let done = tokio::spawn(async move {
        engine
            .done("a", &run_id, serde_json::json!(null), DoneOptions::default())
            .await
            .unwrap()
            .completed
    });

    let repossessed = sweep.await.unwrap();
    let completed = done.await.unwrap();
    assert!(completed ^ (repossessed == 1));

    let expected = if completed {
        JobStatus::Completed
    } else {
        JobStatus::Failed
    };
    assert_eq!(h.status("a").await, expected);

    let _ = std::fs::remove_file(&db);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_antecedents_promote_dependent_once() {
    let (h, db) = file_harness().await;
    let antecedents: Vec<String> = (0..5).map(|n| format!("part-{}", n)).collect();
    for id in &antecedents {
        h.engine.save(email(id), SaveOptions::default()).await.unwrap();
    }
    h.engine
        .save(
            jobq_core::domain::JobSpec::new("merge", serde_json::json!({}))
                .with_id("merge")
                .depends(antecedents.clone()),
            SaveOptions::default(),
        )
        .await
        .unwrap();

    let jobs = h
        .engine
        .get_work(&GetWorkRequest::new("email").max_jobs(5))
        .await
        .unwrap();
    assert_eq!(jobs.len(), 5);

    let mut handles = Vec::new();
    for job in jobs {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .done(
                    &job.id,
                    job.run_id.as_deref().unwrap(),
                    serde_json::json!(null),
                    DoneOptions::default(),
                )
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().completed);
    }

    let merge = h.job("merge").await;
    assert_eq!(merge.status, JobStatus::Ready);
    assert_eq!(merge.resolved.len(), 5);

    let ready = h
        .engine
        .find_jobs(&JobQuery::new().statuses(&[JobStatus::Ready]))
        .await
        .unwrap();
    assert_eq!(ready.len(), 1);

    let _ = std::fs::remove_file(&db);
}
