//! Role checks through the gateway, backed by SQLite

mod common;

use std::sync::Arc;

use common::{email, memory};
use jobq_core::application::{
    CancelOptions, DoneOptions, GetJobOptions, GetWorkRequest, QueueGateway, SaveOptions,
};
use jobq_core::domain::JobStatus;
use jobq_core::port::{Caller, Grant, Method, Role, RoleAuthorizer};
use jobq_core::AppError;

async fn gateway(authorizer: RoleAuthorizer) -> QueueGateway {
    let h = memory().await;
    h.engine.set_serving(false);
    QueueGateway::new(h.server, Arc::new(authorizer))
}

fn authorizer() -> RoleAuthorizer {
    RoleAuthorizer::admin("ops")
        .allow("scheduler", Grant::Role(Role::Creator))
        .allow("worker", Grant::Role(Role::Worker))
        .allow("support", Grant::Role(Role::Manager))
        .deny("support", Grant::Method(Method::JobRemove))
}

#[tokio::test]
async fn test_full_job_flow_by_role() {
    let gw = gateway(authorizer()).await;
    let ops = Caller::new("ops");
    let scheduler = Caller::new("scheduler");
    let worker = Caller::new("worker");

    assert!(gw.start_job_server(&ops).await.unwrap());

    let id = gw
        .job_save(&scheduler, email("report"), SaveOptions::default())
        .await
        .unwrap();
    let jobs = gw
        .get_work(&worker, &GetWorkRequest::new("email"))
        .await
        .unwrap();
    assert_eq!(jobs[0].id, id);

    let done = gw
        .job_done(
            &worker,
            &id,
            jobs[0].run_id.as_deref().unwrap(),
            serde_json::json!({ "rows": 12 }),
            DoneOptions::default(),
        )
        .await
        .unwrap();
    assert!(done.completed);

    let stored = gw
        .get_job(&worker, &[id], GetJobOptions::default())
        .await
        .unwrap();
    assert_eq!(stored[0].status, JobStatus::Completed);
    assert_eq!(stored[0].result, Some(serde_json::json!({ "rows": 12 })));

    gw.shutdown_job_server(&ops, None).await.unwrap();
}

#[tokio::test]
async fn test_roles_cannot_cross_over() {
    let gw = gateway(authorizer()).await;
    let scheduler = Caller::new("scheduler");
    let worker = Caller::new("worker");

    assert!(matches!(
        gw.job_save(&worker, email("a"), SaveOptions::default())
            .await
            .unwrap_err(),
        AppError::PermissionDenied(_)
    ));
    assert!(gw
        .get_work(&scheduler, &GetWorkRequest::new("email"))
        .await
        .is_err());
    assert!(gw.start_job_server(&worker).await.is_err());
    assert!(gw
        .shutdown_job_server(&Caller::new("stranger"), None)
        .await
        .is_err());
}

#[tokio::test]
async fn test_deny_overrides_role() {
    let gw = gateway(authorizer()).await;
    let ops = Caller::new("ops");
    let support = Caller::new("support");

    let id = gw
        .job_save(&ops, email("a"), SaveOptions::default())
        .await
        .unwrap();
    assert!(gw
        .job_cancel(&support, &[id.clone()], CancelOptions::default())
        .await
        .unwrap());

    let err = gw
        .job_remove(&support, &[id.clone()], Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));

    // Denied call left the record in place
    let stored = gw
        .get_job(&ops, &[id], GetJobOptions::default())
        .await
        .unwrap();
    assert_eq!(stored[0].status, JobStatus::Cancelled);
}
