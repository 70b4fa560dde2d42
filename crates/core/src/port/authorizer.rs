// Authorizer Port (Interface)
//
// Maps a caller identity and an operation to allow/deny. Anything that is not
// an explicit allow is treated as a deny by the gateway.

use crate::domain::{DomainError, JobId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Guarded queue operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    StartJobServer,
    ShutdownJobServer,
    JobRemove,
    JobPause,
    JobResume,
    JobReady,
    JobCancel,
    JobRestart,
    JobSave,
    JobRerun,
    GetWork,
    GetJob,
    JobLog,
    JobProgress,
    JobDone,
    JobFail,
}

impl Method {
    pub const ALL: [Method; 16] = [
        Method::StartJobServer,
        Method::ShutdownJobServer,
        Method::JobRemove,
        Method::JobPause,
        Method::JobResume,
        Method::JobReady,
        Method::JobCancel,
        Method::JobRestart,
        Method::JobSave,
        Method::JobRerun,
        Method::GetWork,
        Method::GetJob,
        Method::JobLog,
        Method::JobProgress,
        Method::JobDone,
        Method::JobFail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::StartJobServer => "startJobServer",
            Method::ShutdownJobServer => "shutdownJobServer",
            Method::JobRemove => "jobRemove",
            Method::JobPause => "jobPause",
            Method::JobResume => "jobResume",
            Method::JobReady => "jobReady",
            Method::JobCancel => "jobCancel",
            Method::JobRestart => "jobRestart",
            Method::JobSave => "jobSave",
            Method::JobRerun => "jobRerun",
            Method::GetWork => "getWork",
            Method::GetJob => "getJob",
            Method::JobLog => "jobLog",
            Method::JobProgress => "jobProgress",
            Method::JobDone => "jobDone",
            Method::JobFail => "jobFail",
        }
    }

    /// Role (besides `admin`) that grants this method
    pub fn role(&self) -> Option<Role> {
        match self {
            Method::StartJobServer | Method::ShutdownJobServer => None,
            Method::JobRemove
            | Method::JobPause
            | Method::JobResume
            | Method::JobReady
            | Method::JobCancel
            | Method::JobRestart => Some(Role::Manager),
            Method::JobSave | Method::JobRerun => Some(Role::Creator),
            Method::GetWork
            | Method::GetJob
            | Method::JobLog
            | Method::JobProgress
            | Method::JobDone
            | Method::JobFail => Some(Role::Worker),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| DomainError::ValidationError(format!("Unknown method: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Creator,
    Worker,
}

impl Role {
    pub fn grants(&self, method: Method) -> bool {
        match self {
            Role::Admin => true,
            role => method.role() == Some(*role),
        }
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "creator" => Ok(Role::Creator),
            "worker" => Ok(Role::Worker),
            other => Err(DomainError::ValidationError(format!("Unknown role: {}", other))),
        }
    }
}

/// Authenticated caller identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Caller {
    pub identity: String,
}

impl Caller {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }
}

/// A permission rule: a whole role or a single method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Role(Role),
    Method(Method),
}

impl Grant {
    fn covers(&self, method: Method) -> bool {
        match self {
            Grant::Role(role) => role.grants(method),
            Grant::Method(m) => *m == method,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    /// No rule applies
    Abstain,
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn check(&self, caller: &Caller, method: Method, job_ids: &[JobId]) -> Decision;
}

/// Static role table. Deny rules win over allow rules.
#[derive(Debug, Default)]
pub struct RoleAuthorizer {
    allow: HashMap<String, Vec<Grant>>,
    deny: HashMap<String, Vec<Grant>>,
}

impl RoleAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, identity: impl Into<String>, grant: Grant) -> Self {
        self.allow.entry(identity.into()).or_default().push(grant);
        self
    }

    pub fn deny(mut self, identity: impl Into<String>, grant: Grant) -> Self {
        self.deny.entry(identity.into()).or_default().push(grant);
        self
    }

    /// Single identity holding `admin`
    pub fn admin(identity: impl Into<String>) -> Self {
        Self::new().allow(identity, Grant::Role(Role::Admin))
    }

    fn matches(rules: &HashMap<String, Vec<Grant>>, caller: &Caller, method: Method) -> bool {
        rules
            .get(&caller.identity)
            .is_some_and(|grants| grants.iter().any(|g| g.covers(method)))
    }
}

#[async_trait]
impl Authorizer for RoleAuthorizer {
    async fn check(&self, caller: &Caller, method: Method, _job_ids: &[JobId]) -> Decision {
        if Self::matches(&self.deny, caller, method) {
            Decision::Deny
        } else if Self::matches(&self.allow, caller, method) {
            Decision::Allow
        } else {
            Decision::Abstain
        }
    }
}
