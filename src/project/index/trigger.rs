//! Re-analysis triggering abstraction
//!
//! This module provides the ReanalysisTrigger trait for decoupling the
//! incremental updater from whatever the host does once a project's build
//! metadata changed (typically a semantic re-analysis pass).

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::project::{ProjectError, ProjectId};

/// Trait for signalling that dependent state of a project should be refreshed
///
/// Only invoked when a merge actually changed the project's metadata, so
/// implementations may start expensive work.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReanalysisTrigger: Send + Sync {
    /// Request re-analysis of the given project
    ///
    /// # Returns
    /// * `Ok(())` if the request was accepted
    /// * `Err(ProjectError)` if it could not be delivered; the merge still stands
    async fn trigger(&self, project: ProjectId) -> Result<(), ProjectError>;
}

/// Trigger that only records the request in the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReanalysisTrigger;

#[async_trait]
impl ReanalysisTrigger for LoggingReanalysisTrigger {
    async fn trigger(&self, project: ProjectId) -> Result<(), ProjectError> {
        info!("Build metadata changed, re-analysis requested for project {}", project);
        Ok(())
    }
}

/// Trigger that hands requests to whoever serves the host, without waiting
///
/// A full queue or a vanished receiver is reported as a failed request.
#[derive(Debug, Clone)]
pub struct ChannelReanalysisTrigger {
    requests: mpsc::Sender<ProjectId>,
}

impl ChannelReanalysisTrigger {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ProjectId>) {
        let (requests, receiver) = mpsc::channel(buffer);
        (Self { requests }, receiver)
    }
}

#[async_trait]
impl ReanalysisTrigger for ChannelReanalysisTrigger {
    async fn trigger(&self, project: ProjectId) -> Result<(), ProjectError> {
        self.requests.try_send(project).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                ProjectError::Reanalysis("too many pending requests".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                ProjectError::Reanalysis("nobody is listening for requests".to_string())
            }
        })
    }
}
