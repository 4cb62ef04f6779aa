use thiserror::Error;

use crate::project::ProjectId;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Project is not attached: {0}")]
    UnknownProject(ProjectId),

    #[error("Re-analysis request failed: {0}")]
    Reanalysis(String),
}
