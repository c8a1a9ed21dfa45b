use crate::db;
use crate::gitlab::GitlabApi;
use crate::telegram::TelegramApi;
use std::sync::Arc;

mod assign_merge_requests;
mod update_users;

pub use assign_merge_requests::{
    AssignError, AssignMergeRequests, AssignmentSummary, ReviewerPicker, assign_merge_requests,
    eligible_reviewers,
};
pub use update_users::{IngestSummary, UpdateUsers, parse_bind_command, update_users};

/// Everything a job needs to talk to the outside world.
pub struct Context {
    pub db: db::Pool,
    pub telegram: Arc<dyn TelegramApi>,
    pub gitlab: Arc<dyn GitlabApi>,
    pub reviewer_picker: ReviewerPicker,
}
