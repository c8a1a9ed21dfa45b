//! GitLab REST API (v4) access.

pub mod api;
pub mod client;

pub use api::{AccessLevel, Member, MergeRequest, User};
pub use client::GitlabClient;

pub type UserId = u64;
pub type ProjectId = u64;
/// The project-scoped number of a merge request, the one shown as `!42`.
pub type MergeRequestIid = u64;

#[async_trait::async_trait]
pub trait GitlabApi: Send + Sync {
    /// The account the token belongs to.
    async fn current_user(&self) -> anyhow::Result<User>;

    /// Every open merge request assigned to the current user, across all
    /// projects.
    async fn assigned_merge_requests(&self) -> anyhow::Result<Vec<MergeRequest>>;

    /// All members of a project, including the ones inherited from its
    /// groups.
    async fn project_members(&self, project_id: ProjectId) -> anyhow::Result<Vec<Member>>;

    /// Replaces the assignees of a merge request with `user_id`.
    async fn set_merge_request_assignee(
        &self,
        project_id: ProjectId,
        iid: MergeRequestIid,
        user_id: UserId,
    ) -> anyhow::Result<()>;
}
