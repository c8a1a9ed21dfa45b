//! Hands merge requests assigned to the bot's account over to a reviewer.
//!
//! Every open merge request assigned to the service account gets a random
//! project member with at least Developer access, other than its author, as
//! its new assignee. The reviewer is then told about it on Telegram, if they
//! have bound their GitLab username with `/gitlabusername`.
//!
//! Merge requests are handled one by one and a failure only affects the
//! request it happened on.

use super::Context;
use crate::gitlab::{AccessLevel, Member, MergeRequest, MergeRequestIid, ProjectId, User};
use crate::jobs::Job;
use anyhow::Context as _;
use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use std::fmt;
use std::sync::Mutex;
use tracing as log;

pub struct AssignMergeRequests;

#[async_trait]
impl Job for AssignMergeRequests {
    fn name(&self) -> &'static str {
        "assign_merge_requests"
    }

    async fn run(&self, ctx: &Context) -> anyhow::Result<()> {
        let summary = assign_merge_requests(ctx).await?;
        if summary != AssignmentSummary::default() {
            log::info!(
                "assigned {}, skipped {}, failed {}, sent {} notifications",
                summary.assigned,
                summary.skipped,
                summary.failed,
                summary.notified
            );
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentSummary {
    pub assigned: usize,
    /// Merge requests nobody could be assigned to.
    pub skipped: usize,
    pub failed: usize,
    pub notified: usize,
}

#[derive(Debug)]
pub enum AssignError {
    NoEligibleReviewer {
        project_id: ProjectId,
        iid: MergeRequestIid,
    },
    Other(anyhow::Error),
}

impl From<anyhow::Error> for AssignError {
    fn from(e: anyhow::Error) -> Self {
        AssignError::Other(e)
    }
}

impl std::error::Error for AssignError {}

impl fmt::Display for AssignError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AssignError::NoEligibleReviewer { project_id, iid } => write!(
                f,
                "no eligible reviewer for merge request {project_id}!{iid}"
            ),
            AssignError::Other(e) => write!(f, "{e:?}"),
        }
    }
}

/// Picks reviewers uniformly at random.
pub struct ReviewerPicker {
    rng: Mutex<StdRng>,
}

impl ReviewerPicker {
    pub fn from_entropy() -> Self {
        ReviewerPicker {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// A picker that makes the same choices every time, for a given seed.
    pub fn seeded(seed: u64) -> Self {
        ReviewerPicker {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn pick<I>(&self, candidates: I) -> Option<I::Item>
    where
        I: IntoIterator,
    {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        candidates.into_iter().choose(&mut *rng)
    }
}

/// The members that may review a merge request by `author`.
pub fn eligible_reviewers<'a>(
    members: &'a [Member],
    me: &User,
    author: &User,
) -> Vec<&'a Member> {
    members
        .iter()
        .filter(|m| m.id != me.id && m.id != author.id)
        .filter(|m| m.access_level >= AccessLevel::DEVELOPER)
        .collect()
}

fn notification_text(telegram_username: &str, merge_request: &MergeRequest) -> String {
    format!(
        "{telegram_username}, you have been assigned a merge request:\n{}",
        merge_request.web_url
    )
}

/// Runs one round of assignments.
///
/// Fails only if the service account or its merge requests cannot be
/// fetched.
pub async fn assign_merge_requests(ctx: &Context) -> anyhow::Result<AssignmentSummary> {
    let me = ctx
        .gitlab
        .current_user()
        .await
        .context("resolving the service account")?;
    let merge_requests = ctx.gitlab.assigned_merge_requests().await?;
    log::trace!(
        "{} merge requests assigned to {}",
        merge_requests.len(),
        me.username
    );

    let mut summary = AssignmentSummary::default();
    for mr in merge_requests.iter().filter(|mr| mr.merged_by.is_none()) {
        match assign_one(ctx, &me, mr).await {
            Ok(notified) => {
                summary.assigned += 1;
                summary.notified += notified;
            }
            Err(e @ AssignError::NoEligibleReviewer { .. }) => {
                log::warn!("{e}");
                summary.skipped += 1;
            }
            Err(AssignError::Other(e)) => {
                log::error!("failed to assign {}: {:?}", mr.global_id(), e);
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

/// Assigns `mr` and returns how many notifications were sent.
async fn assign_one(ctx: &Context, me: &User, mr: &MergeRequest) -> Result<usize, AssignError> {
    let members = ctx.gitlab.project_members(mr.project_id).await?;
    let reviewer = ctx
        .reviewer_picker
        .pick(eligible_reviewers(&members, me, &mr.author))
        .ok_or(AssignError::NoEligibleReviewer {
            project_id: mr.project_id,
            iid: mr.iid,
        })?;

    ctx.gitlab
        .set_merge_request_assignee(mr.project_id, mr.iid, reviewer.id)
        .await?;
    log::info!(
        "assigned {} ({}) to {} ({})",
        mr.global_id(),
        mr.title,
        reviewer.username,
        reviewer.access_level
    );

    let mappings = {
        let mut db = ctx.db.connection().await?;
        db.get_user_mappings_by_gitlab_username(&reviewer.username)
            .await?
    };
    if mappings.is_empty() {
        log::debug!(
            "{} has no Telegram account, not notifying",
            reviewer.username
        );
    }

    let mut notified = 0;
    for mapping in &mappings {
        let text = notification_text(&mapping.telegram_username, mr);
        match ctx
            .telegram
            .send_message(mapping.telegram_chat_id, &text)
            .await
        {
            Ok(_) => notified += 1,
            Err(e) => log::warn!(
                "failed to notify {} about {}: {:?}",
                mapping.telegram_username,
                mr.global_id(),
                e
            ),
        }
    }
    Ok(notified)
}
