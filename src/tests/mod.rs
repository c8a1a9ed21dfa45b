//! Runs the jobs against a throwaway SQLite database and in-memory
//! stand-ins for Telegram and GitLab.

use crate::db::{self, update_offsets, user_mappings::UserMapping};
use crate::gitlab::{
    AccessLevel, GitlabApi, Member, MergeRequest, MergeRequestIid, ProjectId, User, UserId,
};
use crate::handlers::{Context, ReviewerPicker};
use crate::telegram::{self, ChatId, TelegramApi, Update};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;


pub const SERVICE_ACCOUNT_ID: UserId = 1;

pub struct TestContext {
    pub ctx: Context,
    pub telegram: Arc<FakeTelegram>,
    pub gitlab: Arc<FakeGitlab>,
    _dir: TempDir,
}

impl TestContext {
    pub fn new(gitlab: FakeGitlab) -> Self {
        crate::logger::maybe_enable_for_tests("BOT_TEST_LOG");
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("bot.db");
        let pool = db::Pool::open(db_path.to_str().unwrap());
        let telegram = Arc::new(FakeTelegram::default());
        telegram.watch_pool(pool.clone());
        let gitlab = Arc::new(gitlab);
        let ctx = Context {
            db: pool,
            telegram: telegram.clone(),
            gitlab: gitlab.clone(),
            reviewer_picker: ReviewerPicker::seeded(0),
        };
        TestContext {
            ctx,
            telegram,
            gitlab,
            _dir: dir,
        }
    }

    pub async fn offset(&self) -> Option<i64> {
        let mut conn = self.ctx.db.connection().await.unwrap();
        update_offsets::current_offset(&mut *conn).await.unwrap()
    }

    pub async fn mappings_of_telegram_user(&self, username: &str) -> Vec<UserMapping> {
        let mut conn = self.ctx.db.connection().await.unwrap();
        conn.get_user_mappings_by_telegram_username(username)
            .await
            .unwrap()
    }

    /// Stores a mapping as if `telegram_username` had sent a bind command.
    pub async fn bind(&self, telegram_username: &str, chat_id: ChatId, gitlab_username: &str) {
        let mut conn = self.ctx.db.connection().await.unwrap();
        conn.replace_user_mapping(&db::user_mappings::NewUserMapping {
            telegram_username: telegram_username.to_string(),
            telegram_chat_id: chat_id,
            telegram_first_name: None,
            telegram_last_name: None,
            gitlab_username: gitlab_username.to_string(),
        })
        .await
        .unwrap();
    }
}

/// A Telegram bot whose update stream is filled by the test.
#[derive(Default)]
pub struct FakeTelegram {
    updates: Mutex<Vec<Update>>,
    requested_offsets: Mutex<Vec<Option<i64>>>,
    sent: Mutex<Vec<(ChatId, String)>>,
    unreachable_chats: Mutex<HashSet<ChatId>>,
    pool: Mutex<Option<db::Pool>>,
    connections_in_use: Mutex<Vec<usize>>,
}

impl FakeTelegram {
    /// Queues a text message from `username`, sent in chat `chat_id`.
    pub fn push_message(
        &self,
        update_id: i64,
        username: Option<&str>,
        chat_id: ChatId,
        text: &str,
    ) {
        self.push_update(Update {
            update_id,
            message: Some(telegram::Message {
                message_id: update_id * 10,
                from: Some(telegram::User {
                    id: chat_id,
                    is_bot: false,
                    first_name: username.unwrap_or("Anonymous").to_string(),
                    last_name: None,
                    username: username.map(str::to_string),
                }),
                chat: telegram::Chat {
                    id: chat_id,
                    username: username.map(str::to_string),
                },
                text: Some(text.to_string()),
            }),
        });
    }

    pub fn push_update(&self, update: Update) {
        self.updates.lock().unwrap().push(update);
    }

    pub fn make_unreachable(&self, chat_id: ChatId) {
        self.unreachable_chats.lock().unwrap().insert(chat_id);
    }

    /// Records how many database connections are checked out whenever the
    /// bot talks to Telegram.
    pub fn watch_pool(&self, pool: db::Pool) {
        *self.pool.lock().unwrap() = Some(pool);
    }

    pub fn connections_in_use(&self) -> Vec<usize> {
        self.connections_in_use.lock().unwrap().clone()
    }

    fn record_connections_in_use(&self) {
        if let Some(pool) = &*self.pool.lock().unwrap() {
            self.connections_in_use
                .lock()
                .unwrap()
                .push(pool.connections_in_use());
        }
    }

    pub fn requested_offsets(&self) -> Vec<Option<i64>> {
        self.requested_offsets.lock().unwrap().clone()
    }

    pub fn sent_messages(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TelegramApi for FakeTelegram {
    async fn get_updates(&self, offset: Option<i64>) -> anyhow::Result<Vec<Update>> {
        self.record_connections_in_use();
        self.requested_offsets.lock().unwrap().push(offset);
        let min = offset.unwrap_or(i64::MIN);
        Ok(self
            .updates
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.update_id >= min)
            .cloned()
            .collect())
    }

    async fn send_message(&self, chat_id: ChatId, text: &str) -> anyhow::Result<telegram::Message> {
        self.record_connections_in_use();
        if self.unreachable_chats.lock().unwrap().contains(&chat_id) {
            anyhow::bail!("Telegram API error 403: Forbidden: bot was blocked by the user");
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((chat_id, text.to_string()));
        Ok(telegram::Message {
            message_id: sent.len() as i64,
            from: None,
            chat: telegram::Chat {
                id: chat_id,
                username: None,
            },
            text: Some(text.to_string()),
        })
    }
}

/// A GitLab instance seen through the service account.
///
/// Assigning a merge request to someone else takes it off the service
/// account's list, like GitLab does.
pub struct FakeGitlab {
    me: User,
    merge_requests: Mutex<Vec<MergeRequest>>,
    members: HashMap<ProjectId, Vec<Member>>,
    broken_projects: HashSet<ProjectId>,
    failing_assignments: HashSet<ProjectId>,
    current_user_fails: bool,
    assignments: Mutex<Vec<(ProjectId, MergeRequestIid, UserId)>>,
}

impl Default for FakeGitlab {
    fn default() -> Self {
        FakeGitlab {
            me: user(SERVICE_ACCOUNT_ID, "svc"),
            merge_requests: Mutex::new(Vec::new()),
            members: HashMap::new(),
            broken_projects: HashSet::new(),
            failing_assignments: HashSet::new(),
            current_user_fails: false,
            assignments: Mutex::new(Vec::new()),
        }
    }
}

impl FakeGitlab {
    pub fn merge_request(self, mr: MergeRequest) -> Self {
        self.merge_requests.lock().unwrap().push(mr);
        self
    }

    pub fn members(mut self, project_id: ProjectId, members: Vec<Member>) -> Self {
        self.members.insert(project_id, members);
        self
    }

    /// Makes member listing fail for `project_id`.
    pub fn broken_project(mut self, project_id: ProjectId) -> Self {
        self.broken_projects.insert(project_id);
        self
    }

    /// Makes setting the assignee fail for `project_id`.
    pub fn failing_assignment(mut self, project_id: ProjectId) -> Self {
        self.failing_assignments.insert(project_id);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.current_user_fails = true;
        self
    }

    pub fn assignments(&self) -> Vec<(ProjectId, MergeRequestIid, UserId)> {
        self.assignments.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl GitlabApi for FakeGitlab {
    async fn current_user(&self) -> anyhow::Result<User> {
        if self.current_user_fails {
            anyhow::bail!("502 Bad Gateway");
        }
        Ok(self.me.clone())
    }

    async fn assigned_merge_requests(&self) -> anyhow::Result<Vec<MergeRequest>> {
        Ok(self
            .merge_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|mr| mr.assignee.as_ref().map(|a| a.id) == Some(self.me.id))
            .cloned()
            .collect())
    }

    async fn project_members(&self, project_id: ProjectId) -> anyhow::Result<Vec<Member>> {
        if self.broken_projects.contains(&project_id) {
            anyhow::bail!("500 Internal Server Error");
        }
        Ok(self.members.get(&project_id).cloned().unwrap_or_default())
    }

    async fn set_merge_request_assignee(
        &self,
        project_id: ProjectId,
        iid: MergeRequestIid,
        user_id: UserId,
    ) -> anyhow::Result<()> {
        if self.failing_assignments.contains(&project_id) {
            anyhow::bail!("500 Internal Server Error");
        }
        let members = self.members.get(&project_id).cloned().unwrap_or_default();
        let assignee = members
            .iter()
            .find(|m| m.id == user_id)
            .map(|m| user(m.id, &m.username))
            .ok_or_else(|| anyhow::anyhow!("404 user {user_id} not found"))?;
        let mut merge_requests = self.merge_requests.lock().unwrap();
        let mr = merge_requests
            .iter_mut()
            .find(|mr| mr.project_id == project_id && mr.iid == iid)
            .ok_or_else(|| anyhow::anyhow!("404 merge request {project_id}!{iid} not found"))?;
        mr.assignee = Some(assignee);
        self.assignments
            .lock()
            .unwrap()
            .push((project_id, iid, user_id));
        Ok(())
    }
}

pub fn user(id: UserId, username: &str) -> User {
    User {
        id,
        username: username.to_string(),
        name: username.to_string(),
    }
}

pub fn member(id: UserId, username: &str, level: AccessLevel) -> Member {
    Member {
        id,
        username: username.to_string(),
        name: username.to_string(),
        access_level: level,
    }
}

/// An open merge request assigned to the service account.
pub fn merge_request(project_id: ProjectId, iid: MergeRequestIid, author: &User) -> MergeRequest {
    MergeRequest {
        id: project_id * 1000 + iid,
        iid,
        project_id,
        title: format!("Change {iid}"),
        author: author.clone(),
        assignee: Some(user(SERVICE_ACCOUNT_ID, "svc")),
        merged_by: None,
        web_url: format!("https://gitlab.example.com/group/project{project_id}/-/merge_requests/{iid}"),
    }
}
