use super::{MergeRequestIid, ProjectId, UserId};
use serde::Deserialize;
use std::fmt;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub name: String,
}

/// A project member as returned by `/projects/:id/members/all`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub name: String,
    pub access_level: AccessLevel,
}

/// GitLab's role ladder. Higher values include the rights of lower ones.
#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct AccessLevel(pub u32);

impl AccessLevel {
    pub const NO_ACCESS: AccessLevel = AccessLevel(0);
    pub const MINIMAL_ACCESS: AccessLevel = AccessLevel(5);
    pub const GUEST: AccessLevel = AccessLevel(10);
    pub const PLANNER: AccessLevel = AccessLevel(15);
    pub const REPORTER: AccessLevel = AccessLevel(20);
    /// The lowest role that can review and merge.
    pub const DEVELOPER: AccessLevel = AccessLevel(30);
    pub const MAINTAINER: AccessLevel = AccessLevel(40);
    pub const OWNER: AccessLevel = AccessLevel(50);
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            AccessLevel::NO_ACCESS => "No access",
            AccessLevel::MINIMAL_ACCESS => "Minimal access",
            AccessLevel::GUEST => "Guest",
            AccessLevel::PLANNER => "Planner",
            AccessLevel::REPORTER => "Reporter",
            AccessLevel::DEVELOPER => "Developer",
            AccessLevel::MAINTAINER => "Maintainer",
            AccessLevel::OWNER => "Owner",
            AccessLevel(other) => return write!(f, "access level {other}"),
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct MergeRequest {
    pub id: u64,
    pub iid: MergeRequestIid,
    pub project_id: ProjectId,
    #[serde(default)]
    pub title: String,
    pub author: User,
    pub assignee: Option<User>,
    pub merged_by: Option<User>,
    pub web_url: String,
}

impl MergeRequest {
    /// `project_id!iid`, for log lines.
    pub fn global_id(&self) -> String {
        format!("{}!{}", self.project_id, self.iid)
    }
}
