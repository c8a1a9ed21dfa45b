use crate::gitlab::api::{Member, MergeRequest, User};
use crate::gitlab::{GitlabApi, MergeRequestIid, ProjectId, UserId};
use anyhow::Context;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing as log;

const PRIVATE_TOKEN: &str = "PRIVATE-TOKEN";
const NEXT_PAGE: &str = "X-Next-Page";
const PER_PAGE: &str = "100";

#[derive(Clone)]
pub struct GitlabClient {
    client: Client,
    api_url: String,
    auth: HeaderValue,
}

impl GitlabClient {
    /// `api_url` is the REST root, e.g. `https://gitlab.com/api/v4`.
    pub fn new(token: &SecretString, api_url: String) -> anyhow::Result<Self> {
        let mut auth = HeaderValue::from_str(token.expose_secret())
            .context("GitLab token is not a valid header value")?;
        auth.set_sensitive(true);
        Ok(GitlabClient {
            client: Client::new(),
            api_url,
            auth,
        })
    }

    async fn send_req(&self, req: RequestBuilder) -> anyhow::Result<(Bytes, HeaderMap)> {
        let req = req.build().context("building reqwest")?;
        let req_dbg = format!("{} {}", req.method(), req.url());
        log::debug!("send_req {}", req_dbg);

        let resp = self
            .client
            .execute(req)
            .await
            .with_context(|| format!("sending {req_dbg}"))?;
        let maybe_err = resp.error_for_status_ref().err();
        let headers = resp.headers().clone();
        let body = resp
            .bytes()
            .await
            .with_context(|| format!("failed to read response body {req_dbg}"))?;
        if let Some(e) = maybe_err {
            return Err(anyhow::Error::new(e))
                .with_context(|| format!("response: {}", String::from_utf8_lossy(&body)));
        }

        Ok((body, headers))
    }

    pub async fn json<T>(&self, req: RequestBuilder) -> anyhow::Result<T>
    where
        T: DeserializeOwned,
    {
        let (body, _headers) = self.send_req(req).await?;
        serde_json::from_slice(&body).with_context(|| {
            format!(
                "Failed to deserialize value of type {}",
                std::any::type_name::<T>()
            )
        })
    }

    /// Fetches every page of a list endpoint, following `X-Next-Page`.
    async fn paginated<T>(&self, path: &str, query: &[(&str, &str)]) -> anyhow::Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}/{path}", self.api_url);
        let mut items = Vec::new();
        let mut page = String::from("1");
        loop {
            let req = self
                .get(&url)
                .query(query)
                .query(&[("per_page", PER_PAGE), ("page", page.as_str())]);
            let (body, headers) = self.send_req(req).await?;
            let batch: Vec<T> = serde_json::from_slice(&body)
                .with_context(|| format!("Failed to deserialize page {page} of {path}"))?;
            items.extend(batch);

            match headers
                .get(NEXT_PAGE)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
            {
                Some(next) => page = next.to_string(),
                None => break,
            }
        }
        Ok(items)
    }

    fn get(&self, url: &str) -> RequestBuilder {
        log::trace!("get {:?}", url);
        self.client.get(url).configure(self)
    }

    fn put(&self, url: &str) -> RequestBuilder {
        log::trace!("put {:?}", url);
        self.client.put(url).configure(self)
    }
}

#[async_trait::async_trait]
impl GitlabApi for GitlabClient {
    async fn current_user(&self) -> anyhow::Result<User> {
        self.json(self.get(&format!("{}/user", self.api_url)))
            .await
            .context("getting the current user")
    }

    async fn assigned_merge_requests(&self) -> anyhow::Result<Vec<MergeRequest>> {
        self.paginated(
            "merge_requests",
            &[("scope", "assigned_to_me"), ("state", "opened")],
        )
        .await
        .context("listing assigned merge requests")
    }

    async fn project_members(&self, project_id: ProjectId) -> anyhow::Result<Vec<Member>> {
        self.paginated(&format!("projects/{project_id}/members/all"), &[])
            .await
            .with_context(|| format!("listing members of project {project_id}"))
    }

    async fn set_merge_request_assignee(
        &self,
        project_id: ProjectId,
        iid: MergeRequestIid,
        user_id: UserId,
    ) -> anyhow::Result<()> {
        let url = format!(
            "{}/projects/{project_id}/merge_requests/{iid}",
            self.api_url
        );
        self.send_req(
            self.put(&url)
                .json(&serde_json::json!({ "assignee_id": user_id })),
        )
        .await
        .with_context(|| format!("assigning {project_id}!{iid} to user {user_id}"))?;
        Ok(())
    }
}

trait RequestSend: Sized {
    fn configure(self, g: &GitlabClient) -> Self;
}

impl RequestSend for RequestBuilder {
    fn configure(self, g: &GitlabClient) -> RequestBuilder {
        self.header(USER_AGENT, "gitlab-telegram-bot")
            .header(PRIVATE_TOKEN, g.auth.clone())
    }
}
