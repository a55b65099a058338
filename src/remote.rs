//! Remote fragment client
//!
//! [`FragmentStore`] is the narrow contract the rest of the crate needs from
//! the Usable API. [`UsableClient`] implements it over HTTPS.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::auth::TokenProvider;
use crate::error::{Error, Result};
use crate::model::Fragment;

/// Smallest `limit` the API accepts.
pub const MIN_PAGE_SIZE: u32 = 5;
pub const DEFAULT_PAGE_SIZE: u32 = 20;

const FRAGMENTS_PATH: &str = "/api/memory-fragments";
const WORKSPACES_PATH: &str = "/api/workspaces";

/// Filters for a fragment listing. Tags are OR-matched server side.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub tags: Vec<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListQuery {
    pub fn tagged<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Limit actually sent: default 20, never below the API minimum.
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).max(MIN_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFragment {
    pub workspace_id: String,
    pub fragment_type_id: String,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FragmentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl FragmentPatch {
    pub fn tags_only(tags: Vec<String>) -> Self {
        Self {
            tags: Some(tags),
            ..Self::default()
        }
    }
}

impl From<crate::model::FragmentPayload> for FragmentPatch {
    fn from(payload: crate::model::FragmentPayload) -> Self {
        Self {
            title: Some(payload.title),
            summary: Some(payload.summary),
            content: Some(payload.content),
            tags: Some(payload.tags),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedFragment {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub fragment_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteWorkspace {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentType {
    pub id: String,
    #[serde(default)]
    pub workspace_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Operations the task layer needs from the remote store.
#[async_trait]
pub trait FragmentStore: Send + Sync {
    async fn list(&self, workspace_id: &str, query: &ListQuery) -> Result<Vec<Fragment>>;

    async fn get(&self, fragment_id: &str) -> Result<Fragment>;

    async fn create(&self, fragment: &NewFragment) -> Result<CreatedFragment>;

    async fn update(&self, fragment_id: &str, patch: &FragmentPatch) -> Result<()>;

    /// Total number of fragments matching `tags`.
    async fn count(&self, workspace_id: &str, tags: &[String]) -> Result<u64>;

    async fn list_workspaces(&self) -> Result<Vec<RemoteWorkspace>>;

    async fn fragment_types(&self, workspace_id: &str) -> Result<Vec<FragmentType>>;
}

#[derive(Default, Deserialize)]
struct ListResponse {
    #[serde(default)]
    fragments: Vec<Fragment>,
    #[serde(default)]
    count: Option<u64>,
}

#[derive(Default, Deserialize)]
struct GetResponse {
    #[serde(default)]
    fragment: Option<Fragment>,
}

#[derive(Default, Deserialize)]
struct WorkspacesResponse {
    #[serde(default)]
    workspaces: Vec<RemoteWorkspace>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FragmentTypesResponse {
    #[serde(default)]
    fragment_types: Vec<FragmentType>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    #[serde(flatten)]
    fragment: &'a NewFragment,
    created_via: &'static str,
}

/// HTTPS client for the Usable API.
pub struct UsableClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
}

impl UsableClient {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|err| Error::InvalidConfig(format!("invalid API base URL '{base_url}': {err}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            tokens,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|err| Error::InvalidConfig(format!("invalid URL join '{path}': {err}")))
    }

    fn list_url(&self, workspace_id: &str, tags: &[String], limit: u32, offset: Option<u32>) -> Result<Url> {
        let mut url = self.url(FRAGMENTS_PATH)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("workspaceId", workspace_id);
            for tag in tags {
                pairs.append_pair("tags", tag);
            }
            pairs.append_pair("limit", &limit.to_string());
            if let Some(offset) = offset.filter(|offset| *offset > 0) {
                pairs.append_pair("offset", &offset.to_string());
            }
        }
        Ok(url)
    }

    /// Send one request; retries once with a refreshed token on 401.
    async fn send<T, B>(&self, method: Method, url: Url, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned + Default,
        B: Serialize + ?Sized,
    {
        let mut token = self.tokens.current_token().ok_or(Error::NotAuthenticated)?;
        let mut retried = false;

        loop {
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .bearer_auth(token.expose_secret());
            if let Some(body) = body {
                request = request.json(body);
            }

            let resp = request.send().await.map_err(|err| {
                warn!(%method, %url, error = %err, "Usable request failed");
                Error::from(err)
            })?;

            let status = resp.status();
            if status == StatusCode::UNAUTHORIZED && !retried {
                if let Ok(Some(fresh)) = self.tokens.refresh().await {
                    debug!(%url, "retrying with refreshed token");
                    token = fresh;
                    retried = true;
                    continue;
                }
            }

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                warn!(%method, %url, status = status.as_u16(), "Usable API error");
                return Err(Error::Api {
                    status: status.as_u16(),
                    body,
                });
            }

            let text = resp.text().await.map_err(Error::from)?;
            if text.trim().is_empty() {
                return Ok(T::default());
            }
            return serde_json::from_str(&text).map_err(|err| {
                warn!(%method, %url, error = %err, "undecodable Usable response");
                Error::MalformedResponse(err.to_string())
            });
        }
    }

    async fn get_json<T: DeserializeOwned + Default>(&self, url: Url) -> Result<T> {
        self.send::<T, ()>(Method::GET, url, None).await
    }
}

#[async_trait]
impl FragmentStore for UsableClient {
    async fn list(&self, workspace_id: &str, query: &ListQuery) -> Result<Vec<Fragment>> {
        let url = self.list_url(workspace_id, &query.tags, query.effective_limit(), query.offset)?;
        let resp: ListResponse = self.get_json(url).await?;
        debug!(count = resp.fragments.len(), "listed fragments");
        Ok(resp.fragments)
    }

    async fn get(&self, fragment_id: &str) -> Result<Fragment> {
        let url = self.url(&format!("{FRAGMENTS_PATH}/{fragment_id}"))?;
        let resp: GetResponse = self.get_json(url).await?;
        resp.fragment
            .ok_or_else(|| Error::TaskNotFound(fragment_id.to_string()))
    }

    async fn create(&self, fragment: &NewFragment) -> Result<CreatedFragment> {
        let url = self.url(FRAGMENTS_PATH)?;
        let body = CreateBody {
            fragment,
            created_via: "api",
        };
        let created: CreatedFragment = self.send(Method::POST, url, Some(&body)).await?;
        if created.fragment_id.is_empty() {
            return Err(Error::MalformedResponse(
                "create response carried no fragmentId".to_string(),
            ));
        }
        Ok(created)
    }

    async fn update(&self, fragment_id: &str, patch: &FragmentPatch) -> Result<()> {
        let url = self.url(&format!("{FRAGMENTS_PATH}/{fragment_id}"))?;
        let _: serde_json::Value = self.send(Method::PATCH, url, Some(patch)).await?;
        Ok(())
    }

    async fn count(&self, workspace_id: &str, tags: &[String]) -> Result<u64> {
        let url = self.list_url(workspace_id, tags, MIN_PAGE_SIZE, None)?;
        let resp: ListResponse = self.get_json(url).await?;
        Ok(resp.count.unwrap_or(0))
    }

    async fn list_workspaces(&self) -> Result<Vec<RemoteWorkspace>> {
        let resp: WorkspacesResponse = self.get_json(self.url(WORKSPACES_PATH)?).await?;
        Ok(resp.workspaces)
    }

    async fn fragment_types(&self, workspace_id: &str) -> Result<Vec<FragmentType>> {
        let url = self.url(&format!("{WORKSPACES_PATH}/{workspace_id}/fragment-types"))?;
        let resp: FragmentTypesResponse = self.get_json(url).await?;
        Ok(resp.fragment_types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(ListQuery::default().effective_limit(), DEFAULT_PAGE_SIZE);
        assert_eq!(ListQuery::default().with_limit(1).effective_limit(), MIN_PAGE_SIZE);
        assert_eq!(ListQuery::default().with_limit(200).effective_limit(), 200);
    }

    #[test]
    fn list_url_repeats_tags() {
        let client = UsableClient::new("https://usable.dev", Arc::new(StaticToken::new("t")))
            .expect("client");
        let url = client
            .list_url("ws-1", &["task".to_string(), "urgent".to_string()], 5, Some(10))
            .expect("url");
        assert_eq!(url.path(), "/api/memory-fragments");
        assert_eq!(
            url.query(),
            Some("workspaceId=ws-1&tags=task&tags=urgent&limit=5&offset=10")
        );
    }

    #[test]
    fn create_body_marks_api_origin() {
        let fragment = NewFragment {
            workspace_id: "ws".to_string(),
            fragment_type_id: "ft".to_string(),
            title: "T".to_string(),
            summary: "S".to_string(),
            content: "C".to_string(),
            tags: vec!["task".to_string()],
        };
        let value = serde_json::to_value(CreateBody {
            fragment: &fragment,
            created_via: "api",
        })
        .expect("json");
        assert_eq!(value["createdVia"], "api");
        assert_eq!(value["fragmentTypeId"], "ft");
        assert_eq!(value["workspaceId"], "ws");
    }

    #[test]
    fn patch_omits_unset_fields() {
        let value = serde_json::to_value(FragmentPatch::tags_only(vec!["a".to_string()]))
            .expect("json");
        assert_eq!(value, serde_json::json!({ "tags": ["a"] }));
    }
}
