//! Remote state client: the managed system holding property values.
//!
//! [`RemoteStateClient`] is the contract the reconciler depends on;
//! [`GithubClient`] implements it against the GitHub custom properties REST
//! API. The client owns one `ureq::Agent` plus credentials and is shared
//! across workers behind an `Arc`. The only state it keeps is the repository
//! listing, fetched at most once per client so a run lists the org once.
//!
//! Entity ids come from external feeds, so every path segment is
//! percent-encoded before it reaches a URL.

use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use propsync_core::{EntityId, PropertyName};

use crate::error::RemoteError;

const PAGE_SIZE: usize = 100;
const API_VERSION: &str = "2022-11-28";

/// Read and write access to property values on managed entities.
///
/// `set_value` is the only mutating call in the system.
pub trait RemoteStateClient: Send + Sync {
    /// Every managed entity, all pages concatenated.
    fn list_entities(&self) -> Result<Vec<EntityId>, RemoteError>;

    /// Current value of `property` on `entity`; `None` when unset.
    fn get_value(
        &self,
        entity: &EntityId,
        property: &PropertyName,
    ) -> Result<Option<String>, RemoteError>;

    /// Set (or, with `None`, clear) `property` on `entity`.
    fn set_value(
        &self,
        entity: &EntityId,
        property: &PropertyName,
        value: Option<&str>,
    ) -> Result<(), RemoteError>;
}

/// Team membership lookup used by the `github-teams` adapter.
pub trait TeamDirectory: Send + Sync {
    /// Entities whose team assignment should be inspected.
    fn repositories(&self) -> Result<Vec<EntityId>, RemoteError>;

    /// Slug of the first team with access to `entity`, if any.
    fn first_team(&self, entity: &EntityId) -> Result<Option<String>, RemoteError>;
}

// ---------------------------------------------------------------------------
// GitHub implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    name: String,
    #[serde(default)]
    archived: bool,
}

#[derive(Debug, Deserialize)]
struct PropertyValuePayload {
    property_name: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct TeamPayload {
    slug: String,
}

/// GitHub REST client for one organization.
pub struct GithubClient {
    agent: ureq::Agent,
    base_url: String,
    org: String,
    token: String,
    listing: OnceLock<Vec<EntityId>>,
}

impl GithubClient {
    /// `timeout` bounds every individual HTTP call.
    pub fn new(
        base_url: impl Into<String>,
        org: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("propsync/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            org: org.into(),
            token: token.into(),
            listing: OnceLock::new(),
        }
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        self.agent
            .request(method, &format!("{}{}", self.base_url, path))
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", "application/vnd.github+json")
            .set("X-GitHub-Api-Version", API_VERSION)
    }

    /// `/repos/{org}/{repo}/{suffix}` with both segments percent-encoded.
    ///
    /// `.` and `..` survive encoding and would be collapsed by URL
    /// normalization, so they are rejected along with the empty name.
    fn repo_path(&self, entity: &EntityId, suffix: &str) -> Result<String, String> {
        let name = entity.0.as_str();
        if name.is_empty() || name == "." || name == ".." {
            return Err(format!("invalid repository name {name:?}"));
        }
        Ok(format!(
            "/repos/{}/{}/{suffix}",
            urlencoding::encode(&self.org),
            urlencoding::encode(name)
        ))
    }

    /// Non-archived repositories of the organization, following pagination
    /// until a short page. Later calls reuse the first successful listing.
    fn active_repositories(&self) -> Result<Vec<EntityId>, RemoteError> {
        if let Some(cached) = self.listing.get() {
            tracing::debug!(org = %self.org, count = cached.len(), "reusing repository listing");
            return Ok(cached.clone());
        }

        let unavailable = |reason: String| RemoteError::Unavailable { reason };
        let path = format!("/orgs/{}/repos", urlencoding::encode(&self.org));
        let mut names = Vec::new();
        let mut page = 1usize;
        loop {
            let response = self
                .request("GET", &path)
                .query("per_page", &PAGE_SIZE.to_string())
                .query("page", &page.to_string())
                .call()
                .map_err(|e| unavailable(describe(e)))?;
            let repos: Vec<RepositoryPayload> = response
                .into_json()
                .map_err(|e| unavailable(format!("invalid repository page {page}: {e}")))?;
            let fetched = repos.len();
            names.extend(
                repos
                    .into_iter()
                    .filter(|r| !r.archived)
                    .map(|r| EntityId::from(r.name)),
            );
            if fetched < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        tracing::debug!(org = %self.org, pages = page, count = names.len(), "listed repositories");
        let _ = self.listing.set(names.clone());
        Ok(names)
    }
}

impl RemoteStateClient for GithubClient {
    fn list_entities(&self) -> Result<Vec<EntityId>, RemoteError> {
        self.active_repositories()
    }

    fn get_value(
        &self,
        entity: &EntityId,
        property: &PropertyName,
    ) -> Result<Option<String>, RemoteError> {
        let read_err = |reason: String| RemoteError::EntityRead {
            entity: entity.clone(),
            property: property.clone(),
            reason,
        };
        let path = self.repo_path(entity, "properties/values").map_err(read_err)?;
        let values: Vec<PropertyValuePayload> = self
            .request("GET", &path)
            .call()
            .map_err(|e| read_err(describe(e)))?
            .into_json()
            .map_err(|e| read_err(format!("invalid response: {e}")))?;
        select_value(values, property).map_err(read_err)
    }

    fn set_value(
        &self,
        entity: &EntityId,
        property: &PropertyName,
        value: Option<&str>,
    ) -> Result<(), RemoteError> {
        let write_err = |reason: String| RemoteError::EntityWrite {
            entity: entity.clone(),
            property: property.clone(),
            reason,
        };
        let path = self.repo_path(entity, "properties/values").map_err(write_err)?;
        self.request("PATCH", &path)
            .send_json(json!({
                "properties": [{ "property_name": property.0, "value": value }]
            }))
            .map_err(|e| write_err(describe(e)))?;
        Ok(())
    }
}

impl TeamDirectory for GithubClient {
    fn repositories(&self) -> Result<Vec<EntityId>, RemoteError> {
        self.active_repositories()
    }

    fn first_team(&self, entity: &EntityId) -> Result<Option<String>, RemoteError> {
        let read_err = |reason: String| RemoteError::EntityRead {
            entity: entity.clone(),
            property: PropertyName::from("team_owner"),
            reason,
        };
        let path = self.repo_path(entity, "teams").map_err(read_err)?;
        let teams: Vec<TeamPayload> = self
            .request("GET", &path)
            .query("per_page", "10")
            .call()
            .map_err(|e| read_err(describe(e)))?
            .into_json()
            .map_err(|e| read_err(format!("invalid response: {e}")))?;
        Ok(teams.into_iter().next().map(|t| t.slug))
    }
}

/// Pick `property` out of a custom-properties response.
///
/// A missing entry and an explicit `null` both mean "unset".
fn select_value(
    values: Vec<PropertyValuePayload>,
    property: &PropertyName,
) -> Result<Option<String>, String> {
    let Some(entry) = values.into_iter().find(|v| v.property_name == property.0) else {
        return Ok(None);
    };
    match entry.value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Err(format!("unsupported value type for {property}: {other}")),
    }
}

/// Flatten a ureq error into one line; status errors keep the API's message.
fn describe(err: ureq::Error) -> String {
    match err {
        ureq::Error::Status(code, response) => {
            let status_text = response.status_text().to_string();
            let message = response
                .into_json::<Value>()
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned));
            match message {
                Some(message) => format!("HTTP {code} {status_text}: {message}"),
                None => format!("HTTP {code} {status_text}"),
            }
        }
        ureq::Error::Transport(transport) => transport.to_string(),
    }
}
