//! Source repository client (spec §4.1).
//!
//! Talks to the system the content lake is ingesting *from*: lists folder
//! children, streams node content to a temp file, and resolves the
//! read-authorities/group membership needed to build ACLs. Every call uses
//! HTTP Basic from `source.security.basicAuth` (spec §3 of `SPEC_FULL.md`);
//! the spec's own ticket auth only applies to inbound calls to this system's
//! API, not outbound calls this client makes.

use std::collections::HashSet;
use std::io::Write as _;
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;

use crate::config::SourceConnectionConfig;
use crate::error::{LakebridgeError, Result};
use crate::models::SourceDocument;

const PAGE_SIZE: u32 = 100;
const GROUP_PAGE_SIZE: u32 = 1000;

/// Roles whose ACEs count as read-grants when extracting authorities
/// (spec §4.1/§4.5).
const READ_ROLES: &[&str] = &["Consumer", "Contributor", "Collaborator", "Coordinator", "Manager"];

pub struct SourceClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    repository_id: Mutex<Option<String>>,
}

impl SourceClient {
    pub fn new(config: &SourceConnectionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.security.basic_auth.username.clone(),
            password: config.security.basic_auth.password.clone(),
            repository_id: Mutex::new(None),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(&self.password))
    }

    /// Returns the repository id, fetching and caching it on first use.
    pub async fn repository_id(&self) -> Result<String> {
        {
            let cached = self.repository_id.lock().unwrap();
            if let Some(id) = cached.as_ref() {
                return Ok(id.clone());
            }
        }

        let resp: RepositoryInfoResponse = self
            .request(reqwest::Method::GET, "/api/repository")
            .send()
            .await
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?
            .error_for_status()
            .map_err(map_status_error)?
            .json()
            .await
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;

        let mut cached = self.repository_id.lock().unwrap();
        if cached.is_none() {
            *cached = Some(resp.id.clone());
        }
        Ok(cached.clone().unwrap())
    }

    /// Lists one page of children of `folder_id`.
    pub async fn list_children(&self, folder_id: &str, skip: u32) -> Result<Page<SourceDocument>> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/api/nodes/{folder_id}/children"))
            .query(&[("skipCount", skip.to_string()), ("maxItems", PAGE_SIZE.to_string())])
            .send()
            .await
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?
            .error_for_status()
            .map_err(map_status_error)?
            .json::<ChildrenResponse>()
            .await
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;

        Ok(Page {
            items: resp.entries.into_iter().map(|e| e.entry).collect(),
            has_more: !resp.pagination.has_more_items.is_none_or(|v| !v),
        })
    }

    /// Exchanges HTTP Basic credentials for a source-repository ticket
    /// (spec §4.12). Used both for validating inbound Basic auth and, via
    /// the same credentials this client authenticates its own calls with,
    /// is not needed for outbound requests — those always use Basic
    /// directly.
    pub async fn issue_ticket(&self, username: &str, password: &str) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/api/login/tickets", self.base_url))
            .basic_auth(username, Some(password))
            .send()
            .await
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;

        if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 {
            return Err(LakebridgeError::AuthenticationFailed(format!(
                "invalid credentials for user {username}"
            )));
        }
        if !resp.status().is_success() {
            return Err(LakebridgeError::TransientBackend(format!(
                "ticket issuance failed: {}",
                resp.status()
            )));
        }

        let body: TicketResponse = resp
            .json()
            .await
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;
        Ok(body.id)
    }

    /// Lists every child of `folder_id`, paging until exhausted.
    pub async fn list_all_children(&self, folder_id: &str) -> Result<Vec<SourceDocument>> {
        let mut out = Vec::new();
        let mut skip = 0;
        loop {
            let page = self.list_children(folder_id, skip).await?;
            let got = page.items.len() as u32;
            out.extend(page.items);
            if !page.has_more || got == 0 {
                break;
            }
            skip += got;
        }
        Ok(out)
    }

    /// Streams a node's content to a fresh temp file and returns its path.
    pub async fn download_to_temp(&self, node_id: &str, file_name: &str) -> Result<tempfile::TempPath> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/api/nodes/{node_id}/content"))
            .send()
            .await
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?
            .error_for_status()
            .map_err(map_status_error)?;

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;

        let prefix = format!("source-node-{node_id}-{}", sanitize_file_name(file_name));
        let mut tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .tempfile()
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;
        tmp.write_all(&bytes)
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;
        Ok(tmp.into_temp_path())
    }

    /// Resolves the set of principal ids granted read access to `node_id`.
    /// Locally-set ACEs always count; inherited ACEs count only if
    /// inheritance is enabled on the node (spec §4.1). Filtered to
    /// `ALLOWED` status and a read-capable role.
    pub async fn extract_read_authorities(&self, node_id: &str) -> Result<HashSet<String>> {
        let resp: PermissionsResponse = self
            .request(reqwest::Method::GET, &format!("/api/nodes/{node_id}"))
            .query(&[("include", "permissions")])
            .send()
            .await
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?
            .error_for_status()
            .map_err(map_status_error)?
            .json()
            .await
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;

        let perms = resp.entry.permissions;
        let mut aces = perms.locally_set;
        if perms.is_inheritance_enabled {
            aces.extend(perms.inherited);
        }

        let mut authorities = HashSet::new();
        for ace in aces {
            if ace.access_status == "ALLOWED" && READ_ROLES.contains(&ace.name.as_str()) {
                authorities.insert(ace.authority_id);
            }
        }
        Ok(authorities)
    }

    /// Validates a ticket against `people/-me-` and returns the resolved
    /// username from `entry.id` (spec §4.12).
    pub async fn validate_ticket(&self, ticket: &str) -> Result<String> {
        let resp = self
            .client
            .get(format!("{}/api/people/-me-", self.base_url))
            .query(&[("alf_ticket", ticket)])
            .send()
            .await
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?
            .error_for_status()
            .map_err(map_status_error)?;

        let body: PersonResponse = resp
            .json()
            .await
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;
        Ok(body.entry.id)
    }

    /// Lists every group the given authority belongs to.
    pub async fn list_groups(&self, authority_id: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut skip = 0;
        loop {
            let resp: GroupsResponse = self
                .request(reqwest::Method::GET, &format!("/api/people/{authority_id}/groups"))
                .query(&[("skipCount", skip.to_string()), ("maxItems", GROUP_PAGE_SIZE.to_string())])
                .send()
                .await
                .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?
                .error_for_status()
                .map_err(map_status_error)?
                .json()
                .await
                .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;

            let got = resp.list.entries.len() as u32;
            out.extend(resp.list.entries.into_iter().map(|e| e.entry.id));
            if !resp.list.pagination.has_more_items.unwrap_or(false) || got == 0 {
                break;
            }
            skip += got;
        }
        Ok(out)
    }
}

pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

/// Collapses runs of path separators and control characters into a single
/// `_` each, and truncates to keep the overall temp file name within
/// filesystem limits.
fn sanitize_file_name(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    let mut last_was_invalid = false;
    for c in name.chars() {
        if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
            cleaned.push(c);
            last_was_invalid = false;
        } else if !last_was_invalid {
            cleaned.push('_');
            last_was_invalid = true;
        }
    }
    if cleaned.is_empty() {
        "content.bin".to_string()
    } else {
        cleaned.chars().take(120).collect()
    }
}

fn map_status_error(e: reqwest::Error) -> LakebridgeError {
    match e.status() {
        Some(s) if s.as_u16() == 401 || s.as_u16() == 403 => {
            LakebridgeError::AuthenticationFailed(e.to_string())
        }
        Some(s) if s.as_u16() == 404 => LakebridgeError::NotFound(e.to_string()),
        _ => LakebridgeError::TransientBackend(e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct RepositoryInfoResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TicketResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PersonResponse {
    entry: PersonEntry,
}

#[derive(Debug, Deserialize)]
struct PersonEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChildrenResponse {
    entries: Vec<Entry<SourceDocument>>,
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct Entry<T> {
    entry: T,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(rename = "hasMoreItems")]
    has_more_items: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct PermissionsResponse {
    entry: PermissionsEntry,
}

#[derive(Debug, Deserialize)]
struct PermissionsEntry {
    permissions: Permissions,
}

#[derive(Debug, Deserialize)]
struct Permissions {
    #[serde(rename = "isInheritanceEnabled", default)]
    is_inheritance_enabled: bool,
    inherited: Vec<Ace>,
    #[serde(rename = "locallySet")]
    locally_set: Vec<Ace>,
}

#[derive(Debug, Deserialize)]
struct Ace {
    #[serde(rename = "authorityId")]
    authority_id: String,
    name: String,
    #[serde(rename = "accessStatus")]
    access_status: String,
}

#[derive(Debug, Deserialize)]
struct GroupsResponse {
    list: GroupList,
}

#[derive(Debug, Deserialize)]
struct GroupList {
    entries: Vec<Entry<GroupEntry>>,
    pagination: GroupPagination,
}

#[derive(Debug, Deserialize)]
struct GroupEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GroupPagination {
    #[serde(rename = "hasMoreItems")]
    has_more_items: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_file_name_replaces_path_separators() {
        assert_eq!(sanitize_file_name("a/b\\c.txt"), "a_b_c.txt");
    }

    #[test]
    fn sanitize_file_name_falls_back_when_empty_after_cleaning() {
        assert_eq!(sanitize_file_name("///"), "_");
    }

    #[test]
    fn sanitize_file_name_truncates_long_names() {
        let long = "a".repeat(500);
        assert_eq!(sanitize_file_name(&long).chars().count(), 120);
    }
}
