//! Microsoft Graph mail client
//!
//! Thin REST wrapper used by `sync`. Pagination links returned by the API are
//! only followed when they point back at the configured API origin, so a
//! bearer token is never sent to another host.

use crate::config::GraphConfig;
use crate::error::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Fields requested for every message
pub const MESSAGE_SELECT: &str = "id,subject,bodyPreview,webLink,receivedDateTime,from,parentFolderId";

const FOLDER_SELECT: &str = "id,displayName,parentFolderId,childFolderCount,totalItemCount";

/// A mail folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailFolder {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub parent_folder_id: Option<String>,
    #[serde(default)]
    pub child_folder_count: Option<i64>,
    #[serde(default)]
    pub total_item_count: Option<i64>,
}

/// One page of messages; raw values go straight to the normalizer
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePage {
    #[serde(default)]
    pub value: Vec<Value>,
    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FolderPage {
    #[serde(default)]
    value: Vec<MailFolder>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

/// Graph API client
pub struct GraphClient {
    client: Client,
    base_url: Url,
    page_size: u32,
}

impl GraphClient {
    /// Create a new client
    pub fn new(config: &GraphConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        // Trailing slash so joins keep the version segment
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');

        Ok(Self {
            client,
            base_url: Url::parse(&base)?,
            page_size: config.page_size,
        })
    }

    /// API url under the base; each segment is percent-encoded on its own
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                Error::Config(format!("Graph base URL cannot hold a path: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Reject pagination links that leave the API origin
    pub fn validate_next_link(&self, link: &str) -> Result<Url> {
        let url = Url::parse(link).map_err(|_| Error::UntrustedNextLink(link.to_string()))?;
        let same_origin = url.scheme() == self.base_url.scheme()
            && url.host_str() == self.base_url.host_str()
            && url.port_or_known_default() == self.base_url.port_or_known_default();

        if !same_origin {
            return Err(Error::UntrustedNextLink(link.to_string()));
        }
        Ok(url)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, token: &str, url: Url) -> Result<T> {
        debug!(url = %url, "Graph request");
        let response = self.client.get(url.clone()).bearer_auth(token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Graph(format!(
                "GET {} returned {}: {}",
                url.path(),
                status,
                body.trim()
            )));
        }

        Ok(response.json::<T>().await?)
    }

    /// List mail folders (follows pagination)
    pub async fn list_folders(&self, token: &str) -> Result<Vec<MailFolder>> {
        let mut url = self.endpoint(&["me", "mailFolders"])?;
        url.query_pairs_mut()
            .append_pair("$top", "200")
            .append_pair("$select", FOLDER_SELECT);

        let mut folders = Vec::new();
        loop {
            let page: FolderPage = self.get_json(token, url).await?;
            folders.extend(page.value);
            match page.next_link {
                Some(link) => url = self.validate_next_link(&link)?,
                None => break,
            }
        }
        Ok(folders)
    }

    /// Newest messages of a folder, one page
    pub async fn list_messages(&self, token: &str, folder_id: &str, top: u32) -> Result<MessagePage> {
        let mut url = self.endpoint(&["me", "mailFolders", folder_id, "messages"])?;
        url.query_pairs_mut()
            .append_pair("$top", &top.to_string())
            .append_pair("$select", MESSAGE_SELECT)
            .append_pair("$orderby", "receivedDateTime desc");

        self.get_json(token, url).await
    }

    /// Follow a next link from a previous page
    pub async fn next_page(&self, token: &str, next_link: &str) -> Result<MessagePage> {
        let url = self.validate_next_link(next_link)?;
        self.get_json(token, url).await
    }

    /// Up to `limit` newest messages of a folder, following pagination
    pub async fn list_all_messages(
        &self,
        token: &str,
        folder_id: &str,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let top = self.page_size.min(limit.max(1) as u32);
        let mut page = self.list_messages(token, folder_id, top).await?;
        let mut messages = Vec::new();

        loop {
            messages.extend(page.value);
            if messages.len() >= limit {
                messages.truncate(limit);
                break;
            }
            match page.next_link {
                Some(link) => page = self.next_page(token, &link).await?,
                None => break,
            }
        }

        info!(folder_id, count = messages.len(), "Fetched messages");
        Ok(messages)
    }

    /// Fetch specific messages by id, in the given order
    pub async fn get_messages_by_ids(&self, token: &str, ids: &[String]) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let mut url = self.endpoint(&["me", "messages", id.as_str()])?;
            url.query_pairs_mut().append_pair("$select", MESSAGE_SELECT);
            out.push(self.get_json(token, url).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> GraphClient {
        GraphClient::new(&GraphConfig {
            base_url: format!("{}/v1.0", base),
            token_env: "UNUSED".to_string(),
            page_size: 2,
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_messages_sends_query_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/mailFolders/inbox/messages"))
            .and(query_param("$top", "5"))
            .and(query_param("$orderby", "receivedDateTime desc"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"value": [{"id": "m1"}]})),
            )
            .mount(&server)
            .await;

        let page = client(&server.uri())
            .list_messages("tok", "inbox", 5)
            .await
            .unwrap();
        assert_eq!(page.value.len(), 1);
        assert!(page.next_link.is_none());
    }

    #[tokio::test]
    async fn test_list_all_messages_follows_same_origin_links() {
        let server = MockServer::start().await;
        let next = format!("{}/v1.0/me/mailFolders/inbox/messages?$skip=2", server.uri());
        Mock::given(method("GET"))
            .and(path("/v1.0/me/mailFolders/inbox/messages"))
            .and(query_param("$skip", "2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"value": [{"id": "m3"}]})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/mailFolders/inbox/messages"))
            .and(query_param("$top", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "m1"}, {"id": "m2"}],
                "@odata.nextLink": next
            })))
            .mount(&server)
            .await;

        let messages = client(&server.uri())
            .list_all_messages("tok", "inbox", 10)
            .await
            .unwrap();
        let ids: Vec<_> = messages.iter().map(|m| m["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_foreign_next_link_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/mailFolders/inbox/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "m1"}, {"id": "m2"}],
                "@odata.nextLink": "https://attacker.example/steal?$skip=2"
            })))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .list_all_messages("tok", "inbox", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UntrustedNextLink(_)));
    }

    #[test]
    fn test_validate_next_link_checks_port_and_scheme() {
        let c = client("http://127.0.0.1:8080");
        assert!(c.validate_next_link("http://127.0.0.1:8080/v1.0/x").is_ok());
        assert!(c.validate_next_link("http://127.0.0.1:9090/v1.0/x").is_err());
        assert!(c.validate_next_link("https://127.0.0.1:8080/v1.0/x").is_err());
        assert!(c.validate_next_link("not a url").is_err());
    }

    #[tokio::test]
    async fn test_http_failure_maps_to_graph_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/messages/m1"))
            .respond_with(ResponseTemplate::new(401).set_body_string("InvalidAuthenticationToken"))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .get_messages_by_ids("bad", &["m1".to_string()])
            .await
            .unwrap_err();
        match err {
            Error::Graph(msg) => assert!(msg.contains("401")),
            other => panic!("expected graph error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ids_are_encoded_as_single_path_segments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/messages/a%2Fb%3Fc%23d"))
            .and(query_param("$select", MESSAGE_SELECT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "a/b?c#d"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/mailFolders/x%2Fy/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&server.uri());
        let messages = c
            .get_messages_by_ids("tok", &["a/b?c#d".to_string()])
            .await
            .unwrap();
        assert_eq!(messages[0]["id"], "a/b?c#d");

        let page = c.list_messages("tok", "x/y", 5).await.unwrap();
        assert!(page.value.is_empty());
    }

    #[tokio::test]
    async fn test_list_folders() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/mailFolders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "f1", "displayName": "Inbox", "totalItemCount": 12}]
            })))
            .mount(&server)
            .await;

        let folders = client(&server.uri()).list_folders("tok").await.unwrap();
        assert_eq!(folders[0].display_name, "Inbox");
        assert_eq!(folders[0].total_item_count, Some(12));
    }
}
