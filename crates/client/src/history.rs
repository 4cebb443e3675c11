// Relay history client: fetches one conversation page over HTTP so a client
// that lost its connection can merge what it missed.

use anyhow::{anyhow, Context, Result};
use murmur_common::types::{ChatMessage, HistoryPage};
use url::Url;

/// Messages requested per conversation on resync.
pub const RESYNC_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct HistoryClient {
    http: reqwest::Client,
    base: Url,
}

impl HistoryClient {
    /// Derive the relay's HTTP base from its WebSocket endpoint: `ws` maps
    /// to `http`, `wss` to `https`. Path and query are dropped.
    pub fn from_endpoint(endpoint: &str) -> Result<Self> {
        let mut base =
            Url::parse(endpoint).with_context(|| format!("invalid server_url `{endpoint}`"))?;
        let scheme = match base.scheme() {
            "ws" | "http" => "http",
            "wss" | "https" => "https",
            other => return Err(anyhow!("unsupported server_url scheme `{other}`")),
        };
        base.set_scheme(scheme)
            .map_err(|()| anyhow!("cannot map `{endpoint}` to an http url"))?;
        base.set_path("/");
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self { http: reqwest::Client::new(), base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// `GET /v1/users/{me}/conversations/{other}/messages?limit=`.
    pub fn history_url(&self, me: &str, other: &str, limit: usize) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("relay url `{}` cannot carry a path", self.base))?
            .clear()
            .extend(["v1", "users", me, "conversations", other, "messages"]);
        url.query_pairs_mut().append_pair("limit", &limit.to_string());
        Ok(url)
    }

    /// Latest messages between `me` and `other`, oldest first.
    pub async fn fetch(&self, me: &str, other: &str) -> Result<Vec<ChatMessage>> {
        let url = self.history_url(me, other, RESYNC_PAGE_SIZE)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("history request for {me}/{other} failed"))?;
        let page: HistoryPage = response
            .error_for_status()
            .context("relay rejected history request")?
            .json()
            .await
            .context("history response was not a message page")?;
        Ok(page.messages)
    }
}
