use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde_json::Value;

use crate::config::CollectConfig;
use crate::error::FetchError;

static CLIENT: OnceCell<Client> = OnceCell::new();

/// Process-wide blocking client. The first caller's timeout and user agent win;
/// every source in a run shares one `CollectConfig`.
pub fn http_client(cfg: &CollectConfig) -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .user_agent(cfg.user_agent.clone())
            .build()
            .context("failed to build http client")
    })
}

/// One GET, classified into transient and permanent failures.
pub fn get_json(client: &Client, url: &str) -> Result<Value, FetchError> {
    let resp = client
        .get(url)
        .header(ACCEPT, "application/json")
        .send()?;
    let status = resp.status();
    let body = resp.text()?;
    if !status.is_success() {
        return Err(FetchError::from_status(status.as_u16(), &body));
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(FetchError::Permanent(format!("empty body from {url}")));
    }
    serde_json::from_str::<Value>(trimmed)
        .map_err(|e| FetchError::Permanent(format!("invalid json from {url}: {e}")))
}
