//! REST-over-HTTP KV store: Upstash Redis REST API, bearer auth, a
//! `{"result": T}` response envelope, plus the set/hash operations spec §6
//! requires beyond plain get/set_ex/incr.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Config;

use super::{Store, StoreError, WriteOp};

#[derive(Deserialize)]
struct UpstashResp<T> {
    result: T,
}

/// A REST-backed KV store talking to an Upstash-shaped endpoint.
#[derive(Clone)]
pub struct HttpKvStore {
    url: String,
    token: String,
    http: reqwest::Client,
}

impl HttpKvStore {
    /// `timeout_ms` wires `Config::store_timeout_ms` (spec §6 "5s default
    /// timeout") into the underlying `reqwest::Client`.
    #[must_use]
    pub fn new(url: impl Into<String>, token: impl Into<String>, timeout_ms: u64) -> Self {
        let mut url = url.into();
        if url.ends_with('/') {
            url.pop();
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { url, token: token.into(), http }
    }

    /// Read `TINYSIG_STORE_URL` / `TINYSIG_STORE_TOKEN` (this crate's
    /// namespaced equivalent of `UPSTASH_REDIS_REST_URL` /
    /// `UPSTASH_REDIS_REST_TOKEN`), plus `store_timeout_ms` from
    /// [`Config::from_env`].
    pub fn from_env() -> anyhow::Result<Self> {
        let url = std::env::var("TINYSIG_STORE_URL")?;
        let token = std::env::var("TINYSIG_STORE_TOKEN")?;
        let timeout_ms = Config::from_env().store_timeout_ms;
        Ok(Self::new(url, token, timeout_ms))
    }

    #[inline]
    fn auth(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        rb.header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
    }

    async fn call(&self, path: String) -> Result<String, StoreError> {
        let url = format!("{}/{}", self.url, path);
        let res = self.auth(self.http.post(&url)).send().await.map_err(Self::transport_err)?;
        let status = res.status();
        let text = res.text().await.map_err(Self::transport_err)?;
        if !status.is_success() {
            return Err(StoreError::Unavailable(format!("{path} -> {status} {text}")));
        }
        Ok(text)
    }

    fn transport_err(e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout(e.to_string())
        } else {
            StoreError::Unavailable(e.to_string())
        }
    }

    fn encode_arg(raw: &str) -> String {
        raw.replace('\\', "\\\\").replace('"', "\\\"")
    }
}

#[async_trait]
impl Store for HttpKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let text = self.call(format!("get/{key}")).await?;
        let parsed: UpstashResp<Option<serde_json::Value>> =
            serde_json::from_str(&text).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(match parsed.result {
            None => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        })
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let body = Self::encode_arg(value);
        self.call(format!("set/{key}/{body}")).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.call(format!("del/{key}")).await?;
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let body = Self::encode_arg(member);
        self.call(format!("sadd/{key}/{body}")).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let body = Self::encode_arg(member);
        self.call(format!("srem/{key}/{body}")).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let text = self.call(format!("smembers/{key}")).await?;
        let parsed: UpstashResp<Vec<String>> =
            serde_json::from_str(&text).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(parsed.result)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let text = self.call(format!("hget/{key}/{field}")).await?;
        let parsed: UpstashResp<Option<String>> =
            serde_json::from_str(&text).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(parsed.result)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let body = Self::encode_arg(value);
        self.call(format!("hset/{key}/{field}/{body}")).await?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        let text = self.call(format!("hgetall/{key}")).await?;
        let parsed: UpstashResp<Vec<String>> =
            serde_json::from_str(&text).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(parsed
            .result
            .chunks(2)
            .filter(|pair| pair.len() == 2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect())
    }

    async fn apply_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        // Upstash's pipeline endpoint accepts an array of command arrays;
        // build the same shape the single-command helpers above target.
        let commands: Vec<Vec<String>> = ops
            .into_iter()
            .map(|op| match op {
                WriteOp::Set { key, value } => vec!["SET".into(), key, value],
                WriteOp::Delete { key } => vec!["DEL".into(), key],
                WriteOp::SetAdd { key, member } => vec!["SADD".into(), key, member],
                WriteOp::SetRemove { key, member } => vec!["SREM".into(), key, member],
            })
            .collect();
        let body = serde_json::to_string(&commands)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let url = format!("{}/pipeline", self.url);
        let res = self
            .auth(self.http.post(&url))
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(StoreError::Unavailable(format!("pipeline -> {status} {text}")));
        }
        Ok(())
    }
}
