//! A thin RPC client shared by `export` and `import`: POSTs `[method,
//! arg1, …]` to `/rpc` with the namespace's bearer token (spec §6).

use anyhow::{bail, Result};
use serde_json::Value;

pub struct RpcClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RpcClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        RpcClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let mut request = vec![Value::String(method.to_string())];
        request.extend(args);

        let response = self
            .http
            .post(format!("{}/rpc", self.base_url))
            .bearer_auth(&self.token)
            .json(&Value::Array(request))
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            bail!("{method} failed ({status}): {body}");
        }
        Ok(body)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }
}
