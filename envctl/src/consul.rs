//! Optional key-value sink for inference metadata, Consul-shaped.

use anyhow::{Context, Result};
use inference::InferenceOutcome;
use reqwest::Client;
use tracing::info;

pub struct ConsulSink {
    client: Client,
    base: String,
    prefix: String,
}

impl ConsulSink {
    pub fn new(addr: &str, prefix: &str) -> Self {
        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", addr.trim_end_matches('/'))
        };
        Self {
            client: Client::new(),
            base,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/v1/kv/{}/{}", self.base, self.prefix, key)
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        self.client
            .put(self.key_url(key))
            .body(body)
            .send()
            .await
            .with_context(|| format!("consul put failed for key {}", key))?
            .error_for_status()
            .with_context(|| format!("consul rejected key {}", key))?;
        Ok(())
    }

    /// Write the timestamped inference metadata and every starting
    /// environment under the configured prefix.
    pub async fn publish(&self, outcome: &InferenceOutcome) -> Result<()> {
        let stamp = outcome.started_at.format("%Y%m%dT%H%M%SZ");
        let metadata_key = format!("inference/{}", stamp);
        self.put(&metadata_key, serde_json::to_vec(outcome)?).await?;

        for env in &outcome.starting_environments {
            let env_key = format!("environments/{}/{}", stamp, env.id);
            self.put(&env_key, serde_json::to_vec(env)?).await?;
        }

        info!(prefix = %self.prefix, "published inference metadata to consul");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_get_a_scheme_when_missing() {
        let sink = ConsulSink::new("consul.local:8500", "envctl");
        assert_eq!(
            sink.key_url("inference/x"),
            "http://consul.local:8500/v1/kv/envctl/inference/x"
        );

        let sink = ConsulSink::new("https://consul.local:8500/", "team/envctl/");
        assert_eq!(
            sink.key_url("inference/x"),
            "https://consul.local:8500/v1/kv/team/envctl/inference/x"
        );
    }
}
