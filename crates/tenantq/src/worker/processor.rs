use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

/// The pluggable unit of work. Delivery is at-least-once: lease expiry
/// can hand the same payload to a second worker, so implementations must
/// be idempotent.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, payload: &Value) -> anyhow::Result<Value>;
}

/// Default processor: simulates work, and fails on demand when the
/// payload carries `{"error": true}` so failure paths can be exercised
/// end to end.
pub struct SimulatedProcessor {
    pub delay: Duration,
}

impl SimulatedProcessor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for SimulatedProcessor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl JobProcessor for SimulatedProcessor {
    async fn process(&self, payload: &Value) -> anyhow::Result<Value> {
        tokio::time::sleep(self.delay).await;

        if payload.get("error").and_then(Value::as_bool) == Some(true) {
            let message = payload
                .get("error_message")
                .and_then(Value::as_str)
                .unwrap_or("job processing failed");
            anyhow::bail!("{message}");
        }

        Ok(json!({"result": "success", "processed": payload}))
    }
}
