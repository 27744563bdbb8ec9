use super::{ActionSink, IntakeError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Keeps payloads in process; used by tests and local runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ActionSink for MemorySink {
    async fn put(&self, key: &str, body: &[u8]) -> Result<(), IntakeError> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), body.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_overwrites_same_key() -> anyhow::Result<()> {
        let sink = MemorySink::new();
        sink.put("a", b"[1]").await?;
        sink.put("a", b"[2]").await?;
        sink.put("b", b"{}").await?;

        assert_eq!(sink.get("a").await, Some(b"[2]".to_vec()));
        assert_eq!(sink.keys().await, vec!["a".to_string(), "b".to_string()]);
        Ok(())
    }
}
