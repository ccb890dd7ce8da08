//! etcd-backed coordination store
//!
//! Leases map onto etcd lease grants; lock acquisition is a transaction that
//! writes the key only when its create revision is zero. Watches are pumped
//! into unbounded channels by a background task per subscription.

use crate::{
    ConfigEntry, CoordinationResult, CoordinationStore, CoordinationStoreError, WatchEvent,
};
use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, EventType, GetOptions, PutOptions, Txn, TxnOp, WatchOptions,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Coordination store backed by an etcd cluster
pub struct EtcdCoordinationStore {
    client: Client,
}

impl EtcdCoordinationStore {
    /// Connect to the given endpoints.
    pub async fn connect(endpoints: &[String]) -> CoordinationResult<Self> {
        info!("🔄 Connecting to coordination store at {:?}", endpoints);
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|e| CoordinationStoreError::unavailable(format!("etcd connect failed: {e}")))?;
        info!("✅ Connected to coordination store");
        Ok(Self { client })
    }

    fn map_err(err: etcd_client::Error) -> CoordinationStoreError {
        CoordinationStoreError::unavailable(err.to_string())
    }

    async fn grant_lease(&self, ttl: Duration) -> CoordinationResult<i64> {
        let mut client = self.client.clone();
        let ttl_secs = ttl.as_secs().max(1) as i64;
        let lease = client.lease_grant(ttl_secs, None).await.map_err(Self::map_err)?;
        Ok(lease.id())
    }
}

#[async_trait]
impl CoordinationStore for EtcdCoordinationStore {
    async fn acquire_lease(&self, key: &str, ttl: Duration) -> CoordinationResult<bool> {
        let lease_id = self.grant_lease(ttl).await?;
        let mut client = self.client.clone();

        let txn = Txn::new()
            .when(vec![Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(
                key,
                "locked",
                Some(PutOptions::new().with_lease(lease_id)),
            )]);

        let resp = client.txn(txn).await.map_err(Self::map_err)?;
        if resp.succeeded() {
            debug!("🔒 Acquired lease {} (ttl {:?})", key, ttl);
        } else {
            debug!("🔒 Lease {} is already held", key);
        }
        Ok(resp.succeeded())
    }

    async fn release_lease(&self, key: &str) -> CoordinationResult<()> {
        let mut client = self.client.clone();
        client.delete(key, None).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn put_with_lease(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> CoordinationResult<()> {
        let lease_id = self.grant_lease(ttl).await?;
        let mut client = self.client.clone();
        client
            .put(key, value, Some(PutOptions::new().with_lease(lease_id)))
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn put(&self, key: &str, value: &str) -> CoordinationResult<()> {
        let mut client = self.client.clone();
        client.put(key, value, None).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> CoordinationResult<Option<ConfigEntry>> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await.map_err(Self::map_err)?;
        let Some(kv) = resp.kvs().first() else {
            return Ok(None);
        };
        Ok(Some(ConfigEntry {
            key: kv.key_str().map_err(Self::map_err)?.to_string(),
            value: kv.value_str().map_err(Self::map_err)?.to_string(),
            version: kv.version(),
        }))
    }

    async fn delete(&self, key: &str) -> CoordinationResult<()> {
        let mut client = self.client.clone();
        client.delete(key, None).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> CoordinationResult<Vec<(String, String)>> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(Self::map_err)?;

        let mut entries = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            entries.push((
                kv.key_str().map_err(Self::map_err)?.to_string(),
                kv.value_str().map_err(Self::map_err)?.to_string(),
            ));
        }
        Ok(entries)
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
    ) -> CoordinationResult<mpsc::UnboundedReceiver<WatchEvent>> {
        let mut client = self.client.clone();
        let (watcher, mut stream) = client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(|e| CoordinationStoreError::watch(prefix, e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let prefix = prefix.to_string();
        tokio::spawn(async move {
            // The watcher handle must stay alive for the stream's lifetime.
            let _watcher = watcher;
            loop {
                let resp = match stream.message().await {
                    Ok(Some(resp)) => resp,
                    Ok(None) => {
                        warn!("Watch stream for {} ended", prefix);
                        return;
                    }
                    Err(e) => {
                        warn!("Watch stream for {} failed: {}", prefix, e);
                        return;
                    }
                };
                for event in resp.events() {
                    let Some(kv) = event.kv() else { continue };
                    let key = match kv.key_str() {
                        Ok(key) => key.to_string(),
                        Err(e) => {
                            warn!("Skipping watch event with non-utf8 key: {}", e);
                            continue;
                        }
                    };
                    let watch_event = match event.event_type() {
                        EventType::Put => WatchEvent::Put {
                            key,
                            value: kv.value_str().unwrap_or_default().to_string(),
                        },
                        EventType::Delete => WatchEvent::Delete { key },
                    };
                    if tx.send(watch_event).is_err() {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}
