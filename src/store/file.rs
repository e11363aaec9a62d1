use super::{ExtractionStore, RateEntry, RateKey, RateStore, StoreLifecycle};
use crate::error::StoreError;
use crate::models::{ExtractedReceipt, Fingerprint};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// JSON 文件缓存; 读写走 DashMap, 每次写入整体落盘
pub struct FileStore<V> {
    entries: DashMap<String, V>,
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl<V> FileStore<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// 纯内存 (测试用)
    pub fn in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// 打开缓存文件; 文件损坏时记录警告并从空缓存开始
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let entries = DashMap::new();
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, V>>(&bytes) {
                Ok(loaded) => {
                    tracing::info!("Loaded {} cached entries from {}", loaded.len(), path.display());
                    for (key, value) in loaded {
                        entries.insert(key, value);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to load cache {}: {}, starting empty", path.display(), e);
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            entries,
            path: Some(path),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    async fn insert(&self, key: String, value: V) -> Result<(), StoreError> {
        self.entries.insert(key, value);
        self.persist().await
    }

    /// 写临时文件后 rename, 避免半写状态
    pub async fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        let snapshot: BTreeMap<String, V> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        tracing::debug!("Saved {} entries to {}", snapshot.len(), path.display());
        Ok(())
    }
}

#[async_trait]
impl<V> StoreLifecycle for FileStore<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn flush(&self) -> Result<(), StoreError> {
        self.persist().await
    }
}

#[async_trait]
impl ExtractionStore for FileStore<ExtractedReceipt> {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<ExtractedReceipt>, StoreError> {
        Ok(self.lookup(fingerprint.as_str()))
    }

    async fn put(&self, fingerprint: &Fingerprint, receipt: &ExtractedReceipt) -> Result<(), StoreError> {
        self.insert(fingerprint.as_str().to_string(), receipt.clone()).await
    }
}

#[async_trait]
impl RateStore for FileStore<RateEntry> {
    async fn get_rate(&self, key: &RateKey) -> Result<Option<RateEntry>, StoreError> {
        Ok(self.lookup(&key.cache_key()))
    }

    async fn put_rate(&self, key: &RateKey, entry: &RateEntry) -> Result<(), StoreError> {
        self.insert(key.cache_key(), entry.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentRef, SourceTag};
    use bigdecimal::BigDecimal;
    use chrono::{NaiveDate, Utc};
    use std::sync::Arc;

    fn receipt(bytes: &[u8]) -> (Fingerprint, ExtractedReceipt) {
        let fingerprint = Fingerprint::of(bytes);
        let receipt = ExtractedReceipt::new(
            "Shop",
            NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            BigDecimal::from(1200),
            "JPY",
            DocumentRef {
                fingerprint: fingerprint.clone(),
                source: SourceTag::new("gmail"),
                name: "a.pdf".to_string(),
            },
        );
        (fingerprint, receipt)
    }

    #[tokio::test]
    async fn extraction_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("receipt_extraction_cache.json");
        let (fingerprint, stored) = receipt(b"pdf-bytes");

        let store = FileStore::<ExtractedReceipt>::open(&path).await.unwrap();
        assert!(store.get(&fingerprint).await.unwrap().is_none());
        store.put(&fingerprint, &stored).await.unwrap();
        drop(store);

        let reopened = FileStore::<ExtractedReceipt>::open(&path).await.unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get(&fingerprint).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fx_rates.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = FileStore::<RateEntry>::open(&path).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn rate_keys_include_both_currencies_and_date() {
        let store = FileStore::<RateEntry>::in_memory();
        let date = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
        let entry = RateEntry {
            rate: BigDecimal::from(150),
            rate_date: date,
            fetched_at: Utc::now(),
        };
        store.put_rate(&RateKey::new("usd", "jpy", date), &entry).await.unwrap();

        assert_eq!(RateKey::new("usd", "jpy", date).cache_key(), "2026-02-10_USD_JPY");
        assert!(store.get_rate(&RateKey::new("USD", "JPY", date)).await.unwrap().is_some());
        assert!(store.get_rate(&RateKey::new("EUR", "JPY", date)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_puts_keep_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            FileStore::<ExtractedReceipt>::open(dir.path().join("cache.json"))
                .await
                .unwrap(),
        );

        let mut handles = Vec::new();
        for i in 0..16u8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let (fingerprint, r) = receipt(&[i; 8]);
                store.put(&fingerprint, &r).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let reopened = FileStore::<ExtractedReceipt>::open(dir.path().join("cache.json"))
            .await
            .unwrap();
        assert_eq!(reopened.len(), 16);
    }
}
