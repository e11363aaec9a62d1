use super::{fingerprint_all, ExtractionBatch, Extractor};
use crate::error::ExtractionError;
use crate::models::{DocumentRef, ExtractedReceipt, ExtractionFailure, Fingerprint, RawDocument};
use crate::store::ExtractionStore;
use indexmap::map::Entry;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// 并发抽取: 按指纹去重, 命中缓存直接返回, 未命中交给有界 worker 池
pub struct ExtractionOrchestrator {
    extractor: Arc<dyn Extractor>,
    store: Arc<dyn ExtractionStore>,
    max_workers: usize,
}

/// 同一指纹的物理文档: 首个为代表
struct DocumentGroup {
    representative: RawDocument,
    copies: usize,
}

impl ExtractionOrchestrator {
    pub fn new(extractor: Arc<dyn Extractor>, store: Arc<dyn ExtractionStore>, max_workers: usize) -> Self {
        Self {
            extractor,
            store,
            max_workers: max_workers.max(1),
        }
    }

    pub async fn flush(&self) -> Result<(), crate::error::StoreError> {
        self.store.flush().await
    }

    /// 处理一批文档; 单个文档失败只记录, 不中断批次
    pub async fn run(&self, documents: Vec<RawDocument>) -> ExtractionBatch {
        // Phase 1: 展开附件并计算指纹
        let physical: Vec<RawDocument> = documents.into_iter().flat_map(RawDocument::flatten).collect();
        let total_documents = physical.len();

        let mut groups: IndexMap<Fingerprint, DocumentGroup> = IndexMap::new();
        for (fingerprint, doc) in fingerprint_all(physical) {
            match groups.entry(fingerprint) {
                Entry::Occupied(mut e) => {
                    tracing::debug!(
                        "Duplicate document {} ({}), same content as {}",
                        doc.name,
                        doc.source,
                        e.get().representative.name
                    );
                    e.get_mut().copies += 1;
                }
                Entry::Vacant(e) => {
                    e.insert(DocumentGroup {
                        representative: doc,
                        copies: 1,
                    });
                }
            }
        }

        tracing::info!(
            "Extracting {} documents ({} unique) with {} workers",
            total_documents,
            groups.len(),
            self.max_workers
        );

        // Phase 2: 缓存命中直接返回
        let mut batch = ExtractionBatch::default();
        let mut misses: Vec<(Fingerprint, RawDocument)> = Vec::new();
        for (fingerprint, group) in groups {
            let reference = group.representative.reference(fingerprint.clone());
            match self.store.get(&fingerprint).await {
                Ok(Some(cached)) => {
                    tracing::info!("Cache hit: {} ({} copies)", reference, group.copies);
                    batch.receipts.push(cached.with_source(reference));
                }
                Ok(None) => misses.push((fingerprint, group.representative)),
                Err(e) => {
                    tracing::warn!("Extraction cache read failed for {}: {}, treating as miss", reference, e);
                    misses.push((fingerprint, group.representative));
                }
            }
        }
        let cache_hits = batch.receipts.len();

        // Phase 3: 未命中的文档并发抽取, 每个指纹只调用一次
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let handles: Vec<(DocumentRef, JoinHandle<Result<ExtractedReceipt, ExtractionError>>)> = misses
            .into_iter()
            .map(|(fingerprint, doc)| {
                let reference = doc.reference(fingerprint.clone());
                let handle = self.spawn_extraction(semaphore.clone(), fingerprint, doc);
                (reference, handle)
            })
            .collect();

        // Phase 4: 等全部任务结束后汇总
        let settled = futures::future::join_all(
            handles
                .into_iter()
                .map(|(reference, handle)| async move { (reference, handle.await) }),
        )
        .await;

        for (reference, joined) in settled {
            let outcome = joined.unwrap_or_else(|e| Err(ExtractionError::Aborted(e.to_string())));
            match outcome {
                Ok(receipt) => {
                    tracing::info!("✓ Extracted: {}", receipt);
                    batch.receipts.push(receipt);
                }
                Err(e) => {
                    tracing::warn!("✗ Failed: {}: {}", reference, e);
                    batch.failures.push(ExtractionFailure {
                        document: reference,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Extraction complete: {} receipts ({} from cache), {} failures",
            batch.receipts.len(),
            cache_hits,
            batch.failures.len()
        );
        batch
    }

    fn spawn_extraction(
        &self,
        semaphore: Arc<Semaphore>,
        fingerprint: Fingerprint,
        doc: RawDocument,
    ) -> JoinHandle<Result<ExtractedReceipt, ExtractionError>> {
        let extractor = self.extractor.clone();
        let store = self.store.clone();

        tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| ExtractionError::Aborted(e.to_string()))?;

            tracing::debug!("Extracting data from {} ({})", doc.name, doc.source);
            let fields = extractor.extract(&doc).await?;
            let receipt = ExtractedReceipt::from_raw(fields, doc.reference(fingerprint.clone()))?;

            if let Err(e) = store.put(&fingerprint, &receipt).await {
                tracing::error!("Failed to save extraction cache for {}: {}", doc.name, e);
            }
            Ok(receipt)
        })
    }
}
