//! Archive assembly for the whole batch.

use super::{BatchPipeline, SharedState};
use crate::archive::ArchiveWriter;
use crate::collection::ItemStatus;
use crate::error::PipelineError;
use bytes::Bytes;
use std::collections::HashSet;
use tracing::{info, warn};

/// A finished archive.
#[derive(Debug, Clone)]
pub struct ExportedArchive {
    pub bytes: Bytes,
    /// Entry names in archive order
    pub entries: Vec<String>,
    /// Items left out, with the reason
    pub skipped: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ExportAssembler {
    state: SharedState,
    batch: BatchPipeline,
}

impl ExportAssembler {
    pub fn new(state: SharedState, batch: BatchPipeline) -> Self {
        Self { state, batch }
    }

    /// Re-render everything, wait for it, and package the results.
    ///
    /// Entries follow collection order. Items that failed to decode or encode
    /// are skipped; the rest of the batch is still exported.
    pub async fn export_all(
        &self,
        archive: &mut dyn ArchiveWriter,
    ) -> Result<ExportedArchive, PipelineError> {
        let is_empty = self.state.lock().collection.is_empty();
        if is_empty {
            return Err(PipelineError::EmptyBatch);
        }

        self.batch.reprocess_all();
        let progress = self.batch.wait_until_settled().await;

        let (ready, skipped) = {
            let state = self.state.lock();
            let mut ready = Vec::new();
            let mut skipped = Vec::new();
            for item in state.collection.items() {
                match (item.status(), item.composited()) {
                    (ItemStatus::Ready, Some(bytes)) => ready.push((item.export_name(), bytes.clone())),
                    (ItemStatus::Failed(reason), _) => {
                        skipped.push((item.filename().to_string(), reason.clone()))
                    }
                    _ => skipped.push((item.filename().to_string(), "not rendered".to_string())),
                }
            }
            (ready, skipped)
        };

        for (filename, reason) in &skipped {
            warn!(filename = %filename, reason = %reason, "Leaving item out of export");
        }

        let mut used = HashSet::new();
        let mut entries = Vec::with_capacity(ready.len());
        for (name, bytes) in ready {
            let name = unique_entry_name(&name, &mut used);
            archive.add_entry(&name, bytes).await?;
            entries.push(name);
        }

        let bytes = archive.finalize().await?;
        info!(
            generation = progress.generation,
            entries = entries.len(),
            skipped = skipped.len(),
            size = bytes.len(),
            "Export archive finalized"
        );

        Ok(ExportedArchive {
            bytes,
            entries,
            skipped,
        })
    }
}

/// Entry name not yet in `used`; repeats get ` (2)`, ` (3)`, ... before the extension.
fn unique_entry_name(name: &str, used: &mut HashSet<String>) -> String {
    if used.insert(name.to_string()) {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(dot) => (&name[..dot], &name[dot..]),
        None => (name, ""),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
