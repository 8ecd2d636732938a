//! Merged profile streams
//!
//! Lazily interleaves the per-ingester row streams of one range query into
//! a single sequence ordered by `(timestamp_ns, label_hash)`, emitting each
//! `(label_hash, timestamp_ns)` key once. Function ids are resolved against
//! each batch's name table before rows leave the merge, so downstream tree
//! construction only sees shared strings.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use tokio_stream::StreamExt;
use tracing::warn;

use cinder_shared::intern::{FunctionTable, LabelSetCache};
use cinder_shared::types::labels::LabelSet;
use cinder_shared::types::tree::StackSample;

use crate::ingester::ProfileRowStream;

/// One deduplicated profile row with resolved stacks.
#[derive(Debug, Clone)]
pub struct MergedProfile {
    pub labels: Arc<LabelSet>,
    pub label_hash: u64,
    pub timestamp_ns: i64,
    pub total_value: i64,
    pub stacks: Vec<StackSample>,
}

/// Adapts one ingester's batch stream into resolved rows.
struct IngesterRows {
    addr: String,
    upstream: ProfileRowStream,
    pending: VecDeque<MergedProfile>,
}

impl IngesterRows {
    async fn next_row(&mut self, cache: &LabelSetCache) -> Option<anyhow::Result<MergedProfile>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Some(Ok(row));
            }
            match self.upstream.next().await {
                None => return None,
                Some(Err(err)) => {
                    return Some(Err(err.context(format!("ingester {}", self.addr))))
                }
                Some(Ok(batch)) => {
                    let table = FunctionTable::new(&batch.function_names);
                    for row in batch.profiles {
                        let labels = cache.canonical(row.labels);
                        let label_hash = labels.hash();
                        let mut stacks = Vec::with_capacity(row.stacktraces.len());
                        for stacktrace in &row.stacktraces {
                            match resolve_stack(&table, &stacktrace.function_ids) {
                                Some(locations) => stacks.push(StackSample {
                                    locations,
                                    value: stacktrace.value,
                                }),
                                // a bad sample aborts only that sample
                                None => warn!(
                                    "ingester {}: dropping stacktrace with unresolved function id",
                                    self.addr
                                ),
                            }
                        }
                        self.pending.push_back(MergedProfile {
                            labels,
                            label_hash,
                            timestamp_ns: row.timestamp_ns,
                            total_value: row.total_value,
                            stacks,
                        });
                    }
                }
            }
        }
    }
}

fn resolve_stack(table: &FunctionTable, ids: &[u64]) -> Option<Vec<Arc<str>>> {
    ids.iter().map(|&id| table.resolve(id)).collect()
}

struct HeapHead {
    key: (i64, u64),
    stream: usize,
    row: MergedProfile,
}

impl PartialEq for HeapHead {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.stream == other.stream
    }
}

impl Eq for HeapHead {}

impl PartialOrd for HeapHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapHead {
    fn cmp(&self, other: &Self) -> Ordering {
        // ties resolved by stream index so the first stream wins dedup
        self.key
            .cmp(&other.key)
            .then_with(|| self.stream.cmp(&other.stream))
    }
}

/// K-way merge over per-ingester profile streams with inline dedup.
pub struct MergedProfileStream {
    cache: Arc<LabelSetCache>,
    streams: Vec<IngesterRows>,
    heap: BinaryHeap<Reverse<HeapHead>>,
    last_key: Option<(i64, u64)>,
    primed: bool,
    err: Option<anyhow::Error>,
}

impl MergedProfileStream {
    pub fn new(
        streams: impl IntoIterator<Item = (String, ProfileRowStream)>,
        cache: Arc<LabelSetCache>,
    ) -> Self {
        Self {
            cache,
            streams: streams
                .into_iter()
                .map(|(addr, upstream)| IngesterRows {
                    addr,
                    upstream,
                    pending: VecDeque::new(),
                })
                .collect(),
            heap: BinaryHeap::new(),
            last_key: None,
            primed: false,
            err: None,
        }
    }

    /// Advances to the next deduplicated row, or `None` when every stream
    /// is exhausted or an upstream error terminated the merge.
    pub async fn next(&mut self) -> Option<MergedProfile> {
        if self.err.is_some() {
            return None;
        }
        if !self.primed {
            self.primed = true;
            for stream in 0..self.streams.len() {
                match self.pull(stream).await {
                    Ok(()) => {}
                    Err(err) => {
                        self.fail(err);
                        return None;
                    }
                }
            }
        }
        while let Some(Reverse(head)) = self.heap.pop() {
            if let Err(err) = self.pull(head.stream).await {
                self.fail(err);
                return None;
            }
            if self.last_key == Some(head.key) {
                // duplicate of an already emitted row; first arrival won
                continue;
            }
            self.last_key = Some(head.key);
            return Some(head.row);
        }
        None
    }

    /// The first upstream error encountered, if any.
    pub fn error(&self) -> Option<&anyhow::Error> {
        self.err.as_ref()
    }

    async fn pull(&mut self, stream: usize) -> anyhow::Result<()> {
        match self.streams[stream].next_row(&self.cache).await {
            Some(Ok(row)) => {
                self.heap.push(Reverse(HeapHead {
                    key: (row.timestamp_ns, row.label_hash),
                    stream,
                    row,
                }));
                Ok(())
            }
            Some(Err(err)) => Err(err),
            None => Ok(()),
        }
    }

    /// Terminates the merge: remaining upstream streams are dropped, which
    /// cancels them.
    fn fail(&mut self, err: anyhow::Error) {
        self.err = Some(err);
        self.streams.clear();
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_shared::protocol::SelectProfilesResponse;
    use cinder_shared::types::labels::LabelSetBuilder;
    use cinder_shared::types::profile::{ProfileRow, StacktraceSample};

    fn labels(app: &str) -> LabelSet {
        let mut b = LabelSetBuilder::new();
        b.set("app", app);
        b.build()
    }

    fn row(app: &str, timestamp_ns: i64, value: i64) -> ProfileRow {
        ProfileRow {
            labels: labels(app),
            timestamp_ns,
            total_value: value,
            stacktraces: vec![StacktraceSample {
                function_ids: vec![0, 1],
                value,
            }],
        }
    }

    fn stream_of(rows: Vec<ProfileRow>) -> ProfileRowStream {
        let batch = SelectProfilesResponse {
            profiles: rows,
            function_names: vec!["a".to_string(), "b".to_string()],
        };
        Box::pin(tokio_stream::iter(vec![Ok(batch)]))
    }

    fn failing_stream() -> ProfileRowStream {
        Box::pin(tokio_stream::iter(vec![Err(anyhow::anyhow!("stream broke"))]))
    }

    async fn drain(mut merged: MergedProfileStream) -> (Vec<(i64, i64)>, bool) {
        let mut out = Vec::new();
        while let Some(p) = merged.next().await {
            out.push((p.timestamp_ns, p.total_value));
        }
        (out, merged.error().is_some())
    }

    #[tokio::test]
    async fn test_interleaves_by_timestamp() {
        let merged = MergedProfileStream::new(
            vec![
                ("1".to_string(), stream_of(vec![row("x", 100, 1), row("x", 300, 3)])),
                ("2".to_string(), stream_of(vec![row("x", 200, 2)])),
            ],
            Arc::new(LabelSetCache::new()),
        );
        let (rows, failed) = drain(merged).await;
        assert!(!failed);
        assert_eq!(rows, vec![(100, 1), (200, 2), (300, 3)]);
    }

    #[tokio::test]
    async fn test_dedups_equal_keys_across_streams() {
        let merged = MergedProfileStream::new(
            vec![
                ("1".to_string(), stream_of(vec![row("x", 100, 1)])),
                ("2".to_string(), stream_of(vec![row("x", 100, 1)])),
                ("3".to_string(), stream_of(vec![row("x", 100, 1)])),
            ],
            Arc::new(LabelSetCache::new()),
        );
        let (rows, failed) = drain(merged).await;
        assert!(!failed);
        assert_eq!(rows, vec![(100, 1)]);
    }

    #[tokio::test]
    async fn test_same_timestamp_different_labels_all_emitted() {
        let merged = MergedProfileStream::new(
            vec![
                ("1".to_string(), stream_of(vec![row("x", 100, 1)])),
                ("2".to_string(), stream_of(vec![row("y", 100, 2)])),
            ],
            Arc::new(LabelSetCache::new()),
        );
        let (rows, failed) = drain(merged).await;
        assert!(!failed);
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_upstream_error_terminates_merge() {
        let mut merged = MergedProfileStream::new(
            vec![
                ("1".to_string(), stream_of(vec![row("x", 100, 1)])),
                ("2".to_string(), failing_stream()),
            ],
            Arc::new(LabelSetCache::new()),
        );
        assert!(merged.next().await.is_none());
        assert!(merged.error().is_some());
    }

    #[tokio::test]
    async fn test_unresolved_function_id_drops_only_that_stack() {
        let bad = ProfileRow {
            labels: labels("x"),
            timestamp_ns: 100,
            total_value: 3,
            stacktraces: vec![
                StacktraceSample {
                    function_ids: vec![0],
                    value: 1,
                },
                StacktraceSample {
                    function_ids: vec![42],
                    value: 2,
                },
            ],
        };
        let mut merged = MergedProfileStream::new(
            vec![(
                "1".to_string(),
                Box::pin(tokio_stream::iter(vec![Ok(SelectProfilesResponse {
                    profiles: vec![bad],
                    function_names: vec!["a".to_string()],
                })])) as ProfileRowStream,
            )],
            Arc::new(LabelSetCache::new()),
        );
        let row = merged.next().await.unwrap();
        assert_eq!(row.stacks.len(), 1);
        assert_eq!(&*row.stacks[0].locations[0], "a");
        assert!(merged.next().await.is_none());
        assert!(merged.error().is_none());
    }
}
