//! Fan-out query coordinator
//!
//! Dispatches every query to all ingesters in the read replication set,
//! then shapes the union: profile types and label values are sorted and
//! deduplicated, series are deduplicated by label-set hash, and merge
//! queries fold the deduplicated row stream into one flamebearer.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cinder_shared::intern::LabelSetCache;
use cinder_shared::protocol::{LabelValuesRequest, SelectProfilesRequest, SeriesRequest};
use cinder_shared::types::flamegraph::Flamebearer;
use cinder_shared::types::labels::LabelSet;
use cinder_shared::types::profile::ProfileType;
use cinder_shared::types::tree::stacks_to_tree;

use crate::config::QuerierConfig;
use crate::error::QueryError;
use crate::ingester::{ClientFactory, ClientPool, IngesterClient};
use crate::ring::{ReadRing, ResponseFromReplica};
use crate::streams::MergedProfileStream;

pub struct Querier {
    extra_query_delay: Duration,
    ring: Arc<dyn ReadRing>,
    pool: Arc<ClientPool>,
    label_cache: Arc<LabelSetCache>,
}

impl Querier {
    pub fn new(cfg: &QuerierConfig, ring: Arc<dyn ReadRing>, factory: ClientFactory) -> Self {
        Self {
            extra_query_delay: cfg.extra_query_delay,
            ring,
            pool: Arc::new(ClientPool::new(factory)),
            label_cache: Arc::new(LabelSetCache::new()),
        }
    }

    /// Runs `f` in parallel against every ingester in the read set.
    async fn for_all_ingesters<T, F, Fut>(
        &self,
        f: F,
    ) -> Result<Vec<ResponseFromReplica<T>>, QueryError>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn IngesterClient>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let set = self.ring.replication_set_for_read()?;
        let pool = Arc::clone(&self.pool);
        set.dispatch(self.extra_query_delay, move |instance| {
            let pending = pool.client_for(&instance.addr).map(&f);
            async move {
                match pending {
                    Ok(fut) => fut.await,
                    Err(err) => Err(err),
                }
            }
        })
        .await
    }

    /// All known profile types, deduplicated and sorted by ID.
    pub async fn profile_types(&self) -> Result<Vec<ProfileType>, QueryError> {
        let responses = self
            .for_all_ingesters(|client| async move { client.profile_types().await })
            .await?;
        let mut by_id: BTreeMap<String, ProfileType> = BTreeMap::new();
        for replica in responses {
            for profile_type in replica.response {
                by_id.entry(profile_type.id()).or_insert(profile_type);
            }
        }
        Ok(by_id.into_values().collect())
    }

    /// All values observed for a label name, deduplicated and sorted.
    pub async fn label_values(&self, name: String) -> Result<Vec<String>, QueryError> {
        let responses = self
            .for_all_ingesters(move |client| {
                let req = LabelValuesRequest { name: name.clone() };
                async move { client.label_values(req).await }
            })
            .await?;
        Ok(unique_sorted_strings(responses))
    }

    /// Series matching the given matchers, deduplicated by label-set hash.
    pub async fn series(&self, matchers: Vec<String>) -> Result<Vec<LabelSet>, QueryError> {
        let responses = self
            .for_all_ingesters(move |client| {
                let req = SeriesRequest {
                    matchers: matchers.clone(),
                };
                async move { client.series(req).await }
            })
            .await?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for replica in responses {
            for labels in replica.response {
                if seen.insert(labels.hash()) {
                    out.push(labels);
                }
            }
        }
        Ok(out)
    }

    /// Opens the merged, deduplicated profile row stream for a range query.
    pub async fn select_profiles(
        &self,
        req: SelectProfilesRequest,
    ) -> Result<MergedProfileStream, QueryError> {
        let responses = self
            .for_all_ingesters(move |client| {
                let req = req.clone();
                async move { client.select_profiles(req).await }
            })
            .await?;
        Ok(MergedProfileStream::new(
            responses
                .into_iter()
                .map(|replica| (replica.addr, replica.response)),
            Arc::clone(&self.label_cache),
        ))
    }

    /// Merges every matching profile into a single flamebearer.
    pub async fn select_merge_stacktraces(
        &self,
        label_selector: String,
        profile_type_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Flamebearer, QueryError> {
        let profile_type = ProfileType::parse(profile_type_id)?;
        let req = SelectProfilesRequest {
            label_selector,
            profile_type,
            start,
            end,
        };
        let mut rows = self.select_profiles(req).await?;
        let mut samples = Vec::new();
        while let Some(profile) = rows.next().await {
            samples.extend(profile.stacks);
        }
        if let Some(err) = rows.error() {
            return Err(QueryError::Internal(format!("{err:#}")));
        }
        Ok(Flamebearer::from_tree(&stacks_to_tree(samples)))
    }
}

fn unique_sorted_strings(responses: Vec<ResponseFromReplica<Vec<String>>>) -> Vec<String> {
    let total = responses.iter().map(|r| r.response.len()).sum();
    let mut unique = HashSet::with_capacity(total);
    let mut result = Vec::with_capacity(total);
    for replica in responses {
        for elem in replica.response {
            if unique.insert(elem.clone()) {
                result.push(elem);
            }
        }
    }
    result.sort();
    result
}
