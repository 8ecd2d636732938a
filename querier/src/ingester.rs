//! Ingester query clients
//!
//! The coordinator talks to ingesters through [`IngesterClient`]; the
//! concrete transport lives behind the trait. Clients are created lazily
//! through a factory and cached per address in a [`ClientPool`].

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_stream::Stream;

use cinder_shared::protocol::{
    LabelValuesRequest, SelectProfilesRequest, SelectProfilesResponse, SeriesRequest,
};
use cinder_shared::types::labels::LabelSet;
use cinder_shared::types::profile::ProfileType;

use crate::metrics;

/// A server stream of profile row batches from one ingester.
pub type ProfileRowStream =
    Pin<Box<dyn Stream<Item = anyhow::Result<SelectProfilesResponse>> + Send>>;

/// The ingester query surface consumed by the coordinator.
#[async_trait]
pub trait IngesterClient: Send + Sync {
    async fn profile_types(&self) -> anyhow::Result<Vec<ProfileType>>;

    async fn label_values(&self, req: LabelValuesRequest) -> anyhow::Result<Vec<String>>;

    async fn series(&self, req: SeriesRequest) -> anyhow::Result<Vec<LabelSet>>;

    async fn select_profiles(&self, req: SelectProfilesRequest)
        -> anyhow::Result<ProfileRowStream>;
}

/// Builds a client for an ingester address.
pub type ClientFactory =
    Arc<dyn Fn(&str) -> anyhow::Result<Arc<dyn IngesterClient>> + Send + Sync>;

/// Address-keyed cache of ingester clients.
pub struct ClientPool {
    factory: ClientFactory,
    clients: RwLock<HashMap<String, Arc<dyn IngesterClient>>>,
}

impl ClientPool {
    pub fn new(factory: ClientFactory) -> Self {
        Self {
            factory,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached client for `addr`, creating it on first use.
    pub fn client_for(&self, addr: &str) -> anyhow::Result<Arc<dyn IngesterClient>> {
        {
            let clients = self.clients.read().unwrap();
            if let Some(client) = clients.get(addr) {
                return Ok(Arc::clone(client));
            }
        }
        let mut clients = self.clients.write().unwrap();
        if let Some(client) = clients.get(addr) {
            return Ok(Arc::clone(client));
        }
        let client = (self.factory)(addr)?;
        clients.insert(addr.to_string(), Arc::clone(&client));
        metrics::INGESTER_CLIENTS.set(clients.len() as f64);
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
