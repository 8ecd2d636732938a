//! HTTP ingester client
//!
//! JSON-over-HTTP implementation of the ingester query surface. Range
//! queries stream newline-delimited JSON batches so rows can be merged
//! before the ingester finishes sending.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use hyper::body::HttpBody;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_stream::Stream;

use cinder_shared::protocol::{
    LabelValuesRequest, LabelValuesResponse, ProfileTypesResponse, SelectProfilesRequest,
    SelectProfilesResponse, SeriesRequest, SeriesResponse,
};
use cinder_shared::types::labels::LabelSet;
use cinder_shared::types::profile::ProfileType;

use crate::ingester::{IngesterClient, ProfileRowStream};

/// HTTP client for one ingester instance.
pub struct HttpIngesterClient {
    base: String,
    http: Client<HttpConnector>,
}

impl HttpIngesterClient {
    pub fn new(addr: &str) -> Self {
        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", addr.trim_end_matches('/'))
        };
        Self {
            base,
            http: Client::new(),
        }
    }

    async fn post(&self, path: &str, body: impl Serialize) -> anyhow::Result<hyper::Response<Body>> {
        let req = Request::builder()
            .method(Method::POST)
            .uri(format!("{}{}", self.base, path))
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?;
        let res = self.http.request(req).await?;
        if res.status() != StatusCode::OK {
            anyhow::bail!("{} returned {}", path, res.status());
        }
        Ok(res)
    }

    async fn post_json<Req: Serialize, Res: DeserializeOwned>(
        &self,
        path: &str,
        body: Req,
    ) -> anyhow::Result<Res> {
        let res = self.post(path, body).await?;
        let bytes = hyper::body::to_bytes(res.into_body()).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl IngesterClient for HttpIngesterClient {
    async fn profile_types(&self) -> anyhow::Result<Vec<ProfileType>> {
        let res: ProfileTypesResponse = self
            .post_json("/ingester/v1/profile_types", serde_json::json!({}))
            .await?;
        Ok(res.profile_types)
    }

    async fn label_values(&self, req: LabelValuesRequest) -> anyhow::Result<Vec<String>> {
        let res: LabelValuesResponse = self.post_json("/ingester/v1/label_values", req).await?;
        Ok(res.names)
    }

    async fn series(&self, req: SeriesRequest) -> anyhow::Result<Vec<LabelSet>> {
        let res: SeriesResponse = self.post_json("/ingester/v1/series", req).await?;
        Ok(res.labels_set)
    }

    async fn select_profiles(
        &self,
        req: SelectProfilesRequest,
    ) -> anyhow::Result<ProfileRowStream> {
        let res = self.post("/ingester/v1/select_profiles", req).await?;
        Ok(Box::pin(NdjsonBatches::new(res.into_body())))
    }
}

/// Decodes a response body as newline-delimited JSON batches.
struct NdjsonBatches {
    body: Body,
    buf: Vec<u8>,
    done: bool,
}

impl NdjsonBatches {
    fn new(body: Body) -> Self {
        Self {
            body,
            buf: Vec::new(),
            done: false,
        }
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        Some(line)
    }

    fn decode(line: &[u8]) -> anyhow::Result<SelectProfilesResponse> {
        Ok(serde_json::from_slice(line)?)
    }
}

impl Stream for NdjsonBatches {
    type Item = anyhow::Result<SelectProfilesResponse>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(line) = this.take_line() {
                if line.iter().all(|b| b.is_ascii_whitespace()) {
                    continue;
                }
                return Poll::Ready(Some(Self::decode(&line)));
            }
            if this.done {
                if this.buf.iter().any(|b| !b.is_ascii_whitespace()) {
                    let line = std::mem::take(&mut this.buf);
                    return Poll::Ready(Some(Self::decode(&line)));
                }
                return Poll::Ready(None);
            }
            match Pin::new(&mut this.body).poll_data(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.buf.extend_from_slice(&chunk),
                Poll::Ready(Some(Err(err))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(err.into())));
                }
                Poll::Ready(None) => this.done = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Factory wiring [`HttpIngesterClient`] into the client pool.
pub fn http_client_factory() -> crate::ingester::ClientFactory {
    Arc::new(|addr: &str| Ok(Arc::new(HttpIngesterClient::new(addr)) as Arc<dyn IngesterClient>))
}
