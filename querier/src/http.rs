//! Query HTTP surface
//!
//! Serves the renderer-facing endpoints: label values, rendered
//! flamebearers, and Prometheus-compatible range matrices, plus health and
//! metrics.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::service::{make_service_fn, service_fn};
use hyper::{body::to_bytes, Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;

use cinder_shared::error::ModelError;
use cinder_shared::protocol::SelectProfilesRequest;
use cinder_shared::selector::{matchers_to_string, parse_selector};
use cinder_shared::types::labels::METRIC_NAME_LABEL;
use cinder_shared::types::profile::ProfileType;
use cinder_shared::utils::time::{nanos_to_millis, now_nanos, parse_relative_time, parse_timestamp};

use crate::error::QueryError;
use crate::metrics;
use crate::querier::Querier;

/// Start the query HTTP server.
pub async fn serve(addr: SocketAddr, querier: Arc<Querier>) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |_| {
        let querier = querier.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req: Request<Body>| {
                let querier = querier.clone();
                async move { handle(req, querier).await }
            }))
        }
    });

    tracing::info!("Query HTTP server listening on {}", addr);
    Server::bind(&addr).serve(make_svc).await
}

async fn handle(req: Request<Body>, querier: Arc<Querier>) -> Result<Response<Body>, hyper::Error> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    if method == Method::GET && path == "/healthz" {
        return Ok(Response::new(Body::from("ok\n")));
    }

    if method == Method::GET && path == "/metrics" {
        return Ok(Response::builder()
            .header("Content-Type", "text/plain; version=0.0.4")
            .body(Body::from(metrics::encode_metrics()))
            .expect("response build"));
    }

    if method == Method::GET && path == "/label-values" {
        let timer = metrics::QUERY_DURATION.start_timer();
        let res = label_values(req, &querier).await;
        timer.observe_duration();
        return Ok(res.unwrap_or_else(error_response));
    }

    if method == Method::POST && path == "/render" {
        let timer = metrics::QUERY_DURATION.start_timer();
        let res = render(req, &querier).await;
        timer.observe_duration();
        return Ok(res.unwrap_or_else(error_response));
    }

    if method == Method::GET && path == "/api/v1/query_range" {
        let timer = metrics::QUERY_DURATION.start_timer();
        let res = query_range(req, &querier).await;
        timer.observe_duration();
        return Ok(res.unwrap_or_else(error_response));
    }

    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::from("not found\n"))
        .expect("response build"))
}

fn json_response(body: &str) -> Response<Body> {
    Response::builder()
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("response build")
}

fn error_response(err: QueryError) -> Response<Body> {
    let status = match &err {
        QueryError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        QueryError::QuorumLost { .. } | QueryError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        QueryError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Response::builder()
        .status(status)
        .body(Body::from(format!("{err}\n")))
        .expect("response build")
}

fn invalid(reason: impl Into<String>) -> QueryError {
    QueryError::InvalidArgument(reason.into())
}

fn query_params(req: &Request<Body>) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
        .into_owned()
        .collect()
}

async fn form_params(req: Request<Body>) -> Result<BTreeMap<String, String>, QueryError> {
    let bytes = to_bytes(req.into_body())
        .await
        .map_err(|e| QueryError::Internal(e.to_string()))?;
    Ok(url::form_urlencoded::parse(&bytes).into_owned().collect())
}

/// `GET /label-values?label=<name>`. For `__name__` the profile-type IDs
/// are returned instead of label values.
async fn label_values(
    req: Request<Body>,
    querier: &Querier,
) -> Result<Response<Body>, QueryError> {
    let params = query_params(&req);
    let label = params
        .get("label")
        .filter(|l| !l.is_empty())
        .ok_or_else(|| invalid("label parameter is required"))?;

    let values = if label == METRIC_NAME_LABEL {
        let types = querier.profile_types().await?;
        types.iter().map(|t| t.id()).collect()
    } else {
        querier.label_values(label.clone()).await?
    };

    let body = serde_json::to_string(&values).map_err(|e| QueryError::Internal(e.to_string()))?;
    Ok(json_response(&body))
}

/// `POST /render` with form fields `query`, `from`, `until`, `format`.
async fn render(req: Request<Body>, querier: &Querier) -> Result<Response<Body>, QueryError> {
    let params = form_params(req).await?;
    let query = params
        .get("query")
        .filter(|q| !q.is_empty())
        .ok_or_else(|| invalid("query is required"))?;
    let (selector, profile_type) = parse_query(query)?;

    let (start, end) = resolve_time_range(
        params.get("from").map(String::as_str),
        params.get("until").map(String::as_str),
        now_nanos(),
    )?;

    let flamebearer = querier
        .select_merge_stacktraces(selector, &profile_type.id(), start, end)
        .await?;
    let profile =
        flamebearer.into_profile(&profile_type.sample_type, &profile_type.sample_unit);
    let body = serde_json::to_string(&profile).map_err(|e| QueryError::Internal(e.to_string()))?;
    Ok(json_response(&body))
}

#[derive(Serialize)]
struct PromResponse {
    status: &'static str,
    data: PromData,
}

#[derive(Serialize)]
struct PromData {
    #[serde(rename = "resultType")]
    result_type: &'static str,
    result: Vec<PromSeries>,
}

#[derive(Serialize)]
struct PromSeries {
    metric: BTreeMap<String, String>,
    values: Vec<(i64, f64)>,
}

/// `GET /api/v1/query_range?query=...&start=...&end=...`, answering in the
/// Prometheus matrix shape with one series per visible label set.
async fn query_range(req: Request<Body>, querier: &Querier) -> Result<Response<Body>, QueryError> {
    let params = query_params(&req);
    let start = parse_timestamp(params.get("start").map(String::as_str).unwrap_or(""))
        .map_err(|e| invalid(format!("invalid start: {e}")))?;
    let end = parse_timestamp(params.get("end").map(String::as_str).unwrap_or(""))
        .map_err(|e| invalid(format!("invalid end: {e}")))?;
    if end < start {
        return Err(invalid("end timestamp must not be before start time"));
    }
    let query = params.get("query").ok_or_else(|| invalid("query is required"))?;
    let (selector, profile_type) = parse_query(query)?;

    let mut rows = querier
        .select_profiles(SelectProfilesRequest {
            label_selector: selector,
            profile_type,
            start,
            end,
        })
        .await?;

    let mut series: BTreeMap<u64, PromSeries> = BTreeMap::new();
    while let Some(profile) = rows.next().await {
        let visible = profile.labels.without_private_labels();
        let point = (nanos_to_millis(profile.timestamp_ns), profile.total_value as f64);
        series
            .entry(visible.hash())
            .or_insert_with(|| PromSeries {
                metric: visible
                    .iter()
                    .map(|l| (l.name.clone(), l.value.clone()))
                    .collect(),
                values: Vec::new(),
            })
            .values
            .push(point);
    }
    if let Some(err) = rows.error() {
        return Err(QueryError::Internal(format!("{err:#}")));
    }

    let response = PromResponse {
        status: "success",
        data: PromData {
            result_type: "matrix",
            result: series.into_values().collect(),
        },
    };
    let body =
        serde_json::to_string(&response).map_err(|e| QueryError::Internal(e.to_string()))?;
    Ok(json_response(&body))
}

/// Resolves the render `from`/`until` form fields into a nanosecond range.
///
/// `until` defaults to now and also accepts an absolute timestamp; `from`
/// is always an offset back from `until`, defaulting to one hour, given as
/// `now-<duration>` or a bare duration.
fn resolve_time_range(
    from: Option<&str>,
    until: Option<&str>,
    now: i64,
) -> Result<(i64, i64), QueryError> {
    let end = match until {
        None | Some("") | Some("now") => now,
        Some(until) => parse_timestamp(until)?,
    };
    let start = match from {
        None | Some("") => end - Duration::from_secs(3600).as_nanos() as i64,
        Some(from) => end - parse_relative_time(from)?.as_nanos() as i64,
    };
    Ok((start, end))
}

/// Splits a query selector into the plain matcher selector and the profile
/// type bound by its `__name__` matcher.
fn parse_query(query: &str) -> Result<(String, ProfileType), QueryError> {
    let matchers = parse_selector(query)?;
    let mut plain = Vec::with_capacity(matchers.len());
    let mut name = None;
    for matcher in matchers {
        if matcher.name == METRIC_NAME_LABEL {
            name = Some(matcher);
        } else {
            plain.push(matcher);
        }
    }
    let name = name.ok_or(ModelError::MissingProfileType)?;
    let profile_type = ProfileType::parse(&name.value)?;
    Ok((matchers_to_string(&plain), profile_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_binds_profile_type() {
        let (selector, profile_type) =
            parse_query(r#"memory:inuse_space:bytes:space:bytes{app="foo"}"#).unwrap();
        assert_eq!(selector, r#"{app="foo"}"#);
        assert_eq!(profile_type.name, "memory");
        assert_eq!(profile_type.sample_unit, "bytes");
    }

    #[test]
    fn test_parse_query_requires_profile_type() {
        let err = parse_query(r#"{app="foo"}"#).unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
    }

    #[test]
    fn test_parse_query_rejects_malformed_type() {
        assert!(parse_query(r#"{__name__="cpu", app="foo"}"#).is_err());
    }

    const NOW: i64 = 1_700_000_000_000_000_000;
    const HOUR: i64 = 3_600_000_000_000;

    #[test]
    fn test_time_range_defaults_to_last_hour() {
        let (start, end) = resolve_time_range(None, None, NOW).unwrap();
        assert_eq!(end, NOW);
        assert_eq!(start, NOW - HOUR);
    }

    #[test]
    fn test_time_range_now_shorthand() {
        let (start, end) = resolve_time_range(Some("now-2h"), Some("now"), NOW).unwrap();
        assert_eq!(end, NOW);
        assert_eq!(start, NOW - 2 * HOUR);
    }

    #[test]
    fn test_time_range_bare_duration_from() {
        let (start, end) = resolve_time_range(Some("30s"), None, NOW).unwrap();
        assert_eq!(end, NOW);
        assert_eq!(start, NOW - 30_000_000_000);
    }

    #[test]
    fn test_time_range_absolute_until() {
        let (start, end) = resolve_time_range(Some("now-1h"), Some("100"), NOW).unwrap();
        assert_eq!(end, 100_000_000_000);
        assert_eq!(start, end - HOUR);
    }

    #[test]
    fn test_time_range_rejects_absolute_from() {
        assert!(resolve_time_range(Some("2021-01-01T00:00:00Z"), None, NOW).is_err());
        assert!(resolve_time_range(Some("nonsense"), None, NOW).is_err());
    }
}
