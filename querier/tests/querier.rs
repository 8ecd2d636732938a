//! End-to-end coordinator tests against fake ingester clients.

use std::sync::Arc;

use async_trait::async_trait;

use cinder_querier::ingester::{IngesterClient, ProfileRowStream};
use cinder_querier::ring::StaticRing;
use cinder_querier::{Querier, QuerierConfig, QueryError};
use cinder_shared::protocol::{
    LabelValuesRequest, SelectProfilesRequest, SelectProfilesResponse, SeriesRequest,
};
use cinder_shared::types::labels::{LabelSet, LabelSetBuilder};
use cinder_shared::types::profile::{ProfileRow, ProfileType, StacktraceSample};

#[derive(Default, Clone)]
struct FakeIngester {
    profile_types: Vec<ProfileType>,
    label_values: Vec<String>,
    series: Vec<LabelSet>,
    profiles: Option<SelectProfilesResponse>,
    fail: bool,
}

#[async_trait]
impl IngesterClient for FakeIngester {
    async fn profile_types(&self) -> anyhow::Result<Vec<ProfileType>> {
        if self.fail {
            anyhow::bail!("ingester down");
        }
        Ok(self.profile_types.clone())
    }

    async fn label_values(&self, _req: LabelValuesRequest) -> anyhow::Result<Vec<String>> {
        if self.fail {
            anyhow::bail!("ingester down");
        }
        Ok(self.label_values.clone())
    }

    async fn series(&self, _req: SeriesRequest) -> anyhow::Result<Vec<LabelSet>> {
        if self.fail {
            anyhow::bail!("ingester down");
        }
        Ok(self.series.clone())
    }

    async fn select_profiles(
        &self,
        _req: SelectProfilesRequest,
    ) -> anyhow::Result<ProfileRowStream> {
        if self.fail {
            anyhow::bail!("ingester down");
        }
        let batches: Vec<anyhow::Result<SelectProfilesResponse>> =
            self.profiles.clone().into_iter().map(Ok).collect();
        Ok(Box::pin(tokio_stream::iter(batches)))
    }
}

fn querier_with(max_errors: usize, fakes: Vec<(&str, FakeIngester)>) -> Querier {
    let addrs: Vec<String> = fakes.iter().map(|(addr, _)| addr.to_string()).collect();
    let clients: Vec<(String, Arc<FakeIngester>)> = fakes
        .into_iter()
        .map(|(addr, fake)| (addr.to_string(), Arc::new(fake)))
        .collect();
    let ring = Arc::new(StaticRing::new(addrs, max_errors));
    let config = QuerierConfig::default();
    Querier::new(
        &config,
        ring,
        Arc::new(move |addr: &str| {
            let client = clients
                .iter()
                .find(|(a, _)| a == addr)
                .map(|(_, c)| Arc::clone(c))
                .expect("unknown ingester address");
            Ok(client as Arc<dyn IngesterClient>)
        }),
    )
}

fn ptype(name: &str) -> ProfileType {
    ProfileType::parse(&format!("{name}:cpu:nanoseconds:cpu:nanoseconds")).unwrap()
}

fn labels(app: &str) -> LabelSet {
    let mut b = LabelSetBuilder::new();
    b.set("app", app);
    b.build()
}

/// One profile row with a single stack, leaf first.
fn profile_batch(app: &str, timestamp_ns: i64, value: i64) -> SelectProfilesResponse {
    SelectProfilesResponse {
        profiles: vec![ProfileRow {
            labels: labels(app),
            timestamp_ns,
            total_value: value,
            stacktraces: vec![StacktraceSample {
                function_ids: vec![0, 1],
                value,
            }],
        }],
        function_names: vec!["a".to_string(), "b".to_string()],
    }
}

#[tokio::test]
async fn test_profile_types_dedup_and_sort() {
    let querier = querier_with(
        0,
        vec![
            (
                "1",
                FakeIngester {
                    profile_types: vec![ptype("foo"), ptype("bar")],
                    ..Default::default()
                },
            ),
            (
                "2",
                FakeIngester {
                    profile_types: vec![ptype("bar"), ptype("buzz")],
                    ..Default::default()
                },
            ),
            (
                "3",
                FakeIngester {
                    profile_types: vec![ptype("buzz"), ptype("foo")],
                    ..Default::default()
                },
            ),
        ],
    );

    let out = querier.profile_types().await.unwrap();
    let names: Vec<&str> = out.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["bar", "buzz", "foo"]);
}

#[tokio::test]
async fn test_label_values_union() {
    let values = |vs: &[&str]| vs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let querier = querier_with(
        0,
        vec![
            (
                "1",
                FakeIngester {
                    label_values: values(&["foo", "bar"]),
                    ..Default::default()
                },
            ),
            (
                "2",
                FakeIngester {
                    label_values: values(&["bar", "buzz"]),
                    ..Default::default()
                },
            ),
            (
                "3",
                FakeIngester {
                    label_values: values(&["buzz", "foo"]),
                    ..Default::default()
                },
            ),
        ],
    );

    let out = querier.label_values("foo".to_string()).await.unwrap();
    assert_eq!(out, vec!["bar", "buzz", "foo"]);
}

#[tokio::test]
async fn test_series_dedup_by_label_hash() {
    let querier = querier_with(
        0,
        vec![
            (
                "1",
                FakeIngester {
                    series: vec![labels("foo"), labels("bar")],
                    ..Default::default()
                },
            ),
            (
                "2",
                FakeIngester {
                    series: vec![labels("bar"), labels("buzz")],
                    ..Default::default()
                },
            ),
        ],
    );

    let out = querier.series(vec![]).await.unwrap();
    assert_eq!(out.len(), 3);
    let mut apps: Vec<&str> = out.iter().filter_map(|ls| ls.get("app")).collect();
    apps.sort();
    assert_eq!(apps, vec!["bar", "buzz", "foo"]);
}

#[tokio::test]
async fn test_select_merge_dedups_across_ingesters() {
    // every ingester returns the same profile; the flamebearer must match
    // what a single copy produces
    let querier = querier_with(
        0,
        vec![
            (
                "1",
                FakeIngester {
                    profiles: Some(profile_batch("x", 100, 5)),
                    ..Default::default()
                },
            ),
            (
                "2",
                FakeIngester {
                    profiles: Some(profile_batch("x", 100, 5)),
                    ..Default::default()
                },
            ),
            (
                "3",
                FakeIngester {
                    profiles: Some(profile_batch("x", 100, 5)),
                    ..Default::default()
                },
            ),
        ],
    );

    let flame = querier
        .select_merge_stacktraces(
            r#"{app="x"}"#.to_string(),
            "process_cpu:cpu:nanoseconds:cpu:nanoseconds",
            0,
            200,
        )
        .await
        .unwrap();

    assert_eq!(flame.num_ticks, 5);
    assert_eq!(flame.max_self, 5);
    assert_eq!(flame.names, vec!["total", "b", "a"]);
    assert_eq!(
        flame.levels,
        vec![vec![0, 5, 0, 0], vec![0, 5, 0, 1], vec![0, 5, 5, 2]]
    );
}

#[tokio::test]
async fn test_select_merge_combines_distinct_profiles() {
    let querier = querier_with(
        0,
        vec![
            (
                "1",
                FakeIngester {
                    profiles: Some(profile_batch("x", 100, 3)),
                    ..Default::default()
                },
            ),
            (
                "2",
                FakeIngester {
                    profiles: Some(profile_batch("x", 200, 4)),
                    ..Default::default()
                },
            ),
        ],
    );

    let flame = querier
        .select_merge_stacktraces(
            r#"{app="x"}"#.to_string(),
            "process_cpu:cpu:nanoseconds:cpu:nanoseconds",
            0,
            300,
        )
        .await
        .unwrap();

    // both rows survive dedup and fold into the same spine
    assert_eq!(flame.num_ticks, 7);
    assert_eq!(flame.levels[0], vec![0, 7, 0, 0]);
}

#[tokio::test]
async fn test_select_merge_rejects_bad_profile_type() {
    let querier = querier_with(
        0,
        vec![("1", FakeIngester::default())],
    );
    let err = querier
        .select_merge_stacktraces(r#"{app="x"}"#.to_string(), "not-a-type", 0, 100)
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_quorum_loss_surfaces_no_flamebearer() {
    // ring of three with one tolerated error; two ingesters down
    let querier = querier_with(
        1,
        vec![
            (
                "1",
                FakeIngester {
                    profiles: Some(profile_batch("x", 100, 5)),
                    ..Default::default()
                },
            ),
            (
                "2",
                FakeIngester {
                    fail: true,
                    ..Default::default()
                },
            ),
            (
                "3",
                FakeIngester {
                    fail: true,
                    ..Default::default()
                },
            ),
        ],
    );

    let err = querier
        .select_merge_stacktraces(
            r#"{app="x"}"#.to_string(),
            "process_cpu:cpu:nanoseconds:cpu:nanoseconds",
            0,
            200,
        )
        .await
        .unwrap_err();
    match err {
        QueryError::QuorumLost {
            succeeded,
            required,
        } => {
            assert!(succeeded <= 1);
            assert_eq!(required, 2);
        }
        other => panic!("expected QuorumLost, got {other}"),
    }
}

#[tokio::test]
async fn test_single_failure_within_budget_is_absorbed() {
    let querier = querier_with(
        1,
        vec![
            (
                "1",
                FakeIngester {
                    profiles: Some(profile_batch("x", 100, 5)),
                    ..Default::default()
                },
            ),
            (
                "2",
                FakeIngester {
                    profiles: Some(profile_batch("x", 100, 5)),
                    ..Default::default()
                },
            ),
            (
                "3",
                FakeIngester {
                    fail: true,
                    ..Default::default()
                },
            ),
        ],
    );

    let flame = querier
        .select_merge_stacktraces(
            r#"{app="x"}"#.to_string(),
            "process_cpu:cpu:nanoseconds:cpu:nanoseconds",
            0,
            200,
        )
        .await
        .unwrap();
    assert_eq!(flame.num_ticks, 5);
}
