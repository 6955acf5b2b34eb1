//! End-to-end runs of the federated analyser against in-memory gateways.

mod common;

use common::*;
use fedstat_core::constants::fields;
use fedstat_core::{
    AnalysisError, LifecycleStatus, ResultSource, RunPhase, RunRequest, StatisticKind,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn request(statistic: StatisticKind) -> RunRequest {
    RunRequest::new(statistic).with_query("SELECT value_as_number FROM measurement")
}

#[tokio::test]
async fn test_mean_across_two_sites() {
    let federation = FederationBuilder::new().build();
    federation.publish_json(
        federation.job_id(0),
        vec![moments_record(&[2.0, 4.0]), moments_record(&[6.0, 8.0])],
    );

    let run = federation
        .analyser
        .run(request(StatisticKind::Mean))
        .await
        .unwrap();

    assert_eq!(run.result.as_scalar(), Some(5.0));
    assert_eq!(run.result_count, 2);
    assert_eq!(run.sites_used, vec!["Nottingham", "Swansea"]);
    assert_eq!(run.job_id, Some(federation.job_id(0).to_string()));
    assert_eq!(run.source, ResultSource::Submitted);
}

#[tokio::test]
async fn test_result_count_excludes_undecodable_site() {
    let federation = FederationBuilder::new().build();
    federation.publish_json(
        federation.job_id(0),
        vec![json!({"n": 2, "total": 6}), json!({"garbage": true})],
    );

    let run = federation
        .analyser
        .run(request(StatisticKind::Mean))
        .await
        .unwrap();

    assert_eq!(run.result.as_scalar(), Some(3.0));
    assert_eq!(run.result_count, 1);
    assert_eq!(run.sites_used.len(), 2);

    let stored = federation
        .analyser
        .run_additional(StatisticKind::Mean)
        .unwrap();
    assert_eq!(stored.result_count, 1);
}

#[tokio::test]
async fn test_submission_describes_every_site() {
    let federation = FederationBuilder::new().build();
    federation.publish_json(
        federation.job_id(0),
        vec![moments_record(&[1.0, 2.0]), moments_record(&[3.0])],
    );

    federation
        .analyser
        .run(request(StatisticKind::Variance).with_task_name("variance of measurements"))
        .await
        .unwrap();

    let submissions = federation.gateway.submissions();
    assert_eq!(submissions.len(), 1);
    let (_, description, _) = &submissions[0];
    assert_eq!(description["name"], "variance of measurements");
    assert_eq!(description["tags"]["tres"], "Nottingham|Swansea");
    assert_eq!(description["tags"]["Project"], "federated-demo");
    assert_eq!(description["outputs"][0]["url"], format!("s3://{BUCKET}"));
    let command = description["executors"][0]["command"].to_string();
    assert!(command.contains("--analysis=variance"));
    assert!(command.contains("--output-format=json"));
}

#[tokio::test]
async fn test_variance_then_mean_from_stored_fields() {
    let federation = FederationBuilder::new().build();
    let site_a = [1.0, 2.0, 3.0];
    let site_b = [4.0, 10.0];
    federation.publish_json(
        federation.job_id(0),
        vec![moments_record(&site_a), moments_record(&site_b)],
    );

    let variance = federation
        .analyser
        .run(request(StatisticKind::Variance))
        .await
        .unwrap();
    let all: Vec<f64> = site_a.iter().chain(&site_b).copied().collect();
    let expected = sample_variance(&all);
    assert!((variance.result.as_scalar().unwrap() - expected).abs() < 1e-9);

    assert_eq!(
        federation.analyser.runnable_statistics(),
        vec![StatisticKind::Mean, StatisticKind::Variance]
    );

    let mean = federation
        .analyser
        .run(RunRequest::new(StatisticKind::Mean))
        .await
        .unwrap();
    assert_eq!(mean.result.as_scalar(), Some(4.0));
    assert_eq!(
        mean.source,
        ResultSource::Stored {
            from_run: variance.run_id
        }
    );
    assert_eq!(mean.job_id, variance.job_id);
    assert_eq!(federation.gateway.submissions().len(), 1);
}

#[tokio::test]
async fn test_pearson_is_incompatible_with_variance_fields() {
    let federation = FederationBuilder::new().build();
    federation.publish_json(
        federation.job_id(0),
        vec![moments_record(&[1.0, 2.0]), moments_record(&[3.0, 4.0])],
    );
    federation
        .analyser
        .run(request(StatisticKind::Variance))
        .await
        .unwrap();

    let err = federation
        .analyser
        .run_additional(StatisticKind::PearsonCorrelation)
        .unwrap_err();

    assert_eq!(err.phase, RunPhase::Compatibility);
    assert_eq!(err.statistic, StatisticKind::PearsonCorrelation);
    match err.source {
        AnalysisError::Incompatible {
            missing_fields,
            runnable,
            ..
        } => {
            assert_eq!(missing_fields, vec!["sum_x", "sum_y", "sum_xy", "sum_y2"]);
            assert_eq!(runnable, vec![StatisticKind::Mean, StatisticKind::Variance]);
        }
        other => panic!("expected an incompatibility, got {other:?}"),
    }
}

#[tokio::test]
async fn test_pearson_correlation_across_sites() {
    let federation = FederationBuilder::new().build();
    federation.publish_json(
        federation.job_id(0),
        vec![
            pearson_record(&[(1.0, 2.0)]),
            pearson_record(&[(2.0, 4.0), (3.0, 6.0)]),
        ],
    );

    let run = federation
        .analyser
        .run(request(StatisticKind::PearsonCorrelation))
        .await
        .unwrap();

    assert!((run.result.as_scalar().unwrap() - 0.5).abs() < 1e-12);
}

#[tokio::test]
async fn test_two_way_contingency_table_from_text() {
    let federation = FederationBuilder::new().with_output_format("csv").build();
    let columns = ["sex", "smoker"];
    federation.publish(
        federation.job_id(0),
        vec![
            table_csv(
                &columns,
                &[(vec!["F", "no"], 6), (vec!["F", "yes"], 4), (vec!["M", "no"], 5)],
            ),
            table_csv(
                &columns,
                &[
                    (vec!["F", "no"], 4),
                    (vec!["F", "yes"], 6),
                    (vec!["M", "no"], 5),
                    (vec!["M", "yes"], 10),
                ],
            ),
        ],
    );

    let run = federation
        .analyser
        .run(request(StatisticKind::ContingencyTable))
        .await
        .unwrap();
    let table = run.result.as_table().unwrap();

    assert_eq!(table.row_variable(), "sex");
    assert_eq!(table.row_labels(), ["F", "M"]);
    assert_eq!(table.column_labels(), ["no", "yes"]);
    assert_eq!(table.get("F", "no"), Some(10.0));
    assert_eq!(table.get("M", "yes"), Some(10.0));
    assert_eq!(table.total(), 40.0);

    let chi = table.chi_squared().unwrap();
    assert!(chi.statistic.abs() < 1e-12);
    assert_eq!(chi.degrees_of_freedom, 1);
    assert!((chi.p_value - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_three_way_contingency_table_is_sparse() {
    let federation = FederationBuilder::new().build();
    federation.publish_json(
        federation.job_id(0),
        vec![
            json!([
                {"sex": "F", "smoker": "no", "region": "north", "n": 3},
                {"sex": "M", "smoker": "yes", "region": "south", "n": 2}
            ]),
            json!([
                {"region": "north", "sex": "F", "smoker": "no", "n": 4}
            ]),
        ],
    );

    let run = federation
        .analyser
        .run(request(StatisticKind::ContingencyTable))
        .await
        .unwrap();
    let table = run.result.as_sparse_table().unwrap();

    assert_eq!(table.columns(), ["sex", "smoker", "region"]);
    assert_eq!(table.get(&["F", "no", "north"]), Some(7.0));
    assert_eq!(table.len(), 2);
    assert_eq!(table.total(), 9.0);
}

#[tokio::test]
async fn test_percentile_sketch_across_sites() {
    let federation = FederationBuilder::new().build();
    let low: Vec<f64> = (1..=50).map(f64::from).collect();
    let high: Vec<f64> = (51..=100).map(f64::from).collect();
    federation.publish_json(
        federation.job_id(0),
        vec![sketch_record(&high), sketch_record(&low)],
    );

    let run = federation
        .analyser
        .run(request(StatisticKind::PercentileSketch))
        .await
        .unwrap();
    let sketch = run.result.as_sketch().unwrap();

    assert_eq!(sketch.count(), 100.0);
    assert_eq!(sketch.min(), 1.0);
    assert_eq!(sketch.max(), 100.0);
    assert!((sketch.median() - 50.5).abs() <= 2.0);
    assert!((sketch.percentile(90.0).unwrap() - 90.0).abs() <= 3.0);
    assert!(sketch.quantile(1.5).is_err());
}

#[tokio::test]
async fn test_partial_result_status_still_collects() {
    let federation = FederationBuilder::new()
        .with_script(vec![LifecycleStatus::Running, LifecycleStatus::PartialResult])
        .build();
    federation.publish_json(
        federation.job_id(0),
        vec![moments_record(&[1.0]), moments_record(&[3.0])],
    );

    let run = federation
        .analyser
        .run(request(StatisticKind::Mean))
        .await
        .unwrap();
    assert_eq!(run.result.as_scalar(), Some(2.0));
    assert_eq!(federation.gateway.status_queries(), 2);
}

#[tokio::test]
async fn test_failed_job_surfaces_status() {
    let federation = FederationBuilder::new()
        .with_script(vec![LifecycleStatus::Queued, LifecycleStatus::Failed])
        .build();

    let err = federation
        .analyser
        .run(request(StatisticKind::Mean))
        .await
        .unwrap_err();

    assert_eq!(err.phase, RunPhase::Polling);
    assert_eq!(err.bucket.as_deref(), Some(BUCKET));
    assert!(matches!(
        err.source,
        AnalysisError::JobTerminated { status: 27, .. }
    ));
    assert_eq!(federation.store.requests(), 0);
}

#[tokio::test]
async fn test_failed_run_leaves_store_untouched() {
    let federation = FederationBuilder::new().build();
    federation.publish_json(
        federation.job_id(0),
        vec![moments_record(&[1.0, 5.0]), moments_record(&[3.0])],
    );
    federation
        .analyser
        .run(request(StatisticKind::Variance))
        .await
        .unwrap();

    // Second job: every site reports zero rows, so the mean is undefined
    federation.publish_json(
        federation.job_id(1),
        vec![moments_record(&[]), moments_record(&[])],
    );
    let err = federation
        .analyser
        .run(request(StatisticKind::Mean))
        .await
        .unwrap_err();

    assert_eq!(err.phase, RunPhase::Finalization);
    assert!(matches!(err.source, AnalysisError::Statistical { .. }));
    assert!(federation.analyser.last_aggregate(StatisticKind::Mean).is_none());
    assert_eq!(federation.analyser.stored_runs(), 1);
    assert_eq!(
        federation.analyser.stored_fields().scalar(fields::N),
        Some(3.0)
    );
}

#[tokio::test]
async fn test_single_observation_variance_fails_in_finalization() {
    let federation = FederationBuilder::new().build();
    federation.publish_json(
        federation.job_id(0),
        vec![moments_record(&[4.0]), moments_record(&[])],
    );

    let err = federation
        .analyser
        .run(request(StatisticKind::Variance))
        .await
        .unwrap_err();
    assert_eq!(err.phase, RunPhase::Finalization);
    assert_eq!(federation.analyser.stored_runs(), 0);
}

#[tokio::test]
async fn test_undecodable_results_fail_in_normalization() {
    let federation = FederationBuilder::new().with_output_format("csv").build();
    federation.publish(
        federation.job_id(0),
        vec!["no header here", "still nothing useful"],
    );

    let err = federation
        .analyser
        .run(request(StatisticKind::Mean))
        .await
        .unwrap_err();
    assert_eq!(err.phase, RunPhase::Normalization);
    assert!(matches!(err.source, AnalysisError::Encoding(_)));
}

#[tokio::test]
async fn test_missing_results_time_out() {
    let federation = FederationBuilder::new().with_timeout_ms(60).build();
    federation.publish_json(federation.job_id(0), vec![moments_record(&[1.0])]);

    let err = federation
        .analyser
        .run(request(StatisticKind::Mean))
        .await
        .unwrap_err();
    assert_eq!(err.phase, RunPhase::Polling);
    assert!(matches!(err.source, AnalysisError::PollTimeout { .. }));
}

#[tokio::test]
async fn test_cancelled_run_stops_polling() {
    let federation = FederationBuilder::new()
        .with_script(vec![LifecycleStatus::Running])
        .build();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = federation
        .analyser
        .run(request(StatisticKind::Mean).with_cancellation(cancel))
        .await
        .unwrap_err();
    assert_eq!(err.phase, RunPhase::Polling);
    assert!(matches!(err.source, AnalysisError::Cancelled { .. }));
}

#[tokio::test]
async fn test_missing_sites_fail_before_submission() {
    let federation = FederationBuilder::new().with_sites(&[]).build();

    let err = federation
        .analyser
        .run(request(StatisticKind::Mean))
        .await
        .unwrap_err();
    assert_eq!(err.phase, RunPhase::Setup);
    assert!(matches!(err.source, AnalysisError::Configuration(_)));
    assert!(federation.gateway.submissions().is_empty());
}

#[tokio::test]
async fn test_collect_results_of_earlier_job() {
    let federation = FederationBuilder::new().build();
    federation.publish_json(
        5000,
        vec![moments_record(&[10.0]), moments_record(&[20.0, 30.0])],
    );

    let run = federation
        .analyser
        .collect_results("5000", RunRequest::new(StatisticKind::Mean))
        .await
        .unwrap();

    assert_eq!(run.result.as_scalar(), Some(20.0));
    assert_eq!(run.source, ResultSource::Collected);
    assert_eq!(run.job_id.as_deref(), Some("5000"));
    assert!(federation.gateway.submissions().is_empty());
    assert_eq!(federation.gateway.status_queries(), 0);
    assert_eq!(
        federation.analyser.runnable_statistics(),
        vec![StatisticKind::Mean]
    );
}

#[tokio::test]
async fn test_collect_results_rejects_non_numeric_job_id() {
    let federation = FederationBuilder::new().build();

    let err = federation
        .analyser
        .collect_results("task-7f3a", RunRequest::new(StatisticKind::Mean))
        .await
        .unwrap_err();
    assert_eq!(err.phase, RunPhase::Setup);
    assert!(matches!(err.source, AnalysisError::InvalidJobId { .. }));
}
