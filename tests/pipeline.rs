//! End-to-end pipeline scenarios: request bracketing through normalization
//! and exclusion down to batched delivery.

use std::time::Duration;

use serde_json::json;
use traceline::export::in_memory::{InMemoryBatchExporter, InMemoryBatchExporterBuilder};
use traceline::trace::normalizers::PROCESS_REQUEST;
use traceline::{Config, Instrumenter};

fn agent() -> (Instrumenter, InMemoryBatchExporter) {
    let exporter = InMemoryBatchExporterBuilder::new().build();
    let instrumenter = Instrumenter::builder()
        .with_config(
            Config::builder()
                .with_flush_interval(Duration::from_secs(60))
                .build(),
        )
        .with_exporter(exporter.clone())
        .build();
    (instrumenter, exporter)
}

fn handle_request(instrumenter: &Instrumenter, action: &str) {
    instrumenter.trace("Rack", "app.rack.request", || {
        let payload = json!({
            "controller": "UsersController",
            "action": action,
            "format": "html",
            "method": "GET",
            "path": format!("/users/{action}"),
        });
        let event = instrumenter.start_event(PROCESS_REQUEST, &payload);
        instrumenter.instrument("app.inside", || {
            instrumenter.instrument("app.zomg", || {});
        });
        if let Some(event) = event {
            instrumenter.finish_event(event);
        }
    });
}

#[test]
fn one_request_yields_one_trace_with_nested_categories() {
    let (instrumenter, exporter) = agent();

    handle_request(&instrumenter, "index");
    instrumenter.force_flush().unwrap();

    let batches = exporter.get_exported_batches().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].endpoint, "UsersController#index");
    assert_eq!(batches[0].traces.len(), 1);

    let categories: Vec<_> = batches[0].traces[0]
        .spans()
        .iter()
        .map(|span| span.category())
        .collect();
    assert_eq!(
        categories,
        [
            "app.rack.request",
            "app.controller.request",
            "app.inside",
            "app.zomg"
        ]
    );
    assert_eq!(categories[0], "app.rack.request");
}

#[test]
fn two_requests_for_one_endpoint_flush_as_one_batch() {
    let (instrumenter, exporter) = agent();

    handle_request(&instrumenter, "index");
    handle_request(&instrumenter, "index");
    instrumenter.force_flush().unwrap();

    let batches = exporter.get_exported_batches().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].endpoint, "UsersController#index");
    assert_eq!(batches[0].traces.len(), 2);

    // the buffer drained: flushing again delivers nothing further
    instrumenter.force_flush().unwrap();
    assert_eq!(exporter.get_exported_batches().unwrap().len(), 1);
}

#[test]
fn excluded_actions_never_reach_the_trace() {
    let (instrumenter, exporter) = agent();
    instrumenter.exclude_endpoints(["UsersController#show"]);

    handle_request(&instrumenter, "show");
    instrumenter.force_flush().unwrap();

    let batches = exporter.get_exported_batches().unwrap();
    assert_eq!(batches.len(), 1);
    let trace = &batches[0].traces[0];

    // no controller span was recorded and no endpoint was assigned; the
    // trace groups under its default name
    assert_eq!(batches[0].endpoint, "Rack");
    assert_eq!(trace.endpoint(), None);
    assert!(trace
        .spans()
        .iter()
        .all(|span| span.category() != "app.controller.request"));
}

#[test]
fn traces_for_different_endpoints_flush_as_separate_batches() {
    let (instrumenter, exporter) = agent();

    handle_request(&instrumenter, "index");
    handle_request(&instrumenter, "show");
    instrumenter.force_flush().unwrap();

    let mut endpoints: Vec<_> = exporter
        .get_exported_batches()
        .unwrap()
        .iter()
        .map(|batch| batch.endpoint.clone())
        .collect();
    endpoints.sort();
    assert_eq!(endpoints, ["UsersController#index", "UsersController#show"]);
}

#[test]
fn completed_traces_carry_only_closed_spans() {
    let (instrumenter, exporter) = agent();

    handle_request(&instrumenter, "index");
    instrumenter.force_flush().unwrap();

    let batches = exporter.get_exported_batches().unwrap();
    for batch in &batches {
        for trace in &batch.traces {
            assert!(trace.ended_at().is_some());
            assert!(trace.spans().iter().all(|span| !span.is_open()));
        }
    }
}
