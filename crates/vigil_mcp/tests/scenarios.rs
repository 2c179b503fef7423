//! Integration tests for the dispatcher-level scenarios named in spec.md §8
//! that don't require a live SIEM store: S4 (revocation), S5 (circuit
//! breaker), S6 (graceful degradation). S1-S3 exercise pure query/session/
//! correlation logic against a real SIEM store and are covered where that
//! logic lives instead (`vigil_query::optimizer`, `vigil_query::session_stream`
//! unit tests, `vigil_correlate::pipeline` unit tests) — see DESIGN.md.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use vigil_domain::Indicator;
use vigil_intel::{HttpThreatIntelSource, OrchestratorConfig, ThreatIntelOrchestrator, ThreatIntelSource};
use vigil_mcp::health::FeatureRequirement;
use vigil_mcp::registry::ToolHandler;
use vigil_mcp::session::Session;
use vigil_mcp::test_support::{build_dispatcher_fixture, EchoTool};
use vigil_mcp::tools::EnrichIndicatorTool;
use vigil_protocol::jsonrpc::{methods, JsonRpcRequest, RequestId, JSONRPC_VERSION};
use vigil_resilience::CircuitBreakerConfig;

fn request(id: i64, method: &str, params: Option<serde_json::Value>) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: Some(RequestId::Number(id)),
        method: method.to_string(),
        params,
    }
}

/// S4: creating a key, authenticating, then revoking it refuses the very
/// next request on that connection with -32033, without waiting out the
/// validation cache's TTL.
#[tokio::test]
async fn revoked_key_is_refused_on_the_next_request() {
    let fixture = build_dispatcher_fixture(vec![Arc::new(EchoTool::new("echo"))]);
    let key = fixture
        .secret_store
        .create("soc-analyst".into(), Default::default(), None, 6000)
        .await
        .unwrap();
    let session = Session::new("conn-s4");

    let auth = fixture
        .dispatcher
        .handle_request(&session, request(1, methods::AUTH, Some(json!({ "api_key": key.key_value }))))
        .await
        .unwrap();
    assert!(auth.error.is_none(), "authentication should succeed");

    let call = fixture
        .dispatcher
        .handle_request(&session, request(2, methods::TOOLS_CALL, Some(json!({ "name": "echo", "arguments": {} }))))
        .await
        .unwrap();
    assert!(call.error.is_none(), "call before revocation should succeed");

    fixture.key_cache.revoke(key.key_id, &key.key_value).await.unwrap();
    fixture.sessions.revoke_key(key.key_id);

    let after = fixture
        .dispatcher
        .handle_request(&session, request(3, methods::TOOLS_CALL, Some(json!({ "name": "echo", "arguments": {} }))))
        .await
        .unwrap();
    assert_eq!(after.error.unwrap().code, -32033);
}

/// S5: an unreachable threat-intel source fails its first
/// `failure_threshold` lookups individually, then its breaker trips and
/// every subsequent call to that source fails fast without an outbound
/// attempt — surfaced to the caller as `enrich_indicator` returning
/// `EnrichmentNoSource` every time (since this fixture has exactly one
/// configured source), with the diagnostic naming a tripped circuit once
/// open rather than a connection error.
#[tokio::test]
async fn unreachable_source_trips_its_breaker_after_threshold_failures() {
    let source: Arc<dyn ThreatIntelSource> =
        Arc::new(HttpThreatIntelSource::new("unreachable", "http://127.0.0.1:1", None, 1.0, 4, 6000));

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(vigil_cache::DualTierCache::open(dir.path(), 2, 100, Duration::from_secs(60)).unwrap());

    let breaker = CircuitBreakerConfig { failure_threshold: 5, cool_down: Duration::from_secs(30) };
    let orchestrator = Arc::new(ThreatIntelOrchestrator::new(
        vec![source],
        cache,
        OrchestratorConfig { per_source_timeout: Duration::from_secs(5), writeback: None, breaker },
    ));
    let tool = EnrichIndicatorTool::new(orchestrator.clone());

    let indicator = Indicator::Ipv4(std::net::Ipv4Addr::new(203, 0, 113, 10));
    let ctx = vigil_mcp::registry::ToolContext { cancellation: Default::default(), correlation_id: uuid::Uuid::new_v4() };

    for _ in 0..5 {
        let err = tool
            .call(json!({ "indicator": indicator.to_string() }), &ctx)
            .await
            .expect_err("unreachable source always fails");
        assert!(matches!(err, vigil_protocol::error::VigilError::EnrichmentNoSource { .. }));
    }

    assert_eq!(
        orchestrator.source_breaker_states(),
        vec![("unreachable".to_string(), vigil_resilience::BreakerState::Open)]
    );

    let sixth = tool.call(json!({ "indicator": indicator.to_string() }), &ctx).await.unwrap_err();
    match sixth {
        vigil_protocol::error::VigilError::EnrichmentNoSource { diagnostics } => {
            assert_eq!(diagnostics.len(), 1);
            assert!(diagnostics[0].contains("circuit open"), "got: {}", diagnostics[0]);
        }
        other => panic!("expected EnrichmentNoSource, got {other:?}"),
    }
}

/// S6: with `siem_store` marked unhealthy, the three tools that require it
/// disappear from `tools/list`, `get_data_dictionary`/`get_health_status`
/// (no feature dependency) remain, and calling an absent tool by name is
/// refused with -32031.
#[tokio::test]
async fn degraded_siem_store_hides_dependent_tools() {
    let tools: Vec<Arc<dyn vigil_mcp::registry::ToolHandler>> = vec![
        Arc::new(EchoTool::new("query_events")),
        Arc::new(EchoTool::new("get_data_dictionary")),
        Arc::new(EchoTool::new("get_health_status")),
    ];
    let fixture = build_dispatcher_fixture(tools);

    // Override the default `FeatureRequirement::none()` the fixture gave
    // every tool: only `query_events` actually needs the store.
    fixture.features.register_tool("query_events", FeatureRequirement::requires("siem_store"));

    struct AlwaysDown;
    #[async_trait::async_trait]
    impl vigil_mcp::health::HealthProbe for AlwaysDown {
        async fn probe(&self) -> Result<(), String> {
            Err("connection refused".into())
        }
    }
    fixture.features.register_dependency("siem_store", Arc::new(AlwaysDown));
    fixture.features.probe_once().await;

    let key = fixture
        .secret_store
        .create("soc-analyst".into(), Default::default(), None, 6000)
        .await
        .unwrap();
    let session = Session::new("conn-s6");
    let auth = fixture
        .dispatcher
        .handle_request(&session, request(1, methods::AUTH, Some(json!({ "api_key": key.key_value }))))
        .await
        .unwrap();
    assert!(auth.error.is_none());

    let list = fixture
        .dispatcher
        .handle_request(&session, request(2, methods::TOOLS_LIST, None))
        .await
        .unwrap();
    let names: Vec<String> = list.result.unwrap()["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert!(!names.contains(&"query_events".to_string()));
    assert!(names.contains(&"get_data_dictionary".to_string()));
    assert!(names.contains(&"get_health_status".to_string()));

    let call = fixture
        .dispatcher
        .handle_request(&session, request(3, methods::TOOLS_CALL, Some(json!({ "name": "query_events", "arguments": {} }))))
        .await
        .unwrap();
    assert_eq!(call.error.unwrap().code, -32031);
}
