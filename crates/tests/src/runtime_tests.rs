//! Runtime assembly from configuration, background tasks and shutdown.
//!
//! Tests that touch process environment variables are `#[serial]`.

use crate::mock_infrastructure::SolanaRpcMock;
use mockito::Matcher;
use serde_json::json;
use serial_test::serial;
use solgate_core::{
    config::{AppConfig, ConfigError, EndpointConfig},
    events::ManagerEvent,
    runtime::{RuntimeError, SolgateRuntime},
    types::Priority,
};
use std::time::Duration;
use tokio::time::timeout;

fn endpoint(name: &str, url: String, priority: u8) -> EndpointConfig {
    EndpointConfig {
        name: name.to_string(),
        url,
        url_env: None,
        priority,
        rate_limit_rps: 100,
        credential_env: None,
        credential_placement: "query:api-key".to_string(),
        signing_key_env: None,
        max_connections: None,
    }
}

#[tokio::test]
#[serial]
async fn test_runtime_resolves_credentials_from_env() {
    let mut rpc = SolanaRpcMock::new().await;
    let slot = rpc
        .result("getSlot", &json!(4242))
        .match_query(Matcher::UrlEncoded("api-key".to_string(), "from-env".to_string()))
        .expect(1)
        .create_async()
        .await;

    std::env::set_var("SOLGATE_TEST_HELIUS_KEY", "from-env");
    let config = AppConfig {
        endpoints: vec![EndpointConfig {
            credential_env: Some("SOLGATE_TEST_HELIUS_KEY".to_string()),
            ..endpoint("helius", rpc.url(), 9)
        }],
        ..AppConfig::default()
    };
    let runtime = SolgateRuntime::builder().with_config(config).build().unwrap();
    std::env::remove_var("SOLGATE_TEST_HELIUS_KEY");

    let value = runtime.manager().call("getSlot", json!([]), Priority::NORMAL).await.unwrap();
    assert_eq!(value, 4242);
    slot.assert_async().await;

    timeout(Duration::from_secs(5), runtime.shutdown()).await.expect("shutdown should finish");
    assert!(runtime.is_shutdown());
}

#[tokio::test]
#[serial]
async fn test_runtime_resolves_url_from_env() {
    let mut rpc = SolanaRpcMock::new().await;
    let _slot = rpc.result("getSlot", &json!(7)).create_async().await;

    std::env::set_var("SOLGATE_TEST_PRIVATE_URL", rpc.url());
    let config = AppConfig {
        endpoints: vec![EndpointConfig {
            url_env: Some("SOLGATE_TEST_PRIVATE_URL".to_string()),
            ..endpoint("private", String::new(), 7)
        }],
        ..AppConfig::default()
    };
    let runtime = SolgateRuntime::builder().with_config(config).build();
    std::env::remove_var("SOLGATE_TEST_PRIVATE_URL");
    let runtime = runtime.unwrap();

    assert_eq!(runtime.manager().call("getSlot", json!([]), Priority::NORMAL).await.unwrap(), 7);
    runtime.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_runtime_fails_on_missing_secret() {
    std::env::remove_var("SOLGATE_TEST_ABSENT_KEY");
    let config = AppConfig {
        endpoints: vec![EndpointConfig {
            credential_env: Some("SOLGATE_TEST_ABSENT_KEY".to_string()),
            ..endpoint("helius", "https://rpc.example.com".to_string(), 9)
        }],
        ..AppConfig::default()
    };

    let Err(err) = SolgateRuntime::builder().with_config(config).build() else {
        panic!("expected missing credential to fail the build");
    };
    assert!(matches!(err, RuntimeError::Config(ConfigError::MissingEnv { .. })), "{err:?}");
}

#[tokio::test]
async fn test_prober_feeds_endpoint_health() {
    let mut rpc = SolanaRpcMock::new().await;
    let probes = rpc.result("getSlot", &json!(1)).expect_at_least(1).create_async().await;

    let config = AppConfig {
        endpoints: vec![endpoint("primary", rpc.url(), 5)],
        probe_interval_ms: 50,
        ..AppConfig::default()
    };
    let runtime =
        SolgateRuntime::builder().with_config(config).enable_health_prober().build().unwrap();
    let mut events = runtime.manager().subscribe_events();

    let probe = timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await;
            if let Ok(ManagerEvent::ProbeCompleted { endpoint, success, .. }) = event {
                return (endpoint, success);
            }
        }
    })
    .await
    .expect("a probe should complete");
    assert_eq!(&*probe.0, "primary");
    assert!(probe.1);

    let prober = runtime.prober().unwrap();
    let results = prober.probe_all().await;
    assert_eq!(results.len(), 1);
    assert!(results[0].success);

    runtime.shutdown().await;
    probes.assert_async().await;
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_notifies_subscribers() {
    let config = AppConfig {
        endpoints: vec![endpoint("primary", "http://127.0.0.1:9".to_string(), 5)],
        ..AppConfig::default()
    };
    let runtime = SolgateRuntime::builder().with_config(config).build().unwrap();
    let mut first = runtime.shutdown_receiver();
    let mut second = runtime.shutdown_receiver();

    runtime.shutdown().await;
    runtime.shutdown().await;

    assert!(runtime.is_shutdown());
    assert!(timeout(Duration::from_secs(1), first.recv()).await.is_ok());
    assert!(timeout(Duration::from_secs(1), second.recv()).await.is_ok());
    timeout(Duration::from_secs(1), runtime.wait_for_shutdown()).await.expect("already shut down");
}
