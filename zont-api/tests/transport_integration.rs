//! HTTP behaviour of the client against a local mock server.

use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use mockito::{Matcher, Server};
use serde_json::json;

use zont_api::prelude::*;
use zont_api::timeseries::extract_samples;

const DEVICES_OK: &str = r#"{"ok": true, "devices": [{"id": 42, "name": "home", "ip": "10.0.0.7"}]}"#;

fn config(server: &Server) -> ZontConfig {
    ZontConfig::new("zont-test", "secret-token")
        .with_endpoint(server.url())
        .with_backoff(Duration::from_millis(10), Duration::from_millis(50))
        .with_max_retries(3)
}

fn api(config: ZontConfig) -> ZontApi<ZontClient> {
    ZontApi::new(ZontClient::new(config).expect("client"))
}

#[tokio::test]
async fn test_sends_client_and_token_headers() {
    let mut server = Server::new_async().await;
    let devices = server
        .mock("POST", "/devices")
        .match_header("X-ZONT-Client", "zont-test")
        .match_header("X-ZONT-Token", "secret-token")
        .match_body(Matcher::Json(json!({"load_io": true})))
        .with_status(200)
        .with_body(DEVICES_OK)
        .create_async()
        .await;

    let found = api(config(&server)).devices().await.unwrap();

    devices.assert_async().await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), 42);
    assert_eq!(found[0].raw()["ip"], "***");
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let mut server = Server::new_async().await;
    let failing = server
        .mock("POST", "/devices")
        .with_status(503)
        .with_body("unavailable")
        .expect(2)
        .create_async()
        .await;
    let ok = server
        .mock("POST", "/devices")
        .with_status(200)
        .with_body(DEVICES_OK)
        .create_async()
        .await;

    let found = api(config(&server)).devices().await.unwrap();

    failing.assert_async().await;
    ok.assert_async().await;
    assert_eq!(found[0].name(), "home");
}

#[tokio::test]
async fn test_retries_exhausted() {
    let mut server = Server::new_async().await;
    let failing = server
        .mock("POST", "/devices")
        .with_status(502)
        .expect(3)
        .create_async()
        .await;

    let err = api(config(&server).with_max_retries(2))
        .devices()
        .await
        .unwrap_err();

    failing.assert_async().await;
    assert!(matches!(err, ZontError::RetriesExhausted { attempts: 3, .. }));
    assert_eq!(err.kind(), ErrorKind::Transient);
}

#[tokio::test]
async fn test_rate_limit_hint_is_honoured() {
    let mut server = Server::new_async().await;
    let limited = server
        .mock("POST", "/devices")
        .with_status(429)
        .with_header("Retry-After", "1")
        .expect(1)
        .create_async()
        .await;
    let ok = server
        .mock("POST", "/devices")
        .with_status(200)
        .with_body(DEVICES_OK)
        .create_async()
        .await;

    let start = Instant::now();
    api(config(&server)).devices().await.unwrap();

    limited.assert_async().await;
    ok.assert_async().await;
    assert!(start.elapsed() >= Duration::from_millis(950));
}

#[tokio::test]
async fn test_permanent_error_is_not_retried() {
    let mut server = Server::new_async().await;
    let rejected = server
        .mock("POST", "/devices")
        .with_status(400)
        .with_body(r#"{"ok": false, "error": "no_such_device"}"#)
        .expect(1)
        .create_async()
        .await;

    let err = api(config(&server)).devices().await.unwrap_err();

    rejected.assert_async().await;
    assert!(matches!(err, ZontError::NotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::Permanent);
}

#[tokio::test]
async fn test_malformed_body_is_permanent() {
    let mut server = Server::new_async().await;
    let garbage = server
        .mock("POST", "/devices")
        .with_status(200)
        .with_body("<html>maintenance</html>")
        .expect(1)
        .create_async()
        .await;

    let err = api(config(&server)).devices().await.unwrap_err();

    garbage.assert_async().await;
    assert!(matches!(err, ZontError::Serialization { .. }));
}

#[tokio::test]
async fn test_expired_token_is_refreshed_once() {
    let mut server = Server::new_async().await;
    let first_token = server
        .mock("POST", "/get_authtoken")
        .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
        .match_body(Matcher::Json(json!({"client_name": "zont-test"})))
        .with_status(200)
        .with_body(r#"{"ok": true, "token": "t1"}"#)
        .expect(1)
        .create_async()
        .await;
    let second_token = server
        .mock("POST", "/get_authtoken")
        .with_status(200)
        .with_body(r#"{"ok": true, "token": "t2"}"#)
        .expect(1)
        .create_async()
        .await;
    let expired = server
        .mock("POST", "/devices")
        .match_header("X-ZONT-Token", "t1")
        .with_status(401)
        .with_body(r#"{"ok": false, "error": "invalid_token"}"#)
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("POST", "/devices")
        .match_header("X-ZONT-Token", "t2")
        .with_status(200)
        .with_body(DEVICES_OK)
        .expect(1)
        .create_async()
        .await;

    let config = ZontConfig::with_login("zont-test", "user", "pass")
        .with_endpoint(server.url())
        .with_backoff(Duration::from_millis(10), Duration::from_millis(50));
    let found = api(config).devices().await.unwrap();

    first_token.assert_async().await;
    second_token.assert_async().await;
    expired.assert_async().await;
    accepted.assert_async().await;
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn test_token_endpoint_outage_is_retried() {
    let mut server = Server::new_async().await;
    let unavailable = server
        .mock("POST", "/get_authtoken")
        .with_status(503)
        .expect(1)
        .create_async()
        .await;
    let issued = server
        .mock("POST", "/get_authtoken")
        .with_status(200)
        .with_body(r#"{"ok": true, "token": "t1"}"#)
        .expect(1)
        .create_async()
        .await;
    let devices = server
        .mock("POST", "/devices")
        .match_header("X-ZONT-Token", "t1")
        .with_status(200)
        .with_body(DEVICES_OK)
        .expect(1)
        .create_async()
        .await;

    let config = ZontConfig::with_login("zont-test", "user", "pass")
        .with_endpoint(server.url())
        .with_backoff(Duration::from_millis(10), Duration::from_millis(50));
    let found = api(config).devices().await.unwrap();

    unavailable.assert_async().await;
    issued.assert_async().await;
    devices.assert_async().await;
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn test_token_endpoint_outage_exhausts_retries() {
    let mut server = Server::new_async().await;
    let unavailable = server
        .mock("POST", "/get_authtoken")
        .with_status(503)
        .expect(2)
        .create_async()
        .await;
    let devices = server
        .mock("POST", "/devices")
        .expect(0)
        .create_async()
        .await;

    let config = ZontConfig::with_login("zont-test", "user", "pass")
        .with_endpoint(server.url())
        .with_backoff(Duration::from_millis(10), Duration::from_millis(50))
        .with_max_retries(1);
    let err = api(config).devices().await.unwrap_err();

    unavailable.assert_async().await;
    devices.assert_async().await;
    assert!(matches!(err, ZontError::RetriesExhausted { attempts: 2, .. }));
    assert_eq!(err.kind(), ErrorKind::Transient);
}

#[tokio::test]
async fn test_rejected_token_after_refresh_is_authentication_error() {
    let mut server = Server::new_async().await;
    let rejected = server
        .mock("POST", "/devices")
        .with_status(401)
        .expect(2)
        .create_async()
        .await;

    let err = api(config(&server)).devices().await.unwrap_err();

    rejected.assert_async().await;
    assert!(matches!(err, ZontError::Authentication { .. }));
}

#[tokio::test]
async fn test_rate_budget_spaces_requests() {
    let mut server = Server::new_async().await;
    let devices = server
        .mock("POST", "/devices")
        .with_status(200)
        .with_body(DEVICES_OK)
        .expect(3)
        .create_async()
        .await;

    let api = api(config(&server).with_rate_limit(RateLimit::new(2, Duration::from_secs(1))));

    let start = Instant::now();
    for _ in 0..3 {
        api.devices().await.unwrap();
    }

    devices.assert_async().await;
    assert!(start.elapsed() >= Duration::from_millis(950));
}

#[tokio::test]
async fn test_load_data_sends_inclusive_maxtime() {
    let mut server = Server::new_async().await;
    let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();

    let load = server
        .mock("POST", "/load_data")
        .match_body(Matcher::PartialJson(json!({
            "requests": [{
                "device_id": 42,
                "mintime": from.timestamp(),
                "maxtime": to.timestamp() - 1,
            }]
        })))
        .with_status(200)
        .with_body(
            json!({
                "ok": true,
                "responses": [{
                    "ok": true,
                    "device_id": 42,
                    "time_truncated": false,
                    "timings": {"total": 0.1},
                    "z3k_temperature": {"4242": [[from.timestamp(), 21.5], [-60, 21.75]]}
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let response = api(config(&server))
        .load_data(42, &["z3k_temperature".to_string()], from, to)
        .await
        .unwrap();

    load.assert_async().await;
    assert!(!response.time_truncated());
    assert!(!response.data().contains_key("timings"));

    let samples = extract_samples(&response, false).unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].metric_id, "device_42.analog_temperature_sensor_4242");
    assert_eq!(samples[1].timestamp, from.timestamp() + 60);
    assert_eq!(samples[1].value, 21.75);
}
