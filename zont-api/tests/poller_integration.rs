use std::sync::Arc;
use std::time::Duration;

use mockito::Server;
use serde_json::json;

use zont_api::poller::{MetricKey, TickOutcome};
use zont_api::prelude::*;

fn devices_body(voltage: f64) -> String {
    json!({
        "ok": true,
        "devices": [{
            "id": 42,
            "name": "home",
            "z3k_config": {
                "analog_inputs": [{"id": 4545, "name": "Power"}],
                "boiler_adapters": [{"id": 4444, "name": "Boiler"}]
            },
            "io": {
                "z3k-state": {
                    "4545": {"voltage": voltage},
                    "4444": {"ot": {"bt": 61.5, "s": ["f"], "ff": {"c": 3}}}
                }
            }
        }]
    })
    .to_string()
}

#[tokio::test]
async fn test_poll_keeps_last_values_when_api_fails() {
    let mut server = Server::new_async().await;
    let healthy = server
        .mock("POST", "/devices")
        .with_status(200)
        .with_body(devices_body(23.8))
        .expect(1)
        .create_async()
        .await;
    let broken = server
        .mock("POST", "/devices")
        .with_status(503)
        .create_async()
        .await;

    let config = ZontConfig::new("zont-test", "token")
        .with_endpoint(server.url())
        .with_max_retries(0);
    let api = ZontApi::new(ZontClient::new(config.clone()).unwrap());
    let exporter = PollExporter::from_config(&config)
        .with_source(Arc::new(DeviceStateSource::for_device(api, 42)));
    let cache = exporter.cache();
    let voltage = MetricKey::new("zont_input_voltage", 42, "4545");

    assert_eq!(exporter.tick().await, TickOutcome { updated: 1, failed: 0 });
    healthy.assert_async().await;
    assert_eq!(cache.get(&voltage).unwrap().value, 23.8);
    assert_eq!(
        cache
            .get(&MetricKey::new("zont_boiler_error", 42, "4444"))
            .unwrap()
            .value,
        3.0
    );

    assert_eq!(exporter.tick().await, TickOutcome { updated: 0, failed: 1 });
    broken.assert_async().await;
    assert_eq!(*exporter.state().borrow(), PollState::FailedKeepStale);

    let kept = cache.get(&voltage).unwrap();
    assert_eq!(kept.value, 23.8);
    assert!(!kept.stale);
    assert!(cache.freshness() > Duration::from_secs(0));
}
