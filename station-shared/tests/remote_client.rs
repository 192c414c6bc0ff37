use std::time::Duration;

use bytes::Bytes;
use serde_json::json;
use station_shared::remote::DEFAULT_TIMEOUT;
use station_shared::{
    ControlCommand, ControllerClient, DeploymentMode, InferenceClient, InferenceSettings, Payload,
    RemoteClient, RequestOptions, ResourceError,
};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn production_client(proxy: &MockServer) -> RemoteClient {
    RemoteClient::new(
        DeploymentMode::Production,
        &format!("{}/api/esp32", proxy.uri()),
        DEFAULT_TIMEOUT,
    )
}

fn address_of(server: &MockServer) -> String {
    server.address().to_string()
}

#[tokio::test]
async fn test_sensor_through_proxy() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/esp32/sensor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "distance": 8.0,
            "objectDetected": true,
            "objectStable": true,
            "threshold": 15.0
        })))
        .expect(1)
        .mount(&proxy)
        .await;

    let controller = ControllerClient::new(production_client(&proxy));
    let reading = controller.sensor().await.unwrap();
    assert!(reading.object_detected);
    assert_eq!(reading.distance, 8.0);
}

#[tokio::test]
async fn test_control_posts_command_body() {
    let proxy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/esp32/control"))
        .and(body_json(json!({"command": "plastic"})))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&proxy)
        .await;

    let controller = ControllerClient::new(production_client(&proxy));
    let payload = controller.control(ControlCommand::Plastic).await.unwrap();
    assert_eq!(payload, Payload::Text("OK".to_string()));
}

#[tokio::test]
async fn test_non_success_status_is_http_error() {
    let proxy = MockServer::start().await;
    Mock::given(path("/api/esp32/bins"))
        .respond_with(ResponseTemplate::new(503).set_body_string("sensor busy"))
        .mount(&proxy)
        .await;

    let controller = ControllerClient::new(production_client(&proxy));
    match controller.bins().await {
        Err(ResourceError::Http { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "sensor busy");
        }
        other => panic!("expected HTTP error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_declared_json_that_does_not_parse_is_decode_error() {
    let proxy = MockServer::start().await;
    Mock::given(path("/api/esp32/status"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("{not json", "application/json"),
        )
        .mount(&proxy)
        .await;

    let controller = ControllerClient::new(production_client(&proxy));
    let err = controller.status().await.unwrap_err();
    assert!(matches!(err, ResourceError::Decode(_)), "got {err:?}");
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let proxy = MockServer::start().await;
    Mock::given(path("/api/esp32/sensor"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&proxy)
        .await;

    let client = RemoteClient::new(
        DeploymentMode::Production,
        &format!("{}/api/esp32", proxy.uri()),
        Duration::from_millis(200),
    );
    let err = client
        .call("/sensor", &RequestOptions::get())
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_development_prefers_direct_address() {
    let device = MockServer::start().await;
    let proxy = MockServer::start().await;
    Mock::given(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("alive"))
        .expect(1)
        .mount(&device)
        .await;
    Mock::given(path("/api/esp32/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("via proxy"))
        .expect(0)
        .mount(&proxy)
        .await;

    let client = RemoteClient::new(
        DeploymentMode::Development,
        &format!("{}/api/esp32", proxy.uri()),
        DEFAULT_TIMEOUT,
    )
    .with_device_address(Some(address_of(&device)));

    let payload = client.call("/status", &RequestOptions::get()).await.unwrap();
    assert_eq!(payload, Payload::Text("alive".to_string()));
}

#[tokio::test]
async fn test_development_falls_back_to_proxy_once() {
    let device = MockServer::start().await;
    let proxy = MockServer::start().await;
    Mock::given(path("/status"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&device)
        .await;
    Mock::given(path("/api/esp32/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("via proxy"))
        .expect(1)
        .mount(&proxy)
        .await;

    let client = RemoteClient::new(
        DeploymentMode::Development,
        &format!("{}/api/esp32", proxy.uri()),
        DEFAULT_TIMEOUT,
    )
    .with_device_address(Some(address_of(&device)));

    let payload = client.call("/status", &RequestOptions::get()).await.unwrap();
    assert_eq!(payload, Payload::Text("via proxy".to_string()));
}

#[tokio::test]
async fn test_both_routes_failing_reports_combined_error() {
    let device = MockServer::start().await;
    let proxy = MockServer::start().await;
    Mock::given(path("/sensor"))
        .respond_with(ResponseTemplate::new(500).set_body_string("direct down"))
        .mount(&device)
        .await;
    Mock::given(path("/api/esp32/sensor"))
        .respond_with(ResponseTemplate::new(502).set_body_string("proxy down"))
        .mount(&proxy)
        .await;

    let client = RemoteClient::new(
        DeploymentMode::Development,
        &format!("{}/api/esp32", proxy.uri()),
        DEFAULT_TIMEOUT,
    )
    .with_device_address(Some(address_of(&device)));

    match client.call("/sensor", &RequestOptions::get()).await {
        Err(ResourceError::Fallback { direct, proxy }) => {
            assert_eq!(direct.status(), Some(500));
            assert_eq!(proxy.status(), Some(502));
        }
        other => panic!("expected combined error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_proxy_is_network_error() {
    // Nothing listens on the discard port
    let client = RemoteClient::new(
        DeploymentMode::Production,
        "http://127.0.0.1:9/api/esp32",
        Duration::from_secs(5),
    );
    let err = client
        .call("/sensor", &RequestOptions::get())
        .await
        .unwrap_err();
    assert!(
        matches!(err, ResourceError::Network(_) | ResourceError::Timeout),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_inference_upload_converts_boxes() {
    let model = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/waste-sorting/2"))
        .and(query_param("api_key", "k3y"))
        .and(query_param("confidence", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "predictions": [
                {
                    "class": "Plastic",
                    "confidence": 0.85,
                    "x": 50.0,
                    "y": 40.0,
                    "width": 20.0,
                    "height": 10.0
                }
            ]
        })))
        .expect(1)
        .mount(&model)
        .await;

    let remote = production_client(&model);
    let mut settings = InferenceSettings::new(&format!("{}/waste-sorting/2", model.uri()));
    settings.api_key = Some("k3y".to_string());
    let client = InferenceClient::new(remote, settings);

    let detections = client
        .detect(Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]))
        .await
        .unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].class, "Plastic");
    assert_eq!(detections[0].x, 40.0);
    assert_eq!(detections[0].y, 35.0);
}

#[tokio::test]
async fn test_inference_without_endpoint_is_not_configured() {
    let remote = RemoteClient::new(
        DeploymentMode::Production,
        "http://127.0.0.1:9/api/esp32",
        DEFAULT_TIMEOUT,
    );
    let client = InferenceClient::new(remote, InferenceSettings::new(""));
    let err = client.detect(Bytes::new()).await.unwrap_err();
    assert!(matches!(err, ResourceError::NotConfigured(_)));
}
