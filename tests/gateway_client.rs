//! Authenticated requests, retry policy and entity operations against a mock gateway

mod common;

use common::*;
use reqwest::Method;
use sap_odata_mcp::odata::{QueryOptions, RequestBody, RequestOptions};
use sap_odata_mcp::{ConnectionConfig, SapError};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use wiremock::matchers::{body_json, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SERVICE: &str = "/sap/Z_SALES_ORDER_SRV";
const ORDERS: &str = "/sap/opu/odata/sap/Z_SALES_ORDER_SRV/OrderSet";

#[tokio::test]
async fn test_authenticate_reports_success() {
    let server = MockServer::start().await;
    mount_handshake(&server, 1).await;

    let client = client(&server, 3);
    assert!(client.authenticate().await);
    assert!(client.authenticator().has_valid_token());
}

#[tokio::test]
async fn test_authenticate_reports_failure_without_caching() {
    let server = MockServer::start().await;
    csrf_fetch().mount(&server).await;
    session_validation(401).mount(&server).await;

    let client = client(&server, 3);
    assert!(!client.authenticate().await);
    assert!(!client.authenticator().has_valid_token());
}

#[tokio::test]
async fn test_request_carries_session_headers() {
    let server = MockServer::start().await;
    mount_handshake(&server, 1).await;
    Mock::given(method("GET"))
        .and(path(ORDERS))
        .and(header("x-csrf-token", CSRF_TOKEN))
        .and(header("authorization", BASIC_AUTH))
        .and(header("cookie", SESSION_COOKIE))
        .and(query_param("sap-client", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, 3);
    let body = client
        .make_request(
            Method::GET,
            &odata_url(&server, &format!("{}/OrderSet", SERVICE)),
            &RequestOptions::default(),
        )
        .await
        .expect("response");
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_401_refreshes_session_and_retries() {
    let server = MockServer::start().await;
    mount_handshake(&server, 2).await;
    Mock::given(method("GET"))
        .and(path(ORDERS))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ORDERS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"d": {"results": []}})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, 3);
    let data = client
        .query_entity_set(SERVICE, "OrderSet", &QueryOptions::default())
        .await
        .expect("query after refresh");

    assert_eq!(data, json!({"d": {"results": []}}));
    assert_eq!(client.authenticator().handshake_count(), 2);
}

#[tokio::test]
async fn test_repeated_401_exhausts_budget() {
    let server = MockServer::start().await;
    mount_handshake(&server, 2).await;
    Mock::given(method("GET"))
        .and(path(ORDERS))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server, 2);
    let err = client
        .query_entity_set(SERVICE, "OrderSet", &QueryOptions::default())
        .await
        .unwrap_err();

    match err {
        SapError::Request { message, status_code, method, .. } => {
            assert!(message.contains("Max retry attempts (2)"));
            assert_eq!(status_code, None);
            assert_eq!(method.as_deref(), Some("GET"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_error_status_is_not_retried() {
    let server = MockServer::start().await;
    mount_handshake(&server, 1).await;
    Mock::given(method("GET"))
        .and(path(ORDERS))
        .respond_with(ResponseTemplate::new(404).set_body_string("Resource not found"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, 3);
    let err = client
        .query_entity_set(SERVICE, "OrderSet", &QueryOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(404));
    assert!(err.to_string().contains("Resource not found"));
}

#[tokio::test]
async fn test_handshake_failure_surfaces_as_authentication_error() {
    let server = MockServer::start().await;
    csrf_fetch().mount(&server).await;
    session_validation(403).mount(&server).await;

    let client = client(&server, 3);
    let err = client
        .query_entity_set(SERVICE, "OrderSet", &QueryOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SapError::Authentication { .. }));
    assert!(err.to_string().contains("Failed to get authentication token"));
    assert_eq!(err.status_code(), Some(403));
}

/// Accepts connections and closes them without answering
async fn closing_listener() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("http://{}/closed", listener.local_addr().expect("local addr"));
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });
    (url, accepted)
}

#[tokio::test]
async fn test_transport_errors_back_off_between_attempts_only() {
    let server = MockServer::start().await;
    csrf_fetch().mount(&server).await;
    session_validation(200).mount(&server).await;

    let unit = Duration::from_millis(100);
    // (attempt budget, backoff units slept before giving up)
    for (budget, slept_units) in [(1u32, 0u32), (2, 1), (3, 3)] {
        let (url, accepted) = closing_listener().await;
        let address = server.address();
        let config = ConnectionConfig::builder(address.ip().to_string(), "user", "secret")
            .port(address.port())
            .use_https(false)
            .retry_attempts(budget)
            .timeout(Duration::from_secs(5))
            .backoff_unit(unit)
            .build()
            .expect("config");
        let client = client_with(config);
        assert!(client.authenticate().await);

        let started = Instant::now();
        let err = client
            .make_request(Method::GET, &url, &RequestOptions::default())
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, SapError::Connection(_)), "budget {}: {:?}", budget, err);
        assert_eq!(accepted.load(Ordering::SeqCst), budget as usize);

        let expected = unit * slept_units;
        // Sleeping after the last attempt would add unit * 2^(budget - 1)
        let after_last = unit * (1u32 << (budget - 1));
        assert!(elapsed >= expected, "budget {}: {:?}", budget, elapsed);
        assert!(elapsed < expected + after_last, "budget {}: {:?}", budget, elapsed);
    }
}

#[tokio::test]
async fn test_unreachable_host_is_connection_error() {
    let server = MockServer::start().await;
    mount_handshake(&server, 1).await;

    // Nothing listens on port 1
    let err = client(&server, 2)
        .make_request(Method::GET, "http://127.0.0.1:1/unreachable", &RequestOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SapError::Connection(_)));
}

#[tokio::test]
async fn test_timeout_is_not_retried() {
    let server = MockServer::start().await;
    mount_handshake(&server, 1).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    Mock::given(method("GET"))
        .and(path(ORDERS))
        .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
            // First call stalls past the client timeout
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(200).set_delay(Duration::from_secs(2))
            } else {
                ResponseTemplate::new(200).set_body_json(json!({"d": {"results": []}}))
            }
        })
        .mount(&server)
        .await;

    let address = server.address();
    let config = ConnectionConfig::builder(address.ip().to_string(), "user", "secret")
        .port(address.port())
        .use_https(false)
        .timeout(Duration::from_millis(300))
        .backoff_unit(Duration::from_millis(1))
        .build()
        .expect("config");
    let client = client_with(config);

    // Timeouts are not retried
    let err = client
        .query_entity_set(SERVICE, "OrderSet", &QueryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SapError::Timeout(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let data = client
        .query_entity_set(SERVICE, "OrderSet", &QueryOptions::default())
        .await
        .expect("second query");
    assert_eq!(data["d"]["results"], json!([]));
}

#[tokio::test]
async fn test_query_builds_odata_parameters() {
    let server = MockServer::start().await;
    mount_handshake(&server, 1).await;
    Mock::given(method("GET"))
        .and(path(ORDERS))
        .and(query_param("$filter", "Status eq 'OPEN' and Amount eq 100"))
        .and(query_param("$select", "OrderID,Status"))
        .and(query_param("$top", "5"))
        .and(query_param("$skip", "10"))
        .and(query_param("$format", "json"))
        .and(query_param("sap-client", "100"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"d": {"results": [{"OrderID": "1"}]}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut filters = serde_json::Map::new();
    filters.insert("Status".into(), json!("OPEN"));
    filters.insert("Amount".into(), json!(100));
    let options = QueryOptions {
        filters: Some(filters),
        select: Some(vec!["OrderID".into(), "Status".into()]),
        top: Some(5),
        skip: Some(10),
        ..Default::default()
    };

    let data = client(&server, 3)
        .query_entity_set(SERVICE, "OrderSet", &options)
        .await
        .expect("query");
    assert_eq!(data["d"]["results"][0]["OrderID"], "1");
}

#[tokio::test]
async fn test_get_entity_uses_quoted_key() {
    let server = MockServer::start().await;
    mount_handshake(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/sap/opu/odata/sap/Z_SALES_ORDER_SRV/OrderSet('91000092')"))
        .and(query_param("$select", "OrderID"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"d": {"OrderID": "91000092"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let select = vec!["OrderID".to_string()];
    let data = client(&server, 3)
        .get_entity(SERVICE, "OrderSet", "91000092", Some(&select))
        .await
        .expect("entity");
    assert_eq!(data["d"]["OrderID"], "91000092");
}

#[tokio::test]
async fn test_create_update_delete() {
    let server = MockServer::start().await;
    mount_handshake(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(ORDERS))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"OrderID": "2"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/sap/opu/odata/sap/Z_SALES_ORDER_SRV/OrderSet('2')"))
        .and(body_json(json!({"Status": "DONE"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/sap/opu/odata/sap/Z_SALES_ORDER_SRV/OrderSet('2')"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, 3);

    let created = client
        .create_entity(SERVICE, "OrderSet", json!({"OrderID": "2"}))
        .await
        .expect("create");
    assert_eq!(created, json!({"status": "created"}));

    let updated = client
        .update_entity(SERVICE, "OrderSet", "2", json!({"Status": "DONE"}))
        .await
        .expect("update");
    assert_eq!(updated, json!({"status": "updated"}));

    client
        .delete_entity(SERVICE, "OrderSet", "2")
        .await
        .expect("delete");
}

#[tokio::test]
async fn test_service_metadata_is_parsed() {
    let server = MockServer::start().await;
    mount_handshake(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/sap/opu/odata/sap/Z_SALES_ORDER_SRV/$metadata"))
        .and(header("accept", "application/xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<edmx:Edmx Version="1.0"><edmx:DataServices><Schema Namespace="Z"><EntityType Name="Order"><Key><PropertyRef Name="OrderID"/></Key><Property Name="OrderID"/></EntityType></Schema></edmx:DataServices></edmx:Edmx>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let metadata = client(&server, 3)
        .get_service_metadata(SERVICE)
        .await
        .expect("metadata");

    let entity = &metadata["edmx:Edmx"]["edmx:DataServices"]["Schema"]["EntityType"];
    assert_eq!(entity["@Name"], "Order");
    assert_eq!(entity["Key"]["PropertyRef"]["@Name"], "OrderID");
}

#[tokio::test]
async fn test_list_services_from_catalog() {
    let server = MockServer::start().await;
    // The catalog shares its path with the token fetch; the data call has no Fetch header
    mount_handshake(&server, 1).await;
    Mock::given(method("GET"))
        .and(path(CSRF_PATH))
        .and(header("x-csrf-token", CSRF_TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "d": {"results": [
                {
                    "ID": "Z_SALES_ORDER_SRV_0001",
                    "Title": "Z_SALES_ORDER_SRV",
                    "Version": "0001",
                    "TechnicalServiceName": "Z_SALES_ORDER_SRV"
                }
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let services = client(&server, 3).list_services().await.expect("services");
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].id.as_deref(), Some("Z_SALES_ORDER_SRV_0001"));
    assert_eq!(services[0].technical_name.as_deref(), Some("Z_SALES_ORDER_SRV"));

    let row = serde_json::to_value(&services[0]).unwrap();
    assert_eq!(row["url"], "Z_SALES_ORDER_SRV");
}

#[tokio::test]
async fn test_service_custom_headers_are_sent() {
    let server = MockServer::start().await;
    mount_handshake(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/sap/opu/odata/sap/Z_HDR_SRV/ItemSet"))
        .and(header("sap-language", "DE"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .expect(1)
        .mount(&server)
        .await;

    let services = sap_odata_mcp::ServicesConfig::from_yaml_str(
        "services:\n  - id: Z_HDR_SRV\n    name: Headers\n    path: /sap/Z_HDR_SRV\n    custom_headers:\n      sap-language: DE\n",
    )
    .expect("services");
    let client = sap_odata_mcp::SapClient::from_config(Arc::new(connection(&server, 3)), &services)
        .expect("client");

    let data = client
        .query_entity_set("/sap/Z_HDR_SRV", "ItemSet", &QueryOptions::default())
        .await
        .expect("query");
    assert_eq!(data, json!({"value": []}));
}

#[tokio::test]
async fn test_raw_request_returns_live_response() {
    let server = MockServer::start().await;
    mount_handshake(&server, 1).await;
    Mock::given(method("GET"))
        .and(path(ORDERS))
        .and(header("accept", "text/csv"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/csv")
                .set_body_string("OrderID\n1\n"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server, 3)
        .make_request_raw(
            Method::GET,
            &odata_url(&server, "/sap/Z_SALES_ORDER_SRV/OrderSet"),
            &RequestOptions::accept("text/csv"),
        )
        .await
        .expect("response");

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.expect("body"), "OrderID\n1\n");
}

#[tokio::test]
async fn test_text_body_defaults_to_plain_content_type() {
    let server = MockServer::start().await;
    mount_handshake(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(ORDERS))
        .and(header("content-type", "text/plain; charset=utf-8"))
        .and(body_string("hello"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(ORDERS))
        .and(header("content-type", "application/atom+xml"))
        .and(body_string("<entry/>"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, 3);
    let url = odata_url(&server, "/sap/Z_SALES_ORDER_SRV/OrderSet");

    let plain = RequestOptions {
        body: Some(RequestBody::Text("hello".into())),
        ..Default::default()
    };
    client.make_request(Method::POST, &url, &plain).await.expect("plain text");

    let atom = RequestOptions {
        headers: vec![("Content-Type".into(), "application/atom+xml".into())],
        body: Some(RequestBody::Text("<entry/>".into())),
        ..Default::default()
    };
    client.make_request(Method::PUT, &url, &atom).await.expect("caller content type");
}
