use assert_matches::assert_matches;
use datapoints_sdk::{
    Client, ClientConfig, DatapointsResult, ErrorKind, QueryParams, SyntheticQuery, Transport,
};
use mockito::Matcher;
use serde_json::json;
use std::time::Duration;

const LIST_PATH: &str = "/api/v1/projects/test-project/timeseries/data/list";

fn client_for(server: &mockito::ServerGuard) -> Client {
    let config = ClientConfig::new(server.url(), "test-project")
        .unwrap()
        .with_api_key("secret")
        .with_max_retries(2)
        .with_backoff(Duration::from_millis(1), Duration::from_millis(5));
    Client::new(config).unwrap()
}

fn page(id: i64, timestamps: impl Iterator<Item = i64>) -> String {
    let points: Vec<_> = timestamps.map(|t| json!({"timestamp": t, "value": 1.5})).collect();
    json!({"items": [{"id": id, "isString": false, "isStep": false, "datapoints": points}]}).to_string()
}

#[tokio::test]
async fn test_raw_retrieve_paginates_over_http() {
    let mut server = mockito::Server::new_async().await;

    let first = server
        .mock("POST", LIST_PATH)
        .match_header("api-key", "secret")
        .match_header("x-request-id", Matcher::Regex("^[0-9a-f-]{36}$".to_string()))
        .match_body(Matcher::PartialJson(json!({"items": [{"id": 7, "start": 0, "limit": 100000}]})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(page(7, 0..100_000))
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("POST", LIST_PATH)
        .match_body(Matcher::PartialJson(json!({"items": [{"id": 7, "start": 100000, "limit": 20000}]})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(page(7, 100_000..120_000))
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let defaults = QueryParams::new().with_start(0).with_end(10_000_000).with_limit(120_000);
    let dps = client
        .datapoints()
        .retrieve_id(7, &defaults)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(dps.len(), 120_000);
    assert_eq!(dps.start_time(), Some(0));
    assert_eq!(dps.end_time(), Some(119_999));
    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let mut server = mockito::Server::new_async().await;

    let unavailable = server
        .mock("POST", LIST_PATH)
        .with_status(503)
        .with_body("try again")
        .expect(1)
        .create_async()
        .await;
    let ok = server
        .mock("POST", LIST_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(page(1, 0..3))
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let result = client
        .datapoints()
        .retrieve_json(Some(&json!([1])), None, &QueryParams::new().with_end(1_000))
        .await
        .unwrap();

    assert_matches!(&result, DatapointsResult::List(list) if list.len() == 1);
    unavailable.assert_async().await;
    ok.assert_async().await;
}

#[tokio::test]
async fn test_status_codes_map_to_error_kinds() {
    let mut server = mockito::Server::new_async().await;
    let body = json!({"items": []});

    let _unauthorized = server
        .mock("POST", "/api/v1/projects/test-project/unauthorized")
        .with_status(401)
        .create_async()
        .await;
    let _bad_request = server
        .mock("POST", "/api/v1/projects/test-project/bad")
        .with_status(400)
        .with_body("{\"error\": \"bad item\"}")
        .create_async()
        .await;
    let exhausted = server
        .mock("POST", "/api/v1/projects/test-project/down")
        .with_status(500)
        .with_body("down")
        .expect(3)
        .create_async()
        .await;

    let client = client_for(&server);
    assert_matches!(
        client.post("/unauthorized", &body).await.unwrap_err().kind,
        ErrorKind::Authentication { .. }
    );
    assert_matches!(
        client.post("/bad", &body).await.unwrap_err().kind,
        ErrorKind::Validation { .. }
    );
    assert_matches!(
        client.post("/down", &body).await.unwrap_err().kind,
        ErrorKind::Network { status_code: Some(500), .. }
    );
    // One initial attempt plus two retries
    exhausted.assert_async().await;
}

#[tokio::test]
async fn test_validation_errors_send_no_requests() {
    let mut server = mockito::Server::new_async().await;
    let never = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client
        .datapoints()
        .retrieve_json(
            Some(&json!([{"id": 1, "granularity": "1h"}])),
            None,
            &QueryParams::new(),
        )
        .await
        .unwrap_err();

    assert_matches!(err.kind, ErrorKind::MissingAggregates);
    assert!(err.is_validation());
    never.assert_async().await;
}

#[tokio::test]
async fn test_synthetic_query_over_http() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/projects/test-project/timeseries/synthetic/query")
        .match_body(Matcher::PartialJson(json!({
            "items": [{"expression": "ts{externalId:'a'} * 2", "start": 0, "end": 500, "limit": 3}]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"items": [{"isString": false, "datapoints": [
                {"timestamp": 0, "value": 2.0},
                {"timestamp": 10, "value": 4.0},
                {"timestamp": 20, "error": "division by zero"}
            ]}]})
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let query = SyntheticQuery::new("A * 2", 0, 500)
        .with_variable("A", datapoints_sdk::Identifier::ExternalId("a".into()))
        .with_limit(3);
    let dps = client.synthetic().query_single(&query).await.unwrap();

    assert_eq!(dps.len(), 3);
    assert_eq!(dps.datapoints[2].error.as_deref(), Some("division by zero"));
    mock.assert_async().await;
}
