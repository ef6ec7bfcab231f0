//! OpenSearchClient against a loopback HTTP server that mimics the cluster
//! REST API.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::{json, Map};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tablesync_search::{
    Auth, BulkOperation, IndexSettings, OpenSearchClient, Refresh, SearchEngine, SearchError,
};

#[derive(Debug, Clone)]
struct Captured {
    method: Method,
    uri: String,
    authorization: Option<String>,
    content_type: Option<String>,
    body: String,
}

#[derive(Default)]
struct Cluster {
    indices: Mutex<HashSet<String>>,
    requests: Mutex<Vec<Captured>>,
    /// Status to answer the next request with, if set
    next_status: Mutex<Option<(StatusCode, Option<&'static str>)>>,
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

async fn handle(
    State(cluster): State<Arc<Cluster>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let text = String::from_utf8_lossy(&body).to_string();
    cluster.requests.lock().unwrap().push(Captured {
        method: method.clone(),
        uri: uri.to_string(),
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: text.clone(),
    });

    if let Some((status, retry_after)) = cluster.next_status.lock().unwrap().take() {
        let mut response = json_response(
            status,
            json!({"error": {"type": "cluster_block_exception", "reason": "secret value"}, "status": status.as_u16()}),
        );
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert("retry-after", secs.parse().unwrap());
        }
        return response;
    }

    let path = uri.path().trim_start_matches('/').to_string();
    match (method, path.as_str()) {
        (Method::GET, "") => json_response(StatusCode::OK, json!({"version": {"number": "2.11.0"}})),
        (Method::HEAD, index) => {
            if cluster.indices.lock().unwrap().contains(index) {
                StatusCode::OK.into_response()
            } else {
                StatusCode::NOT_FOUND.into_response()
            }
        }
        (Method::PUT, index) => {
            if !cluster.indices.lock().unwrap().insert(index.to_string()) {
                return json_response(
                    StatusCode::BAD_REQUEST,
                    json!({"error": {"type": "resource_already_exists_exception", "reason": "exists"}, "status": 400}),
                );
            }
            json_response(StatusCode::OK, json!({"acknowledged": true, "index": index}))
        }
        (Method::POST, "_bulk") => {
            let mut items = Vec::new();
            for line in text.lines() {
                let action: serde_json::Value = serde_json::from_str(line).unwrap();
                if let Some(meta) = action.get("index") {
                    items.push(json!({"index": {"_id": meta["_id"], "status": 201, "result": "created"}}));
                } else if let Some(meta) = action.get("delete") {
                    items.push(json!({"delete": {"_id": meta["_id"], "status": 404, "result": "not_found"}}));
                }
            }
            json_response(StatusCode::OK, json!({"took": 2, "errors": false, "items": items}))
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

async fn start_cluster() -> (Arc<Cluster>, String) {
    let cluster = Arc::new(Cluster::default());
    let app = Router::new().fallback(handle).with_state(cluster.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (cluster, format!("http://{addr}"))
}

fn client(endpoint: &str) -> OpenSearchClient {
    OpenSearchClient::builder()
        .endpoint(endpoint)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_ping_and_index_lifecycle() {
    let (cluster, endpoint) = start_cluster().await;
    let client = client(&endpoint);

    client.ping().await.unwrap();
    assert!(!client.index_exists("orders").await.unwrap());
    client
        .create_index("orders", &IndexSettings::default())
        .await
        .unwrap();
    assert!(client.index_exists("orders").await.unwrap());

    let err = client
        .create_index("orders", &IndexSettings::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::IndexAlreadyExists(_)));

    let requests = cluster.requests.lock().unwrap().clone();
    let put = requests.iter().find(|r| r.method == Method::PUT).unwrap();
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&put.body).unwrap(),
        json!({"settings": {"index.mapping.coerce": true}})
    );
    assert_eq!(put.content_type.as_deref(), Some("application/json"));
}

#[tokio::test]
async fn test_bulk_round_trip() {
    let (cluster, endpoint) = start_cluster().await;
    let client = client(&endpoint);

    let mut document = Map::new();
    document.insert("OrderId".into(), json!("A1"));
    let ops = [
        BulkOperation::Index {
            index: "orders".into(),
            id: "A1".into(),
            document,
        },
        BulkOperation::Delete {
            index: "orders".into(),
            id: "B2".into(),
        },
    ];

    let response = client.bulk(&ops, Refresh::WaitFor).await.unwrap();
    assert_eq!(response.took_ms, 2);
    assert_eq!(response.items.len(), 2);
    assert!(response.items[0].is_success());
    assert!(response.items[1].is_not_found());

    let requests = cluster.requests.lock().unwrap().clone();
    assert_eq!(requests[0].uri, "/_bulk?refresh=wait_for");
    assert_eq!(requests[0].content_type.as_deref(), Some("application/x-ndjson"));
    assert_eq!(requests[0].body.lines().count(), 3);
}

#[tokio::test]
async fn test_bulk_without_refresh_has_no_query() {
    let (cluster, endpoint) = start_cluster().await;
    let client = client(&endpoint);
    let ops = [BulkOperation::Delete {
        index: "orders".into(),
        id: "A1".into(),
    }];
    client.bulk(&ops, Refresh::False).await.unwrap();
    assert_eq!(cluster.requests.lock().unwrap()[0].uri, "/_bulk");

    // Empty batches never reach the cluster
    client.bulk(&[], Refresh::False).await.unwrap();
    assert_eq!(cluster.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_error_classification() {
    let (cluster, endpoint) = start_cluster().await;
    let client = client(&endpoint);

    *cluster.next_status.lock().unwrap() = Some((StatusCode::TOO_MANY_REQUESTS, Some("7")));
    let err = client.ping().await.unwrap_err();
    assert_eq!(
        err,
        SearchError::RateLimited {
            retry_after_secs: Some(7)
        }
    );

    *cluster.next_status.lock().unwrap() = Some((StatusCode::SERVICE_UNAVAILABLE, None));
    let ops = [BulkOperation::Delete {
        index: "o".into(),
        id: "1".into(),
    }];
    let err = client.bulk(&ops, Refresh::False).await.unwrap_err();
    assert!(err.is_retryable());

    *cluster.next_status.lock().unwrap() = Some((StatusCode::FORBIDDEN, None));
    assert!(client.index_exists("o").await.unwrap_err().is_auth());

    *cluster.next_status.lock().unwrap() = Some((StatusCode::BAD_REQUEST, None));
    let err = client
        .create_index("o", &IndexSettings::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SearchError::Rejected {
            status: 400,
            error_type: Some("cluster_block_exception".into())
        }
    );
    assert!(!err.to_string().contains("secret value"));
}

#[tokio::test]
async fn test_basic_auth_header() {
    let (cluster, endpoint) = start_cluster().await;
    let client = OpenSearchClient::builder()
        .endpoint(&endpoint)
        .auth(Auth::basic("admin", "pw"))
        .build()
        .unwrap();
    client.ping().await.unwrap();

    let auth = cluster.requests.lock().unwrap()[0].authorization.clone();
    // base64("admin:pw")
    assert_eq!(auth.as_deref(), Some("Basic YWRtaW46cHc="));
}

#[tokio::test]
async fn test_unreachable_cluster_is_retryable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{addr}")).ping().await.unwrap_err();
    assert!(err.is_retryable(), "unexpected error: {err:?}");
}
