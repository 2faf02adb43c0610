//! End-to-end tests through the real HTTP client against a local mock
//! server: token exchange, then retrieve and deploy of queries.

use std::sync::Arc;

use mcsync::auth::{BusinessUnit, McCredentials, TokenClient};
use mcsync::client::ClientConfig;
use mcsync::metadata::{
    pipeline, MetadataItem, MetadataTypeMap, RetrieveFilter, SyncConfig, SyncContext, Tree, TypeRegistry,
    FOLDER_TYPE,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn item(value: Value) -> MetadataItem {
    value.as_object().unwrap().clone()
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v2/token"))
        .and(body_partial_json(json!({"account_id": "200"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-1",
            "token_type": "Bearer",
            "expires_in": 1079,
            "rest_instance_url": server.uri(),
            "soap_instance_url": server.uri(),
        })))
        .mount(server)
        .await;
}

async fn mount_query_list(server: &MockServer, items: Value) {
    Mock::given(method("GET"))
        .and(path("/automation/v1/queries"))
        .and(query_param("$page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": items.as_array().map_or(0, Vec::len),
            "page": 1,
            "pageSize": 500,
            "items": items,
        })))
        .mount(server)
        .await;
}

async fn connect(server: &MockServer, dir: &TempDir) -> SyncContext {
    let credentials = McCredentials::new("client", "secret", server.uri(), "100").unwrap();
    let token = TokenClient::new(credentials).authenticate(Some("200")).await.unwrap();
    let client = token
        .client(ClientConfig::builder().without_retry().build())
        .unwrap();
    SyncContext::new(
        Arc::new(client),
        BusinessUnit::new("cred", "Child", "200", "100"),
        SyncConfig::rooted(dir.path()),
    )
    .unwrap()
}

fn cache_references(ctx: &SyncContext) {
    let mut folders = MetadataTypeMap::new();
    folders.insert("f1".into(), item(json!({"CustomerKey": "f1", "ID": 1, "Path": "Query"})));
    ctx.cache.set_metadata(ctx.scope(), FOLDER_TYPE, folders);

    let mut targets = MetadataTypeMap::new();
    targets.insert(
        "de1".into(),
        item(json!({"CustomerKey": "de1", "ObjectID": "abc", "Name": "Orders"})),
    );
    ctx.cache.set_metadata(ctx.scope(), "dataExtension", targets);
}

#[tokio::test]
async fn test_retrieve_over_http() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_query_list(
        &server,
        json!([{
            "queryDefinitionId": "id-1",
            "key": "q1",
            "name": "Daily orders",
            "queryText": "SELECT Id FROM Orders",
            "targetKey": "de1",
            "categoryId": 1,
        }]),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let ctx = connect(&server, &dir).await;
    cache_references(&ctx);
    let registry = TypeRegistry::standard();
    let query = registry.require("query").unwrap();

    let items = pipeline::retrieve(&ctx, query.as_ref(), None, &RetrieveFilter::new())
        .await
        .unwrap();
    assert_eq!(items["q1"]["r__folder_Path"], "Query");

    let json_path = ctx.store.meta_path(Tree::Retrieve, &ctx.bu, "query", "q1");
    let saved: Value = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert!(saved.get("queryText").is_none());
    let sql = std::fs::read_to_string(json_path.with_extension("sql")).unwrap();
    assert_eq!(sql, "SELECT Id FROM Orders");
}

#[tokio::test]
async fn test_upsert_over_http_creates_and_updates() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_query_list(
        &server,
        json!([{
            "queryDefinitionId": "id-1",
            "key": "q1",
            "name": "Daily orders",
            "queryText": "SELECT Id FROM Orders",
            "targetKey": "de1",
            "targetUpdateTypeName": "Overwrite",
            "categoryId": 1,
        }]),
    )
    .await;
    Mock::given(method("PATCH"))
        .and(path("/automation/v1/queries/id-1"))
        .and(body_partial_json(json!({"queryText": "SELECT Id, Total FROM Orders", "targetId": "abc"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"queryDefinitionId": "id-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/automation/v1/queries"))
        .and(body_partial_json(json!({"key": "q2", "categoryId": 1})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"queryDefinitionId": "id-2"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let ctx = connect(&server, &dir).await;
    cache_references(&ctx);
    let registry = TypeRegistry::standard();
    let query = registry.require("query").unwrap();

    let mut local = MetadataTypeMap::new();
    for (key, sql) in [("q1", "SELECT Id, Total FROM Orders"), ("q2", "SELECT Id FROM Returns")] {
        local.insert(
            key.into(),
            item(json!({
                "key": key,
                "name": key,
                "queryText": sql,
                "targetKey": "de1",
                "targetUpdateTypeName": "Overwrite",
                "r__folder_Path": "Query",
            })),
        );
    }

    let report = pipeline::upsert(&ctx, query.as_ref(), local).await.unwrap();
    assert!(!report.has_errors(), "{:?}", report.failed);
    assert_eq!(report.updated.keys().collect::<Vec<_>>(), ["q1"]);
    assert_eq!(report.created["q2"]["queryDefinitionId"], "id-2");
    assert!(ctx.cache.get_item(ctx.scope(), "query", "q2").is_some());
}

#[tokio::test]
async fn test_server_error_is_an_item_failure() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_query_list(&server, json!([])).await;
    Mock::given(method("POST"))
        .and(path("/automation/v1/queries"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "message": "Query text is invalid",
            "errorcode": 10000,
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let ctx = connect(&server, &dir).await;
    cache_references(&ctx);
    let registry = TypeRegistry::standard();
    let query = registry.require("query").unwrap();

    let mut local = MetadataTypeMap::new();
    local.insert(
        "bad".into(),
        item(json!({"key": "bad", "name": "bad", "queryText": "SELEC", "targetKey": "de1", "r__folder_Path": "Query"})),
    );

    let report = pipeline::upsert(&ctx, query.as_ref(), local).await.unwrap();
    assert!(report.created.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].key, "bad");
    assert!(report.failed[0].messages.iter().any(|m| m.contains("Query text is invalid")));
}

#[tokio::test]
async fn test_rejected_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "Client authentication failed.",
        })))
        .mount(&server)
        .await;

    let credentials = McCredentials::new("client", "wrong", server.uri(), "100").unwrap();
    let err = TokenClient::new(credentials).authenticate(None).await.unwrap_err();
    assert!(err.to_string().contains("invalid_client"));
}
