//! End-to-end behavior of the upstream request cache against a mock API.

use backlog::cache::TtlCache;
use backlog::clock::ManualClock;
use backlog::upstream::{TokenCache, UpstreamApi, UpstreamError};
use serde::Deserialize;
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const T0: i64 = 1_700_000_000_000;

#[derive(Debug, PartialEq, Deserialize)]
struct Game {
    id: u64,
    name: String,
}

struct Harness {
    server: MockServer,
    clock: Arc<ManualClock>,
    api: UpstreamApi,
}

fn build_api(
    server_uri: &str,
    clock: &Arc<ManualClock>,
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> UpstreamApi {
    let http = reqwest::Client::new();
    let tokens = TokenCache::new(
        http.clone(),
        format!("{server_uri}/oauth2/token"),
        client_id.map(str::to_owned),
        client_secret.map(str::to_owned),
        clock.clone(),
    );
    UpstreamApi::new(
        http,
        &format!("{server_uri}/v4"),
        Arc::new(tokens),
        TtlCache::new(clock.clone()),
    )
    .unwrap()
    .with_rate_limit(NonZeroU32::new(1000).unwrap())
}

async fn harness() -> Harness {
    let server = MockServer::start().await;
    let clock = ManualClock::starting_at(T0);
    let api = build_api(&server.uri(), &clock, Some("client-1"), Some("secret-1"));
    Harness { server, clock, api }
}

async fn mount_token(server: &MockServer, expires_in: u64, times: u64) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(query_param("client_id", "client-1"))
        .and(query_param("client_secret", "secret-1"))
        .and(query_param("grant_type", "client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-1",
            "expires_in": expires_in,
            "token_type": "bearer"
        })))
        .expect(times)
        .mount(server)
        .await;
}

fn games_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!([
        {"id": 7346, "name": "The Legend of Zelda: Breath of the Wild"},
        {"id": 1942, "name": "The Witcher 3: Wild Hunt"}
    ]))
}

#[tokio::test]
async fn repeated_request_is_served_from_cache() {
    let h = harness().await;
    mount_token(&h.server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path("/v4/games"))
        .and(header("Client-ID", "client-1"))
        .and(header("Authorization", "Bearer tok-1"))
        .and(body_string("fields name; limit 2;"))
        .respond_with(games_response())
        .expect(1)
        .mount(&h.server)
        .await;

    let query = "fields name; limit 2;";
    let first: Vec<Game> = h.api.request("games", query).await.unwrap();
    let second: Vec<Game> = h.api.request("games", query).await.unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
    assert_eq!(first[1].name, "The Witcher 3: Wild Hunt");
    assert_eq!(h.api.cache().len(), 1);
}

#[tokio::test]
async fn equivalent_whitespace_shares_a_cache_entry() {
    let h = harness().await;
    mount_token(&h.server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path("/v4/games"))
        .respond_with(games_response())
        .expect(1)
        .mount(&h.server)
        .await;

    let a: Vec<Game> = h
        .api
        .request("games", "fields name;  limit 2;")
        .await
        .unwrap();
    let b: Vec<Game> = h
        .api
        .request("games", "fields name;\n\tlimit 2; ")
        .await
        .unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn empty_results_are_not_cached() {
    let h = harness().await;
    mount_token(&h.server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path("/v4/games"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&h.server)
        .await;

    for _ in 0..2 {
        let games: Vec<Game> = h.api.request("games", "where id = 0;").await.unwrap();
        assert!(games.is_empty());
    }
    assert!(h.api.cache().is_empty());
}

#[tokio::test]
async fn server_error_degrades_to_empty() {
    let h = harness().await;
    mount_token(&h.server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path("/v4/games"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .expect(2)
        .mount(&h.server)
        .await;

    for _ in 0..2 {
        let games: Vec<Game> = h.api.request("games", "fields name;").await.unwrap();
        assert!(games.is_empty());
    }
    assert!(h.api.cache().is_empty());
}

#[tokio::test]
async fn malformed_body_degrades_to_empty() {
    let h = harness().await;
    mount_token(&h.server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path("/v4/games"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&h.server)
        .await;

    let games: Vec<Game> = h.api.request("games", "fields name;").await.unwrap();
    assert!(games.is_empty());
    assert!(h.api.cache().is_empty());
}

#[tokio::test]
async fn unreachable_upstream_degrades_to_empty() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let clock = ManualClock::starting_at(T0);
    let api = build_api(&uri, &clock, Some("client-1"), Some("secret-1"));
    let games: Vec<Game> = api.request("games", "fields name;").await.unwrap();
    assert!(games.is_empty());
}

#[tokio::test]
async fn missing_credentials_are_reported() {
    let h = harness().await;
    Mock::given(method("POST"))
        .respond_with(games_response())
        .expect(0)
        .mount(&h.server)
        .await;

    let api = build_api(&h.server.uri(), &h.clock, Some("client-1"), None);
    let err = api
        .request::<Game>("games", "fields name;")
        .await
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(matches!(err, UpstreamError::MissingCredentials("client secret")));

    let api = build_api(&h.server.uri(), &h.clock, Some(""), Some("secret-1"));
    let err = api
        .request::<Game>("games", "fields name;")
        .await
        .unwrap_err();
    assert!(matches!(err, UpstreamError::MissingCredentials("client id")));
}

#[tokio::test]
async fn rejected_credentials_degrade_to_empty() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(403).set_body_string("bad creds"))
        .expect(2)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v4/games"))
        .respond_with(games_response())
        .expect(0)
        .mount(&h.server)
        .await;

    let Err(err) = h.api.tokens().access_token().await else {
        panic!("rejected credentials produced a token");
    };
    assert!(matches!(
        &err,
        UpstreamError::AuthFailed { status: 403, body } if body == "bad creds"
    ));
    assert!(!err.is_configuration());

    let games: Vec<Game> = h.api.request("games", "fields name;").await.unwrap();
    assert!(games.is_empty());
    assert!(h.api.cache().is_empty());
}

#[tokio::test]
async fn token_is_reused_across_queries() {
    let h = harness().await;
    mount_token(&h.server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path("/v4/games"))
        .respond_with(games_response())
        .expect(3)
        .mount(&h.server)
        .await;

    for query in ["fields name;", "fields name; limit 1;", "fields *;"] {
        let games: Vec<Game> = h.api.request("games", query).await.unwrap();
        assert_eq!(games.len(), 2);
    }
}

#[tokio::test]
async fn concurrent_misses_authenticate_once() {
    let h = harness().await;
    mount_token(&h.server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path("/v4/games"))
        .respond_with(games_response().set_delay(Duration::from_millis(50)))
        .expect(3)
        .mount(&h.server)
        .await;

    let (a, b, c) = tokio::join!(
        h.api.request::<Game>("games", "fields a;"),
        h.api.request::<Game>("games", "fields b;"),
        h.api.request::<Game>("games", "fields c;"),
    );
    assert_eq!(a.unwrap().len(), 2);
    assert_eq!(b.unwrap().len(), 2);
    assert_eq!(c.unwrap().len(), 2);
}

#[tokio::test]
async fn token_is_refreshed_after_safety_margin() {
    let h = harness().await;
    // 120s lifetime minus the 60s margin: valid for 60s.
    mount_token(&h.server, 120, 2).await;
    Mock::given(method("POST"))
        .and(path("/v4/games"))
        .respond_with(games_response())
        .expect(3)
        .mount(&h.server)
        .await;

    let _: Vec<Game> = h.api.request("games", "fields a;").await.unwrap();
    h.clock.advance(Duration::from_secs(59));
    let _: Vec<Game> = h.api.request("games", "fields b;").await.unwrap();
    h.clock.advance(Duration::from_secs(1));
    let _: Vec<Game> = h.api.request("games", "fields c;").await.unwrap();
}

#[tokio::test]
async fn unauthorized_response_drops_the_token() {
    let h = harness().await;
    mount_token(&h.server, 3600, 2).await;
    Mock::given(method("POST"))
        .and(path("/v4/games"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&h.server)
        .await;

    for _ in 0..2 {
        let games: Vec<Game> = h.api.request("games", "fields name;").await.unwrap();
        assert!(games.is_empty());
    }
}

#[tokio::test]
async fn cached_results_expire_after_their_ttl() {
    let h = harness().await;
    mount_token(&h.server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path("/v4/games"))
        .respond_with(games_response())
        .expect(2)
        .mount(&h.server)
        .await;

    let (query, ttl) = ("fields name;", Duration::from_secs(10));
    let _: Vec<Game> = h.api.request_with_ttl("games", query, ttl).await.unwrap();
    h.clock.advance(Duration::from_secs(9));
    let _: Vec<Game> = h.api.request_with_ttl("games", query, ttl).await.unwrap();
    h.clock.advance(Duration::from_secs(1));
    let _: Vec<Game> = h.api.request_with_ttl("games", query, ttl).await.unwrap();
}

#[tokio::test]
async fn invalidate_forces_a_refetch() {
    let h = harness().await;
    mount_token(&h.server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path("/v4/games"))
        .respond_with(games_response())
        .expect(2)
        .mount(&h.server)
        .await;

    let _: Vec<Game> = h.api.request("games", "fields name;").await.unwrap();
    h.api.invalidate("games", "fields   name;");
    let _: Vec<Game> = h.api.request("games", "fields name;").await.unwrap();
}
