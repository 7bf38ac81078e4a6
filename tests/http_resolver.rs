//! Purpose: End-to-end tests for `HttpResolver` against a loopback HTTP server.
//! Exports: None (integration test module).
//! Role: Validate status handling, body parsing, headers, and relative URL joining over TCP.
//! Invariants: The server binds 127.0.0.1 on an ephemeral port and lives for one test.

use axum::Json;
use axum::Router;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::get;
use linkmap::api::{
    Class, ErrorKind, HttpResolver, Mapped, Mapping, ObjectMapping, Resolver, ResourceFetch,
};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

async fn private(headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == "Bearer secret");
    if authorized {
        Ok(Json(json!({"name": "hidden"})))
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn start_server() -> TestResult<String> {
    init_tracing();
    let app = Router::new()
        .route(
            "/person/1",
            get(|| async { Json(json!({"name": "pippo", "age": 12})) }),
        )
        .route(
            "/team/1",
            get(|| async {
                Json(json!({"name": "team1", "members": ["/person/1", "/person/404"]}))
            }),
        )
        .route(
            "/boom",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route(
            "/broken",
            get(|| async { ([(header::CONTENT_TYPE, "application/json")], "{\"name\": ") }),
        )
        .route("/private", get(private));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}/"))
}

async fn resolver() -> TestResult<HttpResolver> {
    let base_url = start_server().await?;
    Ok(HttpResolver::new().with_base_url(base_url)?)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ok_response_is_parsed() -> TestResult<()> {
    let resolver = resolver().await?;
    let document = resolver.fetch("/person/1").await?.ok_or("expected a document")?;
    assert_eq!(*document, json!({"name": "pippo", "age": 12}));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_resource_is_not_found() -> TestResult<()> {
    let resolver = resolver().await?;
    assert!(resolver.fetch("/person/404").await?.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_error_is_transport_error() -> TestResult<()> {
    let resolver = resolver().await?;
    let err = resolver.fetch("/boom").await.expect_err("500");
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().contains("/boom return status : 500"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_body_is_transport_error() -> TestResult<()> {
    let resolver = resolver().await?;
    let err = resolver.fetch("/broken").await.expect_err("bad json");
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().contains("Error parsing json"));
    assert!(err.url().is_some_and(|url| url.ends_with("/broken")));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bearer_token_is_sent() -> TestResult<()> {
    let resolver = resolver().await?;
    let err = resolver.fetch("/private").await.expect_err("no token");
    assert!(err.to_string().contains("return status : 401"));

    let resolver = resolver.with_token("secret");
    let document = resolver.fetch("/private").await?.ok_or("expected a document")?;
    assert_eq!(document["name"], json!("hidden"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn team_is_fetched_over_http() -> TestResult<()> {
    let resolver = resolver().await?;
    let person = Class::new("Person");
    let team = Class::new("Team");
    let person_mapping = ObjectMapping::builder(&person)
        .field("name", Mapping::string())
        .field("age", Mapping::number())
        .field("self", Mapping::get_url())
        .build();
    let team_mapping = ObjectMapping::builder(&team)
        .field("name", Mapping::string())
        .field(
            "members",
            Mapping::array(Mapping::optional_link(person_mapping)),
        )
        .build();

    let value = ResourceFetch::http(resolver)
        .fetch_resource(team_mapping)
        .from("/team/1")
        .await?;

    let team = value.as_object().ok_or("team")?;
    let members = team.get("members").ok_or("members")?;
    let members = members.as_array().ok_or("members array")?;
    assert_eq!(members.len(), 2);
    let first = members[0].as_option().ok_or("first member")?;
    let first = first.as_object().ok_or("first object")?;
    assert_eq!(first.get("name"), Some(Mapped::from("pippo")));
    assert_eq!(first.get("self"), Some(Mapped::from("/person/1")));
    assert_eq!(members[1], Mapped::none());
    Ok(())
}
