//! Drives a books/users CRUD service on `localhost:8000`.
//!
//! ```sh
//! cargo run --example books                 # built-in profile
//! cargo run --example books -- run.json     # profile from a config file
//! ```

use std::{sync::OnceLock, time::Duration};

use horde::{
    Profile, RampingExecutor, Reporter, RunConfig, Scenario, Stage, VuContext, WorkflowError,
    macros::workflow, report::StdoutReporter,
};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

const BASE_URL: &str = "http://localhost:8000";

// Built once, shared by every virtual user.
fn client() -> &'static Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();
    CLIENT.get_or_init(Client::new)
}

/// Send `body` and record whether the service answered 200.
async fn call(
    ctx: &VuContext,
    step: &str,
    check: &str,
    method: Method,
    path: &str,
    body: Option<Value>,
) -> Result<(), WorkflowError> {
    let mut req = client().request(method, format!("{BASE_URL}{path}"));
    if let Some(body) = &body {
        req = req.json(body);
    }
    let res = ctx.step(step, req.send()).await?;

    let status = res.status();
    if !ctx.check(check, status == StatusCode::OK) {
        let text = res.text().await.unwrap_or_default();
        tracing::warn!(vu = ctx.vu_id(), "{step} failed ({status}): {text}");
    }
    Ok(())
}

#[workflow]
async fn books(ctx: VuContext) -> Result<(), WorkflowError> {
    let book_id: u32 = rand::random_range(1000..10000);

    call(
        &ctx,
        "add book",
        "added book successfully",
        Method::POST,
        "/books/",
        Some(json!([{
            "id": book_id,
            "title": format!("Book Title {book_id}"),
            "author": "Author Name",
            "year": 2021,
            "isbn": format!("ISBN-{book_id}"),
        }])),
    )
    .await?;

    // A real read. The k6 script labels this check "retrieved" but sends a DELETE.
    call(
        &ctx,
        "get book",
        "retrieved book successfully",
        Method::GET,
        &format!("/books/{book_id}"),
        None,
    )
    .await?;

    call(
        &ctx,
        "update book",
        "updated book successfully",
        Method::PUT,
        "/books/",
        Some(json!([{
            "id": book_id,
            "title": format!("Updated Book Title {book_id}"),
            "author": "Updated Author Name",
        }])),
    )
    .await?;

    call(
        &ctx,
        "delete book",
        "deleted book successfully",
        Method::DELETE,
        "/books/",
        Some(json!([book_id])),
    )
    .await?;

    let user_id: u32 = rand::random_range(1000..10000);

    call(
        &ctx,
        "add user",
        "added user successfully",
        Method::POST,
        "/users/",
        Some(json!([{
            "id": user_id,
            "name": format!("User Name {user_id}"),
            "email": format!("user{user_id}@example.com"),
        }])),
    )
    .await?;

    call(
        &ctx,
        "delete user",
        "deleted user successfully",
        Method::DELETE,
        "/users/",
        Some(json!([user_id])),
    )
    .await
}

fn default_executor() -> Result<RampingExecutor, horde::ConfigError> {
    Ok(RampingExecutor::builder()
        .profile(Profile::new(vec![
            Stage::new(Duration::from_secs(15), 10),
            Stage::new(Duration::from_secs(10), 10),
            Stage::new(Duration::from_secs(15), 0),
        ])?)
        .pause(Duration::from_secs(1))
        .build())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let executor = match std::env::args().nth(1) {
        Some(path) => RampingExecutor::from_config(&RunConfig::from_path(path)?)?,
        None => default_executor()?,
    };

    // Ctrl-C stops the run early; the report still covers what ran.
    let token = executor.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let report = Scenario::new("books", books).run(&executor).await?;
    StdoutReporter.report(&report).await?;
    Ok(())
}
