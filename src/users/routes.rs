//! `/users` and `/health` routes.
//!
//! Handlers either write a response through the sink or return `Ok(())`
//! and let the registry finalize with `204 No Content`. Store failures are
//! returned as errors; the registry turns them into `500` and logs them.

use std::pin::pin;

use axum::http::{header, HeaderValue, StatusCode};
use futures_util::StreamExt;
use serde_json::json;
use thiserror::Error;

use crate::http::RouteBridge;
use crate::inflight::{ResponseSink, RouteRequest};
use crate::sql::SqlError;
use crate::users::model::UserInput;
use crate::users::store::UserStore;

/// Failures that end a users request with a server error.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("user store failed: {0}")]
    Store(#[from] SqlError),

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

type RouteResult = Result<(), UserError>;

/// Add the users API to `bridge`.
pub fn mount<S: UserStore>(bridge: RouteBridge, store: S) -> RouteBridge {
    let list = store.clone();
    let export = store.clone();
    let create = store.clone();
    let find = store.clone();
    let rename = store.clone();
    let remove = store;

    bridge
        .get("/health", health)
        .get("/users", move |req, res| list_users(list.clone(), req, res))
        .get("/users/export", move |req, res| export_users(export.clone(), req, res))
        .post("/users", move |req, res| create_user(create.clone(), req, res))
        .get("/users/{id}", move |req, res| get_user(find.clone(), req, res))
        .put("/users/{id}", move |req, res| update_user(rename.clone(), req, res))
        .delete("/users/{id}", move |req, res| delete_user(remove.clone(), req, res))
}

async fn health(_req: RouteRequest, res: ResponseSink) -> RouteResult {
    res.json(&json!({ "status": "ok" }))?;
    Ok(())
}

async fn list_users<S: UserStore>(store: S, _req: RouteRequest, res: ResponseSink) -> RouteResult {
    let users = store.list().await?;
    res.json(&users)?;
    Ok(())
}

/// Newline-delimited JSON, one user per line.
async fn export_users<S: UserStore>(store: S, req: RouteRequest, res: ResponseSink) -> RouteResult {
    let mut users = pin!(store.export(req.cancellation().clone()));
    let mut body = Vec::new();
    while let Some(user) = users.next().await {
        serde_json::to_writer(&mut body, &user?)?;
        body.push(b'\n');
    }

    res.header(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson"),
    );
    res.send(body);
    Ok(())
}

async fn create_user<S: UserStore>(store: S, req: RouteRequest, res: ResponseSink) -> RouteResult {
    let Some(name) = req.json::<UserInput>().ok().and_then(UserInput::into_name) else {
        return bad_request(&res, "name is required");
    };

    let user = store.create(name).await?;
    tracing::info!(user_id = user.id, "User created");
    res.status(StatusCode::CREATED).json(&user)?;
    Ok(())
}

async fn get_user<S: UserStore>(store: S, req: RouteRequest, res: ResponseSink) -> RouteResult {
    let Some(id) = user_id(&req) else {
        return bad_request(&res, "invalid user id");
    };

    match store.find(id).await? {
        Some(user) => res.json(&user)?,
        None => {
            res.status(StatusCode::NOT_FOUND).end();
        }
    }
    Ok(())
}

async fn update_user<S: UserStore>(store: S, req: RouteRequest, res: ResponseSink) -> RouteResult {
    let Some(id) = user_id(&req) else {
        return bad_request(&res, "invalid user id");
    };
    let Some(name) = req.json::<UserInput>().ok().and_then(UserInput::into_name) else {
        return bad_request(&res, "name is required");
    };

    match store.rename(id, name).await? {
        Some(user) => res.json(&user)?,
        None => {
            res.status(StatusCode::NOT_FOUND).end();
        }
    }
    Ok(())
}

async fn delete_user<S: UserStore>(store: S, req: RouteRequest, res: ResponseSink) -> RouteResult {
    let Some(id) = user_id(&req) else {
        return bad_request(&res, "invalid user id");
    };

    if !store.remove(id).await? {
        res.status(StatusCode::NOT_FOUND).end();
    }
    // Nothing written on success: the registry answers 204.
    Ok(())
}

fn user_id(req: &RouteRequest) -> Option<i64> {
    req.param("id")?.parse().ok()
}

fn bad_request(res: &ResponseSink, message: &str) -> RouteResult {
    res.status(StatusCode::BAD_REQUEST)
        .json(&json!({ "error": message }))?;
    Ok(())
}
