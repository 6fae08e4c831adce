//! The HTTP surface: list page, form-based create/toggle/delete and the
//! health endpoint the compose probe targets.

use axum::extract::{Form, Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, TodoError};
use crate::store::TodoStore;
use crate::templates::Templates;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TodoStore>,
    pub templates: Arc<Templates>,
}

#[derive(Deserialize)]
struct CreateTodo {
    #[serde(default)]
    text: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/todos", post(create))
        .route("/todos/:id/toggle", post(toggle))
        .route("/todos/:id/delete", post(delete))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind and serve; port 0 picks an ephemeral port (tests).
pub async fn serve(
    state: AppState,
    bind_address: &str,
    port: u16,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", bind_address, port))
        .await
        .map_err(|e| TodoError::Config(format!("cannot bind {}:{}: {}", bind_address, port, e)))?;
    let addr = listener.local_addr()?;
    let app = router(state);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("[TodoApp] Server error: {}", e);
        }
    });

    tracing::info!("[TodoApp] Listening on http://{}", addr);
    Ok((addr, handle))
}

async fn index(State(state): State<AppState>) -> Result<Html<String>> {
    let todos = state.store.list().await?;
    Ok(Html(state.templates.render_list(&todos, None)?))
}

/// Empty or whitespace text is rejected back to the form; nothing is
/// created. Valid text creates exactly one item and redirects to the
/// list.
async fn create(State(state): State<AppState>, Form(form): Form<CreateTodo>) -> Response {
    match state.store.create(&form.text).await {
        Ok(item) => {
            tracing::debug!(id = %item.id, "[TodoApp] Todo created");
            Redirect::to("/").into_response()
        }
        Err(TodoError::EmptyText) => {
            let todos = match state.store.list().await {
                Ok(todos) => todos,
                Err(e) => return e.into_response(),
            };
            match state
                .templates
                .render_list(&todos, Some("Todo text must not be empty"))
            {
                Ok(html) => (StatusCode::BAD_REQUEST, Html(html)).into_response(),
                Err(e) => e.into_response(),
            }
        }
        Err(e) => e.into_response(),
    }
}

async fn toggle(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Redirect> {
    let item = state.store.toggle(id).await?;
    tracing::debug!(id = %id, completed = item.completed, "[TodoApp] Todo toggled");
    Ok(Redirect::to("/"))
}

async fn delete(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Redirect> {
    state.store.delete(id).await?;
    tracing::debug!(id = %id, "[TodoApp] Todo deleted");
    Ok(Redirect::to("/"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
