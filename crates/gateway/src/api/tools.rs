//! Tool listing — the registry contents with scope tags.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use ca_domain::tool::ToolScope;

use crate::state::AppState;

#[derive(Serialize)]
struct ToolView {
    symbol: String,
    description: String,
    scope: ToolScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    assigned_specialist_id: Option<i64>,
    enabled: bool,
}

pub async fn list_tools(State(state): State<AppState>) -> impl IntoResponse {
    let tools: Vec<ToolView> = state
        .registry
        .list_for_scope(None)
        .into_iter()
        .map(|t| ToolView {
            symbol: t.definition.name.clone(),
            description: t.definition.description.clone(),
            scope: t.scope,
            assigned_specialist_id: t.assigned_specialist_id,
            enabled: t.enabled,
        })
        .collect();

    Json(serde_json::json!({
        "tools": tools,
        "count": tools.len(),
    }))
}
