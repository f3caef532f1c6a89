//! Specialist listing — the catalogue as the next turn would see it.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::runtime::specialists::{SpecialistCatalogue, CORE_SPECIALIST_ID};
use crate::state::AppState;

#[derive(Serialize)]
struct AgentView {
    id: i64,
    role: String,
    name: String,
    description: String,
    tool_symbols: Vec<String>,
    is_core: bool,
}

pub async fn list_agents(State(state): State<AppState>) -> impl IntoResponse {
    let catalogue = SpecialistCatalogue::load(&state.specialists);
    let agents: Vec<AgentView> = catalogue
        .profiles()
        .iter()
        .map(|p| AgentView {
            id: p.id,
            role: p.role.clone(),
            name: p.name.clone(),
            description: p.description.clone(),
            tool_symbols: p.tool_symbols.clone(),
            is_core: p.id == CORE_SPECIALIST_ID,
        })
        .collect();

    Json(serde_json::json!({
        "agents": agents,
        "count": agents.len(),
    }))
}
