//! Builtin tools compiled into the binary.
//!
//! Registration is explicit: `register_builtins` is called once at startup
//! rather than relying on import side effects. The same constructors back
//! the native symbol table used when reconciling `function` tool records.

mod datetime;
mod patient;
mod weather;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ca_domain::error::Result;
use ca_storage::PatientStore;

use crate::registry::{RegisteredTool, ToolHandler, ToolRegistry};

pub use datetime::datetime_tool;
pub use patient::patient_info_tool;
pub use weather::weather_tool;

/// Specialist id the core internist is synthesized with; patient lookup is
/// assigned to it.
pub const CORE_INTERNIST_ID: i64 = 0;

/// Register the builtin tool set. Called once from bootstrap.
pub fn register_builtins(
    registry: &ToolRegistry,
    patients: Arc<PatientStore>,
    http_timeout: Duration,
) -> Result<()> {
    registry.register(datetime_tool(), false)?;
    registry.register(weather_tool(http_timeout), false)?;
    registry.register(patient_info_tool(patients), false)?;
    tracing::info!(tools = 3, "builtin tools registered");
    Ok(())
}

/// Native symbol table for `function` tool records: symbols that resolve to
/// statically-linked handlers. Records naming an unknown symbol are skipped
/// by the loader.
pub fn native_symbols(
    patients: Arc<PatientStore>,
    http_timeout: Duration,
) -> HashMap<String, Arc<dyn ToolHandler>> {
    let mut table: HashMap<String, Arc<dyn ToolHandler>> = HashMap::new();
    for tool in [
        datetime_tool(),
        weather_tool(http_timeout),
        patient_info_tool(patients),
    ] {
        table.insert(tool.definition.name.clone(), tool.handler);
    }
    table
}

pub(crate) fn arg_str<'a>(args: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}
