//! Timezone-aware current time, DST handled by the IANA database.

use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use chrono_tz::Tz;

use crate::registry::{NativeTool, RegisteredTool};
use ca_domain::tool::{ToolDefinition, ToolScope};

use super::arg_str;

pub fn datetime_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: "get_current_datetime".into(),
            description: "Get the current date and time in a given IANA timezone \
                          (e.g. 'UTC', 'America/New_York', 'Asia/Tokyo'). Call once, \
                          then format the result into a natural response."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "timezone": {
                        "type": "string",
                        "description": "IANA timezone name. Defaults to UTC."
                    }
                }
            }),
        },
        scope: ToolScope::Global,
        assigned_specialist_id: None,
        enabled: true,
        handler: NativeTool::new(|args| {
            let tz_name = arg_str(args, "timezone").unwrap_or("UTC");
            Ok(current_datetime(tz_name))
        }),
    }
}

fn current_datetime(tz_name: &str) -> String {
    let Ok(tz) = Tz::from_str(tz_name) else {
        return format!(
            "Error: Invalid timezone '{tz_name}'. Use IANA timezone names \
             (e.g. 'America/New_York', 'UTC', 'Europe/London', 'Asia/Tokyo')."
        );
    };

    let utc_now = Utc::now();
    let utc_iso = utc_now.to_rfc3339_opts(SecondsFormat::Secs, true);

    if tz_name == "UTC" {
        let formatted = utc_now.format("%A, %B %d, %Y at %I:%M %p UTC");
        return format!("Current time (UTC): {formatted} ({utc_iso})");
    }

    let local = utc_now.with_timezone(&tz);
    let formatted = local.format("%A, %B %d, %Y at %I:%M %p %Z");
    let local_iso = local.to_rfc3339_opts(SecondsFormat::Secs, false);
    format!("Current time: {formatted} ({local_iso}) | UTC: {utc_iso}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utc_format() {
        let out = current_datetime("UTC");
        assert!(out.starts_with("Current time (UTC):"), "got: {out}");
        assert!(out.contains('Z'));
    }

    #[test]
    fn named_zone_includes_both_local_and_utc() {
        let out = current_datetime("Asia/Tokyo");
        assert!(out.starts_with("Current time:"), "got: {out}");
        assert!(out.contains("| UTC:"));
    }

    #[test]
    fn invalid_zone_is_reported_not_raised() {
        let out = current_datetime("Mars/Olympus");
        assert!(out.starts_with("Error: Invalid timezone 'Mars/Olympus'"));
    }

    #[tokio::test]
    async fn handler_defaults_to_utc() {
        let tool = datetime_tool();
        let out = tool.handler.call(&serde_json::json!({})).await.unwrap();
        assert!(out.starts_with("Current time (UTC):"));
    }
}
