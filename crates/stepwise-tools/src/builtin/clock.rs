use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;

use stepwise_core::error::{Result, StepwiseError};
use stepwise_core::traits::Tool;

pub struct CurrentTimeTool;

#[derive(Deserialize, Default)]
struct TimeInput {
    /// strftime pattern; RFC 3339 when absent.
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    utc: bool,
}

impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }
    fn description(&self) -> &str {
        "Return the current date and time."
    }
    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "format": { "type": "string", "description": "strftime format (default: RFC 3339)" },
                "utc": { "type": "boolean", "description": "Use UTC instead of local time" }
            }
        })
    }
    fn execute(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let p: TimeInput = if input.is_null() {
                TimeInput::default()
            } else {
                serde_json::from_value(input)
                    .map_err(|e| StepwiseError::ToolValidation(e.to_string()))?
            };
            let text = match (p.format.as_deref(), p.utc) {
                (Some(fmt), true) => render(chrono::Utc::now().format(fmt))?,
                (Some(fmt), false) => render(chrono::Local::now().format(fmt))?,
                (None, true) => chrono::Utc::now().to_rfc3339(),
                (None, false) => chrono::Local::now().to_rfc3339(),
            };
            Ok(Value::String(text))
        })
    }
}

/// Invalid strftime patterns surface as fmt errors.
fn render(formatted: impl std::fmt::Display) -> Result<String> {
    use std::fmt::Write;
    let mut out = String::new();
    write!(out, "{formatted}").map_err(|_| {
        StepwiseError::ToolValidation("invalid time format string".into())
    })?;
    Ok(out)
}
