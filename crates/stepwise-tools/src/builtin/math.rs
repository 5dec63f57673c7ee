use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Number, Value};

use stepwise_core::error::{Result, StepwiseError};
use stepwise_core::traits::Tool;

#[derive(Deserialize)]
struct Operands {
    a: Number,
    b: Number,
}

impl Operands {
    fn parse(input: Value) -> Result<Self> {
        serde_json::from_value(input).map_err(|e| StepwiseError::ToolValidation(e.to_string()))
    }

    /// Both operands as integers, when they are.
    fn integers(&self) -> Option<(i64, i64)> {
        Some((self.a.as_i64()?, self.b.as_i64()?))
    }

    fn floats(&self) -> (f64, f64) {
        (
            self.a.as_f64().unwrap_or_default(),
            self.b.as_f64().unwrap_or_default(),
        )
    }
}

fn binary_schema(verb: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "a": { "type": "number", "description": format!("Left operand to {verb}") },
            "b": { "type": "number", "description": "Right operand" }
        },
        "required": ["a", "b"]
    })
}

/// Render a float result, collapsing whole values to integers.
fn float_value(tool: &str, x: f64) -> Result<Value> {
    if !x.is_finite() {
        return Err(StepwiseError::ToolExecution {
            tool: tool.into(),
            message: format!("result is not a finite number: {x}"),
        });
    }
    if x.fract() == 0.0 && x.abs() < i64::MAX as f64 {
        return Ok(Value::from(x as i64));
    }
    Ok(Value::from(x))
}

fn overflow(tool: &str) -> StepwiseError {
    StepwiseError::ToolExecution {
        tool: tool.into(),
        message: "integer overflow".into(),
    }
}

// ── AddTool ─────────────────────────────────────────────────────

pub struct AddTool;

impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }
    fn description(&self) -> &str {
        "Add two numbers and return the sum."
    }
    fn input_schema(&self) -> Value {
        binary_schema("add")
    }
    fn execute(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let ops = Operands::parse(input)?;
            match ops.integers() {
                Some((a, b)) => a.checked_add(b).map(Value::from).ok_or_else(|| overflow("add")),
                None => {
                    let (a, b) = ops.floats();
                    float_value("add", a + b)
                }
            }
        })
    }
}

// ── SubtractTool ────────────────────────────────────────────────

pub struct SubtractTool;

impl Tool for SubtractTool {
    fn name(&self) -> &str {
        "subtract"
    }
    fn description(&self) -> &str {
        "Subtract b from a and return the difference."
    }
    fn input_schema(&self) -> Value {
        binary_schema("subtract from")
    }
    fn execute(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let ops = Operands::parse(input)?;
            match ops.integers() {
                Some((a, b)) => a
                    .checked_sub(b)
                    .map(Value::from)
                    .ok_or_else(|| overflow("subtract")),
                None => {
                    let (a, b) = ops.floats();
                    float_value("subtract", a - b)
                }
            }
        })
    }
}

// ── MultiplyTool ────────────────────────────────────────────────

pub struct MultiplyTool;

impl Tool for MultiplyTool {
    fn name(&self) -> &str {
        "multiply"
    }
    fn description(&self) -> &str {
        "Multiply two numbers and return the product."
    }
    fn input_schema(&self) -> Value {
        binary_schema("multiply")
    }
    fn execute(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let ops = Operands::parse(input)?;
            match ops.integers() {
                Some((a, b)) => a
                    .checked_mul(b)
                    .map(Value::from)
                    .ok_or_else(|| overflow("multiply")),
                None => {
                    let (a, b) = ops.floats();
                    float_value("multiply", a * b)
                }
            }
        })
    }
}

// ── DivideTool ──────────────────────────────────────────────────

pub struct DivideTool;

impl Tool for DivideTool {
    fn name(&self) -> &str {
        "divide"
    }
    fn description(&self) -> &str {
        "Divide a by b and return the quotient."
    }
    fn input_schema(&self) -> Value {
        binary_schema("divide")
    }
    fn execute(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let ops = Operands::parse(input)?;
            let (a, b) = ops.floats();
            if b == 0.0 {
                return Err(StepwiseError::ToolValidation("division by zero".into()));
            }
            if let Some((ia, ib)) = ops.integers() {
                if ia.checked_rem(ib) == Some(0) {
                    return ia
                        .checked_div(ib)
                        .map(Value::from)
                        .ok_or_else(|| overflow("divide"));
                }
            }
            Ok(Value::from(a / b))
        })
    }
}
