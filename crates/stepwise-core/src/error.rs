use thiserror::Error;

#[derive(Debug, Error)]
pub enum StepwiseError {
    // Graph construction errors
    #[error("Invalid graph topology: {0}")]
    Topology(String),

    // Graph execution errors
    #[error("Router on '{node}' selected '{chosen}', which is not one of [{}]", .candidates.join(", "))]
    Routing {
        node: String,
        chosen: String,
        candidates: Vec<String>,
    },

    #[error("Step '{node}' failed: {message}")]
    StepExecution { node: String, message: String },

    #[error("Execution limit exceeded: {0} step visits without reaching a termination")]
    ExecutionLimitExceeded(usize),

    #[error("Run exceeded deadline ({0}ms)")]
    DeadlineExceeded(u64),

    #[error("Run cancelled")]
    Cancelled,

    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Gateway errors
    #[error("Gateway error: {0}")]
    Gateway(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StepwiseError {
    /// Wrap any error raised inside a step so it carries the failing node's name.
    ///
    /// Errors that already describe a run-level outcome pass through unchanged.
    pub fn in_step(self, node: &str) -> Self {
        match self {
            Self::StepExecution { .. }
            | Self::Routing { .. }
            | Self::ExecutionLimitExceeded(_)
            | Self::DeadlineExceeded(_)
            | Self::Cancelled => self,
            other => Self::StepExecution {
                node: node.to_string(),
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, StepwiseError>;
