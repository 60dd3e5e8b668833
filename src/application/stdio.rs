//! Line-delimited JSON front end over stdin/stdout.
//!
//! Each input line is one request; each output line is one response. Parse
//! and invocation failures are reported in the response instead of killing
//! the loop, so a supervisor process can keep the pipe open across faults.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use crate::application::agent::{Agent, ArtifactRecord};
use crate::model::ModelProvider;

#[derive(Debug, Error)]
pub enum StdioError {
    #[error("stdin/stdout I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize stdio response: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct StdioRequest {
    prompt: String,
    #[serde(default)]
    execute: bool,
    model: Option<String>,
}

#[derive(Debug, Serialize)]
struct StdioResponse {
    output: Option<String>,
    artifacts: Vec<ArtifactRecord>,
    error: Option<String>,
}

impl StdioResponse {
    fn success(output: String, artifacts: Vec<ArtifactRecord>) -> Self {
        Self {
            output: Some(output),
            artifacts,
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            output: None,
            artifacts: Vec::new(),
            error: Some(message.into()),
        }
    }
}

pub async fn run<P>(agent: &mut Agent<P>) -> Result<(), StdioError>
where
    P: ModelProvider + 'static,
{
    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        debug!("Received stdio line");

        let request = match serde_json::from_str::<StdioRequest>(&line) {
            Ok(request) => request,
            Err(parse_error) => {
                error!(%parse_error, "Failed to parse stdio input line");
                let response = StdioResponse::error(format!("invalid request JSON: {parse_error}"));
                write_response(&mut stdout, response).await?;
                continue;
            }
        };
        if request.prompt.trim().is_empty() {
            write_response(&mut stdout, StdioResponse::error("prompt cannot be empty")).await?;
            continue;
        }
        if let Some(model) = request.model {
            agent.set_model(model);
        }

        info!(execute = request.execute, "Processing stdio request");
        match agent.invoke(request.prompt, request.execute).await {
            Ok(outcome) => {
                let response = StdioResponse::success(outcome.output, outcome.artifacts);
                write_response(&mut stdout, response).await?;
            }
            Err(invoke_error) => {
                error!(%invoke_error, "Stdio request failed");
                write_response(&mut stdout, StdioResponse::error(invoke_error.to_string()))
                    .await?;
            }
        }
    }

    stdout.flush().await?;
    Ok(())
}

async fn write_response(
    stdout: &mut io::Stdout,
    response: StdioResponse,
) -> Result<(), StdioError> {
    let mut payload = serde_json::to_vec(&response)?;
    payload.push(b'\n');
    stdout.write_all(&payload).await?;
    stdout.flush().await?;
    Ok(())
}
