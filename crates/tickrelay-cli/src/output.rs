use std::io::Write;

use serde::Serialize;
use serde_json::Value;
use tickrelay_core::CacheStats;

use crate::error::CliError;

/// Command output written to stdout.
#[derive(Debug, Serialize)]
pub struct Response {
    pub data: Value,
    pub meta: Meta,
}

/// Per-run metadata attached to every response.
#[derive(Debug, Serialize)]
pub struct Meta {
    pub latency_ms: u64,
    pub cache: CacheStats,
}

pub fn render(response: &Response, pretty: bool) -> Result<(), CliError> {
    let text = if pretty {
        serde_json::to_string_pretty(response)?
    } else {
        serde_json::to_string(response)?
    };

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{text}")?;
    Ok(())
}
