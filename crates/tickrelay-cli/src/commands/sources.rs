use serde_json::{json, Value};

use tickrelay_core::SourceRouter;

use crate::error::CliError;

pub fn run(router: &SourceRouter) -> Result<Value, CliError> {
    let sources = serde_json::to_value(router.status())?;
    Ok(json!({ "sources": sources }))
}
