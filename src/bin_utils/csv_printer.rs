use std::io::Write;

use csv::Writer;
use serde::Serialize;

use crate::dispatcher::Response;

#[derive(Debug, Serialize)]
pub struct ResponseRow {
    pub line: u64,
    pub operation: String,
    pub status: &'static str,
    pub payload: String,
}

impl ResponseRow {
    pub fn new(line: u64, operation: String, response: Response) -> Self {
        match response {
            Response::Success(payload) => Self {
                line,
                operation,
                status: "ok",
                payload: String::from_utf8_lossy(&payload).into_owned(),
            },
            Response::Failure { kind, message } => Self {
                line,
                operation,
                status: "error",
                payload: format!("{kind:?}: {message}"),
            },
        }
    }
}

pub fn print_responses<W>(output: &mut W, rows: impl Iterator<Item = ResponseRow>) -> anyhow::Result<()>
where
    W: Write,
{
    let mut writer = Writer::from_writer(output);
    for row in rows {
        if let Err(err) = writer.serialize(row) {
            anyhow::bail!("Failed to write to CSV: {err}")
        }
    }
    // Ensure all data is flushed to the output
    if let Err(err) = writer.flush() {
        anyhow::bail!("Failed to flush CSV writer: {err}")
    }
    Ok(())
}
