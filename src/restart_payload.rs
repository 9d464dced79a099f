use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::io::Write;
use tempfile::NamedTempFile;

pub(crate) const RESTART_EVENT: &str = "restart_requested";

/// JSON document handed to the restart hook through `TASKGATE_RESTART_PAYLOAD`.
#[derive(Debug, Serialize)]
pub(crate) struct RestartPayload {
    pub(crate) event: String,
    pub(crate) restart_number: u64,
    pub(crate) folder: String,
    pub(crate) requested_at: String,
    pub(crate) prompt: String,
}

impl RestartPayload {
    pub(crate) fn new(restart_number: u64, folder: String, prompt: String) -> Self {
        Self {
            event: RESTART_EVENT.to_string(),
            restart_number,
            folder,
            requested_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            prompt,
        }
    }

    pub(crate) fn write_to_temp_file(&self) -> Result<NamedTempFile, String> {
        let mut payload_file = NamedTempFile::new()
            .map_err(|err| format!("failed to create restart payload file: {err}"))?;
        serde_json::to_writer(&mut payload_file, self)
            .map_err(|err| format!("failed to serialize restart payload: {err}"))?;
        payload_file
            .write_all(b"\n")
            .map_err(|err| format!("failed to finalize restart payload file: {err}"))?;
        Ok(payload_file)
    }
}
