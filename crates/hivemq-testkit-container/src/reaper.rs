//! Session labelling and cleanup of leaked containers
//!
//! Every container created by this process carries `hivemq-testkit.session=<uuid>`.
//! A test run that aborts before its handles drop can still be cleaned up by
//! removing everything carrying the label.

use std::sync::LazyLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::ContainerEngine;
use crate::error::EngineError;

/// Label key marking containers of one test process
pub const SESSION_LABEL: &str = "hivemq-testkit.session";

static SESSION_ID: LazyLock<String> = LazyLock::new(|| Uuid::new_v4().to_string());

/// Id shared by every container this process creates
pub fn session_id() -> &'static str {
    &SESSION_ID
}

/// `key=value` filter selecting this session's containers
pub fn session_label() -> String {
    format!("{}={}", SESSION_LABEL, session_id())
}

/// Force-remove every container of this session; returns how many were removed
///
/// Removal continues past individual failures. The first failure is returned once
/// every container has been tried.
pub fn reap_session(engine: &dyn ContainerEngine) -> Result<usize, EngineError> {
    let ids = engine.list_by_label(&session_label())?;
    let mut removed = 0;
    let mut first_error = None;

    for id in &ids {
        match engine.remove(id) {
            Ok(()) | Err(EngineError::NoSuchContainer { .. }) => removed += 1,
            Err(e) => {
                warn!("Failed to reap container {}: {}", id, e);
                first_error.get_or_insert(e);
            }
        }
    }

    if removed > 0 {
        info!("Reaped {} container(s) of session {}", removed, session_id());
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(removed),
    }
}
