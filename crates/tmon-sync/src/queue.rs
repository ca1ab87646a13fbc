//! # Command Queue
//!
//! Per-device FIFO of pending actions with claim/complete semantics.
//!
//! ## Command Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Command State Machine                              │
//! │                                                                         │
//! │   enqueue()        poll_and_claim()       complete(ok)                  │
//! │  ─────────► QUEUED ───────────────► CLAIMED ──────────► DONE            │
//! │               ▲  │                     │     complete(!ok)              │
//! │               │  │ delete()            └──────────────► FAILED          │
//! │               │  ▼                     │                                │
//! │               │ (gone)                 │ reap_stale_claims()            │
//! │               └────────────────────────┘ (updated_at older than        │
//! │                                           the claim timeout)            │
//! │                                                                         │
//! │  • Claim is one conditional UPDATE: at most one claimant per id.       │
//! │  • complete() on DONE/FAILED is a no-op returning the stored row.      │
//! │  • complete() is accepted from QUEUED too: a device whose claim was    │
//! │    just reaped still gets its report recorded (last write wins).       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tmon_core::validation::{validate_command_name, validate_max_count, validate_unit_id};
use tmon_core::{
    BatchReport, Command, CommandStatus, CompletionOutcome, CoreError, TargetOutcome,
    FILE_UPDATE_COMMAND,
};
use tmon_db::Database;

use crate::error::{SyncError, SyncResult};

/// Command queue service over the `device_commands` table.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    db: Database,
    default_max: u32,
}

impl CommandQueue {
    /// Creates a queue handing out `default_max` commands per poll.
    pub fn new(db: Database, default_max: u32) -> Self {
        CommandQueue { db, default_max }
    }

    /// Appends a command for `device_id` and returns the stored row.
    ///
    /// `params` is opaque; `null` is stored as `{}`.
    pub async fn enqueue(&self, device_id: &str, command: &str, params: Value) -> SyncResult<Command> {
        let device_id = validate_unit_id(device_id)?;
        let command = validate_command_name(command)?;
        let params = if params.is_null() {
            Value::Object(Map::new())
        } else {
            params
        };

        let queued = self.db.commands().enqueue(&device_id, &command, &params).await?;
        info!(command_id = queued.id, unit_id = %device_id, command = %command, "Command enqueued");
        Ok(queued)
    }

    /// Returns up to `max` oldest queued commands and marks them claimed.
    ///
    /// Not a pure read: returned commands are `claimed` when this returns.
    pub async fn poll_and_claim(&self, device_id: &str, max: Option<u32>) -> SyncResult<Vec<Command>> {
        let device_id = validate_unit_id(device_id)?;
        let max = validate_max_count(max, self.default_max)?;

        let claimed = self.db.commands().claim(&device_id, max).await?;
        if !claimed.is_empty() {
            debug!(unit_id = %device_id, count = claimed.len(), "Commands claimed");
        }
        Ok(claimed)
    }

    /// Records a device's completion report.
    ///
    /// ## Errors
    /// `NotFound` if `command_id` is unknown. Reporting on a terminal
    /// command is not an error.
    pub async fn complete(&self, command_id: i64, ok: bool, result: Option<&str>) -> SyncResult<CompletionOutcome> {
        let outcome = self
            .db
            .commands()
            .complete(command_id, ok, result)
            .await?
            .ok_or(CoreError::CommandNotFound(command_id))?;

        match &outcome {
            CompletionOutcome::Completed(cmd) => {
                info!(command_id, unit_id = %cmd.device_id, status = %cmd.status, "Command completed")
            }
            CompletionOutcome::AlreadyTerminal(cmd) => {
                debug!(command_id, status = %cmd.status, "Duplicate completion ignored")
            }
        }
        Ok(outcome)
    }

    /// Re-queues claims older than `timeout`.
    pub async fn reap_stale_claims(&self, timeout: Duration) -> SyncResult<u64> {
        let timeout = chrono::Duration::from_std(timeout)
            .map_err(|e| SyncError::Internal(format!("claim timeout out of range: {}", e)))?;
        self.reap_stale_claims_before(Utc::now() - timeout).await
    }

    /// Re-queues claims last touched before `cutoff`.
    pub async fn reap_stale_claims_before(&self, cutoff: DateTime<Utc>) -> SyncResult<u64> {
        let reaped = self.db.commands().requeue_stale(cutoff).await?;
        if reaped > 0 {
            warn!(reaped, "Stale claims returned to queue");
        }
        Ok(reaped)
    }

    pub async fn get(&self, command_id: i64) -> SyncResult<Command> {
        self.db
            .commands()
            .get(command_id)
            .await?
            .ok_or_else(|| CoreError::CommandNotFound(command_id).into())
    }

    pub async fn list(&self, device_id: &str, status: Option<CommandStatus>) -> SyncResult<Vec<Command>> {
        let device_id = validate_unit_id(device_id)?;
        Ok(self.db.commands().list_for_device(&device_id, status).await?)
    }

    /// Neutralizes a command that has not been claimed yet.
    ///
    /// ## Errors
    /// `NotFound` for an unknown id, `Conflict` once it left `queued`.
    pub async fn delete(&self, command_id: i64) -> SyncResult<bool> {
        if self.db.commands().delete_queued(command_id).await? {
            info!(command_id, "Queued command deleted");
            return Ok(true);
        }

        let existing = self.get(command_id).await?;
        Err(CoreError::InvalidTransition {
            id: command_id,
            from: existing.status,
            to: CommandStatus::Queued,
        }
        .into())
    }

    /// Queues one `file_update` per target under a shared job id.
    ///
    /// Targets are independent; failures are reported, not raised.
    pub async fn enqueue_batch(&self, unit_ids: &[String], params: Value) -> SyncResult<BatchReport> {
        let job_id = Uuid::new_v4().to_string();
        let mut params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(tmon_core::ValidationError::NotAnObject.into()),
        };
        params.insert("job_id".to_string(), Value::String(job_id.clone()));
        let params = Value::Object(params);

        let mut outcomes = Vec::with_capacity(unit_ids.len());
        for unit_id in unit_ids {
            let outcome = match self.enqueue(unit_id, FILE_UPDATE_COMMAND, params.clone()).await {
                Ok(cmd) => TargetOutcome {
                    unit_id: cmd.device_id,
                    ok: true,
                    command_id: Some(cmd.id),
                    error: None,
                },
                Err(e) => {
                    warn!(job_id = %job_id, unit_id = %unit_id, error = %e, "Firmware target failed");
                    TargetOutcome {
                        unit_id: unit_id.clone(),
                        ok: false,
                        command_id: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let report = BatchReport::from_outcomes(job_id, outcomes);
        let detail = json!({
            "targets": unit_ids,
            "succeeded": report.succeeded,
            "failed": report.failed,
        });
        if let Err(e) = self.db.audit().record("admin", "firmware_job", &report.job_id, &detail).await {
            warn!(error = %e, "Failed to write audit entry");
        }
        info!(
            job_id = %report.job_id,
            succeeded = report.succeeded,
            failed = report.failed,
            "Firmware job queued"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use tmon_db::DbConfig;

    async fn queue() -> CommandQueue {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        CommandQueue::new(db, 10)
    }

    #[tokio::test]
    async fn test_reboot_scenario() {
        let queue = queue().await;
        let queued = queue.enqueue("U1", "reboot", Value::Null).await.unwrap();
        assert_eq!(queued.status, CommandStatus::Queued);
        assert_eq!(queued.params, json!({}));

        let claimed = queue.poll_and_claim("U1", Some(10)).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].command, "reboot");
        assert_eq!(claimed[0].id, queued.id);

        let outcome = queue.complete(queued.id, true, Some("ok")).await.unwrap();
        assert!(outcome.was_applied());
        let done = queue.get(queued.id).await.unwrap();
        assert_eq!(done.status, CommandStatus::Done);
        assert!(done.executed_at.is_some());
        assert_eq!(done.executed_result.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_fifo_and_no_double_claim() {
        let queue = queue().await;
        let mut ids = Vec::new();
        for name in ["a", "b", "c", "d"] {
            ids.push(queue.enqueue("U1", name, json!({})).await.unwrap().id);
        }
        queue.enqueue("U2", "other", json!({})).await.unwrap();

        let first = queue.poll_and_claim("U1", Some(2)).await.unwrap();
        assert_eq!(first.iter().map(|c| c.id).collect::<Vec<_>>(), ids[..2]);
        assert!(first.iter().all(|c| c.status == CommandStatus::Claimed));

        let second = queue.poll_and_claim("U1", Some(10)).await.unwrap();
        assert_eq!(second.iter().map(|c| c.id).collect::<Vec<_>>(), ids[2..]);

        assert!(queue.poll_and_claim("U1", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let queue = queue().await;
        let cmd = queue.enqueue("U1", "relay_toggle", json!({"relay": 1})).await.unwrap();
        queue.poll_and_claim("U1", None).await.unwrap();

        let first = queue.complete(cmd.id, false, Some("relay stuck")).await.unwrap();
        assert_eq!(first.command().status, CommandStatus::Failed);

        let second = queue.complete(cmd.id, false, Some("relay stuck")).await.unwrap();
        assert!(!second.was_applied());
        assert_eq!(second.command().executed_at, first.command().executed_at);
    }

    #[tokio::test]
    async fn test_complete_unknown_is_not_found() {
        let queue = queue().await;
        let err = queue.complete(999, true, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_reap_makes_claims_available_again() {
        let queue = queue().await;
        let cmd = queue.enqueue("U1", "reboot", json!({})).await.unwrap();
        queue.poll_and_claim("U1", None).await.unwrap();

        // Fresh claims survive a reap with the default timeout
        assert_eq!(queue.reap_stale_claims(Duration::from_secs(300)).await.unwrap(), 0);

        let reaped = queue
            .reap_stale_claims_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(reaped, 1);

        let again = queue.poll_and_claim("U1", None).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, cmd.id);
    }

    #[tokio::test]
    async fn test_completion_after_reap_wins() {
        let queue = queue().await;
        let cmd = queue.enqueue("U1", "reboot", json!({})).await.unwrap();
        queue.poll_and_claim("U1", None).await.unwrap();
        queue
            .reap_stale_claims_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();

        let outcome = queue.complete(cmd.id, true, Some("ok")).await.unwrap();
        assert!(outcome.was_applied());
        assert!(queue.poll_and_claim("U1", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_only_while_queued() {
        let queue = queue().await;
        let a = queue.enqueue("U1", "a", json!({})).await.unwrap();
        let b = queue.enqueue("U1", "b", json!({})).await.unwrap();

        assert!(queue.delete(a.id).await.unwrap());
        assert_eq!(queue.get(a.id).await.unwrap_err().kind(), ErrorKind::NotFound);

        queue.poll_and_claim("U1", None).await.unwrap();
        assert_eq!(queue.delete(b.id).await.unwrap_err().kind(), ErrorKind::Conflict);
        assert_eq!(queue.delete(12345).await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_enqueue_validation() {
        let queue = queue().await;
        assert_eq!(
            queue.enqueue("", "reboot", json!({})).await.unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            queue.enqueue("U1", "  ", json!({})).await.unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            queue.poll_and_claim("U1", Some(0)).await.unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[tokio::test]
    async fn test_firmware_batch_reports_per_target() {
        let queue = queue().await;
        let targets = vec!["U1".to_string(), "bad id!".to_string(), "U3".to_string()];
        let report = queue
            .enqueue_batch(&targets, json!({"url": "https://fw.example.com/v2.bin"}))
            .await
            .unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert!(!report.outcomes[1].ok);
        assert!(report.outcomes[1].error.is_some());

        let queued = queue.list("U3", Some(CommandStatus::Queued)).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].command, FILE_UPDATE_COMMAND);
        assert_eq!(queued[0].params["job_id"], json!(report.job_id));
        assert_eq!(queued[0].params["url"], "https://fw.example.com/v2.bin");
    }

    #[tokio::test]
    async fn test_firmware_batch_rejects_non_object_params() {
        let queue = queue().await;
        let err = queue
            .enqueue_batch(&["U1".to_string()], json!([1, 2]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
