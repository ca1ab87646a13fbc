//! # Device Poll
//!
//! One round trip for a device: applied settings, staged settings and
//! newly claimed commands.
//!
//! ```text
//!   GET /device/staged-settings?unit_id=U1
//!        │
//!        ├── devices.settings          → applied
//!        ├── staged_settings.staged    → staged
//!        └── CommandQueue::poll_and_claim(U1, max)  → commands (CLAIMED)
//! ```
//!
//! Building the bundle claims commands. Calling it twice hands out each
//! command once. The device identity is the `unit_id` it presents.

use tracing::debug;

use tmon_core::validation::validate_unit_id;
use tmon_core::PollBundle;
use tmon_db::Database;

use crate::error::SyncResult;
use crate::queue::CommandQueue;

/// Device poll service.
#[derive(Debug, Clone)]
pub struct PollService {
    db: Database,
    queue: CommandQueue,
}

impl PollService {
    pub fn new(db: Database, queue: CommandQueue) -> Self {
        PollService { db, queue }
    }

    /// Builds the poll bundle for `unit_id`, claiming up to `max` commands.
    ///
    /// Suspended units get their settings views but no commands.
    pub async fn get_poll_bundle(&self, unit_id: &str, max: Option<u32>) -> SyncResult<PollBundle> {
        let unit_id = validate_unit_id(unit_id)?;

        let device = self.db.devices().get(&unit_id).await?;
        let suspended = device.as_ref().map(|d| d.suspended).unwrap_or(false);
        let applied = device.and_then(|d| d.settings);
        let staged = self.db.staged_settings().get(&unit_id).await?;

        let commands = if suspended {
            Vec::new()
        } else {
            self.queue.poll_and_claim(&unit_id, max).await?
        };

        debug!(
            unit_id = %unit_id,
            has_staged = staged.is_some(),
            commands = commands.len(),
            "Poll bundle built"
        );

        Ok(PollBundle {
            unit_id,
            applied,
            staged_at: staged.as_ref().map(|s| s.staged_at),
            staged: staged.map(|s| s.staged),
            suspended,
            commands,
        })
    }
}
