//! The synchronizer folds outstanding log entries into the live table, but
//! only when the projected state is still a valid nested-set forest.

use sqlx::{Postgres, Transaction};
use tracing::{info, instrument, warn};

use crate::config::SinkConfig;
use crate::database::methods::DbMethods;
use crate::database::Error;

pub mod plan;

pub use self::plan::{plan_sync, Operation, SkipReason, SyncDecision, SyncPlan};

/// Result of one synchronization cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// No log entries past the committed offset; nothing was written.
    NoPending,
    /// The cycle was abandoned without touching the live table or the
    /// offset; the upstream may recover on a later cycle.
    Skipped(SkipReason),
    Applied {
        offset: i64,
        inserted: usize,
        updated: usize,
        deleted: usize,
    },
}

pub struct Synchronizer {
    sink: SinkConfig,
}

impl Synchronizer {
    #[must_use]
    pub fn new(sink: SinkConfig) -> Self {
        Self { sink }
    }

    /// Folds all pending log entries into the live table.
    ///
    /// The caller owns the transaction and its commit, so an upstream
    /// writer appending to the log table may share the same transaction.
    /// Every effect of the cycle, including the offset advance, lands in
    /// this transaction; aborting it leaves the destination untouched.
    #[instrument(skip_all, fields(log_table = %self.sink.log_table_name))]
    pub async fn synchronize(
        &self,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<SyncOutcome, Error> {
        let offset = (&mut *tx).get_log_offset(&self.sink).await?;
        let pending = (&mut *tx)
            .fetch_log_entries_after(&self.sink, offset)
            .await?;
        if pending.rows.is_empty() {
            return Ok(SyncOutcome::NoPending);
        }

        let live = (&mut *tx).fetch_live_table(&self.sink).await?;

        let plan = match plan_sync(pending, live, &self.sink)? {
            SyncDecision::NoPending => return Ok(SyncOutcome::NoPending),
            SyncDecision::Skip(reason) => {
                warn!(%reason, "skipping synchronization cycle");
                return Ok(SyncOutcome::Skipped(reason));
            }
            SyncDecision::Apply(plan) => plan,
        };

        self.apply(tx, plan).await
    }

    /// Applies a plan: offset first, then inserts, updates and finally
    /// deletes. Deletes run last so a parent replaced in the same cycle is
    /// never transiently missing underneath its children.
    async fn apply(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        plan: SyncPlan,
    ) -> Result<SyncOutcome, Error> {
        let inserted = plan.inserts.len();
        let updated = plan.updates.len();
        let deleted = plan.deletes.len();

        (&mut *tx)
            .upsert_log_offset(&self.sink, plan.new_offset)
            .await?;
        (&mut *tx)
            .insert_rows(&self.sink, &plan.columns, plan.inserts)
            .await?;
        (&mut *tx)
            .update_rows(&self.sink, &plan.columns, plan.pk_index, plan.updates)
            .await?;
        (&mut *tx).delete_rows(&self.sink, &plan.deletes).await?;

        info!(
            offset = plan.new_offset,
            inserted, updated, deleted, "applied pending log entries"
        );

        Ok(SyncOutcome::Applied {
            offset: plan.new_offset,
            inserted,
            updated,
            deleted,
        })
    }
}
