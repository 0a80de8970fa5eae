//! Pure planning for one synchronization cycle: deduplicate pending log
//! entries, validate the projected state, and partition survivors into
//! insert/update/delete batches.
//!
//! Planning never touches the database. The synchronizer feeds it the
//! pending log result and the live-table result, and either applies the
//! returned plan or abandons the cycle.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::config::SinkConfig;
use crate::database::types::{SqlValue, TableData};
use crate::database::Error;
use crate::nested_set::{build_forest, NodeInterval, TreeBuilderError};

/// Change intent carried by one log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upsert,
    Delete,
}

impl Operation {
    fn from_code(code: i64, sink: &SinkConfig) -> Result<Self, Error> {
        if code == sink.upsert_operation {
            Ok(Self::Upsert)
        } else if code == sink.delete_operation {
            Ok(Self::Delete)
        } else {
            Err(Error::UnknownOperation { code })
        }
    }
}

/// Why a cycle was abandoned without touching the live table. The upstream
/// may recover on a later cycle once more log entries arrive, so none of
/// these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A surviving upsert carries null or inverted coordinates.
    MalformedLogCoordinates { node_id: i64, log_id: i64 },
    /// A live-table row carries null or inverted coordinates.
    MalformedLiveCoordinates { node_id: i64 },
    /// The projected state is not a valid nested-set forest.
    InvalidProjectedForest(TreeBuilderError),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedLogCoordinates { node_id, log_id } => write!(
                f,
                "pending upsert for node {node_id} (log id {log_id}) has missing or inverted \
                 coordinates"
            ),
            Self::MalformedLiveCoordinates { node_id } => write!(
                f,
                "live row for node {node_id} has missing or inverted coordinates"
            ),
            Self::InvalidProjectedForest(error) => {
                write!(f, "projected state is not a valid nested set: {error}")
            }
        }
    }
}

/// The row changes of one cycle, ready for batched application.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPlan {
    /// Offset to persist: the maximum log id among all fetched entries,
    /// deduplicated or not, so superseded entries are absorbed too.
    pub new_offset: i64,
    /// Live-table column names: the log columns minus the log primary key
    /// and the operation column, in log-table order.
    pub columns: Vec<String>,
    /// Position of the node primary key within `columns`.
    pub pk_index: usize,
    pub inserts: Vec<Vec<SqlValue>>,
    pub updates: Vec<Vec<SqlValue>>,
    pub deletes: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncDecision {
    NoPending,
    Skip(SkipReason),
    Apply(SyncPlan),
}

/// Column positions resolved once against a result's column list; rows are
/// carried as positional tuples everywhere else.
#[derive(Debug, Clone, Copy)]
struct LogColumns {
    log_id: usize,
    operation: usize,
    node_id: usize,
    left: usize,
    right: usize,
}

impl LogColumns {
    fn resolve(log: &TableData, sink: &SinkConfig) -> Result<Self, Error> {
        let table = &sink.log_table_name;
        Ok(Self {
            log_id: require_column(log, table, &sink.log_pk_column)?,
            operation: require_column(log, table, &sink.operation_column)?,
            node_id: require_column(log, table, &sink.pk_column)?,
            left: require_column(log, table, &sink.left_column)?,
            right: require_column(log, table, &sink.right_column)?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct LiveColumns {
    node_id: usize,
    left: usize,
    right: usize,
}

impl LiveColumns {
    fn resolve(live: &TableData, sink: &SinkConfig) -> Result<Self, Error> {
        let table = &sink.table_name;
        Ok(Self {
            node_id: require_column(live, table, &sink.pk_column)?,
            left: require_column(live, table, &sink.left_column)?,
            right: require_column(live, table, &sink.right_column)?,
        })
    }
}

fn require_column(data: &TableData, table: &str, name: &str) -> Result<usize, Error> {
    data.column_index(name).ok_or_else(|| Error::MissingColumn {
        table: table.to_string(),
        column: name.to_string(),
    })
}

#[derive(Debug, Clone)]
struct LogEntry {
    log_id: i64,
    operation: Operation,
    node_id: i64,
    interval: Option<NodeInterval>,
    row: Vec<SqlValue>,
}

fn decode_log_entry(
    row: Vec<SqlValue>,
    columns: LogColumns,
    sink: &SinkConfig,
) -> Result<LogEntry, Error> {
    let log_id = require_key(&row, columns.log_id, &sink.log_table_name, &sink.log_pk_column)?;
    let code = require_key(
        &row,
        columns.operation,
        &sink.log_table_name,
        &sink.operation_column,
    )?;
    let node_id = require_key(&row, columns.node_id, &sink.log_table_name, &sink.pk_column)?;

    Ok(LogEntry {
        log_id,
        operation: Operation::from_code(code, sink)?,
        node_id,
        interval: interval_at(&row, columns.left, columns.right),
        row,
    })
}

fn require_key(row: &[SqlValue], index: usize, table: &str, column: &str) -> Result<i64, Error> {
    row[index].as_i64().ok_or_else(|| Error::MalformedKey {
        table: table.to_string(),
        column: column.to_string(),
    })
}

/// Reads the coordinate pair at the given positions. `None` when either
/// side is null, non-integer, or out of the i32 coordinate range; the
/// caller decides whether that is acceptable for the row's operation.
fn interval_at(row: &[SqlValue], left: usize, right: usize) -> Option<NodeInterval> {
    let left = i32::try_from(row[left].as_i64()?).ok()?;
    let right = i32::try_from(row[right].as_i64()?).ok()?;
    Some(NodeInterval::new(left, right))
}

/// Plans one cycle over the pending log entries and the current live rows.
///
/// Fatal conditions (missing columns, unreadable keys, unknown operation
/// codes) surface as `Err`; conditions the upstream can outgrow surface as
/// `SyncDecision::Skip`.
pub fn plan_sync(log: TableData, live: TableData, sink: &SinkConfig) -> Result<SyncDecision, Error> {
    if log.rows.is_empty() {
        return Ok(SyncDecision::NoPending);
    }

    let log_columns = LogColumns::resolve(&log, sink)?;

    let TableData {
        columns: log_column_names,
        rows: log_rows,
    } = log;

    let mut new_offset = i64::MIN;
    let mut latest: HashMap<i64, LogEntry> = HashMap::new();

    for row in log_rows {
        let entry = decode_log_entry(row, log_columns, sink)?;
        new_offset = new_offset.max(entry.log_id);

        // Only the latest intent per node matters within a cycle;
        // intermediate states may violate the nested-set invariant and
        // must never be written.
        match latest.entry(entry.node_id) {
            Entry::Occupied(mut slot) => {
                if entry.log_id > slot.get().log_id {
                    slot.insert(entry);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
    }

    let mut survivors: Vec<LogEntry> = latest.into_values().collect();
    survivors.sort_by_key(|entry| entry.log_id);

    for entry in &survivors {
        if entry.operation != Operation::Upsert {
            continue;
        }
        if !entry.interval.is_some_and(|interval| interval.is_well_formed()) {
            return Ok(SyncDecision::Skip(SkipReason::MalformedLogCoordinates {
                node_id: entry.node_id,
                log_id: entry.log_id,
            }));
        }
    }

    let mut live_ids: HashSet<i64> = HashSet::new();
    let mut projected: HashMap<i64, NodeInterval> = HashMap::new();

    if !live.rows.is_empty() {
        let live_columns = LiveColumns::resolve(&live, sink)?;

        for row in &live.rows {
            let node_id = require_key(row, live_columns.node_id, &sink.table_name, &sink.pk_column)?;
            let interval = interval_at(row, live_columns.left, live_columns.right);

            let Some(interval) = interval.filter(NodeInterval::is_well_formed) else {
                return Ok(SyncDecision::Skip(SkipReason::MalformedLiveCoordinates {
                    node_id,
                }));
            };

            live_ids.insert(node_id);
            projected.insert(node_id, interval);
        }
    }

    for entry in &survivors {
        match entry.operation {
            Operation::Upsert => {
                if let Some(interval) = entry.interval {
                    projected.insert(entry.node_id, interval);
                }
            }
            Operation::Delete => {
                projected.remove(&entry.node_id);
            }
        }
    }

    let projected_intervals: Vec<NodeInterval> = projected.into_values().collect();
    if let Err(error) = build_forest(&projected_intervals) {
        return Ok(SyncDecision::Skip(SkipReason::InvalidProjectedForest(error)));
    }

    let excluded = [log_columns.log_id, log_columns.operation];
    let columns: Vec<String> = log_column_names
        .into_iter()
        .enumerate()
        .filter(|(index, _)| !excluded.contains(index))
        .map(|(_, name)| name)
        .collect();
    let pk_index = log_columns.node_id
        - excluded
            .iter()
            .filter(|&&index| index < log_columns.node_id)
            .count();

    let mut plan = SyncPlan {
        new_offset,
        columns,
        pk_index,
        inserts: Vec::new(),
        updates: Vec::new(),
        deletes: Vec::new(),
    };

    for entry in survivors {
        match entry.operation {
            // A delete for an absent node stays in the batch; deleting
            // nothing is a no-op on the live table.
            Operation::Delete => plan.deletes.push(entry.node_id),
            Operation::Upsert => {
                let row = project_row(entry.row, &excluded);
                if live_ids.contains(&entry.node_id) {
                    plan.updates.push(row);
                } else {
                    plan.inserts.push(row);
                }
            }
        }
    }

    Ok(SyncDecision::Apply(plan))
}

fn project_row(row: Vec<SqlValue>, excluded: &[usize; 2]) -> Vec<SqlValue> {
    row.into_iter()
        .enumerate()
        .filter(|(index, _)| !excluded.contains(index))
        .map(|(_, value)| value)
        .collect()
}
