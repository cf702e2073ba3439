//! Incremental index maintenance
//!
//! Each index carries a checkpoint: the datastore sequence it has caught up
//! to. An update pulls the change feed from that checkpoint up to the
//! sequence observed when the update started, in sub-batches. Every
//! sub-batch rewrites the affected documents' rows and advances the
//! checkpoint in the same transaction, so a failure never leaves rows and
//! checkpoint out of step.

use sofa_core::{Change, Datastore, Sequence};
use sofa_sqlite::SqlitePool;
use tracing::{debug, info};

use super::{store, table};
use crate::error::QueryResult;

/// Changes applied per transaction unless configured otherwise
pub const DEFAULT_BATCH_SIZE: usize = 500;

enum BatchOutcome {
    Applied,
    /// The index was deleted while we were working
    Vanished,
    /// Another updater advanced the checkpoint first
    Moved(Sequence),
}

/// Bring one index up to the datastore's current sequence.
///
/// Returns the checkpoint reached, or `None` if the index no longer exists.
pub fn update_index(
    pool: &SqlitePool,
    datastore: &dyn Datastore,
    name: &str,
    batch_size: usize,
) -> QueryResult<Option<Sequence>> {
    let batch_size = batch_size.max(1);
    let target = datastore.current_sequence()?;

    let Some(mut since) = pool.with_connection(|conn| store::last_sequence(conn, name))? else {
        return Ok(None);
    };
    let start = since;

    while since < target {
        let mut changes = datastore.changes_since(since, batch_size)?;
        let fetched = changes.len();
        // Anything past the snapshot waits for the next update
        changes.retain(|change| change.sequence <= target);
        let final_batch = fetched < batch_size || changes.len() < fetched;

        let checkpoint = match changes.last() {
            Some(last) if !final_batch => last.sequence,
            _ => target,
        };

        match apply_batch(pool, name, since, &changes, checkpoint)? {
            BatchOutcome::Applied => {
                debug!(
                    index = name,
                    changes = changes.len(),
                    checkpoint,
                    "Applied index batch"
                );
                since = checkpoint;
            }
            BatchOutcome::Vanished => {
                debug!(index = name, "Index deleted during update");
                return Ok(None);
            }
            BatchOutcome::Moved(stored) => {
                debug!(index = name, expected = since, stored, "Checkpoint moved, resyncing");
                since = stored;
            }
        }
    }

    if since > start {
        info!(index = name, from = start, to = since, "Index updated");
    }
    Ok(Some(since))
}

/// Update every index in name order, stopping at the first failure.
///
/// Indexes updated before the failure keep their progress.
pub fn update_all(
    pool: &SqlitePool,
    datastore: &dyn Datastore,
    batch_size: usize,
) -> QueryResult<()> {
    let names: Vec<String> = pool
        .with_connection(|conn| store::list_definitions(conn))?
        .into_keys()
        .collect();

    for name in names {
        update_index(pool, datastore, &name, batch_size)?;
    }
    Ok(())
}

fn apply_batch(
    pool: &SqlitePool,
    name: &str,
    since: Sequence,
    changes: &[Change],
    checkpoint: Sequence,
) -> QueryResult<BatchOutcome> {
    pool.with_transaction(|tx| {
        let Some(mut definition) = store::get_definition(tx, name)? else {
            return Ok(BatchOutcome::Vanished);
        };
        if definition.last_sequence != since {
            return Ok(BatchOutcome::Moved(definition.last_sequence));
        }

        for change in changes {
            table::delete_document_rows(tx, &definition, &change.doc_id)?;
            if change.deleted {
                continue;
            }

            let rows = table::document_rows(&mut definition, &change.as_revision());
            for (path, field_type) in &rows.observed_types {
                store::set_field_type(tx, name, path, *field_type)?;
            }
            table::insert_rows(tx, &definition, rows.rows)?;
        }

        store::set_last_sequence(tx, name, checkpoint)?;
        Ok(BatchOutcome::Applied)
    })
}
