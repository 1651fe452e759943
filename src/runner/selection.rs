use std::collections::VecDeque;
use std::sync::Arc;

use crate::command::CommandModel;
use crate::config::SchedulerSettings;
use crate::error::BatchError;
use crate::list::WorkUnitList;
use crate::status::EXIT_STATUS_ABORTED;
use crate::unit::WorkUnit;

use super::SWITCH_THREADS;

/// Worker count requested by `-threads:N`. `None` means sequential: the
/// switch is absent, blank or zero.
pub(crate) fn thread_count(
    command: &CommandModel,
    settings: &SchedulerSettings,
) -> Result<Option<usize>, BatchError> {
    let Some(value) = command.value_of(SWITCH_THREADS) else {
        return Ok(None);
    };
    let requested = value
        .parse::<usize>()
        .map_err(|_| BatchError::InvalidThreadCount(value.to_string()))?;
    if requested > settings.max_threads {
        return Err(BatchError::ExcessiveThreadCount {
            requested,
            maximum: settings.max_threads,
        });
    }
    Ok((requested > 0).then_some(requested))
}

/// Units of one threaded iteration.
#[derive(Debug, Default)]
pub(crate) struct Chunk {
    pub units: Vec<Arc<WorkUnit>>,
    /// Units pulled for this chunk but aborted as output collisions.
    pub collided: usize,
}

impl Chunk {
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Pull units from the front of `pending` until the chunk holds `max` runnable
/// units. Colliding units are marked aborted and left out; they do not count
/// towards `max`.
pub(crate) fn next_chunk(
    list: &WorkUnitList,
    pending: &mut VecDeque<Arc<WorkUnit>>,
    max: usize,
) -> Chunk {
    let mut chunk = Chunk::default();
    while chunk.units.len() < max {
        let Some(unit) = pending.pop_front() else {
            break;
        };
        if list.output_claimed_earlier(unit.index()).is_some() {
            unit.set_status(EXIT_STATUS_ABORTED);
            chunk.collided += 1;
            continue;
        }
        chunk.units.push(unit);
    }
    chunk
}
