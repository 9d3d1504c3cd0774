use super::ExecutionContext;
use serde::{Deserialize, Serialize};

/// Context key under which a partition's index is published to its worker
/// step.
pub const PARTITION_ID_KEY: &str = "partitionId";
/// Context key for the inclusive lower bound of a range partition.
pub const RANGE_START_KEY: &str = "rangeStart";
/// Context key for the inclusive upper bound of a range partition.
pub const RANGE_END_KEY: &str = "rangeEnd";

/// One slice of work assigned to a partitioned step.
///
/// The descriptor's context carries the boundary parameters (key range,
/// partition id); the worker step's reader is built from that context, so
/// each partition reads a disjoint slice of the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    pub partition_id: usize,
    pub name: String,
    pub context: ExecutionContext,
}

impl PartitionDescriptor {
    /// Build a descriptor covering the inclusive key range `[start, end]`.
    pub fn for_range(partition_id: usize, start: i64, end: i64) -> Self {
        let mut context = ExecutionContext::new();
        context.put(PARTITION_ID_KEY, partition_id as i64);
        context.put(RANGE_START_KEY, start);
        context.put(RANGE_END_KEY, end);
        Self {
            partition_id,
            name: format!("partition{partition_id}"),
            context,
        }
    }

    pub fn range(&self) -> Option<(i64, i64)> {
        Some((
            self.context.get_i64(RANGE_START_KEY)?,
            self.context.get_i64(RANGE_END_KEY)?,
        ))
    }
}

/// Statistics-sink key for a partition's output, unique per
/// (job execution, partition id).
///
/// The original keyed partition writes by thread name and wall-clock
/// timestamp, so a re-run of a partition inserted a second row instead of
/// replacing its prior attempt. Keying by execution and partition makes the
/// write an upsert: re-running a partition overwrites its own output and
/// nothing else.
pub fn partition_result_key(execution_id: i64, partition_id: usize) -> String {
    format!("PARTITION_RESULT_{execution_id}_{partition_id}")
}
