//! Segment → partition resolution.

use std::collections::BTreeSet;

use stratum_core::{PartitionConfig, SegmentMetadata};

use crate::error::{PlacementError, PlacementResult};

/// Compute the partition a segment belongs to.
///
/// Unpartitioned tables put every segment in partition 0. Otherwise every
/// value the segment holds for the partition column must map to the same
/// partition.
pub fn resolve_partition(
    segment: &SegmentMetadata,
    config: Option<&PartitionConfig>,
) -> PlacementResult<u32> {
    let Some(config) = config else {
        return Ok(0);
    };

    let ranges = segment
        .value_ranges(&config.column)
        .ok_or_else(|| PlacementError::MissingPartitionColumn {
            segment: segment.name.clone(),
            column: config.column.clone(),
        })?;

    let num_partitions = config.num_partitions.max(1);
    let mut partitions = BTreeSet::new();
    for range in ranges {
        if range.width() >= u128::from(num_partitions) {
            // Consecutive values cycle through every partition.
            partitions.extend(0..num_partitions);
        } else {
            for value in range.min..=range.max {
                partitions.insert(config.function.partition(value, num_partitions));
                if partitions.len() > 1 {
                    break;
                }
            }
        }
        if partitions.len() > 1 {
            break;
        }
    }

    match partitions.len() {
        1 => Ok(partitions.into_iter().next().unwrap_or(0)),
        _ => Err(PlacementError::AmbiguousPartition {
            segment: segment.name.clone(),
            column: config.column.clone(),
            partitions: partitions.into_iter().collect(),
        }),
    }
}
