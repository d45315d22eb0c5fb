use std::ops::RangeInclusive;

use crate::{DEFAULT_PART_SIZE, DEFAULT_SINGLE_SHOT_LIMIT, Error, MAX_PART_COUNT};

/// Part layout of one file.
///
/// Every part but the last is exactly `part_size` bytes; the last part
/// carries the remainder (or a full `part_size` when it divides evenly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPlan {
    total_size: u64,
    part_size: u64,
    part_count: u32,
}

/// Byte range of a single part within the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// 1-based part number.
    pub part_number: u32,
    /// Offset of the first byte.
    pub offset: u64,
    /// Number of bytes in the part.
    pub length: u64,
}

impl UploadPlan {
    /// Computes the layout for a file of `total_size` bytes.
    pub fn new(total_size: u64, part_size: u64) -> Result<Self, Error> {
        if total_size == 0 {
            return Err(Error::InvalidInput("file is empty".into()));
        }
        if part_size == 0 {
            return Err(Error::InvalidInput("part size must be positive".into()));
        }

        let part_count = total_size.div_ceil(part_size);
        if part_count > MAX_PART_COUNT {
            return Err(Error::InvalidInput(format!(
                "{total_size} bytes needs {part_count} parts of {part_size} bytes \
                 (limit {MAX_PART_COUNT}); increase the part size"
            )));
        }

        Ok(Self {
            total_size,
            part_size,
            part_count: part_count as u32,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn part_count(&self) -> u32 {
        self.part_count
    }

    /// All part numbers of this plan, `1..=part_count`.
    pub fn part_numbers(&self) -> RangeInclusive<u32> {
        1..=self.part_count
    }

    /// Byte range of `part_number`, or `None` if it is outside the plan.
    pub fn part_range(&self, part_number: u32) -> Option<PartRange> {
        if part_number == 0 || part_number > self.part_count {
            return None;
        }
        let offset = u64::from(part_number - 1) * self.part_size;
        let length = std::cmp::min(self.part_size, self.total_size - offset);
        Some(PartRange {
            part_number,
            offset,
            length,
        })
    }

    /// Iterates the ranges of all parts in ascending order.
    pub fn ranges(&self) -> impl Iterator<Item = PartRange> + '_ {
        self.part_numbers().filter_map(|n| self.part_range(n))
    }
}

/// How a file of a given size is transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadRoute {
    /// One direct PUT; no session is created.
    SingleShot { total_size: u64 },
    /// Resumable multipart transfer.
    Multipart(UploadPlan),
}

/// Chooses between single-shot and multipart uploads and lays out parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Planner {
    part_size: u64,
    single_shot_limit: u64,
}

impl Default for Planner {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            single_shot_limit: DEFAULT_SINGLE_SHOT_LIMIT,
        }
    }
}

impl Planner {
    /// Creates a planner. A `part_size` of 0 selects [`DEFAULT_PART_SIZE`].
    pub fn new(part_size: u64, single_shot_limit: u64) -> Self {
        let part_size = if part_size == 0 {
            DEFAULT_PART_SIZE
        } else {
            part_size
        };
        Self {
            part_size,
            single_shot_limit,
        }
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn single_shot_limit(&self) -> u64 {
        self.single_shot_limit
    }

    /// Lays out a multipart upload regardless of the single-shot limit.
    pub fn plan(&self, total_size: u64) -> Result<UploadPlan, Error> {
        UploadPlan::new(total_size, self.part_size)
    }

    /// Picks the transfer route for a file of `total_size` bytes.
    pub fn route(&self, total_size: u64) -> Result<UploadRoute, Error> {
        if total_size == 0 {
            return Err(Error::InvalidInput("file is empty".into()));
        }
        if total_size <= self.single_shot_limit {
            return Ok(UploadRoute::SingleShot { total_size });
        }
        Ok(UploadRoute::Multipart(self.plan(total_size)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn twelve_mib_in_five_mib_parts() {
        let plan = UploadPlan::new(12 * MIB, 5 * MIB).unwrap();
        assert_eq!(plan.part_count(), 3);

        let lengths: Vec<u64> = plan.ranges().map(|r| r.length).collect();
        assert_eq!(lengths, vec![5 * MIB, 5 * MIB, 2 * MIB]);

        let last = plan.part_range(3).unwrap();
        assert_eq!(last.offset, 10 * MIB);
    }

    #[test]
    fn evenly_divisible_last_part_is_full() {
        let plan = UploadPlan::new(10 * MIB, 5 * MIB).unwrap();
        assert_eq!(plan.part_count(), 2);
        assert_eq!(plan.part_range(2).unwrap().length, 5 * MIB);
    }

    #[test]
    fn smaller_than_one_part() {
        let plan = UploadPlan::new(1, 5 * MIB).unwrap();
        assert_eq!(plan.part_count(), 1);
        assert_eq!(plan.part_range(1).unwrap().length, 1);
    }

    #[test]
    fn part_lengths_sum_to_total() {
        for (total, part) in [(1u64, 1u64), (7, 3), (99, 10), (100, 10), (12345, 678), (5, 7)] {
            let plan = UploadPlan::new(total, part).unwrap();
            assert_eq!(plan.part_count() as u64, total.div_ceil(part), "{total}/{part}");

            let sum: u64 = plan.ranges().map(|r| r.length).sum();
            assert_eq!(sum, total, "{total}/{part}");

            // Ranges are contiguous.
            let mut expected_offset = 0;
            for r in plan.ranges() {
                assert_eq!(r.offset, expected_offset);
                expected_offset += r.length;
            }
        }
    }

    #[test]
    fn zero_size_rejected() {
        assert!(matches!(
            UploadPlan::new(0, 5 * MIB),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn zero_part_size_rejected() {
        assert!(matches!(UploadPlan::new(10, 0), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn too_many_parts_rejected() {
        assert!(UploadPlan::new(MAX_PART_COUNT + 1, 1).is_err());
        assert!(UploadPlan::new(MAX_PART_COUNT, 1).is_ok());
    }

    #[test]
    fn part_range_out_of_bounds() {
        let plan = UploadPlan::new(10, 4).unwrap();
        assert!(plan.part_range(0).is_none());
        assert!(plan.part_range(4).is_none());
    }

    #[test]
    fn route_below_limit_is_single_shot() {
        let planner = Planner::default();
        assert_eq!(
            planner.route(100 * MIB).unwrap(),
            UploadRoute::SingleShot {
                total_size: 100 * MIB
            }
        );
        assert!(matches!(
            planner.route(DEFAULT_SINGLE_SHOT_LIMIT).unwrap(),
            UploadRoute::SingleShot { .. }
        ));
    }

    #[test]
    fn route_above_limit_is_multipart() {
        let planner = Planner::new(5 * MIB, 10 * MIB);
        match planner.route(12 * MIB).unwrap() {
            UploadRoute::Multipart(plan) => assert_eq!(plan.part_count(), 3),
            other => panic!("expected multipart, got {other:?}"),
        }
    }

    #[test]
    fn zero_part_size_uses_default() {
        let planner = Planner::new(0, 0);
        assert_eq!(planner.part_size(), DEFAULT_PART_SIZE);
    }
}
