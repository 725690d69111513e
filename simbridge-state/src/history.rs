//! Bounded time-series buffers for tag history.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::value::TagValue;

/// One timestamped observation of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    /// Observation time (millis since epoch).
    pub timestamp: i64,
    /// Observed value.
    pub value: TagValue,
}

/// Fixed-capacity ring buffer of [`HistoryPoint`]s.
///
/// Appends evict the oldest point once the buffer is full; points are never
/// mutated or reordered.
#[derive(Debug, Clone)]
pub struct HistorySeries {
    points: VecDeque<HistoryPoint>,
    capacity: usize,
}

impl HistorySeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a point, evicting the oldest one at capacity.
    pub fn push(&mut self, timestamp: i64, value: TagValue) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(HistoryPoint { timestamp, value });
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Copy the points out in append order, oldest first.
    pub fn to_vec(&self) -> Vec<HistoryPoint> {
        self.points.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut series = HistorySeries::new(3);
        series.push(1, TagValue::Int(10));
        series.push(2, TagValue::Int(20));

        assert_eq!(series.len(), 2);
        let points = series.to_vec();
        assert_eq!(points[0].timestamp, 1);
        assert_eq!(points[1].value, TagValue::Int(20));
    }

    #[test]
    fn test_eviction_keeps_last_capacity_points_in_order() {
        let capacity = 5;
        let mut series = HistorySeries::new(capacity);
        for i in 0..12i64 {
            series.push(i, TagValue::Int(i * 100));
        }

        assert_eq!(series.len(), capacity);
        let points = series.to_vec();
        // Exactly the last `capacity` appends, in append order
        for (idx, point) in points.iter().enumerate() {
            let expected = 12 - capacity as i64 + idx as i64;
            assert_eq!(point.timestamp, expected);
            assert_eq!(point.value, TagValue::Int(expected * 100));
        }
    }

    #[test]
    fn test_empty_series() {
        let series = HistorySeries::new(4);
        assert!(series.is_empty());
        assert!(series.to_vec().is_empty());
    }
}
