//! Gap detection over time-sorted partitions.
//!
//! Gaps are measured in the unit of the run kind being computed: fractional
//! days for seasons, minutes rounded to one decimal place for sequences.

use chrono::{DateTime, Duration, Utc};

const MS_PER_MINUTE: f64 = 60_000.0;
const MS_PER_DAY: f64 = 86_400_000.0;

/// Unit in which gaps are compared against a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapScale {
    Days,
    /// Minutes, rounded to the nearest tenth.
    Minutes,
}

impl GapScale {
    /// Expresses a duration in this unit.
    #[expect(
        clippy::cast_precision_loss,
        reason = "gaps are far below 2^52 milliseconds"
    )]
    pub fn measure(self, gap: Duration) -> f64 {
        let ms = gap.num_milliseconds() as f64;
        match self {
            Self::Days => ms / MS_PER_DAY,
            Self::Minutes => (ms / MS_PER_MINUTE * 10.0).round() / 10.0,
        }
    }
}

/// Gaps around one record in sort order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordGaps {
    /// Time since the previous record; `None` for the first.
    pub before: Option<f64>,
    /// Time until the next record; `None` for the last.
    pub after: Option<f64>,
}

/// Computes the gap before and after each timestamp.
///
/// `timestamps` must already be sorted ascending.
pub fn detect_gaps(timestamps: &[DateTime<Utc>], scale: GapScale) -> Vec<RecordGaps> {
    let between: Vec<f64> = timestamps
        .windows(2)
        .map(|pair| scale.measure(pair[1] - pair[0]))
        .collect();
    surround(&between, timestamps.len())
}

/// Computes gaps for a sequence of time spans sorted by start.
///
/// The gap before a span is measured from the furthest end reached by any
/// earlier span, so overlapping or nested spans have a zero gap. A point in
/// time is a span whose start equals its end, which makes [`detect_gaps`] the
/// special case of all-point input.
pub fn detect_span_gaps(spans: &[(DateTime<Utc>, DateTime<Utc>)], scale: GapScale) -> Vec<RecordGaps> {
    let mut between = Vec::with_capacity(spans.len().saturating_sub(1));
    let mut reach: Option<DateTime<Utc>> = None;
    for &(start, end) in spans {
        if let Some(reached) = reach {
            let gap = (start - reached).max(Duration::zero());
            between.push(scale.measure(gap));
        }
        reach = Some(reach.map_or(end, |reached| reached.max(end)));
    }
    surround(&between, spans.len())
}

fn surround(between: &[f64], len: usize) -> Vec<RecordGaps> {
    (0..len)
        .map(|idx| RecordGaps {
            before: idx.checked_sub(1).map(|prev| between[prev]),
            after: between.get(idx).copied(),
        })
        .collect()
}
