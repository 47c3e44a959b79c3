use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, UtcOffset};

use crate::domain::Snapshot;

/// Snapshots within this distance of "same time yesterday" are preferred outright.
pub const ALIGNMENT_TOLERANCE: Duration = Duration::minutes(30);

/// How the comparison snapshot was chosen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Alignment {
    /// Within `ALIGNMENT_TOLERANCE` of `current - 24h`.
    SameTimeYesterday,
    /// Closest time of day on yesterday's local date.
    SameDateYesterday,
    /// Most recent older snapshot.
    MostRecentOlder,
}

impl Alignment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Alignment::SameTimeYesterday => "SAME_TIME_YESTERDAY",
            Alignment::SameDateYesterday => "SAME_DATE_YESTERDAY",
            Alignment::MostRecentOlder => "MOST_RECENT_OLDER",
        }
    }
}

fn closest_to(
    snapshots: &[Snapshot],
    candidates: impl Iterator<Item = usize>,
    target: OffsetDateTime,
) -> Option<usize> {
    // Ties go to the later snapshot so the choice is deterministic.
    candidates.fold(None, |best: Option<usize>, i| {
        let d = (snapshots[i].captured_at - target).abs();
        match best {
            Some(b) if (snapshots[b].captured_at - target).abs() < d => Some(b),
            _ => Some(i),
        }
    })
}

/// Pick the snapshot `window[n-1]` should be compared with.
///
/// `snapshots` must be ascending by capture time. Only snapshots strictly older than the
/// current one qualify. Calendar dates are taken in `local_offset`; the 24h step is absolute.
pub fn select_previous(
    snapshots: &[Snapshot],
    local_offset: UtcOffset,
) -> Option<(usize, Alignment)> {
    let current = snapshots.last()?;
    let c = current.captured_at;
    let target = c - Duration::hours(24);
    let older: Vec<usize> = (0..snapshots.len() - 1)
        .filter(|&i| snapshots[i].captured_at < c)
        .collect();

    let in_tolerance = older
        .iter()
        .copied()
        .filter(|&i| (snapshots[i].captured_at - target).abs() <= ALIGNMENT_TOLERANCE);
    if let Some(i) = closest_to(snapshots, in_tolerance, target) {
        return Some((i, Alignment::SameTimeYesterday));
    }

    let target_date = target.to_offset(local_offset).date();
    let same_date = older
        .iter()
        .copied()
        .filter(|&i| snapshots[i].captured_at.to_offset(local_offset).date() == target_date);
    if let Some(i) = closest_to(snapshots, same_date, target) {
        return Some((i, Alignment::SameDateYesterday));
    }

    older
        .iter()
        .copied()
        .max_by_key(|&i| (snapshots[i].captured_at, i))
        .map(|i| (i, Alignment::MostRecentOlder))
}
