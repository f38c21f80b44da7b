//! Maintenance window evaluation.
//!
//! A window is open at an instant when, in the runtime's timezone, the
//! weekday is one of `allowed_days` or the time of day falls in
//! `[start, end)`. Windows with `start > end` wrap past midnight, and
//! `start == end` is open all day.

use chrono::{DateTime, Datelike, Days, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::debug;
use upgrader_state::{MaintenancePolicy, MaintenanceWindow, Runtime, StrategySpec};

/// How far ahead `next_open` searches. Any window opens within a week.
const SEARCH_DAYS: u64 = 8;

/// The runtime's advertised timezone, or UTC when absent or unknown.
pub fn runtime_timezone(runtime: &Runtime) -> Tz {
    match runtime.timezone.as_deref() {
        None => Tz::UTC,
        Some(name) => name.parse().unwrap_or_else(|_| {
            debug!(runtime = %runtime.runtime_id, timezone = name, "unknown timezone, using UTC");
            Tz::UTC
        }),
    }
}

/// Window governing `runtime`: the strategy's window, else the runtime's
/// own, else the policy fallback. `None` means always open.
pub fn effective_window<'a>(
    strategy: &'a StrategySpec,
    runtime: Option<&'a Runtime>,
    policy: &'a MaintenancePolicy,
) -> Option<&'a MaintenanceWindow> {
    strategy
        .maintenance_window
        .as_ref()
        .or_else(|| runtime.and_then(|r| r.maintenance_window.as_ref()))
        .or(policy.fallback_window.as_ref())
}

fn time_in_window(window: &MaintenanceWindow, time: NaiveTime) -> bool {
    let (start, end) = (window.start, window.end);
    if start == end {
        true
    } else if start < end {
        start <= time && time < end
    } else {
        time >= start || time < end
    }
}

pub fn is_open(window: &MaintenanceWindow, tz: Tz, at: DateTime<Utc>) -> bool {
    let local = at.with_timezone(&tz);
    window.allowed_days.contains(&local.weekday()) || time_in_window(window, local.time())
}

/// Earliest instant at or after `from` when the window is open.
pub fn next_open(window: &MaintenanceWindow, tz: Tz, from: DateTime<Utc>) -> DateTime<Utc> {
    if is_open(window, tz, from) {
        return from;
    }
    let today = from.with_timezone(&tz).date_naive();
    let mut best: Option<DateTime<Utc>> = None;
    for offset in 0..=SEARCH_DAYS {
        let Some(day) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        let mut candidates = vec![day.and_time(window.start)];
        if window.allowed_days.contains(&day.weekday()) {
            candidates.extend(day.and_hms_opt(0, 0, 0));
        }
        for local in candidates {
            let Some(at) = resolve_local(tz, local) else {
                continue;
            };
            if at > from && best.is_none_or(|b| at < b) && is_open(window, tz, at) {
                best = Some(at);
            }
        }
        if best.is_some() {
            break;
        }
    }
    // Unreachable for well-formed windows; treat as open.
    best.unwrap_or(from)
}

/// Map a local wall-clock time to UTC. Times skipped by a DST jump resolve
/// to the first valid instant after the gap.
fn resolve_local(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    for minutes in [0, 30, 60, 90, 120] {
        let shifted = local + chrono::Duration::minutes(minutes);
        if let Some(at) = tz.from_local_datetime(&shifted).earliest() {
            return Some(at.with_timezone(&Utc));
        }
    }
    None
}
