//! Property tests for maintenance window evaluation.

use chrono::{DateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use proptest::prelude::*;
use upgrader_scheduler::{is_open, next_open};
use upgrader_state::MaintenanceWindow;

const ZONES: &[&str] = &[
    "UTC",
    "Europe/Berlin",
    "America/New_York",
    "Asia/Kolkata",
    "Australia/Sydney",
];

const DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn arb_window() -> impl Strategy<Value = MaintenanceWindow> {
    (0u32..24, 0u32..60, 0u32..24, 0u32..60, proptest::collection::vec(0usize..7, 0..3)).prop_map(
        |(sh, sm, eh, em, days)| MaintenanceWindow {
            start: NaiveTime::from_hms_opt(sh, sm, 0).unwrap(),
            end: NaiveTime::from_hms_opt(eh, em, 0).unwrap(),
            allowed_days: days.into_iter().map(|d| DAYS[d]).collect(),
        },
    )
}

fn arb_instant() -> impl Strategy<Value = DateTime<Utc>> {
    // 2020-01-01 .. 2030-01-01
    (1_577_836_800i64..1_893_456_000).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
}

proptest! {
    #[test]
    fn next_open_is_open_and_not_in_the_past(
        window in arb_window(),
        zone in 0usize..ZONES.len(),
        from in arb_instant(),
    ) {
        let tz: Tz = ZONES[zone].parse().unwrap();
        let opens = next_open(&window, tz, from);
        prop_assert!(opens >= from);
        prop_assert!(is_open(&window, tz, opens));
        // Any window opens within a week and a day.
        prop_assert!(opens - from <= chrono::Duration::days(8));
    }
}
