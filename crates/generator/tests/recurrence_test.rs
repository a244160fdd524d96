use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use timekeeper_core::models::pattern::{
    DayOfMonth, Frequency, Priority, RecurrencePattern, TaskTemplate,
};
use timekeeper_core::models::NotificationChannel;
use timekeeper_generator::recurrence::occurrences;

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

fn pattern(frequency: Frequency, created_at: DateTime<Utc>) -> RecurrencePattern {
    RecurrencePattern {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        template: TaskTemplate {
            title: "周期巡检".to_string(),
            description: String::new(),
            priority: Priority::Medium,
            reminder_offset_minutes: None,
            channels: vec![NotificationChannel::Email],
        },
        frequency,
        interval: 1,
        days_of_week: vec![],
        day_of_month: None,
        cron_expr: None,
        end_date: None,
        max_occurrences: None,
        generated_count: 0,
        timezone: "UTC".to_string(),
        active: true,
        last_generated_at: None,
        created_at,
        updated_at: created_at,
    }
}

#[test]
fn weekly_monday_wednesday_from_thursday_anchor() {
    let created = utc(2026, 1, 1, 0, 0); // 周四
    let mut p = pattern(Frequency::Weekly, created);
    p.days_of_week = vec![0, 2]; // 周一、周三

    let occs = occurrences(&p, created, utc(2026, 1, 15, 0, 0)).unwrap();
    assert_eq!(
        occs,
        vec![
            utc(2026, 1, 5, 0, 0),
            utc(2026, 1, 7, 0, 0),
            utc(2026, 1, 12, 0, 0),
            utc(2026, 1, 14, 0, 0),
        ]
    );
}

#[test]
fn monthly_day_31_skips_february() {
    let created = utc(2026, 1, 15, 0, 0);
    let mut p = pattern(Frequency::Monthly, created);
    p.day_of_month = Some(DayOfMonth::Day(31));

    let occs = occurrences(&p, created, utc(2026, 4, 30, 0, 0)).unwrap();
    // 2月没有31日，整月跳过；3月31日正常出现
    assert_eq!(occs, vec![utc(2026, 1, 31, 0, 0), utc(2026, 3, 31, 0, 0)]);
}

#[test]
fn monthly_last_clamps_to_month_end() {
    let created = utc(2026, 1, 1, 0, 0);
    let mut p = pattern(Frequency::Monthly, created);
    p.day_of_month = Some(DayOfMonth::Last);

    let occs = occurrences(&p, created, utc(2026, 3, 31, 0, 0)).unwrap();
    assert_eq!(
        occs,
        vec![
            utc(2026, 1, 31, 0, 0),
            utc(2026, 2, 28, 0, 0),
            utc(2026, 3, 31, 0, 0),
        ]
    );
}

#[test]
fn yearly_feb_29_skips_non_leap_years() {
    let created = utc(2024, 2, 29, 0, 0);
    let p = pattern(Frequency::Yearly, created);

    let occs = occurrences(&p, created, utc(2028, 12, 31, 0, 0)).unwrap();
    assert_eq!(occs, vec![utc(2028, 2, 29, 0, 0)]);
}

#[test]
fn daily_interval_steps_and_excludes_window_start() {
    let created = utc(2026, 1, 1, 9, 0);
    let mut p = pattern(Frequency::Daily, created);
    p.interval = 2;

    let occs = occurrences(&p, created, utc(2026, 1, 8, 0, 0)).unwrap();
    // 窗口起点（水位线）本身排他
    assert_eq!(
        occs,
        vec![utc(2026, 1, 3, 9, 0), utc(2026, 1, 5, 9, 0), utc(2026, 1, 7, 9, 0)]
    );
}

#[test]
fn results_are_deterministic_and_strictly_increasing() {
    let created = utc(2026, 1, 1, 0, 0);
    let mut p = pattern(Frequency::Weekly, created);
    p.days_of_week = vec![4, 0, 2, 0]; // 乱序含重复

    let end = utc(2026, 3, 1, 0, 0);
    let first = occurrences(&p, created, end).unwrap();
    let second = occurrences(&p, created, end).unwrap();
    assert_eq!(first, second);
    assert!(first.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn max_occurrences_deducts_already_generated() {
    let created = utc(2026, 1, 1, 0, 0);
    let mut p = pattern(Frequency::Daily, created);
    p.max_occurrences = Some(3);
    p.generated_count = 1;

    let occs = occurrences(&p, created, utc(2026, 2, 1, 0, 0)).unwrap();
    assert_eq!(occs.len(), 2);
}

#[test]
fn end_date_caps_expansion() {
    let created = utc(2026, 1, 1, 0, 0);
    let mut p = pattern(Frequency::Daily, created);
    p.end_date = Some(utc(2026, 1, 4, 0, 0));

    let occs = occurrences(&p, created, utc(2026, 2, 1, 0, 0)).unwrap();
    assert_eq!(
        occs,
        vec![utc(2026, 1, 2, 0, 0), utc(2026, 1, 3, 0, 0), utc(2026, 1, 4, 0, 0)]
    );
}

#[test]
fn watermark_excludes_already_generated_range() {
    let created = utc(2026, 1, 1, 0, 0);
    let mut p = pattern(Frequency::Daily, created);
    p.last_generated_at = Some(utc(2026, 1, 10, 0, 0));

    let occs = occurrences(&p, created, utc(2026, 1, 13, 0, 0)).unwrap();
    assert_eq!(occs, vec![utc(2026, 1, 11, 0, 0), utc(2026, 1, 12, 0, 0), utc(2026, 1, 13, 0, 0)]);
}

#[test]
fn dst_gap_shifts_to_next_valid_instant() {
    // 美东2026-03-08 02:00跳到03:00，当天02:30不存在
    let created = utc(2026, 3, 6, 7, 30); // 本地 02:30 EST
    let mut p = pattern(Frequency::Daily, created);
    p.timezone = "America/New_York".to_string();

    let occs = occurrences(&p, created, utc(2026, 3, 9, 0, 0)).unwrap();
    assert_eq!(
        occs,
        vec![
            utc(2026, 3, 7, 7, 30), // 02:30 EST
            utc(2026, 3, 8, 7, 0),  // 前移到03:00 EDT
        ]
    );
}

#[test]
fn custom_cron_expands_in_pattern_timezone() {
    let created = utc(2026, 1, 1, 0, 0);
    let mut p = pattern(Frequency::Custom, created);
    p.cron_expr = Some("0 0 12 * * Mon".to_string());

    let occs = occurrences(&p, created, utc(2026, 1, 15, 0, 0)).unwrap();
    assert_eq!(occs, vec![utc(2026, 1, 5, 12, 0), utc(2026, 1, 12, 12, 0)]);
}

#[test]
fn invalid_cron_surfaces_error() {
    let created = utc(2026, 1, 1, 0, 0);
    let mut p = pattern(Frequency::Custom, created);
    p.cron_expr = Some("这不是cron".to_string());

    assert!(occurrences(&p, created, utc(2026, 1, 15, 0, 0)).is_err());
}

#[test]
fn empty_window_yields_nothing() {
    let created = utc(2026, 1, 10, 0, 0);
    let p = pattern(Frequency::Daily, created);
    // 窗口末端早于生成起点
    let occs = occurrences(&p, utc(2026, 1, 1, 0, 0), utc(2026, 1, 5, 0, 0)).unwrap();
    assert!(occs.is_empty());
}
