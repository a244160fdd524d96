//! 重复规则展开引擎
//!
//! 纯函数库：给定重复模式和时间窗口，产出窗口内的发生时刻序列。
//! 所有日期运算在模式时区内进行，结果归一化为UTC。

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use timekeeper_core::models::pattern::{DayOfMonth, Frequency};
use timekeeper_core::models::RecurrencePattern;
use timekeeper_core::{SchedulerError, SchedulerResult};

// 单次展开的候选上限，窗口本身有界，正常远达不到
const MAX_STEPS: usize = 10_000;

/// 展开模式在窗口 `(window_start, window_end]` 内的发生时刻
///
/// 返回严格递增、无重复的UTC时刻序列。发生时刻不会早于等于
/// `window_start`（水位线排他），不会晚于 `window_end` 或模式的
/// `end_date`；`max_occurrences` 扣除已生成数后截断。
/// 纯函数：同样输入重复调用结果一致。
pub fn occurrences(
    pattern: &RecurrencePattern,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> SchedulerResult<Vec<DateTime<Utc>>> {
    let tz = pattern.parse_timezone()?;
    let start = window_start.max(pattern.generation_cursor());
    if start >= window_end {
        return Ok(Vec::new());
    }

    let anchor = pattern.created_at.with_timezone(&tz);
    let anchor_date = anchor.date_naive();
    let anchor_time = anchor.time();

    let mut out = match pattern.frequency {
        Frequency::Daily => daily(pattern, tz, anchor_date, anchor_time, start, window_end),
        Frequency::Weekly => weekly(pattern, tz, anchor_date, anchor_time, start, window_end),
        Frequency::Monthly => monthly(pattern, tz, anchor_date, anchor_time, start, window_end),
        Frequency::Yearly => yearly(pattern, tz, anchor_date, anchor_time, start, window_end),
        Frequency::Custom => custom(pattern, tz, start, window_end)?,
    };

    if let Some(end_date) = pattern.end_date {
        out.retain(|t| *t <= end_date);
    }
    if let Some(max) = pattern.max_occurrences {
        let remaining = max.saturating_sub(pattern.generated_count) as usize;
        out.truncate(remaining);
    }
    Ok(out)
}

/// 本地时刻解析为UTC
///
/// DST空档中的本地时间前移到其后最早的有效时刻；
/// 重叠时间取较早的偏移。
fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            // 空档通常为整小时，按分钟前移足以覆盖
            for minutes in 1..=180 {
                match tz.from_local_datetime(&(naive + Duration::minutes(minutes))) {
                    LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                        return Some(dt.with_timezone(&Utc));
                    }
                    LocalResult::None => continue,
                }
            }
            None
        }
    }
}

fn in_window(t: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    t > start && t <= end
}

// 快进到窗口起点附近的步进序号，留一步余量保证不漏
fn fast_forward(elapsed: i64, step: i64) -> i64 {
    if elapsed > 0 {
        (elapsed / step - 1).max(0)
    } else {
        0
    }
}

fn daily(
    pattern: &RecurrencePattern,
    tz: Tz,
    anchor_date: NaiveDate,
    anchor_time: NaiveTime,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let step = pattern.interval as i64;
    let start_date = start.with_timezone(&tz).date_naive();
    // 从锚点日起按interval步进，快进到窗口附近保持相位
    let elapsed = (start_date - anchor_date).num_days();
    let mut k = fast_forward(elapsed, step);

    let mut out = Vec::new();
    for _ in 0..MAX_STEPS {
        let Some(date) = anchor_date.checked_add_signed(Duration::days(k * step)) else {
            break;
        };
        if let Some(t) = resolve_local(tz, date, anchor_time) {
            if t > end {
                break;
            }
            if in_window(t, start, end) {
                out.push(t);
            }
        }
        k += 1;
    }
    out
}

fn weekly(
    pattern: &RecurrencePattern,
    tz: Tz,
    anchor_date: NaiveDate,
    anchor_time: NaiveTime,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let mut days: Vec<u8> = pattern.days_of_week.clone();
    days.sort_unstable();
    days.dedup();

    // 周块以锚点所在ISO周的周一对齐
    let week_anchor =
        anchor_date - Duration::days(anchor_date.weekday().num_days_from_monday() as i64);
    let block_days = pattern.interval as i64 * 7;

    let start_date = start.with_timezone(&tz).date_naive();
    let elapsed = (start_date - week_anchor).num_days();
    let mut block = fast_forward(elapsed, block_days);

    let mut out = Vec::new();
    'blocks: for _ in 0..MAX_STEPS {
        let Some(block_start) = week_anchor.checked_add_signed(Duration::days(block * block_days))
        else {
            break;
        };
        for day in &days {
            let date = block_start + Duration::days(*day as i64);
            if let Some(t) = resolve_local(tz, date, anchor_time) {
                if t > end {
                    break 'blocks;
                }
                if in_window(t, start, end) {
                    out.push(t);
                }
            }
        }
        block += 1;
    }
    out
}

fn monthly(
    pattern: &RecurrencePattern,
    tz: Tz,
    anchor_date: NaiveDate,
    anchor_time: NaiveTime,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    // validate()保证monthly必有day_of_month
    let Some(day_of_month) = pattern.day_of_month else {
        return Vec::new();
    };
    let step = pattern.interval as i64;
    let anchor_idx = month_index(anchor_date.year(), anchor_date.month());

    let start_date = start.with_timezone(&tz).date_naive();
    let elapsed = month_index(start_date.year(), start_date.month()) - anchor_idx;
    let mut k = fast_forward(elapsed, step);

    let mut out = Vec::new();
    for _ in 0..MAX_STEPS {
        let idx = anchor_idx + k * step;
        let (year, month) = month_from_index(idx);
        k += 1;

        let date = match day_of_month {
            DayOfMonth::Last => last_day_of_month(year, month),
            // 该月不存在该日号则整月跳过（不钳制，避免相邻日重复感）
            DayOfMonth::Day(d) => match NaiveDate::from_ymd_opt(year, month, d) {
                Some(date) => Some(date),
                None => continue,
            },
        };
        let Some(date) = date else { continue };

        if let Some(t) = resolve_local(tz, date, anchor_time) {
            if t > end {
                break;
            }
            if in_window(t, start, end) {
                out.push(t);
            }
        }
    }
    out
}

fn yearly(
    pattern: &RecurrencePattern,
    tz: Tz,
    anchor_date: NaiveDate,
    anchor_time: NaiveTime,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let step = pattern.interval as i64;
    let start_year = start.with_timezone(&tz).date_naive().year();
    let elapsed = (start_year - anchor_date.year()) as i64;
    let mut k = fast_forward(elapsed, step);

    let mut out = Vec::new();
    for _ in 0..MAX_STEPS {
        let year = anchor_date.year() + (k * step) as i32;
        k += 1;

        // 平年的2月29日跳过，与monthly的跳过策略一致
        let Some(date) = NaiveDate::from_ymd_opt(year, anchor_date.month(), anchor_date.day())
        else {
            continue;
        };
        if let Some(t) = resolve_local(tz, date, anchor_time) {
            if t > end {
                break;
            }
            if in_window(t, start, end) {
                out.push(t);
            }
        }
    }
    out
}

fn custom(
    pattern: &RecurrencePattern,
    tz: Tz,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> SchedulerResult<Vec<DateTime<Utc>>> {
    let expr = pattern.cron_expr.as_deref().unwrap_or_default();
    let schedule = Schedule::from_str(expr).map_err(|e| SchedulerError::InvalidCron {
        expr: expr.to_string(),
        message: e.to_string(),
    })?;

    let start_local = start.with_timezone(&tz);
    let out = schedule
        .after(&start_local)
        .take(MAX_STEPS)
        .map(|t| t.with_timezone(&Utc))
        .take_while(|t| *t <= end)
        .collect();
    Ok(out)
}

fn month_index(year: i32, month: u32) -> i64 {
    year as i64 * 12 + (month as i64 - 1)
}

fn month_from_index(idx: i64) -> (i32, u32) {
    (idx.div_euclid(12) as i32, (idx.rem_euclid(12) + 1) as u32)
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1).map(|d| d - Duration::days(1))
}
