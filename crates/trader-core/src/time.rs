//! UTC 시간 유틸리티.
//!
//! 엔진 시계는 epoch 밀리초(`i64`)를 사용하고, 리스크 컴포넌트는
//! `DateTime<Utc>`를 사용합니다. 이 모듈은 두 표현 사이의 변환과
//! 마커 타임스탬프, 일/월 경계 계산을 담당합니다.

use crate::types::Timeframe;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

/// 마커 그리드 간격 (분).
pub const MARKER_INTERVAL_MINUTES: u32 = 5;

/// epoch 밀리초를 UTC 시각으로 변환합니다. 범위를 벗어나면 `None`.
pub fn ms_to_datetime(ts_ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ts_ms).single()
}

/// 마커 타임스탬프 여부.
///
/// 초가 0이고 분이 5의 배수인 시각(00:00:00, 00:05:00, ...)이 마커입니다.
/// 밀리초 부분은 보지 않으므로 같은 초 안의 여러 체결이 모두 마커가 될 수 있고,
/// 중복 실행 방지는 호출자(엔진) 책임입니다.
pub fn is_marker_timestamp(ts_ms: i64) -> bool {
    match ms_to_datetime(ts_ms) {
        Some(dt) => dt.second() == 0 && dt.minute() % MARKER_INTERVAL_MINUTES == 0,
        None => false,
    }
}

/// 타임스탬프가 속한 마커 구간의 시작 시각(ms).
pub fn marker_bucket(ts_ms: i64) -> i64 {
    Timeframe::M5.bucket_start(ts_ms)
}

/// 임의 타임프레임 경계 여부 (초 단위 정렬).
///
/// 감지 전용 헬퍼이며, 엔진의 평가 트리거는 5분 마커로 고정되어 있습니다.
pub fn is_timeframe_boundary(ts_ms: i64, timeframe: Timeframe) -> bool {
    let secs = ts_ms.div_euclid(1000);
    secs.rem_euclid(timeframe.as_secs() as i64) == 0
}

/// 주어진 시각 이후의 다음 UTC 자정.
pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Duration::days(1);
    start_of_day(tomorrow)
}

/// 주어진 시각이 속한 달의 다음 달 1일 00:00 UTC.
pub fn first_day_of_next_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    // 1일은 모든 달에 존재하므로 실패하지 않는다
    let date = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_else(|| now.date_naive());
    start_of_day(date)
}

/// 날짜의 00:00:00 UTC.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// 두 시각이 같은 UTC 달에 속하는지 확인합니다.
pub fn same_month(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

/// "YYYY-MM-DD" 형식의 날짜 문자열.
pub fn date_stamp(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
