//! 자금 관리 감사 로그.
//!
//! UTC 날짜별 JSON Lines 파일에 리스크 결정을 기록합니다.
//!
//! ```text
//! <audit_dir>/money_management_audit_2024-03-15.jsonl
//! <audit_dir>/money_management_audit_2024-03-16.jsonl
//! ```
//!
//! 모든 쓰기는 즉시 flush + fsync됩니다. 조회와 컴플라이언스 리포트는
//! 별도 인덱스 없이 해당 기간의 일자 파일을 다시 읽어 구성합니다.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};
use trader_core::time::date_stamp;
use trader_core::{TraderError, TraderResult};
use uuid::Uuid;

const FILE_PREFIX: &str = "money_management_audit_";

/// 감사 이벤트 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// 포지션 사이즈 계산 (승인/거부 모두)
    PositionSizing,
    /// 신규 포지션 검증
    PositionValidation,
    /// 포지션 진입
    PositionOpened,
    /// 포지션 청산
    PositionClosed,
    /// 서킷 브레이커 작동
    CircuitBreakerTriggered,
    /// 서킷 브레이커 해제
    CircuitBreakerReset,
    /// 월간 서킷 브레이커 재시도
    MonthlyRetry,
    /// 강제 손절 요청
    ForceStopLoss,
    /// 설정 변경
    ConfigurationChange,
    /// 거래 활성화
    TradingEnabled,
    /// 거래 비활성화
    TradingDisabled,
    /// 일일 리포트 생성
    DailyReport,
    /// 시스템 시작
    SystemStart,
    /// 시스템 종료
    SystemStop,
}

impl AuditEventType {
    /// 직렬화 이름 ("position_sizing" 등).
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::PositionSizing => "position_sizing",
            AuditEventType::PositionValidation => "position_validation",
            AuditEventType::PositionOpened => "position_opened",
            AuditEventType::PositionClosed => "position_closed",
            AuditEventType::CircuitBreakerTriggered => "circuit_breaker_triggered",
            AuditEventType::CircuitBreakerReset => "circuit_breaker_reset",
            AuditEventType::MonthlyRetry => "monthly_retry",
            AuditEventType::ForceStopLoss => "force_stop_loss",
            AuditEventType::ConfigurationChange => "configuration_change",
            AuditEventType::TradingEnabled => "trading_enabled",
            AuditEventType::TradingDisabled => "trading_disabled",
            AuditEventType::DailyReport => "daily_report",
            AuditEventType::SystemStart => "system_start",
            AuditEventType::SystemStop => "system_stop",
        }
    }
}

/// 감사 로그 항목 (불변).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// 항목 ID
    pub id: Uuid,
    /// 기록 시각
    pub timestamp: DateTime<Utc>,
    /// 이벤트 종류
    pub event_type: AuditEventType,
    /// 기록한 컴포넌트
    pub component: String,
    /// 구조화된 상세 정보
    pub payload: serde_json::Value,
    /// 처리 성공 여부
    pub success: bool,
    /// 영향 설명
    pub impact: String,
}

impl AuditLogEntry {
    /// 현재 시각으로 항목을 생성합니다.
    pub fn new(
        event_type: AuditEventType,
        component: impl Into<String>,
        payload: serde_json::Value,
        success: bool,
        impact: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            component: component.into(),
            payload,
            success,
            impact: impact.into(),
        }
    }

    /// 기록 시각을 지정합니다.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// 기간별 컴플라이언스 리포트.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub total_events: usize,
    pub events_by_type: BTreeMap<String, usize>,
    /// `success == false`인 항목 수
    pub failed_events: usize,
    pub circuit_breaker_triggers: usize,
    /// 작동 기록 중 긴급 정지가 실패한 건수
    pub emergency_stop_failures: usize,
    pub sizing_rejections: usize,
    pub configuration_changes: usize,
    /// 기록이 있는 날짜 수
    pub active_days: usize,
}

struct DayFile {
    date: NaiveDate,
    file: File,
}

/// 감사 로거.
///
/// 쓰기는 동기식이며 내부 `std::sync::Mutex`로 직렬화됩니다.
pub struct AuditLogger {
    dir: PathBuf,
    current: Mutex<Option<DayFile>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("dir", &self.dir)
            .finish()
    }
}

impl AuditLogger {
    /// 디렉토리를 만들고 로거를 생성합니다.
    pub fn new(dir: impl Into<PathBuf>) -> TraderResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            current: Mutex::new(None),
        })
    }

    /// 감사 로그 디렉토리.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 날짜의 감사 파일 경로.
    pub fn file_path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}{}.jsonl", FILE_PREFIX, date_stamp(date)))
    }

    /// 항목을 기록합니다.
    ///
    /// 항목의 날짜가 열린 파일과 다르면 새 날짜 파일로 전환합니다.
    pub fn log(&self, entry: &AuditLogEntry) -> TraderResult<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let date = entry.timestamp.date_naive();
        let mut guard = self
            .current
            .lock()
            .map_err(|_| TraderError::Internal("audit writer lock poisoned".into()))?;

        let needs_rotation = guard.as_ref().map(|f| f.date != date).unwrap_or(true);
        if needs_rotation {
            let path = self.file_path_for(date);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            debug!(path = %path.display(), "감사 로그 파일 전환");
            *guard = Some(DayFile { date, file });
        }

        if let Some(day_file) = guard.as_mut() {
            day_file.file.write_all(line.as_bytes())?;
            day_file.file.flush()?;
            day_file.file.sync_all()?;
        }
        Ok(())
    }

    /// 항목을 생성해 기록합니다. 기록 실패는 경고 로그로만 남깁니다.
    pub fn record(
        &self,
        event_type: AuditEventType,
        component: &str,
        payload: serde_json::Value,
        success: bool,
        impact: impl Into<String>,
    ) {
        let entry = AuditLogEntry::new(event_type, component, payload, success, impact);
        if let Err(e) = self.log(&entry) {
            warn!(event = event_type.as_str(), error = %e, "감사 로그 기록 실패");
        }
    }

    /// 기간 내(양 끝 포함) 감사 항목을 읽습니다.
    ///
    /// 파일이 없는 날짜는 건너뛰고, 파싱할 수 없는 줄은 경고 후 무시합니다.
    pub fn read_audit_logs(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> TraderResult<Vec<AuditLogEntry>> {
        if end < start {
            return Err(TraderError::InvalidInput(format!(
                "audit range end {} before start {}",
                end, start
            )));
        }

        let mut entries = Vec::new();
        let mut date = start;
        while date <= end {
            let path = self.file_path_for(date);
            if path.exists() {
                let reader = BufReader::new(File::open(&path)?);
                for (line_no, line) in reader.lines().enumerate() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<AuditLogEntry>(&line) {
                        Ok(entry) => entries.push(entry),
                        Err(e) => warn!(
                            path = %path.display(),
                            line = line_no + 1,
                            error = %e,
                            "감사 로그 줄 파싱 실패"
                        ),
                    }
                }
            }
            date += Duration::days(1);
        }
        Ok(entries)
    }

    /// 기간 내 컴플라이언스 리포트를 생성합니다.
    pub fn generate_compliance_report(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> TraderResult<ComplianceReport> {
        let entries = self.read_audit_logs(start, end)?;

        let mut events_by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut days = std::collections::BTreeSet::new();
        let mut failed_events = 0;
        let mut circuit_breaker_triggers = 0;
        let mut emergency_stop_failures = 0;
        let mut sizing_rejections = 0;
        let mut configuration_changes = 0;

        for entry in &entries {
            *events_by_type
                .entry(entry.event_type.as_str().to_string())
                .or_insert(0) += 1;
            days.insert(entry.timestamp.date_naive());

            if !entry.success {
                failed_events += 1;
            }
            match entry.event_type {
                AuditEventType::CircuitBreakerTriggered => {
                    circuit_breaker_triggers += 1;
                    let stop_failed = entry
                        .payload
                        .pointer("/emergency_stop/success")
                        .and_then(|v| v.as_bool())
                        .map(|ok| !ok)
                        .unwrap_or(false);
                    if stop_failed {
                        emergency_stop_failures += 1;
                    }
                }
                AuditEventType::PositionSizing => {
                    let approved = entry
                        .payload
                        .pointer("/result/approved")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(entry.success);
                    if !approved {
                        sizing_rejections += 1;
                    }
                }
                AuditEventType::ConfigurationChange => configuration_changes += 1,
                _ => {}
            }
        }

        Ok(ComplianceReport {
            start_date: start,
            end_date: end,
            generated_at: Utc::now(),
            total_events: entries.len(),
            events_by_type,
            failed_events,
            circuit_breaker_triggers,
            emergency_stop_failures,
            sizing_rejections,
            configuration_changes,
            active_days: days.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).single().unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[test]
    fn test_one_file_per_day() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(dir.path().join("audit")).unwrap();

        let first = AuditLogEntry::new(
            AuditEventType::SystemStart,
            "test",
            json!({}),
            true,
            "start",
        )
        .at(at(15, 23));
        let second = AuditLogEntry::new(
            AuditEventType::SystemStop,
            "test",
            json!({}),
            true,
            "stop",
        )
        .at(at(16, 1));

        logger.log(&first).unwrap();
        logger.log(&second).unwrap();

        let day1 = std::fs::read_to_string(logger.file_path_for(date(15))).unwrap();
        let day2 = std::fs::read_to_string(logger.file_path_for(date(16))).unwrap();
        assert_eq!(day1.lines().count(), 1);
        assert_eq!(day2.lines().count(), 1);
        assert!(logger
            .file_path_for(date(15))
            .ends_with("money_management_audit_2024-03-15.jsonl"));
    }

    #[test]
    fn test_read_range_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(dir.path()).unwrap();

        for day in 14..=16 {
            let entry = AuditLogEntry::new(
                AuditEventType::DailyReport,
                "metrics",
                json!({ "day": day }),
                true,
                "report",
            )
            .at(at(day, 12));
            logger.log(&entry).unwrap();
        }
        let mut file = OpenOptions::new()
            .append(true)
            .open(logger.file_path_for(date(15)))
            .unwrap();
        writeln!(file, "not json").unwrap();

        let entries = logger.read_audit_logs(date(15), date(16)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload["day"], 15);

        assert!(logger.read_audit_logs(date(16), date(15)).is_err());
    }

    #[test]
    fn test_compliance_report() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(dir.path()).unwrap();

        let entries = vec![
            AuditLogEntry::new(
                AuditEventType::PositionSizing,
                "sizer",
                json!({ "result": { "approved": false } }),
                false,
                "rejected",
            ),
            AuditLogEntry::new(
                AuditEventType::PositionSizing,
                "sizer",
                json!({ "result": { "approved": true } }),
                true,
                "approved",
            ),
            AuditLogEntry::new(
                AuditEventType::CircuitBreakerTriggered,
                "breaker",
                json!({ "emergency_stop": { "executed": true, "success": false } }),
                false,
                "halted",
            ),
        ];
        for entry in &entries {
            logger.log(&entry.clone().at(at(15, 10))).unwrap();
        }

        let report = logger
            .generate_compliance_report(date(1), date(31))
            .unwrap();
        assert_eq!(report.total_events, 3);
        assert_eq!(report.events_by_type["position_sizing"], 2);
        assert_eq!(report.sizing_rejections, 1);
        assert_eq!(report.circuit_breaker_triggers, 1);
        assert_eq!(report.emergency_stop_failures, 1);
        assert_eq!(report.failed_events, 2);
        assert_eq!(report.active_days, 1);
    }
}
