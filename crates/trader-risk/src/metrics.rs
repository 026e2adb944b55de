//! 전략 통합 성과 메트릭.
//!
//! 청산된 거래(`TradeRecord`)와 실시간 미실현 손익으로 전역/전략별 메트릭을 갱신하고,
//! 일일 리포트와 리스크 등급을 생성합니다.
//!
//! 저장 파일:
//! - `global_metrics.json` - 메트릭 + 거래 이력 스냅샷 (마지막 쓰기 우선)
//! - `daily_reports/daily_report_YYYY-MM-DD.json`

use crate::audit::{AuditEventType, AuditLogger};
use crate::config::BaseConfiguration;
use crate::tasks::BackgroundTask;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use trader_core::time::{date_stamp, next_utc_midnight, same_month, start_of_day};
use trader_core::{pct_change, ratio_pct, Direction, StateStore, TraderResult};
use uuid::Uuid;

/// 보관하는 최대 거래 이력 수.
pub const MAX_TRADE_HISTORY: usize = 10_000;

/// 손실 거래가 없을 때의 profit factor 상한.
pub const PROFIT_FACTOR_CAP: Decimal = dec!(100);

const DAILY_REPORT_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const COMPONENT: &str = "metrics_collector";

/// 청산된 거래 기록 (불변).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub strategy: String,
    pub symbol: String,
    pub side: Direction,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    /// 실현 손익 (USDT)
    pub pnl: Decimal,
    /// 진입가 대비 손익률 (방향 반영)
    pub pnl_pct: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    /// 보유 시간 (초, 항상 0 이상)
    pub duration_secs: i64,
    pub is_win: bool,
    pub exit_reason: String,
}

impl TradeRecord {
    /// 진입/청산 정보로 거래 기록을 생성합니다.
    ///
    /// 손익 부호는 방향과 가격 변화로 결정됩니다.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        strategy: impl Into<String>,
        symbol: impl Into<String>,
        side: Direction,
        entry_price: Decimal,
        exit_price: Decimal,
        quantity: Decimal,
        entry_time: DateTime<Utc>,
        exit_time: DateTime<Utc>,
        exit_reason: impl Into<String>,
    ) -> Self {
        let sign = Decimal::from(side.sign());
        let pnl = (exit_price - entry_price) * quantity * sign;
        let pnl_pct = pct_change(entry_price, exit_price) * sign;
        let duration_secs = (exit_time - entry_time).num_seconds().max(0);

        Self {
            id: Uuid::new_v4(),
            strategy: strategy.into(),
            symbol: symbol.into(),
            side,
            entry_price,
            exit_price,
            quantity,
            pnl,
            pnl_pct,
            entry_time,
            exit_time,
            duration_secs,
            is_win: pnl_pct > Decimal::ZERO,
            exit_reason: exit_reason.into(),
        }
    }

    fn is_loss(&self) -> bool {
        self.pnl_pct < Decimal::ZERO
    }
}

/// 거래 통계 누적치.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_positions: u64,
    pub winning_positions: u64,
    pub losing_positions: u64,
    /// 승률 (0-100)
    pub win_rate: Decimal,
    /// 누적 실현 손익
    pub total_pnl: Decimal,
    pub gross_profit: Decimal,
    /// 손실 합계의 절대값
    pub gross_loss: Decimal,
    /// 총이익 / 총손실 (0 이상)
    pub profit_factor: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub average_pnl: Decimal,
    pub last_trade_time: Option<DateTime<Utc>>,
}

impl TradeStats {
    fn apply(&mut self, record: &TradeRecord) {
        self.total_positions += 1;
        self.total_pnl += record.pnl;

        if record.is_win {
            self.winning_positions += 1;
            self.gross_profit += record.pnl.max(Decimal::ZERO);
            self.largest_win = self.largest_win.max(record.pnl);
        } else if record.is_loss() {
            self.losing_positions += 1;
            self.gross_loss += (-record.pnl).max(Decimal::ZERO);
            self.largest_loss = self.largest_loss.min(record.pnl);
        }

        self.win_rate = ratio_pct(
            Decimal::from(self.winning_positions),
            Decimal::from(self.total_positions),
        );
        self.profit_factor = if self.gross_loss.is_zero() {
            if self.gross_profit.is_zero() {
                Decimal::ZERO
            } else {
                PROFIT_FACTOR_CAP
            }
        } else {
            (self.gross_profit / self.gross_loss).min(PROFIT_FACTOR_CAP)
        };
        self.average_pnl = self.total_pnl / Decimal::from(self.total_positions);
        self.last_trade_time = Some(record.exit_time);
    }
}

/// 전략별 메트릭.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyMetrics {
    pub strategy: String,
    pub stats: TradeStats,
}

/// 전역 메트릭.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalMetrics {
    pub stats: TradeStats,
    /// 현재 미실현 손익
    pub unrealized_pnl: Decimal,
    /// 실현 + 미실현
    pub total_pnl: Decimal,
    pub daily_realized_pnl: Decimal,
    /// 오늘 실현 + 미실현
    pub daily_pnl: Decimal,
    /// 시작 자본 대비 오늘 손익률
    pub daily_pnl_pct: Decimal,
    pub monthly_realized_pnl: Decimal,
    pub monthly_pnl: Decimal,
    pub monthly_pnl_pct: Decimal,
    pub peak_equity: Decimal,
    pub current_equity: Decimal,
    pub current_drawdown_pct: Decimal,
    pub max_drawdown_pct: Decimal,
    /// 현재 집계 기간 (UTC 날짜)
    pub period_start: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl GlobalMetrics {
    fn new(starting_capital: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            stats: TradeStats::default(),
            unrealized_pnl: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            daily_realized_pnl: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            daily_pnl_pct: Decimal::ZERO,
            monthly_realized_pnl: Decimal::ZERO,
            monthly_pnl: Decimal::ZERO,
            monthly_pnl_pct: Decimal::ZERO,
            peak_equity: starting_capital,
            current_equity: starting_capital,
            current_drawdown_pct: Decimal::ZERO,
            max_drawdown_pct: Decimal::ZERO,
            period_start: start_of_day(now.date_naive()),
            last_updated: now,
        }
    }

    /// `now`의 UTC 날짜가 집계 기간보다 뒤이면 일일(달이 바뀌었으면 월간) 실현 손익을 비웁니다.
    ///
    /// 기간은 앞으로만 이동합니다. 롤오버가 일어났으면 `true`.
    fn roll_period(&mut self, now: DateTime<Utc>) -> bool {
        if now.date_naive() <= self.period_start.date_naive() {
            return false;
        }
        if !same_month(self.period_start, now) {
            self.monthly_realized_pnl = Decimal::ZERO;
        }
        self.daily_realized_pnl = Decimal::ZERO;
        self.period_start = start_of_day(now.date_naive());
        true
    }

    fn recompute(&mut self, limits: &MetricsLimits) {
        let capital = limits.starting_capital;
        self.total_pnl = self.stats.total_pnl + self.unrealized_pnl;
        self.daily_pnl = self.daily_realized_pnl + self.unrealized_pnl;
        self.monthly_pnl = self.monthly_realized_pnl + self.unrealized_pnl;
        self.daily_pnl_pct = ratio_pct(self.daily_pnl, capital);
        self.monthly_pnl_pct = ratio_pct(self.monthly_pnl, capital);

        self.current_equity = capital + self.total_pnl;
        if self.current_equity > self.peak_equity {
            self.peak_equity = self.current_equity;
        }
        self.current_drawdown_pct = if self.peak_equity > Decimal::ZERO {
            ratio_pct(self.peak_equity - self.current_equity, self.peak_equity)
        } else {
            Decimal::ZERO
        };
        self.max_drawdown_pct = self.max_drawdown_pct.max(self.current_drawdown_pct);
        self.last_updated = Utc::now();
    }
}

/// 리스크 등급.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// 메트릭 계산에 쓰이는 한도 값.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsLimits {
    pub starting_capital: Decimal,
    pub daily_loss_limit_pct: Decimal,
    pub monthly_loss_limit_pct: Decimal,
}

impl MetricsLimits {
    pub fn from_config(config: &BaseConfiguration) -> Self {
        Self {
            starting_capital: config.starting_capital,
            daily_loss_limit_pct: config.daily_loss_limit_pct,
            monthly_loss_limit_pct: config.monthly_loss_limit_pct,
        }
    }
}

/// 한도까지의 거리와 낙폭으로 리스크 등급을 판정합니다.
///
/// | 등급 | 조건 |
/// |---|---|
/// | CRITICAL | 일일 여유 ≤ 1%p 또는 월간 여유 ≤ 3%p |
/// | HIGH | 일일 여유 ≤ 2%p 또는 월간 여유 ≤ 5%p |
/// | MEDIUM | 일일 여유 ≤ 3%p 또는 낙폭 > 8% |
/// | LOW | 그 외 |
pub fn assess_risk_level(metrics: &GlobalMetrics, limits: &MetricsLimits) -> RiskLevel {
    let daily_loss = (-metrics.daily_pnl_pct).max(Decimal::ZERO);
    let monthly_loss = (-metrics.monthly_pnl_pct).max(Decimal::ZERO);
    let daily_remaining = limits.daily_loss_limit_pct - daily_loss;
    let monthly_remaining = limits.monthly_loss_limit_pct - monthly_loss;

    if daily_remaining <= dec!(1) || monthly_remaining <= dec!(3) {
        RiskLevel::Critical
    } else if daily_remaining <= dec!(2) || monthly_remaining <= dec!(5) {
        RiskLevel::High
    } else if daily_remaining <= dec!(3) || metrics.current_drawdown_pct > dec!(8) {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// 일일 리포트.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub global: GlobalMetrics,
    pub strategies: BTreeMap<String, StrategyMetrics>,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
}

/// 영속화 스냅샷.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub global: GlobalMetrics,
    pub strategies: BTreeMap<String, StrategyMetrics>,
    pub trade_history: Vec<TradeRecord>,
    pub saved_at: DateTime<Utc>,
}

struct MetricsState {
    global: GlobalMetrics,
    strategies: BTreeMap<String, StrategyMetrics>,
    history: VecDeque<TradeRecord>,
}

impl MetricsState {
    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            global: self.global.clone(),
            strategies: self.strategies.clone(),
            trade_history: self.history.iter().cloned().collect(),
            saved_at: Utc::now(),
        }
    }
}

/// 전역 메트릭 수집기.
pub struct GlobalMetricsCollector {
    state: RwLock<MetricsState>,
    limits: RwLock<MetricsLimits>,
    store: Arc<dyn StateStore<MetricsSnapshot>>,
    reports_dir: Option<PathBuf>,
    audit: Option<Arc<AuditLogger>>,
}

impl GlobalMetricsCollector {
    /// 저장된 스냅샷을 불러와 수집기를 생성합니다. 실패하면 빈 메트릭으로 시작합니다.
    pub fn new(limits: MetricsLimits, store: Arc<dyn StateStore<MetricsSnapshot>>) -> Self {
        let state = match store.load() {
            Ok(Some(snapshot)) => {
                info!(
                    trades = snapshot.global.stats.total_positions,
                    strategies = snapshot.strategies.len(),
                    "메트릭 스냅샷 복원"
                );
                let mut history: VecDeque<TradeRecord> = snapshot.trade_history.into();
                while history.len() > MAX_TRADE_HISTORY {
                    history.pop_front();
                }
                let mut global = snapshot.global;
                if global.roll_period(Utc::now()) {
                    info!(period_start = %global.period_start, "지난 기간 스냅샷, 손실 집계 기간 갱신");
                    global.recompute(&limits);
                }
                MetricsState {
                    global,
                    strategies: snapshot.strategies,
                    history,
                }
            }
            Ok(None) => Self::fresh_state(&limits),
            Err(e) => {
                warn!(error = %e, "메트릭 스냅샷 로드 실패, 새 메트릭으로 시작");
                Self::fresh_state(&limits)
            }
        };

        Self {
            state: RwLock::new(state),
            limits: RwLock::new(limits),
            store,
            reports_dir: None,
            audit: None,
        }
    }

    fn fresh_state(limits: &MetricsLimits) -> MetricsState {
        MetricsState {
            global: GlobalMetrics::new(limits.starting_capital, Utc::now()),
            strategies: BTreeMap::new(),
            history: VecDeque::new(),
        }
    }

    /// 일일 리포트 저장 디렉토리를 설정합니다.
    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = Some(dir.into());
        self
    }

    /// 감사 로거를 연결합니다.
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// 청산된 거래를 기록합니다.
    pub async fn record_trade(&self, record: TradeRecord) {
        let limits = self.limits.read().await.clone();
        let mut state = self.state.write().await;
        state.global.roll_period(Utc::now());

        state.global.stats.apply(&record);
        state.global.daily_realized_pnl += record.pnl;
        state.global.monthly_realized_pnl += record.pnl;
        state.global.recompute(&limits);

        state
            .strategies
            .entry(record.strategy.clone())
            .or_insert_with(|| StrategyMetrics {
                strategy: record.strategy.clone(),
                stats: TradeStats::default(),
            })
            .stats
            .apply(&record);

        debug!(
            strategy = %record.strategy,
            symbol = %record.symbol,
            pnl = %record.pnl,
            pnl_pct = %record.pnl_pct.round_dp(4),
            total_positions = state.global.stats.total_positions,
            "거래 기록"
        );

        state.history.push_back(record);
        while state.history.len() > MAX_TRADE_HISTORY {
            state.history.pop_front();
        }
    }

    /// 전체 미실현 손익을 갱신합니다.
    pub async fn update_real_time_pnl(&self, unrealized_pnl: Decimal) {
        let limits = self.limits.read().await.clone();
        let mut state = self.state.write().await;
        state.global.roll_period(Utc::now());
        state.global.unrealized_pnl = unrealized_pnl;
        state.global.recompute(&limits);
    }

    /// `now` 기준으로 일일/월간 손실 집계 기간을 갱신합니다.
    ///
    /// UTC 날짜가 바뀌었으면 일일 실현 손익을, 달이 바뀌었으면 월간 실현 손익을 비웁니다.
    /// 롤오버가 일어났으면 `true`.
    pub async fn roll_periods(&self, now: DateTime<Utc>) -> bool {
        let limits = self.limits.read().await.clone();
        let mut state = self.state.write().await;
        if !state.global.roll_period(now) {
            return false;
        }
        state.global.recompute(&limits);
        debug!(period_start = %state.global.period_start, "손실 집계 기간 롤오버");
        true
    }

    /// 오늘 손익 (실현 + 미실현).
    pub async fn daily_pnl(&self) -> Decimal {
        self.state.read().await.global.daily_pnl
    }

    /// 이번 달 손익 (실현 + 미실현).
    pub async fn monthly_pnl(&self) -> Decimal {
        self.state.read().await.global.monthly_pnl
    }

    /// 전역 메트릭 사본.
    pub async fn global_metrics(&self) -> GlobalMetrics {
        self.state.read().await.global.clone()
    }

    /// 전략 메트릭 사본.
    pub async fn strategy_metrics(&self, strategy: &str) -> Option<StrategyMetrics> {
        self.state.read().await.strategies.get(strategy).cloned()
    }

    /// 모든 전략 메트릭.
    pub async fn all_strategy_metrics(&self) -> BTreeMap<String, StrategyMetrics> {
        self.state.read().await.strategies.clone()
    }

    /// 최근 거래 `limit`개 (최신 순).
    pub async fn recent_trades(&self, limit: usize) -> Vec<TradeRecord> {
        self.state
            .read()
            .await
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// 보관 중인 거래 이력 수.
    pub async fn history_len(&self) -> usize {
        self.state.read().await.history.len()
    }

    /// 현재 리스크 등급.
    pub async fn risk_level(&self) -> RiskLevel {
        let limits = self.limits.read().await.clone();
        let state = self.state.read().await;
        assess_risk_level(&state.global, &limits)
    }

    /// 한도 값을 교체하고 파생 값을 다시 계산합니다.
    pub async fn update_limits(&self, limits: MetricsLimits) {
        let mut state = self.state.write().await;
        state.global.recompute(&limits);
        drop(state);
        *self.limits.write().await = limits;
    }

    /// 일일 리포트를 생성합니다.
    pub async fn generate_daily_report(&self, now: DateTime<Utc>) -> DailyReport {
        let limits = self.limits.read().await.clone();
        let state = self.state.read().await;
        let risk_level = assess_risk_level(&state.global, &limits);
        let recommendations = build_recommendations(&state.global, &state.strategies, risk_level);

        DailyReport {
            date: state.global.period_start.date_naive(),
            generated_at: now,
            global: state.global.clone(),
            strategies: state.strategies.clone(),
            risk_level,
            recommendations,
        }
    }

    /// 일일 리포트 파일 경로.
    pub fn report_path(dir: &Path, date: NaiveDate) -> PathBuf {
        dir.join(format!("daily_report_{}.json", date_stamp(date)))
    }

    /// 일일 리포트를 pretty JSON으로 저장합니다.
    ///
    /// 리포트 디렉토리가 설정되지 않았으면 `Ok(None)`.
    pub fn save_daily_report(&self, report: &DailyReport) -> TraderResult<Option<PathBuf>> {
        let Some(dir) = &self.reports_dir else {
            return Ok(None);
        };
        std::fs::create_dir_all(dir)?;
        let path = Self::report_path(dir, report.date);
        std::fs::write(&path, serde_json::to_string_pretty(report)?)?;
        Ok(Some(path))
    }

    /// 메트릭 스냅샷을 저장합니다.
    pub async fn persist(&self) -> TraderResult<()> {
        let snapshot = self.state.read().await.snapshot();
        self.store.save(&snapshot)
    }

    /// 일일 리포트를 저장하고 일일(월이 바뀌었으면 월간) 집계를 초기화합니다.
    pub async fn daily_reset(&self, now: DateTime<Utc>) -> DailyReport {
        let report = self.generate_daily_report(now).await;
        match self.save_daily_report(&report) {
            Ok(Some(path)) => info!(path = %path.display(), "일일 리포트 저장"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "일일 리포트 저장 실패"),
        }

        {
            let limits = self.limits.read().await.clone();
            let mut state = self.state.write().await;
            let month_changed = !same_month(state.global.period_start, now);
            state.global.daily_realized_pnl = Decimal::ZERO;
            if month_changed {
                state.global.monthly_realized_pnl = Decimal::ZERO;
            }
            state.global.period_start = start_of_day(now.date_naive());
            state.global.recompute(&limits);
        }

        if let Err(e) = self.persist().await {
            warn!(error = %e, "메트릭 스냅샷 저장 실패");
        }

        if let Some(audit) = &self.audit {
            audit.record(
                AuditEventType::DailyReport,
                COMPONENT,
                serde_json::json!({
                    "date": report.date,
                    "risk_level": report.risk_level,
                    "total_positions": report.global.stats.total_positions,
                    "daily_pnl": report.global.daily_pnl,
                    "recommendations": report.recommendations,
                }),
                true,
                format!("일일 집계 초기화 (리스크 {})", report.risk_level),
            );
        }

        info!(
            date = %report.date,
            risk_level = %report.risk_level,
            "일일 메트릭 초기화"
        );
        report
    }

    /// 스냅샷 저장 작업과 UTC 자정마다 도는 일일 리셋 작업을 시작합니다.
    pub fn spawn_tasks(self: &Arc<Self>, snapshot_interval: Duration) -> Vec<BackgroundTask> {
        let collector = Arc::clone(self);
        let snapshot = BackgroundTask::spawn_periodic("metrics_snapshot", snapshot_interval, move || {
            let collector = collector.clone();
            async move {
                if let Err(e) = collector.persist().await {
                    warn!(error = %e, "메트릭 스냅샷 저장 실패");
                }
            }
        });

        let now = Utc::now();
        let until_midnight = (next_utc_midnight(now) - now)
            .to_std()
            .unwrap_or(DAILY_REPORT_INTERVAL);
        let collector = Arc::clone(self);
        let daily = BackgroundTask::spawn_aligned(
            "metrics_daily_report",
            until_midnight,
            DAILY_REPORT_INTERVAL,
            move || {
                let collector = collector.clone();
                async move {
                    collector.daily_reset(Utc::now()).await;
                }
            },
        );

        vec![snapshot, daily]
    }
}

fn build_recommendations(
    global: &GlobalMetrics,
    strategies: &BTreeMap<String, StrategyMetrics>,
    risk_level: RiskLevel,
) -> Vec<String> {
    let mut recommendations = Vec::new();
    let stats = &global.stats;

    if stats.total_positions > 0 && stats.win_rate < dec!(40) {
        recommendations.push(format!(
            "승률 {}%가 40% 미만입니다. 진입 조건을 재검토하세요.",
            stats.win_rate.round_dp(2)
        ));
    }
    if stats.total_positions > 0 && stats.profit_factor < Decimal::ONE {
        recommendations.push(format!(
            "Profit factor {}가 1 미만입니다. 손익비를 개선하세요.",
            stats.profit_factor.round_dp(2)
        ));
    }
    if matches!(risk_level, RiskLevel::High | RiskLevel::Critical) {
        recommendations.push(format!(
            "리스크 등급 {}: 포지션 크기를 줄이세요.",
            risk_level
        ));
    }

    let best = strategies
        .values()
        .filter(|s| s.stats.total_pnl > Decimal::ZERO)
        .max_by(|a, b| a.stats.total_pnl.cmp(&b.stats.total_pnl));
    if let Some(best) = best {
        if strategies.len() > 1 {
            recommendations.push(format!(
                "최고 성과 전략 {} (손익 {}): 자금 재배분을 고려하세요.",
                best.strategy, best.stats.total_pnl
            ));
        }
    }

    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use trader_core::MemoryStore;

    fn limits() -> MetricsLimits {
        MetricsLimits::from_config(&BaseConfiguration::default())
    }

    fn collector() -> GlobalMetricsCollector {
        GlobalMetricsCollector::new(limits(), Arc::new(MemoryStore::new()))
    }

    fn trade(strategy: &str, entry: Decimal, exit: Decimal) -> TradeRecord {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).single().unwrap();
        TradeRecord::new(
            strategy,
            "BTCUSDT",
            Direction::Long,
            entry,
            exit,
            dec!(1),
            t0,
            t0 + chrono::Duration::minutes(30),
            "signal",
        )
    }

    #[test]
    fn test_trade_record_pnl_sign() {
        let t0 = Utc::now();
        let short = TradeRecord::new(
            "s",
            "BTCUSDT",
            Direction::Short,
            dec!(100),
            dec!(90),
            dec!(2),
            t0,
            t0 - chrono::Duration::seconds(5),
            "stop_hit",
        );
        assert_eq!(short.pnl, dec!(20));
        assert_eq!(short.pnl_pct, dec!(10));
        assert!(short.is_win);
        assert_eq!(short.duration_secs, 0);
    }

    #[tokio::test]
    async fn test_record_trade_aggregates() {
        let c = collector();
        c.record_trade(trade("alpha", dec!(100), dec!(110))).await;
        c.record_trade(trade("alpha", dec!(100), dec!(95))).await;
        c.record_trade(trade("beta", dec!(100), dec!(130))).await;

        let global = c.global_metrics().await;
        assert_eq!(global.stats.total_positions, 3);
        assert_eq!(global.stats.winning_positions, 2);
        assert_eq!(global.stats.losing_positions, 1);
        assert_eq!(global.stats.total_pnl, dec!(35));
        assert_eq!(global.stats.gross_profit, dec!(40));
        assert_eq!(global.stats.gross_loss, dec!(5));
        assert_eq!(global.stats.profit_factor, dec!(8));
        assert_eq!(global.daily_pnl, dec!(35));

        let alpha = c.strategy_metrics("alpha").await.unwrap();
        assert_eq!(alpha.stats.total_positions, 2);
        assert_eq!(alpha.stats.win_rate, dec!(50));
        assert_eq!(alpha.stats.total_pnl, dec!(5));
    }

    #[tokio::test]
    async fn test_profit_factor_without_losses() {
        let c = collector();
        c.record_trade(trade("alpha", dec!(100), dec!(110))).await;
        assert_eq!(
            c.global_metrics().await.stats.profit_factor,
            PROFIT_FACTOR_CAP
        );
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let c = collector();
        for _ in 0..(MAX_TRADE_HISTORY + 5) {
            c.record_trade(trade("alpha", dec!(100), dec!(101))).await;
        }
        assert_eq!(c.history_len().await, MAX_TRADE_HISTORY);
        assert_eq!(
            c.global_metrics().await.stats.total_positions,
            (MAX_TRADE_HISTORY + 5) as u64
        );
        assert_eq!(c.recent_trades(3).await.len(), 3);
    }

    #[tokio::test]
    async fn test_real_time_pnl_and_drawdown() {
        let c = collector();
        c.update_real_time_pnl(dec!(1000)).await;
        let m = c.global_metrics().await;
        assert_eq!(m.peak_equity, dec!(11000));

        c.update_real_time_pnl(dec!(-100)).await;
        let m = c.global_metrics().await;
        assert_eq!(m.current_equity, dec!(9900));
        assert_eq!(m.current_drawdown_pct, dec!(10));
        assert_eq!(m.daily_pnl_pct, dec!(-1));
        assert_eq!(c.risk_level().await, RiskLevel::Medium);
    }

    #[test]
    fn test_risk_levels() {
        let limits = limits(); // 일일 5%, 월간 15%
        let mut m = GlobalMetrics::new(dec!(10000), Utc::now());

        assert_eq!(assess_risk_level(&m, &limits), RiskLevel::Low);

        m.daily_pnl_pct = dec!(-2.5); // 여유 2.5
        assert_eq!(assess_risk_level(&m, &limits), RiskLevel::Medium);

        m.daily_pnl_pct = dec!(-3.5); // 여유 1.5
        assert_eq!(assess_risk_level(&m, &limits), RiskLevel::High);

        m.daily_pnl_pct = dec!(-4.2); // 여유 0.8
        assert_eq!(assess_risk_level(&m, &limits), RiskLevel::Critical);

        m.daily_pnl_pct = Decimal::ZERO;
        m.monthly_pnl_pct = dec!(-12.5); // 월간 여유 2.5
        assert_eq!(assess_risk_level(&m, &limits), RiskLevel::Critical);
    }

    #[tokio::test]
    async fn test_daily_report_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let c = collector().with_reports_dir(dir.path().join("daily_reports"));
        c.record_trade(trade("alpha", dec!(100), dec!(90))).await;
        c.record_trade(trade("alpha", dec!(100), dec!(95))).await;
        c.record_trade(trade("beta", dec!(100), dec!(101))).await;

        let now = Utc::now();
        let report = c.daily_reset(now).await;
        assert_eq!(report.global.stats.total_positions, 3);
        assert!(report.recommendations.iter().any(|r| r.contains("승률")));
        assert!(report.recommendations.iter().any(|r| r.contains("Profit factor")));

        let path = GlobalMetricsCollector::report_path(&dir.path().join("daily_reports"), report.date);
        assert!(path.exists());

        let after = c.global_metrics().await;
        assert_eq!(after.daily_realized_pnl, Decimal::ZERO);
        assert_eq!(after.stats.total_positions, 3);
    }

    #[test]
    fn test_loss_windows_follow_utc_calendar() {
        let limits = limits();
        let day1 = Utc.with_ymd_and_hms(2024, 3, 30, 22, 0, 0).single().unwrap();
        let mut m = GlobalMetrics::new(dec!(10000), day1);
        m.daily_realized_pnl = dec!(-600);
        m.monthly_realized_pnl = dec!(-900);
        m.recompute(&limits);

        // 같은 날 안에서는 유지
        assert!(!m.roll_period(day1 + chrono::Duration::minutes(90)));
        assert_eq!(m.daily_realized_pnl, dec!(-600));

        // 자정 통과: 일일만 초기화
        let day2 = Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 1).single().unwrap();
        assert!(m.roll_period(day2));
        m.recompute(&limits);
        assert_eq!(m.daily_pnl, Decimal::ZERO);
        assert_eq!(m.monthly_pnl, dec!(-900));
        assert_eq!(m.period_start, start_of_day(day2.date_naive()));

        // 과거 시각으로는 되돌아가지 않음
        assert!(!m.roll_period(day1));
        assert_eq!(m.period_start, start_of_day(day2.date_naive()));

        // 월 경계 통과: 월간도 초기화
        let april = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).single().unwrap();
        m.daily_realized_pnl = dec!(-100);
        assert!(m.roll_period(april));
        m.recompute(&limits);
        assert_eq!(m.daily_pnl, Decimal::ZERO);
        assert_eq!(m.monthly_pnl, Decimal::ZERO);
        assert_eq!(m.stats.total_positions, 0);
    }

    #[tokio::test]
    async fn test_roll_periods_clears_daily_loss() {
        let c = collector();
        c.record_trade(trade("alpha", dec!(100), dec!(40))).await;
        assert_eq!(c.daily_pnl().await, dec!(-60));

        assert!(c.roll_periods(Utc::now() + chrono::Duration::days(1)).await);
        assert_eq!(c.daily_pnl().await, Decimal::ZERO);
        assert_eq!(c.global_metrics().await.stats.total_pnl, dec!(-60));
        assert!(!c.roll_periods(Utc::now()).await);
    }

    #[tokio::test]
    async fn test_stale_snapshot_starts_new_period() {
        let store: Arc<MemoryStore<MetricsSnapshot>> = Arc::new(MemoryStore::new());
        let mut global = GlobalMetrics::new(dec!(10000), Utc::now() - chrono::Duration::days(40));
        global.daily_realized_pnl = dec!(-600);
        global.monthly_realized_pnl = dec!(-600);
        global.recompute(&limits());
        store
            .save(&MetricsSnapshot {
                global,
                strategies: BTreeMap::new(),
                trade_history: Vec::new(),
                saved_at: Utc::now() - chrono::Duration::days(40),
            })
            .unwrap();

        let c = GlobalMetricsCollector::new(limits(), store);
        let m = c.global_metrics().await;
        assert_eq!(m.daily_pnl, Decimal::ZERO);
        assert_eq!(m.monthly_pnl, Decimal::ZERO);
        assert_eq!(m.period_start, start_of_day(Utc::now().date_naive()));
    }
}
