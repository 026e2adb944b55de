//! 자금 관리자.
//!
//! 서킷 브레이커, 포지션 사이저, 메트릭 수집기, 감사 로거를 하나의 인터페이스로 묶습니다.
//! - 신규 포지션 검증 및 크기 계산
//! - 포지션 진입/청산 통지와 거래 카운터
//! - 실시간 손익 갱신과 손실 한도 확인
//! - 설정 핫스왑
//! - 백그라운드 작업 (브레이커 해제 확인, 메트릭 스냅샷, 일일 리포트)

use crate::audit::{AuditEventType, AuditLogger};
use crate::circuit_breaker::{
    BreakerLimits, CircuitBreaker, CircuitBreakerState, CircuitBreakerStatus, EmergencyStop,
    RESET_CHECK_INTERVAL,
};
use crate::config::{BaseConfiguration, SizingMode};
use crate::error::{BreakerKind, RiskError, RiskResult};
use crate::metrics::{
    GlobalMetricsCollector, MetricsLimits, MetricsSnapshot, RiskLevel, TradeRecord,
};
use crate::position_sizing::{PositionSizer, SizingCounters, SizingRequest, SizingResult};
use crate::tasks::BackgroundTask;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use trader_core::{Direction, JsonFileStore, StorageConfig, TraderError};

const COMPONENT: &str = "money_manager";

/// 거래 카운터.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TradeCounters {
    /// 카운터 기준 날짜 (UTC)
    pub day: NaiveDate,
    /// 오늘 진입한 포지션 수
    pub daily_positions: u32,
    /// 현재 열린 포지션 수
    pub concurrent_trades: u32,
}

impl TradeCounters {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            day: now.date_naive(),
            daily_positions: 0,
            concurrent_trades: 0,
        }
    }

    /// 날짜가 바뀌었으면 일일 카운터를 초기화합니다. 동시 포지션 수는 유지됩니다.
    fn roll(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.day {
            self.day = today;
            self.daily_positions = 0;
        }
    }

    fn as_sizing(&self) -> SizingCounters {
        SizingCounters {
            daily_positions: self.daily_positions,
            concurrent_trades: self.concurrent_trades,
        }
    }
}

/// 자금 관리 상태 요약.
#[derive(Debug, Clone, Serialize)]
pub struct MoneyManagerStatus {
    pub enabled: bool,
    pub trading_halted: bool,
    pub circuit_breaker: CircuitBreakerStatus,
    pub counters: TradeCounters,
    pub risk_level: RiskLevel,
    pub daily_pnl: Decimal,
    pub monthly_pnl: Decimal,
    pub total_positions: u64,
    pub current_capital: Decimal,
    pub sizing_mode: SizingMode,
}

/// 자금 관리자.
pub struct MoneyManager {
    config: RwLock<BaseConfiguration>,
    enabled: AtomicBool,
    breaker: Arc<CircuitBreaker>,
    sizer: PositionSizer,
    metrics: Arc<GlobalMetricsCollector>,
    audit: Arc<AuditLogger>,
    counters: Mutex<TradeCounters>,
    tasks: Mutex<Vec<BackgroundTask>>,
}

impl MoneyManager {
    /// 저장 경로 설정으로 모든 구성 요소를 만들어 자금 관리자를 생성합니다.
    ///
    /// 서킷 브레이커 상태와 메트릭은 `StorageConfig`가 가리키는 JSON 파일에서 복원됩니다.
    pub fn new(
        config: BaseConfiguration,
        storage: &StorageConfig,
        emergency: Arc<dyn EmergencyStop>,
    ) -> RiskResult<Self> {
        config.validate()?;

        let audit = Arc::new(AuditLogger::new(storage.audit_dir())?);
        let breaker = Arc::new(CircuitBreaker::new(
            BreakerLimits::from_config(&config),
            Arc::new(JsonFileStore::<CircuitBreakerState>::new(
                storage.circuit_breaker_state_path(),
            )),
            emergency,
            audit.clone(),
        ));
        let metrics = Arc::new(
            GlobalMetricsCollector::new(
                MetricsLimits::from_config(&config),
                Arc::new(JsonFileStore::<MetricsSnapshot>::new(storage.metrics_path())),
            )
            .with_reports_dir(storage.daily_reports_dir())
            .with_audit(audit.clone()),
        );

        Self::from_parts(config, breaker, metrics, audit)
    }

    /// 이미 만들어진 구성 요소로 자금 관리자를 생성합니다.
    pub fn from_parts(
        config: BaseConfiguration,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<GlobalMetricsCollector>,
        audit: Arc<AuditLogger>,
    ) -> RiskResult<Self> {
        config.validate()?;

        info!(
            daily_limit = %config.daily_loss_limit_pct,
            monthly_limit = %config.monthly_loss_limit_pct,
            sizing_mode = %config.position_sizing.mode,
            capital = %config.starting_capital,
            "자금 관리자 생성"
        );

        Ok(Self {
            config: RwLock::new(config),
            enabled: AtomicBool::new(true),
            breaker,
            sizer: PositionSizer::new().with_audit(audit.clone()),
            metrics,
            audit,
            counters: Mutex::new(TradeCounters::new(Utc::now())),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// 신규 포지션을 검증하고 크기를 계산합니다.
    ///
    /// - 비활성화 상태면 `Disabled`
    /// - 서킷 브레이커 작동 중이면 `TradingHalted`
    /// - 사이징 규칙에 의한 거부는 `Ok(SizingResult { approved: false, .. })`
    pub async fn validate_new_position(&self, request: &SizingRequest) -> RiskResult<SizingResult> {
        if !self.is_enabled() {
            return Err(RiskError::Disabled(format!(
                "{} 신규 포지션 거부",
                request.symbol
            )));
        }

        let breaker_state = self.breaker.state().await;
        if breaker_state.is_trading_halted() {
            let reason = halt_reason(&breaker_state);
            self.audit.record(
                AuditEventType::PositionValidation,
                COMPONENT,
                serde_json::json!({ "request": request, "halted": reason }),
                false,
                "서킷 브레이커로 거래 중단",
            );
            return Err(RiskError::TradingHalted(reason));
        }

        let counters = {
            let mut counters = self.counters.lock().await;
            counters.roll(Utc::now());
            counters.as_sizing()
        };
        let config = self.config.read().await.clone();
        Ok(self.sizer.calculate(&config, request, counters))
    }

    /// 포지션 진입을 통지합니다.
    pub async fn on_position_opened(
        &self,
        strategy: &str,
        symbol: &str,
        direction: Direction,
        quantity: Decimal,
        price: Decimal,
    ) {
        let counters = {
            let mut counters = self.counters.lock().await;
            counters.roll(Utc::now());
            counters.daily_positions += 1;
            counters.concurrent_trades += 1;
            *counters
        };

        info!(
            strategy,
            symbol,
            direction = %direction,
            quantity = %quantity,
            price = %price,
            daily_positions = counters.daily_positions,
            concurrent = counters.concurrent_trades,
            "포지션 진입 통지"
        );
        self.audit.record(
            AuditEventType::PositionOpened,
            COMPONENT,
            serde_json::json!({
                "strategy": strategy,
                "symbol": symbol,
                "direction": direction,
                "quantity": quantity,
                "price": price,
                "counters": counters,
            }),
            true,
            format!("{} {} 진입", symbol, direction),
        );
    }

    /// 포지션 청산을 통지합니다.
    ///
    /// 거래를 메트릭에 기록하고 현재 자본에 실현 손익을 반영한 뒤 손실 한도를 확인합니다.
    /// 이 청산으로 한도를 돌파하면 돌파 에러를 반환합니다.
    pub async fn on_position_closed(&self, record: TradeRecord) -> RiskResult<()> {
        {
            let mut counters = self.counters.lock().await;
            counters.concurrent_trades = counters.concurrent_trades.saturating_sub(1);
        }
        {
            let mut config = self.config.write().await;
            let updated = config.current_capital + record.pnl;
            if updated > Decimal::ZERO {
                config.current_capital = updated;
            } else {
                warn!(capital = %updated, "현재 자본이 0 이하, 이전 값 유지");
            }
        }

        self.audit.record(
            AuditEventType::PositionClosed,
            COMPONENT,
            serde_json::json!({ "trade": &record }),
            true,
            format!(
                "{} 청산 ({}), 손익 {}",
                record.symbol, record.exit_reason, record.pnl
            ),
        );
        self.metrics.record_trade(record).await;

        self.check_loss_limits().await
    }

    /// 미실현 손익을 갱신하고 손실 한도를 확인합니다.
    pub async fn update_pnl(&self, unrealized_pnl: Decimal) -> RiskResult<()> {
        self.metrics.update_real_time_pnl(unrealized_pnl).await;
        self.check_loss_limits().await
    }

    /// 일일/월간 한도를 모두 확인합니다.
    ///
    /// 이미 작동 중인 브레이커는 무시하고, 새로 돌파한 경우에만 에러를 반환합니다.
    pub async fn check_loss_limits(&self) -> RiskResult<()> {
        self.metrics.roll_periods(Utc::now()).await;
        let daily_pnl = self.metrics.daily_pnl().await;
        let monthly_pnl = self.metrics.monthly_pnl().await;

        let daily = self.breaker.check_daily_limit(daily_pnl).await;
        let monthly = self.breaker.check_monthly_limit(monthly_pnl).await;

        for result in [daily, monthly] {
            match result {
                Ok(_) | Err(RiskError::CircuitBreakerActive(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// 단일 포지션 손실률이 강제 손절 기준에 도달했는지 확인합니다.
    ///
    /// `pnl_pct`는 진입가 대비 손익률(손실은 음수)입니다.
    pub async fn check_force_stop(&self, symbol: &str, pnl_pct: Decimal) -> bool {
        let threshold = self.config.read().await.force_stop_loss_pct;
        if pnl_pct > -threshold {
            return false;
        }

        warn!(symbol, pnl_pct = %pnl_pct, threshold = %threshold, "강제 손절 기준 도달");
        self.audit.record(
            AuditEventType::ForceStopLoss,
            COMPONENT,
            serde_json::json!({ "symbol": symbol, "pnl_pct": pnl_pct, "threshold": threshold }),
            true,
            format!("{} 강제 손절 요청", symbol),
        );
        true
    }

    /// 손실 집계 기간을 `now`로 갱신한 뒤 예약된 브레이커 해제를 처리합니다.
    ///
    /// 일일 브레이커가 자정에 풀릴 때 전날 손실이 새 날에 남아 있지 않도록
    /// 메트릭 롤오버를 먼저 수행합니다.
    pub async fn check_scheduled_resets(&self, now: DateTime<Utc>) -> Vec<BreakerKind> {
        if self.metrics.roll_periods(now).await {
            info!(now = %now, "일일 손실 집계 기간 시작");
        }
        self.breaker.check_scheduled_resets(now).await
    }

    fn spawn_reset_checker(self: &Arc<Self>) -> BackgroundTask {
        let manager = Arc::clone(self);
        BackgroundTask::spawn_periodic("circuit_breaker_reset", RESET_CHECK_INTERVAL, move || {
            let manager = manager.clone();
            async move {
                manager.check_scheduled_resets(Utc::now()).await;
            }
        })
    }

    /// 거래를 활성화합니다.
    pub fn enable(&self) {
        if !self.enabled.swap(true, Ordering::SeqCst) {
            info!("자금 관리 거래 활성화");
            self.audit.record(
                AuditEventType::TradingEnabled,
                COMPONENT,
                serde_json::json!({}),
                true,
                "신규 포지션 허용",
            );
        }
    }

    /// 거래를 비활성화합니다.
    pub fn disable(&self, reason: &str) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            warn!(reason, "자금 관리 거래 비활성화");
            self.audit.record(
                AuditEventType::TradingDisabled,
                COMPONENT,
                serde_json::json!({ "reason": reason }),
                true,
                "신규 포지션 차단",
            );
        }
    }

    /// 거래 활성화 여부.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// 서킷 브레이커 작동 여부.
    pub async fn is_trading_halted(&self) -> bool {
        self.breaker.is_trading_halted().await
    }

    /// 상태 요약을 반환합니다.
    pub async fn status(&self) -> MoneyManagerStatus {
        let circuit_breaker = self.breaker.status().await;
        let counters = {
            let mut counters = self.counters.lock().await;
            counters.roll(Utc::now());
            *counters
        };
        let global = self.metrics.global_metrics().await;
        let risk_level = self.metrics.risk_level().await;
        let (current_capital, sizing_mode) = {
            let config = self.config.read().await;
            (config.current_capital, config.position_sizing.mode)
        };

        MoneyManagerStatus {
            enabled: self.is_enabled(),
            trading_halted: circuit_breaker.trading_halted,
            circuit_breaker,
            counters,
            risk_level,
            daily_pnl: global.daily_pnl,
            monthly_pnl: global.monthly_pnl,
            total_positions: global.stats.total_positions,
            current_capital,
            sizing_mode,
        }
    }

    /// 현재 설정 사본.
    pub async fn configuration(&self) -> BaseConfiguration {
        self.config.read().await.clone()
    }

    /// 설정을 검증 후 교체합니다.
    ///
    /// 검증에 실패하면 기존 설정이 그대로 유지됩니다.
    pub async fn update_configuration(&self, new_config: BaseConfiguration) -> RiskResult<()> {
        if let Err(e) = new_config.validate() {
            warn!(error = %e, "설정 변경 거부");
            self.audit.record(
                AuditEventType::ConfigurationChange,
                COMPONENT,
                serde_json::json!({ "errors": e.errors() }),
                false,
                "설정 변경 거부",
            );
            return Err(e.into());
        }

        let old = {
            let mut config = self.config.write().await;
            std::mem::replace(&mut *config, new_config.clone())
        };
        self.breaker
            .update_limits(BreakerLimits::from_config(&new_config))
            .await;
        self.metrics
            .update_limits(MetricsLimits::from_config(&new_config))
            .await;

        info!(
            daily_limit = %new_config.daily_loss_limit_pct,
            monthly_limit = %new_config.monthly_loss_limit_pct,
            sizing_mode = %new_config.position_sizing.mode,
            "설정 변경 적용"
        );
        self.audit.record(
            AuditEventType::ConfigurationChange,
            COMPONENT,
            serde_json::json!({ "old": old, "new": new_config }),
            true,
            "설정 변경 적용",
        );
        Ok(())
    }

    /// 비율 사이징에 쓰이는 현재 자본을 갱신합니다.
    pub async fn update_capital(&self, current_capital: Decimal) -> RiskResult<()> {
        if current_capital <= Decimal::ZERO {
            return Err(TraderError::InvalidInput(format!(
                "current capital must be greater than 0 (got {})",
                current_capital
            ))
            .into());
        }
        self.config.write().await.current_capital = current_capital;
        Ok(())
    }

    /// 백그라운드 작업을 시작합니다. 이미 실행 중이면 아무것도 하지 않습니다.
    pub async fn start_background_tasks(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        let interval = Duration::from_secs(self.config.read().await.metrics_interval_secs);
        tasks.push(self.spawn_reset_checker());
        tasks.extend(self.metrics.spawn_tasks(interval));

        info!(tasks = tasks.len(), "자금 관리 백그라운드 작업 시작");
        self.audit.record(
            AuditEventType::SystemStart,
            COMPONENT,
            serde_json::json!({
                "tasks": tasks.iter().map(|t| t.name()).collect::<Vec<_>>(),
                "metrics_interval_secs": interval.as_secs(),
            }),
            true,
            "자금 관리 시작",
        );
    }

    /// 백그라운드 작업을 중지하고 메트릭을 저장합니다. 여러 번 호출해도 안전합니다.
    pub async fn stop_background_tasks(&self) {
        let tasks: Vec<BackgroundTask> = std::mem::take(&mut *self.tasks.lock().await);
        if tasks.is_empty() {
            return;
        }
        for task in &tasks {
            task.shutdown().await;
        }

        if let Err(e) = self.metrics.persist().await {
            warn!(error = %e, "종료 시 메트릭 저장 실패");
        }
        info!("자금 관리 백그라운드 작업 종료");
        self.audit.record(
            AuditEventType::SystemStop,
            COMPONENT,
            serde_json::json!({ "tasks": tasks.len() }),
            true,
            "자금 관리 종료",
        );
    }

    /// 서킷 브레이커.
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// 메트릭 수집기.
    pub fn metrics(&self) -> &Arc<GlobalMetricsCollector> {
        &self.metrics
    }

    /// 감사 로거.
    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }
}

fn halt_reason(state: &CircuitBreakerState) -> String {
    match (state.daily_active, state.monthly_active) {
        (true, true) => "daily and monthly circuit breakers active".to_string(),
        (true, false) => "daily circuit breaker active".to_string(),
        (false, true) => "monthly circuit breaker active".to_string(),
        (false, false) => String::new(),
    }
}
