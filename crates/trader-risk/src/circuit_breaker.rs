//! 일일/월간 손실 서킷 브레이커.
//!
//! # 상태 전이
//!
//! ```text
//! 일일:  Armed ──[손실 ≤ -한도]──> Tripped ──[다음 UTC 자정]──> Armed
//!
//! 월간:  Armed ──[손실 ≤ -한도]──> Tripped ──[돌파 다음 날]──> Armed (재시도 1회)
//!                                    │
//!                     [같은 달 재돌파] └──> Tripped ──[다음 달 1일]──> Armed
//! ```
//!
//! 두 브레이커는 서로 독립적입니다. 돌파 판정과 플래그 설정은 하나의 잠금 안에서
//! 이루어지므로 동시 확인이 긴급 정지를 두 번 실행하지 않습니다.
//! 긴급 정지 실패는 브레이커를 되돌리지 않으며, 돌파 에러와 정지 결과는
//! 각각 호출자와 감사 로그로 따로 보고됩니다.

use crate::audit::{AuditEventType, AuditLogger};
use crate::config::BaseConfiguration;
use crate::error::{BreakerKind, RiskError, RiskResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use trader_core::time::{first_day_of_next_month, next_utc_midnight, same_month, start_of_day};
use trader_core::{ratio_pct, StateStore};

/// 예약된 해제 확인 주기.
pub const RESET_CHECK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

const COMPONENT: &str = "circuit_breaker";

/// 한도 돌파 시 호출되는 긴급 정지 동작.
#[async_trait]
pub trait EmergencyStop: Send + Sync {
    /// 열린 포지션을 정리하고 신규 거래를 막습니다.
    async fn emergency_stop(&self, reason: &str) -> anyhow::Result<()>;
}

/// 나중에 연결되는 긴급 정지 대상.
///
/// 브레이커는 엔진보다 먼저 만들어지므로, 엔진 생성 후 `bind`로 연결합니다.
/// 대상은 `Weak`로 보관되어 참조 순환이 생기지 않습니다.
#[derive(Default)]
pub struct EmergencyStopRelay {
    target: std::sync::RwLock<Option<Weak<dyn EmergencyStop>>>,
}

impl EmergencyStopRelay {
    /// 연결되지 않은 릴레이를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 긴급 정지 대상을 연결합니다.
    pub fn bind<T: EmergencyStop + 'static>(&self, target: &Arc<T>) {
        let target: Arc<dyn EmergencyStop> = target.clone();
        let weak = Arc::downgrade(&target);
        match self.target.write() {
            Ok(mut guard) => *guard = Some(weak),
            Err(_) => warn!("emergency stop relay lock poisoned, binding skipped"),
        }
    }

    /// 대상이 연결되어 있고 아직 살아 있는지 확인합니다.
    pub fn is_bound(&self) -> bool {
        self.upgrade().is_some()
    }

    fn upgrade(&self) -> Option<Arc<dyn EmergencyStop>> {
        self.target
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().and_then(Weak::upgrade))
    }
}

#[async_trait]
impl EmergencyStop for EmergencyStopRelay {
    async fn emergency_stop(&self, reason: &str) -> anyhow::Result<()> {
        match self.upgrade() {
            Some(target) => target.emergency_stop(reason).await,
            None => Err(anyhow::anyhow!("emergency stop target is not bound")),
        }
    }
}

/// 브레이커 한도 값.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerLimits {
    pub daily_loss_limit_pct: Decimal,
    pub monthly_loss_limit_pct: Decimal,
    pub starting_capital: Decimal,
    pub emergency_stop_enabled: bool,
}

impl BreakerLimits {
    /// 자금 관리 설정에서 한도를 추출합니다.
    pub fn from_config(config: &BaseConfiguration) -> Self {
        Self {
            daily_loss_limit_pct: config.daily_loss_limit_pct,
            monthly_loss_limit_pct: config.monthly_loss_limit_pct,
            starting_capital: config.starting_capital,
            emergency_stop_enabled: config.emergency_stop_enabled,
        }
    }

    fn limit_for(&self, kind: BreakerKind) -> Decimal {
        match kind {
            BreakerKind::Daily => self.daily_loss_limit_pct,
            BreakerKind::Monthly => self.monthly_loss_limit_pct,
        }
    }
}

/// 영속화되는 브레이커 상태.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub daily_active: bool,
    pub monthly_active: bool,
    pub daily_breach_time: Option<DateTime<Utc>>,
    pub monthly_breach_time: Option<DateTime<Utc>>,
    /// 일일 브레이커 해제 시각 (돌파 다음 UTC 자정)
    pub daily_reset_time: Option<DateTime<Utc>>,
    /// 월간 브레이커 재시도 시각
    pub monthly_retry_time: Option<DateTime<Utc>>,
    /// 이번 달 재시도를 이미 사용했는지 여부
    #[serde(default)]
    pub monthly_retry_used: bool,
    pub breach_count: u32,
    pub last_updated: Option<DateTime<Utc>>,
}

impl CircuitBreakerState {
    /// 해당 브레이커가 작동 중인지 확인합니다.
    pub fn is_active(&self, kind: BreakerKind) -> bool {
        match kind {
            BreakerKind::Daily => self.daily_active,
            BreakerKind::Monthly => self.monthly_active,
        }
    }

    /// 어느 브레이커든 작동 중이면 거래가 중단됩니다.
    pub fn is_trading_halted(&self) -> bool {
        self.daily_active || self.monthly_active
    }

    /// 브레이커를 작동시키고 해제/재시도 예정 시각을 반환합니다.
    fn trip(&mut self, kind: BreakerKind, now: DateTime<Utc>) -> DateTime<Utc> {
        let release_at = match kind {
            BreakerKind::Daily => {
                let reset = next_utc_midnight(now);
                self.daily_active = true;
                self.daily_breach_time = Some(now);
                self.daily_reset_time = Some(reset);
                reset
            }
            BreakerKind::Monthly => {
                let retried_this_month = self.monthly_retry_used
                    && self
                        .monthly_breach_time
                        .map(|t| same_month(t, now))
                        .unwrap_or(false);
                let retry = if retried_this_month {
                    first_day_of_next_month(now)
                } else {
                    start_of_day(now.date_naive() + Duration::days(1))
                };
                self.monthly_active = true;
                self.monthly_breach_time = Some(now);
                self.monthly_retry_time = Some(retry);
                retry
            }
        };
        self.breach_count += 1;
        self.last_updated = Some(now);
        release_at
    }
}

/// 한도 확인 결과 (돌파하지 않은 경우).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitCheck {
    pub kind: BreakerKind,
    /// 시작 자본 대비 손익률 (손실은 음수)
    pub loss_pct: Decimal,
    pub limit_pct: Decimal,
    /// 한도까지 남은 여유 (%p)
    pub remaining_pct: Decimal,
}

/// 브레이커 상태 요약.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStatus {
    pub trading_halted: bool,
    pub state: CircuitBreakerState,
    pub limits: BreakerLimits,
}

#[derive(Debug, Serialize)]
struct StopOutcome {
    executed: bool,
    success: Option<bool>,
    error: Option<String>,
}

/// 일일/월간 손실 서킷 브레이커.
pub struct CircuitBreaker {
    limits: RwLock<BreakerLimits>,
    state: Mutex<CircuitBreakerState>,
    store: Arc<dyn StateStore<CircuitBreakerState>>,
    emergency: Arc<dyn EmergencyStop>,
    audit: Arc<AuditLogger>,
}

impl CircuitBreaker {
    /// 저장된 상태를 불러와 브레이커를 생성합니다.
    ///
    /// 상태를 읽을 수 없으면 경고 후 새 상태로 시작합니다.
    pub fn new(
        limits: BreakerLimits,
        store: Arc<dyn StateStore<CircuitBreakerState>>,
        emergency: Arc<dyn EmergencyStop>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        let state = match store.load() {
            Ok(Some(state)) => {
                info!(
                    daily_active = state.daily_active,
                    monthly_active = state.monthly_active,
                    breach_count = state.breach_count,
                    "서킷 브레이커 상태 복원"
                );
                state
            }
            Ok(None) => CircuitBreakerState::default(),
            Err(e) => {
                warn!(error = %e, "서킷 브레이커 상태 로드 실패, 새 상태로 시작");
                CircuitBreakerState::default()
            }
        };

        Self {
            limits: RwLock::new(limits),
            state: Mutex::new(state),
            store,
            emergency,
            audit,
        }
    }

    /// 일일 손실 한도를 확인합니다.
    pub async fn check_daily_limit(&self, current_pnl: Decimal) -> RiskResult<LimitCheck> {
        self.check_limit_at(BreakerKind::Daily, current_pnl, Utc::now())
            .await
    }

    /// 월간 손실 한도를 확인합니다.
    pub async fn check_monthly_limit(&self, current_pnl: Decimal) -> RiskResult<LimitCheck> {
        self.check_limit_at(BreakerKind::Monthly, current_pnl, Utc::now())
            .await
    }

    /// 지정 시각 기준으로 한도를 확인합니다.
    ///
    /// - 이미 작동 중이면 `CircuitBreakerActive`
    /// - 손실률이 `-한도` 이하이면 브레이커를 작동시키고 `DailyLimitBreached`/`MonthlyLimitBreached`
    pub async fn check_limit_at(
        &self,
        kind: BreakerKind,
        current_pnl: Decimal,
        now: DateTime<Utc>,
    ) -> RiskResult<LimitCheck> {
        let limits = self.limits.read().await.clone();
        let limit_pct = limits.limit_for(kind);
        let loss_pct = ratio_pct(current_pnl, limits.starting_capital);

        let (release_at, breach_count) = {
            let mut state = self.state.lock().await;
            if state.is_active(kind) {
                return Err(RiskError::CircuitBreakerActive(kind));
            }
            if loss_pct > -limit_pct {
                return Ok(LimitCheck {
                    kind,
                    loss_pct,
                    limit_pct,
                    remaining_pct: loss_pct + limit_pct,
                });
            }
            let release_at = state.trip(kind, now);
            (release_at, state.breach_count)
        };

        error!(
            breaker = %kind,
            loss_pct = %loss_pct.round_dp(4),
            limit_pct = %limit_pct,
            pnl = %current_pnl,
            release_at = %release_at,
            "서킷 브레이커 작동"
        );

        let reason = format!(
            "{} loss limit breached: {}% (limit -{}%)",
            kind,
            loss_pct.round_dp(2),
            limit_pct
        );
        let outcome = if limits.emergency_stop_enabled {
            match self.emergency.emergency_stop(&reason).await {
                Ok(()) => {
                    info!(breaker = %kind, "긴급 정지 완료");
                    StopOutcome {
                        executed: true,
                        success: Some(true),
                        error: None,
                    }
                }
                Err(e) => {
                    error!(breaker = %kind, error = %e, "긴급 정지 실패");
                    StopOutcome {
                        executed: true,
                        success: Some(false),
                        error: Some(e.to_string()),
                    }
                }
            }
        } else {
            warn!(breaker = %kind, "긴급 정지 비활성화 상태, 거래 중단만 적용");
            StopOutcome {
                executed: false,
                success: None,
                error: None,
            }
        };

        self.persist().await;

        let stop_ok = outcome.success.unwrap_or(true);
        self.audit.record(
            AuditEventType::CircuitBreakerTriggered,
            COMPONENT,
            serde_json::json!({
                "breaker": kind,
                "pnl": current_pnl,
                "loss_pct": loss_pct,
                "limit_pct": limit_pct,
                "starting_capital": limits.starting_capital,
                "release_at": release_at,
                "breach_count": breach_count,
                "emergency_stop": outcome,
            }),
            stop_ok,
            format!("{} 거래 중단, {} 해제 예정", kind, release_at),
        );

        match kind {
            BreakerKind::Daily => Err(RiskError::DailyLimitBreached {
                loss_pct,
                limit_pct,
            }),
            BreakerKind::Monthly => Err(RiskError::MonthlyLimitBreached {
                loss_pct,
                limit_pct,
            }),
        }
    }

    /// 예약된 해제/재시도 시각이 지난 브레이커를 해제합니다.
    ///
    /// 해제된 브레이커 목록을 반환합니다.
    pub async fn check_scheduled_resets(&self, now: DateTime<Utc>) -> Vec<BreakerKind> {
        let mut released = Vec::new();
        let mut monthly_retry_used = false;
        {
            let mut state = self.state.lock().await;

            if state.daily_active && state.daily_reset_time.is_some_and(|t| t <= now) {
                state.daily_active = false;
                state.daily_reset_time = None;
                released.push(BreakerKind::Daily);
            }

            if state.monthly_active {
                if let Some(retry) = state.monthly_retry_time.filter(|t| *t <= now) {
                    // 다음 달로 넘어간 해제는 새 달의 재시도 기회를 돌려준다
                    let fresh_month = state
                        .monthly_breach_time
                        .map(|b| !same_month(b, retry))
                        .unwrap_or(true);
                    state.monthly_active = false;
                    state.monthly_retry_time = None;
                    state.monthly_retry_used = !fresh_month;
                    monthly_retry_used = state.monthly_retry_used;
                    released.push(BreakerKind::Monthly);
                }
            }

            if !released.is_empty() {
                state.last_updated = Some(now);
                self.save_locked(&state);
            }
        }

        for kind in &released {
            let event_type = match kind {
                BreakerKind::Daily => AuditEventType::CircuitBreakerReset,
                BreakerKind::Monthly => AuditEventType::MonthlyRetry,
            };
            info!(breaker = %kind, "서킷 브레이커 해제");
            self.audit.record(
                event_type,
                COMPONENT,
                serde_json::json!({
                    "breaker": kind,
                    "released_at": now,
                    "monthly_retry_used": monthly_retry_used,
                }),
                true,
                format!("{} 거래 재개", kind),
            );
        }

        released
    }

    /// 수동으로 브레이커를 해제합니다.
    pub async fn force_reset(&self, kind: BreakerKind, reason: &str) -> bool {
        let was_active = {
            let mut state = self.state.lock().await;
            let was_active = state.is_active(kind);
            match kind {
                BreakerKind::Daily => {
                    state.daily_active = false;
                    state.daily_reset_time = None;
                }
                BreakerKind::Monthly => {
                    state.monthly_active = false;
                    state.monthly_retry_time = None;
                }
            }
            if was_active {
                state.last_updated = Some(Utc::now());
                self.save_locked(&state);
            }
            was_active
        };

        if was_active {
            warn!(breaker = %kind, reason, "서킷 브레이커 수동 해제");
            self.audit.record(
                AuditEventType::CircuitBreakerReset,
                COMPONENT,
                serde_json::json!({ "breaker": kind, "manual": true, "reason": reason }),
                true,
                format!("{} 수동 해제", kind),
            );
        }
        was_active
    }

    /// 한도 값을 교체합니다. 작동 중인 브레이커는 유지됩니다.
    pub async fn update_limits(&self, limits: BreakerLimits) {
        *self.limits.write().await = limits;
    }

    /// 어느 브레이커든 작동 중인지 확인합니다.
    pub async fn is_trading_halted(&self) -> bool {
        self.state.lock().await.is_trading_halted()
    }

    /// 현재 상태 사본.
    pub async fn state(&self) -> CircuitBreakerState {
        self.state.lock().await.clone()
    }

    /// 상태 요약.
    pub async fn status(&self) -> CircuitBreakerStatus {
        let limits = self.limits.read().await.clone();
        let state = self.state().await;
        CircuitBreakerStatus {
            trading_halted: state.is_trading_halted(),
            state,
            limits,
        }
    }

    async fn persist(&self) {
        let state = self.state.lock().await;
        self.save_locked(&state);
    }

    fn save_locked(&self, state: &CircuitBreakerState) {
        if let Err(e) = self.store.save(state) {
            warn!(error = %e, "서킷 브레이커 상태 저장 실패");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use trader_core::MemoryStore;

    #[derive(Default)]
    struct CountingStop {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl EmergencyStop for CountingStop {
        async fn emergency_stop(&self, _reason: &str) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("exchange unreachable");
            }
            Ok(())
        }
    }

    struct Fixture {
        breaker: CircuitBreaker,
        stop: Arc<CountingStop>,
        store: Arc<MemoryStore<CircuitBreakerState>>,
        audit: Arc<AuditLogger>,
        _dir: tempfile::TempDir,
    }

    fn fixture(fail: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(AuditLogger::new(dir.path()).unwrap());
        let stop = Arc::new(CountingStop {
            calls: AtomicU32::new(0),
            fail,
        });
        let store = Arc::new(MemoryStore::new());
        let breaker = CircuitBreaker::new(
            BreakerLimits::from_config(&BaseConfiguration::default()),
            store.clone(),
            stop.clone(),
            audit.clone(),
        );
        Fixture {
            breaker,
            stop,
            store,
            audit,
            _dir: dir,
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).single().unwrap()
    }

    #[tokio::test]
    async fn test_within_limit() {
        let f = fixture(false);
        // 10000 자본, -300 = -3% (한도 5%)
        let check = f
            .breaker
            .check_limit_at(BreakerKind::Daily, dec!(-300), at(2024, 3, 15, 10))
            .await
            .unwrap();
        assert_eq!(check.loss_pct, dec!(-3));
        assert_eq!(check.remaining_pct, dec!(2));
        assert!(!f.breaker.is_trading_halted().await);
        assert_eq!(f.stop.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_daily_breach_is_idempotent() {
        let f = fixture(false);
        let now = at(2024, 3, 15, 10);

        let err = f
            .breaker
            .check_limit_at(BreakerKind::Daily, dec!(-500), now)
            .await
            .unwrap_err();
        assert!(matches!(err, RiskError::DailyLimitBreached { .. }));

        for _ in 0..3 {
            let err = f
                .breaker
                .check_limit_at(BreakerKind::Daily, dec!(-800), now)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                RiskError::CircuitBreakerActive(BreakerKind::Daily)
            ));
        }

        assert_eq!(f.stop.calls.load(Ordering::SeqCst), 1);
        let state = f.breaker.state().await;
        assert!(state.daily_active);
        assert!(!state.monthly_active);
        assert_eq!(state.breach_count, 1);
        assert_eq!(state.daily_reset_time, Some(at(2024, 3, 16, 0)));

        // 저장소에도 반영
        let saved = f.store.load().unwrap().unwrap();
        assert!(saved.daily_active);
    }

    #[tokio::test]
    async fn test_concurrent_breach_fires_once() {
        let f = Arc::new(fixture(false));
        let now = at(2024, 3, 15, 10);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let f = f.clone();
            handles.push(tokio::spawn(async move {
                f.breaker
                    .check_limit_at(BreakerKind::Daily, dec!(-600), now)
                    .await
            }));
        }
        let mut breaches = 0;
        for handle in handles {
            if let Err(RiskError::DailyLimitBreached { .. }) = handle.await.unwrap() {
                breaches += 1;
            }
        }
        assert_eq!(breaches, 1);
        assert_eq!(f.stop.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_emergency_stop_keeps_breaker_tripped() {
        let f = fixture(true);
        let now = Utc::now();

        let err = f
            .breaker
            .check_limit_at(BreakerKind::Monthly, dec!(-1600), now)
            .await
            .unwrap_err();
        assert!(matches!(err, RiskError::MonthlyLimitBreached { .. }));
        assert!(f.breaker.is_trading_halted().await);

        let today = now.date_naive();
        let entries = f.audit.read_audit_logs(today, today).unwrap();
        let trigger = entries
            .iter()
            .find(|e| e.event_type == AuditEventType::CircuitBreakerTriggered)
            .unwrap();
        assert!(!trigger.success);
        assert_eq!(trigger.payload["emergency_stop"]["executed"], true);
        assert_eq!(trigger.payload["emergency_stop"]["success"], false);
    }

    #[tokio::test]
    async fn test_breakers_are_independent() {
        let f = fixture(false);
        let now = at(2024, 3, 15, 10);

        // -6%: 일일(5%) 돌파, 월간(15%) 미돌파
        assert!(f
            .breaker
            .check_limit_at(BreakerKind::Daily, dec!(-600), now)
            .await
            .is_err());
        assert!(f
            .breaker
            .check_limit_at(BreakerKind::Monthly, dec!(-600), now)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_daily_reset_at_midnight() {
        let f = fixture(false);
        let now = at(2024, 3, 15, 10);
        let _ = f
            .breaker
            .check_limit_at(BreakerKind::Daily, dec!(-600), now)
            .await;

        assert!(f
            .breaker
            .check_scheduled_resets(at(2024, 3, 15, 23))
            .await
            .is_empty());
        assert_eq!(
            f.breaker.check_scheduled_resets(at(2024, 3, 16, 0)).await,
            vec![BreakerKind::Daily]
        );
        assert!(!f.breaker.is_trading_halted().await);
    }

    #[tokio::test]
    async fn test_monthly_retry_then_final_halt() {
        let f = fixture(false);

        let _ = f
            .breaker
            .check_limit_at(BreakerKind::Monthly, dec!(-1600), at(2024, 3, 10, 9))
            .await;
        assert_eq!(
            f.breaker.state().await.monthly_retry_time,
            Some(at(2024, 3, 11, 0))
        );

        // 재시도
        assert_eq!(
            f.breaker.check_scheduled_resets(at(2024, 3, 11, 0)).await,
            vec![BreakerKind::Monthly]
        );
        assert!(f.breaker.state().await.monthly_retry_used);

        // 같은 달 재돌파 -> 다음 달 1일까지 중단
        let _ = f
            .breaker
            .check_limit_at(BreakerKind::Monthly, dec!(-1700), at(2024, 3, 20, 9))
            .await;
        assert_eq!(
            f.breaker.state().await.monthly_retry_time,
            Some(at(2024, 4, 1, 0))
        );
        assert!(f
            .breaker
            .check_scheduled_resets(at(2024, 3, 21, 0))
            .await
            .is_empty());

        assert_eq!(
            f.breaker.check_scheduled_resets(at(2024, 4, 1, 0)).await,
            vec![BreakerKind::Monthly]
        );
        assert!(!f.breaker.state().await.monthly_retry_used);
    }

    #[tokio::test]
    async fn test_state_load_failure_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("circuit_breaker_state.json");
        std::fs::write(&path, "{ broken").unwrap();

        let breaker = CircuitBreaker::new(
            BreakerLimits::from_config(&BaseConfiguration::default()),
            Arc::new(trader_core::JsonFileStore::<CircuitBreakerState>::new(&path)),
            Arc::new(CountingStop::default()),
            Arc::new(AuditLogger::new(dir.path().join("audit")).unwrap()),
        );
        assert_eq!(breaker.state().await, CircuitBreakerState::default());
    }

    #[tokio::test]
    async fn test_relay_unbound_and_bound() {
        let relay = EmergencyStopRelay::new();
        assert!(!relay.is_bound());
        assert!(relay.emergency_stop("test").await.is_err());

        let target = Arc::new(CountingStop::default());
        relay.bind(&target);
        assert!(relay.is_bound());
        relay.emergency_stop("test").await.unwrap();
        assert_eq!(target.calls.load(Ordering::SeqCst), 1);

        drop(target);
        assert!(!relay.is_bound());
    }
}
