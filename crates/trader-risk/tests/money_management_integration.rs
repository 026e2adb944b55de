//! 자금 관리 통합 테스트
//!
//! 실제 JSON 파일 저장소를 사용해 재시작 후 상태 복원과 감사 로그를 확인합니다.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use trader_core::{Direction, JsonFileStore, StateStore, StorageConfig};
use trader_risk::{
    AuditEventType, AuditLogger, BaseConfiguration, BreakerLimits, CircuitBreaker,
    CircuitBreakerState, EmergencyStop, EmergencyStopRelay, GlobalMetricsCollector,
    MetricsLimits, MetricsSnapshot, MoneyManager, RiskError, SizingRequest, TradeRecord,
};

#[derive(Default)]
struct RecordingStop {
    calls: AtomicU32,
}

#[async_trait]
impl EmergencyStop for RecordingStop {
    async fn emergency_stop(&self, _reason: &str) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn record(strategy: &str, entry: Decimal, exit: Decimal, qty: Decimal) -> TradeRecord {
    let exit_time = Utc::now();
    TradeRecord::new(
        strategy,
        "BTCUSDT",
        Direction::Long,
        entry,
        exit,
        qty,
        exit_time - Duration::minutes(15),
        exit_time,
        "signal",
    )
}

#[tokio::test]
async fn metrics_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("global_metrics.json");
    let limits = MetricsLimits::from_config(&BaseConfiguration::default());

    let trades = vec![
        record("trend", dec!(100), dec!(104), dec!(2)),
        record("trend", dec!(100), dec!(97), dec!(1)),
        record("counter", dec!(200), dec!(210), dec!(0.5)),
        record("counter", dec!(200), dec!(190), dec!(1)),
    ];

    let first = GlobalMetricsCollector::new(
        limits.clone(),
        Arc::new(JsonFileStore::<MetricsSnapshot>::new(&path)),
    );
    for trade in trades {
        first.record_trade(trade).await;
    }
    first.persist().await.unwrap();
    let before = first.global_metrics().await;
    let before_strategies = first.all_strategy_metrics().await;

    let second =
        GlobalMetricsCollector::new(limits, Arc::new(JsonFileStore::<MetricsSnapshot>::new(&path)));
    let after = second.global_metrics().await;

    assert_eq!(after.stats.total_positions, 4);
    assert_eq!(after.stats.total_positions, before.stats.total_positions);
    assert_eq!(after.stats.total_pnl, before.stats.total_pnl);
    assert_eq!(after.stats.total_pnl, Decimal::ZERO);
    for (name, metrics) in before_strategies {
        let restored = second.strategy_metrics(&name).await.unwrap();
        assert_eq!(restored.stats.total_pnl, metrics.stats.total_pnl);
    }
    assert_eq!(second.history_len().await, 4);
}

#[tokio::test]
async fn tripped_breaker_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageConfig::with_data_dir(dir.path());
    let limits = BreakerLimits::from_config(&BaseConfiguration::default());
    let audit = Arc::new(AuditLogger::new(storage.audit_dir()).unwrap());
    let stop = Arc::new(RecordingStop::default());

    let breaker = CircuitBreaker::new(
        limits.clone(),
        Arc::new(JsonFileStore::<CircuitBreakerState>::new(
            storage.circuit_breaker_state_path(),
        )),
        stop.clone(),
        audit.clone(),
    );
    let err = breaker.check_daily_limit(dec!(-550)).await.unwrap_err();
    assert!(matches!(err, RiskError::DailyLimitBreached { .. }));
    drop(breaker);

    let restored = CircuitBreaker::new(
        limits,
        Arc::new(JsonFileStore::<CircuitBreakerState>::new(
            storage.circuit_breaker_state_path(),
        )),
        stop.clone(),
        audit.clone(),
    );
    assert!(restored.is_trading_halted().await);
    let err = restored.check_daily_limit(dec!(-900)).await.unwrap_err();
    assert!(matches!(err, RiskError::CircuitBreakerActive(_)));
    assert_eq!(stop.calls.load(Ordering::SeqCst), 1);

    let today = Utc::now().date_naive();
    let report = audit.generate_compliance_report(today, today).unwrap();
    assert_eq!(report.circuit_breaker_triggers, 1);
    assert_eq!(report.emergency_stop_failures, 0);
}

#[tokio::test]
async fn unbound_relay_is_reported_as_failed_stop() {
    let dir = tempfile::tempdir().unwrap();
    let relay = Arc::new(EmergencyStopRelay::new());
    let mm = MoneyManager::new(
        BaseConfiguration::default(),
        &StorageConfig::with_data_dir(dir.path()),
        relay.clone(),
    )
    .unwrap();

    let err = mm.update_pnl(dec!(-2000)).await.unwrap_err();
    assert!(err.is_risk_halt());
    assert!(mm.is_trading_halted().await);

    let today = Utc::now().date_naive();
    let entries = mm.audit().read_audit_logs(today, today).unwrap();
    let trigger = entries
        .iter()
        .find(|e| e.event_type == AuditEventType::CircuitBreakerTriggered)
        .unwrap();
    assert!(!trigger.success);

    let sizing = mm
        .validate_new_position(&SizingRequest::spot("BTCUSDT", dec!(50000), dec!(5000)))
        .await;
    assert!(matches!(sizing, Err(RiskError::TradingHalted(_))));
}

#[tokio::test]
async fn restart_on_a_new_day_drops_previous_daily_loss() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageConfig::with_data_dir(dir.path());
    let stop = Arc::new(RecordingStop::default());

    // -300 = -3% (일일 한도 5%)
    let first = MoneyManager::new(BaseConfiguration::default(), &storage, stop.clone()).unwrap();
    first
        .on_position_closed(record("trend", dec!(100), dec!(70), dec!(10)))
        .await
        .unwrap();
    first.metrics().persist().await.unwrap();
    drop(first);

    // 전날 저장된 스냅샷으로 만든다
    let store = JsonFileStore::<MetricsSnapshot>::new(storage.metrics_path());
    let mut snapshot = store.load().unwrap().unwrap();
    snapshot.global.period_start -= Duration::days(1);
    store.save(&snapshot).unwrap();

    let second = MoneyManager::new(BaseConfiguration::default(), &storage, stop.clone()).unwrap();
    assert_eq!(second.metrics().daily_pnl().await, Decimal::ZERO);
    assert_eq!(second.metrics().global_metrics().await.stats.total_positions, 1);

    // 오늘 손실만으로는 한도 미만
    second
        .on_position_closed(record("trend", dec!(100), dec!(70), dec!(10)))
        .await
        .unwrap();
    assert_eq!(second.metrics().daily_pnl().await, dec!(-300));
    assert!(!second.is_trading_halted().await);
    assert_eq!(stop.calls.load(Ordering::SeqCst), 0);
}
