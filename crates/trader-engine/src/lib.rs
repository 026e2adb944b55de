//! 시간 기반 실행 엔진.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 체결 순서로 전진하는 엔진 시계와 look-ahead 방지
//! - 단일 포지션 수명 주기와 트레일링 스톱
//! - 지표 존 기반 스톱 조정
//! - 5분 마커 기반 전략 평가와 자금 관리 연동
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_engine::{EngineConfig, InitialData, TemporalEngine};
//!
//! let engine = Arc::new(
//!     TemporalEngine::new(EngineConfig::default(), evaluator)?.with_money_manager(mm),
//! );
//! relay.bind(&engine);
//!
//! engine.initialize(InitialData::backtest(trades)).await?;
//! engine.start().await?;
//! let summary = engine.run_backtest(CancellationToken::new()).await?;
//! engine.stop().await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod position_manager;
pub mod zone_monitor;

pub use config::{
    AdjustmentGrid, AdjustmentLevel, EngineConfig, EngineMode, MonitoringMode, ZoneConfig,
    ZoneSettings,
};
pub use engine::{
    BacktestSummary, EngineControl, EngineMetrics, EngineState, Evaluation, EvaluationContext,
    Indicators, InitialData, MarketSnapshot, Signal, StrategyEvaluator, TemporalEngine,
    TradeOutcome,
};
pub use error::{EngineError, EngineResult};
pub use position_manager::{ClosedPosition, Position, PositionManager, COUNTER_TREND_TAG};
pub use zone_monitor::{
    ActiveZone, StopAdjustment, ZoneLogEntry, ZoneMonitor, ZoneTransition, ZoneType,
    MAX_ACTIVATION_LOG, ZONE_ADJUSTMENT_THROTTLE_MS,
};
