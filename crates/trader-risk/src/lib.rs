//! 자금 관리 시스템.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 일일/월간 손실 서킷 브레이커 (상태 영속화, 예약 해제, 긴급 정지 호출)
//! - 고정 금액/자본 비율 포지션 사이징
//! - 전략 통합 성과 메트릭과 일일 리포트
//! - 날짜별 JSON Lines 감사 로그
//! - 위 구성 요소를 묶는 `MoneyManager`
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_risk::{BaseConfiguration, MoneyManager, SizingRequest};
//!
//! let mm = MoneyManager::new(BaseConfiguration::default(), &storage, emergency)?;
//!
//! let sizing = mm
//!     .validate_new_position(&SizingRequest::spot("BTCUSDT", price, balance))
//!     .await?;
//! if sizing.approved {
//!     // sizing.quantity로 진입
//! }
//! ```

pub mod audit;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod position_sizing;
pub mod tasks;

// 주요 타입 재내보내기
pub use audit::{AuditEventType, AuditLogEntry, AuditLogger, ComplianceReport};
pub use circuit_breaker::{
    BreakerLimits, CircuitBreaker, CircuitBreakerState, CircuitBreakerStatus, EmergencyStop,
    EmergencyStopRelay, LimitCheck,
};
pub use config::{BaseConfiguration, ConfigValidationError, PositionSizingConfig, SizingMode};
pub use error::{BreakerKind, RiskError, RiskResult};
pub use manager::{MoneyManager, MoneyManagerStatus, TradeCounters};
pub use metrics::{
    DailyReport, GlobalMetrics, GlobalMetricsCollector, MetricsLimits, MetricsSnapshot,
    RiskLevel, StrategyMetrics, TradeRecord, TradeStats,
};
pub use position_sizing::{
    InstrumentSpec, MarketKind, PositionSizer, SizingCounters, SizingRequest, SizingResult,
};
pub use tasks::BackgroundTask;
