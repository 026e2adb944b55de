//! 자금 관리 에러 타입.

use crate::config::ConfigValidationError;
use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;
use trader_core::TraderError;

/// 서킷 브레이커 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerKind {
    /// 일일 손실 한도
    Daily,
    /// 월간 손실 한도
    Monthly,
}

impl fmt::Display for BreakerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerKind::Daily => write!(f, "daily"),
            BreakerKind::Monthly => write!(f, "monthly"),
        }
    }
}

/// 자금 관리 에러.
#[derive(Debug, Error)]
pub enum RiskError {
    /// 일일 손실 한도 돌파
    #[error("일일 손실 한도 초과: {loss_pct}% (한도 -{limit_pct}%)")]
    DailyLimitBreached {
        loss_pct: Decimal,
        limit_pct: Decimal,
    },

    /// 월간 손실 한도 돌파
    #[error("월간 손실 한도 초과: {loss_pct}% (한도 -{limit_pct}%)")]
    MonthlyLimitBreached {
        loss_pct: Decimal,
        limit_pct: Decimal,
    },

    /// 이미 작동 중인 서킷 브레이커
    #[error("{0} 서킷 브레이커가 이미 활성화되어 있습니다")]
    CircuitBreakerActive(BreakerKind),

    /// 서킷 브레이커로 인한 거래 중단
    #[error("거래 중단: {0}")]
    TradingHalted(String),

    /// 자금 관리 비활성화 상태
    #[error("자금 관리가 비활성화되어 있습니다: {0}")]
    Disabled(String),

    /// 설정 검증 실패
    #[error(transparent)]
    InvalidConfig(#[from] ConfigValidationError),

    /// 하위 레벨 에러
    #[error(transparent)]
    Core(#[from] TraderError),
}

/// 자금 관리 Result 타입.
pub type RiskResult<T> = Result<T, RiskError>;

impl RiskError {
    /// 거래를 멈추게 하는 리스크 한도 신호인지 확인합니다.
    ///
    /// 이 에러들은 장애가 아니라 정상적인 제어 흐름입니다.
    pub fn is_risk_halt(&self) -> bool {
        matches!(
            self,
            RiskError::DailyLimitBreached { .. }
                | RiskError::MonthlyLimitBreached { .. }
                | RiskError::CircuitBreakerActive(_)
                | RiskError::TradingHalted(_)
        )
    }

    /// 상태 변경 전에 거부된 검증 에러인지 확인합니다.
    pub fn is_validation(&self) -> bool {
        match self {
            RiskError::InvalidConfig(_) => true,
            RiskError::Core(err) => err.is_validation(),
            _ => false,
        }
    }

    /// 새로 발생한 한도 돌파인지 확인합니다 (이미 활성 상태였던 경우 제외).
    pub fn is_new_breach(&self) -> bool {
        matches!(
            self,
            RiskError::DailyLimitBreached { .. } | RiskError::MonthlyLimitBreached { .. }
        )
    }
}
