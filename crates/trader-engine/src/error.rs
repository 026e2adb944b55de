//! 엔진 에러 타입.

use crate::zone_monitor::ZoneType;
use rust_decimal::Decimal;
use thiserror::Error;
use trader_core::TraderError;
use trader_risk::{ConfigValidationError, RiskError};

/// 시간 기반 실행 엔진 에러.
#[derive(Debug, Error)]
pub enum EngineError {
    /// 엔진이 실행 중이 아님
    #[error("engine not running")]
    NotRunning,

    /// 엔진 시각보다 과거의 체결 (look-ahead)
    #[error("look-ahead 위반: 체결 시각 {timestamp} < 엔진 시각 {clock}")]
    LookAhead { timestamp: i64, clock: i64 },

    /// 평가에 필요한 데이터 부족
    #[error("데이터 부족: {0}")]
    InsufficientData(String),

    /// 지표 계산 시간 초과
    #[error("지표 계산 시간 초과: {timeout_ms}ms")]
    CalculationTimeout { timeout_ms: u64 },

    /// 전략 평가기 실패
    #[error("전략 평가 실패: {0}")]
    Strategy(String),

    /// 이미 열린 포지션 존재
    #[error("이미 열린 포지션이 있습니다")]
    PositionAlreadyOpen,

    /// 열린 포지션 없음
    #[error("열린 포지션이 없습니다")]
    NoOpenPosition,

    /// 유효하지 않은 가격
    #[error("유효하지 않은 가격: {0}")]
    InvalidPrice(Decimal),

    /// 이미 활성화된 존
    #[error("존이 이미 활성화되어 있습니다: {0}")]
    ZoneAlreadyActive(ZoneType),

    /// 활성화되지 않은 존
    #[error("존이 활성화되어 있지 않습니다: {0}")]
    ZoneNotActive(ZoneType),

    /// 설정에서 비활성화된 존
    #[error("비활성화된 존입니다: {0}")]
    ZoneDisabled(ZoneType),

    /// 엔진 상태/모드와 맞지 않는 호출
    #[error("잘못된 엔진 상태: {0}")]
    InvalidState(String),

    /// 설정 검증 실패
    #[error(transparent)]
    Config(#[from] ConfigValidationError),

    /// 자금 관리 에러
    #[error(transparent)]
    Risk(#[from] RiskError),

    /// 코어 에러
    #[error(transparent)]
    Core(#[from] TraderError),
}

/// 엔진 작업 결과 타입.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// 복구 가능한 시간 관련 위반인지 확인합니다.
    pub fn is_temporal_violation(&self) -> bool {
        matches!(
            self,
            EngineError::LookAhead { .. }
                | EngineError::InsufficientData(_)
                | EngineError::CalculationTimeout { .. }
        )
    }

    /// 호출자 측 상태 충돌인지 확인합니다.
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::PositionAlreadyOpen
                | EngineError::NoOpenPosition
                | EngineError::ZoneAlreadyActive(_)
                | EngineError::ZoneNotActive(_)
        )
    }

    /// 마커 처리 중 발생해도 엔진을 멈추지 않는 에러인지 확인합니다.
    pub fn is_recoverable(&self) -> bool {
        self.is_temporal_violation() || matches!(self, EngineError::Strategy(_))
    }

    /// 리스크 한도에 의한 거래 중단인지 확인합니다.
    pub fn is_risk_halt(&self) -> bool {
        matches!(self, EngineError::Risk(e) if e.is_risk_halt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trader_risk::BreakerKind;

    #[test]
    fn test_classification() {
        let err = EngineError::LookAhead {
            timestamp: 1,
            clock: 2,
        };
        assert!(err.is_temporal_violation());
        assert!(!err.is_state_conflict());

        assert!(EngineError::PositionAlreadyOpen.is_state_conflict());
        assert!(EngineError::ZoneNotActive(ZoneType::DiCounter).is_state_conflict());
        assert!(EngineError::Strategy("boom".into()).is_recoverable());
        assert!(!EngineError::NotRunning.is_recoverable());
    }

    #[test]
    fn test_risk_conversion() {
        let err: EngineError = RiskError::CircuitBreakerActive(BreakerKind::Daily).into();
        assert!(err.is_risk_halt());
        assert!(err.to_string().contains("daily"));
    }
}
