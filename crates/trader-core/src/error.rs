//! 공통 에러 타입.
//!
//! 엔진과 자금 관리 크레이트가 공유하는 하위 레벨 에러를 정의합니다.
//! 도메인별 에러(`EngineError`, `RiskError`)는 이 타입을 감싸서 사용합니다.

use thiserror::Error;

/// 핵심 에러.
#[derive(Debug, Error)]
pub enum TraderError {
    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 잘못된 입력
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),

    /// 데이터 에러 (잘못된 캔들, 빈 데이터 등)
    #[error("데이터 에러: {0}")]
    Data(String),

    /// 상태 파일/감사 로그 입출력 에러
    #[error("저장소 에러: {0}")]
    Persistence(String),

    /// 직렬화 에러
    #[error("직렬화 에러: {0}")]
    Serialization(String),

    /// 내부 에러
    #[error("내부 에러: {0}")]
    Internal(String),
}

/// 공통 Result 타입.
pub type TraderResult<T> = Result<T, TraderError>;

impl TraderError {
    /// 저장소(디스크) 관련 에러인지 확인합니다.
    ///
    /// 저장 실패는 로그만 남기고 계속 진행하는 것이 원칙이므로
    /// 호출자가 이 값을 보고 치명 여부를 판단합니다.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            TraderError::Persistence(_) | TraderError::Serialization(_)
        )
    }

    /// 검증 에러인지 확인합니다.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TraderError::Config(_) | TraderError::InvalidInput(_) | TraderError::Data(_)
        )
    }
}

impl From<serde_json::Error> for TraderError {
    fn from(err: serde_json::Error) -> Self {
        TraderError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for TraderError {
    fn from(err: std::io::Error) -> Self {
        TraderError::Persistence(err.to_string())
    }
}

impl From<config::ConfigError> for TraderError {
    fn from(err: config::ConfigError) -> Self {
        TraderError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_persistence() {
        let io_err: TraderError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(io_err.is_persistence());
        assert!(!io_err.is_validation());

        let json_err: TraderError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(json_err.is_persistence());
    }

    #[test]
    fn test_error_validation() {
        let err = TraderError::InvalidInput("price must be positive".to_string());
        assert!(err.is_validation());
        assert!(!err.is_persistence());
        assert!(err.to_string().contains("price must be positive"));
    }
}
