//! # Trader Core
//!
//! 시간 기반 실행 엔진과 자금 관리 시스템이 공유하는 핵심 타입을 제공합니다.
//!
//! 이 크레이트는 다음을 포함합니다:
//! - 체결(`Trade`) 및 캔들(`Kline`) 시장 데이터 타입
//! - 포지션 방향(`Direction`)과 타임프레임 정의
//! - 에러 타입 (`TraderError`)
//! - 설정 로딩 및 저장 경로 관리
//! - 로깅 인프라
//! - JSON 파일 기반 상태 저장소
//! - UTC 시간 유틸리티 (마커 타임스탬프, 일/월 경계)

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod time;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use persistence::*;
pub use types::*;
