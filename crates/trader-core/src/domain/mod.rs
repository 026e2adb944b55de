//! 실행 엔진과 자금 관리가 공유하는 도메인 모델.

mod direction;
mod market_data;

pub use direction::*;
pub use market_data::*;
