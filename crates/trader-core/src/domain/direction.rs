//! 포지션 방향.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 포지션 방향 (롱/숏).
///
/// "방향 없음"은 `Option<Direction>`의 `None`으로 표현합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// 매수 포지션
    Long,
    /// 매도 포지션
    Short,
}

impl Direction {
    /// 반대 방향을 반환합니다.
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// 가격 변화에 대한 부호 (롱 = +1, 숏 = -1).
    pub fn sign(&self) -> i32 {
        match self {
            Direction::Long => 1,
            Direction::Short => -1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_basics() {
        assert_eq!(Direction::Long.opposite(), Direction::Short);
        assert_eq!(Direction::Short.sign(), -1);
        assert_eq!(Direction::Long.to_string(), "long");
        assert_eq!(serde_json::to_string(&Direction::Short).unwrap(), "\"short\"");
    }
}
