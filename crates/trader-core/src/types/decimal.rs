//! 금융 계산용 Decimal 유틸리티.

use rust_decimal::{Decimal, RoundingStrategy};

/// 가격 타입.
pub type Price = Decimal;

/// 수량 타입.
pub type Quantity = Decimal;

/// 퍼센트 타입 (2.5 = 2.5%).
pub type Percentage = Decimal;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Decimal 연산 확장 트레이트.
pub trait DecimalExt {
    /// 이 값의 `pct`% 를 반환합니다 (예: 1000.pct_of(10) = 100).
    fn pct_of(&self, pct: Percentage) -> Decimal;

    /// 지정 소수점 자릿수로 내림합니다 (0 방향).
    ///
    /// 수량 정밀도 처리에 사용하며, 반올림으로 가용 잔고를 넘지 않도록 합니다.
    fn floor_dp(&self, dp: u32) -> Decimal;

    /// 퍼센트 문자열로 변환합니다 (예: 5.25 -> "5.25%").
    fn to_percentage_string(&self) -> String;
}

impl DecimalExt for Decimal {
    fn pct_of(&self, pct: Percentage) -> Decimal {
        *self * pct / HUNDRED
    }

    fn floor_dp(&self, dp: u32) -> Decimal {
        self.round_dp_with_strategy(dp, RoundingStrategy::ToZero)
    }

    fn to_percentage_string(&self) -> String {
        format!("{:.2}%", self)
    }
}

/// `from` 대비 `to`의 변화율(%)을 계산합니다. `from`이 0이면 0을 반환합니다.
pub fn pct_change(from: Decimal, to: Decimal) -> Percentage {
    if from.is_zero() {
        return Decimal::ZERO;
    }
    (to - from) / from * HUNDRED
}

/// `part`가 `whole`에서 차지하는 비율(%)을 계산합니다. `whole`이 0이면 0을 반환합니다.
pub fn ratio_pct(part: Decimal, whole: Decimal) -> Percentage {
    if whole.is_zero() {
        return Decimal::ZERO;
    }
    part / whole * HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_pct_of() {
        assert_eq!(dec!(10000).pct_of(dec!(10)), dec!(1000));
        assert_eq!(dec!(100).pct_of(dec!(2)), dec!(2));
    }

    #[test]
    fn test_floor_dp() {
        assert_eq!(dec!(0.02999).floor_dp(3), dec!(0.029));
        assert_eq!(dec!(1.5).floor_dp(0), dec!(1));
        assert_eq!(dec!(-1.55).floor_dp(1), dec!(-1.5));
    }

    #[test]
    fn test_pct_change() {
        assert_eq!(pct_change(dec!(100), dec!(97)), dec!(-3));
        assert_eq!(pct_change(dec!(0), dec!(97)), dec!(0));
        assert_eq!(ratio_pct(dec!(50), dec!(200)), dec!(25));
        assert_eq!(dec!(5.25).to_percentage_string(), "5.25%");
    }
}
