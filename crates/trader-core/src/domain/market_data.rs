//! 시장 데이터 타입.
//!
//! - `Trade` - 체결 틱 (엔진 입력 이벤트)
//! - `Kline` - OHLCV 캔들

use crate::error::{TraderError, TraderResult};
use crate::types::{Price, Quantity, Timeframe};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 단일 체결.
///
/// 엔진은 `timestamp`(UTC epoch ms) 순서대로 체결을 소비합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// 체결 시각 (epoch ms)
    pub timestamp: i64,
    /// 체결 가격
    pub price: Price,
    /// 체결 수량
    pub quantity: Quantity,
    /// 매수자가 메이커인지 여부 (true = 매도 테이커 체결)
    #[serde(default)]
    pub is_buyer_maker: bool,
}

impl Trade {
    /// 새 체결을 생성합니다.
    pub fn new(timestamp: i64, price: Price, quantity: Quantity) -> Self {
        Self {
            timestamp,
            price,
            quantity,
            is_buyer_maker: false,
        }
    }

    /// 체결 대금 (가격 × 수량).
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// OHLCV 캔들.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    /// 캔들 시작 시각 (epoch ms)
    pub timestamp: i64,
    /// 시가
    pub open: Price,
    /// 고가
    pub high: Price,
    /// 저가
    pub low: Price,
    /// 종가
    pub close: Price,
    /// 거래량
    pub volume: Quantity,
}

impl Kline {
    /// 새 캔들을 생성합니다.
    pub fn new(
        timestamp: i64,
        open: Price,
        high: Price,
        low: Price,
        close: Price,
        volume: Quantity,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// 첫 체결로 캔들을 시작합니다.
    pub fn from_trade(timeframe: Timeframe, trade: &Trade) -> Self {
        Self {
            timestamp: timeframe.bucket_start(trade.timestamp),
            open: trade.price,
            high: trade.price,
            low: trade.price,
            close: trade.price,
            volume: trade.quantity,
        }
    }

    /// 체결을 캔들에 반영합니다.
    pub fn apply_trade(&mut self, trade: &Trade) {
        self.high = self.high.max(trade.price);
        self.low = self.low.min(trade.price);
        self.close = trade.price;
        self.volume += trade.quantity;
    }

    /// OHLC 관계를 검증합니다 (`close ≥ low`, `high ≥ open/close`, `low ≤ open`).
    pub fn validate(&self) -> TraderResult<()> {
        if self.close < self.low || self.open < self.low {
            return Err(TraderError::Data(format!(
                "kline {}: low {} above open/close",
                self.timestamp, self.low
            )));
        }
        if self.high < self.open || self.high < self.close {
            return Err(TraderError::Data(format!(
                "kline {}: high {} below open/close",
                self.timestamp, self.high
            )));
        }
        if self.volume < Decimal::ZERO {
            return Err(TraderError::Data(format!(
                "kline {}: negative volume",
                self.timestamp
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_kline_aggregation() {
        let first = Trade::new(300_500, dec!(100), dec!(1));
        let mut kline = Kline::from_trade(Timeframe::M5, &first);
        assert_eq!(kline.timestamp, 300_000);

        kline.apply_trade(&Trade::new(301_000, dec!(104), dec!(0.5)));
        kline.apply_trade(&Trade::new(302_000, dec!(98), dec!(0.5)));
        kline.apply_trade(&Trade::new(303_000, dec!(101), dec!(2)));

        assert_eq!(kline.open, dec!(100));
        assert_eq!(kline.high, dec!(104));
        assert_eq!(kline.low, dec!(98));
        assert_eq!(kline.close, dec!(101));
        assert_eq!(kline.volume, dec!(4));
        assert!(kline.validate().is_ok());
    }

    #[test]
    fn test_kline_validation() {
        let bad_low = Kline::new(0, dec!(10), dec!(12), dec!(11), dec!(10.5), dec!(1));
        assert!(bad_low.validate().is_err());

        let bad_high = Kline::new(0, dec!(10), dec!(9), dec!(8), dec!(9.5), dec!(1));
        assert!(bad_high.validate().is_err());
    }

    #[test]
    fn test_trade_defaults() {
        let trade: Trade =
            serde_json::from_str(r#"{"timestamp":1,"price":"10.5","quantity":"2"}"#).unwrap();
        assert!(!trade.is_buyer_maker);
        assert_eq!(trade.notional(), dec!(21));
    }
}
