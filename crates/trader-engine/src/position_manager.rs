//! 단일 포지션 관리.
//!
//! 제공 기능:
//! - 진입 시 초기 스톱 설정 (추세/역추세 비율)
//! - 가격 변화에 따른 트레일링 스톱 (보호 방향으로만 이동)
//! - 수익률 구간 그리드 기반 스톱 조정
//! - 청산 시 실현 수익률 누적

use crate::config::{AdjustmentGrid, EngineConfig};
use crate::error::{EngineError, EngineResult};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use trader_core::time::ms_to_datetime;
use trader_core::{pct_change, Direction, DecimalExt, Price, Quantity};
use trader_risk::TradeRecord;

/// 역추세 진입을 나타내는 존 태그.
pub const COUNTER_TREND_TAG: &str = "counter_trend";

/// 현재 포지션.
///
/// `direction`이 `None`이면 포지션이 없는 상태입니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub direction: Option<Direction>,
    pub entry_price: Price,
    /// 진입 시각 (epoch ms)
    pub entry_time: i64,
    pub stop_loss: Price,
    /// 진입 근거 태그 (예: "trend", "counter_trend")
    pub zone_tag: Option<String>,
    /// 진입 수량 (0 = 사이징 없음)
    pub quantity: Quantity,
    /// 마지막으로 관측한 가격
    pub last_price: Price,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.direction.is_some()
    }

    /// 진입가 대비 수익률 (방향 반영, %).
    pub fn profit_pct(&self, price: Price) -> Decimal {
        match self.direction {
            Some(direction) => pct_change(self.entry_price, price) * Decimal::from(direction.sign()),
            None => Decimal::ZERO,
        }
    }

    /// 미실현 손익 (USDT).
    pub fn unrealized_pnl(&self, price: Price) -> Decimal {
        match self.direction {
            Some(direction) => {
                (price - self.entry_price) * self.quantity * Decimal::from(direction.sign())
            }
            None => Decimal::ZERO,
        }
    }

    /// 주어진 가격이 스톱에 닿았는지 확인합니다.
    pub fn is_stop_hit(&self, price: Price) -> bool {
        match self.direction {
            Some(Direction::Long) => price <= self.stop_loss,
            Some(Direction::Short) => price >= self.stop_loss,
            None => false,
        }
    }

    fn is_counter_trend(&self) -> bool {
        self.zone_tag.as_deref() == Some(COUNTER_TREND_TAG)
    }
}

/// 청산된 포지션.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub direction: Direction,
    pub entry_price: Price,
    pub exit_price: Price,
    pub entry_time: i64,
    pub exit_time: i64,
    pub quantity: Quantity,
    /// 실현 수익률 (%)
    pub profit_pct: Decimal,
    pub reason: String,
    pub zone_tag: Option<String>,
}

impl ClosedPosition {
    pub fn is_win(&self) -> bool {
        self.profit_pct > Decimal::ZERO
    }

    /// 자금 관리 메트릭용 거래 기록으로 변환합니다.
    pub fn to_trade_record(&self, strategy: &str, symbol: &str) -> TradeRecord {
        let exit_time = ms_to_datetime(self.exit_time).unwrap_or_else(Utc::now);
        let entry_time = ms_to_datetime(self.entry_time).unwrap_or(exit_time);
        TradeRecord::new(
            strategy,
            symbol,
            self.direction,
            self.entry_price,
            self.exit_price,
            self.quantity,
            entry_time,
            exit_time,
            self.reason.as_str(),
        )
    }
}

/// 단일 포지션 관리자.
#[derive(Debug, Clone)]
pub struct PositionManager {
    position: Position,
    trend_trailing_pct: Decimal,
    counter_trend_trailing_pct: Decimal,
    grid: AdjustmentGrid,
    realized_profit_pct: Decimal,
    closed_count: u64,
    last_closed: Option<ClosedPosition>,
}

impl PositionManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            position: Position::default(),
            trend_trailing_pct: config.trend_trailing_pct,
            counter_trend_trailing_pct: config.counter_trend_trailing_pct,
            grid: config.adjustment_grid.clone(),
            realized_profit_pct: Decimal::ZERO,
            closed_count: 0,
            last_closed: None,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn is_open(&self) -> bool {
        self.position.is_open()
    }

    /// 누적 실현 수익률 (%).
    pub fn realized_profit_pct(&self) -> Decimal {
        self.realized_profit_pct
    }

    pub fn closed_count(&self) -> u64 {
        self.closed_count
    }

    /// 가장 최근에 청산된 포지션.
    pub fn last_closed(&self) -> Option<&ClosedPosition> {
        self.last_closed.as_ref()
    }

    /// 수량 없이 포지션을 엽니다.
    pub fn open_position(
        &mut self,
        direction: Direction,
        entry_price: Price,
        timestamp: i64,
        zone_tag: Option<&str>,
    ) -> EngineResult<&Position> {
        self.open_sized_position(direction, entry_price, timestamp, zone_tag, Decimal::ZERO)
    }

    /// 수량을 지정해 포지션을 엽니다.
    pub fn open_sized_position(
        &mut self,
        direction: Direction,
        entry_price: Price,
        timestamp: i64,
        zone_tag: Option<&str>,
        quantity: Quantity,
    ) -> EngineResult<&Position> {
        if self.position.is_open() {
            return Err(EngineError::PositionAlreadyOpen);
        }
        if entry_price <= Decimal::ZERO {
            return Err(EngineError::InvalidPrice(entry_price));
        }

        let mut position = Position {
            direction: Some(direction),
            entry_price,
            entry_time: timestamp,
            stop_loss: Decimal::ZERO,
            zone_tag: zone_tag.map(str::to_string),
            quantity,
            last_price: entry_price,
        };
        let trailing = self.base_trailing_pct(&position);
        position.stop_loss = stop_candidate(direction, entry_price, trailing);

        info!(
            direction = %direction,
            entry_price = %entry_price,
            stop_loss = %position.stop_loss,
            quantity = %quantity,
            zone_tag = ?position.zone_tag,
            "포지션 진입"
        );

        self.position = position;
        Ok(&self.position)
    }

    /// 포지션을 청산하고 실현 수익률을 누적합니다.
    pub fn close_position(
        &mut self,
        timestamp: i64,
        exit_price: Price,
        reason: &str,
    ) -> EngineResult<ClosedPosition> {
        let direction = self.position.direction.ok_or(EngineError::NoOpenPosition)?;
        if exit_price <= Decimal::ZERO {
            return Err(EngineError::InvalidPrice(exit_price));
        }

        let profit_pct = self.position.profit_pct(exit_price);
        let position = std::mem::take(&mut self.position);
        let closed = ClosedPosition {
            direction,
            entry_price: position.entry_price,
            exit_price,
            entry_time: position.entry_time,
            exit_time: timestamp,
            quantity: position.quantity,
            profit_pct,
            reason: reason.to_string(),
            zone_tag: position.zone_tag,
        };

        self.realized_profit_pct += profit_pct;
        self.closed_count += 1;

        info!(
            direction = %direction,
            entry_price = %closed.entry_price,
            exit_price = %exit_price,
            profit_pct = %profit_pct.round_dp(4),
            reason,
            "포지션 청산"
        );

        self.last_closed = Some(closed.clone());
        Ok(closed)
    }

    /// 진입 유형의 기본 비율로 트레일링 스톱을 갱신합니다.
    ///
    /// 후보 스톱이 기존보다 엄격히 유리할 때만 교체하며, 변경된 스톱을 반환합니다.
    pub fn update_trailing_stop(&mut self, current_price: Price) -> Option<Price> {
        if !self.position.is_open() || current_price <= Decimal::ZERO {
            return None;
        }
        self.position.last_price = current_price;

        let trailing = self.base_trailing_pct(&self.position);
        self.tighten(current_price, trailing)
    }

    /// 외부에서 지정한 트레일링 비율로 스톱을 조정합니다.
    pub fn apply_stop_adjustment(&mut self, trailing_pct: Decimal) -> EngineResult<Option<Price>> {
        if !self.position.is_open() {
            return Err(EngineError::NoOpenPosition);
        }
        let price = self.position.last_price;
        Ok(self.tighten(price, trailing_pct))
    }

    /// 수익률에 대응하는 트레일링 비율.
    pub fn get_adjustment_for_profit(&self, profit_pct: Decimal) -> Option<Decimal> {
        self.grid.lookup(profit_pct)
    }

    fn base_trailing_pct(&self, position: &Position) -> Decimal {
        if position.is_counter_trend() {
            self.counter_trend_trailing_pct
        } else {
            self.trend_trailing_pct
        }
    }

    fn tighten(&mut self, price: Price, trailing_pct: Decimal) -> Option<Price> {
        let direction = self.position.direction?;
        let candidate = stop_candidate(direction, price, trailing_pct);
        let tighter = match direction {
            Direction::Long => candidate > self.position.stop_loss,
            Direction::Short => candidate < self.position.stop_loss,
        };
        if !tighter {
            return None;
        }

        debug!(
            old_stop = %self.position.stop_loss,
            new_stop = %candidate,
            trailing_pct = %trailing_pct,
            "스톱 조정"
        );
        self.position.stop_loss = candidate;
        Some(candidate)
    }
}

fn stop_candidate(direction: Direction, price: Price, trailing_pct: Decimal) -> Price {
    let offset = price.pct_of(trailing_pct);
    match direction {
        Direction::Long => price - offset,
        Direction::Short => price + offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn manager() -> PositionManager {
        PositionManager::new(&EngineConfig::default())
    }

    #[test]
    fn test_initial_stop_by_direction() {
        let mut pm = manager();
        let position = pm.open_position(Direction::Long, dec!(100), 0, None).unwrap();
        assert_eq!(position.stop_loss, dec!(98));

        let mut pm = manager();
        let position = pm.open_position(Direction::Short, dec!(100), 0, None).unwrap();
        assert_eq!(position.stop_loss, dec!(102));

        let mut pm = manager();
        let position = pm
            .open_position(Direction::Long, dec!(100), 0, Some(COUNTER_TREND_TAG))
            .unwrap();
        assert_eq!(position.stop_loss, dec!(99));
    }

    #[test]
    fn test_single_position_guard() {
        let mut pm = manager();
        assert!(matches!(
            pm.close_position(0, dec!(100), "signal"),
            Err(EngineError::NoOpenPosition)
        ));
        pm.open_position(Direction::Long, dec!(100), 0, None).unwrap();
        assert!(matches!(
            pm.open_position(Direction::Short, dec!(100), 1, None),
            Err(EngineError::PositionAlreadyOpen)
        ));
        assert!(matches!(
            manager().open_position(Direction::Long, dec!(0), 0, None),
            Err(EngineError::InvalidPrice(_))
        ));
    }

    #[test]
    fn test_trailing_never_loosens() {
        let mut pm = manager();
        pm.open_position(Direction::Long, dec!(100), 0, None).unwrap();

        let raised = pm.update_trailing_stop(dec!(110)).unwrap();
        assert!(raised > dec!(98));
        // 하락 시 스톱 유지
        assert_eq!(pm.update_trailing_stop(dec!(105)), None);
        assert_eq!(pm.position().stop_loss, raised);
    }

    #[test]
    fn test_short_trailing_moves_down() {
        let mut pm = manager();
        pm.open_position(Direction::Short, dec!(100), 0, None).unwrap();
        let lowered = pm.update_trailing_stop(dec!(90)).unwrap();
        assert!(lowered < dec!(102));
        assert!(pm.position().is_stop_hit(lowered));
        assert!(!pm.position().is_stop_hit(dec!(90.5)));
    }

    #[test]
    fn test_apply_adjustment_uses_last_price() {
        let mut pm = manager();
        assert!(matches!(
            pm.apply_stop_adjustment(dec!(1)),
            Err(EngineError::NoOpenPosition)
        ));

        pm.open_position(Direction::Long, dec!(100), 0, None).unwrap();
        pm.update_trailing_stop(dec!(104));
        let adjusted = pm.apply_stop_adjustment(dec!(0.5)).unwrap().unwrap();
        assert_eq!(adjusted, dec!(103.48));
        // 더 느슨한 조정은 무시
        assert_eq!(pm.apply_stop_adjustment(dec!(5)).unwrap(), None);
    }

    #[test]
    fn test_close_accumulates_profit() {
        let mut pm = manager();
        pm.open_position(Direction::Long, dec!(100), 1_000, None).unwrap();
        let closed = pm.close_position(61_000, dec!(97), "stop_hit").unwrap();
        assert_eq!(closed.profit_pct, dec!(-3));
        assert!(!closed.is_win());
        assert!(!pm.is_open());

        pm.open_position(Direction::Short, dec!(200), 70_000, None).unwrap();
        pm.close_position(80_000, dec!(190), "signal").unwrap();
        assert_eq!(pm.realized_profit_pct(), dec!(2));
        assert_eq!(pm.closed_count(), 2);
        assert_eq!(pm.last_closed().unwrap().reason, "signal");
    }

    #[test]
    fn test_trade_record_conversion() {
        let mut pm = manager();
        pm.open_sized_position(Direction::Long, dec!(100), 0, None, dec!(2))
            .unwrap();
        let closed = pm.close_position(300_000, dec!(105), "signal").unwrap();
        let record = closed.to_trade_record("temporal", "BTCUSDT");
        assert_eq!(record.pnl, dec!(10));
        assert_eq!(record.duration_secs, 300);
        assert!(record.is_win);
    }

    proptest! {
        #[test]
        fn long_stop_is_monotonic(steps in proptest::collection::vec((0u32..500, 1u32..300), 1..40)) {
            let mut pm = manager();
            pm.open_position(Direction::Long, dec!(100), 0, None).unwrap();
            let mut last_stop = pm.position().stop_loss;
            for (cents, adj) in steps {
                let price = Decimal::new(5_000 + cents as i64 * 10, 2);
                pm.update_trailing_stop(price);
                prop_assert!(pm.position().stop_loss >= last_stop);
                last_stop = pm.position().stop_loss;

                pm.apply_stop_adjustment(Decimal::new(adj as i64, 2)).unwrap();
                prop_assert!(pm.position().stop_loss >= last_stop);
                last_stop = pm.position().stop_loss;
            }
        }

        #[test]
        fn short_stop_is_monotonic(prices in proptest::collection::vec(1u32..20_000, 1..40)) {
            let mut pm = manager();
            pm.open_position(Direction::Short, dec!(100), 0, None).unwrap();
            let mut last_stop = pm.position().stop_loss;
            for p in prices {
                pm.update_trailing_stop(Decimal::new(p as i64, 2));
                prop_assert!(pm.position().stop_loss <= last_stop);
                last_stop = pm.position().stop_loss;
            }
        }
    }
}
