//! 포지션 크기 계산.
//!
//! 고정 금액 또는 현재 자본 비율로 주문 수량을 계산합니다.
//!
//! 계산 순서:
//! 1. 일일/동시 포지션 상한 확인
//! 2. 명목 금액과 필요 증거금 계산
//! 3. 가용 잔고 확인
//! 4. 원시 수량 = 명목 금액 × 레버리지 / 가격 (현물은 레버리지 1)
//! 5. 명목 금액을 [최소, 최대]로 제한 (최소 미만은 거부, 최대 초과는 비례 축소)
//! 6. 심볼 정밀도로 내림 후 최소 거래 수량 확인
//!
//! 승인/거부와 관계없이 모든 계산은 감사 로그에 기록됩니다.

use crate::audit::{AuditEventType, AuditLogger};
use crate::config::{BaseConfiguration, SizingMode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use trader_core::{DecimalExt, Price, Quantity};

/// 기본 수량 소수점 자릿수.
pub const DEFAULT_QUANTITY_DECIMALS: u32 = 3;

const MAX_LEVERAGE: u32 = 125;

/// 시장 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketKind {
    /// 현물 (레버리지 1)
    Spot,
    /// 선물
    Futures,
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketKind::Spot => write!(f, "spot"),
            MarketKind::Futures => write!(f, "futures"),
        }
    }
}

/// 심볼별 수량 규격.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// 수량 소수점 자릿수
    pub quantity_decimals: u32,
    /// 최소 거래 수량
    pub min_quantity: Quantity,
}

impl InstrumentSpec {
    pub const fn new(quantity_decimals: u32, min_quantity: Quantity) -> Self {
        Self {
            quantity_decimals,
            min_quantity,
        }
    }
}

impl Default for InstrumentSpec {
    fn default() -> Self {
        Self::new(DEFAULT_QUANTITY_DECIMALS, dec!(0.001))
    }
}

/// 사이징 요청.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingRequest {
    /// 거래 심볼 (예: "BTCUSDT", "BTC/USDT")
    pub symbol: String,
    /// 진입 예정 가격
    pub price: Price,
    /// 시장 종류
    pub market: MarketKind,
    /// 선물 레버리지 (없으면 설정 기본값)
    pub leverage: Option<u32>,
    /// 가용 잔고 (USDT)
    pub available_balance: Decimal,
    /// 요청 전략 이름
    pub strategy: String,
}

impl SizingRequest {
    /// 현물 요청을 생성합니다.
    pub fn spot(symbol: impl Into<String>, price: Price, available_balance: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            market: MarketKind::Spot,
            leverage: None,
            available_balance,
            strategy: String::new(),
        }
    }

    /// 선물 요청을 생성합니다.
    pub fn futures(
        symbol: impl Into<String>,
        price: Price,
        leverage: u32,
        available_balance: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            market: MarketKind::Futures,
            leverage: Some(leverage),
            available_balance,
            strategy: String::new(),
        }
    }

    /// 전략 이름을 설정합니다.
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }
}

/// 사이징 시점의 거래 카운터.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizingCounters {
    /// 오늘 진입한 포지션 수
    pub daily_positions: u32,
    /// 현재 열린 포지션 수
    pub concurrent_trades: u32,
}

/// 사이징 결과.
///
/// 리스크 규칙에 의한 거부는 에러가 아니라 `approved = false`와 사유로 표현됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingResult {
    /// 승인 여부
    pub approved: bool,
    pub symbol: String,
    pub mode: SizingMode,
    pub market: MarketKind,
    /// 최종 주문 수량 (정밀도 적용 후)
    pub quantity: Quantity,
    /// 최종 명목 금액 (USDT, 레버리지 미적용)
    pub notional: Decimal,
    /// 레버리지 적용 포지션 가치
    pub position_value: Decimal,
    /// 필요 증거금/잔고
    pub required_margin: Decimal,
    pub leverage: u32,
    /// 적용된 수량 자릿수
    pub quantity_decimals: u32,
    /// 최대 금액으로 축소되었는지 여부
    pub capped: bool,
    /// 거부 사유
    pub reason: Option<String>,
}

impl SizingResult {
    fn rejected(request: &SizingRequest, mode: SizingMode, reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            symbol: request.symbol.clone(),
            mode,
            market: request.market,
            quantity: Decimal::ZERO,
            notional: Decimal::ZERO,
            position_value: Decimal::ZERO,
            required_margin: Decimal::ZERO,
            leverage: request.leverage.unwrap_or(1),
            quantity_decimals: DEFAULT_QUANTITY_DECIMALS,
            capped: false,
            reason: Some(reason.into()),
        }
    }

    /// 거부 사유 (승인된 경우 빈 문자열).
    pub fn reason_or_empty(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }
}

/// 포지션 사이저.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    instruments: BTreeMap<String, InstrumentSpec>,
    audit: Option<Arc<AuditLogger>>,
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionSizer {
    /// 기본 심볼 규격 테이블로 사이저를 생성합니다.
    pub fn new() -> Self {
        let instruments = [
            ("BTC", InstrumentSpec::new(3, dec!(0.001))),
            ("ETH", InstrumentSpec::new(3, dec!(0.001))),
            ("BNB", InstrumentSpec::new(2, dec!(0.01))),
            ("SOL", InstrumentSpec::new(2, dec!(0.01))),
            ("XRP", InstrumentSpec::new(1, dec!(0.1))),
            ("ADA", InstrumentSpec::new(0, dec!(1))),
            ("DOGE", InstrumentSpec::new(0, dec!(1))),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            instruments,
            audit: None,
        }
    }

    /// 감사 로거를 연결합니다.
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// 심볼(또는 기초 자산 접두사) 규격을 등록합니다.
    pub fn register_instrument(&mut self, symbol: &str, spec: InstrumentSpec) {
        self.instruments.insert(normalize_symbol(symbol), spec);
    }

    /// 심볼 규격을 조회합니다.
    ///
    /// 정확히 일치하는 항목, 가장 긴 접두사 항목, 기본값 순으로 찾습니다.
    pub fn instrument_for(&self, symbol: &str) -> InstrumentSpec {
        let normalized = normalize_symbol(symbol);
        if let Some(spec) = self.instruments.get(&normalized) {
            return *spec;
        }
        self.instruments
            .iter()
            .filter(|(prefix, _)| normalized.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, spec)| *spec)
            .unwrap_or_default()
    }

    /// 포지션 크기를 계산합니다.
    pub fn calculate(
        &self,
        config: &BaseConfiguration,
        request: &SizingRequest,
        counters: SizingCounters,
    ) -> SizingResult {
        let result = self.compute(config, request, counters);

        if result.approved {
            info!(
                symbol = %result.symbol,
                mode = %result.mode,
                quantity = %result.quantity,
                notional = %result.notional,
                leverage = result.leverage,
                "포지션 크기 계산 완료"
            );
        } else {
            info!(
                symbol = %request.symbol,
                reason = result.reason_or_empty(),
                "포지션 크기 계산 거부"
            );
        }

        if let Some(audit) = &self.audit {
            let impact = if result.approved {
                format!("{} {} 승인", result.quantity, result.symbol)
            } else {
                format!("거부: {}", result.reason_or_empty())
            };
            audit.record(
                AuditEventType::PositionSizing,
                "position_sizer",
                serde_json::json!({
                    "request": request,
                    "counters": counters,
                    "result": result,
                }),
                result.approved,
                impact,
            );
        }

        result
    }

    fn compute(
        &self,
        config: &BaseConfiguration,
        request: &SizingRequest,
        counters: SizingCounters,
    ) -> SizingResult {
        let sizing = &config.position_sizing;
        let mode = sizing.mode;

        // 1. 카운터 상한
        if counters.daily_positions >= config.max_daily_positions {
            return SizingResult::rejected(
                request,
                mode,
                format!(
                    "daily position limit reached ({}/{})",
                    counters.daily_positions, config.max_daily_positions
                ),
            );
        }
        if counters.concurrent_trades >= config.max_concurrent_trades {
            return SizingResult::rejected(
                request,
                mode,
                format!(
                    "concurrent trade limit reached ({}/{})",
                    counters.concurrent_trades, config.max_concurrent_trades
                ),
            );
        }
        if request.price <= Decimal::ZERO {
            return SizingResult::rejected(
                request,
                mode,
                format!("price must be greater than 0 (got {})", request.price),
            );
        }

        let leverage = match request.market {
            MarketKind::Spot => 1,
            MarketKind::Futures => request.leverage.unwrap_or(sizing.default_leverage),
        };
        if !(1..=MAX_LEVERAGE).contains(&leverage) {
            return SizingResult::rejected(
                request,
                mode,
                format!("leverage {} outside [1, {}]", leverage, MAX_LEVERAGE),
            );
        }

        // 2. 명목 금액 / 필요 증거금
        let mut notional = match (mode, request.market) {
            (SizingMode::Fixed, MarketKind::Spot) => sizing.fixed_spot_amount,
            (SizingMode::Fixed, MarketKind::Futures) => sizing.fixed_futures_amount,
            (SizingMode::Percentage, MarketKind::Spot) => {
                config.current_capital.pct_of(sizing.spot_percentage)
            }
            (SizingMode::Percentage, MarketKind::Futures) => {
                config.current_capital.pct_of(sizing.futures_percentage)
            }
        };
        let required_margin = notional;

        // 3. 잔고
        if request.available_balance < required_margin {
            return SizingResult::rejected(
                request,
                mode,
                format!(
                    "insufficient balance: required {}, available {}",
                    required_margin, request.available_balance
                ),
            );
        }

        // 4. 원시 수량
        let lev = Decimal::from(leverage);
        let mut quantity = notional * lev / request.price;

        // 5. 금액 제한
        if notional < sizing.min_position_size {
            return SizingResult::rejected(
                request,
                mode,
                format!(
                    "position size {} below minimum {}",
                    notional, sizing.min_position_size
                ),
            );
        }
        let mut capped = false;
        if notional > sizing.max_position_size {
            quantity = quantity * sizing.max_position_size / notional;
            notional = sizing.max_position_size;
            capped = true;
            debug!(
                symbol = %request.symbol,
                max = %sizing.max_position_size,
                "최대 포지션 금액으로 축소"
            );
        }

        // 6. 정밀도
        let spec = self.instrument_for(&request.symbol);
        let quantity = quantity.floor_dp(spec.quantity_decimals);
        if quantity < spec.min_quantity {
            return SizingResult::rejected(
                request,
                mode,
                format!(
                    "quantity {} below minimum tradable {}",
                    quantity, spec.min_quantity
                ),
            );
        }

        SizingResult {
            approved: true,
            symbol: request.symbol.clone(),
            mode,
            market: request.market,
            quantity,
            notional,
            position_value: notional * lev,
            required_margin: if capped {
                sizing.max_position_size
            } else {
                required_margin
            },
            leverage,
            quantity_decimals: spec.quantity_decimals,
            capped,
            reason: None,
        }
    }
}

fn normalize_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PositionSizingConfig;
    use proptest::prelude::*;

    fn counters() -> SizingCounters {
        SizingCounters::default()
    }

    #[test]
    fn test_fixed_spot_sizing() {
        let sizer = PositionSizer::new();
        let config = BaseConfiguration::default();
        let request = SizingRequest::spot("BTCUSDT", dec!(50000), dec!(5000));

        let result = sizer.calculate(&config, &request, counters());
        assert!(result.approved, "{:?}", result.reason);
        assert_eq!(result.quantity, dec!(0.02));
        assert_eq!(result.notional, dec!(1000));
        assert_eq!(result.leverage, 1);
    }

    #[test]
    fn test_fixed_futures_sizing_uses_leverage() {
        let sizer = PositionSizer::new();
        let config = BaseConfiguration::default();
        let request = SizingRequest::futures("ETHUSDT", dec!(2500), 10, dec!(1000));

        let result = sizer.calculate(&config, &request, counters());
        assert!(result.approved);
        // 500 × 10 / 2500 = 2
        assert_eq!(result.quantity, dec!(2));
        assert_eq!(result.required_margin, dec!(500));
        assert_eq!(result.position_value, dec!(5000));
    }

    #[test]
    fn test_percentage_sizing_scales_with_capital() {
        let sizer = PositionSizer::new();
        let mut config = BaseConfiguration::default();
        config.position_sizing = PositionSizingConfig::percentage(dec!(10), dec!(5));
        let request = SizingRequest::spot("BTCUSDT", dec!(50000), dec!(100000));

        config.current_capital = dec!(10000);
        let small = sizer.calculate(&config, &request, counters());
        config.current_capital = dec!(20000);
        let large = sizer.calculate(&config, &request, counters());

        assert_eq!(small.quantity, dec!(0.02));
        assert_eq!(large.quantity, dec!(0.04));
    }

    #[test]
    fn test_counter_caps() {
        let sizer = PositionSizer::new();
        let config = BaseConfiguration::default();
        let request = SizingRequest::spot("BTCUSDT", dec!(50000), dec!(5000));

        let daily = sizer.calculate(
            &config,
            &request,
            SizingCounters {
                daily_positions: config.max_daily_positions,
                concurrent_trades: 0,
            },
        );
        assert!(!daily.approved);
        assert!(daily.reason_or_empty().contains("daily"));

        let concurrent = sizer.calculate(
            &config,
            &request,
            SizingCounters {
                daily_positions: 0,
                concurrent_trades: config.max_concurrent_trades,
            },
        );
        assert!(!concurrent.approved);
        assert!(concurrent.reason_or_empty().contains("concurrent"));
    }

    #[test]
    fn test_insufficient_balance() {
        let sizer = PositionSizer::new();
        let config = BaseConfiguration::default();
        let request = SizingRequest::spot("BTCUSDT", dec!(50000), dec!(999));

        let result = sizer.calculate(&config, &request, counters());
        assert!(!result.approved);
        assert!(result.reason_or_empty().contains("insufficient balance"));
    }

    #[test]
    fn test_min_and_max_clamp() {
        let sizer = PositionSizer::new();

        let mut config = BaseConfiguration::default();
        config.position_sizing.fixed_spot_amount = dec!(5);
        let request = SizingRequest::spot("BTCUSDT", dec!(50000), dec!(5000));
        let below = sizer.calculate(&config, &request, counters());
        assert!(!below.approved);
        assert!(below.reason_or_empty().contains("below minimum"));

        let mut config = BaseConfiguration::default();
        config.position_sizing.fixed_spot_amount = dec!(20000);
        let request = SizingRequest::spot("BTCUSDT", dec!(50000), dec!(50000));
        let capped = sizer.calculate(&config, &request, counters());
        assert!(capped.approved);
        assert!(capped.capped);
        assert_eq!(capped.notional, dec!(10000));
        assert_eq!(capped.quantity, dec!(0.2));
    }

    #[test]
    fn test_precision_and_min_quantity() {
        let sizer = PositionSizer::new();
        let config = BaseConfiguration::default();

        // DOGE: 정수 수량
        let request = SizingRequest::spot("DOGE/USDT", dec!(0.3), dec!(5000));
        let result = sizer.calculate(&config, &request, counters());
        assert_eq!(result.quantity, dec!(3333));
        assert_eq!(result.quantity_decimals, 0);

        // 1000 USDT로 BTC 1개 가격이 2,000,000이면 0.0005 -> 0.000 < 0.001
        let request = SizingRequest::spot("BTCUSDT", dec!(2000000), dec!(5000));
        let result = sizer.calculate(&config, &request, counters());
        assert!(!result.approved);
        assert!(result.reason_or_empty().contains("minimum tradable"));
    }

    #[test]
    fn test_instrument_lookup_fallback() {
        let mut sizer = PositionSizer::new();
        assert_eq!(sizer.instrument_for("btc-usdt").quantity_decimals, 3);
        assert_eq!(sizer.instrument_for("XRPUSDT").quantity_decimals, 1);
        assert_eq!(
            sizer.instrument_for("UNKNOWNUSDT"),
            InstrumentSpec::default()
        );

        sizer.register_instrument("XRPUSDC", InstrumentSpec::new(2, dec!(0.01)));
        assert_eq!(sizer.instrument_for("XRP/USDC").quantity_decimals, 2);
        assert_eq!(sizer.instrument_for("XRPUSDT").quantity_decimals, 1);
    }

    #[test]
    fn test_invalid_leverage_and_price() {
        let sizer = PositionSizer::new();
        let config = BaseConfiguration::default();

        let request = SizingRequest::futures("BTCUSDT", dec!(50000), 200, dec!(5000));
        assert!(!sizer.calculate(&config, &request, counters()).approved);

        let request = SizingRequest::spot("BTCUSDT", Decimal::ZERO, dec!(5000));
        assert!(!sizer.calculate(&config, &request, counters()).approved);
    }

    #[test]
    fn test_calculation_is_audited() {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(AuditLogger::new(dir.path()).unwrap());
        let sizer = PositionSizer::new().with_audit(audit.clone());
        let config = BaseConfiguration::default();

        sizer.calculate(
            &config,
            &SizingRequest::spot("BTCUSDT", dec!(50000), dec!(5000)),
            counters(),
        );
        sizer.calculate(
            &config,
            &SizingRequest::spot("BTCUSDT", dec!(50000), dec!(1)),
            counters(),
        );

        let today = chrono::Utc::now().date_naive();
        let entries = audit.read_audit_logs(today, today).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].success);
        assert!(!entries[1].success);
        assert_eq!(entries[1].payload["request"]["symbol"], "BTCUSDT");
    }

    proptest! {
        #[test]
        fn prop_fixed_quantity_matches_amount(price in 1_000u32..200_000u32) {
            let sizer = PositionSizer::new();
            let config = BaseConfiguration::default();
            let price = Decimal::from(price);
            let request = SizingRequest::spot("BTCUSDT", price, dec!(5000));

            let result = sizer.calculate(&config, &request, SizingCounters::default());
            prop_assert!(result.approved);
            let value = result.quantity * price;
            // 내림 오차는 최대 한 단위(0.001) × 가격
            prop_assert!(value <= dec!(1000));
            prop_assert!(dec!(1000) - value <= dec!(0.001) * price);
        }
    }
}
