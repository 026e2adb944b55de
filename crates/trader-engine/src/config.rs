//! 엔진 설정.
//!
//! 트레일링 스톱 비율, 수익 구간별 조정 그리드, 존 모니터링 설정을 담습니다.
//! 자금 관리 설정과 같은 방식으로 전체 단위 검증을 수행합니다.

use crate::zone_monitor::ZoneType;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use trader_risk::{ConfigValidationError, MarketKind};

/// 엔진 실행 모드.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    /// 저장된 체결 재생
    Backtest,
    /// 실시간 데이터, 모의 체결
    Paper,
    /// 실시간 데이터, 실거래
    Live,
}

impl EngineMode {
    /// 실시간 스트림을 소비하는 모드인지 확인합니다.
    pub fn is_streaming(&self) -> bool {
        matches!(self, EngineMode::Paper | EngineMode::Live)
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineMode::Backtest => write!(f, "backtest"),
            EngineMode::Paper => write!(f, "paper"),
            EngineMode::Live => write!(f, "live"),
        }
    }
}

/// 존 모니터링 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitoringMode {
    /// 활성 상태 동안 매 틱 재평가 (조정 간 최소 60초)
    Continuous,
    /// 활성화당 한 번만 발동 후 자동 비활성화
    Event,
}

/// 수익 구간 하나에 대응하는 트레일링 비율.
///
/// 구간은 `[profit_min, profit_max)` 반개구간입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentLevel {
    pub profit_min: Decimal,
    pub profit_max: Decimal,
    pub trailing_pct: Decimal,
}

impl AdjustmentLevel {
    pub fn new(profit_min: Decimal, profit_max: Decimal, trailing_pct: Decimal) -> Self {
        Self {
            profit_min,
            profit_max,
            trailing_pct,
        }
    }

    fn contains(&self, profit_pct: Decimal) -> bool {
        profit_pct >= self.profit_min && profit_pct < self.profit_max
    }
}

/// 수익률 → 트레일링 비율 조정 그리드.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdjustmentGrid(Vec<AdjustmentLevel>);

impl AdjustmentGrid {
    pub fn new(levels: Vec<AdjustmentLevel>) -> Self {
        Self(levels)
    }

    pub fn levels(&self) -> &[AdjustmentLevel] {
        &self.0
    }

    /// 수익률에 해당하는 트레일링 비율을 찾습니다.
    ///
    /// 모든 구간을 넘어선 수익이면 마지막 구간의 값을, 첫 구간보다 낮으면 `None`을 반환합니다.
    pub fn lookup(&self, profit_pct: Decimal) -> Option<Decimal> {
        for level in &self.0 {
            if level.contains(profit_pct) {
                return Some(level.trailing_pct);
            }
        }
        match self.0.last() {
            Some(last) if profit_pct >= last.profit_max => Some(last.trailing_pct),
            _ => None,
        }
    }

    fn collect_errors(&self, errors: &mut Vec<String>) {
        for (i, level) in self.0.iter().enumerate() {
            if level.profit_min >= level.profit_max {
                errors.push(format!(
                    "adjustment_grid[{i}]: profit_min must be less than profit_max"
                ));
            }
            if level.trailing_pct <= Decimal::ZERO || level.trailing_pct > dec!(100) {
                errors.push(format!(
                    "adjustment_grid[{i}]: trailing_pct must be in (0, 100]"
                ));
            }
        }
        for (i, pair) in self.0.windows(2).enumerate() {
            if pair[1].profit_min < pair[0].profit_max {
                errors.push(format!(
                    "adjustment_grid[{}] overlaps or precedes adjustment_grid[{i}]",
                    i + 1
                ));
            }
        }
    }
}

impl Default for AdjustmentGrid {
    fn default() -> Self {
        Self(vec![
            AdjustmentLevel::new(dec!(0), dec!(3), dec!(2.0)),
            AdjustmentLevel::new(dec!(3), dec!(6), dec!(1.5)),
            AdjustmentLevel::new(dec!(6), dec!(10), dec!(1.0)),
            AdjustmentLevel::new(dec!(10), dec!(20), dec!(0.75)),
        ])
    }
}

/// 개별 존 설정.
///
/// 설정 파일에서 생략된 필드는 해당 존의 기본값으로 채워집니다.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneSettings {
    pub enabled: bool,

    pub monitoring: MonitoringMode,

    /// event 존 활성화에 필요한 최소 수익률 (%)
    pub profit_threshold: Decimal,
}

/// 일부 필드만 지정된 존 설정.
#[derive(Debug, Deserialize)]
struct PartialZoneSettings {
    enabled: Option<bool>,
    monitoring: Option<MonitoringMode>,
    profit_threshold: Option<Decimal>,
}

impl PartialZoneSettings {
    fn over(self, base: ZoneSettings) -> ZoneSettings {
        ZoneSettings {
            enabled: self.enabled.unwrap_or(base.enabled),
            monitoring: self.monitoring.unwrap_or(base.monitoring),
            profit_threshold: self.profit_threshold.unwrap_or(base.profit_threshold),
        }
    }
}

fn zone_over<'de, D>(deserializer: D, base: ZoneSettings) -> Result<ZoneSettings, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(PartialZoneSettings::deserialize(deserializer)?.over(base))
}

fn deserialize_cci_inverse<'de, D: Deserializer<'de>>(d: D) -> Result<ZoneSettings, D::Error> {
    zone_over(d, default_cci_inverse())
}

fn deserialize_macd_inverse<'de, D: Deserializer<'de>>(d: D) -> Result<ZoneSettings, D::Error> {
    zone_over(d, default_macd_inverse())
}

fn deserialize_di_counter<'de, D: Deserializer<'de>>(d: D) -> Result<ZoneSettings, D::Error> {
    zone_over(d, default_di_counter())
}

impl ZoneSettings {
    pub fn continuous() -> Self {
        Self {
            enabled: true,
            monitoring: MonitoringMode::Continuous,
            profit_threshold: Decimal::ZERO,
        }
    }

    pub fn event(profit_threshold: Decimal) -> Self {
        Self {
            enabled: true,
            monitoring: MonitoringMode::Event,
            profit_threshold,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::continuous()
        }
    }
}

impl Default for ZoneSettings {
    fn default() -> Self {
        Self::continuous()
    }
}

/// 존 유형별 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    #[serde(
        default = "default_cci_inverse",
        deserialize_with = "deserialize_cci_inverse"
    )]
    pub cci_inverse: ZoneSettings,
    #[serde(
        default = "default_macd_inverse",
        deserialize_with = "deserialize_macd_inverse"
    )]
    pub macd_inverse: ZoneSettings,
    #[serde(
        default = "default_di_counter",
        deserialize_with = "deserialize_di_counter"
    )]
    pub di_counter: ZoneSettings,
}

impl ZoneConfig {
    pub fn get(&self, zone: ZoneType) -> &ZoneSettings {
        match zone {
            ZoneType::CciInverse => &self.cci_inverse,
            ZoneType::MacdInverse => &self.macd_inverse,
            ZoneType::DiCounter => &self.di_counter,
        }
    }
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            cci_inverse: default_cci_inverse(),
            macd_inverse: default_macd_inverse(),
            di_counter: default_di_counter(),
        }
    }
}

/// 시간 기반 실행 엔진 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 실행 모드 (기본값: backtest)
    #[serde(default = "default_mode")]
    pub mode: EngineMode,

    /// 거래 심볼 (기본값: BTCUSDT)
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// 체결 기록에 남길 전략 이름
    #[serde(default = "default_strategy_name")]
    pub strategy_name: String,

    /// 사이징 요청 시 시장 구분
    #[serde(default = "default_market")]
    pub market: MarketKind,

    /// 선물 레버리지 (미지정 시 자금 관리 기본값)
    #[serde(default)]
    pub leverage: Option<u32>,

    /// 체결 히스토리 윈도우 크기 (기본값: 1000)
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// 타임프레임별 캔들 윈도우 크기 (기본값: 500)
    #[serde(default = "default_kline_window_size")]
    pub kline_window_size: usize,

    /// 평가에 필요한 최소 마감 5분봉 수 (기본값: 1)
    #[serde(default = "default_min_klines")]
    pub min_klines_for_evaluation: usize,

    /// look-ahead 방지 (기본값: true)
    #[serde(default = "default_true")]
    pub anti_look_ahead: bool,

    /// 추세 진입 트레일링 비율 (기본값: 2%)
    #[serde(default = "default_trend_trailing_pct")]
    pub trend_trailing_pct: Decimal,

    /// 역추세 진입 트레일링 비율 (기본값: 1%)
    #[serde(default = "default_counter_trend_trailing_pct")]
    pub counter_trend_trailing_pct: Decimal,

    #[serde(default)]
    pub adjustment_grid: AdjustmentGrid,

    #[serde(default)]
    pub zones: ZoneConfig,

    /// 지표 계산 제한 시간 (기본값: 5000ms)
    #[serde(default = "default_calculation_timeout_ms")]
    pub calculation_timeout_ms: u64,

    /// 존 활성화 로그 보존 시간 (기본값: 24시간)
    #[serde(default = "default_zone_log_retention_hours")]
    pub zone_log_retention_hours: i64,

    /// 존 로그 정리 주기 (기본값: 3600초)
    #[serde(default = "default_zone_cleanup_interval_secs")]
    pub zone_cleanup_interval_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_cci_inverse() -> ZoneSettings {
    ZoneSettings::continuous()
}
fn default_macd_inverse() -> ZoneSettings {
    ZoneSettings::event(dec!(1))
}
fn default_di_counter() -> ZoneSettings {
    ZoneSettings::event(dec!(0.5))
}
fn default_mode() -> EngineMode {
    EngineMode::Backtest
}
fn default_symbol() -> String {
    "BTCUSDT".to_string()
}
fn default_strategy_name() -> String {
    "temporal".to_string()
}
fn default_market() -> MarketKind {
    MarketKind::Spot
}
fn default_window_size() -> usize {
    1000
}
fn default_kline_window_size() -> usize {
    500
}
fn default_min_klines() -> usize {
    1
}
fn default_trend_trailing_pct() -> Decimal {
    dec!(2)
}
fn default_counter_trend_trailing_pct() -> Decimal {
    dec!(1)
}
fn default_calculation_timeout_ms() -> u64 {
    5000
}
fn default_zone_log_retention_hours() -> i64 {
    24
}
fn default_zone_cleanup_interval_secs() -> u64 {
    3600
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            symbol: default_symbol(),
            strategy_name: default_strategy_name(),
            market: default_market(),
            leverage: None,
            window_size: default_window_size(),
            kline_window_size: default_kline_window_size(),
            min_klines_for_evaluation: default_min_klines(),
            anti_look_ahead: true,
            trend_trailing_pct: default_trend_trailing_pct(),
            counter_trend_trailing_pct: default_counter_trend_trailing_pct(),
            adjustment_grid: AdjustmentGrid::default(),
            zones: ZoneConfig::default(),
            calculation_timeout_ms: default_calculation_timeout_ms(),
            zone_log_retention_hours: default_zone_log_retention_hours(),
            zone_cleanup_interval_secs: default_zone_cleanup_interval_secs(),
        }
    }
}

impl EngineConfig {
    /// 지정 모드의 기본 설정.
    pub fn for_mode(mode: EngineMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// 설정 전체를 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let mut errors = Vec::new();

        if self.symbol.trim().is_empty() {
            errors.push("symbol must not be empty".to_string());
        }
        if self.window_size == 0 {
            errors.push("window_size must be greater than 0".to_string());
        }
        if self.kline_window_size == 0 {
            errors.push("kline_window_size must be greater than 0".to_string());
        }
        if self.min_klines_for_evaluation > self.kline_window_size {
            errors.push("min_klines_for_evaluation must not exceed kline_window_size".to_string());
        }
        if self.trend_trailing_pct <= Decimal::ZERO || self.trend_trailing_pct > dec!(100) {
            errors.push("trend_trailing_pct must be in (0, 100]".to_string());
        }
        if self.counter_trend_trailing_pct <= Decimal::ZERO
            || self.counter_trend_trailing_pct > dec!(100)
        {
            errors.push("counter_trend_trailing_pct must be in (0, 100]".to_string());
        }
        if let Some(leverage) = self.leverage {
            if !(1..=125).contains(&leverage) {
                errors.push("leverage must be in [1, 125]".to_string());
            }
        }
        if self.calculation_timeout_ms == 0 {
            errors.push("calculation_timeout_ms must be greater than 0".to_string());
        }
        if self.zone_log_retention_hours <= 0 {
            errors.push("zone_log_retention_hours must be greater than 0".to_string());
        }
        if self.zone_cleanup_interval_secs == 0 {
            errors.push("zone_cleanup_interval_secs must be greater than 0".to_string());
        }
        for zone in ZoneType::ALL {
            if self.zones.get(zone).profit_threshold < Decimal::ZERO {
                errors.push(format!("zones.{zone}.profit_threshold must not be negative"));
            }
        }
        self.adjustment_grid.collect_errors(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigValidationError::Invalid(errors))
        }
    }
}
