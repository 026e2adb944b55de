//! 자금 관리 설정.
//!
//! 손실 한도, 포지션 사이징, 자본, 동시성 상한을 하나의 `BaseConfiguration`으로
//! 묶습니다. 설정은 전체 단위로 검증되며, 하나라도 범위를 벗어나면 모두 거부됩니다.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 포지션 사이징 모드.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingMode {
    /// 거래당 고정 USDT 금액
    Fixed,
    /// 현재 자본 대비 비율
    Percentage,
}

impl fmt::Display for SizingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizingMode::Fixed => write!(f, "fixed"),
            SizingMode::Percentage => write!(f, "percentage"),
        }
    }
}

/// 포지션 사이징 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSizingConfig {
    /// 사이징 모드 (기본값: fixed)
    #[serde(default = "default_mode")]
    pub mode: SizingMode,

    /// 현물 고정 금액 (USDT, 기본값: 1000)
    #[serde(default = "default_fixed_spot_amount")]
    pub fixed_spot_amount: Decimal,

    /// 선물 고정 증거금 (USDT, 기본값: 500)
    #[serde(default = "default_fixed_futures_amount")]
    pub fixed_futures_amount: Decimal,

    /// 현물 자본 비율 (기본값: 10%)
    #[serde(default = "default_spot_percentage")]
    pub spot_percentage: Decimal,

    /// 선물 자본 비율 (기본값: 5%)
    #[serde(default = "default_futures_percentage")]
    pub futures_percentage: Decimal,

    /// 선물 기본 레버리지 (기본값: 1)
    #[serde(default = "default_leverage")]
    pub default_leverage: u32,

    /// 최대 포지션 금액 (USDT, 기본값: 10000)
    #[serde(default = "default_max_position_size")]
    pub max_position_size: Decimal,

    /// 최소 포지션 금액 (USDT, 기본값: 10)
    #[serde(default = "default_min_position_size")]
    pub min_position_size: Decimal,
}

fn default_mode() -> SizingMode {
    SizingMode::Fixed
}
fn default_fixed_spot_amount() -> Decimal {
    dec!(1000)
}
fn default_fixed_futures_amount() -> Decimal {
    dec!(500)
}
fn default_spot_percentage() -> Decimal {
    dec!(10)
}
fn default_futures_percentage() -> Decimal {
    dec!(5)
}
fn default_leverage() -> u32 {
    1
}
fn default_max_position_size() -> Decimal {
    dec!(10000)
}
fn default_min_position_size() -> Decimal {
    dec!(10)
}

impl Default for PositionSizingConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            fixed_spot_amount: default_fixed_spot_amount(),
            fixed_futures_amount: default_fixed_futures_amount(),
            spot_percentage: default_spot_percentage(),
            futures_percentage: default_futures_percentage(),
            default_leverage: default_leverage(),
            max_position_size: default_max_position_size(),
            min_position_size: default_min_position_size(),
        }
    }
}

impl PositionSizingConfig {
    /// 비율 모드 설정을 생성합니다.
    pub fn percentage(spot_pct: Decimal, futures_pct: Decimal) -> Self {
        Self {
            mode: SizingMode::Percentage,
            spot_percentage: spot_pct,
            futures_percentage: futures_pct,
            ..Default::default()
        }
    }

    fn collect_errors(&self, errors: &mut Vec<String>) {
        if self.fixed_spot_amount <= Decimal::ZERO {
            errors.push("position_sizing.fixed_spot_amount must be greater than 0".into());
        }
        if self.fixed_futures_amount <= Decimal::ZERO {
            errors.push("position_sizing.fixed_futures_amount must be greater than 0".into());
        }
        if self.spot_percentage <= Decimal::ZERO || self.spot_percentage > dec!(100) {
            errors.push("position_sizing.spot_percentage must be in (0, 100]".into());
        }
        if self.futures_percentage <= Decimal::ZERO || self.futures_percentage > dec!(100) {
            errors.push("position_sizing.futures_percentage must be in (0, 100]".into());
        }
        if !(1..=125).contains(&self.default_leverage) {
            errors.push("position_sizing.default_leverage must be in [1, 125]".into());
        }
        if self.min_position_size <= Decimal::ZERO {
            errors.push("position_sizing.min_position_size must be greater than 0".into());
        }
        if self.max_position_size <= self.min_position_size {
            errors.push(
                "position_sizing.max_position_size must be greater than min_position_size".into(),
            );
        }
    }
}

/// 자금 관리 기본 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseConfiguration {
    /// 시작 자본 대비 일일 손실 한도 (기본값: 5%)
    #[serde(default = "default_daily_loss_limit_pct")]
    pub daily_loss_limit_pct: Decimal,

    /// 시작 자본 대비 월간 손실 한도 (기본값: 15%)
    #[serde(default = "default_monthly_loss_limit_pct")]
    pub monthly_loss_limit_pct: Decimal,

    /// 포지션 사이징 설정
    #[serde(default)]
    pub position_sizing: PositionSizingConfig,

    /// 손실률 계산 기준 자본 (USDT)
    #[serde(default = "default_capital")]
    pub starting_capital: Decimal,

    /// 비율 사이징에 쓰이는 현재 자본 (USDT)
    #[serde(default = "default_capital")]
    pub current_capital: Decimal,

    /// 하루 최대 신규 포지션 수 (기본값: 20)
    #[serde(default = "default_max_daily_positions")]
    pub max_daily_positions: u32,

    /// 최대 동시 포지션 수 (기본값: 3)
    #[serde(default = "default_max_concurrent_trades")]
    pub max_concurrent_trades: u32,

    /// 메트릭 스냅샷 저장 주기 (초, 기본값: 300)
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,

    /// 한도 돌파 시 긴급 정지 실행 여부 (기본값: true)
    #[serde(default = "default_true")]
    pub emergency_stop_enabled: bool,

    /// 단일 포지션 강제 손절 비율 (기본값: 10%)
    #[serde(default = "default_force_stop_loss_pct")]
    pub force_stop_loss_pct: Decimal,
}

fn default_daily_loss_limit_pct() -> Decimal {
    dec!(5)
}
fn default_monthly_loss_limit_pct() -> Decimal {
    dec!(15)
}
fn default_capital() -> Decimal {
    dec!(10000)
}
fn default_max_daily_positions() -> u32 {
    20
}
fn default_max_concurrent_trades() -> u32 {
    3
}
fn default_metrics_interval_secs() -> u64 {
    300
}
fn default_true() -> bool {
    true
}
fn default_force_stop_loss_pct() -> Decimal {
    dec!(10)
}

impl Default for BaseConfiguration {
    fn default() -> Self {
        Self {
            daily_loss_limit_pct: default_daily_loss_limit_pct(),
            monthly_loss_limit_pct: default_monthly_loss_limit_pct(),
            position_sizing: PositionSizingConfig::default(),
            starting_capital: default_capital(),
            current_capital: default_capital(),
            max_daily_positions: default_max_daily_positions(),
            max_concurrent_trades: default_max_concurrent_trades(),
            metrics_interval_secs: default_metrics_interval_secs(),
            emergency_stop_enabled: default_true(),
            force_stop_loss_pct: default_force_stop_loss_pct(),
        }
    }
}

impl BaseConfiguration {
    /// 보수적인 설정 프리셋.
    pub fn conservative() -> Self {
        Self {
            daily_loss_limit_pct: dec!(2),
            monthly_loss_limit_pct: dec!(6),
            position_sizing: PositionSizingConfig {
                fixed_spot_amount: dec!(500),
                fixed_futures_amount: dec!(200),
                spot_percentage: dec!(5),
                futures_percentage: dec!(2),
                max_position_size: dec!(2000),
                ..Default::default()
            },
            max_daily_positions: 10,
            max_concurrent_trades: 1,
            force_stop_loss_pct: dec!(5),
            ..Default::default()
        }
    }

    /// 주어진 자본으로 시작/현재 자본을 설정합니다.
    pub fn with_capital(mut self, capital: Decimal) -> Self {
        self.starting_capital = capital;
        self.current_capital = capital;
        self
    }

    /// 설정 값을 검증합니다.
    ///
    /// 모든 필드를 확인한 뒤 발견된 문제를 한 번에 반환합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let mut errors = Vec::new();

        if self.daily_loss_limit_pct <= Decimal::ZERO || self.daily_loss_limit_pct > dec!(50) {
            errors.push("daily_loss_limit_pct must be in (0, 50]".to_string());
        }
        if self.monthly_loss_limit_pct <= Decimal::ZERO || self.monthly_loss_limit_pct > dec!(90)
        {
            errors.push("monthly_loss_limit_pct must be in (0, 90]".to_string());
        }
        if self.starting_capital <= Decimal::ZERO {
            errors.push("starting_capital must be greater than 0".to_string());
        }
        if self.current_capital <= Decimal::ZERO {
            errors.push("current_capital must be greater than 0".to_string());
        }
        if self.max_daily_positions == 0 {
            errors.push("max_daily_positions must be greater than 0".to_string());
        }
        if self.max_concurrent_trades == 0 {
            errors.push("max_concurrent_trades must be greater than 0".to_string());
        }
        if self.metrics_interval_secs == 0 {
            errors.push("metrics_interval_secs must be greater than 0".to_string());
        }
        if self.force_stop_loss_pct <= Decimal::ZERO || self.force_stop_loss_pct > dec!(100) {
            errors.push("force_stop_loss_pct must be in (0, 100]".to_string());
        }
        self.position_sizing.collect_errors(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigValidationError::Invalid(errors))
        }
    }
}

/// 설정 검증 오류.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl ConfigValidationError {
    /// 개별 오류 메시지 목록.
    pub fn errors(&self) -> &[String] {
        match self {
            ConfigValidationError::Invalid(errors) => errors,
        }
    }
}
