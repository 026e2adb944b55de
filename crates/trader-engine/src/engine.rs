//! 시간 기반 실행 엔진.
//!
//! 체결 이벤트 순서대로 엔진 시계를 전진시키고, 매 체결마다 포지션 스톱을 관리하며,
//! 5분 마커 타임스탬프에서만 지표 계산과 전략 평가를 수행합니다.
//!
//! # 처리 흐름
//!
//! ```text
//! process_trade
//!   ├─ 시각 검증 (look-ahead 방지)
//!   ├─ 체결 윈도우 / 5분봉 갱신
//!   ├─ 트레일링 스톱 → 존 조정 → 스톱 도달 시 청산
//!   ├─ 자금 관리 P&L 갱신, 강제 손절 확인
//!   └─ 마커이면: 지표 계산 → 신호 평가 → 존 이벤트 처리
//! ```
//!
//! 구성 요소별 락은 한 번에 하나만 잡고, 자금 관리 호출 전에는 항상 해제합니다.

use crate::config::{EngineConfig, EngineMode};
use crate::error::{EngineError, EngineResult};
use crate::position_manager::{ClosedPosition, Position, PositionManager};
use crate::zone_monitor::{ActiveZone, StopAdjustment, ZoneMonitor, ZoneType};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use trader_core::time::{is_marker_timestamp, marker_bucket};
use trader_core::{engine_span, Direction, Kline, Price, Timeframe, Trade, TraderError};
use trader_risk::{BackgroundTask, EmergencyStop, MoneyManager, RiskError, SizingRequest};

/// 엔진 초기화 데이터.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitialData {
    /// 백테스트 재생용 체결 (시간순)
    #[serde(default)]
    pub trades: Vec<Trade>,
    /// 타임프레임별 과거 캔들
    #[serde(default)]
    pub klines: BTreeMap<Timeframe, Vec<Kline>>,
    /// 윈도우 워밍업용 최근 체결
    #[serde(default)]
    pub recent_trades: Vec<Trade>,
}

impl InitialData {
    pub fn backtest(trades: Vec<Trade>) -> Self {
        Self {
            trades,
            ..Self::default()
        }
    }

    pub fn live() -> Self {
        Self::default()
    }

    pub fn with_klines(mut self, timeframe: Timeframe, klines: Vec<Kline>) -> Self {
        self.klines.insert(timeframe, klines);
        self
    }

    pub fn with_recent_trades(mut self, trades: Vec<Trade>) -> Self {
        self.recent_trades = trades;
        self
    }
}

/// 엔진 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Stopped,
    Running,
}

/// 엔진 메트릭.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub trades_processed: u64,
    /// 엔진 시각보다 늦게 도착한 체결 (live/paper)
    pub late_trades: u64,
    pub look_ahead_violations: u64,
    pub markers_processed: u64,
    pub evaluations: u64,
    pub evaluation_errors: u64,
    pub evaluation_timeouts: u64,
    pub insufficient_data: u64,
    pub positions_opened: u64,
    pub positions_closed: u64,
    /// 리스크 규칙으로 거부된 진입 신호
    pub entries_rejected: u64,
    pub stop_adjustments: u64,
    pub zone_adjustments: u64,
    /// 누적 실현 수익률 (%)
    pub realized_profit_pct: Decimal,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub last_trade_timestamp: Option<i64>,
}

impl EngineMetrics {
    /// 승률 (%).
    pub fn win_rate(&self) -> Decimal {
        let total = self.winning_trades + self.losing_trades;
        if total == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.winning_trades) / Decimal::from(total) * dec!(100)
    }
}

/// 마커 시점의 시장 데이터.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub timestamp: i64,
    pub price: Price,
    /// 체결 윈도우 (오래된 순)
    pub trades: Vec<Trade>,
    /// 마감된 캔들 (오래된 순)
    pub klines: BTreeMap<Timeframe, Vec<Kline>>,
}

impl MarketSnapshot {
    pub fn klines(&self, timeframe: Timeframe) -> &[Kline] {
        self.klines.get(&timeframe).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn last_kline(&self, timeframe: Timeframe) -> Option<&Kline> {
        self.klines(timeframe).last()
    }
}

/// 지표 이름 → 값.
pub type Indicators = BTreeMap<String, Decimal>;

/// 전략 신호.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    Enter {
        direction: Direction,
        zone_tag: Option<String>,
    },
    Exit {
        reason: String,
    },
    #[default]
    Hold,
}

/// 마커 평가 결과.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub signal: Signal,
    /// 활성화를 요청하는 존
    #[serde(default)]
    pub zone_events: Vec<ZoneType>,
}

impl Evaluation {
    pub fn hold() -> Self {
        Self::default()
    }

    pub fn enter(direction: Direction, zone_tag: Option<&str>) -> Self {
        Self {
            signal: Signal::Enter {
                direction,
                zone_tag: zone_tag.map(str::to_string),
            },
            zone_events: Vec::new(),
        }
    }

    pub fn exit(reason: impl Into<String>) -> Self {
        Self {
            signal: Signal::Exit {
                reason: reason.into(),
            },
            zone_events: Vec::new(),
        }
    }

    pub fn with_zone_event(mut self, zone: ZoneType) -> Self {
        self.zone_events.push(zone);
        self
    }
}

/// 전략 평가기에 전달되는 컨텍스트.
pub struct EvaluationContext<'a> {
    pub snapshot: &'a MarketSnapshot,
    pub indicators: &'a Indicators,
    pub position: &'a Position,
    /// 평가 중 엔진에 콜백하기 위한 핸들
    pub control: &'a dyn EngineControl,
}

/// 외부 지표/전략 로직.
#[async_trait]
pub trait StrategyEvaluator: Send + Sync {
    /// 마커 시점 지표를 계산합니다.
    async fn calculate_indicators(&self, snapshot: &MarketSnapshot) -> anyhow::Result<Indicators>;

    /// 지표와 포지션 상태로 신호를 평가합니다.
    async fn evaluate_signal(&self, ctx: EvaluationContext<'_>) -> anyhow::Result<Evaluation>;
}

/// 전략 코드가 엔진에 콜백하는 인터페이스.
#[async_trait]
pub trait EngineControl: Send + Sync {
    /// 현재 포지션을 마지막 가격으로 청산합니다.
    async fn close_position(&self, reason: &str) -> EngineResult<ClosedPosition>;

    /// 트레일링 비율로 스톱을 조정합니다 (보호 방향으로만).
    async fn adjust_stop(&self, trailing_pct: Decimal) -> EngineResult<Option<Price>>;

    async fn get_position(&self) -> Position;

    async fn get_active_zones(&self) -> Vec<ActiveZone>;

    async fn get_metrics(&self) -> EngineMetrics;

    async fn get_current_timestamp(&self) -> i64;
}

/// `process_trade` 한 번의 처리 결과.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeOutcome {
    /// 시계/윈도우에 반영되었는지 (지연 체결이면 false)
    pub accepted: bool,
    /// 마커 워크플로가 실행되었는지
    pub marker: bool,
    pub stop_tightened: bool,
    pub zone_adjustment: Option<StopAdjustment>,
    pub opened: bool,
    pub closed: Option<ClosedPosition>,
    /// 이번 체결로 손실 한도가 새로 돌파되었는지
    pub risk_halted: bool,
    pub evaluation_error: Option<String>,
}

/// 백테스트 재생 요약.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub total_trades: usize,
    pub processed: usize,
    pub cancelled: bool,
    pub metrics: EngineMetrics,
}

#[derive(Debug, Default)]
struct MarketState {
    clock: i64,
    trades: VecDeque<Trade>,
    klines: BTreeMap<Timeframe, VecDeque<Kline>>,
    forming: Option<Kline>,
    last_marker: Option<i64>,
}

impl MarketState {
    fn push_trade(&mut self, trade: &Trade, window: usize) {
        while self.trades.len() >= window {
            self.trades.pop_front();
        }
        self.trades.push_back(trade.clone());
    }

    fn push_kline(&mut self, timeframe: Timeframe, kline: Kline, window: usize) {
        let buffer = self.klines.entry(timeframe).or_default();
        while buffer.len() >= window {
            buffer.pop_front();
        }
        buffer.push_back(kline);
    }

    /// 체결을 형성 중인 5분봉에 반영하고, 구간이 바뀌면 이전 캔들을 마감합니다.
    fn fold_candle(&mut self, trade: &Trade, window: usize) -> Option<Kline> {
        let bucket = Timeframe::M5.bucket_start(trade.timestamp);
        if let Some(candle) = self.forming.as_mut() {
            if candle.timestamp == bucket {
                candle.apply_trade(trade);
                return None;
            }
        }
        let closed = self.forming.replace(Kline::from_trade(Timeframe::M5, trade));
        if let Some(candle) = &closed {
            self.push_kline(Timeframe::M5, candle.clone(), window);
        }
        closed
    }

    fn kline_count(&self, timeframe: Timeframe) -> usize {
        self.klines.get(&timeframe).map_or(0, VecDeque::len)
    }

    fn snapshot(&self, timestamp: i64, price: Price) -> MarketSnapshot {
        MarketSnapshot {
            timestamp,
            price,
            trades: self.trades.iter().cloned().collect(),
            klines: self
                .klines
                .iter()
                .map(|(tf, buffer)| (*tf, buffer.iter().cloned().collect()))
                .collect(),
        }
    }
}

struct Admission {
    accepted: bool,
    marker: bool,
    /// 처리 기준 시각 (지연 체결이면 엔진 시각)
    effective_ts: i64,
}

/// 시간 기반 실행 엔진.
pub struct TemporalEngine {
    config: EngineConfig,
    state: RwLock<EngineState>,
    initialized: AtomicBool,
    market: Mutex<MarketState>,
    backtest_trades: Mutex<Vec<Trade>>,
    positions: Mutex<PositionManager>,
    zones: Arc<Mutex<ZoneMonitor>>,
    metrics: Mutex<EngineMetrics>,
    evaluator: Arc<dyn StrategyEvaluator>,
    money_manager: Option<Arc<MoneyManager>>,
    cleanup_task: Mutex<Option<BackgroundTask>>,
}

impl TemporalEngine {
    /// 설정을 검증하고 엔진을 생성합니다.
    pub fn new(config: EngineConfig, evaluator: Arc<dyn StrategyEvaluator>) -> EngineResult<Self> {
        config.validate()?;

        Ok(Self {
            state: RwLock::new(EngineState::Stopped),
            initialized: AtomicBool::new(false),
            market: Mutex::new(MarketState::default()),
            backtest_trades: Mutex::new(Vec::new()),
            positions: Mutex::new(PositionManager::new(&config)),
            zones: Arc::new(Mutex::new(ZoneMonitor::new(&config))),
            metrics: Mutex::new(EngineMetrics::default()),
            evaluator,
            money_manager: None,
            cleanup_task: Mutex::new(None),
            config,
        })
    }

    /// 자금 관리자를 연결합니다.
    pub fn with_money_manager(mut self, money_manager: Arc<MoneyManager>) -> Self {
        self.money_manager = Some(money_manager);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn mode(&self) -> EngineMode {
        self.config.mode
    }

    pub fn money_manager(&self) -> Option<&Arc<MoneyManager>> {
        self.money_manager.as_ref()
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    pub async fn is_running(&self) -> bool {
        self.state().await == EngineState::Running
    }

    /// 과거 데이터로 버퍼를 채우고 백테스트 체결을 적재합니다.
    pub async fn initialize(&self, data: InitialData) -> EngineResult<()> {
        if self.is_running().await {
            return Err(EngineError::InvalidState(
                "cannot initialize a running engine".to_string(),
            ));
        }
        if self.config.mode == EngineMode::Backtest && data.trades.is_empty() {
            return Err(EngineError::InsufficientData(
                "backtest requires at least one trade".to_string(),
            ));
        }
        if let Some(i) = data
            .trades
            .windows(2)
            .position(|w| w[1].timestamp < w[0].timestamp)
        {
            return Err(TraderError::Data(format!(
                "backtest trades out of order at index {}",
                i + 1
            ))
            .into());
        }
        for klines in data.klines.values() {
            for kline in klines {
                kline.validate()?;
            }
        }

        let kline_window = self.config.kline_window_size;
        let (seeded_trades, clock) = {
            let mut market = self.market.lock().await;
            *market = MarketState::default();
            for (timeframe, klines) in data.klines {
                let skip = klines.len().saturating_sub(kline_window);
                for kline in klines.into_iter().skip(skip) {
                    market.push_kline(timeframe, kline, kline_window);
                }
            }
            for trade in &data.recent_trades {
                market.push_trade(trade, self.config.window_size);
                market.clock = market.clock.max(trade.timestamp);
            }
            (market.trades.len(), market.clock)
        };

        let replay = if self.config.mode == EngineMode::Backtest {
            data.trades
        } else {
            if !data.trades.is_empty() {
                warn!(count = data.trades.len(), "실시간 모드에서는 재생 체결을 무시합니다");
            }
            Vec::new()
        };
        let replay_len = replay.len();
        *self.backtest_trades.lock().await = replay;
        self.initialized.store(true, Ordering::SeqCst);

        info!(
            mode = %self.config.mode,
            replay_trades = replay_len,
            warmup_trades = seeded_trades,
            clock,
            "엔진 초기화 완료"
        );
        Ok(())
    }

    /// 엔진을 시작합니다.
    pub async fn start(&self) -> EngineResult<()> {
        if self.config.mode == EngineMode::Backtest && !self.initialized.load(Ordering::SeqCst) {
            return Err(EngineError::InvalidState(
                "backtest engine must be initialized before start".to_string(),
            ));
        }
        {
            let mut state = self.state.write().await;
            if *state == EngineState::Running {
                debug!("엔진이 이미 실행 중");
                return Ok(());
            }
            *state = EngineState::Running;
        }

        if self.config.mode.is_streaming() {
            let zones = Arc::clone(&self.zones);
            let retention_ms = self.config.zone_log_retention_hours * 3_600_000;
            let task = BackgroundTask::spawn_periodic(
                "zone_log_cleanup",
                Duration::from_secs(self.config.zone_cleanup_interval_secs),
                move || {
                    let zones = Arc::clone(&zones);
                    async move {
                        let now = Utc::now().timestamp_millis();
                        let pruned = zones.lock().await.prune_log(now, retention_ms);
                        if pruned > 0 {
                            debug!(pruned, "존 활성화 로그 정리");
                        }
                    }
                },
            );
            *self.cleanup_task.lock().await = Some(task);
        }

        info!(mode = %self.config.mode, symbol = %self.config.symbol, "엔진 시작");
        Ok(())
    }

    /// 엔진을 정지하고 열린 포지션을 "engine_shutdown"으로 청산합니다.
    pub async fn stop(&self) -> EngineResult<Option<ClosedPosition>> {
        {
            let mut state = self.state.write().await;
            if *state == EngineState::Stopped {
                return Ok(None);
            }
            *state = EngineState::Stopped;
        }

        let task = self.cleanup_task.lock().await.take();
        if let Some(task) = task {
            task.shutdown().await;
        }

        let closed = match self.close_current_position("engine_shutdown").await {
            Ok(closed) => Some(closed),
            Err(EngineError::NoOpenPosition) => None,
            Err(e) => return Err(e),
        };

        let metrics = self.metrics().await;
        info!(
            trades = metrics.trades_processed,
            positions_closed = metrics.positions_closed,
            realized_profit_pct = %metrics.realized_profit_pct.round_dp(4),
            "엔진 정지"
        );
        Ok(closed)
    }

    /// 체결 하나를 처리합니다.
    pub async fn process_trade(&self, trade: Trade) -> EngineResult<TradeOutcome> {
        if !self.is_running().await {
            return Err(EngineError::NotRunning);
        }
        if trade.price <= Decimal::ZERO {
            return Err(EngineError::InvalidPrice(trade.price));
        }

        let admission = self.admit_trade(&trade).await?;
        let mut outcome = TradeOutcome {
            accepted: admission.accepted,
            marker: admission.marker,
            ..TradeOutcome::default()
        };

        self.on_price_tick(trade.price, admission.effective_ts, &mut outcome)
            .await?;

        if admission.marker {
            match self.run_marker(&trade).await {
                Ok(opened) => outcome.opened = opened,
                Err(e) if e.is_recoverable() => {
                    {
                        let mut metrics = self.metrics.lock().await;
                        match &e {
                            EngineError::CalculationTimeout { .. } => {
                                metrics.evaluation_timeouts += 1
                            }
                            EngineError::InsufficientData(_) => metrics.insufficient_data += 1,
                            _ => metrics.evaluation_errors += 1,
                        }
                    }
                    warn!(timestamp = trade.timestamp, error = %e, "마커 평가 건너뜀");
                    outcome.evaluation_error = Some(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        Ok(outcome)
    }

    /// 시각 검증 후 체결을 윈도우와 캔들에 반영합니다.
    async fn admit_trade(&self, trade: &Trade) -> EngineResult<Admission> {
        let window = self.config.window_size;
        let kline_window = self.config.kline_window_size;

        let mut market = self.market.lock().await;
        let clock = market.clock;
        let late = trade.timestamp < clock;

        if late && self.config.anti_look_ahead {
            drop(market);
            {
                let mut metrics = self.metrics.lock().await;
                metrics.look_ahead_violations += 1;
                if self.config.mode.is_streaming() {
                    metrics.late_trades += 1;
                }
            }
            warn!(
                mode = %self.config.mode,
                timestamp = trade.timestamp,
                clock,
                "엔진 시각보다 과거 체결"
            );
            if self.config.mode == EngineMode::Backtest {
                return Err(EngineError::LookAhead {
                    timestamp: trade.timestamp,
                    clock,
                });
            }
            return Ok(Admission {
                accepted: false,
                marker: false,
                effective_ts: clock,
            });
        }

        market.push_trade(trade, window);
        let mut marker = false;
        if !late {
            market.clock = trade.timestamp;
            if let Some(candle) = market.fold_candle(trade, kline_window) {
                debug!(candle_start = candle.timestamp, close = %candle.close, "5분봉 마감");
            }
            let bucket = marker_bucket(trade.timestamp);
            if is_marker_timestamp(trade.timestamp) && market.last_marker != Some(bucket) {
                market.last_marker = Some(bucket);
                marker = true;
            }
        }
        let effective_ts = market.clock;
        drop(market);

        let mut metrics = self.metrics.lock().await;
        metrics.trades_processed += 1;
        metrics.last_trade_timestamp = Some(effective_ts);

        Ok(Admission {
            accepted: true,
            marker,
            effective_ts,
        })
    }

    /// 열린 포지션의 스톱 관리와 자금 관리 갱신.
    async fn on_price_tick(
        &self,
        price: Price,
        timestamp: i64,
        outcome: &mut TradeOutcome,
    ) -> EngineResult<()> {
        let (profit, unrealized, trailed) = {
            let mut pm = self.positions.lock().await;
            if !pm.is_open() {
                return Ok(());
            }
            let trailed = pm.update_trailing_stop(price).is_some();
            let position = pm.position();
            (
                position.profit_pct(price),
                position.unrealized_pnl(price),
                trailed,
            )
        };

        let adjustment = self.zones.lock().await.check_active_zones(profit, timestamp);

        let (adjusted, stop_hit) = {
            let mut pm = self.positions.lock().await;
            let adjusted = match &adjustment {
                Some(adj) => matches!(pm.apply_stop_adjustment(adj.trailing_pct), Ok(Some(_))),
                None => false,
            };
            (adjusted, pm.position().is_stop_hit(price))
        };

        outcome.stop_tightened = trailed || adjusted;
        if outcome.stop_tightened || adjustment.is_some() {
            let mut metrics = self.metrics.lock().await;
            metrics.stop_adjustments += u64::from(trailed) + u64::from(adjusted);
            metrics.zone_adjustments += u64::from(adjustment.is_some());
        }
        outcome.zone_adjustment = adjustment;

        if stop_hit {
            outcome.closed = self.close_if_open(price, timestamp, "stop_hit").await?;
            return Ok(());
        }

        if let Some(mm) = &self.money_manager {
            if let Err(e) = mm.update_pnl(unrealized).await {
                if !e.is_risk_halt() {
                    return Err(e.into());
                }
                if e.is_new_breach() {
                    warn!(error = %e, "미실현 손익 갱신 중 손실 한도 돌파");
                } else {
                    debug!(error = %e, "손실 한도 차단 유지 중");
                }
                outcome.risk_halted = true;

                // 긴급 정지 콜백이 이미 포지션을 닫았을 수 있다
                let pm = self.positions.lock().await;
                if !pm.is_open() {
                    outcome.closed = pm.last_closed().cloned();
                    return Ok(());
                }
            }
            if mm.check_force_stop(&self.config.symbol, profit).await {
                if let Some(closed) = self.close_if_open(price, timestamp, "force_stop_loss").await?
                {
                    outcome.closed = Some(closed);
                }
            }
        }
        Ok(())
    }

    /// 마커 워크플로: 지표 계산 → 신호 평가 → 존 이벤트 처리.
    async fn run_marker(&self, trade: &Trade) -> EngineResult<bool> {
        self.metrics.lock().await.markers_processed += 1;

        let snapshot = {
            let market = self.market.lock().await;
            let available = market.kline_count(Timeframe::M5);
            if available < self.config.min_klines_for_evaluation {
                return Err(EngineError::InsufficientData(format!(
                    "{} closed 5m klines, need {}",
                    available, self.config.min_klines_for_evaluation
                )));
            }
            market.snapshot(trade.timestamp, trade.price)
        };

        let timeout_ms = self.config.calculation_timeout_ms;
        let indicators = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.evaluator.calculate_indicators(&snapshot),
        )
        .await
        {
            Ok(Ok(indicators)) => indicators,
            Ok(Err(e)) => return Err(EngineError::Strategy(format!("{e:#}"))),
            Err(_) => return Err(EngineError::CalculationTimeout { timeout_ms }),
        };

        let position = self.positions.lock().await.position().clone();
        let evaluation = self
            .evaluator
            .evaluate_signal(EvaluationContext {
                snapshot: &snapshot,
                indicators: &indicators,
                position: &position,
                control: self,
            })
            .await
            .map_err(|e| EngineError::Strategy(format!("{e:#}")))?;
        self.metrics.lock().await.evaluations += 1;

        debug!(
            timestamp = trade.timestamp,
            signal = ?evaluation.signal,
            zone_events = evaluation.zone_events.len(),
            "마커 평가"
        );

        let opened = match evaluation.signal {
            Signal::Enter {
                direction,
                zone_tag,
            } => {
                self.try_open(direction, trade.price, trade.timestamp, zone_tag.as_deref())
                    .await?
            }
            Signal::Exit { reason } => {
                self.close_if_open(trade.price, trade.timestamp, &reason)
                    .await?;
                false
            }
            Signal::Hold => false,
        };

        if !evaluation.zone_events.is_empty() {
            self.apply_zone_events(&evaluation.zone_events, trade.price, trade.timestamp)
                .await;
        }
        Ok(opened)
    }

    async fn apply_zone_events(&self, zones: &[ZoneType], price: Price, timestamp: i64) {
        let profit = {
            let pm = self.positions.lock().await;
            if !pm.is_open() {
                debug!("포지션이 없어 존 이벤트 무시");
                return;
            }
            pm.position().profit_pct(price)
        };

        let mut monitor = self.zones.lock().await;
        for zone in zones {
            if let Err(e) = monitor.process_zone_event(*zone, profit, timestamp) {
                warn!(zone = %zone, error = %e, "존 이벤트 처리 실패");
            }
        }
    }

    /// 자금 관리 검증을 거쳐 포지션을 엽니다.
    async fn try_open(
        &self,
        direction: Direction,
        price: Price,
        timestamp: i64,
        zone_tag: Option<&str>,
    ) -> EngineResult<bool> {
        if self.positions.lock().await.is_open() {
            debug!("이미 포지션 보유 중, 진입 신호 무시");
            return Ok(false);
        }

        let quantity = match &self.money_manager {
            Some(mm) => {
                let request = SizingRequest {
                    symbol: self.config.symbol.clone(),
                    price,
                    market: self.config.market,
                    leverage: self.config.leverage,
                    available_balance: mm.configuration().await.current_capital,
                    strategy: self.config.strategy_name.clone(),
                };
                match mm.validate_new_position(&request).await {
                    Ok(sizing) if sizing.approved => sizing.quantity,
                    Ok(sizing) => {
                        self.metrics.lock().await.entries_rejected += 1;
                        info!(reason = sizing.reason_or_empty(), "사이징 거부로 진입 보류");
                        return Ok(false);
                    }
                    Err(e) if e.is_risk_halt() || matches!(e, RiskError::Disabled(_)) => {
                        self.metrics.lock().await.entries_rejected += 1;
                        warn!(error = %e, "거래 중단 상태로 진입 거부");
                        return Ok(false);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => Decimal::ZERO,
        };

        {
            let mut pm = self.positions.lock().await;
            match pm.open_sized_position(direction, price, timestamp, zone_tag, quantity) {
                Ok(_) => {}
                Err(EngineError::PositionAlreadyOpen) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        self.metrics.lock().await.positions_opened += 1;

        if let Some(mm) = &self.money_manager {
            mm.on_position_opened(
                &self.config.strategy_name,
                &self.config.symbol,
                direction,
                quantity,
                price,
            )
            .await;
        }
        Ok(true)
    }

    /// 포지션을 청산하고 존 초기화, 메트릭, 자금 관리 통지를 수행합니다.
    async fn close_with_reason(
        &self,
        price: Price,
        timestamp: i64,
        reason: &str,
    ) -> EngineResult<ClosedPosition> {
        let closed = self
            .positions
            .lock()
            .await
            .close_position(timestamp, price, reason)?;

        let reset = self
            .zones
            .lock()
            .await
            .reset_all_zones(timestamp, "position_closed");
        if reset > 0 {
            debug!(zones = reset, "청산에 따른 존 초기화");
        }

        {
            let mut metrics = self.metrics.lock().await;
            metrics.positions_closed += 1;
            metrics.realized_profit_pct += closed.profit_pct;
            if closed.is_win() {
                metrics.winning_trades += 1;
            } else {
                metrics.losing_trades += 1;
            }
        }

        if let Some(mm) = &self.money_manager {
            // 단일 포지션이므로 청산 후 미실현 손익은 0
            mm.metrics().update_real_time_pnl(Decimal::ZERO).await;
            let record = closed.to_trade_record(&self.config.strategy_name, &self.config.symbol);
            if let Err(e) = mm.on_position_closed(record).await {
                if e.is_new_breach() {
                    warn!(error = %e, "청산 손익으로 손실 한도 돌파");
                } else if e.is_risk_halt() {
                    debug!(error = %e, "손실 한도 차단 유지 중");
                } else {
                    error!(error = %e, "자금 관리 청산 통지 실패");
                }
            }
        }
        Ok(closed)
    }

    async fn close_if_open(
        &self,
        price: Price,
        timestamp: i64,
        reason: &str,
    ) -> EngineResult<Option<ClosedPosition>> {
        match self.close_with_reason(price, timestamp, reason).await {
            Ok(closed) => Ok(Some(closed)),
            Err(EngineError::NoOpenPosition) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 현재 포지션을 마지막 관측 가격과 엔진 시각으로 청산합니다.
    pub async fn close_current_position(&self, reason: &str) -> EngineResult<ClosedPosition> {
        let price = {
            let pm = self.positions.lock().await;
            if !pm.is_open() {
                return Err(EngineError::NoOpenPosition);
            }
            pm.position().last_price
        };
        let timestamp = self.current_timestamp().await;
        self.close_with_reason(price, timestamp, reason).await
    }

    /// 외부 트레일링 비율로 스톱을 조정합니다.
    pub async fn adjust_current_stop(&self, trailing_pct: Decimal) -> EngineResult<Option<Price>> {
        if trailing_pct <= Decimal::ZERO || trailing_pct > dec!(100) {
            return Err(EngineError::InvalidState(format!(
                "trailing pct {trailing_pct} out of (0, 100]"
            )));
        }
        let adjusted = self
            .positions
            .lock()
            .await
            .apply_stop_adjustment(trailing_pct)?;
        if adjusted.is_some() {
            self.metrics.lock().await.stop_adjustments += 1;
        }
        Ok(adjusted)
    }

    pub async fn position(&self) -> Position {
        self.positions.lock().await.position().clone()
    }

    pub async fn active_zones(&self) -> Vec<ActiveZone> {
        self.zones.lock().await.active_zones()
    }

    pub async fn metrics(&self) -> EngineMetrics {
        self.metrics.lock().await.clone()
    }

    pub async fn current_timestamp(&self) -> i64 {
        self.market.lock().await.clock
    }

    /// 5분봉 버퍼 (마감된 캔들).
    pub async fn klines(&self, timeframe: Timeframe) -> Vec<Kline> {
        self.market
            .lock()
            .await
            .klines
            .get(&timeframe)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn window_len(&self) -> usize {
        self.market.lock().await.trades.len()
    }

    /// 적재된 체결을 순서대로 재생합니다.
    ///
    /// 취소되면 남은 체결을 다시 적재하므로 이어서 재생할 수 있습니다.
    pub async fn run_backtest(&self, token: CancellationToken) -> EngineResult<BacktestSummary> {
        if self.config.mode != EngineMode::Backtest {
            return Err(EngineError::InvalidState(format!(
                "run_backtest requires backtest mode, got {}",
                self.config.mode
            )));
        }

        let trades = std::mem::take(&mut *self.backtest_trades.lock().await);
        let total_trades = trades.len();
        let span = engine_span!("run_backtest", self.config.mode);

        async move {
            let mut processed = 0;
            let mut cancelled = false;
            let mut iter = trades.into_iter();

            while let Some(trade) = iter.next() {
                if token.is_cancelled() {
                    let remaining: Vec<Trade> =
                        std::iter::once(trade).chain(iter.by_ref()).collect();
                    info!(remaining = remaining.len(), "백테스트 취소");
                    *self.backtest_trades.lock().await = remaining;
                    cancelled = true;
                    break;
                }
                match self.process_trade(trade).await {
                    Ok(_) => processed += 1,
                    Err(EngineError::NotRunning) => {
                        cancelled = true;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }

            let metrics = self.metrics().await;
            info!(
                total_trades,
                processed,
                cancelled,
                positions_closed = metrics.positions_closed,
                realized_profit_pct = %metrics.realized_profit_pct.round_dp(4),
                "백테스트 재생 종료"
            );
            Ok(BacktestSummary {
                total_trades,
                processed,
                cancelled,
                metrics,
            })
        }
        .instrument(span)
        .await
    }

    /// 실시간 체결 스트림을 소비합니다. 처리한 체결 수를 반환합니다.
    pub async fn run_stream(
        &self,
        mut trades: mpsc::Receiver<Trade>,
        token: CancellationToken,
    ) -> EngineResult<u64> {
        if !self.config.mode.is_streaming() {
            return Err(EngineError::InvalidState(format!(
                "run_stream requires live or paper mode, got {}",
                self.config.mode
            )));
        }

        let span = engine_span!("run_stream", self.config.mode);
        async move {
            let mut processed = 0u64;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        info!(processed, "스트림 처리 취소");
                        break;
                    }
                    next = trades.recv() => {
                        let Some(trade) = next else {
                            info!(processed, "체결 스트림 종료");
                            break;
                        };
                        match self.process_trade(trade).await {
                            Ok(_) => processed += 1,
                            Err(EngineError::NotRunning) => break,
                            Err(e) if e.is_temporal_violation() => {
                                debug!(error = %e, "체결 건너뜀");
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
            }
            Ok(processed)
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl EngineControl for TemporalEngine {
    async fn close_position(&self, reason: &str) -> EngineResult<ClosedPosition> {
        self.close_current_position(reason).await
    }

    async fn adjust_stop(&self, trailing_pct: Decimal) -> EngineResult<Option<Price>> {
        self.adjust_current_stop(trailing_pct).await
    }

    async fn get_position(&self) -> Position {
        self.position().await
    }

    async fn get_active_zones(&self) -> Vec<ActiveZone> {
        self.active_zones().await
    }

    async fn get_metrics(&self) -> EngineMetrics {
        self.metrics().await
    }

    async fn get_current_timestamp(&self) -> i64 {
        self.current_timestamp().await
    }
}

#[async_trait]
impl EmergencyStop for TemporalEngine {
    async fn emergency_stop(&self, reason: &str) -> anyhow::Result<()> {
        error!(reason, "긴급 정지 요청, 열린 포지션 청산");
        match self.close_current_position("emergency_stop").await {
            Ok(closed) => {
                info!(profit_pct = %closed.profit_pct.round_dp(4), "긴급 청산 완료");
                Ok(())
            }
            Err(EngineError::NoOpenPosition) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
