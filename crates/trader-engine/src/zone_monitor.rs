//! 존 모니터.
//!
//! 지표 기반 감시 조건(존)의 활성 상태를 추적하고, 현재 수익률과 존 상태를
//! 조합해 스톱 조정 권고(`StopAdjustment`)를 만듭니다.
//!
//! 여러 존이 동시에 조건을 만족하면 `ZoneType` 선언 순서
//! (CCI 역전 → MACD 역전 → DI 역행)대로 첫 번째 존이 선택됩니다.

use crate::config::{AdjustmentGrid, EngineConfig, MonitoringMode, ZoneConfig};
use crate::error::{EngineError, EngineResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use tracing::{debug, info};

/// continuous 존의 조정 간 최소 간격 (ms).
pub const ZONE_ADJUSTMENT_THROTTLE_MS: i64 = 60_000;

/// 활성화 로그 최대 항목 수.
pub const MAX_ACTIVATION_LOG: usize = 100;

/// 존 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    /// CCI 역전
    CciInverse,
    /// MACD 역전
    MacdInverse,
    /// DI 역행
    DiCounter,
}

impl ZoneType {
    /// 평가 우선순위 순서의 전체 목록.
    pub const ALL: [ZoneType; 3] = [ZoneType::CciInverse, ZoneType::MacdInverse, ZoneType::DiCounter];

    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneType::CciInverse => "cci_inverse",
            ZoneType::MacdInverse => "macd_inverse",
            ZoneType::DiCounter => "di_counter",
        }
    }
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 존 상태.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveZone {
    pub zone_type: ZoneType,
    pub active: bool,
    pub monitoring: MonitoringMode,
    /// 활성화 시각 (ms)
    pub entry_time: Option<i64>,
    /// event 존 발동 시각 (ms)
    pub trigger_time: Option<i64>,
    /// 마지막 조정 시각 (ms)
    pub last_adjustment: Option<i64>,
    /// 이번 활성화 동안 낸 조정 횟수
    pub adjustments: u32,
}

impl ActiveZone {
    fn inactive(zone_type: ZoneType, monitoring: MonitoringMode) -> Self {
        Self {
            zone_type,
            active: false,
            monitoring,
            entry_time: None,
            trigger_time: None,
            last_adjustment: None,
            adjustments: 0,
        }
    }
}

/// 존 상태 전이.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneTransition {
    Activated,
    Deactivated,
}

/// 활성화 로그 항목.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneLogEntry {
    pub zone_type: ZoneType,
    pub transition: ZoneTransition,
    pub timestamp: i64,
    pub reason: String,
}

/// 스톱 조정 권고.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopAdjustment {
    pub zone_type: ZoneType,
    /// 적용할 트레일링 비율 (%)
    pub trailing_pct: Decimal,
    pub profit_pct: Decimal,
    pub timestamp: i64,
    pub reason: String,
}

/// 존 모니터.
#[derive(Debug, Clone)]
pub struct ZoneMonitor {
    settings: ZoneConfig,
    grid: AdjustmentGrid,
    zones: BTreeMap<ZoneType, ActiveZone>,
    log: VecDeque<ZoneLogEntry>,
}

impl ZoneMonitor {
    pub fn new(config: &EngineConfig) -> Self {
        let zones = ZoneType::ALL
            .iter()
            .map(|&zone| {
                let monitoring = config.zones.get(zone).monitoring;
                (zone, ActiveZone::inactive(zone, monitoring))
            })
            .collect();

        Self {
            settings: config.zones.clone(),
            grid: config.adjustment_grid.clone(),
            zones,
            log: VecDeque::with_capacity(MAX_ACTIVATION_LOG),
        }
    }

    pub fn is_active(&self, zone: ZoneType) -> bool {
        self.zones.get(&zone).is_some_and(|z| z.active)
    }

    /// 존을 활성화합니다. 이미 활성 상태면 에러를 반환합니다.
    pub fn activate_zone(&mut self, zone: ZoneType, timestamp: i64) -> EngineResult<()> {
        let settings = self.settings.get(zone);
        if !settings.enabled {
            return Err(EngineError::ZoneDisabled(zone));
        }
        let monitoring = settings.monitoring;

        let state = self
            .zones
            .entry(zone)
            .or_insert_with(|| ActiveZone::inactive(zone, monitoring));
        if state.active {
            return Err(EngineError::ZoneAlreadyActive(zone));
        }
        *state = ActiveZone {
            active: true,
            entry_time: Some(timestamp),
            ..ActiveZone::inactive(zone, monitoring)
        };

        info!(zone = %zone, monitoring = ?monitoring, timestamp, "존 활성화");
        self.push_log(zone, ZoneTransition::Activated, timestamp, "activated");
        Ok(())
    }

    /// 존을 비활성화합니다. 활성 상태가 아니면 에러를 반환합니다.
    pub fn deactivate_zone(
        &mut self,
        zone: ZoneType,
        timestamp: i64,
        reason: &str,
    ) -> EngineResult<()> {
        match self.zones.get_mut(&zone) {
            Some(state) if state.active => {
                state.active = false;
            }
            _ => return Err(EngineError::ZoneNotActive(zone)),
        }

        info!(zone = %zone, reason, timestamp, "존 비활성화");
        self.push_log(zone, ZoneTransition::Deactivated, timestamp, reason);
        Ok(())
    }

    /// 활성 존을 순서대로 확인해 최대 하나의 스톱 조정을 반환합니다.
    pub fn check_active_zones(
        &mut self,
        current_profit: Decimal,
        timestamp: i64,
    ) -> Option<StopAdjustment> {
        let trailing_pct = self.grid.lookup(current_profit)?;

        let mut fired = None;
        for (zone, state) in self.zones.iter_mut() {
            if !state.active {
                continue;
            }
            match state.monitoring {
                MonitoringMode::Continuous => {
                    let throttled = state
                        .last_adjustment
                        .is_some_and(|last| timestamp - last < ZONE_ADJUSTMENT_THROTTLE_MS);
                    if throttled {
                        continue;
                    }
                    state.last_adjustment = Some(timestamp);
                    state.adjustments += 1;
                    fired = Some((*zone, MonitoringMode::Continuous));
                }
                MonitoringMode::Event => {
                    state.trigger_time = Some(timestamp);
                    state.last_adjustment = Some(timestamp);
                    state.adjustments += 1;
                    fired = Some((*zone, MonitoringMode::Event));
                }
            }
            break;
        }

        let (zone, monitoring) = fired?;
        if monitoring == MonitoringMode::Event {
            // 발동 후 자동 비활성화
            let _ = self.deactivate_zone(zone, timestamp, "event_fired");
        }

        debug!(zone = %zone, trailing_pct = %trailing_pct, profit = %current_profit, "존 스톱 조정");
        Some(StopAdjustment {
            zone_type: zone,
            trailing_pct,
            profit_pct: current_profit,
            timestamp,
            reason: format!("{zone} zone adjustment"),
        })
    }

    /// 지표 이벤트로 존 활성화를 시도합니다.
    ///
    /// 비활성화된 존, 이미 활성인 존, 수익 임계값 미달 event 존은 무시하고 `false`를 반환합니다.
    pub fn process_zone_event(
        &mut self,
        zone: ZoneType,
        current_profit: Decimal,
        timestamp: i64,
    ) -> EngineResult<bool> {
        let settings = self.settings.get(zone);
        if !settings.enabled {
            debug!(zone = %zone, "비활성화된 존 이벤트 무시");
            return Ok(false);
        }
        if self.is_active(zone) {
            return Ok(false);
        }
        if settings.monitoring == MonitoringMode::Event && current_profit < settings.profit_threshold
        {
            debug!(
                zone = %zone,
                profit = %current_profit,
                threshold = %settings.profit_threshold,
                "수익 임계값 미달로 존 활성화 보류"
            );
            return Ok(false);
        }

        self.activate_zone(zone, timestamp)?;
        Ok(true)
    }

    /// 모든 활성 존을 비활성화하고 비활성화된 존 수를 반환합니다.
    pub fn reset_all_zones(&mut self, timestamp: i64, reason: &str) -> usize {
        let active: Vec<ZoneType> = self
            .zones
            .values()
            .filter(|z| z.active)
            .map(|z| z.zone_type)
            .collect();
        for zone in &active {
            let _ = self.deactivate_zone(*zone, timestamp, reason);
        }
        active.len()
    }

    /// 활성 존 목록 (평가 순서).
    pub fn active_zones(&self) -> Vec<ActiveZone> {
        self.zones.values().filter(|z| z.active).cloned().collect()
    }

    pub fn activation_log(&self) -> Vec<ZoneLogEntry> {
        self.log.iter().cloned().collect()
    }

    /// 보존 기간이 지난 로그를 제거하고 제거된 항목 수를 반환합니다.
    pub fn prune_log(&mut self, now_ms: i64, retention_ms: i64) -> usize {
        let cutoff = now_ms - retention_ms;
        let before = self.log.len();
        self.log.retain(|entry| entry.timestamp >= cutoff);
        before - self.log.len()
    }

    fn push_log(&mut self, zone: ZoneType, transition: ZoneTransition, timestamp: i64, reason: &str) {
        if self.log.len() >= MAX_ACTIVATION_LOG {
            self.log.pop_front();
        }
        self.log.push_back(ZoneLogEntry {
            zone_type: zone,
            transition,
            timestamp,
            reason: reason.to_string(),
        });
    }
}
