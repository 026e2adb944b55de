//! 설정 관리.
//!
//! 애플리케이션 공통 설정(로깅, 저장 경로)과 섹션 단위 설정 로딩을 제공합니다.
//! 엔진/리스크 설정 구조체는 각 크레이트에 정의되어 있으며,
//! [`load_section`]으로 같은 파일에서 읽어옵니다.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 환경 변수 오버라이드 접두사 (예: `TRADER__RISK__DAILY_LOSS_LIMIT_PCT`).
pub const ENV_PREFIX: &str = "TRADER";

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 저장소 설정
    #[serde(default)]
    pub storage: StorageConfig,
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// 상태 파일 저장 위치 설정.
///
/// 디렉토리 구조:
/// ```text
/// <data_dir>/circuit_breaker_state.json
/// <data_dir>/global_metrics.json
/// <data_dir>/audit/money_management_audit_YYYY-MM-DD.jsonl
/// <data_dir>/daily_reports/daily_report_YYYY-MM-DD.json
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// 데이터 루트 디렉토리
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    /// 주어진 디렉토리를 루트로 사용합니다.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// 서킷 브레이커 상태 파일 경로.
    pub fn circuit_breaker_state_path(&self) -> PathBuf {
        self.data_dir.join("circuit_breaker_state.json")
    }

    /// 전역 메트릭 파일 경로.
    pub fn metrics_path(&self) -> PathBuf {
        self.data_dir.join("global_metrics.json")
    }

    /// 감사 로그 디렉토리.
    pub fn audit_dir(&self) -> PathBuf {
        self.data_dir.join("audit")
    }

    /// 일일 리포트 디렉토리.
    pub fn daily_reports_dir(&self) -> PathBuf {
        self.data_dir.join("daily_reports")
    }
}

fn builder_for(path: &Path) -> Result<config::Config, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
}

impl AppConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        builder_for(path.as_ref())?.try_deserialize()
    }

    /// 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> Result<Self, config::ConfigError> {
        Self::load("config/default.toml")
    }
}

/// 설정 파일의 특정 섹션(`[engine]`, `[risk]` 등)을 역직렬화합니다.
///
/// 환경 변수 오버라이드가 동일하게 적용됩니다.
pub fn load_section<T, P>(path: P, section: &str) -> Result<T, config::ConfigError>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    builder_for(path.as_ref())?.get::<T>(section)
}
