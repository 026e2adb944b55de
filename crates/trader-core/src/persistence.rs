//! 컴포넌트 상태 저장소.
//!
//! 서킷 브레이커 상태와 메트릭처럼 단일 컴포넌트가 소유하는 상태를
//! `load()/save()` 인터페이스 뒤로 분리합니다. 기본 구현은 pretty JSON 파일이며,
//! 동시성 토큰 없이 마지막 쓰기가 이깁니다 (각 파일은 단일 writer).

use crate::error::TraderResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// 상태 저장소 인터페이스.
pub trait StateStore<T>: Send + Sync {
    /// 저장된 상태를 읽습니다. 아직 저장된 적이 없으면 `Ok(None)`.
    fn load(&self) -> TraderResult<Option<T>>;

    /// 상태를 저장합니다 (전체 덮어쓰기).
    fn save(&self, state: &T) -> TraderResult<()>;
}

/// pretty JSON 파일 저장소.
///
/// 저장 시 임시 파일에 쓴 뒤 rename하므로, 쓰는 도중 중단되어도
/// 이전 파일 또는 새 파일 중 하나만 남습니다.
#[derive(Debug, Clone)]
pub struct JsonFileStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    /// 파일 경로로 저장소를 생성합니다. 파일은 첫 저장 시 만들어집니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    /// 저장 파일 경로.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> StateStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> TraderResult<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let state = serde_json::from_str(&content)?;
        Ok(Some(state))
    }

    fn save(&self, state: &T) -> TraderResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(state)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// 메모리 저장소 (테스트 및 저장이 필요 없는 실행용).
#[derive(Debug, Default)]
pub struct MemoryStore<T> {
    state: std::sync::Mutex<Option<T>>,
}

impl<T> MemoryStore<T> {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(None),
        }
    }
}

impl<T> StateStore<T> for MemoryStore<T>
where
    T: Clone + Send,
{
    fn load(&self) -> TraderResult<Option<T>> {
        let guard = self
            .state
            .lock()
            .map_err(|_| crate::TraderError::Internal("memory store lock poisoned".into()))?;
        Ok(guard.clone())
    }

    fn save(&self, state: &T) -> TraderResult<()> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| crate::TraderError::Internal("memory store lock poisoned".into()))?;
        *guard = Some(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        active: bool,
        count: u32,
    }

    #[test]
    fn test_json_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<Sample> = JsonFileStore::new(dir.path().join("nested/state.json"));

        assert!(store.load().unwrap().is_none());

        let state = Sample {
            active: true,
            count: 3,
        };
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\n  \"active\": true"));
    }

    #[test]
    fn test_json_store_last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<Sample> = JsonFileStore::new(dir.path().join("state.json"));

        store.save(&Sample { active: true, count: 1 }).unwrap();
        store.save(&Sample { active: false, count: 2 }).unwrap();

        assert_eq!(
            store.load().unwrap(),
            Some(Sample {
                active: false,
                count: 2
            })
        );
    }

    #[test]
    fn test_corrupted_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store: JsonFileStore<Sample> = JsonFileStore::new(&path);
        let err = store.load().unwrap_err();
        assert!(err.is_persistence());
    }

    #[test]
    fn test_memory_store() {
        let store: MemoryStore<Sample> = MemoryStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&Sample { active: true, count: 9 }).unwrap();
        assert_eq!(store.load().unwrap().unwrap().count, 9);
    }
}
