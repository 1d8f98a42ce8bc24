use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Side;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Serialized projection of the active trade (or idle sizing state).
///
/// Written after every transition. Schema is additive-only: unknown fields
/// in a newer snapshot are ignored, missing fields fall back to defaults
/// and are validated before the snapshot is trusted.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PersistedState {
    pub trade_id: Option<String>,
    pub order_size: f64,
    pub sizing_level: u32,
    pub side: Option<Side>,
    pub entry_price: Option<f64>,
    pub tp_order_id: Option<String>,
    pub sl_order_id: Option<String>,
    /// Unix seconds of the last trade activity, for the staleness check
    pub last_trade_time: i64,
}

impl PersistedState {
    /// Snapshot with no active trade, carrying only the sizing ladder
    pub fn idle(sizing_level: u32, now: DateTime<Utc>) -> Self {
        Self {
            sizing_level,
            last_trade_time: now.timestamp(),
            ..Default::default()
        }
    }

    /// An active trade requires its identity fields; a snapshot that names a
    /// trade but lost its side cannot be trusted
    fn is_consistent(&self) -> bool {
        match &self.trade_id {
            Some(_) => self.side.is_some() && self.order_size > 0.0,
            None => true,
        }
    }
}

/// Durable single-file JSON store for `PersistedState`.
///
/// Single writer (the lifecycle manager). Writes are atomic via
/// write-then-rename so a crash mid-write never leaves a torn snapshot.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn save(&self, state: &PersistedState) -> Result<(), StateError> {
        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Load the snapshot, applying the staleness rule.
    ///
    /// Returns `None` (fresh start) when the file is absent, unparseable,
    /// inconsistent, or older than `reset_timeout_secs` (0 disables the age
    /// check). A rejected snapshot is cleared so the next start is clean.
    pub async fn load(&self, reset_timeout_secs: u64) -> Result<Option<PersistedState>, StateError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state: PersistedState = match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("discarding unparseable state snapshot: {}", e);
                self.clear().await?;
                return Ok(None);
            }
        };

        if !state.is_consistent() {
            tracing::warn!("discarding inconsistent state snapshot (missing trade fields)");
            self.clear().await?;
            return Ok(None);
        }

        if reset_timeout_secs > 0 {
            let age = Utc::now().timestamp() - state.last_trade_time;
            if age > reset_timeout_secs as i64 {
                tracing::info!(
                    "state snapshot is {}s old (> {}s), resetting sizing ladder",
                    age,
                    reset_timeout_secs
                );
                self.clear().await?;
                return Ok(None);
            }
        }

        Ok(Some(state))
    }

    pub async fn clear(&self) -> Result<(), StateError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_store() -> StateStore {
        let path = std::env::temp_dir().join(format!("futbot-state-{}.json", Uuid::new_v4()));
        StateStore::new(path)
    }

    fn active_state() -> PersistedState {
        PersistedState {
            trade_id: Some("T20250101_000000_abcd1234".to_string()),
            order_size: 2.0,
            sizing_level: 1,
            side: Some(Side::Long),
            entry_price: Some(100.0),
            tp_order_id: Some("tp-1".to_string()),
            sl_order_id: Some("sl-1".to_string()),
            last_trade_time: Utc::now().timestamp(),
        }
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let store = temp_store();
        let state = active_state();

        store.save(&state).await.unwrap();
        let loaded = store.load(0).await.unwrap().unwrap();

        assert_eq!(loaded.trade_id, state.trade_id);
        assert_eq!(loaded.sizing_level, 1);
        assert_eq!(loaded.side, Some(Side::Long));
        assert_eq!(loaded.tp_order_id.as_deref(), Some("tp-1"));

        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_is_fresh() {
        let store = temp_store();
        assert!(store.load(0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_snapshot_resets() {
        let store = temp_store();
        let mut state = PersistedState::idle(4, Utc::now());
        state.last_trade_time = Utc::now().timestamp() - 7200;

        store.save(&state).await.unwrap();

        // 1h reset timeout: the 2h-old ladder must not be trusted
        assert!(store.load(3600).await.unwrap().is_none());
        // and the rejected file is gone
        assert!(store.load(0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_timeout_disables_staleness() {
        let store = temp_store();
        let mut state = PersistedState::idle(4, Utc::now());
        state.last_trade_time = Utc::now().timestamp() - 7200;

        store.save(&state).await.unwrap();
        let loaded = store.load(0).await.unwrap().unwrap();
        assert_eq!(loaded.sizing_level, 4);

        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_inconsistent_snapshot_resets() {
        let store = temp_store();
        let mut state = active_state();
        state.side = None; // trade named but side lost

        store.save(&state).await.unwrap();
        assert!(store.load(0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_garbage_file_resets() {
        let store = temp_store();
        tokio::fs::write(store.path(), b"{not json").await.unwrap();
        assert!(store.load(0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_fields_ignored() {
        let store = temp_store();
        let json = r#"{"sizing_level":2,"last_trade_time":9999999999,"future_field":true}"#;
        tokio::fs::write(store.path(), json).await.unwrap();

        let loaded = store.load(0).await.unwrap().unwrap();
        assert_eq!(loaded.sizing_level, 2);
        assert!(loaded.trade_id.is_none());

        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_save_overwrites_atomically() {
        let store = temp_store();
        store.save(&PersistedState::idle(1, Utc::now())).await.unwrap();
        store.save(&PersistedState::idle(2, Utc::now())).await.unwrap();

        let loaded = store.load(0).await.unwrap().unwrap();
        assert_eq!(loaded.sizing_level, 2);

        store.clear().await.unwrap();
    }
}
