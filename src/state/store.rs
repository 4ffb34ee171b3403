//! Durable trade state store
//!
//! One JSON file per trade under the state directory, overwritten on every
//! leg transition (write-ahead) and removed only when the trade reaches a
//! terminal status. Upserts go through a temp file and rename so a crash
//! mid-write never leaves a torn state file.

use crate::state::Trade;
use crate::{ArbitrageError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

const ARCHIVE_DIR: &str = "archive";

/// File-backed persistence keyed by trade id
#[derive(Debug, Clone)]
pub struct TradeStateStore {
    state_dir: PathBuf,
}

impl TradeStateStore {
    /// Open (creating if needed) a store rooted at `state_dir`
    pub fn new<P: AsRef<Path>>(state_dir: P) -> Result<Self> {
        let state_dir = state_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&state_dir).map_err(|e| {
            ArbitrageError::Persistence(format!(
                "Failed to create state dir {}: {}",
                state_dir.display(),
                e
            ))
        })?;
        Ok(Self { state_dir })
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.state_dir.join(format!("{id}.json"))
    }

    /// Atomically write (create or overwrite) the trade's state file
    pub fn upsert(&self, trade: &Trade) -> Result<()> {
        let path = self.path_for(trade.id);
        let tmp = self.state_dir.join(format!("{}.json.tmp", trade.id));
        let payload = serde_json::to_vec_pretty(trade).map_err(|e| {
            ArbitrageError::Persistence(format!("Failed to serialize trade {}: {}", trade.id, e))
        })?;
        std::fs::write(&tmp, payload).map_err(|e| {
            ArbitrageError::Persistence(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            ArbitrageError::Persistence(format!("Failed to rename {}: {}", tmp.display(), e))
        })?;
        debug!(trade_id = %trade.id, status = %trade.status, "Persisted trade state");
        Ok(())
    }

    /// Remove the trade's state file after terminal completion
    pub fn delete(&self, id: Uuid) -> Result<()> {
        let path = self.path_for(id);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| {
                ArbitrageError::Persistence(format!("Failed to delete {}: {}", path.display(), e))
            })?;
            info!(trade_id = %id, "Removed trade state file");
        }
        Ok(())
    }

    /// Move the trade's state file into the archive for manual review
    pub fn archive(&self, id: Uuid, reason: &str) -> Result<()> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(());
        }
        let archive_dir = self.state_dir.join(ARCHIVE_DIR);
        std::fs::create_dir_all(&archive_dir).map_err(|e| {
            ArbitrageError::Persistence(format!("Failed to create archive dir: {}", e))
        })?;
        let archived = archive_dir.join(format!(
            "{}-{}-{}.json",
            id,
            reason,
            chrono::Utc::now().timestamp()
        ));
        std::fs::rename(&path, &archived).map_err(|e| {
            ArbitrageError::Persistence(format!(
                "Failed to archive {}: {}",
                path.display(),
                e
            ))
        })?;
        warn!(trade_id = %id, reason = %reason, path = %archived.display(), "Archived trade state");
        Ok(())
    }

    /// Load every persisted trade, skipping the archive and any file that
    /// no longer parses (logged, not fatal: one corrupt file must not block
    /// recovery of the rest).
    pub fn load_all(&self) -> Result<Vec<Trade>> {
        let mut trades = Vec::new();
        let entries = std::fs::read_dir(&self.state_dir).map_err(|e| {
            ArbitrageError::Persistence(format!(
                "Failed to read state dir {}: {}",
                self.state_dir.display(),
                e
            ))
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| {
                ArbitrageError::Persistence(format!("Failed to read dir entry: {}", e))
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read(&path) {
                Ok(bytes) => match serde_json::from_slice::<Trade>(&bytes) {
                    Ok(trade) => trades.push(trade),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unparseable state file")
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable state file")
                }
            }
        }
        trades.sort_by_key(|trade| trade.created_at);
        Ok(trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Leg, LegSide, LegStatus, LegVenue, OpportunitySnapshot, Trade};
    use tempfile::tempdir;

    fn sample_trade() -> Trade {
        let snapshot = OpportunitySnapshot {
            pair_symbol: "LTC/BTC".to_string(),
            direction: 1,
            dex_order_id: "order-1".to_string(),
            dex_order_price: 0.0025,
            cost_amount: 10.0,
            swap_amount: 0.025,
            expected_profit: 0.6,
            expected_profit_ratio: 0.06,
            dex_fee: 0.0001,
            swap_outbound_fee: 0.00005,
            swap_memo: "=:LTC.LTC:addr".to_string(),
            swap_inbound_address: "bc1qinbound".to_string(),
        };
        let legs = vec![
            Leg::new(LegVenue::DexOrder, LegSide::Sell, "LTC", "BTC", 10.0),
            Leg::new(LegVenue::CrossChainSwap, LegSide::Send, "BTC", "LTC", 0.025),
        ];
        Trade::new(snapshot, legs)
    }

    #[test]
    fn test_upsert_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = TradeStateStore::new(dir.path()).unwrap();

        let mut trade = sample_trade();
        store.upsert(&trade).unwrap();

        trade.legs[0].mark_submitted("order-abc").unwrap();
        store.upsert(&trade).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, trade.id);
        assert_eq!(loaded[0].legs[0].status, LegStatus::Submitted);
        assert_eq!(loaded[0].legs[0].venue_id.as_deref(), Some("order-abc"));
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = tempdir().unwrap();
        let store = TradeStateStore::new(dir.path()).unwrap();

        let trade = sample_trade();
        store.upsert(&trade).unwrap();
        assert_eq!(store.load_all().unwrap().len(), 1);

        store.delete(trade.id).unwrap();
        assert!(store.load_all().unwrap().is_empty());

        // Deleting again is a no-op
        store.delete(trade.id).unwrap();
    }

    #[test]
    fn test_archive_excluded_from_load() {
        let dir = tempdir().unwrap();
        let store = TradeStateStore::new(dir.path()).unwrap();

        let trade = sample_trade();
        store.upsert(&trade).unwrap();
        store.archive(trade.id, "unprofitable").unwrap();

        assert!(store.load_all().unwrap().is_empty());
        let archive = dir.path().join("archive");
        assert_eq!(std::fs::read_dir(archive).unwrap().count(), 1);
    }

    #[test]
    fn test_corrupt_file_skipped() {
        let dir = tempdir().unwrap();
        let store = TradeStateStore::new(dir.path()).unwrap();

        let trade = sample_trade();
        store.upsert(&trade).unwrap();
        std::fs::write(dir.path().join("garbage.json"), b"not json").unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, trade.id);
    }

    #[test]
    fn test_load_all_sorted_by_creation() {
        let dir = tempdir().unwrap();
        let store = TradeStateStore::new(dir.path()).unwrap();

        let first = sample_trade();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = sample_trade();
        store.upsert(&second).unwrap();
        store.upsert(&first).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded[0].id, first.id);
        assert_eq!(loaded[1].id, second.id);
    }
}
