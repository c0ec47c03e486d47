//! Durable ledger storage
//!
//! SQLite persistence with a JSON snapshot backup. Both tables are total
//! snapshots keyed by their internal ids: every mutation is written
//! synchronously, and startup reloads the full state with no replay.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::oms::ledger::Position;
use crate::oms::orders::{ExecutionType, OrderRecord};
use crate::types::{Action, Symbol};

pub struct LedgerStore {
    conn: Connection,
    json_backup_path: PathBuf,
    auto_backup: bool,
}

impl LedgerStore {
    pub fn new<P: AsRef<Path>>(db_path: P, json_backup_path: P, auto_backup: bool) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = json_backup_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let store = Self {
            conn,
            json_backup_path: json_backup_path.as_ref().to_path_buf(),
            auto_backup,
        };

        store.create_tables()?;
        info!("Ledger store initialized");

        Ok(store)
    }

    /// Open the standard layout under a state directory
    pub fn open_in<P: AsRef<Path>>(state_dir: P) -> Result<Self> {
        let state_dir = state_dir.as_ref();
        std::fs::create_dir_all(state_dir)?;
        Self::new(
            state_dir.join("ledger.db"),
            state_dir.join("ledger.json"),
            true,
        )
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY,
                symbol TEXT NOT NULL,
                instrument TEXT NOT NULL,
                strategy_id TEXT NOT NULL,
                quantity REAL NOT NULL,
                avg_price REAL NOT NULL,
                pair_id TEXT,
                last_updated TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY,
                symbol TEXT NOT NULL,
                action TEXT NOT NULL,
                quantity REAL NOT NULL,
                position_id INTEGER NOT NULL,
                strategy_id TEXT NOT NULL,
                instrument TEXT NOT NULL,
                execution_type TEXT NOT NULL,
                limit_price REAL,
                pair_id TEXT,
                submitted_at TEXT NOT NULL,
                last_processed_fill REAL NOT NULL,
                fill_processed INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_positions_strategy ON positions(strategy_id)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_orders_position ON orders(position_id)",
            [],
        )?;

        debug!("Database schema created/verified");
        Ok(())
    }

    pub fn save_position(&self, pos: &Position) -> rusqlite::Result<()> {
        let instrument_json =
            serde_json::to_string(&pos.instrument).expect("instrument serializes");

        self.conn.execute(
            "INSERT OR REPLACE INTO positions
             (id, symbol, instrument, strategy_id, quantity, avg_price, pair_id, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                pos.id as i64,
                pos.symbol.as_str(),
                instrument_json,
                pos.strategy_id,
                pos.quantity,
                pos.avg_price,
                pos.pair_id,
                pos.last_updated.to_rfc3339(),
            ],
        )?;

        debug!(
            "Position saved: #{} {} [{}] qty={:.2} @ {:.4}",
            pos.id,
            pos.symbol,
            pos.instrument.kind(),
            pos.quantity,
            pos.avg_price
        );
        Ok(())
    }

    pub fn save_order(&self, order: &OrderRecord) -> rusqlite::Result<()> {
        let instrument_json =
            serde_json::to_string(&order.instrument).expect("instrument serializes");

        self.conn.execute(
            "INSERT OR REPLACE INTO orders
             (id, symbol, action, quantity, position_id, strategy_id, instrument,
              execution_type, limit_price, pair_id, submitted_at,
              last_processed_fill, fill_processed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                order.id as i64,
                order.symbol.as_str(),
                order.action.to_string(),
                order.quantity,
                order.position_id as i64,
                order.strategy_id,
                instrument_json,
                order.execution_type.to_string(),
                order.limit_price,
                order.pair_id,
                order.submitted_at.to_rfc3339(),
                order.last_processed_fill,
                order.fill_processed as i64,
            ],
        )?;

        debug!(
            "Order saved: #{} {} {} x{} processed={:.2}",
            order.id, order.action, order.symbol, order.quantity, order.last_processed_fill
        );
        Ok(())
    }

    pub fn load_positions(&self) -> Result<Vec<Position>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, symbol, instrument, strategy_id, quantity, avg_price, pair_id, last_updated
             FROM positions",
        )?;
        let positions = stmt
            .query_map([], |row| {
                let instrument_json: String = row.get(2)?;
                let last_updated: String = row.get(7)?;
                Ok(Position {
                    id: row.get::<_, i64>(0)? as u64,
                    symbol: Symbol::new(row.get::<_, String>(1)?),
                    instrument: serde_json::from_str(&instrument_json).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            2,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?,
                    strategy_id: row.get(3)?,
                    quantity: row.get(4)?,
                    avg_price: row.get(5)?,
                    pair_id: row.get(6)?,
                    last_updated: parse_timestamp(&last_updated),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        debug!("Loaded {} positions", positions.len());
        Ok(positions)
    }

    pub fn load_orders(&self) -> Result<Vec<OrderRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, symbol, action, quantity, position_id, strategy_id, instrument,
                    execution_type, limit_price, pair_id, submitted_at,
                    last_processed_fill, fill_processed
             FROM orders",
        )?;
        let orders = stmt
            .query_map([], |row| {
                let action: String = row.get(2)?;
                let instrument_json: String = row.get(6)?;
                let execution_type: String = row.get(7)?;
                let submitted_at: String = row.get(10)?;
                Ok(OrderRecord {
                    id: row.get::<_, i64>(0)? as u64,
                    symbol: Symbol::new(row.get::<_, String>(1)?),
                    action: if action == "SELL" {
                        Action::Sell
                    } else {
                        Action::Buy
                    },
                    quantity: row.get(3)?,
                    position_id: row.get::<_, i64>(4)? as u64,
                    strategy_id: row.get(5)?,
                    instrument: serde_json::from_str(&instrument_json).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            6,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?,
                    execution_type: execution_type
                        .parse::<ExecutionType>()
                        .unwrap_or(ExecutionType::IocMarket),
                    limit_price: row.get(8)?,
                    pair_id: row.get(9)?,
                    submitted_at: parse_timestamp(&submitted_at),
                    last_processed_fill: row.get(11)?,
                    fill_processed: row.get::<_, i64>(12)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        debug!("Loaded {} orders", orders.len());
        Ok(orders)
    }

    /// Write a human-readable snapshot next to the database
    pub fn export_json(&self) -> Result<()> {
        let positions = self.load_positions()?;
        let orders = self.load_orders()?;

        let state = serde_json::json!({
            "exported_at": Utc::now().to_rfc3339(),
            "positions": positions,
            "orders": orders,
        });

        std::fs::write(&self.json_backup_path, serde_json::to_string_pretty(&state)?)?;
        debug!("Ledger exported to: {}", self.json_backup_path.display());
        Ok(())
    }

    pub fn auto_backup(&self) -> bool {
        self.auto_backup
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Instrument;

    fn temp_store(name: &str) -> LedgerStore {
        let dir = std::env::temp_dir().join(format!("option_trader_store_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        LedgerStore::open_in(&dir).expect("open store")
    }

    #[test]
    fn test_position_round_trip() {
        let store = temp_store("pos");
        let pos = Position {
            id: 1,
            symbol: Symbol::new("AAPL"),
            instrument: Instrument::Stock,
            strategy_id: "ZACKS_001".to_string(),
            quantity: 100.0,
            avg_price: 189.5,
            pair_id: None,
            last_updated: Utc::now(),
        };
        store.save_position(&pos).unwrap();

        let loaded = store.load_positions().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, 1);
        assert_eq!(loaded[0].quantity, 100.0);
        assert_eq!(loaded[0].instrument, Instrument::Stock);
    }

    #[test]
    fn test_order_round_trip_and_overwrite() {
        let store = temp_store("ord");
        let mut order = OrderRecord {
            id: 5,
            symbol: Symbol::new("MSFT"),
            action: Action::Sell,
            quantity: 3.0,
            position_id: 9,
            strategy_id: "OPT_001".to_string(),
            instrument: Instrument::Stock,
            execution_type: ExecutionType::DynamicLimit,
            limit_price: Some(430.0),
            pair_id: None,
            submitted_at: Utc::now(),
            last_processed_fill: 0.0,
            fill_processed: false,
        };
        store.save_order(&order).unwrap();

        order.last_processed_fill = 3.0;
        order.fill_processed = true;
        store.save_order(&order).unwrap();

        let loaded = store.load_orders().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].fill_processed);
        assert_eq!(loaded[0].last_processed_fill, 3.0);
        assert_eq!(loaded[0].execution_type, ExecutionType::DynamicLimit);
    }

    #[test]
    fn test_export_json_writes_snapshot() {
        let store = temp_store("json");
        store.export_json().unwrap();
        let raw = std::fs::read_to_string(&store.json_backup_path).unwrap();
        assert!(raw.contains("positions"));
        assert!(raw.contains("orders"));
    }
}
