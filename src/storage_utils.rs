use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::{PriceBar, SymbolRecord};

// STORAGE MANAGER

#[derive(Debug, Clone)]
pub struct AsyncStorageManager {
    // Directory holding every JSON document (e.g. "./storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Creates the manager and its directory.
    pub async fn new<P: AsRef<Path>>(base_dir: P) -> AppResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    /// File path for a document key. Characters outside `[A-Za-z0-9._-]` become
    /// `_`, so symbols like `^N225` map to safe file names.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", sanitize_key(key)))
    }

    /// Saves any `Serialize` value as pretty JSON.
    /// Writes to a `.tmp` sibling first and renames it into place, so a crash
    /// mid-write leaves the previous document intact.
    pub async fn save<T: Serialize>(&self, key: &str, data: &T) -> AppResult<()> {
        let final_path = self.path_for(key);
        let tmp_path = final_path.with_extension("json.tmp");

        let json_bytes = serde_json::to_vec_pretty(data)?;
        fs::write(&tmp_path, json_bytes).await?;
        fs::rename(tmp_path, final_path).await?;
        Ok(())
    }

    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> AppResult<T> {
        // Read raw bytes; serde_json validates UTF-8 while parsing anyway.
        let content = fs::read(self.path_for(key)).await?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Like `load`, but a missing document is `Ok(None)`.
    pub async fn load_optional<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        match fs::read(self.path_for(key)).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// PRICE STORE

/// Local cache of daily bars and symbol metadata.
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// All cached bars for a symbol, ascending by date. Unknown symbols are empty.
    async fn get_range(&self, symbol: &str) -> AppResult<Vec<PriceBar>>;

    /// Merges bars by date; incoming rows replace cached rows with the same date.
    /// Returns the number of bars now cached.
    async fn upsert_prices(&self, symbol: &str, bars: &[PriceBar]) -> AppResult<usize>;

    async fn latest_date(&self, symbol: &str) -> AppResult<Option<NaiveDate>> {
        Ok(self.get_range(symbol).await?.last().map(|bar| bar.date))
    }

    async fn get_metadata(&self, symbol: &str) -> AppResult<Option<SymbolRecord>>;

    async fn upsert_metadata(&self, record: &SymbolRecord) -> AppResult<()>;
}

const METADATA_KEY: &str = "metadata";

/// `PriceStore` backed by one JSON document per symbol plus one metadata document.
pub struct PricesRepo {
    storage: AsyncStorageManager,
    // Serialises read-modify-write cycles on the JSON documents.
    write_lock: Mutex<()>,
}

impl PricesRepo {
    pub async fn open<P: AsRef<Path>>(dir: P) -> AppResult<Self> {
        Ok(Self {
            storage: AsyncStorageManager::new(dir).await?,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.storage.base_dir
    }

    fn prices_key(symbol: &str) -> String {
        format!("prices_{symbol}")
    }

    async fn read_metadata(&self) -> AppResult<BTreeMap<String, SymbolRecord>> {
        Ok(self
            .storage
            .load_optional(METADATA_KEY)
            .await
            .map_err(|e| AppError::Storage(format!("metadata: {e}")))?
            .unwrap_or_default())
    }
}

#[async_trait]
impl PriceStore for PricesRepo {
    async fn get_range(&self, symbol: &str) -> AppResult<Vec<PriceBar>> {
        let mut bars: Vec<PriceBar> = self
            .storage
            .load_optional(&Self::prices_key(symbol))
            .await?
            .unwrap_or_default();
        bars.sort_by_key(|bar| bar.date);
        Ok(bars)
    }

    async fn upsert_prices(&self, symbol: &str, bars: &[PriceBar]) -> AppResult<usize> {
        if bars.is_empty() {
            debug!(symbol, "skip upsert: no bars");
            return Ok(self.get_range(symbol).await?.len());
        }
        let _guard = self.write_lock.lock().await;

        let mut merged: BTreeMap<NaiveDate, PriceBar> = self
            .get_range(symbol)
            .await?
            .into_iter()
            .map(|bar| (bar.date, bar))
            .collect();
        for bar in bars {
            merged.insert(bar.date, bar.clone());
        }
        let rows: Vec<PriceBar> = merged.into_values().collect();
        self.storage.save(&Self::prices_key(symbol), &rows).await?;
        debug!(symbol, incoming = bars.len(), total = rows.len(), "upserted prices");
        Ok(rows.len())
    }

    async fn get_metadata(&self, symbol: &str) -> AppResult<Option<SymbolRecord>> {
        Ok(self.read_metadata().await?.remove(symbol))
    }

    async fn upsert_metadata(&self, record: &SymbolRecord) -> AppResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_metadata().await?;
        all.insert(record.symbol.clone(), record.clone());
        self.storage.save(METADATA_KEY, &all).await
    }
}
