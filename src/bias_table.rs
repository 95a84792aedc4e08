//! Candlestick bias reference data.
//!
//! Maps a detector id and direction to a base sentiment score in [-5, 5] plus
//! descriptive text. Loaded once at startup and read-only afterwards.

use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::Variant;

pub const SCORE_MIN: i32 = -5;
pub const SCORE_MAX: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiasEntry {
    pub score: i32,
    pub variant: Option<Variant>,
    pub english: Option<String>,
    pub native: Option<String>,
    pub typical_setup: Option<String>,
    pub next_move: Option<String>,
    pub description: Option<String>,
}

/// Returned when a detector has no entries at all.
static EMPTY_ENTRY: BiasEntry = BiasEntry {
    score: 0,
    variant: None,
    english: None,
    native: None,
    typical_setup: None,
    next_move: None,
    description: None,
};

#[derive(Deserialize, Debug)]
struct BiasRow {
    function: Option<String>,
    variant: Option<String>,
    score: Option<String>,
    english: Option<String>,
    native: Option<String>,
    typical_setup: Option<String>,
    next_move: Option<String>,
}

#[derive(Debug, Default)]
pub struct BiasTable {
    // Per detector, entries in file order; a repeated variant replaces the earlier row.
    entries: HashMap<String, Vec<(Variant, BiasEntry)>>,
    source: Option<PathBuf>,
}

static SHARED: OnceCell<Arc<BiasTable>> = OnceCell::new();

impl BiasTable {
    /// Process-wide table, loaded at most once from the first existing candidate.
    /// Later calls return the cached table and ignore `candidates`.
    pub fn shared(candidates: &[PathBuf]) -> AppResult<Arc<BiasTable>> {
        SHARED
            .get_or_try_init(|| BiasTable::load_first(candidates).map(Arc::new))
            .cloned()
    }

    /// Loads the first candidate path that exists.
    pub fn load_first(candidates: &[PathBuf]) -> AppResult<Self> {
        for path in candidates {
            if path.exists() {
                return BiasTable::load(path);
            }
            debug!(path = %path.display(), "bias dataset candidate not present");
        }
        Err(AppError::BiasDatasetMissing {
            candidates: candidates.to_vec(),
        })
    }

    pub fn load(path: &Path) -> AppResult<Self> {
        let file = File::open(path)?;
        let mut table = BiasTable::from_reader(file).map_err(|source| {
            AppError::BiasDatasetInvalid {
                path: path.to_path_buf(),
                source,
            }
        })?;
        table.source = Some(path.to_path_buf());
        info!(
            path = %path.display(),
            detectors = table.entries.len(),
            "loaded candlestick bias dataset"
        );
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut table = BiasTable::default();
        for row in rdr.deserialize::<BiasRow>() {
            let row = row?;
            let Some(function) = row.function.filter(|f| !f.is_empty()) else {
                continue;
            };
            let variant = Variant::parse(row.variant.as_deref().unwrap_or_default());
            let score = parse_score(row.score.as_deref(), &function);
            let description = row.next_move.clone().or_else(|| row.typical_setup.clone());
            let entry = BiasEntry {
                score,
                variant: Some(variant),
                english: row.english,
                native: row.native,
                typical_setup: row.typical_setup,
                next_move: row.next_move,
                description,
            };

            let slot = table.entries.entry(function).or_default();
            match slot.iter_mut().find(|(v, _)| *v == variant) {
                Some(existing) => existing.1 = entry,
                None => slot.push((variant, entry)),
            }
        }
        Ok(table)
    }

    /// Bias entry for a detector output.
    ///
    /// Tries the variant implied by the sign of `value`, then the detector's
    /// neutral entry, then any entry for the detector, then a zero entry.
    pub fn lookup(&self, detector_id: &str, value: i32) -> &BiasEntry {
        let Some(variants) = self.entries.get(detector_id) else {
            return &EMPTY_ENTRY;
        };
        let wanted = Variant::from_value(value);
        variants
            .iter()
            .find(|(v, _)| *v == wanted)
            .or_else(|| variants.iter().find(|(v, _)| *v == Variant::Neutral))
            .or_else(|| variants.first())
            .map(|(_, entry)| entry)
            .unwrap_or(&EMPTY_ENTRY)
    }

    /// Detector ids with at least one entry, sorted.
    pub fn detectors(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn entries_for(&self, detector_id: &str) -> &[(Variant, BiasEntry)] {
        self.entries
            .get(detector_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_score(raw: Option<&str>, function: &str) -> i32 {
    let Some(raw) = raw else {
        return 0;
    };
    match raw.parse::<i32>() {
        Ok(score) => score.clamp(SCORE_MIN, SCORE_MAX),
        Err(_) => {
            warn!(function, raw, "unparsable bias score, using 0");
            0
        }
    }
}
