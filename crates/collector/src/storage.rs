use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::{debug, info};

use common::{Candle, Error, Result, Series, SeriesStore};

/// Flat-file series storage: one CSV per key at `<base>/<symbol>/<interval>.csv`.
///
/// Saves go to a sibling temp file that is renamed over the target, so a
/// concurrent `load` sees either the old file or the new one, never a
/// partial write.
pub struct CsvStore {
    base_path: PathBuf,
    tmp_seq: AtomicU64,
}

impl CsvStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            tmp_seq: AtomicU64::new(0),
        }
    }

    pub fn path_for(&self, symbol: &str, interval: &str) -> PathBuf {
        self.base_path.join(symbol).join(format!("{interval}.csv"))
    }
}

#[async_trait]
impl SeriesStore for CsvStore {
    async fn load(&self, symbol: &str, interval: &str) -> Result<Series> {
        let path = self.path_for(symbol, interval);
        let candles = tokio::task::spawn_blocking(move || read_candles(&path))
            .await
            .map_err(|e| Error::Other(format!("csv load task failed: {e}")))??;

        match candles {
            Some(candles) => Ok(Series::new(candles)),
            None => {
                debug!(symbol, interval, "No existing data");
                Ok(Series::empty())
            }
        }
    }

    async fn save(&self, symbol: &str, interval: &str, series: &Series) -> Result<()> {
        let path = self.path_for(symbol, interval);
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("csv.{}.{seq}.tmp", std::process::id()));
        let candles = series.candles().to_vec();
        let rows = candles.len();

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_candles(&target, &tmp, &candles))
            .await
            .map_err(|e| Error::Other(format!("csv save task failed: {e}")))??;

        info!(path = %path.display(), rows, "Data saved");
        Ok(())
    }
}

/// `None` when the file does not exist yet.
fn read_candles(path: &Path) -> Result<Option<Vec<Candle>>> {
    let mut reader = match csv::Reader::from_path(path) {
        Ok(reader) => reader,
        Err(e) => match e.kind() {
            csv::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None)
            }
            _ => return Err(e.into()),
        },
    };
    let candles = reader
        .deserialize::<Candle>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Some(candles))
}

fn write_candles(path: &Path, tmp: &Path, candles: &[Candle]) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let written = (|| -> Result<()> {
        let mut writer = csv::Writer::from_path(tmp)?;
        for candle in candles {
            writer.serialize(candle)?;
        }
        writer.flush()?;
        Ok(())
    })();

    match written {
        Ok(()) => std::fs::rename(tmp, path).map_err(Error::from),
        Err(e) => {
            let _ = std::fs::remove_file(tmp);
            Err(e)
        }
    }
}
