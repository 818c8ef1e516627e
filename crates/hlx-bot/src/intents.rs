//! Intent sources for the cycle driver.

use std::path::PathBuf;

use hlx_core::{parse_intents, CoreError, IntentLimits, TradeIntent};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::AppResult;

/// One entry per intent record: either validated or the reason it was
/// refused.
pub type IntentBatch = Vec<Result<TradeIntent, CoreError>>;

/// Supplies the intents for one cycle.
pub trait IntentSource: Send + Sync {
    fn load(&self, limits: &IntentLimits) -> AppResult<IntentBatch>;
}

/// Reads a JSON array (possibly wrapped in prose) from a file every cycle.
/// A missing file means no intents. Contents identical to the last load
/// yield an empty batch, so an intent is submitted once per write of the file.
pub struct FileIntentSource {
    path: PathBuf,
    last_loaded: Mutex<Option<String>>,
}

impl FileIntentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_loaded: Mutex::new(None),
        }
    }
}

impl IntentSource for FileIntentSource {
    fn load(&self, limits: &IntentLimits) -> AppResult<IntentBatch> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Intents file not found, nothing to do");
                *self.last_loaded.lock() = None;
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut last = self.last_loaded.lock();
        if last.as_deref() == Some(text.as_str()) {
            info!(path = %self.path.display(), "Intents file unchanged since last cycle, skipping");
            return Ok(Vec::new());
        }
        let batch = parse_intents(&text, limits)?;
        *last = Some(text);
        debug!(path = %self.path.display(), records = batch.len(), "Loaded intents");
        Ok(batch)
    }
}

/// Fixed text, parsed on every load.
pub struct StaticIntentSource {
    text: Mutex<String>,
}

impl StaticIntentSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Mutex::new(text.into()),
        }
    }

    pub fn replace(&self, text: impl Into<String>) {
        *self.text.lock() = text.into();
    }
}

impl IntentSource for StaticIntentSource {
    fn load(&self, limits: &IntentLimits) -> AppResult<IntentBatch> {
        let text = self.text.lock().clone();
        Ok(parse_intents(&text, limits)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let source = FileIntentSource::new("/nonexistent/hlx/intents.json");
        assert!(source.load(&IntentLimits::default()).unwrap().is_empty());
    }

    #[test]
    fn test_file_with_prose() {
        let path = std::env::temp_dir().join(format!("hlx-intents-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"Here you go:
            [{"coin": "ADA", "action": "buy", "size": 16, "leverage": 5, "confidence": 0.8, "reasoning": "x"},
             {"coin": "BTC", "action": "moon", "size": 1, "leverage": 5, "confidence": 0.8}]"#,
        )
        .unwrap();

        let batch = FileIntentSource::new(&path).load(&IntentLimits::default()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].as_ref().unwrap().coin, "ADA");
        assert!(batch[1].is_err());
    }

    #[test]
    fn test_unchanged_file_loads_once() {
        let path = std::env::temp_dir().join(format!("hlx-intents-once-{}.json", std::process::id()));
        let buy = r#"[{"coin": "ADA", "action": "buy", "size": 16, "leverage": 5, "confidence": 0.8}]"#;
        std::fs::write(&path, buy).unwrap();

        let source = FileIntentSource::new(&path);
        let limits = IntentLimits::default();
        assert_eq!(source.load(&limits).unwrap().len(), 1);
        assert!(source.load(&limits).unwrap().is_empty());

        std::fs::write(
            &path,
            r#"[{"coin": "ADA", "action": "sell", "size": 16, "leverage": 5, "confidence": 0.8}]"#,
        )
        .unwrap();
        assert_eq!(source.load(&limits).unwrap().len(), 1);

        // Removing and recreating the file counts as a fresh write.
        std::fs::remove_file(&path).unwrap();
        assert!(source.load(&limits).unwrap().is_empty());
        std::fs::write(&path, buy).unwrap();
        assert_eq!(source.load(&limits).unwrap().len(), 1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_static_source_replace() {
        let source = StaticIntentSource::new("[]");
        assert!(source.load(&IntentLimits::default()).unwrap().is_empty());
        source.replace(r#"[{"coin": "ETH", "action": "hold", "confidence": 0.5}]"#);
        assert_eq!(source.load(&IntentLimits::default()).unwrap().len(), 1);
    }
}
