use chrono::Utc;
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

/// Write-once sink for raw message evidence. Narrow on purpose so the
/// gateway can be tested without touching real storage.
pub trait EvidenceSink: Send + Sync {
    /// Store one raw RFC822 message, returning a human-readable
    /// location for logging.
    fn store(&self, raw: &[u8]) -> anyhow::Result<String>;
}

/// Stores each message as `{dir}/{utc_timestamp}_{uuid}.eml`.
pub struct FileEvidenceStore {
    dir: PathBuf,
}

impl FileEvidenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileEvidenceStore { dir: dir.into() }
    }
}

impl EvidenceSink for FileEvidenceStore {
    fn store(&self, raw: &[u8]) -> anyhow::Result<String> {
        std::fs::create_dir_all(&self.dir)?;
        let name = format!(
            "{}_{}.eml",
            Utc::now().format("%Y%m%dT%H%M%SZ"),
            Uuid::new_v4()
        );
        let path = self.dir.join(name);
        std::fs::write(&path, raw)?;
        Ok(path.display().to_string())
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemoryEvidenceStore {
    pub stored: Mutex<Vec<Vec<u8>>>,
}

impl EvidenceSink for MemoryEvidenceStore {
    fn store(&self, raw: &[u8]) -> anyhow::Result<String> {
        let mut stored = self.stored.lock().unwrap();
        stored.push(raw.to_vec());
        Ok(format!("memory:{}", stored.len() - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_writes_eml() {
        let dir = std::env::temp_dir().join(format!("traingate-test-{}", Uuid::new_v4()));
        let store = FileEvidenceStore::new(&dir);
        let location = store.store(b"Subject: x\r\n\r\nbody\r\n").unwrap();
        assert!(location.ends_with(".eml"));
        let written = std::fs::read(&location).unwrap();
        assert_eq!(written, b"Subject: x\r\n\r\nbody\r\n");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_memory_store_records_raw_bytes() {
        let store = MemoryEvidenceStore::default();
        store.store(b"one").unwrap();
        store.store(b"two").unwrap();
        let stored = store.stored.lock().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1], b"two");
    }
}
