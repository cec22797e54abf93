use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use crate::{errors::Error, Result};

/// Persisted form of the store: digest → ISO-8601 timestamp.
pub type RecordMap = BTreeMap<String, String>;

/// Durable backing for [`super::DedupStore`].
pub trait RecordStorage: Send {
    /// `Ok(None)` means nothing has been persisted yet.
    fn read(&self) -> Result<Option<RecordMap>>;
    fn write(&self, records: &RecordMap) -> Result<()>;
    fn describe(&self) -> String;
}

/// JSON file on disk, replaced atomically on every write.
#[derive(Clone, Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl RecordStorage for JsonFileStorage {
    fn read(&self) -> Result<Option<RecordMap>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let txt = fs::read_to_string(&self.path)?;
        if txt.trim().is_empty() {
            return Ok(None);
        }
        let records: RecordMap = serde_json::from_str(&txt)?;
        Ok(Some(records))
    }

    fn write(&self, records: &RecordMap) -> Result<()> {
        let txt = serde_json::to_string_pretty(records)?;
        let tmp = self.tmp_path();
        {
            let mut file = File::create(&tmp)?;
            file.write_all(txt.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        sync_parent_dir(&self.path)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    OpenOptions::new()
        .read(true)
        .open(parent)?
        .sync_all()
        .map_err(Error::from)
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

/// In-memory storage; clones share the same contents.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    records: Arc<Mutex<Option<RecordMap>>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<Mutex<usize>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: RecordMap) -> Self {
        let s = Self::default();
        *s.lock_records() = Some(records);
        s
    }

    pub fn snapshot(&self) -> Option<RecordMap> {
        self.lock_records().clone()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, Option<RecordMap>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RecordStorage for MemoryStorage {
    fn read(&self) -> Result<Option<RecordMap>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::External("memory storage: read failure".to_string()));
        }
        Ok(self.snapshot())
    }

    fn write(&self, records: &RecordMap) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::External("memory storage: write failure".to_string()));
        }
        *self.lock_records() = Some(records.clone());
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
