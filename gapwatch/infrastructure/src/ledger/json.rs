use async_trait::async_trait;
use fs4::fs_std::FileExt;
use gapwatch_application::ports::{GapLedgerRepository, LedgerError, LedgerLock};
use gapwatch_domain::LedgerState;
use shaku::Component;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Gap ledger kept as one pretty-printed JSON document.
///
/// Every commit is written to a sibling temporary file and renamed over the
/// ledger, so readers only ever observe complete documents. Writers in
/// separate processes serialize on an advisory lock over `{path}.lock`.
#[derive(Component)]
#[shaku(interface = GapLedgerRepository)]
pub struct JsonGapLedger {
    path: PathBuf,
}

impl JsonGapLedger {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    fn parent_dir(path: &Path) -> &Path {
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    fn stage(path: &Path, state: &LedgerState) -> Result<NamedTempFile, LedgerError> {
        let dir = Self::parent_dir(path);
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, state)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        Ok(tmp)
    }
}

#[async_trait]
impl GapLedgerRepository for JsonGapLedger {
    async fn lock(&self) -> Result<LedgerLock, LedgerError> {
        let path = self.lock_path();
        fs::create_dir_all(Self::parent_dir(&path))?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        // blocks until the holder's file handle is closed
        let file = tokio::task::spawn_blocking(move || {
            FileExt::lock_exclusive(&file)?;
            Ok::<_, std::io::Error>(file)
        })
        .await
        .map_err(|e| LedgerError::IoError(std::io::Error::other(e)))??;

        debug!("Acquired ledger lock {}", path.display());
        Ok(LedgerLock::new(file))
    }

    async fn load(&self) -> Result<LedgerState, LedgerError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No ledger at {}, starting empty", self.path.display());
                return Ok(LedgerState::default());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    async fn commit(&self, state: &LedgerState) -> Result<(), LedgerError> {
        let tmp = Self::stage(&self.path, state)?;
        tmp.persist(&self.path).map_err(|e| LedgerError::IoError(e.error))?;
        debug!("Committed {} gaps to {}", state.gaps().len(), self.path.display());
        Ok(())
    }

    async fn write_new(&self, path: &Path, state: &LedgerState) -> Result<(), LedgerError> {
        if path.exists() {
            return Err(LedgerError::AlreadyExists(path.to_path_buf()));
        }
        let tmp = Self::stage(path, state)?;
        tmp.persist_noclobber(path).map_err(|e| {
            if e.error.kind() == ErrorKind::AlreadyExists {
                LedgerError::AlreadyExists(path.to_path_buf())
            } else {
                LedgerError::IoError(e.error)
            }
        })?;
        Ok(())
    }
}
