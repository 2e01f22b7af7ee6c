use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::debug;

/// Durable storage for the single session token of this client.
pub trait CredentialSlot: Send {
    fn load(&self) -> io::Result<Option<String>>;
    fn save(&mut self, raw_token: &str) -> io::Result<()>;
    fn clear(&mut self) -> io::Result<()>;
}

#[derive(Debug)]
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    pub const FILE_NAME: &'static str = "session.token";

    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(Self::FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialSlot for FileSlot {
    #[tracing::instrument(skip(self), fields(file = %self.path.display()))]
    fn load(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(trimmed.to_string()))
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    #[tracing::instrument(skip(self, raw_token), fields(file = %self.path.display()))]
    fn save(&mut self, raw_token: &str) -> io::Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(raw_token.as_bytes())?;
        temp.flush()?;
        temp.persist(&self.path).map_err(|err| err.error)?;
        debug!(len = raw_token.len(), "persisted session token");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(file = %self.path.display()))]
    fn clear(&mut self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySlot {
    value: Mutex<Option<String>>,
}

impl MemorySlot {
    pub fn with_token(raw_token: &str) -> Self {
        Self {
            value: Mutex::new(Some(raw_token.to_string())),
        }
    }

    pub fn peek(&self) -> Option<String> {
        self.value.lock().clone()
    }
}

impl CredentialSlot for MemorySlot {
    fn load(&self) -> io::Result<Option<String>> {
        Ok(self.value.lock().clone())
    }

    fn save(&mut self, raw_token: &str) -> io::Result<()> {
        *self.value.lock() = Some(raw_token.to_string());
        Ok(())
    }

    fn clear(&mut self) -> io::Result<()> {
        *self.value.lock() = None;
        Ok(())
    }
}
