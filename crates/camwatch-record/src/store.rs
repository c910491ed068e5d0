use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Local "downloads" folder. Files are never overwritten: a clash gets
/// ` (1)`, ` (2)`, ... appended to the stem.
#[derive(Debug, Clone)]
pub struct Downloads {
    dir: PathBuf,
}

impl Downloads {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn save(&self, stem: &str, ext: &str, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create downloads dir {}", self.dir.display()))?;

        for n in 0u32.. {
            let name = if n == 0 { format!("{}.{}", stem, ext) } else { format!("{} ({}).{}", stem, n, ext) };
            let path = self.dir.join(name);
            let file = tokio::fs::OpenOptions::new().write(true).create_new(true).open(&path).await;
            let mut file = match file {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e).with_context(|| format!("create {}", path.display())),
            };
            file.write_all(bytes).await.with_context(|| format!("write {}", path.display()))?;
            file.flush().await?;
            return Ok(path);
        }
        anyhow::bail!("no free file name for {}.{}", stem, ext)
    }
}
