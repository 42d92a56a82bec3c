//! Writing files on the supervising host

use futures::io::AsyncWriteExt;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};

/// A file to write (or append to)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WriteFileInfo {
    /// Destination path
    pub path: String,
    /// Bytes to write
    #[serde(default)]
    pub content: Vec<u8>,
    /// Append instead of truncating
    #[serde(default)]
    pub append: bool,
    /// Unix permission bits; zero keeps the default
    #[serde(default)]
    pub perm: u32,
}

impl WriteFileInfo {
    /// Reject a request without a path
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::invalid("write file requires a path"));
        }
        Ok(())
    }
}

/// Write `info.content` to `info.path`, creating parent directories
pub async fn write_file(info: &WriteFileInfo) -> Result<()> {
    info.validate()?;
    let path = Path::new(&info.path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        async_fs::create_dir_all(parent).await?;
    }

    let mut file = async_fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(info.append)
        .truncate(!info.append)
        .open(path)
        .await?;
    file.write_all(&info.content).await?;
    file.flush().await?;

    #[cfg(unix)]
    if info.perm != 0 {
        use std::os::unix::fs::PermissionsExt;
        async_fs::set_permissions(path, std::fs::Permissions::from_mode(info.perm)).await?;
    }

    debug!(path = %info.path, bytes = info.content.len(), append = info.append, "wrote file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[smol_potat::test]
    async fn test_write_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/file.txt");
        let mut info = WriteFileInfo {
            path: path.to_string_lossy().into_owned(),
            content: b"one\n".to_vec(),
            ..WriteFileInfo::default()
        };
        write_file(&info).await.unwrap();

        info.content = b"two\n".to_vec();
        info.append = true;
        write_file(&info).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");

        info.append = false;
        write_file(&info).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two\n");
    }

    #[cfg(unix)]
    #[smol_potat::test]
    async fn test_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.sh");
        let info = WriteFileInfo {
            path: path.to_string_lossy().into_owned(),
            content: b"#!/bin/sh\n".to_vec(),
            perm: 0o750,
            ..WriteFileInfo::default()
        };
        write_file(&info).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[smol_potat::test]
    async fn test_empty_path_is_invalid() {
        assert!(write_file(&WriteFileInfo::default()).await.is_err());
    }
}
