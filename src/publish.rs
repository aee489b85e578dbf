// src/publish.rs
//! Atomic write-then-rename publishing of the exposition file.

use crate::error::{ExporterError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Sibling temp path used while writing `output`, e.g. `nvme_metrics.prom.tmp`.
///
/// It lives in the same directory so the final rename never crosses a filesystem.
pub fn temp_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("metrics"));
    name.push(".tmp");
    output.with_file_name(name)
}

/// Create the directory holding `output`. Called once at startup; failure is fatal.
pub async fn ensure_output_dir(output: &Path) -> Result<()> {
    let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) else {
        return Ok(());
    };
    fs::create_dir_all(dir)
        .await
        .map_err(|source| ExporterError::OutputDir {
            path: dir.to_path_buf(),
            source,
        })
}

async fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    Ok(())
}

/// Replace `output` with `contents` so that readers only ever see a complete file.
///
/// On failure the temp file is removed and the previous `output` is left untouched.
pub async fn publish(output: &Path, contents: &str) -> Result<()> {
    let tmp = temp_path(output);
    let result = match write_synced(&tmp, contents.as_bytes()).await {
        Ok(()) => fs::rename(&tmp, output).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            debug!(path = %output.display(), bytes = contents.len(), "published");
            Ok(())
        }
        Err(source) => {
            if let Err(e) = fs::remove_file(&tmp).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %tmp.display(), error = %e, "could not remove temp file");
                }
            }
            Err(ExporterError::Publish {
                path: output.to_path_buf(),
                source,
            })
        }
    }
}
