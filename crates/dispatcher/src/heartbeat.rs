//! Liveness heartbeat for the external watchdog.

use std::path::Path;

use chrono::Utc;

use newswire_common::error::DispatchError;

/// Atomically replace the heartbeat file with the current unix timestamp.
pub async fn touch(path: &Path) -> Result<(), DispatchError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");

    tokio::fs::write(&tmp, format!("{}\n", Utc::now().timestamp())).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
