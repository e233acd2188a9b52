//! The file handing the list of ingested apps over to the detail upload.

use std::path::{Path, PathBuf};

use tokio::{fs, io::AsyncWriteExt};

use crate::model::AppSummary;
use crate::{Error, Result};

/// Rewrites the whole checkpoint. Goes through a temp file and a rename so a
/// crash never leaves a half written list behind.
pub async fn write_checkpoint(path: &Path, apps: &[AppSummary]) -> Result<()> {
    let bytes = serde_json::to_vec(apps)?;
    let tmp_path = tmp_path(path);

    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp_path, path).await?;
    Ok(())
}

pub async fn read_checkpoint(path: &Path) -> Result<Vec<AppSummary>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::MissingCheckpoint(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&bytes)?)
}

/// Removes a checkpoint left over from an earlier run.
pub async fn clear_checkpoint(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(id: &str, title: &str) -> AppSummary {
        AppSummary {
            id: id.into(),
            title: title.into(),
            url: format!("https://itunes.apple.com/us/app/id{id}"),
        }
    }

    #[tokio::test]
    async fn round_trip_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingested_apps.txt");
        let apps = vec![app("3", "Zeta ☕"), app("1", "Alpha"), app("2", "Mid")];

        write_checkpoint(&path, &apps).await.unwrap();
        assert_eq!(read_checkpoint(&path).await.unwrap(), apps);
        assert!(!tmp_path(&path).exists());
    }

    #[tokio::test]
    async fn rewrite_replaces_previous_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingested_apps.txt");

        write_checkpoint(&path, &[app("1", "Alpha")]).await.unwrap();
        write_checkpoint(&path, &[app("1", "Alpha"), app("2", "Beta")])
            .await
            .unwrap();
        assert_eq!(read_checkpoint(&path).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nothing.txt");
        assert!(matches!(
            read_checkpoint(&path).await,
            Err(Error::MissingCheckpoint(_))
        ));
        clear_checkpoint(&path).await.unwrap();
    }
}
