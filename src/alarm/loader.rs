//! Directory-backed alarm repository
//!
//! Every `*.toml` file below the alarms directory holds one alarm. The chain
//! of sub-directories between the root and the file becomes the alarm's
//! `path`, and the file stem is used as ID when the file does not set one:
//!
//! ```text
//! alarms/
//! ├── payments/
//! │   └── api/
//! │       └── health.toml     → id "health", path ["payments", "api"]
//! └── queue-depth.toml        → id "queue-depth", path []
//! ```
//!
//! The directory is re-read on every call, so files edited on disk are picked
//! up by the next scheduler sync without a restart.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tracing::{trace, warn};

use super::Alarm;
use super::repository::AlarmRepository;

const ALARM_EXTENSION: &str = "toml";

pub struct FileAlarmRepository {
    root: PathBuf,
}

impl FileAlarmRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn entries(&self) -> anyhow::Result<Vec<(PathBuf, Alarm)>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || load_alarm_entries(&root))
            .await
            .context("alarm loader task panicked")?
    }
}

#[async_trait]
impl AlarmRepository for FileAlarmRepository {
    async fn get_alarms(&self) -> anyhow::Result<Vec<Alarm>> {
        Ok(self.entries().await?.into_iter().map(|(_, alarm)| alarm).collect())
    }

    async fn get_alarm(&self, id: &str) -> anyhow::Result<Option<Alarm>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .map(|(_, alarm)| alarm)
            .find(|alarm| alarm.id == id))
    }

    async fn set_alarm(&self, alarm: Alarm) -> anyhow::Result<()> {
        if alarm.id.is_empty() {
            anyhow::bail!("cannot store an alarm without an id");
        }

        let existing = self
            .entries()
            .await?
            .into_iter()
            .find(|(_, stored)| stored.id == alarm.id)
            .map(|(path, _)| path);

        let target = match existing {
            Some(path) => path,
            None => {
                let mut dir = self.root.clone();
                dir.extend(&alarm.path);
                dir.join(format!("{}.{ALARM_EXTENSION}", alarm.id))
            }
        };

        // path is derived from the location on disk
        let stored = Alarm {
            path: Vec::new(),
            ..alarm
        };
        let content = toml::to_string(&stored).context("failed to serialize alarm")?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&target, content)
            .await
            .with_context(|| format!("failed to write {}", target.display()))?;

        trace!("stored alarm {} at {}", stored.id, target.display());
        Ok(())
    }

    async fn delete_alarm(&self, id: &str) -> anyhow::Result<()> {
        let existing = self
            .entries()
            .await?
            .into_iter()
            .find(|(_, alarm)| alarm.id == id);

        if let Some((path, _)) = existing {
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }

        Ok(())
    }
}

/// Load every alarm below `root`
///
/// Unreadable or malformed files, and files repeating an already-seen ID, are
/// logged and skipped so one bad file never hides the rest.
pub fn load_alarms_dir(root: &Path) -> anyhow::Result<Vec<Alarm>> {
    Ok(load_alarm_entries(root)?
        .into_iter()
        .map(|(_, alarm)| alarm)
        .collect())
}

fn load_alarm_entries(root: &Path) -> anyhow::Result<Vec<(PathBuf, Alarm)>> {
    if !root.exists() {
        warn!("alarms directory {} does not exist", root.display());
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    collect_files(root, &mut files)
        .with_context(|| format!("failed to read alarms directory {}", root.display()))?;
    files.sort();

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(files.len());

    for file in files {
        let alarm = match parse_alarm_file(root, &file) {
            Ok(alarm) => alarm,
            Err(e) => {
                warn!("skipping alarm file {}: {e:#}", file.display());
                continue;
            }
        };

        if !seen.insert(alarm.id.clone()) {
            warn!(
                "skipping alarm file {}: duplicate alarm id '{}'",
                file.display(),
                alarm.id
            );
            continue;
        }

        entries.push((file, alarm));
    }

    trace!("loaded {} alarms from {}", entries.len(), root.display());
    Ok(entries)
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else if path.extension().is_some_and(|ext| ext == ALARM_EXTENSION) {
            files.push(path);
        }
    }
    Ok(())
}

/// Parse one alarm file, deriving `path` (and a missing `id`) from its location
pub fn parse_alarm_file(root: &Path, file: &Path) -> anyhow::Result<Alarm> {
    let content = std::fs::read_to_string(file)?;
    let mut alarm: Alarm = toml::from_str(&content).context("invalid alarm definition")?;

    if alarm.id.is_empty() {
        alarm.id = file
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
    }

    alarm.path = file
        .parent()
        .and_then(|parent| parent.strip_prefix(root).ok())
        .map(|relative| {
            relative
                .components()
                .map(|segment| segment.as_os_str().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();

    Ok(alarm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const HEALTH: &str = r#"
name = "Payments API"
type = "endpoint-checker"
interval = "1m"

[config]
url = "https://payments.example.com/health"
expected_status = 200

[notifications.email]
to = ["ops@example.com"]
"#;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_path_and_id_derived_from_location() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "payments/api/health.toml", HEALTH);

        let alarms = load_alarms_dir(dir.path()).unwrap();

        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].id, "health");
        assert_eq!(alarms[0].path, vec!["payments".to_string(), "api".to_string()]);
        assert_eq!(alarms[0].notifications.email.to, vec!["ops@example.com".to_string()]);
    }

    #[test]
    fn test_malformed_and_duplicate_files_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a/health.toml", HEALTH);
        write(dir.path(), "b/health.toml", HEALTH);
        write(dir.path(), "broken.toml", "name = ");
        write(dir.path(), "notes.txt", "not an alarm");

        let alarms = load_alarms_dir(dir.path()).unwrap();

        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].path, vec!["a".to_string()]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let alarms = load_alarms_dir(&dir.path().join("missing")).unwrap();
        assert!(alarms.is_empty());
    }

    #[tokio::test]
    async fn test_set_and_delete_round_trip_on_disk() {
        let dir = TempDir::new().unwrap();
        let repo = FileAlarmRepository::new(dir.path());
        write(dir.path(), "payments/health.toml", HEALTH);

        let mut alarm = repo.get_alarm("health").await.unwrap().unwrap();
        alarm.name = "Renamed".to_string();
        repo.set_alarm(alarm).await.unwrap();

        let stored = repo.get_alarm("health").await.unwrap().unwrap();
        assert_eq!(stored.name, "Renamed");
        assert_eq!(stored.path, vec!["payments".to_string()]);

        repo.delete_alarm("health").await.unwrap();
        assert!(repo.get_alarms().await.unwrap().is_empty());
    }
}
