//! Alarm sources
//!
//! The pipeline and the scheduler only ever read alarms through the
//! [`AlarmRepository`] trait, so an alarm can be edited or removed between
//! scheduling and execution without anything going stale.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Alarm;

/// Keyed store of alarm definitions
///
/// The key is the alarm ID; `set_alarm` is a full replace.
#[async_trait]
pub trait AlarmRepository: Send + Sync {
    async fn get_alarms(&self) -> anyhow::Result<Vec<Alarm>>;

    /// `Ok(None)` when no alarm has this ID
    async fn get_alarm(&self, id: &str) -> anyhow::Result<Option<Alarm>>;

    async fn set_alarm(&self, alarm: Alarm) -> anyhow::Result<()>;

    async fn delete_alarm(&self, id: &str) -> anyhow::Result<()>;
}

/// In-process alarm repository
#[derive(Debug, Default)]
pub struct MemoryAlarmRepository {
    alarms: RwLock<BTreeMap<String, Alarm>>,
}

impl MemoryAlarmRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alarms(alarms: impl IntoIterator<Item = Alarm>) -> Self {
        Self {
            alarms: RwLock::new(
                alarms
                    .into_iter()
                    .map(|alarm| (alarm.id.clone(), alarm))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl AlarmRepository for MemoryAlarmRepository {
    async fn get_alarms(&self) -> anyhow::Result<Vec<Alarm>> {
        Ok(self.alarms.read().await.values().cloned().collect())
    }

    async fn get_alarm(&self, id: &str) -> anyhow::Result<Option<Alarm>> {
        Ok(self.alarms.read().await.get(id).cloned())
    }

    async fn set_alarm(&self, alarm: Alarm) -> anyhow::Result<()> {
        if alarm.id.is_empty() {
            anyhow::bail!("cannot store an alarm without an id");
        }
        self.alarms.write().await.insert(alarm.id.clone(), alarm);
        Ok(())
    }

    async fn delete_alarm(&self, id: &str) -> anyhow::Result<()> {
        self.alarms.write().await.remove(id);
        Ok(())
    }
}
