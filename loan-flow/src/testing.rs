//! Fakes shared by the unit tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::{
    decision::RandomSource,
    error::{FlowError, Result},
    identity::IdentityProvider,
    records::{LoanDecisionRecord, RecordStore, UserProfileRecord},
    session::Session,
    storage::{InMemorySessionStorage, SessionStorage},
};

/// Random source that replays scripted draws
#[derive(Debug, Default)]
pub struct ScriptedSource {
    units: VecDeque<f64>,
    amounts: VecDeque<u32>,
    indices: VecDeque<usize>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_units(mut self, units: impl IntoIterator<Item = f64>) -> Self {
        self.units.extend(units);
        self
    }

    pub fn with_amounts(mut self, amounts: impl IntoIterator<Item = u32>) -> Self {
        self.amounts.extend(amounts);
        self
    }

    pub fn with_indices(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.indices.extend(indices);
        self
    }
}

impl RandomSource for ScriptedSource {
    fn next_unit(&mut self) -> f64 {
        self.units.pop_front().expect("no scripted unit draw left")
    }

    fn next_between(&mut self, low: u32, high: u32) -> u32 {
        let amount = self.amounts.pop_front().expect("no scripted amount left");
        assert!((low..=high).contains(&amount), "scripted amount out of range");
        amount
    }

    fn next_index(&mut self, len: usize) -> usize {
        let index = self.indices.pop_front().expect("no scripted index left");
        assert!(index < len, "scripted index out of range");
        index
    }
}

pub struct FailingIdentityProvider;

#[async_trait]
impl IdentityProvider for FailingIdentityProvider {
    async fn sign_in(&self, _token: Option<&str>) -> Result<String> {
        Err(FlowError::Identity("provider unreachable".to_string()))
    }
}

/// Record store that remembers every call and can be told to fail
#[derive(Default)]
pub struct RecordingStore {
    pub fail: bool,
    pub profiles: Mutex<Vec<UserProfileRecord>>,
    pub decisions: Mutex<Vec<(String, LoanDecisionRecord)>>,
}

impl RecordingStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn profile_calls(&self) -> usize {
        self.profiles.lock().unwrap().len()
    }

    pub fn decision_calls(&self) -> usize {
        self.decisions.lock().unwrap().len()
    }
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn put_profile(&self, record: &UserProfileRecord) -> Result<()> {
        self.profiles.lock().unwrap().push(record.clone());
        if self.fail {
            return Err(FlowError::StorageError("store offline".to_string()));
        }
        Ok(())
    }

    async fn merge_decision(
        &self,
        _app_id: &str,
        user_id: &str,
        record: &LoanDecisionRecord,
    ) -> Result<()> {
        self.decisions
            .lock()
            .unwrap()
            .push((user_id.to_string(), record.clone()));
        if self.fail {
            return Err(FlowError::StorageError("store offline".to_string()));
        }
        Ok(())
    }
}

/// Session storage that can slow down or fail saves of decided sessions, and
/// hand out a stale copy on the next read
#[derive(Default)]
pub struct GatedStorage {
    inner: InMemorySessionStorage,
    decided_save_delay: Duration,
    decided_save_failures: AtomicUsize,
    stale: Mutex<Option<Session>>,
}

impl GatedStorage {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            decided_save_delay: delay,
            ..Self::default()
        }
    }

    pub fn failing(times: usize) -> Self {
        Self {
            decided_save_failures: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    pub fn serve_stale_once(&self, session: Session) {
        *self.stale.lock().unwrap() = Some(session);
    }
}

#[async_trait]
impl SessionStorage for GatedStorage {
    async fn save(&self, session: Session) -> Result<()> {
        if session.decision.is_some() {
            tokio::time::sleep(self.decided_save_delay).await;
            let failed = self
                .decided_save_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(FlowError::StorageError("session store offline".to_string()));
            }
        }
        self.inner.save(session).await
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        if let Some(stale) = self.stale.lock().unwrap().take() {
            return Ok(Some(stale));
        }
        self.inner.get(id).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.inner.delete(id).await
    }
}
