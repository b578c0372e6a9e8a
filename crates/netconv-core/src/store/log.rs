// # Record Log
//
// In-memory representation of the convergence log shared by every store
// implementation. Stores wrap it in their own lock and persistence strategy.
//
// ## Latest-wins rule
//
// Records are kept ordered by ID. The current record of an identity key is
// the one with the highest ID among the records sharing that key; older
// records stay in the log as history until explicitly removed.

use std::collections::BTreeMap;
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::model::{DesiredState, IdentityKey};
use crate::traits::{ConvergenceRecord, RecordId};

#[derive(Debug, Default, Clone)]
pub(crate) struct RecordLog {
    records: BTreeMap<RecordId, ConvergenceRecord>,
}

impl RecordLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_records(records: Vec<ConvergenceRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id(), r)).collect(),
        }
    }

    /// All records, oldest first
    pub(crate) fn to_vec(&self) -> Vec<ConvergenceRecord> {
        self.records.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    pub(crate) fn get(&self, id: &RecordId) -> Option<&ConvergenceRecord> {
        self.records.get(id)
    }

    pub(crate) fn find_current(&self, key: &IdentityKey) -> Option<&ConvergenceRecord> {
        self.records
            .values()
            .rev()
            .find(|record| key.matches(record.state()))
    }

    pub(crate) fn latest_for_host(&self, host: &str) -> Option<&ConvergenceRecord> {
        self.records
            .values()
            .rev()
            .find(|record| record.state().host == host)
    }

    pub(crate) fn history(&self, key: &IdentityKey) -> Vec<ConvergenceRecord> {
        self.records
            .values()
            .rev()
            .filter(|record| key.matches(record.state()))
            .cloned()
            .collect()
    }

    pub(crate) fn list_current(&self) -> Vec<ConvergenceRecord> {
        let mut current: BTreeMap<IdentityKey, &ConvergenceRecord> = BTreeMap::new();
        for record in self.records.values().rev() {
            current.entry(record.key()).or_insert(record);
        }
        current.into_values().cloned().collect()
    }

    pub(crate) fn append(&mut self, state: DesiredState) -> Result<ConvergenceRecord> {
        let id = self.next_id()?;
        let record = ConvergenceRecord::new(id, state);
        self.records.insert(id, record.clone());
        Ok(record)
    }

    pub(crate) fn replace(
        &mut self,
        id: &RecordId,
        state: DesiredState,
    ) -> Result<ConvergenceRecord> {
        let slot = self
            .records
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("record {}", id)))?;

        if slot.key() != state.identity_key() {
            return Err(Error::validation(format!(
                "Replacement for record {} must keep identity {}",
                id,
                slot.key()
            )));
        }

        *slot = ConvergenceRecord::new(*id, state);
        Ok(slot.clone())
    }

    pub(crate) fn remove(&mut self, id: &RecordId) -> bool {
        self.records.remove(id).is_some()
    }

    /// Fresh ID strictly greater than every ID in the log
    ///
    /// Wall-clock ULIDs are monotonic only within one process and one clock;
    /// a log reloaded after a clock step back still gets increasing IDs.
    fn next_id(&self) -> Result<RecordId> {
        let mut candidate = Ulid::new();
        if let Some(last) = self.records.keys().next_back() {
            if candidate <= last.as_ulid() {
                candidate = last
                    .as_ulid()
                    .increment()
                    .ok_or_else(|| Error::store("record id space exhausted"))?;
            }
        }
        Ok(RecordId::from_ulid(candidate))
    }
}
