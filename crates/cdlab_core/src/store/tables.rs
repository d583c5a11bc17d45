//! In-memory record tables.

use crate::record::{Record, RecordId};
use crate::store::graph::GraphView;
use std::collections::{BTreeMap, HashMap};

/// Records grouped by entity, plus an identity index.
///
/// Each entity table is ordered by identity, which gives scans a stable
/// order for an unchanged store.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    entities: HashMap<String, BTreeMap<RecordId, Record>>,
    owners: HashMap<RecordId, String>,
}

impl Tables {
    pub(crate) fn get(&self, id: RecordId) -> Option<&Record> {
        let entity = self.owners.get(&id)?;
        self.entities.get(entity)?.get(&id)
    }

    pub(crate) fn insert(&mut self, record: Record) {
        let id = record.id();
        let entity = record.entity().to_string();
        self.owners.insert(id, entity.clone());
        self.entities.entry(entity).or_default().insert(id, record);
    }

    pub(crate) fn take(&mut self, id: RecordId) -> Option<Record> {
        let entity = self.owners.remove(&id)?;
        self.entities.get_mut(&entity)?.remove(&id)
    }

    /// Records of one entity in identity order.
    pub(crate) fn entity(&self, entity: &str) -> impl Iterator<Item = &Record> {
        self.entities.get(entity).into_iter().flat_map(BTreeMap::values)
    }

    /// Every record, grouped by entity.
    pub(crate) fn all(&self) -> impl Iterator<Item = &Record> {
        self.entities.values().flat_map(BTreeMap::values)
    }

    pub(crate) fn len(&self) -> usize {
        self.owners.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entities.clear();
        self.owners.clear();
    }
}

impl GraphView for Tables {
    fn load(&self, id: RecordId) -> Option<Record> {
        self.get(id).cloned()
    }

    fn put(&mut self, record: Record) {
        self.insert(record);
    }

    fn remove(&mut self, id: RecordId) {
        self.take(id);
    }
}
