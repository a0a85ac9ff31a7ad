// vellum-core/src/object_store/memory_store.rs
// Volatile object store - for tests and ephemeral databases

use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::{IndexSpec, ObjectStore, WriteBatch};
use crate::document::Document;
use crate::error::{Result, VellumError};

/// Contents of one physical store, ordered by primary key
#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    pub indexes: Vec<IndexSpec>,
    pub docs: BTreeMap<String, Document>,
}

impl Table {
    pub fn new(indexes: &[IndexSpec]) -> Self {
        Table {
            indexes: indexes.to_vec(),
            docs: BTreeMap::new(),
        }
    }

    pub fn apply(&mut self, batch: WriteBatch) {
        for id in &batch.removals {
            self.docs.remove(id);
        }
        for doc in batch.upserts {
            self.docs.insert(doc.id().to_string(), doc);
        }
    }

    pub fn range(&self, offset: Option<&str>, limit: Option<usize>) -> Vec<Document> {
        let limit = limit.unwrap_or(usize::MAX);
        match offset {
            Some(from) => self
                .docs
                .range(from.to_string()..)
                .take(limit)
                .map(|(_, doc)| doc.clone())
                .collect(),
            None => self.docs.values().take(limit).cloned().collect(),
        }
    }
}

/// Look up a table or fail with `CollectionNotFound`
pub(crate) fn table<'a>(tables: &'a BTreeMap<String, Table>, name: &str) -> Result<&'a Table> {
    tables
        .get(name)
        .ok_or_else(|| VellumError::CollectionNotFound(name.to_string()))
}

pub(crate) fn table_mut<'a>(tables: &'a mut BTreeMap<String, Table>, name: &str) -> Result<&'a mut Table> {
    tables
        .get_mut(name)
        .ok_or_else(|| VellumError::CollectionNotFound(name.to_string()))
}

/// In-memory object store
#[derive(Default)]
pub struct MemoryObjectStore {
    tables: RwLock<BTreeMap<String, Table>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn create_store(&self, name: &str, indexes: &[IndexSpec]) -> Result<()> {
        self.tables
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Table::new(indexes));
        Ok(())
    }

    fn store_names(&self) -> Result<Vec<String>> {
        Ok(self.tables.read().keys().cloned().collect())
    }

    fn get_all(&self, name: &str) -> Result<Vec<Document>> {
        let tables = self.tables.read();
        Ok(table(&tables, name)?.range(None, None))
    }

    fn get_range(&self, name: &str, offset: Option<&str>, limit: Option<usize>) -> Result<Vec<Document>> {
        let tables = self.tables.read();
        Ok(table(&tables, name)?.range(offset, limit))
    }

    fn put(&self, name: &str, document: Document) -> Result<()> {
        let mut tables = self.tables.write();
        table_mut(&mut tables, name)?
            .docs
            .insert(document.id().to_string(), document);
        Ok(())
    }

    fn delete(&self, name: &str, id: &str) -> Result<()> {
        let mut tables = self.tables.write();
        table_mut(&mut tables, name)?.docs.remove(id);
        Ok(())
    }

    fn clear(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.write();
        table_mut(&mut tables, name)?.docs.clear();
        Ok(())
    }

    fn commit(&self, name: &str, batch: WriteBatch) -> Result<()> {
        let mut tables = self.tables.write();
        table_mut(&mut tables, name)?.apply(batch);
        Ok(())
    }
}
