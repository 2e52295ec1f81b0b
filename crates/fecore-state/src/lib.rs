//! Persistent metadata store: deployed functions and their last-known
//! containers, over `redb`. Grounded on `warpgrid-state/src/store.rs`'s
//! `StateStore` (JSON-encoded values under named tables, a `map_err!`-style
//! error translation, and an in-memory-backend test harness).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::debug;

use fecore_types::{BackendKind, Error, Function};

const FUNCTIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("functions");
const CONTAINERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("containers");

/// A last-known container row, reloaded as an idle `Replica` at startup
/// (SPEC_FULL.md §4.4, "Startup").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRow {
    pub name: String,
    pub parent_function: String,
    pub backend: BackendKind,
    pub ip: String,
}

macro_rules! map_err {
    ($e:expr) => {
        $e.map_err(|e| Error::Internal(anyhow::anyhow!(e.to_string())))
    };
}

#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let db = map_err!(Database::create(path))?;
        let store = StateStore { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        let db = map_err!(
            Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())
        )?;
        let store = StateStore { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> Result<(), Error> {
        let txn = map_err!(self.db.begin_write())?;
        {
            map_err!(txn.open_table(FUNCTIONS_TABLE))?;
            map_err!(txn.open_table(CONTAINERS_TABLE))?;
        }
        map_err!(txn.commit())?;
        Ok(())
    }

    pub fn put_function(&self, f: &Function) -> Result<(), Error> {
        let bytes = map_err!(serde_json::to_vec(f))?;
        let txn = map_err!(self.db.begin_write())?;
        {
            let mut table = map_err!(txn.open_table(FUNCTIONS_TABLE))?;
            map_err!(table.insert(f.name.as_str(), bytes.as_slice()))?;
        }
        map_err!(txn.commit())?;
        debug!(function = %f.name, "persisted function");
        Ok(())
    }

    pub fn get_function(&self, name: &str) -> Result<Option<Function>, Error> {
        let txn = map_err!(self.db.begin_read())?;
        let table = map_err!(txn.open_table(FUNCTIONS_TABLE))?;
        match map_err!(table.get(name))? {
            Some(v) => {
                let f: Function = map_err!(serde_json::from_slice(v.value()))?;
                Ok(Some(f))
            }
            None => Ok(None),
        }
    }

    pub fn remove_function(&self, name: &str) -> Result<bool, Error> {
        let txn = map_err!(self.db.begin_write())?;
        let existed;
        {
            let mut table = map_err!(txn.open_table(FUNCTIONS_TABLE))?;
            existed = map_err!(table.remove(name))?.is_some();
        }
        map_err!(txn.commit())?;
        Ok(existed)
    }

    pub fn list_functions(&self, namespace: Option<&str>) -> Result<Vec<Function>, Error> {
        let txn = map_err!(self.db.begin_read())?;
        let table = map_err!(txn.open_table(FUNCTIONS_TABLE))?;
        let mut out = Vec::new();
        for entry in map_err!(table.iter())? {
            let (_, v) = map_err!(entry)?;
            let f: Function = map_err!(serde_json::from_slice(v.value()))?;
            if namespace.is_none_or(|ns| ns == f.namespace) {
                out.push(f);
            }
        }
        Ok(out)
    }

    pub fn put_container(&self, c: &ContainerRow) -> Result<(), Error> {
        let bytes = map_err!(serde_json::to_vec(c))?;
        let txn = map_err!(self.db.begin_write())?;
        {
            let mut table = map_err!(txn.open_table(CONTAINERS_TABLE))?;
            map_err!(table.insert(c.name.as_str(), bytes.as_slice()))?;
        }
        map_err!(txn.commit())?;
        Ok(())
    }

    pub fn remove_container(&self, name: &str) -> Result<(), Error> {
        let txn = map_err!(self.db.begin_write())?;
        {
            let mut table = map_err!(txn.open_table(CONTAINERS_TABLE))?;
            map_err!(table.remove(name))?;
        }
        map_err!(txn.commit())?;
        Ok(())
    }

    pub fn list_containers_for_function(&self, fname: &str) -> Result<Vec<ContainerRow>, Error> {
        let txn = map_err!(self.db.begin_read())?;
        let table = map_err!(txn.open_table(CONTAINERS_TABLE))?;
        let mut out = Vec::new();
        for entry in map_err!(table.iter())? {
            let (_, v) = map_err!(entry)?;
            let c: ContainerRow = map_err!(serde_json::from_slice(v.value()))?;
            if c.parent_function == fname {
                out.push(c);
            }
        }
        Ok(out)
    }

    /// `UseDatabase = false` per config means the db file is removed on
    /// shutdown rather than persisted (SPEC_FULL.md §6).
    pub fn delete_file(path: &Path) -> std::io::Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
