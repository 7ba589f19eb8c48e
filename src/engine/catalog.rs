use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::error::HostError;
use crate::engine::types::{Attribute, AttrNumber, FIRST_NORMAL_OID, Oid, TupleDesc};

/// Catalog entry for a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationInfo {
    pub oid: Oid,
    pub name: String,
    pub namespace: Oid,
    pub desc: TupleDesc,
    pub primary_key: Option<AttrNumber>,
}

/// Column definition used by `create_table`.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub not_null: bool,
}

impl ColumnDef {
    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            not_null: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

/// Schemas and tables, addressable by OID and by name.
#[derive(Debug)]
pub struct Catalog {
    next_oid: Oid,
    namespaces: HashMap<String, Oid>,
    relations: HashMap<Oid, Arc<RelationInfo>>,
    by_name: HashMap<(Oid, String), Oid>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            next_oid: FIRST_NORMAL_OID,
            namespaces: HashMap::new(),
            relations: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    fn allocate_oid(&mut self) -> Oid {
        let oid = self.next_oid;
        self.next_oid += 1;
        oid
    }

    pub fn namespace_oid(&self, name: &str) -> Option<Oid> {
        self.namespaces.get(name).copied()
    }

    pub fn relation_oid(&self, name: &str, namespace: Oid) -> Option<Oid> {
        self.by_name.get(&(namespace, name.to_string())).copied()
    }

    pub fn relation(&self, oid: Oid) -> Option<Arc<RelationInfo>> {
        self.relations.get(&oid).cloned()
    }

    pub fn create_namespace(&mut self, name: &str) -> Result<Oid, HostError> {
        if self.namespaces.contains_key(name) {
            return Err(HostError::DuplicateSchema(name.to_string()));
        }
        let oid = self.allocate_oid();
        self.namespaces.insert(name.to_string(), oid);
        Ok(oid)
    }

    pub fn create_table(
        &mut self,
        namespace: &str,
        name: &str,
        columns: &[ColumnDef],
        primary_key: Option<&str>,
    ) -> Result<Arc<RelationInfo>, HostError> {
        let nsp = self
            .namespace_oid(namespace)
            .ok_or_else(|| HostError::UndefinedSchema(namespace.to_string()))?;
        if self.relation_oid(name, nsp).is_some() {
            return Err(HostError::DuplicateTable(name.to_string()));
        }
        let mut attrs: Vec<Attribute> = columns
            .iter()
            .map(|c| Attribute {
                name: c.name.clone(),
                not_null: c.not_null,
            })
            .collect();
        let pk = match primary_key {
            Some(column) => {
                let idx = attrs
                    .iter()
                    .position(|a| a.name == column)
                    .ok_or_else(|| HostError::UndefinedColumn(column.to_string()))?;
                // A primary key implies NOT NULL.
                attrs[idx].not_null = true;
                Some((idx + 1) as AttrNumber)
            }
            None => None,
        };
        let info = Arc::new(RelationInfo {
            oid: self.allocate_oid(),
            name: name.to_string(),
            namespace: nsp,
            desc: TupleDesc::new(attrs),
            primary_key: pk,
        });
        self.insert_relation(Arc::clone(&info));
        Ok(info)
    }

    pub fn drop_relation(&mut self, oid: Oid) -> Option<Arc<RelationInfo>> {
        let info = self.relations.remove(&oid)?;
        self.by_name.remove(&(info.namespace, info.name.clone()));
        Some(info)
    }

    pub fn drop_namespace(&mut self, name: &str) -> Result<Oid, HostError> {
        let oid = self
            .namespace_oid(name)
            .ok_or_else(|| HostError::UndefinedSchema(name.to_string()))?;
        if self.relations.values().any(|r| r.namespace == oid) {
            return Err(HostError::SchemaNotEmpty(name.to_string()));
        }
        self.namespaces.remove(name);
        Ok(oid)
    }

    /// Re-register a namespace read back from durable storage.
    pub fn restore_namespace(&mut self, name: &str, oid: Oid) {
        self.namespaces.insert(name.to_string(), oid);
        self.next_oid = self.next_oid.max(oid + 1);
    }

    /// Re-register a relation read back from durable storage.
    pub fn restore_relation(&mut self, info: RelationInfo) {
        self.next_oid = self.next_oid.max(info.oid + 1);
        self.insert_relation(Arc::new(info));
    }

    fn insert_relation(&mut self, info: Arc<RelationInfo>) {
        self.by_name
            .insert((info.namespace, info.name.clone()), info.oid);
        self.relations.insert(info.oid, info);
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
