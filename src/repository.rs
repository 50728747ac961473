//! Typed persistence helpers over the record model.
//!
//! `Repository<T>` gives the classic find/store/remove surface for any type
//! implementing [`DomainObject`], mapping between typed values and records
//! with serde. Field accessors are declared explicitly by the trait - there
//! is no runtime reflection.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::execution::{ExecutionResult, OperationContext};
use crate::storage::{EntityId, EntityName, Record, StorageError};

/// Identity and version contract for optimistically-locked domain types.
///
/// `version` is the optimistic-locking token managed by the storage layer:
/// repositories write the bumped version back after every store, and a
/// store against a stale token fails the attempt (and triggers a retry at
/// the engine level).
pub trait DomainObject: Serialize + DeserializeOwned {
    /// storage entity name for this type
    const ENTITY: &'static str;

    fn id(&self) -> EntityId;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

/// Typed access to one entity.
pub struct Repository<T: DomainObject> {
    entity: EntityName,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DomainObject> Repository<T> {
    pub fn new() -> ExecutionResult<Self> {
        let entity = EntityName::new(T::ENTITY).map_err(StorageError::from)?;
        Ok(Self {
            entity,
            _marker: PhantomData,
        })
    }

    pub fn entity(&self) -> &EntityName {
        &self.entity
    }

    /// Load an object by identifier.
    pub fn get(&self, cx: &mut OperationContext, id: &EntityId) -> ExecutionResult<Option<T>> {
        let record = cx.session()?.get(&self.entity, id)?;
        record.map(Self::from_record).transpose()
    }

    /// Find an object by identifier.
    pub fn find_by_id(&self, cx: &mut OperationContext, id: &EntityId) -> ExecutionResult<Option<T>> {
        self.get(cx, id)
    }

    /// Load every object of the managed type, ordered by identifier.
    pub fn find_all(&self, cx: &mut OperationContext) -> ExecutionResult<Vec<T>> {
        let records = cx.session()?.find_all(&self.entity)?;
        records.into_iter().map(Self::from_record).collect()
    }

    /// Count the objects of the managed type.
    pub fn count(&self, cx: &mut OperationContext) -> ExecutionResult<u64> {
        Ok(cx.session()?.count(&self.entity)?)
    }

    /// Persist the object, writing the bumped version back into it.
    pub fn store(&self, cx: &mut OperationContext, object: &mut T) -> ExecutionResult<()> {
        let record = Self::to_record(object)?;
        let updated = cx.session()?.save_or_update(&self.entity, record)?;
        object.set_version(updated.version());
        Ok(())
    }

    /// Re-read the object from storage.
    ///
    /// Any changes made to the object since the last store are lost, so
    /// call this before mutating.
    pub fn refresh(&self, cx: &mut OperationContext, object: &mut T) -> ExecutionResult<()> {
        let record = cx.session()?.refresh(&self.entity, &object.id())?;
        *object = Self::from_record(record)?;
        Ok(())
    }

    /// Delete the object from storage.
    pub fn remove(&self, cx: &mut OperationContext, object: &T) -> ExecutionResult<()> {
        cx.session()?.delete(&self.entity, &object.id())?;
        Ok(())
    }

    fn to_record(object: &T) -> ExecutionResult<Record> {
        let value =
            serde_json::to_value(object).map_err(|e| StorageError::Mapping(e.to_string()))?;
        let Value::Object(map) = value else {
            return Err(StorageError::Mapping(format!(
                "{} must serialize to an object",
                T::ENTITY
            ))
            .into());
        };
        let data: BTreeMap<String, Value> = map.into_iter().collect();
        Ok(Record::from_data(object.id(), data).with_version(object.version()))
    }

    fn from_record(record: Record) -> ExecutionResult<T> {
        let version = record.version();
        let map: serde_json::Map<String, Value> = record.into_data().into_iter().collect();
        let mut object: T = serde_json::from_value(Value::Object(map))
            .map_err(|e| StorageError::Mapping(e.to_string()))?;
        object.set_version(version);
        Ok(object)
    }
}
