use std::collections::HashMap;

use gpuwire_protocol::{
    AllocationFailure, ObjectHandle, ObjectId, ObjectType, Resolution, WireError,
};

use crate::BackendId;

/// Contents of a live server slot.
#[derive(Debug, PartialEq, Eq)]
pub enum Entry<T> {
    Valid(T),
    /// Placeholder for an object whose creation failed or whose inputs were invalid.
    Error,
}

struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

/// Server-side identity table for one object type.
///
/// Ids are chosen by the client, so allocation validates instead of choosing: the id must be
/// free and at most one past the highest id seen, and the generation must move forward.
pub struct KnownObjects<T> {
    object_type: ObjectType,
    slots: Vec<Slot<T>>,
}

impl<T> KnownObjects<T> {
    pub fn new(object_type: ObjectType) -> Self {
        Self {
            object_type,
            slots: vec![Slot {
                generation: 0,
                entry: None,
            }],
        }
    }

    /// Reserve the slot for `handle` as an error placeholder. Fill it with
    /// [`KnownObjects::set`] once the backend object exists.
    pub fn allocate(&mut self, handle: ObjectHandle) -> Result<(), WireError> {
        let fail = |reason| WireError::ObjectAllocation {
            object_type: self.object_type,
            handle,
            reason,
        };
        let id = handle.id as usize;
        if id == 0 || id > self.slots.len() {
            return Err(fail(AllocationFailure::IdOutOfRange));
        }
        if id == self.slots.len() {
            self.slots.push(Slot {
                generation: 0,
                entry: None,
            });
        }

        let slot = &self.slots[id];
        if slot.entry.is_some() {
            return Err(fail(AllocationFailure::AlreadyLive));
        }
        if handle.generation <= slot.generation {
            return Err(fail(AllocationFailure::StaleGeneration));
        }

        let slot = &mut self.slots[id];
        slot.generation = handle.generation;
        slot.entry = Some(Entry::Error);
        Ok(())
    }

    /// Bind a backend object to a slot reserved by [`KnownObjects::allocate`].
    pub fn set(&mut self, handle: ObjectHandle, object: T) {
        if let Some(slot) = self.live_slot_mut(handle) {
            slot.entry = Some(Entry::Valid(object));
        }
    }

    pub fn resolve(&self, handle: ObjectHandle) -> Resolution {
        match self.live_slot(handle).and_then(|slot| slot.entry.as_ref()) {
            Some(Entry::Valid(_)) => Resolution::Valid,
            Some(Entry::Error) => Resolution::ErrorObject,
            None => Resolution::Stale,
        }
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&T> {
        match self.live_slot(handle)?.entry.as_ref()? {
            Entry::Valid(object) => Some(object),
            Entry::Error => None,
        }
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut T> {
        match self.live_slot_mut(handle)?.entry.as_mut()? {
            Entry::Valid(object) => Some(object),
            Entry::Error => None,
        }
    }

    /// Generation last allocated for `id`, live or not.
    pub fn generation(&self, id: ObjectId) -> Option<u32> {
        if id == 0 {
            return None;
        }
        self.slots.get(id as usize).map(|slot| slot.generation)
    }

    /// Free a live slot. `None` if `handle` is stale.
    pub fn free(&mut self, handle: ObjectHandle) -> Option<Entry<T>> {
        self.live_slot_mut(handle)?.entry.take()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_slot(&self, handle: ObjectHandle) -> Option<&Slot<T>> {
        if handle.is_null() {
            return None;
        }
        self.slots
            .get(handle.id as usize)
            .filter(|slot| slot.generation == handle.generation && slot.entry.is_some())
    }

    fn live_slot_mut(&mut self, handle: ObjectHandle) -> Option<&mut Slot<T>> {
        if handle.is_null() {
            return None;
        }
        self.slots
            .get_mut(handle.id as usize)
            .filter(|slot| slot.generation == handle.generation && slot.entry.is_some())
    }
}

/// Maps backend objects back to the client handles that name them.
#[derive(Debug, Default)]
pub struct ReverseIdTable {
    map: HashMap<(ObjectType, BackendId), ObjectHandle>,
}

impl ReverseIdTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, object_type: ObjectType, backend: BackendId, handle: ObjectHandle) {
        if let Some(previous) = self.map.insert((object_type, backend), handle) {
            tracing::debug!(
                ?object_type,
                backend = backend.0,
                %previous,
                %handle,
                "backend object re-registered"
            );
        }
    }

    pub fn get(&self, object_type: ObjectType, backend: BackendId) -> Option<ObjectHandle> {
        self.map.get(&(object_type, backend)).copied()
    }

    /// Remove the entry for `backend` if it still points at `handle`.
    pub fn remove(&mut self, object_type: ObjectType, backend: BackendId, handle: ObjectHandle) {
        if self.get(object_type, backend) == Some(handle) {
            self.map.remove(&(object_type, backend));
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
