use gpuwire_protocol::{ObjectHandle, ObjectId, ObjectType};

use crate::ClientError;

struct Slot<T> {
    generation: u32,
    refcount: u32,
    object: Option<T>,
}

/// Outcome of dropping one reference.
#[derive(Debug)]
pub enum Release<T> {
    /// The handle does not name a live object.
    Stale,
    /// Other references remain.
    Referenced,
    /// That was the last reference; the slot is free and the object is handed back.
    Freed(T),
}

/// Client-side identity table for one object type.
///
/// Ids are handed out eagerly, before the server has seen the create command. Id 0 is never
/// used. A fresh slot starts at generation 1, every free bumps it, and a slot whose generation
/// would wrap is retired for the rest of the session.
pub struct ObjectAllocator<T> {
    object_type: ObjectType,
    slots: Vec<Slot<T>>,
    free: Vec<ObjectId>,
    live: usize,
}

impl<T> ObjectAllocator<T> {
    pub fn new(object_type: ObjectType) -> Self {
        Self {
            object_type,
            slots: vec![Slot {
                generation: 0,
                refcount: 0,
                object: None,
            }],
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Reserve an id for `object` with a refcount of one.
    pub fn allocate(&mut self, object: T) -> Result<ObjectHandle, ClientError> {
        // Reuse the most recently freed id first.
        if let Some(id) = self.free.pop() {
            let slot = &mut self.slots[id as usize];
            slot.refcount = 1;
            slot.object = Some(object);
            self.live += 1;
            return Ok(ObjectHandle::new(id, slot.generation));
        }

        let id = ObjectId::try_from(self.slots.len()).map_err(|_| ClientError::IdsExhausted {
            object_type: self.object_type,
        })?;
        self.slots.push(Slot {
            generation: 1,
            refcount: 1,
            object: Some(object),
        });
        self.live += 1;
        Ok(ObjectHandle::new(id, 1))
    }

    /// Current generation of `id`, whether or not the slot is live.
    pub fn generation(&self, id: ObjectId) -> Option<u32> {
        if id == 0 {
            return None;
        }
        self.slots.get(id as usize).map(|slot| slot.generation)
    }

    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&T> {
        self.live_slot(handle)?.object.as_ref()
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut T> {
        self.live_slot_mut(handle)?.object.as_mut()
    }

    /// Like [`ObjectAllocator::get_mut`], reporting a missing object as an error.
    pub fn expect_mut(&mut self, handle: ObjectHandle) -> Result<&mut T, ClientError> {
        let object_type = self.object_type;
        self.get_mut(handle)
            .ok_or(ClientError::UnknownObject {
                object_type,
                handle,
            })
    }

    pub fn refcount(&self, handle: ObjectHandle) -> Option<u32> {
        self.live_slot(handle).map(|slot| slot.refcount)
    }

    /// Add a reference. Returns `false` if `handle` is stale.
    pub fn reference(&mut self, handle: ObjectHandle) -> bool {
        match self.live_slot_mut(handle) {
            Some(slot) => {
                slot.refcount = slot.refcount.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Drop a reference, freeing the slot when none remain.
    pub fn release(&mut self, handle: ObjectHandle) -> Release<T> {
        let Some(slot) = self.live_slot_mut(handle) else {
            return Release::Stale;
        };
        slot.refcount -= 1;
        if slot.refcount > 0 {
            return Release::Referenced;
        }
        match self.free(handle) {
            Some(object) => Release::Freed(object),
            None => Release::Stale,
        }
    }

    /// Free the slot regardless of its refcount.
    pub fn free(&mut self, handle: ObjectHandle) -> Option<T> {
        if handle.is_null() {
            return None;
        }
        let slot = self
            .slots
            .get_mut(handle.id as usize)
            .filter(|slot| slot.generation == handle.generation)?;
        let object = slot.object.take()?;
        slot.refcount = 0;
        match slot.generation.checked_add(1) {
            Some(next) => {
                slot.generation = next;
                self.free.push(handle.id);
            }
            None => tracing::debug!(
                object_type = ?self.object_type,
                id = handle.id,
                "retiring id after generation overflow"
            ),
        }
        self.live -= 1;
        Some(object)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(id, slot)| {
            let object = slot.object.as_ref()?;
            Some((ObjectHandle::new(id as ObjectId, slot.generation), object))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ObjectHandle, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(id, slot)| {
            let generation = slot.generation;
            let object = slot.object.as_mut()?;
            Some((ObjectHandle::new(id as ObjectId, generation), object))
        })
    }

    fn live_slot(&self, handle: ObjectHandle) -> Option<&Slot<T>> {
        if handle.is_null() {
            return None;
        }
        self.slots
            .get(handle.id as usize)
            .filter(|slot| slot.generation == handle.generation && slot.object.is_some())
    }

    fn live_slot_mut(&mut self, handle: ObjectHandle) -> Option<&mut Slot<T>> {
        if handle.is_null() {
            return None;
        }
        self.slots
            .get_mut(handle.id as usize)
            .filter(|slot| slot.generation == handle.generation && slot.object.is_some())
    }

    #[cfg(test)]
    fn force_generation(&mut self, id: ObjectId, generation: u32) {
        self.slots[id as usize].generation = generation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_one_with_generation_one() {
        let mut table = ObjectAllocator::new(ObjectType::Buffer);
        assert_eq!(table.allocate("a").unwrap(), ObjectHandle::new(1, 1));
        assert_eq!(table.allocate("b").unwrap(), ObjectHandle::new(2, 1));
        assert_eq!(table.len(), 2);
        assert_eq!(table.generation(0), None);
        assert_eq!(table.generation(2), Some(1));
        assert_eq!(table.generation(3), None);
    }

    #[test]
    fn free_bumps_generation_and_reuses_the_id() {
        let mut table = ObjectAllocator::new(ObjectType::Buffer);
        let a = table.allocate(10).unwrap();
        assert_eq!(table.free(a), Some(10));
        assert!(table.get(a).is_none());
        assert_eq!(table.generation(a.id), Some(2));

        let b = table.allocate(20).unwrap();
        assert_eq!(b, ObjectHandle::new(a.id, 2));
        assert_eq!(table.get(b), Some(&20));
        assert!(table.get(a).is_none());
        assert!(table.free(a).is_none());
    }

    #[test]
    fn release_frees_on_last_reference() {
        let mut table = ObjectAllocator::new(ObjectType::Queue);
        let h = table.allocate(()).unwrap();
        assert!(table.reference(h));
        assert_eq!(table.refcount(h), Some(2));
        assert!(matches!(table.release(h), Release::Referenced));
        assert!(matches!(table.release(h), Release::Freed(())));
        assert!(matches!(table.release(h), Release::Stale));
        assert!(!table.reference(h));
        assert!(table.is_empty());
    }

    #[test]
    fn null_and_out_of_range_handles_are_stale() {
        let mut table = ObjectAllocator::new(ObjectType::Texture);
        table.allocate(1).unwrap();
        assert!(table.get(ObjectHandle::NULL).is_none());
        assert!(table.get(ObjectHandle::new(99, 1)).is_none());
        assert!(matches!(
            table.expect_mut(ObjectHandle::new(99, 1)),
            Err(ClientError::UnknownObject { .. })
        ));
    }

    #[test]
    fn generation_overflow_retires_the_id() {
        let mut table = ObjectAllocator::new(ObjectType::Buffer);
        let h = table.allocate(1).unwrap();
        table.force_generation(h.id, u32::MAX);
        let h = ObjectHandle::new(h.id, u32::MAX);
        assert_eq!(table.free(h), Some(1));

        let next = table.allocate(2).unwrap();
        assert_ne!(next.id, h.id);
        assert!(table.get(h).is_none());
    }

    #[test]
    fn iter_visits_live_objects_in_id_order() {
        let mut table = ObjectAllocator::new(ObjectType::Device);
        let a = table.allocate('a').unwrap();
        let b = table.allocate('b').unwrap();
        let c = table.allocate('c').unwrap();
        table.free(b);
        let live: Vec<_> = table.iter().map(|(h, v)| (h, *v)).collect();
        assert_eq!(live, vec![(a, 'a'), (c, 'c')]);
        for (_, v) in table.iter_mut() {
            *v = 'z';
        }
        assert_eq!(table.get(c), Some(&'z'));
    }
}
