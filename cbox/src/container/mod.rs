//! Object container (spec §3.2, §4.3 — C3) and the weak, container-resolved
//! [`crate::lookup::Lookup`] handle (§4.5 — C5) it backs.
//!
//! The container is shared via `Rc<RefCell<..>>` rather than the original's
//! raw C++ reference, because objects inside the container hold lookup
//! handles back into the *same* container: a plain `&mut ObjectContainer`
//! can't be re-borrowed from inside an object's own `update()` call. To keep
//! that safe, [`Container::update`] removes each object from the map before
//! calling its `update()`, so no borrow is held while the object (and any
//! lookup it performs) runs, then reinserts it.

use crate::error::{CboxResult, StatusCode};
use crate::ids::{is_due, ObjectId, TypeId, UpdateTime};
use crate::object::{InactiveObject, Object};
use cbox_stream::{DataIn, DataOut};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Reserved bit of the group mask: an object with this bit set is a system
/// object and can never be deleted; the bit is preserved across any
/// overwrite of the group mask (spec §3.2).
pub const SYSTEM_GROUP_BIT: u8 = 0x80;

/// A single active entry: id, group mask, boxed object, and the scheduler's
/// bookkeeping of when to call `update` again (spec §3.2).
pub struct ContainedObject {
    id: ObjectId,
    groups: u8,
    object: Box<dyn Object>,
    next_update: UpdateTime,
}

impl ContainedObject {
    pub fn new(id: ObjectId, groups: u8, object: Box<dyn Object>) -> Self {
        Self { id, groups, object, next_update: 0 }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn groups(&self) -> u8 {
        self.groups
    }

    pub fn object(&self) -> &dyn Object {
        self.object.as_ref()
    }

    pub fn object_mut(&mut self) -> &mut dyn Object {
        self.object.as_mut()
    }

    pub fn next_update(&self) -> UpdateTime {
        self.next_update
    }

    /// Replace the live object with an `InactiveObject` carrying its
    /// original type, preserving id and groups (spec §3.2, §4.3).
    pub fn deactivate(&mut self) {
        let original_type = self.object.type_id();
        self.object = Box::new(InactiveObject::new(original_type));
    }

    pub fn reactivate(&mut self, object: Box<dyn Object>) {
        self.object = object;
        self.next_update = 0;
    }

    /// Run `update` only if scheduled (wrap-safe), per spec §4.3.
    pub fn update(&mut self, now: UpdateTime) {
        if is_due(now, self.next_update) {
            self.next_update = self.object.update(now);
        }
    }

    /// Run `update` unconditionally (`forcedUpdate`, spec §4.3).
    pub fn forced_update(&mut self, now: UpdateTime) {
        self.next_update = self.object.update(now);
    }

    pub fn stream_to(&self, out: &mut dyn DataOut) -> CboxResult<()> {
        out.put_u16(self.id.0).map_err(StatusCode::from)?;
        out.write(self.groups).map_err(StatusCode::from)?;
        out.put_u16(self.object.type_id().0).map_err(StatusCode::from)?;
        self.object.stream_to(out)
    }

    /// `id` is not streamed in: it is immutable and already known from the
    /// request that located this entry (spec §3.2 / ContainedObject.h).
    pub fn stream_from(&mut self, input: &mut dyn DataIn) -> CboxResult<()> {
        let new_groups = input.next().map_err(StatusCode::from)?;
        let expected_type = TypeId(input.get_u16().map_err(StatusCode::from)?);
        if expected_type != self.object.type_id() {
            return Err(StatusCode::InvalidObjectType);
        }
        if self.groups & SYSTEM_GROUP_BIT != 0 {
            self.groups = new_groups | SYSTEM_GROUP_BIT;
        } else {
            self.groups = new_groups & !SYSTEM_GROUP_BIT;
        }
        self.object.stream_from(input)
    }

    pub fn stream_persisted_to(&self, out: &mut dyn DataOut) -> CboxResult<()> {
        if self.object.is_inactive() {
            // inactive objects are never reached here in practice: a write
            // temporarily reactivates before storing.
            return Ok(());
        }
        out.write(self.groups).map_err(StatusCode::from)?;
        out.put_u16(self.object.type_id().0).map_err(StatusCode::from)?;
        self.object.stream_persisted_to(out)
    }
}

/// The ordered `id -> ContainedObject` map plus the active-group mask
/// (spec §4.3). `BTreeMap` gives ascending-id iteration, which the original
/// `std::map`-backed container also provides and which LIST_* commands
/// (§4.7) rely on for deterministic output.
pub struct ObjectContainer {
    objects: BTreeMap<ObjectId, ContainedObject>,
    active_groups: u8,
}

impl Default for ObjectContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectContainer {
    pub fn new() -> Self {
        // system group (bit 7) and first user group (bit 0) active by default,
        // matching Box's `activeGroups = 0x81` default.
        Self { objects: BTreeMap::new(), active_groups: 0x81 }
    }

    pub fn add(&mut self, id: ObjectId, groups: u8, object: Box<dyn Object>) {
        self.objects.insert(id, ContainedObject::new(id, groups, object));
    }

    /// Forbidden for ids below `USER_START` (spec §4.3/§4.7).
    pub fn remove(&mut self, id: ObjectId) -> CboxResult<()> {
        if id.is_system() {
            return Err(StatusCode::ObjectNotDeletable);
        }
        self.objects.remove(&id).map(|_| ()).ok_or(StatusCode::InvalidObjectId)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&ContainedObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut ContainedObject> {
        self.objects.get_mut(&id)
    }

    pub fn fetch_mut(&mut self, id: ObjectId) -> Option<&mut dyn Object> {
        self.objects.get_mut(&id).map(|c| c.object_mut())
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.objects.keys().copied().collect()
    }

    pub fn active_groups(&self) -> u8 {
        self.active_groups
    }

    /// First unused id at or above `USER_START`, for auto-assignment by
    /// CREATE_OBJECT(id=0) and DISCOVER_NEW_OBJECTS (spec §4.6/§4.7).
    pub fn next_free_user_id(&self) -> ObjectId {
        let mut candidate = ObjectId::USER_START;
        for &id in self.objects.keys() {
            if id.0 == candidate {
                candidate += 1;
            } else if id.0 > candidate {
                break;
            }
        }
        ObjectId(candidate)
    }

    fn take(&mut self, id: ObjectId) -> Option<ContainedObject> {
        self.objects.remove(&id)
    }

    fn put_back(&mut self, co: ContainedObject) {
        self.objects.insert(co.id(), co);
    }

    /// Any object whose `groups & mask == 0` becomes inactive; any inactive
    /// entry whose groups now intersect `mask` is handed a freshly
    /// reconstructed object via `reload` (spec §4.3). `reload` typically
    /// pulls the persisted bytes back from storage.
    pub fn set_active_groups(
        &mut self,
        mask: u8,
        mut reload: impl FnMut(ObjectId, TypeId) -> Option<Box<dyn Object>>,
    ) {
        self.active_groups = mask;
        for co in self.objects.values_mut() {
            let active = co.groups() & mask != 0;
            if !active {
                co.deactivate();
            } else if co.object().is_inactive() {
                if let Some(fresh) = reload(co.id(), co.object().type_id()) {
                    co.reactivate(fresh);
                }
            }
        }
    }
}

/// Shared handle to an [`ObjectContainer`]. Cloning is cheap (an `Rc`
/// bump); every clone refers to the same underlying container.
#[derive(Clone)]
pub struct Container(Rc<RefCell<ObjectContainer>>);

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    pub fn new() -> Self {
        Container(Rc::new(RefCell::new(ObjectContainer::new())))
    }

    pub fn add(&self, id: ObjectId, groups: u8, object: Box<dyn Object>) {
        self.0.borrow_mut().add(id, groups, object);
    }

    pub fn remove(&self, id: ObjectId) -> CboxResult<()> {
        self.0.borrow_mut().remove(id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.0.borrow().contains(id)
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.0.borrow().ids()
    }

    pub fn active_groups(&self) -> u8 {
        self.0.borrow().active_groups()
    }

    pub fn next_free_user_id(&self) -> ObjectId {
        self.0.borrow().next_free_user_id()
    }

    /// A weak, container-resolved handle to `id` (spec §4.5 — C5).
    pub fn lookup(&self, id: ObjectId) -> crate::lookup::Lookup {
        crate::lookup::Lookup::new(&self.0, id)
    }

    /// Run a closure against the raw container (used by the dispatcher and
    /// the storage/container bridge, where no object update is in flight so
    /// holding the borrow for the duration is safe).
    pub fn with<R>(&self, f: impl FnOnce(&mut ObjectContainer) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }

    /// `update(now)`: scheduled tick over every contained object (spec
    /// §4.3). See module docs for why each object is removed before its
    /// `update()` runs.
    pub fn update(&self, now: UpdateTime) {
        self.update_impl(now, false);
    }

    /// `forcedUpdate(now)`: ignore scheduling, update everything.
    pub fn forced_update(&self, now: UpdateTime) {
        self.update_impl(now, true);
    }

    fn update_impl(&self, now: UpdateTime, forced: bool) {
        let ids = self.0.borrow().ids();
        for id in ids {
            let mut contained = match self.0.borrow_mut().take(id) {
                Some(c) => c,
                None => continue, // removed by another object's update this tick
            };
            if forced {
                contained.forced_update(now);
            } else {
                contained.update(now);
            }
            self.0.borrow_mut().put_back(contained);
        }
    }

    pub fn set_active_groups_and_update_objects(
        &self,
        mask: u8,
        reload: impl FnMut(ObjectId, TypeId) -> Option<Box<dyn Object>>,
    ) {
        self.0.borrow_mut().set_active_groups(mask, reload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::InterfaceId;
    use crate::object::InterfaceRef;

    struct Dummy(TypeId, UpdateTime);
    impl Object for Dummy {
        fn type_id(&self) -> TypeId {
            self.0
        }
        fn stream_from(&mut self, _input: &mut dyn DataIn) -> CboxResult<()> {
            Ok(())
        }
        fn stream_to(&self, _output: &mut dyn DataOut) -> CboxResult<()> {
            Ok(())
        }
        fn stream_persisted_to(&self, _output: &mut dyn DataOut) -> CboxResult<()> {
            Ok(())
        }
        fn update(&mut self, now: UpdateTime) -> UpdateTime {
            now + self.1
        }
        fn implements(&mut self, iface: InterfaceId) -> Option<InterfaceRef<'_>> {
            if iface.0 == self.0 .0 {
                Some(InterfaceRef::SelfRef(self))
            } else {
                None
            }
        }
    }

    #[test]
    fn cannot_remove_system_object() {
        let c = Container::new();
        c.add(ObjectId(1), SYSTEM_GROUP_BIT, Box::new(Dummy(TypeId(1), 1000)));
        assert_eq!(c.remove(ObjectId(1)), Err(StatusCode::ObjectNotDeletable));
        assert!(c.contains(ObjectId(1)));
    }

    #[test]
    fn remove_missing_user_object_fails() {
        let c = Container::new();
        assert_eq!(c.remove(ObjectId(150)), Err(StatusCode::InvalidObjectId));
    }

    #[test]
    fn next_free_user_id_skips_taken_ids() {
        let c = Container::new();
        c.add(ObjectId(100), 1, Box::new(Dummy(TypeId(1), 1000)));
        c.add(ObjectId(101), 1, Box::new(Dummy(TypeId(1), 1000)));
        assert_eq!(c.next_free_user_id(), ObjectId(102));
    }

    #[test]
    fn update_respects_schedule() {
        let c = Container::new();
        c.add(ObjectId(100), 1, Box::new(Dummy(TypeId(1), 500)));
        c.update(0); // first tick always runs (next_update starts at 0)
        let next = c.with(|cont| cont.get(ObjectId(100)).unwrap().next_update());
        assert_eq!(next, 500);
        c.update(100); // not due yet
        let next = c.with(|cont| cont.get(ObjectId(100)).unwrap().next_update());
        assert_eq!(next, 500);
        c.update(500); // due
        let next = c.with(|cont| cont.get(ObjectId(100)).unwrap().next_update());
        assert_eq!(next, 1000);
    }

    #[test]
    fn inactive_group_mask_replaces_with_inactive_object() {
        let c = Container::new();
        c.add(ObjectId(100), 0x01, Box::new(Dummy(TypeId(7), 1000)));
        c.set_active_groups_and_update_objects(0x02, |_, _| None);
        let is_inactive = c.with(|cont| cont.get(ObjectId(100)).unwrap().object().is_inactive());
        assert!(is_inactive);
    }
}
