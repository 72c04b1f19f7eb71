//! Weak, id-based object reference (spec §4.5 — C5). A `Lookup` never
//! borrows an object across calls: every use re-resolves through the
//! container, so an object can be replaced, deactivated or deleted between
//! two uses without leaving a dangling reference behind. The resolved
//! borrow only lives for the duration of the closure passed to `with*`.

use crate::container::ObjectContainer;
use crate::iface_ids;
use crate::ids::ObjectId;
use crate::object::{
    BalancerIface, DigitalActuatorIface, MutexTargetIface, Object, ProcessValueIn,
    ProcessValueOut, TemperatureSensorIface,
};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// A weak reference to an object inside a particular container, by id.
/// Cheap to clone and to store inside other objects (e.g. a `Mutex`
/// constraint's target, or a `Balanced` constraint's balancer).
#[derive(Clone)]
pub struct Lookup {
    container: Weak<RefCell<ObjectContainer>>,
    id: ObjectId,
}

impl Lookup {
    pub fn new(container: &Rc<RefCell<ObjectContainer>>, id: ObjectId) -> Self {
        Self { container: Rc::downgrade(container), id }
    }

    /// An unresolvable lookup: the container is gone or was never set.
    /// Useful as a placeholder before a target id is configured.
    pub fn none() -> Self {
        Self { container: Weak::new(), id: ObjectId::NONE }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn set_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    /// Resolve and run `f` against the raw object, if the container is
    /// still alive and the id still names a live entry.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn Object) -> R) -> Option<R> {
        if self.id.is_none() {
            return None;
        }
        let strong = self.container.upgrade()?;
        let mut container = strong.borrow_mut();
        let obj = container.fetch_mut(self.id)?;
        Some(f(obj))
    }

    pub fn with_digital_actuator<R>(&self, f: impl FnOnce(&mut dyn DigitalActuatorIface) -> R) -> Option<R> {
        self.with(|obj| obj.implements(iface_ids::DIGITAL_ACTUATOR)?.as_digital_actuator().map(f))?
    }

    pub fn with_process_value_in<R>(&self, f: impl FnOnce(&mut dyn ProcessValueIn) -> R) -> Option<R> {
        self.with(|obj| obj.implements(iface_ids::PROCESS_VALUE_IN)?.as_process_value_in().map(f))?
    }

    pub fn with_process_value_out<R>(&self, f: impl FnOnce(&mut dyn ProcessValueOut) -> R) -> Option<R> {
        self.with(|obj| obj.implements(iface_ids::PROCESS_VALUE_OUT)?.as_process_value_out().map(f))?
    }

    pub fn with_temperature_sensor<R>(&self, f: impl FnOnce(&mut dyn TemperatureSensorIface) -> R) -> Option<R> {
        self.with(|obj| obj.implements(iface_ids::TEMPERATURE_SENSOR)?.as_temperature_sensor().map(f))?
    }

    pub fn with_balancer<R>(&self, f: impl FnOnce(&mut dyn BalancerIface) -> R) -> Option<R> {
        self.with(|obj| obj.implements(iface_ids::BALANCER)?.as_balancer().map(f))?
    }

    pub fn with_mutex_target<R>(&self, f: impl FnOnce(&mut dyn MutexTargetIface) -> R) -> Option<R> {
        self.with(|obj| obj.implements(iface_ids::MUTEX_TARGET)?.as_mutex_target().map(f))?
    }
}
