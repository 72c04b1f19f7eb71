//! The object capability set of spec §4.4 (C4): every contained object
//! exposes `{typeId, streamFrom, streamTo, streamPersistedTo, update,
//! implements}`. Rust has no runtime trait-to-trait cast, so the interface
//! query returns a closed [`InterfaceRef`] enum instead of an arbitrary
//! `dyn Any` — every interface this firmware image knows about is a variant,
//! which is also a closer match to the original's "stable numbering agreed
//! with external clients" (§6) than an open-ended `Any` downcast would be.

use crate::error::CboxResult;
use crate::ids::{update_never, InterfaceId, TypeId, UpdateTime};
use cbox_stream::{DataIn, DataOut};

/// A digital actuator's desired-state, duration-query and fast-path surface,
/// as consumed by the PWM actuator (C10) looking up its target (C9) and by
/// constraints looking up a mutex's co-actuator.
pub trait DigitalActuatorIface {
    fn state(&self) -> crate::control::digital::DigitalState;
    fn desired_state(&mut self, state: crate::control::digital::DigitalState, now: UpdateTime) -> UpdateTime;
    fn active_durations(&self, now: UpdateTime) -> crate::control::digital::ActiveDurations;
    fn supports_fast_io(&self) -> bool;
    fn set_state_unlogged(&mut self, state: crate::control::digital::DigitalState);
    fn limiting(&self) -> u8;
}

/// A scalar input a PID or balancer reads: a setpoint/value pair with
/// validity (spec §4.11 step 1).
pub trait ProcessValueIn {
    fn setting(&self) -> crate::fixedpoint::Scalar;
    fn value(&self) -> Option<crate::fixedpoint::Scalar>;
    fn valid(&self) -> bool;
}

/// A scalar output a PID or PWM drives: a setting with clamping range and
/// validity flag.
pub trait ProcessValueOut {
    fn setting(&self) -> crate::fixedpoint::Scalar;
    fn set_setting(&mut self, value: crate::fixedpoint::Scalar);
    fn setting_valid(&mut self, valid: bool);
    fn min(&self) -> crate::fixedpoint::Scalar;
    fn max(&self) -> crate::fixedpoint::Scalar;
}

/// A raw temperature (or other scalar) sensor reading, as combined by
/// `CombiSensor` (spec §4 Design Notes / app/brewblox/blox/CombiSensorBlock.h).
pub trait TemperatureSensorIface {
    fn value(&self) -> Option<crate::fixedpoint::Scalar>;
    fn connected(&self) -> bool;
}

/// The shared 0-100 resource a `Balanced` constraint and its `Balancer`
/// negotiate over (C12).
pub trait BalancerIface {
    fn request(&mut self, client: crate::ids::ObjectId, requested: u8) -> u8;
}

/// The shared lock a `Mutex` constraint (C9) acquires on its actuator's
/// behalf.
pub trait MutexTargetIface {
    fn try_acquire(&mut self, requester: crate::ids::ObjectId, fair: bool) -> bool;
    fn release_if_cooled_down(
        &mut self,
        requester: crate::ids::ObjectId,
        now: UpdateTime,
        hold_after_off: u32,
        inactive_since: UpdateTime,
    ) -> bool;
}

/// A device addressable on the 1-Wire bus (spec §4.6 — C6). The scanning
/// factory queries this on every already-contained object to tell a
/// rediscovered device from a genuinely new one.
pub trait OneWireDeviceIface {
    fn address(&self) -> u32;
}

/// The result of an interface query (spec §4.4/§4.5). `None` from
/// [`Object::implements`] means "not supported"; a variant here means a
/// typed, borrow-scoped reference to the capability.
pub enum InterfaceRef<'a> {
    SelfRef(&'a mut dyn Object),
    DigitalActuator(&'a mut dyn DigitalActuatorIface),
    ProcessValueIn(&'a mut dyn ProcessValueIn),
    ProcessValueOut(&'a mut dyn ProcessValueOut),
    TemperatureSensor(&'a mut dyn TemperatureSensorIface),
    Balancer(&'a mut dyn BalancerIface),
    MutexTarget(&'a mut dyn MutexTargetIface),
    OneWireDevice(&'a mut dyn OneWireDeviceIface),
}

impl<'a> InterfaceRef<'a> {
    pub fn as_digital_actuator(self) -> Option<&'a mut dyn DigitalActuatorIface> {
        match self {
            InterfaceRef::DigitalActuator(r) => Some(r),
            _ => None,
        }
    }
    pub fn as_process_value_in(self) -> Option<&'a mut dyn ProcessValueIn> {
        match self {
            InterfaceRef::ProcessValueIn(r) => Some(r),
            _ => None,
        }
    }
    pub fn as_process_value_out(self) -> Option<&'a mut dyn ProcessValueOut> {
        match self {
            InterfaceRef::ProcessValueOut(r) => Some(r),
            _ => None,
        }
    }
    pub fn as_temperature_sensor(self) -> Option<&'a mut dyn TemperatureSensorIface> {
        match self {
            InterfaceRef::TemperatureSensor(r) => Some(r),
            _ => None,
        }
    }
    pub fn as_balancer(self) -> Option<&'a mut dyn BalancerIface> {
        match self {
            InterfaceRef::Balancer(r) => Some(r),
            _ => None,
        }
    }
    pub fn as_mutex_target(self) -> Option<&'a mut dyn MutexTargetIface> {
        match self {
            InterfaceRef::MutexTarget(r) => Some(r),
            _ => None,
        }
    }
    pub fn as_one_wire_device(self) -> Option<&'a mut dyn OneWireDeviceIface> {
        match self {
            InterfaceRef::OneWireDevice(r) => Some(r),
            _ => None,
        }
    }
}

/// The capability set every contained object exposes (spec §4.4).
pub trait Object {
    /// Stable type token, unique per concrete object implementation.
    fn type_id(&self) -> TypeId;

    /// Load the object's live + persisted state from a stream (e.g.
    /// WRITE_OBJECT). Refused (by returning an error) on `InactiveObject`.
    fn stream_from(&mut self, input: &mut dyn DataIn) -> CboxResult<()>;

    /// Emit the live representation, including read-only/computed fields.
    fn stream_to(&self, output: &mut dyn DataOut) -> CboxResult<()>;

    /// Emit the persisted representation (typically just user settings).
    fn stream_persisted_to(&self, output: &mut dyn DataOut) -> CboxResult<()>;

    /// Advance the object by one scheduler tick; returns the next time this
    /// object wants to be updated again.
    fn update(&mut self, now: UpdateTime) -> UpdateTime;

    /// Interface query: does this object expose `iface`? `implements(own
    /// type as an interface)` must return `Some(InterfaceRef::SelfRef(..))`.
    fn implements(&mut self, iface: InterfaceId) -> Option<InterfaceRef<'_>>;

    /// True only for [`InactiveObject`]. `type_id()` keeps returning the
    /// *original* type while inactive, so the container needs this separate
    /// flag to notice a slot is a placeholder.
    fn is_inactive(&self) -> bool {
        false
    }

    /// Called once by CREATE_OBJECT right after the object is added under
    /// its final id. Most objects don't care; a few (e.g. a mutex-aware
    /// actuator) need to know their own id to identify themselves to a
    /// target they look up (spec §4.6 "onCreate"-style hook).
    fn notify_added(&mut self, _id: crate::ids::ObjectId) {}
}

/// Placeholder left in the container for an object whose group mask no
/// longer intersects the active groups (spec §4.4): carries only the
/// original `TypeId`, refuses to be read from, and schedules "never".
pub struct InactiveObject {
    original_type: TypeId,
}

impl InactiveObject {
    pub const TYPE_ID: TypeId = TypeId(0);

    pub fn new(original_type: TypeId) -> Self {
        Self { original_type }
    }

    pub fn original_type(&self) -> TypeId {
        self.original_type
    }
}

impl Object for InactiveObject {
    fn type_id(&self) -> TypeId {
        self.original_type
    }

    fn stream_from(&mut self, _input: &mut dyn DataIn) -> CboxResult<()> {
        Err(crate::error::StatusCode::ObjectNotWritable)
    }

    fn stream_to(&self, _output: &mut dyn DataOut) -> CboxResult<()> {
        Err(crate::error::StatusCode::ObjectNotReadable)
    }

    fn stream_persisted_to(&self, _output: &mut dyn DataOut) -> CboxResult<()> {
        // inactive objects are never persisted but this isn't an error:
        // a write temporarily reactivates the object before reaching here.
        Ok(())
    }

    fn update(&mut self, now: UpdateTime) -> UpdateTime {
        update_never(now)
    }

    fn implements(&mut self, _iface: InterfaceId) -> Option<InterfaceRef<'_>> {
        None
    }

    fn is_inactive(&self) -> bool {
        true
    }
}
