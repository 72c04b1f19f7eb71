//! Mock digital actuator, grounded on `lib/inc/ActuatorDigitalConstrained.h`
//! (already the basis for C9): a
//! [`crate::control::constrained::ConstrainedDigitalActuator`] over an
//! in-memory [`crate::control::digital::MockChannel`], with its
//! mutex/timing constraints fully rebuilt on every `streamFrom` (spec
//! scenario S5 — two of these sharing one `MutexBlock`).

use crate::container::Container;
use crate::control::constrained::{ConstrainedDigitalActuator, DelayedOff, DelayedOn, Mutex, MinOffTime, MinOnTime};
use crate::control::digital::{ChangeLoggedActuator, DigitalState, MockChannel};
use crate::error::{CboxResult, StatusCode};
use crate::ids::{InterfaceId, ObjectId, TypeId, UpdateTime};
use crate::object::{InterfaceRef, Object};
use cbox_stream::{DataIn, DataOut};

const LOG_CAPACITY: usize = 8;

pub struct ActuatorDigitalMock {
    container: Container,
    self_id: ObjectId,
    actuator: ConstrainedDigitalActuator<MockChannel>,
    mutex_target_id: ObjectId,
    hold_after_off: u32,
    fair: bool,
    min_on: u32,
    min_off: u32,
    delayed_on: u32,
    delayed_off: u32,
}

impl ActuatorDigitalMock {
    pub fn construct(container: &Container) -> Box<dyn Object> {
        Box::new(Self {
            container: container.clone(),
            self_id: ObjectId::NONE,
            actuator: ConstrainedDigitalActuator::new(ChangeLoggedActuator::new(MockChannel::default(), false, LOG_CAPACITY)),
            mutex_target_id: ObjectId::NONE,
            hold_after_off: 0,
            fair: false,
            min_on: 0,
            min_off: 0,
            delayed_on: 0,
            delayed_off: 0,
        })
    }

    /// Lets the container tell a freshly-added object its own id, since the
    /// mutex constraint needs it to identify itself to the target (spec
    /// §4.6's `onCreate`-style hook — there's no dedicated hook here, so the
    /// dispatcher calls this right after `add`).
    pub fn set_self_id(&mut self, id: ObjectId) {
        self.self_id = id;
    }

    fn rebuild_constraints(&mut self) {
        self.actuator.remove_all_constraints();
        if self.min_off > 0 {
            self.actuator.add_constraint(Box::new(MinOffTime { limit: self.min_off }));
        }
        if self.min_on > 0 {
            self.actuator.add_constraint(Box::new(MinOnTime { limit: self.min_on }));
        }
        if !self.mutex_target_id.is_none() {
            let target = self.container.lookup(self.mutex_target_id);
            self.actuator.add_constraint(Box::new(Mutex::new(self.self_id, target, self.hold_after_off, self.fair)));
        }
        if self.delayed_on > 0 {
            self.actuator.add_constraint(Box::new(DelayedOn::new(self.delayed_on)));
        }
        if self.delayed_off > 0 {
            self.actuator.add_constraint(Box::new(DelayedOff::new(self.delayed_off)));
        }
    }
}

impl Object for ActuatorDigitalMock {
    fn type_id(&self) -> TypeId {
        super::ACTUATOR_DIGITAL_MOCK
    }

    fn stream_from(&mut self, input: &mut dyn DataIn) -> CboxResult<()> {
        self.mutex_target_id = ObjectId(input.get_u16().map_err(StatusCode::from)?);
        self.hold_after_off = input.get_u32().map_err(StatusCode::from)?;
        self.fair = input.next().map_err(StatusCode::from)? != 0;
        self.min_on = input.get_u32().map_err(StatusCode::from)?;
        self.min_off = input.get_u32().map_err(StatusCode::from)?;
        self.delayed_on = input.get_u32().map_err(StatusCode::from)?;
        self.delayed_off = input.get_u32().map_err(StatusCode::from)?;
        self.rebuild_constraints();
        Ok(())
    }

    fn stream_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        output.put_u16(self.mutex_target_id.0).map_err(StatusCode::from)?;
        output.put_u32(self.hold_after_off).map_err(StatusCode::from)?;
        output.write(self.fair as u8).map_err(StatusCode::from)?;
        output.put_u32(self.min_on).map_err(StatusCode::from)?;
        output.put_u32(self.min_off).map_err(StatusCode::from)?;
        output.put_u32(self.delayed_on).map_err(StatusCode::from)?;
        output.put_u32(self.delayed_off).map_err(StatusCode::from)?;
        output.write(matches!(self.actuator.state(), DigitalState::Active) as u8).map_err(StatusCode::from)?;
        output.write(self.actuator.limiting()).map_err(StatusCode::from)?;
        Ok(())
    }

    fn stream_persisted_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        output.put_u16(self.mutex_target_id.0).map_err(StatusCode::from)?;
        output.put_u32(self.hold_after_off).map_err(StatusCode::from)?;
        output.write(self.fair as u8).map_err(StatusCode::from)?;
        output.put_u32(self.min_on).map_err(StatusCode::from)?;
        output.put_u32(self.min_off).map_err(StatusCode::from)?;
        output.put_u32(self.delayed_on).map_err(StatusCode::from)?;
        output.put_u32(self.delayed_off).map_err(StatusCode::from)?;
        Ok(())
    }

    fn update(&mut self, now: UpdateTime) -> UpdateTime {
        now + self.actuator.update(now)
    }

    fn implements(&mut self, iface: InterfaceId) -> Option<InterfaceRef<'_>> {
        if iface.0 == self.type_id().0 {
            Some(InterfaceRef::SelfRef(self))
        } else if iface == crate::iface_ids::DIGITAL_ACTUATOR {
            Some(InterfaceRef::DigitalActuator(&mut self.actuator))
        } else {
            None
        }
    }

    fn notify_added(&mut self, id: ObjectId) {
        self.set_self_id(id);
    }
}
