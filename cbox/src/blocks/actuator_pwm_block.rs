//! PWM actuator block, grounded on
//! `app/brewblox/blox/ActuatorPwmBlock.h`: wraps
//! [`crate::control::pwm::ActuatorPwm`] with a retargetable digital-actuator
//! lookup and an optional balancer reference, mirroring the original's
//! `ActuatorAnalogConstrained<ActuatorPwm>` composition (spec scenario S5/S6).

use crate::container::Container;
use crate::error::{CboxResult, StatusCode};
use crate::fixedpoint::{get_scalar, put_scalar, Scalar};
use crate::ids::{InterfaceId, ObjectId, TypeId, UpdateTime};
use crate::object::{InterfaceRef, Object, ProcessValueOut};
use cbox_stream::{DataIn, DataOut};

pub struct ActuatorPwmBlock {
    container: Container,
    actuator_id: ObjectId,
    balancer_id: ObjectId,
    self_id: ObjectId,
    pwm: crate::control::pwm::ActuatorPwm,
}

impl ActuatorPwmBlock {
    pub fn construct(container: &Container) -> Box<dyn Object> {
        let pwm = crate::control::pwm::ActuatorPwm::new(container.lookup(ObjectId::NONE), 4000);
        Box::new(Self { container: container.clone(), actuator_id: ObjectId::NONE, balancer_id: ObjectId::NONE, self_id: ObjectId::NONE, pwm })
    }

    /// See [`crate::blocks::actuator_digital_mock::ActuatorDigitalMock::set_self_id`]:
    /// needed before a balancer is configured, since the balancer identifies
    /// clients by id.
    pub fn set_self_id(&mut self, id: ObjectId) {
        self.self_id = id;
    }

    fn apply_balancer(&mut self) {
        if self.balancer_id.is_none() {
            self.pwm.set_balanced(None);
        } else {
            self.pwm.set_balanced(Some((self.container.lookup(self.balancer_id), self.self_id)));
        }
    }
}

impl Object for ActuatorPwmBlock {
    fn type_id(&self) -> TypeId {
        super::ACTUATOR_PWM
    }

    fn stream_from(&mut self, input: &mut dyn DataIn) -> CboxResult<()> {
        self.actuator_id = ObjectId(input.get_u16().map_err(StatusCode::from)?);
        self.balancer_id = ObjectId(input.get_u16().map_err(StatusCode::from)?);
        let period = input.get_u32().map_err(StatusCode::from)?;
        let setting = get_scalar(input).map_err(StatusCode::from)?;

        self.pwm = crate::control::pwm::ActuatorPwm::new(self.container.lookup(self.actuator_id), period);
        self.apply_balancer();
        self.pwm.set_setting(setting);
        Ok(())
    }

    fn stream_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        output.put_u16(self.actuator_id.0).map_err(StatusCode::from)?;
        output.put_u16(self.balancer_id.0).map_err(StatusCode::from)?;
        output.put_u32(self.pwm.period()).map_err(StatusCode::from)?;
        put_scalar(output, self.pwm.setting()).map_err(StatusCode::from)?;
        output.write(self.pwm.value_valid() as u8).map_err(StatusCode::from)?;
        put_scalar(output, self.pwm.value()).map_err(StatusCode::from)?;
        Ok(())
    }

    fn stream_persisted_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        output.put_u16(self.actuator_id.0).map_err(StatusCode::from)?;
        output.put_u16(self.balancer_id.0).map_err(StatusCode::from)?;
        output.put_u32(self.pwm.period()).map_err(StatusCode::from)?;
        put_scalar(output, self.pwm.setting()).map_err(StatusCode::from)?;
        Ok(())
    }

    fn update(&mut self, now: UpdateTime) -> UpdateTime {
        self.pwm.update(now)
    }

    fn implements(&mut self, iface: InterfaceId) -> Option<InterfaceRef<'_>> {
        if iface.0 == self.type_id().0 {
            Some(InterfaceRef::SelfRef(self))
        } else if iface == crate::iface_ids::PROCESS_VALUE_OUT {
            Some(InterfaceRef::ProcessValueOut(&mut self.pwm))
        } else {
            None
        }
    }

    fn notify_added(&mut self, id: ObjectId) {
        self.set_self_id(id);
    }
}
