//! Mock analog actuator: a directly-settable `ProcessValueOut` with a
//! configurable clamping range, standing in for real analog hardware the
//! way `TempSensorMock` stands in for a real sensor (spec scenario S4's
//! "mock analog actuator, range 0..100").

use crate::container::Container;
use crate::error::{CboxResult, StatusCode};
use crate::fixedpoint::{get_scalar, put_scalar, Scalar};
use crate::ids::{update_never, InterfaceId, TypeId, UpdateTime};
use crate::object::{InterfaceRef, Object, ProcessValueOut};
use cbox_stream::{DataIn, DataOut};

pub struct ActuatorAnalogMock {
    setting: Scalar,
    valid: bool,
    min: Scalar,
    max: Scalar,
}

impl ActuatorAnalogMock {
    pub fn new() -> Self {
        Self { setting: Scalar::ZERO, valid: false, min: Scalar::ZERO, max: Scalar::from_num(100) }
    }

    pub fn construct(_container: &Container) -> Box<dyn Object> {
        Box::new(Self::new())
    }
}

impl Default for ActuatorAnalogMock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessValueOut for ActuatorAnalogMock {
    fn setting(&self) -> Scalar {
        self.setting
    }
    fn set_setting(&mut self, value: Scalar) {
        self.setting = value.clamp(self.min, self.max);
    }
    fn setting_valid(&mut self, valid: bool) {
        self.valid = valid;
    }
    fn min(&self) -> Scalar {
        self.min
    }
    fn max(&self) -> Scalar {
        self.max
    }
}

impl Object for ActuatorAnalogMock {
    fn type_id(&self) -> TypeId {
        super::ACTUATOR_ANALOG_MOCK
    }

    fn stream_from(&mut self, input: &mut dyn DataIn) -> CboxResult<()> {
        self.min = get_scalar(input).map_err(StatusCode::from)?;
        self.max = get_scalar(input).map_err(StatusCode::from)?;
        self.setting = self.setting.clamp(self.min, self.max);
        Ok(())
    }

    fn stream_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        put_scalar(output, self.min).map_err(StatusCode::from)?;
        put_scalar(output, self.max).map_err(StatusCode::from)?;
        put_scalar(output, self.setting).map_err(StatusCode::from)?;
        output.write(self.valid as u8).map_err(StatusCode::from)?;
        Ok(())
    }

    fn stream_persisted_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        put_scalar(output, self.min).map_err(StatusCode::from)?;
        put_scalar(output, self.max).map_err(StatusCode::from)?;
        Ok(())
    }

    fn update(&mut self, now: UpdateTime) -> UpdateTime {
        update_never(now)
    }

    fn implements(&mut self, iface: InterfaceId) -> Option<InterfaceRef<'_>> {
        if iface.0 == self.type_id().0 {
            Some(InterfaceRef::SelfRef(self))
        } else if iface == crate::iface_ids::PROCESS_VALUE_OUT {
            Some(InterfaceRef::ProcessValueOut(self))
        } else {
            None
        }
    }
}
