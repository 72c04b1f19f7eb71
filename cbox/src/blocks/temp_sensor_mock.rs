//! Mock temperature sensor, grounded on
//! `app/brewblox/blox/TempSensorMockBlock.h`: a directly-settable reading
//! with no real hardware behind it, used to drive the rest of the control
//! core in tests and demonstrations (spec scenario S1).

use crate::container::Container;
use crate::error::{CboxResult, StatusCode};
use crate::fixedpoint::{get_scalar, put_scalar, Scalar};
use crate::ids::{update_never, InterfaceId, TypeId, UpdateTime};
use crate::object::{InterfaceRef, Object, TemperatureSensorIface};
use cbox_stream::{DataIn, DataOut};

pub struct TempSensorMock {
    value: Scalar,
    connected: bool,
}

impl TempSensorMock {
    pub fn new() -> Self {
        Self { value: Scalar::ZERO, connected: false }
    }

    pub fn construct(_container: &Container) -> Box<dyn Object> {
        Box::new(Self::new())
    }
}

impl Default for TempSensorMock {
    fn default() -> Self {
        Self::new()
    }
}

impl TemperatureSensorIface for TempSensorMock {
    fn value(&self) -> Option<Scalar> {
        if self.connected {
            Some(self.value)
        } else {
            None
        }
    }

    fn connected(&self) -> bool {
        self.connected
    }
}

impl Object for TempSensorMock {
    fn type_id(&self) -> TypeId {
        super::TEMP_SENSOR_MOCK
    }

    fn stream_from(&mut self, input: &mut dyn DataIn) -> CboxResult<()> {
        self.value = get_scalar(input).map_err(StatusCode::from)?;
        self.connected = input.next().map_err(StatusCode::from)? != 0;
        Ok(())
    }

    fn stream_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        put_scalar(output, self.value).map_err(StatusCode::from)?;
        output.write(self.connected as u8).map_err(StatusCode::from)?;
        output.write(TemperatureSensorIface::connected(self) as u8).map_err(StatusCode::from)?;
        Ok(())
    }

    fn stream_persisted_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        put_scalar(output, self.value).map_err(StatusCode::from)?;
        output.write(self.connected as u8).map_err(StatusCode::from)?;
        Ok(())
    }

    fn update(&mut self, now: UpdateTime) -> UpdateTime {
        update_never(now)
    }

    fn implements(&mut self, iface: InterfaceId) -> Option<InterfaceRef<'_>> {
        if iface.0 == self.type_id().0 {
            Some(InterfaceRef::SelfRef(self))
        } else if iface == crate::iface_ids::TEMPERATURE_SENSOR {
            Some(InterfaceRef::TemperatureSensor(self))
        } else {
            None
        }
    }
}
