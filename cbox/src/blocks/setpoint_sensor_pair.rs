//! Setpoint/sensor pair, grounded on
//! `app/brewblox/blox/SetpointSensorPairBlock.h`: a settable target value
//! plus a [`crate::lookup::Lookup`] to the temperature sensor it's paired
//! with, combined into the single `ProcessValueIn` a PID or balancer reads
//! (spec §4.11, scenario S4). The original's setpoint is itself a separate
//! lookup to a `Setpoint` block; this crate keeps the setpoint inline since
//! no other block needs to share it.

use crate::container::Container;
use crate::error::{CboxResult, StatusCode};
use crate::fixedpoint::{get_scalar, put_scalar, Scalar};
use crate::ids::{update_never, InterfaceId, ObjectId, TypeId, UpdateTime};
use crate::lookup::Lookup;
use crate::object::{InterfaceRef, Object, ProcessValueIn};
use cbox_stream::{DataIn, DataOut};

pub struct SetpointSensorPair {
    sensor: Lookup,
    setting: Scalar,
}

impl SetpointSensorPair {
    pub fn construct(container: &Container) -> Box<dyn Object> {
        Box::new(Self { sensor: container.lookup(ObjectId::NONE), setting: Scalar::ZERO })
    }

    /// Test/composition helper: build one already pointed at `sensor` with
    /// `setting` filled in, bypassing the usual `streamFrom` round trip.
    pub fn construct_with(sensor: Lookup, setting: Scalar) -> Self {
        Self { sensor, setting }
    }
}

impl ProcessValueIn for SetpointSensorPair {
    fn setting(&self) -> Scalar {
        self.setting
    }

    fn value(&self) -> Option<Scalar> {
        self.sensor.with_temperature_sensor(|s| s.value()).flatten()
    }

    fn valid(&self) -> bool {
        ProcessValueIn::value(self).is_some()
    }
}

impl Object for SetpointSensorPair {
    fn type_id(&self) -> TypeId {
        super::SETPOINT_SENSOR_PAIR
    }

    fn stream_from(&mut self, input: &mut dyn DataIn) -> CboxResult<()> {
        self.sensor.set_id(ObjectId(input.get_u16().map_err(StatusCode::from)?));
        self.setting = get_scalar(input).map_err(StatusCode::from)?;
        Ok(())
    }

    fn stream_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        output.put_u16(self.sensor.id().0).map_err(StatusCode::from)?;
        put_scalar(output, self.setting).map_err(StatusCode::from)?;
        let value = ProcessValueIn::value(self);
        output.write(value.is_some() as u8).map_err(StatusCode::from)?;
        put_scalar(output, value.unwrap_or(Scalar::ZERO)).map_err(StatusCode::from)?;
        Ok(())
    }

    fn stream_persisted_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        output.put_u16(self.sensor.id().0).map_err(StatusCode::from)?;
        put_scalar(output, self.setting).map_err(StatusCode::from)?;
        Ok(())
    }

    fn update(&mut self, now: UpdateTime) -> UpdateTime {
        update_never(now)
    }

    fn implements(&mut self, iface: InterfaceId) -> Option<InterfaceRef<'_>> {
        if iface.0 == self.type_id().0 {
            Some(InterfaceRef::SelfRef(self))
        } else if iface == crate::iface_ids::PROCESS_VALUE_IN {
            Some(InterfaceRef::ProcessValueIn(self))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::temp_sensor_mock::TempSensorMock;

    #[test]
    fn reports_invalid_while_sensor_is_unreachable() {
        let c = Container::new();
        let pair = SetpointSensorPair::construct_with(c.lookup(ObjectId(999)), Scalar::from_num(20));
        assert!(!pair.valid());
    }

    #[test]
    fn reflects_connected_sensor_value() {
        let c = Container::new();
        let mut sensor = TempSensorMock::new();
        sensor.stream_from(&mut cbox_stream::SliceDataIn::new(&{
            let mut v = cbox_stream::VecDataOut::default();
            put_scalar(&mut v, Scalar::from_num(21)).unwrap();
            v.write(1).unwrap();
            v.bytes
        }))
        .unwrap();
        c.add(ObjectId(100), 1, Box::new(sensor));
        let pair = SetpointSensorPair::construct_with(c.lookup(ObjectId(100)), Scalar::from_num(20));
        assert!(pair.valid());
        assert_eq!(ProcessValueIn::value(&pair), Some(Scalar::from_num(21)));
    }
}
