//! A temperature sensor reachable over the 1-Wire bus, grounded on
//! `app/brewblox/blox/TempSensorMockBlock.h`'s field layout plus the
//! `OneWireDevice` interface the scanning factory (C6) queries by address
//! to tell a rediscovered device from a new one (spec §4.6, scenario S3).
//!
//! No physical bus is modelled: readings are set directly, the same
//! simplification `TempSensorMock` makes. What's real here is the address,
//! the one thing discovery actually depends on.

use crate::container::Container;
use crate::error::{CboxResult, StatusCode};
use crate::fixedpoint::{get_scalar, put_scalar, Scalar};
use crate::ids::{update_never, InterfaceId, TypeId, UpdateTime};
use crate::object::{InterfaceRef, Object, OneWireDeviceIface, TemperatureSensorIface};
use cbox_stream::{DataIn, DataOut};

pub struct TempSensorOneWire {
    address: u32,
    value: Scalar,
    connected: bool,
}

impl TempSensorOneWire {
    pub fn new(address: u32) -> Self {
        Self { address, value: Scalar::ZERO, connected: true }
    }

    pub fn construct(_container: &Container) -> Box<dyn Object> {
        Box::new(Self::new(0))
    }
}

impl TemperatureSensorIface for TempSensorOneWire {
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

impl OneWireDeviceIface for TempSensorOneWire {
    fn address(&self) -> u32 {
        self.address
    }
}

impl Object for TempSensorOneWire {
    fn type_id(&self) -> TypeId {
        super::TEMP_SENSOR_ONE_WIRE
    }

    fn stream_from(&mut self, input: &mut dyn DataIn) -> CboxResult<()> {
        self.address = input.get_u32().map_err(StatusCode::from)?;
        self.value = get_scalar(input).map_err(StatusCode::from)?;
        self.connected = input.next().map_err(StatusCode::from)? != 0;
        Ok(())
    }

    fn stream_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        output.put_u32(self.address).map_err(StatusCode::from)?;
        put_scalar(output, self.value).map_err(StatusCode::from)?;
        output.write(self.connected as u8).map_err(StatusCode::from)?;
        output.write(TemperatureSensorIface::connected(self) as u8).map_err(StatusCode::from)?;
        Ok(())
    }

    fn stream_persisted_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        output.put_u32(self.address).map_err(StatusCode::from)?;
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
        } else if iface == crate::iface_ids::ONE_WIRE_DEVICE {
            Some(InterfaceRef::OneWireDevice(self))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_survives_construction() {
        let sensor = TempSensorOneWire::new(0x00bc614e);
        assert_eq!(OneWireDeviceIface::address(&sensor), 0x00bc614e);
    }

    #[test]
    fn implements_temperature_sensor_and_one_wire_device() {
        let mut sensor = TempSensorOneWire::new(1);
        assert!(sensor.implements(crate::iface_ids::TEMPERATURE_SENSOR).is_some());
        assert!(sensor.implements(crate::iface_ids::ONE_WIRE_DEVICE).is_some());
        assert!(sensor.implements(crate::iface_ids::BALANCER).is_none());
    }
}
