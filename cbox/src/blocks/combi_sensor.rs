//! Combining temperature sensor, grounded on
//! `app/brewblox/blox/CombiSensorBlock.h` and its test
//! (`CombiSensorBlock_test.cpp`, the source of the exact encoded values
//! cross-checked in [`crate::fixedpoint`]): combines up to 8
//! `TemperatureSensor` inputs with AVG/MIN/MAX, itself exposing
//! `TemperatureSensor` so it can be nested (spec scenario S2).

use crate::container::Container;
use crate::error::{CboxResult, StatusCode};
use crate::fixedpoint::{get_scalar, put_scalar, Scalar};
use crate::ids::{InterfaceId, ObjectId, TypeId, UpdateTime};
use crate::lookup::Lookup;
use crate::object::{InterfaceRef, Object, TemperatureSensorIface};
use cbox_stream::{DataIn, DataOut};

const MAX_INPUTS: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum CombineFunc {
    Avg,
    Min,
    Max,
}

impl CombineFunc {
    fn from_wire(byte: u8) -> Self {
        match byte {
            1 => CombineFunc::Min,
            2 => CombineFunc::Max,
            _ => CombineFunc::Avg,
        }
    }
    fn to_wire(self) -> u8 {
        match self {
            CombineFunc::Avg => 0,
            CombineFunc::Min => 1,
            CombineFunc::Max => 2,
        }
    }
}

pub struct CombiSensor {
    container: Container,
    func: CombineFunc,
    inputs: Vec<Lookup>,
    value: Option<Scalar>,
}

impl CombiSensor {
    pub fn construct(container: &Container) -> Box<dyn Object> {
        Box::new(Self { container: container.clone(), func: CombineFunc::Avg, inputs: Vec::new(), value: None })
    }

    fn recompute(&mut self) {
        let mut readings: Vec<Scalar> = self.inputs.iter().filter_map(|l| l.with_temperature_sensor(|s| s.value()).flatten()).collect();
        if readings.is_empty() {
            self.value = None;
            return;
        }
        self.value = Some(match self.func {
            CombineFunc::Avg => {
                let sum: Scalar = readings.iter().fold(Scalar::ZERO, |acc, &v| acc + v);
                sum / Scalar::from_num(readings.len() as u32)
            }
            CombineFunc::Min => {
                readings.sort();
                readings[0]
            }
            CombineFunc::Max => {
                readings.sort();
                readings[readings.len() - 1]
            }
        });
    }

    fn write_common(&self, output: &mut dyn DataOut, include_value: bool) -> CboxResult<()> {
        output.write(self.func.to_wire()).map_err(StatusCode::from)?;
        output.write(self.inputs.len() as u8).map_err(StatusCode::from)?;
        for input in &self.inputs {
            output.put_u16(input.id().0).map_err(StatusCode::from)?;
        }
        if include_value {
            output.write(self.value.is_some() as u8).map_err(StatusCode::from)?;
            put_scalar(output, self.value.unwrap_or(Scalar::ZERO)).map_err(StatusCode::from)?;
        }
        Ok(())
    }
}

impl TemperatureSensorIface for CombiSensor {
    fn value(&self) -> Option<Scalar> {
        self.value
    }
    fn connected(&self) -> bool {
        self.value.is_some()
    }
}

impl Object for CombiSensor {
    fn type_id(&self) -> TypeId {
        super::COMBI_SENSOR
    }

    fn stream_from(&mut self, input: &mut dyn DataIn) -> CboxResult<()> {
        self.func = CombineFunc::from_wire(input.next().map_err(StatusCode::from)?);
        let count = input.next().map_err(StatusCode::from)? as usize;
        if count > MAX_INPUTS {
            return Err(StatusCode::InvalidObjectType);
        }
        self.inputs.clear();
        for _ in 0..count {
            let id = ObjectId(input.get_u16().map_err(StatusCode::from)?);
            self.inputs.push(self.container.lookup(id));
        }
        self.recompute();
        Ok(())
    }

    fn stream_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        self.write_common(output, true)
    }

    fn stream_persisted_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        self.write_common(output, false)
    }

    fn update(&mut self, now: UpdateTime) -> UpdateTime {
        self.recompute();
        now + 1000
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
