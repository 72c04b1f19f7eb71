//! Demonstration block types (spec §4 SUPPLEMENT): concrete, constructible
//! objects that exercise every capability declared in [`crate::object`].
//! Each one is grounded on its namesake header under
//! `original_source/app/brewblox/blox/`, simplified wherever that header
//! leans on protobuf or real hardware this crate doesn't have.
//!
//! `TypeId`s are listed here, not scattered across the individual modules,
//! so the CREATE_OBJECT factory table and the scanning factory agree on the
//! same numbering (spec §6: "interface and type IDs must be stable").

pub mod actuator_analog_mock;
pub mod actuator_digital_mock;
pub mod actuator_pwm_block;
pub mod combi_sensor;
pub mod mutex_block;
pub mod pid_block;
pub mod setpoint_sensor_pair;
pub mod temp_sensor_mock;
pub mod temp_sensor_one_wire;

use crate::container::Container;
use crate::ids::TypeId;
use crate::object::Object;

pub const TEMP_SENSOR_MOCK: TypeId = TypeId(10);
pub const TEMP_SENSOR_ONE_WIRE: TypeId = TypeId(11);
pub const SETPOINT_SENSOR_PAIR: TypeId = TypeId(12);
pub const ACTUATOR_ANALOG_MOCK: TypeId = TypeId(13);
pub const ACTUATOR_DIGITAL_MOCK: TypeId = TypeId(14);
pub const COMBI_SENSOR: TypeId = TypeId(15);
pub const MUTEX: TypeId = TypeId(16);
pub const PID: TypeId = TypeId(17);
pub const ACTUATOR_PWM: TypeId = TypeId(18);

/// A block's construction entry point. Takes the shared container so a
/// block that holds a [`crate::lookup::Lookup`] can build one pointing at
/// nothing (`ObjectId::NONE`) and have `streamFrom` retarget it later, the
/// same two-step construction `CboxPtr` members use in the original.
pub type Constructor = fn(&Container) -> Box<dyn Object>;

/// The `TypeId -> factory` table CREATE_OBJECT consults (spec §9 Design
/// Notes: "the concrete set of types is closed... otherwise the TypeId ->
/// factory table is open").
pub fn constructor_for(type_id: TypeId) -> Option<Constructor> {
    Some(match type_id {
        TEMP_SENSOR_MOCK => temp_sensor_mock::TempSensorMock::construct,
        TEMP_SENSOR_ONE_WIRE => temp_sensor_one_wire::TempSensorOneWire::construct,
        SETPOINT_SENSOR_PAIR => setpoint_sensor_pair::SetpointSensorPair::construct,
        ACTUATOR_ANALOG_MOCK => actuator_analog_mock::ActuatorAnalogMock::construct,
        ACTUATOR_DIGITAL_MOCK => actuator_digital_mock::ActuatorDigitalMock::construct,
        COMBI_SENSOR => combi_sensor::CombiSensor::construct,
        MUTEX => mutex_block::MutexBlock::construct,
        PID => pid_block::PidBlock::construct,
        ACTUATOR_PWM => actuator_pwm_block::ActuatorPwmBlock::construct,
        _ => return None,
    })
}
