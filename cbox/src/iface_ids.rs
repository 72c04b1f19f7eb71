//! Stable [`InterfaceId`] constants for every capability declared in
//! [`crate::object`] (spec §4.4/§4.5 — "a numbering agreed with external
//! clients and never renumbered"). Objects match on these in their
//! `implements()` body; [`crate::lookup::Lookup`]'s typed `with_*` helpers
//! query by the same constants.

use crate::ids::InterfaceId;

pub const DIGITAL_ACTUATOR: InterfaceId = InterfaceId(1);
pub const PROCESS_VALUE_IN: InterfaceId = InterfaceId(2);
pub const PROCESS_VALUE_OUT: InterfaceId = InterfaceId(3);
pub const TEMPERATURE_SENSOR: InterfaceId = InterfaceId(4);
pub const BALANCER: InterfaceId = InterfaceId(5);
pub const MUTEX_TARGET: InterfaceId = InterfaceId(6);

/// A device reachable over the 1-Wire bus, queried by its address so a
/// scanning factory (C6) can tell a rediscovered device from a new one
/// (spec §4.6).
pub const ONE_WIRE_DEVICE: InterfaceId = InterfaceId(7);
