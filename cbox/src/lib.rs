//! Controlbox object runtime and control core for brewery process
//! controller firmware (see `SPEC_FULL.md`).

pub mod blocks;
pub mod container;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod fixedpoint;
pub mod iface_ids;
pub mod ids;
pub mod lookup;
pub mod object;
pub mod scan;
pub mod storage;
pub mod system_objects;
