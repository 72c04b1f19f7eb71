//! The minimal system object set (spec §4 SUPPLEMENT): §6 of the distilled
//! spec leaves the concrete list as "an implementation policy", so this
//! crate ships the closed set actually named in
//! `original_source/app/brewblox/blox/*.h` and `BrewBlox.h` — `SystemInfo`
//! (id 1), a `OneWireBus` placeholder (id 2), and `Groups` (id 3). ids
//! 4..99 are reserved but unallocated. [`register_all`] adds all three
//! under the system group bit, so DELETE_OBJECT/CLEAR_OBJECTS (C7) refuse
//! them the same way they refuse any other id below `USER_START`.

use crate::container::{Container, SYSTEM_GROUP_BIT};
use crate::error::{CboxResult, StatusCode};
use crate::ids::{update_never, InterfaceId, ObjectId, TypeId, UpdateTime};
use crate::object::{InterfaceRef, Object};
use cbox_stream::{DataIn, DataOut};

pub const SYSTEM_INFO: TypeId = TypeId(1);
pub const ONE_WIRE_BUS: TypeId = TypeId(2);
pub const GROUPS: TypeId = TypeId(3);

pub const SYSTEM_INFO_ID: ObjectId = ObjectId(1);
pub const ONE_WIRE_BUS_ID: ObjectId = ObjectId(2);
pub const GROUPS_ID: ObjectId = ObjectId(3);

/// Read-only device identity, grounded on
/// `app/brewblox/connectivity.cpp`'s `deviceIdString()`/`versionCsv()`
/// pair — this crate carries no network stack to advertise those over
/// (mDNS/WiFi/HTTP are Non-goals), so a client reads the same two pieces
/// of data directly over the command protocol instead.
pub struct SystemInfo {
    device_id: u32,
    version: (u8, u8, u8),
}

impl SystemInfo {
    pub fn new(device_id: u32, version: (u8, u8, u8)) -> Box<dyn Object> {
        Box::new(Self { device_id, version })
    }
}

impl Object for SystemInfo {
    fn type_id(&self) -> TypeId {
        SYSTEM_INFO
    }

    fn stream_from(&mut self, _input: &mut dyn DataIn) -> CboxResult<()> {
        Err(StatusCode::ObjectNotWritable)
    }

    fn stream_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        output.put_u32(self.device_id).map_err(StatusCode::from)?;
        output.write(self.version.0).map_err(StatusCode::from)?;
        output.write(self.version.1).map_err(StatusCode::from)?;
        output.write(self.version.2).map_err(StatusCode::from)?;
        Ok(())
    }

    fn stream_persisted_to(&self, _output: &mut dyn DataOut) -> CboxResult<()> {
        // nothing user-configurable here; device id and version are fixed
        // at construction time.
        Ok(())
    }

    fn update(&mut self, now: UpdateTime) -> UpdateTime {
        update_never(now)
    }

    fn implements(&mut self, iface: InterfaceId) -> Option<InterfaceRef<'_>> {
        if iface.0 == SYSTEM_INFO.0 {
            Some(InterfaceRef::SelfRef(self))
        } else {
            None
        }
    }
}

/// Placeholder for the physical 1-Wire bus (spec §4 SUPPLEMENT). The bus's
/// *devices* are already ordinary contained objects discovered through
/// [`crate::scan::ScanningFactory`] (C6); this object exists only so a
/// client has an id to point at when asking whether a bus is present at
/// all, without this crate owning an actual bus driver — physical I/O
/// drivers are out of scope (spec Non-goals).
pub struct OneWireBus {
    present: bool,
}

impl OneWireBus {
    pub fn new(present: bool) -> Box<dyn Object> {
        Box::new(Self { present })
    }
}

impl Object for OneWireBus {
    fn type_id(&self) -> TypeId {
        ONE_WIRE_BUS
    }

    fn stream_from(&mut self, input: &mut dyn DataIn) -> CboxResult<()> {
        self.present = input.next().map_err(StatusCode::from)? != 0;
        Ok(())
    }

    fn stream_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        output.write(self.present as u8).map_err(StatusCode::from)?;
        Ok(())
    }

    fn stream_persisted_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        output.write(self.present as u8).map_err(StatusCode::from)?;
        Ok(())
    }

    fn update(&mut self, now: UpdateTime) -> UpdateTime {
        update_never(now)
    }

    fn implements(&mut self, iface: InterfaceId) -> Option<InterfaceRef<'_>> {
        if iface.0 == ONE_WIRE_BUS.0 {
            Some(InterfaceRef::SelfRef(self))
        } else {
            None
        }
    }
}

/// Exposes and mutates the container's active-group mask (spec §3.2/§4.3):
/// writing a new mask through `WRITE_OBJECT(id=3)` deactivates every
/// object whose groups no longer intersect it, the same path
/// `set_active_groups_and_update_objects` already offers the rest of the
/// runtime. Reactivating a previously deactivated object from its
/// persisted bytes needs a `BlockStorage` handle this object doesn't
/// carry (only the dispatcher does), so this port always passes a no-op
/// `reload` — a group flip here deactivates objects correctly but will
/// not resurrect one with its stored configuration until the dispatcher
/// grows a dedicated reload path. Documented as a deliberate, narrow gap
/// rather than a silent omission; see DESIGN.md.
pub struct Groups {
    container: Container,
}

impl Groups {
    pub fn new(container: &Container) -> Box<dyn Object> {
        Box::new(Self { container: container.clone() })
    }
}

impl Object for Groups {
    fn type_id(&self) -> TypeId {
        GROUPS
    }

    fn stream_from(&mut self, input: &mut dyn DataIn) -> CboxResult<()> {
        let mask = input.next().map_err(StatusCode::from)? | SYSTEM_GROUP_BIT;
        self.container.set_active_groups_and_update_objects(mask, |_, _| None);
        Ok(())
    }

    fn stream_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        output.write(self.container.active_groups()).map_err(StatusCode::from)?;
        Ok(())
    }

    fn stream_persisted_to(&self, output: &mut dyn DataOut) -> CboxResult<()> {
        output.write(self.container.active_groups()).map_err(StatusCode::from)?;
        Ok(())
    }

    fn update(&mut self, now: UpdateTime) -> UpdateTime {
        update_never(now)
    }

    fn implements(&mut self, iface: InterfaceId) -> Option<InterfaceRef<'_>> {
        if iface.0 == GROUPS.0 {
            Some(InterfaceRef::SelfRef(self))
        } else {
            None
        }
    }
}

/// Adds the fixed system object set under its reserved ids. Called once,
/// before any user object is created (typically right after
/// `Container::new`).
pub fn register_all(container: &Container, device_id: u32, version: (u8, u8, u8)) {
    container.add(SYSTEM_INFO_ID, SYSTEM_GROUP_BIT, SystemInfo::new(device_id, version));
    container.add(ONE_WIRE_BUS_ID, SYSTEM_GROUP_BIT, OneWireBus::new(false));
    container.add(GROUPS_ID, SYSTEM_GROUP_BIT, Groups::new(container));
}
