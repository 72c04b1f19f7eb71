//! Scanning factory (spec §4.6 — C6), grounded in
//! `original_source/controlbox/src/cbox/Box.h`'s `ScanningFactory` member
//! (`std::vector<std::unique_ptr<ScanningFactory>> scanners`) and the
//! `Box::discoverNewObject(discoverObject, isSame)` signature: a scanner is
//! reset, then polled with `scan()` until it returns nothing, and every
//! candidate it returns is checked against the already-contained objects
//! before being kept, so a device that's already claimed an id doesn't get a
//! second one.
//!
//! The original's concrete scanner walks a real 1-Wire bus; this crate has
//! no physical bus to scan, so [`MockOneWireScanningFactory`] stands in for
//! it with a fixed, caller-supplied device list — the same substitution the
//! spec's §4 SUPPLEMENT makes for the other demonstration blocks.

use crate::container::Container;
use crate::ids::TypeId;
use crate::object::Object;

/// One device visible on the bus a scanner watches.
pub trait ScanningFactory {
    /// Start a fresh sweep (e.g. reset the 1-Wire bus search state).
    fn reset(&mut self);
    /// Return the next candidate device, or `None` once the sweep is done.
    /// Candidates are *not* pre-filtered against the container; `run_scan`
    /// does that by address.
    fn scan(&mut self) -> Option<(TypeId, u32, Box<dyn Object>)>;
}

/// True if any live object in `container` already claims `address` via the
/// `OneWireDevice` interface (spec §4.6: "checked via `implements
/// (OneWireDevice)` and equality of device address").
fn address_is_claimed(container: &Container, address: u32) -> bool {
    container.with(|objects| {
        for id in objects.ids() {
            if let Some(obj) = objects.fetch_mut(id) {
                if let Some(dev) = obj.implements(crate::iface_ids::ONE_WIRE_DEVICE).and_then(|i| i.as_one_wire_device()) {
                    if dev.address() == address {
                        return true;
                    }
                }
            }
        }
        false
    })
}

/// Run every scanner to exhaustion, skipping any candidate whose address is
/// already claimed, and return the unclaimed `(TypeId, address, object)`
/// triples the caller should persist and add under freshly assigned ids
/// (spec §4.6/§4.7 DISCOVER_NEW_OBJECTS).
pub fn run_scan(container: &Container, scanners: &mut [Box<dyn ScanningFactory>]) -> Vec<(TypeId, u32, Box<dyn Object>)> {
    let mut found = Vec::new();
    for scanner in scanners.iter_mut() {
        scanner.reset();
        while let Some((type_id, address, obj)) = scanner.scan() {
            if !address_is_claimed(container, address) && found.iter().all(|(_, a, _)| *a != address) {
                found.push((type_id, address, obj));
            }
        }
    }
    found
}

/// Stand-in for the 1-Wire bus scanner: a fixed list of `(address,
/// TypeId)` devices, each turned into a fresh `constructor()`-built object
/// the first time it's swept and found unclaimed.
pub struct MockOneWireScanningFactory {
    devices: Vec<(u32, TypeId)>,
    constructor: Box<dyn Fn(u32) -> Box<dyn Object>>,
    cursor: usize,
}

impl MockOneWireScanningFactory {
    pub fn new(devices: Vec<(u32, TypeId)>, constructor: impl Fn(u32) -> Box<dyn Object> + 'static) -> Self {
        Self { devices, constructor: Box::new(constructor), cursor: 0 }
    }
}

impl ScanningFactory for MockOneWireScanningFactory {
    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn scan(&mut self) -> Option<(TypeId, u32, Box<dyn Object>)> {
        let (address, type_id) = *self.devices.get(self.cursor)?;
        self.cursor += 1;
        Some((type_id, address, (self.constructor)(address)))
    }
}
