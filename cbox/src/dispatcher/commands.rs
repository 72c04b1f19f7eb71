//! The 13-command grammar of the binary dispatch layer (spec §4.7).
//!
//! Kept as a closed, `FromRepr`-derived enum rather than a raw `u8` match in
//! [`super::Dispatcher::execute`], so adding a command is a compile error
//! everywhere the match isn't updated, not a silent fallthrough.

use strum::FromRepr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum CommandId {
    None = 0,
    ReadObject = 1,
    WriteObject = 2,
    CreateObject = 3,
    DeleteObject = 4,
    ListActiveObjects = 5,
    ReadStoredObject = 6,
    ListStoredObjects = 7,
    ClearObjects = 8,
    Reboot = 9,
    FactoryReset = 10,
    ListCompatibleObjects = 11,
    DiscoverNewObjects = 12,
}
