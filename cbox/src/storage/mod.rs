//! Defragmenting EEPROM block allocator (spec §4.2 — C2), grounded on
//! `controlbox/src/cbox/EepromObjectStorage.h` and its stream primitives in
//! `DataStreamEeprom.h`.
//!
//! Storage is a flat byte array split into a two-byte format header followed
//! by a sequence of variable-length blocks, each either `Object` or
//! `Disposed`. An object block holds, after its block header, the object's
//! *actual* payload size, its id, the payload itself and a trailing CRC-8
//! byte. Blocks are over-provisioned on creation so a payload that grows by
//! a few bytes doesn't immediately force a reallocation; `defrag` compacts
//! disposed space by walking disposed/object block pairs and swapping them
//! forward, crash-safely (the combined region is marked disposed before any
//! byte is actually moved).
//!
//! Unlike the original, `reader`/`writer` are not long-lived fields aliasing
//! the same backing store: each operation below builds a short-lived
//! [`EepromReader`]/[`EepromWriter`] over the exact offset/length it needs,
//! which sidesteps the aliasing Rust would otherwise refuse.

use crate::error::{CboxResult, StatusCode};
use crate::ids::ObjectId;
use cbox_stream::{
    seed_crc_with_id, BlackholeDataOut, CountingBlackholeDataOut, CrcDataIn, CrcDataOut, DataIn, DataOut, RegionDataIn,
    TeeDataOut,
};

/// Two-byte block header: a one-byte [`BlockType`] plus a little-endian u16
/// giving the number of bytes that follow (not including this header).
const BLOCK_HEADER_LEN: usize = 3;
/// Block header plus the object-specific fields stored at the front of an
/// `Object` block's data: actual payload size (u16) and id (u16).
const OBJECT_HEADER_LEN: usize = BLOCK_HEADER_LEN + 2 + 2;
/// Format header at the very start of the backing store: magic byte + version.
const FORMAT_HEADER_LEN: usize = 2;
const MAGIC_BYTE: u8 = 0x69;
const STORAGE_VERSION: u8 = 0x01;

/// The byte-addressable backing store a [`BlockStorage`] allocates blocks
/// in. Implemented by [`MockEeprom`] for tests; a real firmware image would
/// back this with actual EEPROM/flash.
pub trait EepromAccess {
    fn capacity(&self) -> usize;
    fn read_byte(&self, offset: usize) -> u8;
    fn write_byte(&mut self, offset: usize, value: u8);
    /// Zero every byte (a cleared EEPROM reads as all-zero, which decodes as
    /// an invalid format header and an invalid block type).
    fn clear(&mut self);
}

/// An in-memory [`EepromAccess`] for tests and hosted builds.
pub struct MockEeprom {
    bytes: Vec<u8>,
}

impl MockEeprom {
    pub fn new(capacity: usize) -> Self {
        Self { bytes: vec![0; capacity] }
    }
}

impl EepromAccess for MockEeprom {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }
    fn read_byte(&self, offset: usize) -> u8 {
        self.bytes[offset]
    }
    fn write_byte(&mut self, offset: usize, value: u8) {
        self.bytes[offset] = value;
    }
    fn clear(&mut self) {
        self.bytes.iter_mut().for_each(|b| *b = 0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum BlockType {
    /// Cleared EEPROM reads as this, so an unformatted region is never
    /// mistaken for live data.
    Invalid = 0,
    Object = 1,
    Disposed = 2,
}

impl BlockType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(BlockType::Invalid),
            1 => Some(BlockType::Object),
            2 => Some(BlockType::Disposed),
            _ => None,
        }
    }
}

/// A short-lived, bounded reader over a slice of the backing store.
struct EepromReader<'a, E: EepromAccess + ?Sized> {
    eeprom: &'a E,
    offset: usize,
    remaining: usize,
}

impl<'a, E: EepromAccess + ?Sized> EepromReader<'a, E> {
    fn new(eeprom: &'a E, offset: usize, length: usize) -> Self {
        Self { eeprom, offset, remaining: length }
    }
}

impl<'a, E: EepromAccess + ?Sized> DataIn for EepromReader<'a, E> {
    fn has_next(&mut self) -> bool {
        self.remaining > 0
    }
    fn peek(&mut self) -> cbox_stream::StreamResult<u8> {
        if self.remaining == 0 {
            return Err(cbox_stream::StreamError::ReadError);
        }
        Ok(self.eeprom.read_byte(self.offset))
    }
    fn next(&mut self) -> cbox_stream::StreamResult<u8> {
        if self.remaining == 0 {
            return Err(cbox_stream::StreamError::ReadError);
        }
        let b = self.eeprom.read_byte(self.offset);
        self.offset += 1;
        self.remaining -= 1;
        Ok(b)
    }
    fn available(&mut self) -> usize {
        self.remaining
    }
}

/// A short-lived, bounded writer over a slice of the backing store; writes
/// past the bound fail with [`cbox_stream::StreamError::WriteError`].
struct EepromWriter<'a, E: EepromAccess + ?Sized> {
    eeprom: &'a mut E,
    offset: usize,
    remaining: usize,
}

impl<'a, E: EepromAccess + ?Sized> EepromWriter<'a, E> {
    fn new(eeprom: &'a mut E, offset: usize, length: usize) -> Self {
        Self { eeprom, offset, remaining: length }
    }
}

impl<'a, E: EepromAccess + ?Sized> DataOut for EepromWriter<'a, E> {
    fn write(&mut self, byte: u8) -> cbox_stream::StreamResult<()> {
        if self.remaining == 0 {
            return Err(cbox_stream::StreamError::WriteError);
        }
        self.eeprom.write_byte(self.offset, byte);
        self.offset += 1;
        self.remaining -= 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct BlockHeader {
    header_offset: usize,
    block_type: u8,
    size: usize,
}

impl BlockHeader {
    fn data_offset(&self) -> usize {
        self.header_offset + BLOCK_HEADER_LEN
    }
}

#[derive(Debug, Clone, Copy)]
struct ObjectLocation {
    header_offset: usize,
    payload_offset: usize,
    /// Bytes visible to the caller: either the object's recorded
    /// `actualSize` or the full reserved capacity, depending on the lookup.
    available: usize,
    /// Full reserved payload capacity of the block (excl. block header).
    reserved: usize,
}

/// A defragmenting block allocator over an [`EepromAccess`] backing store.
pub struct BlockStorage<E: EepromAccess> {
    eeprom: E,
}

impl<E: EepromAccess> BlockStorage<E> {
    pub fn new(eeprom: E) -> Self {
        let mut storage = Self { eeprom };
        storage.init();
        storage
    }

    fn read_u16(&self, offset: usize) -> u16 {
        let lo = self.eeprom.read_byte(offset) as u16;
        let hi = self.eeprom.read_byte(offset + 1) as u16;
        lo | (hi << 8)
    }

    fn write_u16(&mut self, offset: usize, value: u16) {
        self.eeprom.write_byte(offset, (value & 0xff) as u8);
        self.eeprom.write_byte(offset + 1, (value >> 8) as u8);
    }

    fn init(&mut self) {
        let reference = ((MAGIC_BYTE as u16) << 8) | STORAGE_VERSION as u16;
        if self.read_u16(0) != reference {
            self.eeprom.clear();
            self.write_u16(0, reference);
            let capacity = self.eeprom.capacity();
            let region_size = capacity - FORMAT_HEADER_LEN - BLOCK_HEADER_LEN;
            self.eeprom.write_byte(FORMAT_HEADER_LEN, BlockType::Disposed as u8);
            self.write_u16(FORMAT_HEADER_LEN + 1, region_size as u16);
        }
    }

    /// Re-formats the whole backing store as a single disposed block,
    /// discarding every stored object.
    pub fn clear(&mut self) {
        self.eeprom.clear();
        self.init();
    }

    fn read_block_header(&self, offset: usize) -> Option<BlockHeader> {
        if offset + BLOCK_HEADER_LEN > self.eeprom.capacity() {
            return None;
        }
        let block_type = self.eeprom.read_byte(offset);
        let size = self.read_u16(offset + 1) as usize;
        Some(BlockHeader { header_offset: offset, block_type, size })
    }

    /// Scans forward from `start`, skipping any block that isn't `wanted`.
    fn find_block(&self, start: usize, wanted: BlockType) -> Option<BlockHeader> {
        let mut offset = start;
        loop {
            let header = self.read_block_header(offset)?;
            if header.block_type == wanted as u8 {
                return Some(header);
            }
            offset = header.data_offset() + header.size;
        }
    }

    fn find_object(&self, start: usize, id: ObjectId, used_size: bool) -> Option<ObjectLocation> {
        let mut offset = start;
        loop {
            let block = self.find_block(offset, BlockType::Object)?;
            let data_offset = block.data_offset();
            if data_offset + 4 > self.eeprom.capacity() {
                return None;
            }
            let actual_size = self.read_u16(data_offset) as usize;
            let block_id = self.read_u16(data_offset + 2);
            if block_id != id.0 {
                offset = data_offset + block.size;
                continue;
            }
            let payload_offset = data_offset + 4;
            let available = if used_size { actual_size } else { block.size.saturating_sub(4) };
            return Some(ObjectLocation {
                header_offset: block.header_offset,
                payload_offset,
                available,
                reserved: block.size,
            });
        }
    }

    /// Finds (or carves out of) a disposed block large enough to hold
    /// `object_size` payload bytes plus the object header, splitting it if
    /// there would be at least 8 bytes of disposed remainder.
    fn new_object_writer(&mut self, id: ObjectId, object_size: u16) -> Option<ObjectLocation> {
        let needed_incl = object_size as usize + OBJECT_HEADER_LEN;
        let needed_excl = needed_incl - BLOCK_HEADER_LEN;
        let mut offset = FORMAT_HEADER_LEN;
        loop {
            if offset + needed_incl > self.eeprom.capacity() {
                return None;
            }
            let block = self.find_block(offset, BlockType::Disposed)?;
            if block.size < needed_excl {
                offset = block.data_offset() + block.size;
                continue;
            }
            if block.size < needed_excl + 8 {
                // don't leave a sliver of disposed space behind; hand the
                // whole block to the object instead.
                let header_offset = block.header_offset;
                self.eeprom.write_byte(header_offset, BlockType::Object as u8);
                self.write_u16(header_offset + 1, block.size as u16);
                let available = block.size - (OBJECT_HEADER_LEN - BLOCK_HEADER_LEN);
                let data_offset = header_offset + BLOCK_HEADER_LEN;
                self.write_u16(data_offset, available as u16);
                self.write_u16(data_offset + 2, id.0);
                return Some(ObjectLocation {
                    header_offset,
                    payload_offset: data_offset + 4,
                    available,
                    reserved: block.size,
                });
            }

            let split_header_start = block.header_offset;
            let new_disposed_size = block.size - needed_incl;
            let new_disposed_start = split_header_start + needed_incl;

            self.eeprom.write_byte(new_disposed_start, BlockType::Disposed as u8);
            self.write_u16(new_disposed_start + 1, new_disposed_size as u16);

            self.eeprom.write_byte(split_header_start, BlockType::Object as u8);
            let new_block_size = needed_excl;
            self.write_u16(split_header_start + 1, new_block_size as u16);
            let available = new_block_size - (OBJECT_HEADER_LEN - BLOCK_HEADER_LEN);
            let data_offset = split_header_start + BLOCK_HEADER_LEN;
            self.write_u16(data_offset, available as u16);
            self.write_u16(data_offset + 2, id.0);

            return Some(ObjectLocation {
                header_offset: split_header_start,
                payload_offset: data_offset + 4,
                available,
                reserved: new_block_size,
            });
        }
    }

    fn write_object_data(
        &mut self,
        id: ObjectId,
        payload_offset: usize,
        reserved: usize,
        handler: &mut dyn FnMut(&mut dyn DataOut) -> CboxResult<()>,
    ) -> (CboxResult<()>, usize) {
        let seed = seed_crc_with_id(id.0);
        let mut counter = CountingBlackholeDataOut::default();
        let mut eeprom_out = EepromWriter::new(&mut self.eeprom, payload_offset, reserved);
        let result = {
            let mut tee = TeeDataOut::new(&mut eeprom_out, &mut counter);
            let mut crc = CrcDataOut::new(&mut tee, seed);
            let res = handler(&mut crc);
            let crc_written = if res.is_ok() { crc.write_crc() } else { crc.write_invalid_crc() };
            match (res, crc_written) {
                (Ok(()), Ok(())) => Ok(()),
                (Ok(()), Err(_)) => Err(StatusCode::PersistedStorageWriteError),
                (Err(e), _) => Err(e),
            }
        };
        (result, counter.count())
    }

    /// Streams `handler`'s output into the object's existing block,
    /// reallocating (and defragmenting if needed) when it no longer fits.
    ///
    /// `handler` is called twice: once against a blackhole sink purely to
    /// measure how many bytes it wants to write (so a handler that uses `?`
    /// on every write, as everything else in this codebase does, can't
    /// truncate the measurement the moment a too-small reserved region runs
    /// out), and once for the real write, now that a large-enough block is
    /// guaranteed. The handler must stream the same bytes both times.
    pub fn store_object(
        &mut self,
        id: ObjectId,
        mut handler: impl FnMut(&mut dyn DataOut) -> CboxResult<()>,
    ) -> CboxResult<()> {
        let existing = self.find_object(FORMAT_HEADER_LEN, id, false);
        let existing_payload_offset = existing.as_ref().map(|l| l.payload_offset);
        let existing_reserved = existing.as_ref().map_or(0, |l| l.available);

        let data_size = {
            let mut hole = BlackholeDataOut;
            let mut counter = CountingBlackholeDataOut::default();
            let seed = seed_crc_with_id(id.0);
            let mut tee = TeeDataOut::new(&mut hole, &mut counter);
            let mut crc = CrcDataOut::new(&mut tee, seed);
            let _ = handler(&mut crc);
            let _ = crc.write_crc();
            counter.count()
        };

        let (payload_offset, reserved) = if data_size <= existing_reserved {
            (existing_payload_offset.expect("existing_reserved > 0 implies a block"), existing_reserved)
        } else {
            if existing_reserved > 0 {
                self.dispose_object(id);
            }
            let over_provision = ((data_size as u16) >> 3).max(4);
            let requested = data_size as u16 + over_provision;

            let mut loc = self.new_object_writer(id, requested);
            if loc.map_or(0, |l| l.available) < requested as usize {
                let extra = OBJECT_HEADER_LEN - BLOCK_HEADER_LEN;
                if self.free_space() < requested as usize + extra {
                    return Err(StatusCode::InsufficientPersistentStorage);
                }
                self.defrag();
                loc = self.new_object_writer(id, requested);
                if loc.map_or(0, |l| l.available) < requested as usize {
                    return Err(StatusCode::InsufficientPersistentStorage);
                }
            }
            let loc = loc.expect("checked above");
            (loc.payload_offset, loc.available)
        };

        let (result, written) = self.write_object_data(id, payload_offset, reserved, &mut handler);
        let actual_size = written as u16;
        self.write_u16(payload_offset - (OBJECT_HEADER_LEN - BLOCK_HEADER_LEN), actual_size);
        result
    }

    /// Retrieves a single object, verifying its trailing CRC before handing
    /// the payload (minus that CRC byte) to `handler`.
    pub fn retrieve_object(
        &self,
        id: ObjectId,
        mut handler: impl FnMut(&mut dyn DataIn) -> CboxResult<()>,
    ) -> CboxResult<()> {
        let loc = self
            .find_object(FORMAT_HEADER_LEN, id, true)
            .ok_or(StatusCode::PersistedObjectNotFound)?;
        if loc.available == 0 {
            return Err(StatusCode::PersistedObjectNotFound);
        }
        let payload_len = loc.available.saturating_sub(1);
        let seed = seed_crc_with_id(id.0);
        let mut reader = EepromReader::new(&self.eeprom, loc.payload_offset, loc.available);
        let (res, computed_crc) = {
            let mut region = RegionDataIn::new(&mut reader, payload_len);
            let mut crc_in = CrcDataIn::new(&mut region, seed);
            let res = handler(&mut crc_in);
            crc_in.spool();
            (res, crc_in.crc())
        };
        let stored_crc = reader.next().map_err(StatusCode::from)?;
        if computed_crc != stored_crc {
            return Err(StatusCode::CrcErrorInStoredObject);
        }
        res
    }

    /// Calls `handler` for every live object block, skipping (and not
    /// failing on) any whose CRC doesn't match.
    pub fn retrieve_objects(
        &self,
        mut handler: impl FnMut(ObjectId, &mut dyn DataIn) -> CboxResult<()>,
    ) -> CboxResult<()> {
        let mut offset = FORMAT_HEADER_LEN;
        loop {
            let Some(header) = self.read_block_header(offset) else {
                break;
            };
            match BlockType::from_u8(header.block_type) {
                Some(BlockType::Object) => {
                    let data_offset = header.data_offset();
                    if data_offset + 4 > self.eeprom.capacity() || header.size < 4 {
                        return Err(StatusCode::PersistedBlockStreamError);
                    }
                    let actual_size = self.read_u16(data_offset) as usize;
                    let id = ObjectId(self.read_u16(data_offset + 2));
                    let payload_offset = data_offset + 4;

                    if actual_size > 0 {
                        let payload_len = actual_size.saturating_sub(1);
                        let seed = seed_crc_with_id(id.0);
                        let mut reader = EepromReader::new(&self.eeprom, payload_offset, actual_size);
                        let (res, computed) = {
                            let mut region = RegionDataIn::new(&mut reader, payload_len);
                            let mut crc_in = CrcDataIn::new(&mut region, seed);
                            let res = handler(id, &mut crc_in);
                            crc_in.spool();
                            (res, crc_in.crc())
                        };
                        let stored = reader.next().map_err(StatusCode::from)?;
                        if computed == stored {
                            if let Err(e) = res {
                                if e == StatusCode::PersistedBlockStreamError {
                                    return Err(e);
                                }
                                // otherwise log-and-continue: keep scanning.
                            }
                        }
                    }
                    offset = data_offset + header.size;
                }
                Some(BlockType::Disposed) => {
                    offset = header.data_offset() + header.size;
                }
                _ => return Err(StatusCode::InvalidPersistedBlockType),
            }
        }
        Ok(())
    }

    /// Marks the object's block disposed and immediately merges it with any
    /// adjacent disposed block. Returns `false` if the id wasn't found.
    pub fn dispose_object(&mut self, id: ObjectId) -> bool {
        let Some(loc) = self.find_object(FORMAT_HEADER_LEN, id, true) else {
            return false;
        };
        self.eeprom.write_byte(loc.header_offset, BlockType::Disposed as u8);
        self.merge_disposed_blocks();
        true
    }

    /// Total disposed bytes across every disposed block, excluding one
    /// block header's worth (the header a new allocation there would need).
    pub fn free_space(&self) -> usize {
        let mut total = 0usize;
        let mut offset = FORMAT_HEADER_LEN;
        while let Some(h) = self.find_block(offset, BlockType::Disposed) {
            total += h.size + BLOCK_HEADER_LEN;
            offset = h.data_offset() + h.size;
        }
        total.saturating_sub(BLOCK_HEADER_LEN)
    }

    /// The size of the single largest disposed block.
    pub fn continuous_free_space(&self) -> usize {
        let mut space = 0usize;
        let mut offset = FORMAT_HEADER_LEN;
        while let Some(h) = self.find_block(offset, BlockType::Disposed) {
            space = space.max(h.size);
            offset = h.data_offset() + h.size;
        }
        space
    }

    /// Compacts disposed space by repeatedly merging adjacent disposed
    /// blocks and swapping a disposed/object pair forward, until no swap
    /// makes further progress.
    pub fn defrag(&mut self) {
        loop {
            self.merge_disposed_blocks();
            if !self.move_disposed_backwards() {
                break;
            }
        }
    }

    fn copy_forward(&mut self, src: usize, dst: usize, len: usize) {
        debug_assert!(dst < src, "overlap must shrink toward lower offsets");
        for i in 0..len {
            let b = self.eeprom.read_byte(src + i);
            self.eeprom.write_byte(dst + i, b);
        }
    }

    /// Swaps the first disposed block found with the object block
    /// immediately following it, moving the object earlier in the backing
    /// store. Returns `false` when there's no disposed/object pair left to
    /// swap.
    ///
    /// Write order matters for crash safety: the combined region is marked
    /// disposed *before* any payload byte moves, so a power loss mid-swap
    /// loses at most the one object being moved, never the block structure.
    fn move_disposed_backwards(&mut self) -> bool {
        let Some(disposed) = self.find_block(FORMAT_HEADER_LEN, BlockType::Disposed) else {
            return false;
        };
        let disposed_start = disposed.data_offset();
        let disposed_len = disposed.size;
        if disposed_len == 0 {
            return false;
        }
        let after_disposed = disposed_start + disposed_len;

        let Some(object) = self.find_block(after_disposed, BlockType::Object) else {
            return false;
        };
        let object_len = object.size;
        if object_len == 0 {
            return false;
        }
        let object_data_start = object.data_offset();

        self.write_u16(disposed_start - 2, (disposed_len + object_len + BLOCK_HEADER_LEN) as u16);

        self.copy_forward(object_data_start, disposed_start, object_len);

        let remainder_header = disposed_start + object_len;
        self.eeprom.write_byte(remainder_header, BlockType::Disposed as u8);
        self.write_u16(remainder_header + 1, disposed_len as u16);

        self.eeprom.write_byte(disposed_start - BLOCK_HEADER_LEN, BlockType::Object as u8);
        self.write_u16(disposed_start - BLOCK_HEADER_LEN + 1, object_len as u16);

        true
    }

    /// Merges every run of two (or, across repeated calls, more) adjacent
    /// disposed blocks into one. Its return value isn't load-bearing for
    /// [`BlockStorage::defrag`]'s loop, only `move_disposed_backwards`'s is.
    fn merge_disposed_blocks(&mut self) -> bool {
        let mut offset = FORMAT_HEADER_LEN;
        let mut did_merge = false;
        loop {
            let Some(d1) = self.find_block(offset, BlockType::Disposed) else {
                return did_merge;
            };
            let after_d1 = d1.data_offset() + d1.size;
            if after_d1 >= self.eeprom.capacity() {
                return false;
            }
            let next_type = self.eeprom.read_byte(after_d1);
            if next_type == BlockType::Disposed as u8 {
                let d2_size = self.read_u16(after_d1 + 1) as usize;
                let combined = d1.size + d2_size + BLOCK_HEADER_LEN;
                self.write_u16(d1.header_offset + 1, combined as u16);
                did_merge = true;
                offset = after_d1 + BLOCK_HEADER_LEN + d2_size;
            } else {
                offset = after_d1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> BlockStorage<MockEeprom> {
        BlockStorage::new(MockEeprom::new(256))
    }

    fn write_bytes(bytes: &'static [u8]) -> impl FnMut(&mut dyn DataOut) -> CboxResult<()> {
        move |out| out.write_buffer(bytes).map_err(StatusCode::from)
    }

    #[test]
    fn store_then_retrieve_roundtrips() {
        let mut s = store();
        s.store_object(ObjectId(100), write_bytes(&[1, 2, 3, 4])).unwrap();

        let mut seen = Vec::new();
        s.retrieve_object(ObjectId(100), |input| {
            while input.has_next() {
                seen.push(input.next().map_err(StatusCode::from)?);
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn retrieve_missing_object_fails() {
        let s = store();
        let res = s.retrieve_object(ObjectId(100), |_| Ok(()));
        assert_eq!(res, Err(StatusCode::PersistedObjectNotFound));
    }

    #[test]
    fn growing_object_reallocates_without_losing_data() {
        let mut s = store();
        s.store_object(ObjectId(100), write_bytes(&[1, 2])).unwrap();
        s.store_object(ObjectId(100), write_bytes(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10])).unwrap();

        let mut seen = Vec::new();
        s.retrieve_object(ObjectId(100), |input| {
            while input.has_next() {
                seen.push(input.next().map_err(StatusCode::from)?);
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn dispose_then_free_space_reflects_reclaimed_block() {
        let mut s = store();
        let before = s.free_space();
        s.store_object(ObjectId(100), write_bytes(&[1, 2, 3])).unwrap();
        let after_store = s.free_space();
        assert!(after_store < before);
        assert!(s.dispose_object(ObjectId(100)));
        assert_eq!(s.free_space(), before);
    }

    #[test]
    fn dispose_missing_object_returns_false() {
        let mut s = store();
        assert!(!s.dispose_object(ObjectId(999)));
    }

    #[test]
    fn defrag_reclaims_continuous_space_after_churn() {
        let mut s = store();
        s.store_object(ObjectId(100), write_bytes(&[1; 10])).unwrap();
        s.store_object(ObjectId(101), write_bytes(&[2; 10])).unwrap();
        s.store_object(ObjectId(102), write_bytes(&[3; 10])).unwrap();
        s.dispose_object(ObjectId(100));
        s.dispose_object(ObjectId(101));

        let before = s.continuous_free_space();
        s.defrag();
        let after = s.continuous_free_space();
        assert!(after >= before);

        // object 102, never disposed, must still read back correctly.
        let mut seen = Vec::new();
        s.retrieve_object(ObjectId(102), |input| {
            while input.has_next() {
                seen.push(input.next().map_err(StatusCode::from)?);
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![3; 10]);
    }

    #[test]
    fn defrag_twice_is_idempotent() {
        let mut s = store();
        s.store_object(ObjectId(100), write_bytes(&[1; 10])).unwrap();
        s.store_object(ObjectId(101), write_bytes(&[2; 10])).unwrap();
        s.store_object(ObjectId(102), write_bytes(&[3; 10])).unwrap();
        s.dispose_object(ObjectId(100));
        s.dispose_object(ObjectId(101));

        s.defrag();
        let free_after_first = s.free_space();
        let continuous_after_first = s.continuous_free_space();

        s.defrag();
        assert_eq!(s.free_space(), free_after_first, "a second defrag() must not change free space");
        assert_eq!(s.continuous_free_space(), continuous_after_first, "a second defrag() must not change continuous free space");
    }

    #[test]
    fn bit_flip_in_stored_payload_is_detected_on_retrieve() {
        let mut s = store();
        s.store_object(ObjectId(100), write_bytes(&[1, 2, 3, 4])).unwrap();

        let loc = s.find_object(FORMAT_HEADER_LEN, ObjectId(100), true).unwrap();
        let corrupted = s.eeprom.read_byte(loc.payload_offset) ^ 0x01;
        s.eeprom.write_byte(loc.payload_offset, corrupted);

        let res = s.retrieve_object(ObjectId(100), |input| {
            while input.has_next() {
                input.next().map_err(StatusCode::from)?;
            }
            Ok(())
        });
        assert_eq!(res, Err(StatusCode::CrcErrorInStoredObject));
    }

    #[test]
    fn disposing_adjacent_objects_leaves_a_single_merged_block() {
        // Disposing two objects that end up adjacent (101 then 100, in
        // storage order) must merge them immediately rather than leaving
        // two disposed blocks back to back: a later allocation that needs
        // more than either block alone, but fits the sum, should succeed
        // without a `defrag()` call.
        let mut s = store();
        s.store_object(ObjectId(100), write_bytes(&[1; 10])).unwrap();
        s.store_object(ObjectId(101), write_bytes(&[2; 10])).unwrap();
        s.store_object(ObjectId(102), write_bytes(&[3; 10])).unwrap();
        s.dispose_object(ObjectId(100));
        s.dispose_object(ObjectId(101));

        let merged = s.continuous_free_space();
        assert!(merged >= 20 + BLOCK_HEADER_LEN, "adjacent disposed blocks were not merged: {}", merged);
    }

    #[test]
    fn retrieve_objects_visits_every_live_object() {
        let mut s = store();
        s.store_object(ObjectId(100), write_bytes(&[1, 2])).unwrap();
        s.store_object(ObjectId(101), write_bytes(&[3, 4])).unwrap();

        let mut ids = Vec::new();
        s.retrieve_objects(|id, input| {
            input.spool();
            ids.push(id);
            Ok(())
        })
        .unwrap();
        ids.sort_by_key(|id| id.0);
        assert_eq!(ids, vec![ObjectId(100), ObjectId(101)]);
    }

    #[test]
    fn clear_removes_every_object() {
        let mut s = store();
        s.store_object(ObjectId(100), write_bytes(&[1, 2])).unwrap();
        s.clear();
        let res = s.retrieve_object(ObjectId(100), |_| Ok(()));
        assert_eq!(res, Err(StatusCode::PersistedObjectNotFound));
    }
}
