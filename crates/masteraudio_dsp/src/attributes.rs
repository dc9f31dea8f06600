//! Typed Attribute Collection
//!
//! An ordered bag of typed values keyed by [`AttributeId`]. Stream descriptors
//! are built on top of it; every negotiation step reads and writes through the
//! typed accessors below so a value can never silently change type.
//!
//! # Contract
//!
//! - `get_*` returns the value, `MissingAttribute` when the id is absent, or
//!   `TypeMismatch` when the id holds another type
//! - `set_*` overwrites, but refuses to change the stored type of an id
//! - blob/array setters overwrite in place when the length is unchanged
//! - flags are single bits inside a `Bitfield` attribute; one id may carry
//!   several independent flags

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DspError, DspResult};

/// Identifies one attribute of a stream descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttributeId {
    StreamFormat,
    ChannelCount,
    ChannelLayout,
    BitDepth,
    SampleRate,
    SampleType,
    Interleaved,
    BytesPerFrame,
    BytesPerSec,
    Encoding,
    BitRate,
    FrameSize,
    Flags,
    Extra,
}

/// Storage type of an attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    Int,
    Int64,
    Float,
    Bool,
    Bitfield,
    Blob,
    Array,
}

/// A single attribute value
///
/// Rust pattern: the variant owns its storage, so `Clone` is the deep copy
/// (blob and array payloads are duplicated, never shared).
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Int(i32),
    Int64(i64),
    Float(f64),
    Bool(bool),
    Bitfield(u32),
    Blob(Vec<u8>),
    Array(Vec<u32>),
}

impl AttributeValue {
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            AttributeValue::Int(_) => AttributeType::Int,
            AttributeValue::Int64(_) => AttributeType::Int64,
            AttributeValue::Float(_) => AttributeType::Float,
            AttributeValue::Bool(_) => AttributeType::Bool,
            AttributeValue::Bitfield(_) => AttributeType::Bitfield,
            AttributeValue::Blob(_) => AttributeType::Blob,
            AttributeValue::Array(_) => AttributeType::Array,
        }
    }
}

/// Ordered, typed attribute bag
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeCollection {
    values: BTreeMap<AttributeId, AttributeValue>,
}

impl AttributeCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, id: AttributeId) -> bool {
        self.values.contains_key(&id)
    }

    /// Type currently stored under `id`, if any
    pub fn type_of(&self, id: AttributeId) -> Option<AttributeType> {
        self.values.get(&id).map(AttributeValue::attribute_type)
    }

    pub fn remove(&mut self, id: AttributeId) -> Option<AttributeValue> {
        self.values.remove(&id)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AttributeId, &AttributeValue)> {
        self.values.iter()
    }

    fn lookup(&self, id: AttributeId) -> DspResult<&AttributeValue> {
        self.values
            .get(&id)
            .ok_or_else(|| DspError::NotFound(format!("attribute {id:?}")))
    }

    /// Reject a write that would change the stored type of `id`
    fn check_type(&self, id: AttributeId, wanted: AttributeType) -> DspResult<()> {
        match self.type_of(id) {
            Some(existing) if existing != wanted => Err(DspError::TypeMismatch(id)),
            _ => Ok(()),
        }
    }

    pub fn get_int(&self, id: AttributeId) -> DspResult<i32> {
        match self.lookup(id)? {
            AttributeValue::Int(v) => Ok(*v),
            _ => Err(DspError::TypeMismatch(id)),
        }
    }

    pub fn set_int(&mut self, id: AttributeId, value: i32) -> DspResult<()> {
        self.check_type(id, AttributeType::Int)?;
        self.values.insert(id, AttributeValue::Int(value));
        Ok(())
    }

    pub fn get_int64(&self, id: AttributeId) -> DspResult<i64> {
        match self.lookup(id)? {
            AttributeValue::Int64(v) => Ok(*v),
            _ => Err(DspError::TypeMismatch(id)),
        }
    }

    pub fn set_int64(&mut self, id: AttributeId, value: i64) -> DspResult<()> {
        self.check_type(id, AttributeType::Int64)?;
        self.values.insert(id, AttributeValue::Int64(value));
        Ok(())
    }

    pub fn get_float(&self, id: AttributeId) -> DspResult<f64> {
        match self.lookup(id)? {
            AttributeValue::Float(v) => Ok(*v),
            _ => Err(DspError::TypeMismatch(id)),
        }
    }

    pub fn set_float(&mut self, id: AttributeId, value: f64) -> DspResult<()> {
        self.check_type(id, AttributeType::Float)?;
        self.values.insert(id, AttributeValue::Float(value));
        Ok(())
    }

    pub fn get_bool(&self, id: AttributeId) -> DspResult<bool> {
        match self.lookup(id)? {
            AttributeValue::Bool(v) => Ok(*v),
            _ => Err(DspError::TypeMismatch(id)),
        }
    }

    pub fn set_bool(&mut self, id: AttributeId, value: bool) -> DspResult<()> {
        self.check_type(id, AttributeType::Bool)?;
        self.values.insert(id, AttributeValue::Bool(value));
        Ok(())
    }

    pub fn get_bitfield(&self, id: AttributeId) -> DspResult<u32> {
        match self.lookup(id)? {
            AttributeValue::Bitfield(v) => Ok(*v),
            _ => Err(DspError::TypeMismatch(id)),
        }
    }

    pub fn set_bitfield(&mut self, id: AttributeId, value: u32) -> DspResult<()> {
        self.check_type(id, AttributeType::Bitfield)?;
        self.values.insert(id, AttributeValue::Bitfield(value));
        Ok(())
    }

    pub fn get_blob(&self, id: AttributeId) -> DspResult<&[u8]> {
        match self.lookup(id)? {
            AttributeValue::Blob(v) => Ok(v),
            _ => Err(DspError::TypeMismatch(id)),
        }
    }

    pub fn set_blob(&mut self, id: AttributeId, value: &[u8]) -> DspResult<()> {
        self.check_type(id, AttributeType::Blob)?;
        match self.values.get_mut(&id) {
            Some(AttributeValue::Blob(existing)) if existing.len() == value.len() => {
                existing.copy_from_slice(value);
            }
            _ => {
                self.values.insert(id, AttributeValue::Blob(value.to_vec()));
            }
        }
        Ok(())
    }

    pub fn get_array(&self, id: AttributeId) -> DspResult<&[u32]> {
        match self.lookup(id)? {
            AttributeValue::Array(v) => Ok(v),
            _ => Err(DspError::TypeMismatch(id)),
        }
    }

    pub fn set_array(&mut self, id: AttributeId, value: &[u32]) -> DspResult<()> {
        self.check_type(id, AttributeType::Array)?;
        match self.values.get_mut(&id) {
            Some(AttributeValue::Array(existing)) if existing.len() == value.len() => {
                existing.copy_from_slice(value);
            }
            _ => {
                self.values.insert(id, AttributeValue::Array(value.to_vec()));
            }
        }
        Ok(())
    }

    /// Read one bit of a bitfield attribute
    pub fn get_flag(&self, id: AttributeId, flag: u32) -> DspResult<bool> {
        Ok(self.get_bitfield(id)? & flag != 0)
    }

    /// Set or clear one bit of a bitfield attribute, creating it if absent
    pub fn set_flag(&mut self, id: AttributeId, flag: u32, on: bool) -> DspResult<()> {
        let current = match self.get_bitfield(id) {
            Ok(bits) => bits,
            Err(DspError::NotFound(_)) => 0,
            Err(e) => return Err(e),
        };
        let bits = if on { current | flag } else { current & !flag };
        self.values.insert(id, AttributeValue::Bitfield(bits));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_IDS: [AttributeId; 14] = [
        AttributeId::StreamFormat,
        AttributeId::ChannelCount,
        AttributeId::ChannelLayout,
        AttributeId::BitDepth,
        AttributeId::SampleRate,
        AttributeId::SampleType,
        AttributeId::Interleaved,
        AttributeId::BytesPerFrame,
        AttributeId::BytesPerSec,
        AttributeId::Encoding,
        AttributeId::BitRate,
        AttributeId::FrameSize,
        AttributeId::Flags,
        AttributeId::Extra,
    ];

    /// Write `value` under `id` through the typed setter matching its variant
    fn set_value(bag: &mut AttributeCollection, id: AttributeId, value: &AttributeValue) -> DspResult<()> {
        match value {
            AttributeValue::Int(v) => bag.set_int(id, *v),
            AttributeValue::Int64(v) => bag.set_int64(id, *v),
            AttributeValue::Float(v) => bag.set_float(id, *v),
            AttributeValue::Bool(v) => bag.set_bool(id, *v),
            AttributeValue::Bitfield(v) => bag.set_bitfield(id, *v),
            AttributeValue::Blob(v) => bag.set_blob(id, v),
            AttributeValue::Array(v) => bag.set_array(id, v),
        }
    }

    /// Read `id` through the typed getter for `ty`
    fn get_value(bag: &AttributeCollection, id: AttributeId, ty: AttributeType) -> DspResult<AttributeValue> {
        Ok(match ty {
            AttributeType::Int => AttributeValue::Int(bag.get_int(id)?),
            AttributeType::Int64 => AttributeValue::Int64(bag.get_int64(id)?),
            AttributeType::Float => AttributeValue::Float(bag.get_float(id)?),
            AttributeType::Bool => AttributeValue::Bool(bag.get_bool(id)?),
            AttributeType::Bitfield => AttributeValue::Bitfield(bag.get_bitfield(id)?),
            AttributeType::Blob => AttributeValue::Blob(bag.get_blob(id)?.to_vec()),
            AttributeType::Array => AttributeValue::Array(bag.get_array(id)?.to_vec()),
        })
    }

    fn samples() -> Vec<AttributeValue> {
        vec![
            AttributeValue::Int(-42),
            AttributeValue::Int64(1 << 40),
            AttributeValue::Float(48000.5),
            AttributeValue::Bool(true),
            AttributeValue::Bitfield(0b1010),
            AttributeValue::Blob(vec![1, 2, 3, 4]),
            AttributeValue::Array(vec![7, 8, 9]),
        ]
    }

    #[test]
    fn test_round_trip_every_type_and_id() {
        for id in ALL_IDS {
            for value in samples() {
                let mut bag = AttributeCollection::new();
                set_value(&mut bag, id, &value).unwrap();
                let read = get_value(&bag, id, value.attribute_type()).unwrap();
                assert_eq!(read, value, "round trip failed for {id:?}");
            }
        }
    }

    #[test]
    fn test_cross_type_access_is_rejected() {
        for value in samples() {
            let written = value.attribute_type();
            for other in samples() {
                let ty = other.attribute_type();
                if ty == written {
                    continue;
                }
                let mut bag = AttributeCollection::new();
                set_value(&mut bag, AttributeId::Extra, &value).unwrap();

                let read = get_value(&bag, AttributeId::Extra, ty);
                assert_eq!(read, Err(DspError::TypeMismatch(AttributeId::Extra)));

                let write = set_value(&mut bag, AttributeId::Extra, &other);
                assert_eq!(write, Err(DspError::TypeMismatch(AttributeId::Extra)));

                // The original value survives the rejected write
                assert_eq!(get_value(&bag, AttributeId::Extra, written).unwrap(), value);
            }
        }
    }

    #[test]
    fn test_missing_attribute_is_not_found() {
        let bag = AttributeCollection::new();
        assert!(matches!(
            bag.get_int(AttributeId::SampleRate),
            Err(DspError::NotFound(_))
        ));
        assert!(matches!(
            bag.get_flag(AttributeId::Flags, 1),
            Err(DspError::NotFound(_))
        ));
    }

    #[test]
    fn test_overwrite_same_type() {
        let mut bag = AttributeCollection::new();
        bag.set_int(AttributeId::SampleRate, 44100).unwrap();
        bag.set_int(AttributeId::SampleRate, 48000).unwrap();
        assert_eq!(bag.get_int(AttributeId::SampleRate).unwrap(), 48000);
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn test_blob_and_array_resize() {
        let mut bag = AttributeCollection::new();
        bag.set_blob(AttributeId::Extra, &[1, 2, 3]).unwrap();
        bag.set_blob(AttributeId::Extra, &[4, 5, 6]).unwrap();
        assert_eq!(bag.get_blob(AttributeId::Extra).unwrap(), &[4, 5, 6]);
        bag.set_blob(AttributeId::Extra, &[9]).unwrap();
        assert_eq!(bag.get_blob(AttributeId::Extra).unwrap(), &[9]);

        bag.set_array(AttributeId::ChannelLayout, &[0, 1]).unwrap();
        bag.set_array(AttributeId::ChannelLayout, &[1, 0]).unwrap();
        assert_eq!(bag.get_array(AttributeId::ChannelLayout).unwrap(), &[1, 0]);
        bag.set_array(AttributeId::ChannelLayout, &[0, 1, 2, 3, 4, 5]).unwrap();
        assert_eq!(bag.get_array(AttributeId::ChannelLayout).unwrap().len(), 6);
    }

    #[test]
    fn test_clone_is_deep() {
        let mut bag = AttributeCollection::new();
        bag.set_blob(AttributeId::Extra, &[1, 2, 3]).unwrap();
        let copy = bag.clone();
        bag.set_blob(AttributeId::Extra, &[7, 7, 7]).unwrap();
        assert_eq!(copy.get_blob(AttributeId::Extra).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_independent_flags() {
        let mut bag = AttributeCollection::new();
        bag.set_flag(AttributeId::Flags, 0x1, true).unwrap();
        bag.set_flag(AttributeId::Flags, 0x4, true).unwrap();
        assert!(bag.get_flag(AttributeId::Flags, 0x1).unwrap());
        assert!(!bag.get_flag(AttributeId::Flags, 0x2).unwrap());
        assert!(bag.get_flag(AttributeId::Flags, 0x4).unwrap());

        bag.set_flag(AttributeId::Flags, 0x1, false).unwrap();
        assert!(!bag.get_flag(AttributeId::Flags, 0x1).unwrap());
        assert!(bag.get_flag(AttributeId::Flags, 0x4).unwrap());
        assert_eq!(bag.get_bitfield(AttributeId::Flags).unwrap(), 0x4);
    }

    #[test]
    fn test_flag_on_non_bitfield_is_rejected() {
        let mut bag = AttributeCollection::new();
        bag.set_int(AttributeId::Flags, 3).unwrap();
        assert_eq!(
            bag.set_flag(AttributeId::Flags, 0x1, true),
            Err(DspError::TypeMismatch(AttributeId::Flags))
        );
        assert_eq!(bag.get_int(AttributeId::Flags).unwrap(), 3);
    }
}
