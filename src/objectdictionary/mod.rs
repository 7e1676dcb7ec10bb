pub mod datatypes;
pub use datatypes::{DataType, Value};

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::ops::RangeInclusive;

use crate::sdo::errors::AbortCode;

/// Access rights of a dictionary value.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessType {
    Const,
    ReadOnly,
    ReadWrite,
    WriteOnly,
}

impl AccessType {
    pub const fn is_readable(self) -> bool {
        !matches!(self, AccessType::WriteOnly)
    }

    pub const fn is_writable(self) -> bool {
        matches!(self, AccessType::ReadWrite | AccessType::WriteOnly)
    }
}

/// A single addressable dictionary value.
#[derive(Clone, Debug)]
pub struct SubEntry {
    pub data_type: DataType,
    pub access: AccessType,
    /// Current value, little-endian.
    pub raw: Vec<u8>,
    pub low_limit: Option<Value>,
    pub high_limit: Option<Value>,
}

impl SubEntry {
    pub fn new(data_type: DataType, access: AccessType) -> SubEntry {
        SubEntry {
            data_type,
            access,
            raw: Vec::new(),
            low_limit: None,
            high_limit: None,
        }
    }

    pub fn with_raw(mut self, raw: Vec<u8>) -> SubEntry {
        self.raw = raw;
        self
    }

    pub fn with_value(self, value: Value) -> SubEntry {
        let raw = value.to_raw();
        self.with_raw(raw)
    }

    pub fn with_limits(mut self, low: Option<Value>, high: Option<Value>) -> SubEntry {
        self.low_limit = low;
        self.high_limit = high;
        self
    }

    pub fn size(&self) -> usize {
        self.raw.len()
    }

    pub fn value(&self) -> Result<Value, AbortCode> {
        Value::from_raw(&self.raw, self.data_type)
    }
}

/// One dictionary object: a plain variable, or a record/array with
/// numbered sub-entries where sub 0 carries the member count.
#[derive(Clone, Debug)]
pub struct Entry {
    pub index: u16,
    subs: Vec<SubEntry>,
}

impl Entry {
    pub fn variable(index: u16, sub: SubEntry) -> Entry {
        Entry { index, subs: vec![sub] }
    }

    pub fn record(index: u16, members: Vec<SubEntry>) -> Entry {
        let mut subs = vec![SubEntry::new(DataType::Unsigned8, AccessType::Const)
            .with_raw(vec![members.len() as u8])];
        subs.extend(members);
        Entry { index, subs }
    }

    /// Number of numbered sub-entries; 0 for a plain variable.
    pub fn sub_number(&self) -> u8 {
        (self.subs.len() - 1) as u8
    }

    /// Plain variables resolve to their single value no matter the
    /// requested sub-index; composite objects address their members.
    pub fn sub(&self, subindex: u8) -> Result<&SubEntry, AbortCode> {
        if self.sub_number() == 0 {
            Ok(&self.subs[0])
        } else {
            self.subs
                .get(subindex as usize)
                .ok_or(AbortCode::SubindexDoesNotExist)
        }
    }

    pub fn sub_mut(&mut self, subindex: u8) -> Result<&mut SubEntry, AbortCode> {
        if self.sub_number() == 0 {
            Ok(&mut self.subs[0])
        } else {
            self.subs
                .get_mut(subindex as usize)
                .ok_or(AbortCode::SubindexDoesNotExist)
        }
    }
}

/// Object-dictionary surface the SDO engine depends on.
///
/// Devices with their own dictionary representation implement this;
/// everything else can use [`ObjectDictionary`].
pub trait Dictionary {
    fn get(&self, index: u16) -> Option<&Entry>;
    fn get_mut(&mut self, index: u16) -> Option<&mut Entry>;
    /// Replaces any previous entry at the same index.
    fn insert(&mut self, entry: Entry) -> Option<Entry>;
    fn remove(&mut self, index: u16) -> Option<Entry>;
    /// Indices of existing entries within `range`, ascending.
    fn indices_in(&self, range: RangeInclusive<u16>) -> Vec<u16>;
}

/// `BTreeMap` backed reference dictionary.
#[derive(Default)]
pub struct ObjectDictionary {
    objects: BTreeMap<u16, Entry>,
}

impl ObjectDictionary {
    pub fn new() -> ObjectDictionary {
        ObjectDictionary::default()
    }

    pub fn add_variable(&mut self, index: u16, sub: SubEntry) {
        self.insert(Entry::variable(index, sub));
    }

    pub fn add_record(&mut self, index: u16, members: Vec<SubEntry>) {
        self.insert(Entry::record(index, members));
    }
}

impl Dictionary for ObjectDictionary {
    fn get(&self, index: u16) -> Option<&Entry> {
        self.objects.get(&index)
    }

    fn get_mut(&mut self, index: u16) -> Option<&mut Entry> {
        self.objects.get_mut(&index)
    }

    fn insert(&mut self, entry: Entry) -> Option<Entry> {
        self.objects.insert(entry.index, entry)
    }

    fn remove(&mut self, index: u16) -> Option<Entry> {
        self.objects.remove(&index)
    }

    fn indices_in(&self, range: RangeInclusive<u16>) -> Vec<u16> {
        self.objects.range(range).map(|(index, _)| *index).collect()
    }
}
