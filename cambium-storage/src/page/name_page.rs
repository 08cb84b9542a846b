use crate::page::reference::PageReference;
use crate::{Error, Result};
use cambium_api::{NO_NAME_KEY, NameKey};
use std::collections::BTreeMap;

/// Dictionary partitions of the name page.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameKind {
    Element = 0,
    Namespace = 1,
    Attribute = 2,
    ProcessingInstruction = 3,
    ObjectKey = 4,
}

pub const NAME_KINDS: usize = 5;

impl NameKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(NameKind::Element),
            1 => Some(NameKind::Namespace),
            2 => Some(NameKind::Attribute),
            3 => Some(NameKind::ProcessingInstruction),
            4 => Some(NameKind::ObjectKey),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NameEntry {
    name: String,
    count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct NameTable {
    by_key: BTreeMap<NameKey, NameEntry>,
}

impl NameTable {
    fn key_of(&self, name: &str) -> Option<NameKey> {
        // Hash first, then probe forward over the collision chain.
        let mut key = initial_key(name);
        loop {
            match self.by_key.get(&key) {
                Some(entry) if entry.name == name => return Some(key),
                Some(_) => key = bump(key),
                None => return None,
            }
        }
    }

    fn intern(&mut self, name: &str) -> NameKey {
        let mut key = initial_key(name);
        loop {
            match self.by_key.get_mut(&key) {
                Some(entry) if entry.name == name => {
                    entry.count += 1;
                    return key;
                }
                Some(_) => key = bump(key),
                None => {
                    self.by_key.insert(
                        key,
                        NameEntry {
                            name: name.to_string(),
                            count: 1,
                        },
                    );
                    return key;
                }
            }
        }
    }

    fn release(&mut self, key: NameKey) {
        if let Some(entry) = self.by_key.get_mut(&key) {
            entry.count -= 1;
            if entry.count == 0 {
                self.by_key.remove(&key);
            }
        }
    }
}

/// Stable 32-bit key of a name; `-1` is reserved for "absent".
fn initial_key(name: &str) -> NameKey {
    let key = crc32fast::hash(name.as_bytes()) as i32;
    if key == NO_NAME_KEY { 0 } else { key }
}

fn bump(key: NameKey) -> NameKey {
    let next = key.wrapping_add(1);
    if next == NO_NAME_KEY { 0 } else { next }
}

/// Interned qualified names, one dictionary per kind, plus the roots of
/// the NAME index tries keyed by index number.
#[derive(Debug, Clone, Default)]
pub struct NamePage {
    tables: [NameTable; NAME_KINDS],
    index_roots: Vec<(u32, PageReference)>,
}

impl NamePage {
    /// Interns `name`, returning its stable key. Re-interning the same
    /// name returns the same key and raises its reference count.
    pub fn create_name_key(&mut self, name: &str, kind: NameKind) -> NameKey {
        self.tables[kind as usize].intern(name)
    }

    pub fn get_name_key(&self, name: &str, kind: NameKind) -> NameKey {
        self.tables[kind as usize]
            .key_of(name)
            .unwrap_or(NO_NAME_KEY)
    }

    pub fn get_name(&self, key: NameKey, kind: NameKind) -> Option<&str> {
        self.tables[kind as usize]
            .by_key
            .get(&key)
            .map(|entry| entry.name.as_str())
    }

    pub fn reference_count(&self, key: NameKey, kind: NameKind) -> u32 {
        self.tables[kind as usize]
            .by_key
            .get(&key)
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    pub fn remove_name(&mut self, key: NameKey, kind: NameKind) {
        self.tables[kind as usize].release(key);
    }

    pub fn index_root(&self, index_number: u32) -> Option<&PageReference> {
        self.index_roots
            .iter()
            .find(|(n, _)| *n == index_number)
            .map(|(_, r)| r)
    }

    pub fn index_root_mut(&mut self, index_number: u32) -> &mut PageReference {
        if let Some(pos) = self.index_roots.iter().position(|(n, _)| *n == index_number) {
            return &mut self.index_roots[pos].1;
        }
        let pos = self
            .index_roots
            .iter()
            .position(|(n, _)| *n > index_number)
            .unwrap_or(self.index_roots.len());
        self.index_roots
            .insert(pos, (index_number, PageReference::absent()));
        &mut self.index_roots[pos].1
    }

    pub fn references_mut(&mut self) -> impl Iterator<Item = &mut PageReference> {
        self.index_roots.iter_mut().map(|(_, r)| r)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        for table in &self.tables {
            out.extend_from_slice(&(table.by_key.len() as u32).to_le_bytes());
            for (key, entry) in &table.by_key {
                out.extend_from_slice(&key.to_le_bytes());
                out.extend_from_slice(&entry.count.to_le_bytes());
                out.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
                out.extend_from_slice(entry.name.as_bytes());
            }
        }
        out.extend_from_slice(&(self.index_roots.len() as u32).to_le_bytes());
        for (index_number, reference) in &self.index_roots {
            out.extend_from_slice(&index_number.to_le_bytes());
            reference.serialize_into(&mut out);
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut page = Self::default();
        let mut off = 0usize;
        for table in &mut page.tables {
            let count = read_u32(bytes, &mut off)? as usize;
            for _ in 0..count {
                let key = read_u32(bytes, &mut off)? as i32;
                let refcount = read_u32(bytes, &mut off)?;
                let name_len = read_u16(bytes, &mut off)? as usize;
                let end = off
                    .checked_add(name_len)
                    .filter(|&end| end <= bytes.len())
                    .ok_or_else(|| Error::corrupt("name page: truncated name"))?;
                let name = std::str::from_utf8(&bytes[off..end])
                    .map_err(|_| Error::corrupt("name page: invalid utf8"))?
                    .to_string();
                off = end;
                table.by_key.insert(
                    key,
                    NameEntry {
                        name,
                        count: refcount,
                    },
                );
            }
        }
        let root_count = read_u32(bytes, &mut off)? as usize;
        for _ in 0..root_count {
            let index_number = read_u32(bytes, &mut off)?;
            let reference = PageReference::deserialize_from(bytes, &mut off)?;
            page.index_roots.push((index_number, reference));
        }
        if off != bytes.len() {
            return Err(Error::corrupt("name page: trailing bytes"));
        }
        Ok(page)
    }
}

fn read_u16(bytes: &[u8], off: &mut usize) -> Result<u16> {
    let end = *off + 2;
    if end > bytes.len() {
        return Err(Error::corrupt("name page: truncated"));
    }
    let v = u16::from_le_bytes(bytes[*off..end].try_into().unwrap());
    *off = end;
    Ok(v)
}

fn read_u32(bytes: &[u8], off: &mut usize) -> Result<u32> {
    let end = *off + 4;
    if end > bytes.len() {
        return Err(Error::corrupt("name page: truncated"));
    }
    let v = u32::from_le_bytes(bytes[*off..end].try_into().unwrap());
    *off = end;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable_and_counted() {
        let mut page = NamePage::default();
        let a = page.create_name_key("price", NameKind::Element);
        let b = page.create_name_key("price", NameKind::Element);
        assert_eq!(a, b);
        assert_eq!(page.reference_count(a, NameKind::Element), 2);
        assert_eq!(page.get_name(a, NameKind::Element), Some("price"));
        assert_ne!(a, NO_NAME_KEY);
    }

    #[test]
    fn kinds_are_partitioned() {
        let mut page = NamePage::default();
        let element = page.create_name_key("id", NameKind::Element);
        assert_eq!(page.get_name_key("id", NameKind::Attribute), NO_NAME_KEY);
        let attribute = page.create_name_key("id", NameKind::Attribute);
        assert_eq!(element, attribute); // same hash, different table
        assert_eq!(page.reference_count(element, NameKind::Element), 1);
        assert_eq!(page.reference_count(attribute, NameKind::Attribute), 1);
    }

    #[test]
    fn release_drops_entry_at_zero() {
        let mut page = NamePage::default();
        let key = page.create_name_key("temp", NameKind::ObjectKey);
        page.create_name_key("temp", NameKind::ObjectKey);
        page.remove_name(key, NameKind::ObjectKey);
        assert_eq!(page.get_name(key, NameKind::ObjectKey), Some("temp"));
        page.remove_name(key, NameKind::ObjectKey);
        assert_eq!(page.get_name(key, NameKind::ObjectKey), None);
    }

    #[test]
    fn round_trip_with_index_roots() {
        let mut page = NamePage::default();
        page.create_name_key("a", NameKind::Element);
        page.create_name_key("b", NameKind::Namespace);
        *page.index_root_mut(2) = PageReference::to_committed(8192);

        let back = NamePage::deserialize(&page.serialize()).unwrap();
        assert_eq!(
            back.get_name_key("a", NameKind::Element),
            page.get_name_key("a", NameKind::Element)
        );
        assert_eq!(back.index_root(2).unwrap().key, 8192);
        assert!(back.index_root(1).is_none());
    }
}
