use crate::{Error, Result};

/// Order-stable sibling identifier.
///
/// A dewey id is a list of divisions; sibling order is division order and
/// ancestry is prefix containment. The byte encoding writes each division
/// as a big-endian u32 so that lexicographic byte order equals document
/// order for ids of equal depth and prefix order otherwise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeweyId {
    divisions: Vec<u32>,
}

/// Gap left between consecutive sibling divisions so inserts between two
/// existing siblings usually fit without re-numbering.
const DIVISION_GAP: u32 = 8;

impl DeweyId {
    pub fn root() -> Self {
        Self { divisions: vec![1] }
    }

    pub fn from_divisions(divisions: Vec<u32>) -> Result<Self> {
        if divisions.is_empty() {
            return Err(Error::Invariant("dewey id must have at least one division"));
        }
        Ok(Self { divisions })
    }

    pub fn divisions(&self) -> &[u32] {
        &self.divisions
    }

    pub fn level(&self) -> usize {
        self.divisions.len()
    }

    pub fn is_ancestor_of(&self, other: &DeweyId) -> bool {
        other.divisions.len() > self.divisions.len()
            && other.divisions[..self.divisions.len()] == self.divisions[..]
    }

    /// First child of `self`.
    pub fn new_child(&self) -> Self {
        let mut divisions = self.divisions.clone();
        divisions.push(DIVISION_GAP);
        Self { divisions }
    }

    /// Id ordered after `self` among its siblings.
    pub fn new_following(&self) -> Self {
        let mut divisions = self.divisions.clone();
        let last = divisions.last_mut().unwrap();
        *last = last.saturating_add(DIVISION_GAP);
        Self { divisions }
    }

    /// Id strictly between two siblings, extending a level when the gap
    /// between their last divisions is exhausted.
    pub fn new_between(left: &DeweyId, right: &DeweyId) -> Result<Self> {
        if left.divisions.len() != right.divisions.len()
            || left.divisions[..left.divisions.len() - 1]
                != right.divisions[..right.divisions.len() - 1]
        {
            return Err(Error::Invariant("dewey ids are not siblings"));
        }
        let l = *left.divisions.last().unwrap();
        let r = *right.divisions.last().unwrap();
        if l >= r {
            return Err(Error::Invariant("left dewey id must precede right"));
        }
        let mut divisions = left.divisions.clone();
        if r - l > 1 {
            *divisions.last_mut().unwrap() = l + (r - l) / 2;
        } else {
            // No room at this level; descend one level under the left id.
            divisions.push(DIVISION_GAP);
        }
        Ok(Self { divisions })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.divisions.len() * 4);
        for division in &self.divisions {
            out.extend_from_slice(&division.to_be_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            return Err(Error::corrupt("dewey id: bad length"));
        }
        let divisions = bytes
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes(c.try_into().unwrap()))
            .collect();
        Ok(Self { divisions })
    }
}
