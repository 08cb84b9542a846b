use crate::page::Page;
use crate::{Error, NO_KEY, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::FileExt as _;

/// Default in-memory budget of one transaction's intent log before
/// containers spill to the durable log file.
pub const DEFAULT_TIL_BUDGET: usize = 256 * 1024 * 1024;

/// Dirty state of one logical page inside a write transaction.
///
/// `complete` is the fully assembled read view the transaction's own
/// snapshot reads come from; `modified` carries only what this
/// transaction touched and is what the versioning algorithms persist.
/// For non-leaf pages the two coincide and `modified` is authoritative.
#[derive(Debug, Clone)]
pub struct PageContainer {
    pub complete: Page,
    pub modified: Page,
    /// Committed block offset this page was copied from, `NO_KEY` for
    /// pages first materialized in this transaction.
    pub prior_key: i64,
    /// Fragment chain of the committed page, newest first.
    pub prior_fragments: Vec<u64>,
    /// Fragments written since the last full snapshot, this one included.
    pub versions_since_snapshot: u32,
}

impl PageContainer {
    /// Container for a page that has no committed predecessor.
    pub fn fresh(page: Page) -> Self {
        Self {
            complete: page.clone(),
            modified: page,
            prior_key: NO_KEY,
            prior_fragments: Vec::new(),
            versions_since_snapshot: 0,
        }
    }

    pub fn cow(
        complete: Page,
        modified: Page,
        prior_key: i64,
        prior_fragments: Vec<u64>,
        versions_since_snapshot: u32,
    ) -> Self {
        Self {
            complete,
            modified,
            prior_key,
            prior_fragments,
            versions_since_snapshot,
        }
    }

    fn estimated_size(&self) -> usize {
        self.complete.estimated_size() + self.modified.estimated_size() + 64
    }

    fn serialize(&self) -> Vec<u8> {
        let complete = self.complete.serialize();
        let modified = self.modified.serialize();
        let mut out =
            Vec::with_capacity(24 + complete.len() + modified.len() + self.prior_fragments.len() * 8);
        out.extend_from_slice(&(complete.len() as u32).to_le_bytes());
        out.extend_from_slice(&complete);
        out.extend_from_slice(&(modified.len() as u32).to_le_bytes());
        out.extend_from_slice(&modified);
        out.extend_from_slice(&self.prior_key.to_le_bytes());
        out.extend_from_slice(&self.versions_since_snapshot.to_le_bytes());
        out.extend_from_slice(&(self.prior_fragments.len() as u32).to_le_bytes());
        for fragment in &self.prior_fragments {
            out.extend_from_slice(&fragment.to_le_bytes());
        }
        out
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut off = 0usize;
        let complete_len = read_u32(bytes, &mut off)? as usize;
        let complete = Page::deserialize(take(bytes, &mut off, complete_len)?)?;
        let modified_len = read_u32(bytes, &mut off)? as usize;
        let modified = Page::deserialize(take(bytes, &mut off, modified_len)?)?;
        let prior_key = i64::from_le_bytes(take(bytes, &mut off, 8)?.try_into().unwrap());
        let versions_since_snapshot = read_u32(bytes, &mut off)?;
        let fragment_count = read_u32(bytes, &mut off)? as usize;
        let mut prior_fragments = Vec::with_capacity(fragment_count);
        for _ in 0..fragment_count {
            prior_fragments.push(u64::from_le_bytes(
                take(bytes, &mut off, 8)?.try_into().unwrap(),
            ));
        }
        if off != bytes.len() {
            return Err(Error::corrupt("intent log: trailing container bytes"));
        }
        Ok(Self {
            complete,
            modified,
            prior_key,
            prior_fragments,
            versions_since_snapshot,
        })
    }
}

#[derive(Debug)]
enum Slot {
    Mem(PageContainer),
    Spilled { offset: u64, len: u32 },
    Vacant,
}

/// Per-transaction intent log: `log key → PageContainer`. Exhausting the
/// memory budget spills cold containers to the resource's durable log
/// file; spilled entries page back in transparently on access.
#[derive(Debug)]
pub struct IntentLog {
    slots: Vec<Slot>,
    mem_bytes: usize,
    budget: usize,
    spill_path: PathBuf,
    spill: Option<SpillFile>,
}

#[derive(Debug)]
struct SpillFile {
    file: File,
    end: u64,
}

impl IntentLog {
    pub fn new(log_dir: impl AsRef<Path>, budget: usize) -> Self {
        Self {
            slots: Vec::new(),
            mem_bytes: 0,
            budget,
            spill_path: log_dir.as_ref().join("intents.cam"),
            spill: None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| !matches!(slot, Slot::Vacant))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a container and returns its log key. One logical page
    /// gets exactly one log key for the life of the transaction; callers
    /// route repeated preparations through the page reference's
    /// `log_key`, so the same logical page is never inserted twice.
    pub fn insert(&mut self, container: PageContainer) -> Result<i64> {
        let log_key = self.slots.len() as i64;
        self.mem_bytes += container.estimated_size();
        self.slots.push(Slot::Mem(container));
        self.maybe_spill(log_key)?;
        Ok(log_key)
    }

    /// Idempotent replacement of an existing entry.
    pub fn replace(&mut self, log_key: i64, container: PageContainer) -> Result<()> {
        let old_size = match self.slot_mut(log_key)? {
            Slot::Mem(old) => old.estimated_size(),
            _ => 0,
        };
        self.mem_bytes = self.mem_bytes.saturating_sub(old_size);
        self.mem_bytes += container.estimated_size();
        *self.slot_mut(log_key)? = Slot::Mem(container);
        Ok(())
    }

    pub fn get_mut(&mut self, log_key: i64) -> Result<&mut PageContainer> {
        self.ensure_in_memory(log_key)?;
        match self.slot_mut(log_key)? {
            Slot::Mem(container) => Ok(container),
            _ => Err(Error::Invariant("intent log: slot not resident")),
        }
    }

    pub fn get(&mut self, log_key: i64) -> Result<&PageContainer> {
        Ok(self.get_mut(log_key)?)
    }

    /// Removes and returns the container; used once per page at commit.
    pub fn take(&mut self, log_key: i64) -> Result<PageContainer> {
        self.ensure_in_memory(log_key)?;
        let slot = std::mem::replace(self.slot_mut(log_key)?, Slot::Vacant);
        match slot {
            Slot::Mem(container) => {
                self.mem_bytes = self.mem_bytes.saturating_sub(container.estimated_size());
                Ok(container)
            }
            _ => Err(Error::Invariant("intent log: slot already taken")),
        }
    }

    /// Drops all entries and the spill file. Called on commit and abort.
    pub fn clear(&mut self) -> Result<()> {
        self.slots.clear();
        self.mem_bytes = 0;
        self.spill = None;
        if self.spill_path.exists() {
            std::fs::remove_file(&self.spill_path)?;
        }
        Ok(())
    }

    fn slot_mut(&mut self, log_key: i64) -> Result<&mut Slot> {
        if log_key < 0 {
            return Err(Error::Invariant("intent log: negative log key"));
        }
        self.slots
            .get_mut(log_key as usize)
            .ok_or(Error::Invariant("intent log: unknown log key"))
    }

    fn ensure_in_memory(&mut self, log_key: i64) -> Result<()> {
        let needs_load = matches!(self.slot_mut(log_key)?, Slot::Spilled { .. });
        if !needs_load {
            return Ok(());
        }
        let Slot::Spilled { offset, len } = *self.slot_mut(log_key)? else {
            unreachable!()
        };
        let container = self.read_spilled(offset, len)?;
        self.mem_bytes += container.estimated_size();
        *self.slot_mut(log_key)? = Slot::Mem(container);
        Ok(())
    }

    fn maybe_spill(&mut self, just_inserted: i64) -> Result<()> {
        if self.mem_bytes <= self.budget {
            return Ok(());
        }
        log::debug!(
            "intent log over budget ({} bytes), spilling to {}",
            self.mem_bytes,
            self.spill_path.display()
        );
        // Spill from the oldest entry forward, keeping the newest hot.
        for log_key in 0..self.slots.len() as i64 {
            if self.mem_bytes <= self.budget || log_key == just_inserted {
                continue;
            }
            if matches!(self.slots[log_key as usize], Slot::Mem(_)) {
                self.spill_one(log_key)?;
            }
        }
        Ok(())
    }

    fn spill_one(&mut self, log_key: i64) -> Result<()> {
        let Slot::Mem(container) = std::mem::replace(self.slot_mut(log_key)?, Slot::Vacant) else {
            return Err(Error::Invariant("intent log: spilling non-resident slot"));
        };
        let size = container.estimated_size();
        let body = container.serialize();
        let crc = crc32fast::hash(&body);

        if self.spill.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.spill_path)?;
            self.spill = Some(SpillFile { file, end: 0 });
        }
        let spill = self.spill.as_mut().unwrap();
        let offset = spill.end;
        spill.file.write_all(&(body.len() as u32).to_le_bytes())?;
        spill.file.write_all(&crc.to_le_bytes())?;
        spill.file.write_all(&body)?;
        spill.file.flush()?;
        spill.end += 8 + body.len() as u64;

        self.mem_bytes = self.mem_bytes.saturating_sub(size);
        *self.slot_mut(log_key)? = Slot::Spilled {
            offset,
            len: body.len() as u32,
        };
        Ok(())
    }

    fn read_spilled(&mut self, offset: u64, len: u32) -> Result<PageContainer> {
        let spill = self
            .spill
            .as_ref()
            .ok_or(Error::Invariant("intent log: no spill file"))?;
        let mut header = [0u8; 8];
        read_at(&spill.file, &mut header, offset)?;
        let stored_len = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let stored_crc = u32::from_le_bytes(header[4..8].try_into().unwrap());
        if stored_len != len {
            return Err(Error::corrupt("intent log: spill length mismatch"));
        }
        let mut body = vec![0u8; len as usize];
        read_at(&spill.file, &mut body, offset + 8)?;
        if crc32fast::hash(&body) != stored_crc {
            return Err(Error::corrupt("intent log: spill checksum mismatch"));
        }
        PageContainer::deserialize(&body)
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    file.read_exact_at(buf, offset)?;
    Ok(())
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], mut offset: u64) -> Result<()> {
    use std::os::windows::fs::FileExt as _;
    let mut done = 0;
    while done < buf.len() {
        let n = file.seek_read(&mut buf[done..], offset)?;
        if n == 0 {
            return Err(Error::Io(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            )));
        }
        done += n;
        offset += n as u64;
    }
    Ok(())
}

fn read_u32(bytes: &[u8], off: &mut usize) -> Result<u32> {
    Ok(u32::from_le_bytes(take(bytes, off, 4)?.try_into().unwrap()))
}

fn take<'a>(bytes: &'a [u8], off: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = off
        .checked_add(len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| Error::corrupt("intent log: truncated container"))?;
    let out = &bytes[*off..end];
    *off = end;
    Ok(out)
}
