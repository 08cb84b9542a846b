use crate::hot::dbit::{discriminative_bit_padded, is_bit_set};
use crate::hot::leaf::HotLeafPage;
use crate::{Error, Result};

/// Outcome of a height-optimal leaf split: the partition key, the bit
/// that discriminates the halves, and which side that bit selects.
#[derive(Debug, Clone)]
pub struct SplitPlan {
    pub split_key: Vec<u8>,
    pub discriminative_bit: u64,
    /// Whether the set-bit side of the new BiNode is the right half.
    /// Usually true; a prefix-length discriminator can invert it, in
    /// which case the children swap.
    pub set_side_is_right: bool,
}

/// Leaf splitter following Binna's Algorithm 1: the partition point is
/// the first entry where the key set's root discriminative bit (the
/// first bit on which the smallest and largest key disagree) is set,
/// not a median-by-count split. Each half is then an exact bit-prefix
/// subtrie, so the resulting sub-tries are minimum-height by
/// construction and the BiNode over them routes every present and
/// future key correctly. Splits always yield a BiNode here; consecutive
/// splits whose bits share an 8-byte window are fused later by the
/// upgrade rules rather than built as a SpanNode directly.
pub struct HeightOptimalSplitter;

impl HeightOptimalSplitter {
    /// Splits `left` in place, moving the set-bit suffix of its entries
    /// into the empty `right`. `None` means the page is irreducible:
    /// fewer than two entries, or no routable bit separates them.
    pub fn split_leaf(left: &mut HotLeafPage, right: &mut HotLeafPage) -> Result<Option<SplitPlan>> {
        let Some(split_key) = left.split_to(right)? else {
            return Ok(None);
        };
        let left_max = left
            .max_key()
            .ok_or(Error::Invariant("split left an empty page behind"))?;
        let bit = discriminative_bit_padded(left_max, &split_key);
        if bit < 0 {
            return Err(Error::Invariant("split halves share their boundary key"));
        }
        let bit = bit as u64;
        Ok(Some(SplitPlan {
            set_side_is_right: is_bit_set(&split_key, bit),
            split_key,
            discriminative_bit: bit,
        }))
    }
}
