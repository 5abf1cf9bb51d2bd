//! Jump-destination lookup for runtime-dynamic jumps.
//!
//! A sorted `(pc, position)` array built once by the schedule builder.
//! Lookup probes an interpolated index first — JUMPDESTs tend to be
//! spread evenly through compiled code — and falls back to halving binary
//! search inside whichever half the estimate landed in. Expected
//! `O(log log n)` probes on even distributions, `O(log n)` worst case, no
//! extra memory.

use crate::Pc;

/// One JUMPDEST: its bytecode offset and the schedule position of its
/// handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpTableEntry {
    pub pc: Pc,
    /// Index of the JUMPDEST handler item in the schedule.
    pub position: u32,
}

/// Sorted map from JUMPDEST pc to dispatch position.
#[derive(Debug, Clone, Default)]
pub struct JumpTable {
    entries: Box<[JumpTableEntry]>,
}

impl JumpTable {
    /// Build from entries already sorted by strictly increasing pc, as the
    /// builder collects them in bytecode order.
    pub(crate) fn from_sorted(entries: Vec<JumpTableEntry>) -> Self {
        debug_assert!(entries.windows(2).all(|w| match w {
            [a, b] => a.pc < b.pc,
            _ => true,
        }));
        Self {
            entries: entries.into_boxed_slice(),
        }
    }

    /// Dispatch position of the JUMPDEST at `target_pc`, or `None` if that
    /// offset is not a jump destination.
    pub fn find(&self, target_pc: Pc) -> Option<usize> {
        let first = self.entries.first()?;
        let last = self.entries.last()?;
        if target_pc < first.pc || target_pc > last.pc {
            return None;
        }

        let mut lo = 0usize;
        let mut hi = self.entries.len().checked_sub(1)?;

        // Interpolated first probe: estimate where the target would sit if
        // destinations were evenly distributed, then narrow the bounds
        // toward whichever side the estimate missed on.
        if let Some(est) = interpolate(target_pc, first.pc, last.pc, self.entries.len()) {
            let entry = self.entries.get(est)?;
            if entry.pc == target_pc {
                return position_of(entry);
            }
            if entry.pc < target_pc {
                lo = est.checked_add(1)?;
            } else {
                hi = est.checked_sub(1)?;
            }
        }

        // Standard halving search within the narrowed bounds.
        while lo <= hi {
            let mid = lo.wrapping_add(hi) / 2;
            let entry = self.entries.get(mid)?;
            if entry.pc == target_pc {
                return position_of(entry);
            }
            if entry.pc < target_pc {
                lo = mid.checked_add(1)?;
            } else {
                hi = mid.checked_sub(1)?;
            }
        }
        None
    }

    pub fn entries(&self) -> &[JumpTableEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn position_of(entry: &JumpTableEntry) -> Option<usize> {
    usize::try_from(entry.position).ok()
}

/// Index estimate `(target - min) * (n - 1) / (max - min)`, clamped into
/// `[0, n - 1]`. `None` when the span is degenerate.
fn interpolate(target: Pc, min: Pc, max: Pc, n: usize) -> Option<usize> {
    let span = u64::from(max.checked_sub(min)?);
    if span == 0 {
        return None;
    }
    let offset = u64::from(target.checked_sub(min)?);
    let slots = u64::try_from(n.checked_sub(1)?).ok()?;
    let est = u128::from(offset)
        .checked_mul(u128::from(slots))?
        .checked_div(u128::from(span))?;
    usize::try_from(est).ok().map(|e| e.min(n.saturating_sub(1)))
}
