//! The decoded-instruction cache.
//!
//! Decoding an instruction word is pure, so the result of decoding each
//! text address is computed once and kept: [`ICache`] is a flat array of
//! slots over the text segment, indexed by `(pc - text start) / 4`.
//!
//! Straight-line execution avoids even the slot computation through a
//! [`Hint`]: each fetch returns the slot it used, the executor predicts
//! `pc + 4`, and the next fetch reuses `slot + 1` when the prediction
//! holds. Taken branches and jumps return an invalidated hint, and the
//! next fetch falls back to direct indexing.
//!
//! Fetches outside the text segment (the image is whatever the bytes say)
//! decode without caching.

use crate::ast::sim::SimInstr;

use super::mem::Mem;
use super::SimErr;

/// The slot value for fetches that bypass the cache.
const NO_SLOT: usize = usize::MAX;

/// A fetch prediction, produced by one fetch and consumed by the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hint {
    /// The slot holding the prediction's decode.
    slot: usize,
    /// The PC this hint predicts. A misprediction falls back to
    /// direct indexing.
    expected_pc: u32,
}
impl Hint {
    /// A hint that predicts nothing.
    pub fn invalid() -> Hint {
        // Instruction addresses are word-aligned, so 1 never matches.
        Hint { slot: NO_SLOT, expected_pc: 1 }
    }

    /// The hint for the instruction following `(slot, pc)` in sequence.
    fn next(slot: usize, pc: u32) -> Hint {
        match slot {
            NO_SLOT => Hint::invalid(),
            _ => Hint { slot: slot + 1, expected_pc: pc.wrapping_add(4) },
        }
    }
}
impl Default for Hint {
    fn default() -> Self {
        Hint::invalid()
    }
}

/// The decoded-executable cache over the text segment.
pub struct ICache {
    base: u32,
    slots: Vec<Option<SimInstr>>,
}
impl ICache {
    /// Creates an empty cache covering `[base, base + len)`.
    pub fn new(base: u32, len: u32) -> Self {
        ICache {
            base,
            slots: vec![None; (len / 4) as usize],
        }
    }

    /// Fetches the decoded instruction at `pc`.
    ///
    /// Returns the instruction along with the hint to pass to the next
    /// fetch should execution fall through to `pc + 4`.
    ///
    /// Raises `InsMisAligned` for a misaligned PC, `InsOutOfBound` for a
    /// PC outside memory, and `InsUnknown` for an undecodable word.
    pub fn ifetch(&mut self, pc: u32, hint: Hint, mem: &Mem) -> Result<(SimInstr, Hint), SimErr> {
        if pc % 4 != 0 {
            return Err(SimErr::InsMisAligned { addr: pc });
        }

        let slot = if hint.expected_pc == pc && hint.slot < self.slots.len() {
            hint.slot
        } else {
            match (pc.wrapping_sub(self.base) / 4) as usize {
                s if s < self.slots.len() && pc >= self.base => s,
                _ => NO_SLOT,
            }
        };

        if slot == NO_SLOT {
            // Outside text: decode without caching.
            let word = mem.load_cmd(pc)?;
            let instr = SimInstr::decode(word)
                .ok_or(SimErr::InsUnknown { addr: pc, cmd: word })?;
            return Ok((instr, Hint::invalid()));
        }

        let instr = match self.slots[slot] {
            Some(instr) => instr,
            None => {
                let word = mem.load_cmd(pc)?;
                let instr = SimInstr::decode(word)
                    .ok_or(SimErr::InsUnknown { addr: pc, cmd: word })?;
                self.slots[slot] = Some(instr);
                instr
            },
        };
        Ok((instr, Hint::next(slot, pc)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::reg_consts::*;
    use crate::ast::sim::IFunct;

    fn mem_with_nops(base: u32, count: u32) -> Mem {
        let mut mem = Mem::new(0x20000);
        for i in 0..count {
            mem.store_i32(base + i * 4, 0x0000_0013).unwrap();
        }
        mem
    }

    #[test]
    fn test_fetch_decodes_and_caches() {
        let mem = mem_with_nops(0x10000, 4);
        let mut cache = ICache::new(0x10000, 16);

        let (instr, hint) = cache.ifetch(0x10000, Hint::invalid(), &mem).unwrap();
        assert_eq!(instr, SimInstr::I(IFunct::Addi, ZERO, ZERO, 0));

        // The returned hint predicts the fall-through fetch.
        let (instr2, _) = cache.ifetch(0x10004, hint, &mem).unwrap();
        assert_eq!(instr2, instr);
    }

    #[test]
    fn test_fetch_is_pure() {
        let mem = mem_with_nops(0x10000, 1);
        let mut cache = ICache::new(0x10000, 4);

        let (a, _) = cache.ifetch(0x10000, Hint::invalid(), &mem).unwrap();
        let (b, _) = cache.ifetch(0x10000, Hint::invalid(), &mem).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_misprediction_falls_back() {
        let mem = mem_with_nops(0x10000, 4);
        let mut cache = ICache::new(0x10000, 16);

        let (_, hint) = cache.ifetch(0x10000, Hint::invalid(), &mem).unwrap();
        // A taken branch lands somewhere else; the stale hint must not
        // serve the wrong slot.
        let (instr, _) = cache.ifetch(0x1000C, hint, &mem).unwrap();
        assert_eq!(instr, SimInstr::I(IFunct::Addi, ZERO, ZERO, 0));
    }

    #[test]
    fn test_fetch_traps() {
        let mem = mem_with_nops(0x10000, 1);
        let mut cache = ICache::new(0x10000, 4);

        assert!(matches!(
            cache.ifetch(0x10002, Hint::invalid(), &mem),
            Err(SimErr::InsMisAligned { addr: 0x10002 })
        ));
        assert!(matches!(
            cache.ifetch(0xFF00_0000, Hint::invalid(), &mem),
            Err(SimErr::InsOutOfBound { .. })
        ));
        // A zero word inside text is not a valid encoding.
        assert!(matches!(
            cache.ifetch(0x10004, Hint::invalid(), &mem),
            Err(SimErr::InsUnknown { addr: 0x10004, .. })
        ));
    }

    #[test]
    fn test_fetch_outside_text_is_uncached() {
        // Executable bytes in the data region still run.
        let mut mem = Mem::new(0x20000);
        mem.store_i32(0x1F000, 0x0000_0013).unwrap();
        let mut cache = ICache::new(0x10000, 4);

        let (instr, hint) = cache.ifetch(0x1F000, Hint::invalid(), &mem).unwrap();
        assert_eq!(instr, SimInstr::I(IFunct::Addi, ZERO, ZERO, 0));
        assert_eq!(hint, Hint::invalid());
    }
}
