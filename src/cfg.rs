//! Run configuration.
//!
//! The [`Config`] struct carries everything the pipeline needs that is not
//! assembly source: section base addresses, the guest memory size, the
//! instruction budget, and presentation flags. The CLI populates one from
//! its arguments; library users can start from [`Config::default`].

use std::path::PathBuf;

/// The base address of each output section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionBases {
    /// Base address of the text section.
    pub text: u32,
    /// Base address of the data section.
    pub data: u32,
    /// Base address of the rodata section.
    pub rodata: u32,
    /// Base address of the bss section.
    pub bss: u32,
}
impl Default for SectionBases {
    fn default() -> Self {
        SectionBases {
            text: 0x1_0000,
            data: 0x2_0000,
            rodata: 0x3_0000,
            bss: 0x4_0000,
        }
    }
}

/// Configuration for one assemble/link/simulate run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The assembly source files, in link order.
    pub assembly_files: Vec<PathBuf>,
    /// The maximum number of instructions to retire before the run is
    /// aborted as exceeding its time limit.
    pub timeout: u64,
    /// The size of the guest address space in bytes. The stack starts at
    /// the top of this space and grows down.
    pub memory_size: u32,
    /// Where each section is placed.
    pub section_bases: SectionBases,
    /// Whether to trace execution through the debug observer.
    pub debug: bool,
    /// Whether to print verbose per-component summaries.
    pub detail: bool,
}
impl Default for Config {
    fn default() -> Self {
        Config {
            assembly_files: vec![],
            timeout: 100_000_000,
            memory_size: 4 << 20,
            section_bases: SectionBases::default(),
            debug: false,
            detail: false,
        }
    }
}
