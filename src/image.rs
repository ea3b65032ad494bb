//! Contract between the programmer and an external bitstream parser.
//!
//! The parser (a JED reader, typically) owns the file format; the
//! programmer only consumes ordered fixed-width rows per logical flash
//! section plus the two scalar feature registers.

pub trait Image {
    fn section_count(&self) -> usize;

    /// Ordered fixed-width data rows for one logical section.  `index`
    /// must be below `section_count`.
    fn data_for_section(&self, index: usize) -> &[Vec<u8>];

    /// Start address of one logical section.  `index` must be below
    /// `section_count`.
    fn offset_for_section(&self, index: usize) -> u32;

    /// 64-bit feature row value for the whole image.
    fn feature_row(&self) -> u64;

    /// 16-bit feabits value for the whole image.
    fn feabits(&self) -> u16;
}

/// One logical flash section.
#[derive(Clone, Debug)]
pub struct Section {
    pub offset: u32,
    pub rows: Vec<Vec<u8>>,
}

/// Plain in-memory image, for callers that assemble programming data
/// themselves.
#[derive(Clone, Debug, Default)]
pub struct RawImage {
    pub sections: Vec<Section>,
    pub feature_row: u64,
    pub feabits: u16,
}

impl Image for RawImage {
    fn section_count(&self) -> usize {
        self.sections.len()
    }

    fn data_for_section(&self, index: usize) -> &[Vec<u8>] {
        &self.sections[index].rows
    }

    fn offset_for_section(&self, index: usize) -> u32 {
        self.sections[index].offset
    }

    fn feature_row(&self) -> u64 {
        self.feature_row
    }

    fn feabits(&self) -> u16 {
        self.feabits
    }
}
