//! Character cell and color types for the VTY grid (spec 3: "a cell array
//! (character + colors + flags)").

bitflags::bitflags! {
    /// Per-cell display attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CellFlags: u8 {
        /// Rendered with the bright variant of its foreground color.
        const BOLD = 1 << 0;
        /// Foreground and background swapped at render time.
        const REVERSE = 1 << 1;
    }
}

/// One of the 16 standard color indices a cell's `fg`/`bg` may hold.
///
/// The grid only ever stores the index (spec 3: "foreground/background
/// color indices") — mapping an index to an actual pixel value is a
/// framebuffer-driver concern outside this core.
pub type ColorIndex = u8;

/// Default foreground color index (light grey).
pub const DEFAULT_FG: ColorIndex = 7;
/// Default background color index (black).
pub const DEFAULT_BG: ColorIndex = 0;

/// A single character cell in the VTY grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    /// The cell's character. Only ever set from bytes the control-byte
    /// filter accepted (spec section 9: control bytes below 0x20, other
    /// than `\n \r \b \t`, never reach a cell).
    pub ch: u8,
    pub fg: ColorIndex,
    pub bg: ColorIndex,
    pub flags: CellFlags,
}

impl Cell {
    /// A blank cell with default colors and no attributes.
    pub const BLANK: Self = Self { ch: b' ', fg: DEFAULT_FG, bg: DEFAULT_BG, flags: CellFlags::empty() };
}
