//! A single virtual terminal: one [`Grid`] plus one [`InputRing`] behind a
//! per-VTY spinlock (spec 3: "Per-VTY spinlock serializes grid mutation and
//! input enqueue/dequeue").

use nyx_core::sync::SpinLock;

use crate::cell::Cell;
use crate::grid::{Grid, GridError};
use crate::input::InputRing;

/// Default grid dimensions a freshly booted VTY is sized to (an 80x25 text
/// mode, the traditional PC console shape).
pub const DEFAULT_COLS: u32 = 80;
pub const DEFAULT_ROWS: u32 = 25;

/// Errors addressing a VTY or its grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VtyError {
    /// `cols`/`rows` passed to [`Vty::new`] were invalid (see [`GridError`]).
    InvalidDimensions,
}

impl From<GridError> for VtyError {
    fn from(_: GridError) -> Self {
        VtyError::InvalidDimensions
    }
}

/// `get_property(VtyInfo)` payload (spec 4.4 "Properties").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VtyInfo {
    pub cols: u32,
    pub rows: u32,
    pub cursor_col: u32,
    pub cursor_row: u32,
}

struct VtyState {
    grid: Grid,
    input: InputRing,
}

/// One virtual terminal.
pub struct Vty {
    state: SpinLock<VtyState>,
}

impl Vty {
    /// Creates a VTY sized to `cols` by `rows` cells. Panics if the
    /// dimensions exceed `grid::MAX_COLS`/`grid::MAX_ROWS` — only used to
    /// build compile-time-checked static tables, where that would be a
    /// build error rather than a runtime one.
    pub const fn new(cols: u32, rows: u32) -> Self {
        let grid = match Grid::new(cols, rows) {
            Ok(g) => g,
            Err(_) => panic!("nyx-tty: default VTY dimensions exceed MAX_COLS/MAX_ROWS"),
        };
        Self { state: SpinLock::new(VtyState { grid, input: InputRing::new() }) }
    }

    /// `write(entry, user_address, length, 0)` dispatched to this VTY
    /// (spec 4.4 "Read / write"; offset is unused by VTYs).
    pub fn write(&self, bytes: &[u8]) {
        self.state.lock().grid.write(bytes);
    }

    /// `read(entry, user_address, length, 0)` dispatched to this VTY:
    /// dequeues up to `out.len()` bytes already sitting in the input
    /// ring. Never blocks — an empty ring simply yields `0` (this core's
    /// spec gives VTY read no suspension behavior, unlike pipes).
    pub fn read(&self, out: &mut [u8]) -> usize {
        self.state.lock().input.pop(out)
    }

    /// Feeds driver-supplied bytes (e.g. decoded keyboard scancodes) into
    /// the input ring, applying the printable-ASCII filter. This is the
    /// `set_property(VtyInjectInput)` path (spec 4.4 "Properties").
    pub fn inject_input(&self, bytes: &[u8]) {
        self.state.lock().input.push_filtered(bytes);
    }

    /// `get_property(VtyInfo)`.
    pub fn info(&self) -> VtyInfo {
        let state = self.state.lock();
        let (cursor_col, cursor_row) = state.grid.cursor();
        VtyInfo { cols: state.grid.cols(), rows: state.grid.rows(), cursor_col, cursor_row }
    }

    /// Copies the live cell grid into `out`, row-major, up to
    /// `cols * rows` cells (`get_property(VtyCells)`). Returns the number
    /// of cells copied.
    pub fn get_cells(&self, out: &mut [Cell]) -> usize {
        let state = self.state.lock();
        let cells = state.grid.cells();
        let n = out.len().min(cells.len());
        out[..n].copy_from_slice(&cells[..n]);
        n
    }

    /// Sets the color used by subsequently written characters.
    pub fn set_colors(&self, fg: u8, bg: u8) {
        self.state.lock().grid.set_colors(fg, bg);
    }
}
