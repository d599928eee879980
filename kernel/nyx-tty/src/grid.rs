//! The text grid behind a VTY (spec 3: "a logical text grid: columns, rows
//! (bounded), cursor position, foreground/background color indices, a cell
//! array").
//!
//! Mutation never allocates: the cell array is a fixed-size array sized to
//! [`MAX_COLS`] * [`MAX_ROWS`], and an open VTY's actual `cols`/`rows` are a
//! sub-rectangle of it chosen at open time.

use crate::cell::{Cell, CellFlags, ColorIndex, DEFAULT_BG, DEFAULT_FG};

/// Upper bound on a grid's column count (grounded in the console's fixed
/// cell-array sizing, `fbcon::cell::DirtyBits`'s same "bound instead of
/// allocate" approach).
pub const MAX_COLS: usize = 128;

/// Upper bound on a grid's row count.
pub const MAX_ROWS: usize = 48;

/// Error constructing or addressing a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridError {
    /// Requested `cols`/`rows` exceed [`MAX_COLS`]/[`MAX_ROWS`], or either is zero.
    OutOfRange,
}

/// A fixed-capacity character grid with cursor and default-color state.
pub struct Grid {
    cells: [Cell; MAX_COLS * MAX_ROWS],
    cols: u32,
    rows: u32,
    cursor_col: u32,
    cursor_row: u32,
    current_fg: ColorIndex,
    current_bg: ColorIndex,
    current_flags: CellFlags,
}

impl Grid {
    /// Creates a blank grid of `cols` by `rows` cells.
    pub const fn new(cols: u32, rows: u32) -> Result<Self, GridError> {
        if cols == 0 || rows == 0 || cols as usize > MAX_COLS || rows as usize > MAX_ROWS {
            return Err(GridError::OutOfRange);
        }
        Ok(Self {
            cells: [Cell::BLANK; MAX_COLS * MAX_ROWS],
            cols,
            rows,
            cursor_col: 0,
            cursor_row: 0,
            current_fg: DEFAULT_FG,
            current_bg: DEFAULT_BG,
            current_flags: CellFlags::empty(),
        })
    }

    pub const fn cols(&self) -> u32 {
        self.cols
    }

    pub const fn rows(&self) -> u32 {
        self.rows
    }

    pub const fn cursor(&self) -> (u32, u32) {
        (self.cursor_col, self.cursor_row)
    }

    /// Sets the foreground/background color used by subsequently written
    /// characters. Does not repaint already-written cells.
    pub fn set_colors(&mut self, fg: ColorIndex, bg: ColorIndex) {
        self.current_fg = fg;
        self.current_bg = bg;
    }

    /// Returns the live cell slice, row-major, `cols * rows` long — the
    /// backing store for `get_property(VtyCells)` (spec 4.4 "Properties").
    pub fn cells(&self) -> &[Cell] {
        &self.cells[..(self.cols * self.rows) as usize]
    }

    fn index(&self, col: u32, row: u32) -> usize {
        (row * self.cols + col) as usize
    }

    /// Writes bytes to the grid. Recognized control bytes (`\n \r \b \t`)
    /// move the cursor; every other byte — including the other C0 control
    /// bytes the input ring's filter would have dropped — is placed into a
    /// cell verbatim (spec section 9: "write to the grid passes bytes that
    /// are not recognized escape/control codes through to `put_char`
    /// verbatim — filtering is an input-ring policy, not a display
    /// policy").
    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            match b {
                b'\n' => self.newline(),
                b'\r' => self.cursor_col = 0,
                0x08 => self.backspace(),
                b'\t' => self.tab(),
                _ => self.put_char(b),
            }
        }
    }

    fn put_char(&mut self, ch: u8) {
        if self.cursor_col >= self.cols {
            self.cursor_col = 0;
            self.cursor_row += 1;
        }
        if self.cursor_row >= self.rows {
            self.scroll_up();
            self.cursor_row = self.rows - 1;
        }

        let idx = self.index(self.cursor_col, self.cursor_row);
        self.cells[idx] = Cell { ch, fg: self.current_fg, bg: self.current_bg, flags: self.current_flags };
        self.cursor_col += 1;
    }

    fn newline(&mut self) {
        self.cursor_col = 0;
        self.cursor_row += 1;
        if self.cursor_row >= self.rows {
            self.scroll_up();
            self.cursor_row = self.rows - 1;
        }
    }

    fn backspace(&mut self) {
        if self.cursor_col > 0 {
            self.cursor_col -= 1;
        } else if self.cursor_row > 0 {
            self.cursor_row -= 1;
            self.cursor_col = self.cols - 1;
        }
    }

    fn tab(&mut self) {
        let next = (self.cursor_col + 4) & !3;
        self.cursor_col = next.min(self.cols - 1);
    }

    /// Shifts every row up by one, blanking the last row. Cells beyond the
    /// live `cols * rows` window are left untouched.
    fn scroll_up(&mut self) {
        if self.rows <= 1 {
            return;
        }
        for row in 1..self.rows {
            for col in 0..self.cols {
                let src = self.index(col, row);
                let dst = self.index(col, row - 1);
                self.cells[dst] = self.cells[src];
            }
        }
        let last = self.rows - 1;
        for col in 0..self.cols {
            let idx = self.index(col, last);
            self.cells[idx] = Cell::BLANK;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_char_advances_cursor() {
        let mut grid = Grid::new(4, 2).unwrap();
        grid.write(b"ab");
        assert_eq!(grid.cursor(), (2, 0));
        assert_eq!(grid.cells()[0].ch, b'a');
        assert_eq!(grid.cells()[1].ch, b'b');
    }

    #[test]
    fn wraps_to_next_line_at_end_of_row() {
        let mut grid = Grid::new(2, 2).unwrap();
        grid.write(b"abc");
        assert_eq!(grid.cursor(), (1, 1));
        assert_eq!(grid.cells()[2].ch, b'c');
    }

    #[test]
    fn newline_resets_column_and_advances_row() {
        let mut grid = Grid::new(4, 2).unwrap();
        grid.write(b"ab\nc");
        assert_eq!(grid.cursor(), (1, 1));
        assert_eq!(grid.cells()[4].ch, b'c');
    }

    #[test]
    fn scrolls_when_writing_past_the_last_row() {
        let mut grid = Grid::new(2, 2).unwrap();
        grid.write(b"ab\ncd\nef");
        // "ab" scrolled off the top; "cd" is now row 0, "ef" row 1.
        assert_eq!(grid.cells()[0].ch, b'c');
        assert_eq!(grid.cells()[1].ch, b'd');
        assert_eq!(grid.cells()[2].ch, b'e');
        assert_eq!(grid.cells()[3].ch, b'f');
    }

    #[test]
    fn backspace_moves_cursor_back_without_erasing() {
        let mut grid = Grid::new(4, 2).unwrap();
        grid.write(b"ab");
        grid.write(&[0x08]);
        assert_eq!(grid.cursor(), (1, 0));
    }

    #[test]
    fn backspace_at_column_zero_wraps_to_previous_row() {
        let mut grid = Grid::new(4, 2).unwrap();
        grid.write(b"ab\n");
        grid.write(&[0x08]);
        assert_eq!(grid.cursor(), (3, 0));
    }

    #[test]
    fn unrecognized_control_byte_is_written_verbatim() {
        let mut grid = Grid::new(4, 2).unwrap();
        grid.write(&[0x07]);
        assert_eq!(grid.cells()[0].ch, 0x07);
        assert_eq!(grid.cursor(), (1, 0));
    }

    #[test]
    fn rejects_dimensions_over_the_fixed_bound() {
        assert_eq!(Grid::new(0, 10), Err(GridError::OutOfRange));
        assert_eq!(Grid::new(MAX_COLS as u32 + 1, 1), Err(GridError::OutOfRange));
    }
}
