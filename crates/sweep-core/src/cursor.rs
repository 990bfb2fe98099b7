//! Write-position cursor for live-view buffers.
//!
//! [`SweepIndexCursor`] maps "the next measured sample" to a `(col, row)` cell
//! of a 2-D buffer. A 1-D sweep is a 2-D sweep with a single row. The row axis
//! is the fast axis: it moves on every sample, and the column moves each time
//! the row axis wraps.
//!
//! The cursor does not iterate by itself. The caller reads [`position`] to
//! store a sample, then calls [`advance`] once. Because of that
//! write-then-advance coupling the initial position is the first cell the
//! instrument reaches, which is the *last* cell of a reversed axis.
//!
//! ```text
//! cols=3, rows=2, alternate       cols=3, rows=2, raster
//!
//!   row 1  1 → 2   5               row 1  1   3   5
//!          ↑   ↓   ↑                      ↑   ↑   ↑
//!   row 0  0   3 → 4               row 0  0   2   4
//!        col 0  1  2                    col 0  1  2
//! ```
//!
//! [`position`]: SweepIndexCursor::position
//! [`advance`]: SweepIndexCursor::advance

/// Position of the next sample in a `cols × rows` grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepIndexCursor {
    max_col: isize,
    max_row: isize,
    reverse_cols: bool,
    initial_reverse_rows: bool,
    reverse_rows: bool,
    alternate: bool,
    col: isize,
    row: isize,
}

impl SweepIndexCursor {
    /// Create a cursor for a `cols × rows` grid.
    ///
    /// `cols` and `rows` are point counts and must be at least 1.
    /// `reverse_*` is true when that axis ramps downwards.
    pub fn new(
        cols: usize,
        rows: usize,
        reverse_cols: bool,
        reverse_rows: bool,
        alternate: bool,
    ) -> Self {
        debug_assert!(cols >= 1 && rows >= 1, "cursor grid must be at least 1x1");
        let mut cursor = Self {
            max_col: cols as isize - 1,
            max_row: rows as isize - 1,
            reverse_cols,
            initial_reverse_rows: reverse_rows,
            reverse_rows,
            alternate,
            col: 0,
            row: 0,
        };
        cursor.reset();
        cursor
    }

    /// Restore the constructed starting position and row direction.
    ///
    /// Used to sweep the same grid again without re-allocating its buffer.
    pub fn reset(&mut self) {
        self.reverse_rows = self.initial_reverse_rows;
        self.col = if self.reverse_cols { self.max_col } else { 0 };
        self.row = if self.reverse_rows { self.max_row } else { 0 };
    }

    /// Current `(col, row)`.
    ///
    /// After the last cell of the grid has been advanced past, the column is
    /// outside `0..cols`; see [`in_bounds`](Self::in_bounds).
    pub fn position(&self) -> (isize, isize) {
        (self.col, self.row)
    }

    /// Whether the current position lies inside the grid.
    pub fn in_bounds(&self) -> bool {
        (0..=self.max_col).contains(&self.col) && (0..=self.max_row).contains(&self.row)
    }

    /// Move to the cell of the next sample.
    ///
    /// The column is not bounds-checked: advancing `cols * rows` times leaves
    /// the cursor one column past the grid, which callers detect with
    /// [`in_bounds`](Self::in_bounds).
    pub fn advance(&mut self) {
        let mut row = if self.reverse_rows {
            self.row - 1
        } else {
            self.row + 1
        };

        if row < 0 || row > self.max_row {
            if self.alternate {
                row = row.clamp(0, self.max_row);
                self.reverse_rows = !self.reverse_rows;
            } else {
                row = if self.reverse_rows { self.max_row } else { 0 };
            }
            self.col += if self.reverse_cols { -1 } else { 1 };
        }

        self.row = row;
    }

    /// Grid shape as `(cols, rows)`.
    pub fn shape(&self) -> (usize, usize) {
        ((self.max_col + 1) as usize, (self.max_row + 1) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn visit(cursor: &mut SweepIndexCursor, count: usize) -> Vec<(isize, isize)> {
        let mut visited = Vec::with_capacity(count);
        for i in 0..count {
            visited.push(cursor.position());
            if i + 1 < count {
                cursor.advance();
            }
        }
        visited
    }

    #[test]
    fn test_snake_order_example() {
        let mut cursor = SweepIndexCursor::new(3, 2, false, false, true);
        assert_eq!(
            visit(&mut cursor, 6),
            vec![(0, 0), (0, 1), (1, 1), (1, 0), (2, 0), (2, 1)]
        );
    }

    #[test]
    fn test_raster_order() {
        let mut cursor = SweepIndexCursor::new(3, 2, false, false, false);
        assert_eq!(
            visit(&mut cursor, 6),
            vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1)]
        );
    }

    #[test]
    fn test_reversed_axes_start_at_the_far_end() {
        let cursor = SweepIndexCursor::new(4, 3, true, false, false);
        assert_eq!(cursor.position(), (3, 0));

        let cursor = SweepIndexCursor::new(4, 3, false, true, false);
        assert_eq!(cursor.position(), (0, 2));

        let mut cursor = SweepIndexCursor::new(2, 3, true, true, false);
        assert_eq!(
            visit(&mut cursor, 6),
            vec![(1, 2), (1, 1), (1, 0), (0, 2), (0, 1), (0, 0)]
        );
    }

    #[test]
    fn test_one_dimensional_sweep() {
        let mut cursor = SweepIndexCursor::new(4, 1, false, false, true);
        assert_eq!(visit(&mut cursor, 4), vec![(0, 0), (1, 0), (2, 0), (3, 0)]);

        let mut cursor = SweepIndexCursor::new(3, 1, true, false, false);
        assert_eq!(visit(&mut cursor, 3), vec![(2, 0), (1, 0), (0, 0)]);
    }

    #[test]
    fn test_bijection_over_all_configurations() {
        for cols in 1..=5 {
            for rows in 1..=5 {
                for flags in 0..8u8 {
                    let reverse_cols = flags & 1 != 0;
                    let reverse_rows = flags & 2 != 0;
                    let alternate = flags & 4 != 0;
                    let mut cursor =
                        SweepIndexCursor::new(cols, rows, reverse_cols, reverse_rows, alternate);

                    let initial = (
                        if reverse_cols { cols as isize - 1 } else { 0 },
                        if reverse_rows { rows as isize - 1 } else { 0 },
                    );
                    assert_eq!(cursor.position(), initial);

                    let visited = visit(&mut cursor, cols * rows);
                    let unique: HashSet<_> = visited.iter().copied().collect();
                    assert_eq!(
                        unique.len(),
                        cols * rows,
                        "duplicate cell for {cols}x{rows} flags={flags:03b}"
                    );
                    assert!(visited.iter().all(|&(c, r)| {
                        (0..cols as isize).contains(&c) && (0..rows as isize).contains(&r)
                    }));
                }
            }
        }
    }

    #[test]
    fn test_row_direction_flips_on_column_change_when_alternating() {
        let rows = 4;
        let mut cursor = SweepIndexCursor::new(5, rows, false, false, true);
        let visited = visit(&mut cursor, 5 * rows);
        for (col, pass) in visited.chunks(rows).enumerate() {
            assert!(pass.iter().all(|&(c, _)| c == col as isize));
            let rows_seen: Vec<isize> = pass.iter().map(|&(_, r)| r).collect();
            let mut expected: Vec<isize> = (0..rows as isize).collect();
            if col % 2 == 1 {
                expected.reverse();
            }
            assert_eq!(rows_seen, expected);
        }
    }

    #[test]
    fn test_reset_restores_row_direction() {
        let mut cursor = SweepIndexCursor::new(3, 2, false, false, true);
        let first = visit(&mut cursor, 6);
        cursor.advance();
        assert!(!cursor.in_bounds());

        cursor.reset();
        assert_eq!(cursor.position(), (0, 0));
        assert_eq!(visit(&mut cursor, 6), first);
    }

    #[test]
    fn test_advancing_past_the_grid_leaves_bounds() {
        let mut cursor = SweepIndexCursor::new(2, 2, false, false, false);
        for _ in 0..3 {
            cursor.advance();
            assert!(cursor.in_bounds());
        }
        cursor.advance();
        assert_eq!(cursor.position(), (2, 0));
        assert!(!cursor.in_bounds());
    }
}
