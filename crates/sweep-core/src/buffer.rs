//! Live-view buffers.
//!
//! Each output channel of a 1-D or 2-D sweep gets a fresh [`OutputBuffer`]
//! right before the sweep starts. The buffer is the single writer: it lives on
//! the worker task and pairs the cell storage with a [`SweepIndexCursor`].
//! Any number of [`LiveView`] handles can read the same cells concurrently.
//!
//! Cells are stored as `f64` bit patterns in atomics, so readers never block
//! the writer and never see a torn value. A reader may observe a buffer
//! mid-fill: unwritten cells hold NaN, which means "no data yet".
//!
//! Storage is row-major over `(col, row)`: cell `(c, r)` lives at
//! `c * rows + r`, matching a `cols × rows` array indexed `[col][row]`.

use crate::axis::SweepPlan;
use crate::cursor::SweepIndexCursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Cells {
    channel: String,
    cols: usize,
    rows: usize,
    values: Box<[AtomicU64]>,
}

impl Cells {
    fn new(channel: String, cols: usize, rows: usize) -> Self {
        let values = (0..cols * rows)
            .map(|_| AtomicU64::new(f64::NAN.to_bits()))
            .collect();
        Self {
            channel,
            cols,
            rows,
            values,
        }
    }

    fn index(&self, col: usize, row: usize) -> Option<usize> {
        (col < self.cols && row < self.rows).then(|| col * self.rows + row)
    }
}

/// Read-only handle on a channel's live buffer.
///
/// Cheap to clone; all clones observe the same cells.
#[derive(Clone)]
pub struct LiveView {
    cells: Arc<Cells>,
}

impl LiveView {
    /// Channel this buffer belongs to.
    pub fn channel(&self) -> &str {
        &self.cells.channel
    }

    /// Buffer shape as `(cols, rows)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.cells.cols, self.cells.rows)
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.values.len()
    }

    /// True for an empty buffer (never produced by allocation).
    pub fn is_empty(&self) -> bool {
        self.cells.values.is_empty()
    }

    /// Value at `(col, row)`; NaN when not written yet, `None` outside the grid.
    pub fn get(&self, col: usize, row: usize) -> Option<f64> {
        self.cells
            .index(col, row)
            .map(|i| f64::from_bits(self.cells.values[i].load(Ordering::Acquire)))
    }

    /// Copy of all cells in storage order.
    pub fn snapshot(&self) -> Vec<f64> {
        self.cells
            .values
            .iter()
            .map(|v| f64::from_bits(v.load(Ordering::Acquire)))
            .collect()
    }

    /// Copy of all cells as one `Vec` per column.
    pub fn columns(&self) -> Vec<Vec<f64>> {
        let rows = self.cells.rows.max(1);
        self.snapshot().chunks(rows).map(<[f64]>::to_vec).collect()
    }

    /// Number of cells that already hold a measurement.
    pub fn filled(&self) -> usize {
        self.cells
            .values
            .iter()
            .filter(|v| !f64::from_bits(v.load(Ordering::Acquire)).is_nan())
            .count()
    }
}

impl std::fmt::Debug for LiveView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveView")
            .field("channel", &self.cells.channel)
            .field("shape", &self.shape())
            .field("filled", &self.filled())
            .finish()
    }
}

/// Writable live buffer of one channel, paired with its cursor.
///
/// Deliberately not `Clone`: whoever owns it is the only writer.
#[derive(Debug)]
pub struct OutputBuffer {
    view: LiveView,
    cursor: SweepIndexCursor,
}

impl OutputBuffer {
    /// Allocate a NaN-filled buffer for the given cursor's grid.
    pub fn new(channel: impl Into<String>, cursor: SweepIndexCursor) -> Self {
        let (cols, rows) = cursor.shape();
        Self {
            view: LiveView {
                cells: Arc::new(Cells::new(channel.into(), cols, rows)),
            },
            cursor,
        }
    }

    /// A read-only handle on this buffer.
    pub fn view(&self) -> LiveView {
        self.view.clone()
    }

    /// The write cursor.
    pub fn cursor(&self) -> &SweepIndexCursor {
        &self.cursor
    }

    /// Store `value` at the cursor position, then advance the cursor.
    ///
    /// Returns `false` and writes nothing when the cursor has already run
    /// past the grid, which only happens if more samples are recorded than
    /// the grid has points. The cursor is advanced either way.
    pub fn record(&mut self, value: f64) -> bool {
        let (col, row) = self.cursor.position();
        let written = if self.cursor.in_bounds() {
            match self.view.cells.index(col as usize, row as usize) {
                Some(i) => {
                    self.view.cells.values[i].store(value.to_bits(), Ordering::Release);
                    true
                }
                None => false,
            }
        } else {
            false
        };
        self.cursor.advance();
        written
    }

    /// Rewind the cursor to the first cell, keeping the stored values.
    ///
    /// Repeated acquisitions of the same grid overwrite the previous frame in
    /// place.
    pub fn rewind(&mut self) {
        self.cursor.reset();
    }
}

/// Allocate one live buffer per channel of `plan`.
///
/// Returns `None` when live view is disabled (more than two swept axes); the
/// sweep still runs, only the in-memory view is skipped. Axis 0 maps to
/// columns and axis 1 to rows; a 1-D sweep has a single row.
pub fn allocate_live_buffers(plan: &SweepPlan) -> Option<Vec<OutputBuffer>> {
    if !plan.live_view_enabled() {
        return None;
    }

    let cols_axis = &plan.axes[0].axis;
    let (rows, reverse_rows) = match plan.axes.get(1) {
        Some(swept) => (swept.axis.point_count, swept.axis.is_reversed()),
        None => (1, false),
    };

    let buffers = plan
        .channels
        .iter()
        .map(|channel| {
            let cursor = SweepIndexCursor::new(
                cols_axis.point_count,
                rows,
                cols_axis.is_reversed(),
                reverse_rows,
                plan.alternate,
            );
            OutputBuffer::new(channel.name.clone(), cursor)
        })
        .collect();

    Some(buffers)
}
