use std::ops::Range;

/// A rectangle of cells pulled out of a [RectSet]. Both ranges are half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractedRect {
    pub col_start: usize,
    pub col_end: usize,
    pub row_start: usize,
    pub row_end: usize,
}

impl ExtractedRect {
    pub fn cols(&self) -> Range<usize> {
        self.col_start..self.col_end
    }

    pub fn rows(&self) -> Range<usize> {
        self.row_start..self.row_end
    }
}

/// A `rows x cols` dirty map. A cell is on iff it was damaged since the last
/// time it was popped.
///
/// Rows keep a count of their on cells so that scanning for the next rectangle
/// skips clean rows without touching their cells.
#[derive(Debug, Clone)]
pub struct RectSet {
    rows: usize,
    cols: usize,
    cells: Vec<bool>,
    row_counts: Vec<usize>,
    total: usize,
}

impl RectSet {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![false; rows * cols],
            row_counts: vec![0; rows],
            total: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Number of cells currently on.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        row < self.rows && col < self.cols && self.cells[row * self.cols + col]
    }

    /// Turn on every cell in `cols x rows`. Parts of the ranges outside the
    /// grid are ignored.
    pub fn add(&mut self, cols: Range<usize>, rows: Range<usize>) {
        let col_end = cols.end.min(self.cols);
        let row_end = rows.end.min(self.rows);
        for row in rows.start..row_end {
            for col in cols.start..col_end {
                self.set(row, col);
            }
        }
    }

    pub fn add_all(&mut self) {
        self.add(0..self.cols, 0..self.rows);
    }

    pub fn clear(&mut self) {
        self.cells.iter_mut().for_each(|cell| *cell = false);
        self.row_counts.iter_mut().for_each(|count| *count = 0);
        self.total = 0;
    }

    /// Extract one rectangle of on cells and turn them all off.
    ///
    /// The first on cell in row-major order anchors the rectangle. Its width is
    /// the on run starting there. Following rows extend the height only while
    /// they hold an on run with exactly the same start and width.
    pub fn pop(&mut self) -> Option<ExtractedRect> {
        if self.total == 0 {
            return None;
        }

        let row_start = self.row_counts.iter().position(|count| *count > 0)?;
        let col_start = (0..self.cols).find(|col| self.is_on(row_start, *col))?;
        let col_end = (col_start..self.cols)
            .find(|col| !self.is_on(row_start, *col))
            .unwrap_or(self.cols);

        let mut row_end = row_start + 1;
        while row_end < self.rows && self.has_exact_run(row_end, col_start, col_end) {
            row_end += 1;
        }

        for row in row_start..row_end {
            for col in col_start..col_end {
                self.unset(row, col);
            }
        }

        Some(ExtractedRect {
            col_start,
            col_end,
            row_start,
            row_end,
        })
    }

    /// Pop rectangles until the set is empty.
    pub fn drain(&mut self) -> impl Iterator<Item = ExtractedRect> + '_ {
        std::iter::from_fn(move || self.pop())
    }

    fn has_exact_run(&self, row: usize, col_start: usize, col_end: usize) -> bool {
        if self.row_counts[row] < col_end - col_start {
            return false;
        }
        let starts_here = col_start == 0 || !self.is_on(row, col_start - 1);
        let ends_here = col_end == self.cols || !self.is_on(row, col_end);
        starts_here && ends_here && (col_start..col_end).all(|col| self.is_on(row, col))
    }

    fn is_on(&self, row: usize, col: usize) -> bool {
        self.cells[row * self.cols + col]
    }

    fn set(&mut self, row: usize, col: usize) {
        let cell = &mut self.cells[row * self.cols + col];
        if !*cell {
            *cell = true;
            self.row_counts[row] += 1;
            self.total += 1;
        }
    }

    fn unset(&mut self, row: usize, col: usize) {
        let cell = &mut self.cells[row * self.cols + col];
        if *cell {
            *cell = false;
            self.row_counts[row] -= 1;
            self.total -= 1;
        }
    }
}
