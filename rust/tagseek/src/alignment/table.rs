use crate::catalog::ModIndex;

/// How a cell was reached, used to rebuild the alignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trace {
    /// First cell of a window, optionally on an N-terminally modified endpoint.
    Start { n_term: Option<ModIndex> },
    /// Same row and node with one modification slot left unused.
    Carry { layer: u8 },
    /// One to three residues consumed from `(row, node, layer)`.
    Step {
        row: u16,
        node: u32,
        layer: u8,
        modification: Option<ModIndex>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    pub score: f32,
    pub trace: Trace,
}

/// Rows x nodes x modification layers. Unreachable cells are `None`.
///
/// One table is owned per worker and resized in place between windows.
#[derive(Debug, Clone, Default)]
pub struct AlignmentTable {
    rows: usize,
    nodes: usize,
    layers: usize,
    cells: Vec<Option<Cell>>,
}

impl AlignmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the table for a new window, reusing the allocation.
    pub fn reset(&mut self, rows: usize, nodes: usize, layers: usize) {
        self.rows = rows;
        self.nodes = nodes;
        self.layers = layers;
        self.cells.clear();
        self.cells.resize(rows * nodes * layers, None);
    }

    #[inline]
    fn index(&self, row: usize, node: usize, layer: usize) -> usize {
        debug_assert!(row < self.rows && node < self.nodes && layer < self.layers);
        (row * self.nodes + node) * self.layers + layer
    }

    #[inline]
    pub fn get(&self, row: usize, node: usize, layer: usize) -> Option<&Cell> {
        self.cells[self.index(row, node, layer)].as_ref()
    }

    /// Stores `cell` unless an equal or better one is already there.
    #[inline]
    pub fn offer(&mut self, row: usize, node: usize, layer: usize, cell: Cell) -> bool {
        let idx = self.index(row, node, layer);
        match &self.cells[idx] {
            Some(existing) if existing.score >= cell.score => false,
            _ => {
                self.cells[idx] = Some(cell);
                true
            }
        }
    }

    pub fn layers(&self) -> usize {
        self.layers
    }

    #[cfg(test)]
    fn allocated(&self) -> usize {
        self.cells.capacity()
    }
}
