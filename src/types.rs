use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    #[serde(rename = "r")]
    pub row: i32,
    #[serde(rename = "c")]
    pub col: i32,
}

impl Cell {
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    pub fn manhattan(self, other: Cell) -> i32 {
        (self.row - other.row).abs() + (self.col - other.col).abs()
    }

    pub fn orthogonal_neighbors(self) -> [Cell; 4] {
        [
            Cell::new(self.row - 1, self.col),
            Cell::new(self.row + 1, self.col),
            Cell::new(self.row, self.col - 1),
            Cell::new(self.row, self.col + 1),
        ]
    }

    pub fn all_neighbors(self) -> [Cell; 8] {
        [
            Cell::new(self.row - 1, self.col - 1),
            Cell::new(self.row - 1, self.col),
            Cell::new(self.row - 1, self.col + 1),
            Cell::new(self.row, self.col - 1),
            Cell::new(self.row, self.col + 1),
            Cell::new(self.row + 1, self.col - 1),
            Cell::new(self.row + 1, self.col),
            Cell::new(self.row + 1, self.col + 1),
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    pub rows: i32,
    pub cols: i32,
}

impl GridSize {
    pub fn contains(self, cell: Cell) -> bool {
        cell.row >= 0 && cell.row < self.rows && cell.col >= 0 && cell.col < self.cols
    }

    pub fn cell_count(self) -> usize {
        (self.rows.max(0) * self.cols.max(0)) as usize
    }

    fn index_of(self, cell: Cell) -> Option<usize> {
        if !self.contains(cell) {
            return None;
        }
        Some((cell.row * self.cols + cell.col) as usize)
    }
}

/// Ordered cells to reproduce. Legacy paths hold one cell per row; Flow
/// patterns are short free-form walks.
pub type Path = Vec<Cell>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrapKind {
    #[serde(rename = "trap_life")]
    LifeLoss,
    #[serde(rename = "trap_back2")]
    RollbackTwo,
    #[serde(rename = "trap_stun")]
    Stun,
}

/// Bonus riding on a path cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathBonus {
    Gold(u32),
    Essence(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CellContent {
    Path {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bonus: Option<PathBonus>,
    },
    Neutral,
    Trap {
        kind: TrapKind,
    },
    Gold {
        value: u32,
    },
    Gem,
    Essence,
    Potion,
}

impl CellContent {
    pub fn is_path(&self) -> bool {
        matches!(self, CellContent::Path { .. })
    }

    pub fn trap(&self) -> Option<TrapKind> {
        match self {
            CellContent::Trap { kind } => Some(*kind),
            _ => None,
        }
    }

    /// Standalone collectible bonus (not a bonus riding on a path cell).
    pub fn is_bonus(&self) -> bool {
        matches!(
            self,
            CellContent::Gold { .. } | CellContent::Gem | CellContent::Essence | CellContent::Potion
        )
    }
}

/// Row-major board content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    pub size: GridSize,
    cells: Vec<CellContent>,
}

impl Grid {
    pub fn filled(size: GridSize, content: CellContent) -> Self {
        Self {
            size,
            cells: vec![content; size.cell_count()],
        }
    }

    pub fn get(&self, cell: Cell) -> Option<&CellContent> {
        self.size.index_of(cell).and_then(|idx| self.cells.get(idx))
    }

    pub fn set(&mut self, cell: Cell, content: CellContent) {
        if let Some(idx) = self.size.index_of(cell) {
            self.cells[idx] = content;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Cell, &CellContent)> + '_ {
        let cols = self.size.cols.max(1);
        self.cells
            .iter()
            .enumerate()
            .map(move |(idx, content)| (Cell::new(idx as i32 / cols, idx as i32 % cols), content))
    }

    pub fn row(&self, row: i32) -> impl Iterator<Item = (Cell, &CellContent)> + '_ {
        self.iter().filter(move |(cell, _)| cell.row == row)
    }
}

/// Per-run quotas carried from one floor to the next.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub gem: u32,
    pub potion: u32,
}

/// Solo resources gathered by the player.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub gold: u64,
    #[serde(default)]
    pub essence: u64,
    #[serde(default)]
    pub gems: u64,
}

impl Resources {
    pub fn merge(&mut self, other: Resources) {
        self.gold += other.gold;
        self.essence += other.essence;
        self.gems += other.gems;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_serializes_with_short_keys() {
        let json = serde_json::to_string(&Cell::new(3, 1)).expect("serialize");
        assert_eq!(json, r#"{"r":3,"c":1}"#);
    }

    #[test]
    fn content_is_tagged_by_type() {
        let trap = serde_json::to_value(CellContent::Trap {
            kind: TrapKind::RollbackTwo,
        })
        .expect("serialize");
        assert_eq!(trap["type"], "trap");
        assert_eq!(trap["kind"], "trap_back2");

        let path = serde_json::to_value(CellContent::Path {
            bonus: Some(PathBonus::Gold(7)),
        })
        .expect("serialize");
        assert_eq!(path["type"], "path");
        assert_eq!(path["bonus"]["gold"], 7);
    }

    #[test]
    fn grid_iterates_row_major() {
        let size = GridSize { rows: 2, cols: 3 };
        let mut grid = Grid::filled(size, CellContent::Neutral);
        grid.set(Cell::new(1, 2), CellContent::Gem);
        let cells: Vec<Cell> = grid.iter().map(|(cell, _)| cell).collect();
        assert_eq!(cells[0], Cell::new(0, 0));
        assert_eq!(cells[5], Cell::new(1, 2));
        assert_eq!(grid.get(Cell::new(1, 2)), Some(&CellContent::Gem));
        assert_eq!(grid.get(Cell::new(2, 0)), None);
        assert_eq!(grid.row(1).count(), 3);
    }
}
