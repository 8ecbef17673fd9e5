use crate::constants::{MAX_STRAIGHT_RUN, VERSUS_PATH_SEED_STRIDE};
use crate::rng::{hash_string, RandomSource, Rng};
use crate::types::{Cell, GridSize, Path};

/// Walks one cell per row from the bottom row to the top. The start column is
/// drawn from `rng`.
pub fn generate_path(rng: &mut impl RandomSource, size: GridSize) -> Path {
    let start_col = rng.int(0, size.cols - 1);
    walk(rng, size, start_col)
}

/// Same walk with a caller-chosen start column (clamped into the grid).
pub fn generate_path_from(rng: &mut impl RandomSource, size: GridSize, start_col: i32) -> Path {
    walk(rng, size, start_col.clamp(0, (size.cols - 1).max(0)))
}

fn walk(rng: &mut impl RandomSource, size: GridSize, start_col: i32) -> Path {
    let mut path = Vec::with_capacity(size.rows.max(0) as usize);
    let mut col = start_col;
    let mut run = 0usize;

    for row in (0..size.rows).rev() {
        if row < size.rows - 1 {
            let candidates: Vec<i32> = [col - 1, col, col + 1]
                .into_iter()
                .filter(|c| *c >= 0 && *c < size.cols)
                .filter(|c| run < MAX_STRAIGHT_RUN || *c != col)
                .collect();
            let candidates = if candidates.is_empty() {
                lateral_moves(col, size.cols)
            } else {
                candidates
            };
            if let Some(next) = candidates.get(rng.pick_index(candidates.len())) {
                run = if *next == col { run + 1 } else { 1 };
                col = *next;
            }
        } else {
            run = 1;
        }
        path.push(Cell::new(row, col));
    }
    path
}

fn lateral_moves(col: i32, cols: i32) -> Vec<i32> {
    [col - 1, col + 1]
        .into_iter()
        .filter(|c| *c >= 0 && *c < cols)
        .collect()
}

/// Seed a versus player's path from the shared round seed and their identity.
pub fn versus_path_seed(round_seed: u64, player_index: usize, player_id: &str) -> u32 {
    let id_hash = (hash_string(player_id).unsigned_abs() % 1_000_000) as u64;
    round_seed
        .wrapping_add((player_index as u64 + 1).wrapping_mul(VERSUS_PATH_SEED_STRIDE))
        .wrapping_add(id_hash) as u32
}

/// Every client derives the same path for a given player without exchanging it.
pub fn versus_path_for(
    round_seed: u64,
    player_index: usize,
    player_id: &str,
    size: GridSize,
) -> Path {
    let mut rng = Rng::new(versus_path_seed(round_seed, player_index, player_id));
    let start_col = player_index as i32 % size.cols.max(1);
    generate_path_from(&mut rng, size, start_col)
}

/// Longest number of consecutive rows sharing one column.
pub fn longest_straight_run(path: &[Cell]) -> usize {
    let mut best = 0;
    let mut run = 0;
    let mut prev: Option<i32> = None;
    for cell in path {
        run = if prev == Some(cell.col) { run + 1 } else { 1 };
        best = best.max(run);
        prev = Some(cell.col);
    }
    best
}
