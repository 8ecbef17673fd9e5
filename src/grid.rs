use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::constants::{DECOY_MIN_LEVEL, DEFAULT_GOLD_VALUE, MAX_DECOYS};
use crate::rng::RandomSource;
use crate::types::{Cell, CellContent, Grid, GridSize, PathBonus, RunCounters, TrapKind};

/// Floor-scaled probability: `min(base + floor * per_floor, max)`.
pub fn chance(base: f64, per_floor: f64, max: f64, floor: u32) -> f64 {
    (base + floor as f64 * per_floor).min(max)
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrapRule {
    pub base_chance_per_line: f64,
    pub per_floor_bonus: f64,
    pub max_chance: f64,
    pub no_trap_before_floor: u32,
}

impl TrapRule {
    fn chance_at(&self, floor: u32) -> Option<f64> {
        if floor < self.no_trap_before_floor {
            return None;
        }
        Some(chance(
            self.base_chance_per_line,
            self.per_floor_bonus,
            self.max_chance,
            floor,
        ))
    }
}

/// Bonus placed on a cell next to the path. Chances are expressed per floor and
/// spread over the rows when rolled per cell.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BonusRule {
    pub base_chance_per_floor: f64,
    pub per_floor_bonus: f64,
    pub max_chance: f64,
    #[serde(default)]
    pub max_per_floor: Option<u32>,
    #[serde(default)]
    pub max_per_run: Option<u32>,
    #[serde(default)]
    pub value_min: u32,
    #[serde(default)]
    pub value_max: u32,
}

impl BonusRule {
    fn per_cell_chance(&self, floor: u32, rows: i32) -> f64 {
        let rows = rows.max(1) as f64;
        chance(
            self.base_chance_per_floor / rows,
            self.per_floor_bonus / rows,
            self.max_chance / rows,
            floor,
        )
    }
}

/// Bonus riding on a path cell.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathBonusRule {
    pub base_chance: f64,
    pub per_floor_bonus: f64,
    pub max_chance: f64,
    pub value_min: u32,
    pub value_max: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrapTable {
    pub life_loss: TrapRule,
    pub back_two: TrapRule,
    pub stun: TrapRule,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BonusTable {
    pub gold: BonusRule,
    pub gem: BonusRule,
    pub potion: BonusRule,
    pub essence: BonusRule,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathContentTable {
    pub gold: PathBonusRule,
    pub essence: PathBonusRule,
}

/// Content table for floor generation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GridContentConfig {
    pub traps: TrapTable,
    pub bonuses: BonusTable,
    pub path: PathContentTable,
}

impl Default for GridContentConfig {
    fn default() -> Self {
        Self {
            traps: TrapTable {
                life_loss: TrapRule {
                    base_chance_per_line: 0.05,
                    per_floor_bonus: 0.01,
                    max_chance: 0.25,
                    no_trap_before_floor: 3,
                },
                back_two: TrapRule {
                    base_chance_per_line: 0.08,
                    per_floor_bonus: 0.01,
                    max_chance: 0.3,
                    no_trap_before_floor: 2,
                },
                stun: TrapRule {
                    base_chance_per_line: 0.06,
                    per_floor_bonus: 0.008,
                    max_chance: 0.25,
                    no_trap_before_floor: 4,
                },
            },
            bonuses: BonusTable {
                gold: BonusRule {
                    base_chance_per_floor: 0.6,
                    per_floor_bonus: 0.02,
                    max_chance: 0.9,
                    max_per_floor: Some(2),
                    max_per_run: None,
                    value_min: 5,
                    value_max: 15,
                },
                gem: BonusRule {
                    base_chance_per_floor: 0.05,
                    per_floor_bonus: 0.005,
                    max_chance: 0.15,
                    max_per_floor: None,
                    max_per_run: Some(1),
                    value_min: 1,
                    value_max: 1,
                },
                potion: BonusRule {
                    base_chance_per_floor: 0.1,
                    per_floor_bonus: 0.01,
                    max_chance: 0.3,
                    max_per_floor: None,
                    max_per_run: Some(1),
                    value_min: 1,
                    value_max: 1,
                },
                essence: BonusRule {
                    base_chance_per_floor: 0.2,
                    per_floor_bonus: 0.01,
                    max_chance: 0.4,
                    max_per_floor: Some(1),
                    max_per_run: None,
                    value_min: 1,
                    value_max: 1,
                },
            },
            path: PathContentTable {
                gold: PathBonusRule {
                    base_chance: 0.08,
                    per_floor_bonus: 0.005,
                    max_chance: 0.2,
                    value_min: 3,
                    value_max: 8,
                },
                essence: PathBonusRule {
                    base_chance: 0.03,
                    per_floor_bonus: 0.003,
                    max_chance: 0.1,
                    value_min: 1,
                    value_max: 1,
                },
            },
        }
    }
}

impl GridContentConfig {
    /// Missing sections fall back to the built-in table.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    fn gold_cap(&self) -> u32 {
        self.bonuses.gold.max_per_floor.unwrap_or(u32::MAX)
    }

    fn essence_cap(&self) -> u32 {
        self.bonuses.essence.max_per_floor.unwrap_or(u32::MAX)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedGrid {
    pub grid: Grid,
    pub run_counters: RunCounters,
}

impl EnrichedGrid {
    pub fn trap_cells(&self) -> Vec<(Cell, TrapKind)> {
        self.grid
            .iter()
            .filter_map(|(cell, content)| content.trap().map(|kind| (cell, kind)))
            .collect()
    }

    pub fn stats(&self) -> GridStats {
        GridStats::of(&self.grid)
    }
}

/// Content counts of one floor, used for logging and quota checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridStats {
    pub path: u32,
    pub neutral: u32,
    pub trap_life: u32,
    pub trap_back2: u32,
    pub trap_stun: u32,
    pub gold: u32,
    pub path_gold: u32,
    pub gem: u32,
    pub potion: u32,
    pub essence: u32,
    pub path_essence: u32,
}

impl GridStats {
    pub fn of(grid: &Grid) -> Self {
        let mut stats = Self::default();
        for (_, content) in grid.iter() {
            match content {
                CellContent::Path { bonus } => {
                    stats.path += 1;
                    match bonus {
                        Some(PathBonus::Gold(_)) => stats.path_gold += 1,
                        Some(PathBonus::Essence(_)) => stats.path_essence += 1,
                        None => {}
                    }
                }
                CellContent::Neutral => stats.neutral += 1,
                CellContent::Trap { kind } => match kind {
                    TrapKind::LifeLoss => stats.trap_life += 1,
                    TrapKind::RollbackTwo => stats.trap_back2 += 1,
                    TrapKind::Stun => stats.trap_stun += 1,
                },
                CellContent::Gold { .. } => stats.gold += 1,
                CellContent::Gem => stats.gem += 1,
                CellContent::Potion => stats.potion += 1,
                CellContent::Essence => stats.essence += 1,
            }
        }
        stats
    }

    pub fn gold_placements(&self) -> u32 {
        self.gold + self.path_gold
    }

    pub fn essence_placements(&self) -> u32 {
        self.essence + self.path_essence
    }
}

#[derive(Default)]
struct FloorCounters {
    gold: u32,
    essence: u32,
}

/// Overlays traps and bonuses on a legacy path.
///
/// `path` must hold one cell per row, in traversal order (bottom row first).
/// `counters` carries run-wide quotas; the updated value is returned for the
/// next floor. Nothing here can fail: a quota that cannot be met just leaves
/// cells neutral.
pub fn enrich_grid(
    config: &GridContentConfig,
    size: GridSize,
    path: &[Cell],
    floor: u32,
    counters: RunCounters,
    bonus_chance_modifier: f64,
    rng: &mut impl RandomSource,
) -> EnrichedGrid {
    let mut slots: Vec<Option<CellContent>> = vec![None; size.cell_count()];
    let index = |cell: Cell| (cell.row * size.cols + cell.col) as usize;

    let on_path: HashSet<Cell> = path.iter().copied().filter(|c| size.contains(*c)).collect();
    for cell in &on_path {
        slots[index(*cell)] = Some(CellContent::Path { bonus: None });
    }

    let mut adjacent: Vec<Cell> = Vec::new();
    for row in 0..size.rows {
        for col in 0..size.cols {
            let cell = Cell::new(row, col);
            if on_path.contains(&cell) {
                continue;
            }
            if cell
                .orthogonal_neighbors()
                .iter()
                .any(|neighbor| on_path.contains(neighbor))
            {
                adjacent.push(cell);
            }
        }
    }
    rng.shuffle(&mut adjacent);

    let mut run = counters;
    let mut floor_counters = FloorCounters::default();

    for row in 0..size.rows {
        let mut trap_placed = false;
        for cell in adjacent.iter().copied().filter(|cell| cell.row == row) {
            if slots[index(cell)].is_some() {
                continue;
            }
            if !trap_placed {
                if let Some(kind) = roll_trap(config, floor, rng) {
                    slots[index(cell)] = Some(CellContent::Trap { kind });
                    trap_placed = true;
                    continue;
                }
            }
            if !is_playable(path, cell) {
                continue;
            }
            if let Some(content) =
                roll_adjacent_bonus(config, size, cell, floor, &mut run, &mut floor_counters, rng)
            {
                slots[index(cell)] = Some(content);
            }
        }
    }

    for cell in path.iter().copied().filter(|c| size.contains(*c)) {
        let bonus = roll_path_bonus(config, floor, bonus_chance_modifier, &mut floor_counters, rng);
        if bonus.is_some() {
            slots[index(cell)] = Some(CellContent::Path { bonus });
        }
    }

    let mut grid = Grid::filled(size, CellContent::Neutral);
    for row in 0..size.rows {
        for col in 0..size.cols {
            let cell = Cell::new(row, col);
            if let Some(content) = slots[index(cell)] {
                grid.set(cell, content);
            }
        }
    }

    let enriched = EnrichedGrid {
        grid,
        run_counters: run,
    };
    let stats = enriched.stats();
    tracing::debug!(
        floor,
        traps = stats.trap_life + stats.trap_back2 + stats.trap_stun,
        gold = stats.gold_placements(),
        essence = stats.essence_placements(),
        gem = stats.gem,
        potion = stats.potion,
        "[grid] floor enriched"
    );
    enriched
}

fn roll_trap(config: &GridContentConfig, floor: u32, rng: &mut impl RandomSource) -> Option<TrapKind> {
    let table = &config.traps;
    [
        (TrapKind::LifeLoss, &table.life_loss),
        (TrapKind::RollbackTwo, &table.back_two),
        (TrapKind::Stun, &table.stun),
    ]
    .into_iter()
    .find_map(|(kind, rule)| {
        let p = rule.chance_at(floor)?;
        rng.bool(p).then_some(kind)
    })
}

fn roll_adjacent_bonus(
    config: &GridContentConfig,
    size: GridSize,
    cell: Cell,
    floor: u32,
    run: &mut RunCounters,
    floor_counters: &mut FloorCounters,
    rng: &mut impl RandomSource,
) -> Option<CellContent> {
    let bonuses = &config.bonuses;

    if run.gem < bonuses.gem.max_per_run.unwrap_or(u32::MAX)
        && rng.bool(bonuses.gem.per_cell_chance(floor, size.rows))
    {
        run.gem += 1;
        return Some(CellContent::Gem);
    }

    if cell.row > 0
        && run.potion < bonuses.potion.max_per_run.unwrap_or(u32::MAX)
        && rng.bool(bonuses.potion.per_cell_chance(floor, size.rows))
    {
        run.potion += 1;
        return Some(CellContent::Potion);
    }

    if floor_counters.gold < config.gold_cap()
        && rng.bool(bonuses.gold.per_cell_chance(floor, size.rows))
    {
        floor_counters.gold += 1;
        let value = roll_value(bonuses.gold.value_min, bonuses.gold.value_max, rng);
        return Some(CellContent::Gold { value });
    }

    if floor_counters.essence < config.essence_cap()
        && rng.bool(bonuses.essence.per_cell_chance(floor, size.rows))
    {
        floor_counters.essence += 1;
        return Some(CellContent::Essence);
    }

    None
}

fn roll_path_bonus(
    config: &GridContentConfig,
    floor: u32,
    modifier: f64,
    floor_counters: &mut FloorCounters,
    rng: &mut impl RandomSource,
) -> Option<PathBonus> {
    let gold = &config.path.gold;
    if floor_counters.gold < config.gold_cap() {
        let p = chance(gold.base_chance, gold.per_floor_bonus, gold.max_chance, floor) + modifier;
        if rng.bool(p) {
            floor_counters.gold += 1;
            return Some(PathBonus::Gold(roll_value(gold.value_min, gold.value_max, rng)));
        }
    }

    let essence = &config.path.essence;
    if floor_counters.essence < config.essence_cap() {
        let p = chance(
            essence.base_chance,
            essence.per_floor_bonus,
            essence.max_chance,
            floor,
        ) + modifier;
        if rng.bool(p) {
            floor_counters.essence += 1;
            return Some(PathBonus::Essence(essence.value_min.max(1)));
        }
    }
    None
}

fn roll_value(min: u32, max: u32, rng: &mut impl RandomSource) -> u32 {
    if max < min || max == 0 {
        return DEFAULT_GOLD_VALUE;
    }
    rng.int(min as i32, max as i32).max(0) as u32
}

fn path_col_at(path: &[Cell], row: i32) -> Option<i32> {
    path.iter().find(|cell| cell.row == row).map(|cell| cell.col)
}

/// A bonus beside the path must stay reachable: its column is within one of the
/// path column on its own row and on the next row the player climbs to.
pub fn is_playable(path: &[Cell], cell: Cell) -> bool {
    let Some(current) = path_col_at(path, cell.row) else {
        return false;
    };
    if (cell.col - current).abs() > 1 {
        return false;
    }
    match next_row_col(path, cell.row) {
        Some(next) => (cell.col - next).abs() <= 1,
        None => true,
    }
}

fn next_row_col(path: &[Cell], row: i32) -> Option<i32> {
    let position = path.iter().position(|cell| cell.row == row)?;
    path.get(position + 1).map(|cell| cell.col)
}

/// Solo-only decoys: up to two shuffled cells beside the path, from level 5.
pub fn solo_decoys(path: &[Cell], size: GridSize, level: u32, rng: &mut impl RandomSource) -> Vec<Cell> {
    if level < DECOY_MIN_LEVEL {
        return Vec::new();
    }
    let on_path: HashSet<Cell> = path.iter().copied().collect();
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for cell in path {
        for neighbor in cell.orthogonal_neighbors() {
            if size.contains(neighbor) && !on_path.contains(&neighbor) && seen.insert(neighbor) {
                candidates.push(neighbor);
            }
        }
    }
    rng.shuffle(&mut candidates);
    candidates.truncate(MAX_DECOYS);
    candidates
}

/// Heart placement avoids the first and last path cells when the path allows it.
pub fn pick_heart_cell(path: &[Cell], rng: &mut impl RandomSource) -> Option<Cell> {
    if path.is_empty() {
        return None;
    }
    let n = path.len() as i32;
    let (start, end) = if n >= 3 { (1, n - 2) } else { (0, n - 1) };
    path.get(rng.int(start, end) as usize).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{LEGACY_GRID, ROWS};
    use crate::path::generate_path;
    use crate::rng::Rng;

    fn floor_grid(seed: u32, floor: u32, counters: RunCounters) -> (Vec<Cell>, EnrichedGrid) {
        let mut rng = Rng::new(seed);
        let path = generate_path(&mut rng, LEGACY_GRID);
        let enriched = enrich_grid(
            &GridContentConfig::default(),
            LEGACY_GRID,
            &path,
            floor,
            counters,
            0.0,
            &mut rng,
        );
        (path, enriched)
    }

    #[test]
    fn chance_is_monotonic_and_capped() {
        let config = GridContentConfig::default();
        let rule = config.traps.life_loss;
        let mut previous = 0.0;
        for floor in 0..200 {
            let value = chance(rule.base_chance_per_line, rule.per_floor_bonus, rule.max_chance, floor);
            assert!(value >= previous);
            assert!(value <= rule.max_chance);
            previous = value;
        }
        assert_eq!(chance(0.1, 0.05, 0.3, 0), 0.1);
        assert_eq!(chance(0.1, 0.05, 0.3, 100), 0.3);
    }

    #[test]
    fn enriched_grids_hold_placement_invariants() {
        for seed in 1..=1_500u32 {
            let floor = seed % 40;
            let (path, enriched) = floor_grid(seed, floor, RunCounters::default());
            let grid = &enriched.grid;

            for row in 0..ROWS {
                let path_cells = grid.row(row).filter(|(_, content)| content.is_path()).count();
                assert_eq!(path_cells, 1, "seed {seed} row {row}");
                let traps: Vec<Cell> = grid
                    .row(row)
                    .filter(|(_, content)| content.trap().is_some())
                    .map(|(cell, _)| cell)
                    .collect();
                assert!(traps.len() <= 1);
                let path_cell = path.iter().find(|cell| cell.row == row).copied().expect("row");
                for trap in traps {
                    assert_eq!(trap.manhattan(path_cell), 1, "seed {seed}");
                }
            }

            for (cell, content) in grid.iter() {
                if matches!(content, CellContent::Gem | CellContent::Potion) {
                    assert!(!path.contains(&cell));
                }
                if matches!(content, CellContent::Potion) {
                    assert!(cell.row > 0);
                }
                if content.is_bonus() {
                    assert!(is_playable(&path, cell), "seed {seed} {cell:?}");
                }
            }

            let stats = enriched.stats();
            assert!(stats.gold_placements() <= 2, "seed {seed}");
            assert!(stats.essence_placements() <= 1, "seed {seed}");
            assert!(stats.gem <= 1 && stats.potion <= 1);
            assert_eq!(enriched.run_counters.gem, stats.gem);
            assert_eq!(enriched.run_counters.potion, stats.potion);
        }
    }

    #[test]
    fn run_quotas_carry_across_floors() {
        let mut counters = RunCounters::default();
        let mut gems = 0;
        let mut potions = 0;
        for floor in 1..=60u32 {
            let (_, enriched) = floor_grid(floor * 31, floor, counters);
            let stats = enriched.stats();
            gems += stats.gem;
            potions += stats.potion;
            counters = enriched.run_counters;
        }
        assert!(gems <= 1);
        assert!(potions <= 1);
        assert_eq!(counters.gem, gems);
        assert_eq!(counters.potion, potions);
    }

    #[test]
    fn spent_run_quota_blocks_new_gems_and_potions() {
        let spent = RunCounters { gem: 1, potion: 1 };
        for seed in 1..=300u32 {
            let (_, enriched) = floor_grid(seed, 30, spent);
            let stats = enriched.stats();
            assert_eq!(stats.gem, 0);
            assert_eq!(stats.potion, 0);
            assert_eq!(enriched.run_counters, spent);
        }
    }

    #[test]
    fn no_traps_before_their_floor_threshold() {
        for seed in 1..=300u32 {
            let (_, enriched) = floor_grid(seed, 1, RunCounters::default());
            assert!(enriched.trap_cells().is_empty());
            let (_, enriched) = floor_grid(seed, 2, RunCounters::default());
            assert!(enriched
                .trap_cells()
                .iter()
                .all(|(_, kind)| *kind == TrapKind::RollbackTwo));
        }
    }

    #[test]
    fn bonus_modifier_saturates_path_bonuses_within_quota() {
        let mut rng = Rng::new(5);
        let path = generate_path(&mut rng, LEGACY_GRID);
        let enriched = enrich_grid(
            &GridContentConfig::default(),
            LEGACY_GRID,
            &path,
            1,
            RunCounters::default(),
            1.0,
            &mut rng,
        );
        let stats = enriched.stats();
        assert_eq!(stats.gold_placements(), 2);
        assert_eq!(stats.essence_placements(), 1);
    }

    #[test]
    fn playability_checks_current_and_next_row() {
        // Climbs from row 3 to row 0.
        let path = vec![
            Cell::new(3, 0),
            Cell::new(2, 1),
            Cell::new(1, 2),
            Cell::new(0, 3),
        ];
        assert!(is_playable(&path, Cell::new(2, 2)));
        assert!(!is_playable(&path, Cell::new(2, 0)));
        assert!(is_playable(&path, Cell::new(0, 2)));
        assert!(!is_playable(&path, Cell::new(5, 0)));
    }

    #[test]
    fn config_parses_partial_json() {
        let config = GridContentConfig::from_json(
            r#"{"traps":{"lifeLoss":{"baseChancePerLine":1.0,"perFloorBonus":0.0,"maxChance":1.0,"noTrapBeforeFloor":0},
                "backTwo":{"baseChancePerLine":0.0,"perFloorBonus":0.0,"maxChance":0.0,"noTrapBeforeFloor":0},
                "stun":{"baseChancePerLine":0.0,"perFloorBonus":0.0,"maxChance":0.0,"noTrapBeforeFloor":0}}}"#,
        )
        .expect("parse");
        assert_eq!(config.bonuses, GridContentConfig::default().bonuses);

        let mut rng = Rng::new(11);
        let path = generate_path(&mut rng, LEGACY_GRID);
        let enriched = enrich_grid(&config, LEGACY_GRID, &path, 0, RunCounters::default(), 0.0, &mut rng);
        let traps = enriched.trap_cells();
        assert_eq!(traps.len(), ROWS as usize);
        assert!(traps.iter().all(|(_, kind)| *kind == TrapKind::LifeLoss));
    }

    #[test]
    fn decoys_only_from_level_five() {
        let mut rng = Rng::new(9);
        let path = generate_path(&mut rng, LEGACY_GRID);
        assert!(solo_decoys(&path, LEGACY_GRID, 4, &mut rng).is_empty());
        for seed in 1..=200u32 {
            let mut rng = Rng::new(seed);
            let decoys = solo_decoys(&path, LEGACY_GRID, 5, &mut rng);
            assert_eq!(decoys.len(), 2);
            for decoy in decoys {
                assert!(!path.contains(&decoy));
                assert!(path.iter().any(|cell| cell.manhattan(decoy) == 1));
            }
        }
    }

    #[test]
    fn heart_avoids_path_ends() {
        let mut rng = Rng::new(1);
        let path = generate_path(&mut rng, LEGACY_GRID);
        for seed in 1..=200u32 {
            let mut rng = Rng::new(seed);
            let heart = pick_heart_cell(&path, &mut rng).expect("heart");
            assert_ne!(heart, path[0]);
            assert_ne!(heart, path[path.len() - 1]);
        }
        assert_eq!(pick_heart_cell(&[], &mut rng), None);
        assert_eq!(pick_heart_cell(&[Cell::new(0, 0)], &mut rng), Some(Cell::new(0, 0)));
    }
}
