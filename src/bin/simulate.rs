use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use memostep::config::init_tracing;
use memostep::constants::{ERROR_TOLERANCE, FLOW_GRID, LEGACY_GRID, MAX_STRAIGHT_RUN};
use memostep::grid::GridContentConfig;
use memostep::path::longest_straight_run;
use memostep::pattern::{validate_pattern, PatternEngine};
use memostep::rng::{RandomSource, Rng, SeededRandom};
use memostep::scoring::{pattern_score, Rank};
use memostep::session::solo::SoloRun;
use memostep::session::daily::DailyRun;
use memostep::session::{FlowController, FlowPhase, PatternSession, SessionEvent};
use memostep::storage::today_utc;
use memostep::types::{Cell, GridSize};
use memostep::xp::{SoloEnd, XpTable};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const STEP_MS: u64 = 150;
const STEP_LIMIT: usize = 20_000;
const DAILY_ATTEMPT_LIMIT: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
enum Mode {
    Solo,
    Flow,
    Daily,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Bot-driven memostep sessions")]
struct Cli {
    #[arg(long, value_enum)]
    mode: Option<Mode>,
    #[arg(long)]
    seed: Option<u64>,
    /// Floors a solo bot plays before walking away.
    #[arg(long, default_value_t = 5)]
    floors: u32,
    /// Flow patterns to complete.
    #[arg(long, default_value_t = 10)]
    patterns: u32,
    /// Chance that a bot click lands on a wrong cell.
    #[arg(long, default_value_t = 0.1)]
    miss_rate: f64,
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    match_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    log_level: String,
}

#[derive(Clone, Debug, Serialize)]
struct Scenario {
    name: String,
    mode: Mode,
    seed: u32,
    floors: u32,
    patterns: u32,
    #[serde(rename = "missRate")]
    miss_rate: f64,
    date: NaiveDate,
}

#[derive(Clone, Debug, Serialize)]
struct ScenarioResultLine {
    scenario: String,
    mode: Mode,
    seed: u32,
    #[serde(rename = "durationMs")]
    duration_ms: u64,
    score: u64,
    cleared: u32,
    perfect: u32,
    errors: u32,
    xp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    rank: Option<Rank>,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    #[serde(rename = "atMs")]
    at_ms: u64,
    message: String,
}

#[derive(Clone, Debug)]
struct ScenarioRunResult {
    result: ScenarioResultLine,
    anomaly_records: Vec<AnomalyRecord>,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    #[serde(rename = "scenarioCount")]
    scenario_count: usize,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    #[serde(rename = "averageScore")]
    average_score: u64,
    #[serde(rename = "modeCounts")]
    mode_counts: BTreeMap<String, usize>,
    scenarios: Vec<ScenarioResultLine>,
}

#[derive(Clone, Debug, Serialize)]
struct StructuredLogLine {
    #[serde(rename = "timestampMs")]
    timestamp_ms: u64,
    level: String,
    event: String,
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u32>,
    details: Value,
}

#[derive(Default)]
struct Anomalies {
    messages: Vec<String>,
    records: Vec<AnomalyRecord>,
    seen: HashSet<String>,
}

impl Anomalies {
    fn push(&mut self, at_ms: u64, message: String) {
        self.records.push(AnomalyRecord {
            at_ms,
            message: message.clone(),
        });
        if self.seen.insert(message.clone()) {
            self.messages.push(message);
        }
    }
}

/// Clicks the expected cell, or with probability `miss_rate` a random cell off
/// the pattern. Path cells marked wrong stay unclickable for the rest of a
/// floor, so misses never land on them.
struct Bot {
    rng: Rng,
    miss_rate: f64,
    misses: u32,
}

impl Bot {
    fn new(seed: u32, miss_rate: f64) -> Self {
        Self {
            rng: Rng::new(seed ^ 0x9e37_79b9),
            miss_rate: miss_rate.clamp(0.0, 1.0),
            misses: 0,
        }
    }

    fn choose(&mut self, expected: Cell, size: GridSize, pattern: &[Cell]) -> Cell {
        if !self.rng.bool(self.miss_rate) {
            return expected;
        }
        self.misses += 1;
        loop {
            let cell = Cell::new(
                self.rng.int(0, size.rows - 1),
                self.rng.int(0, size.cols - 1),
            );
            if cell != expected && !pattern.contains(&cell) {
                return cell;
            }
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let scenarios = resolve_scenarios(&cli);
    let run_started_at_ms = now_ms();
    let seed_hint = scenarios.first().map(|scenario| scenario.seed).unwrap_or(0);
    let match_id = cli
        .match_id
        .clone()
        .unwrap_or_else(|| default_match_id(seed_hint, run_started_at_ms));
    let mut has_anomaly = false;
    let mut scenario_results = Vec::new();
    let mut mode_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_anomalies = 0usize;

    for scenario in scenarios {
        emit_log(
            "info",
            "scenario_started",
            &match_id,
            Some(&scenario.name),
            Some(scenario.seed),
            json!({
                "mode": scenario.mode,
                "missRate": scenario.miss_rate,
            }),
        );
        let scenario_run = run_scenario(&scenario);

        for anomaly in &scenario_run.anomaly_records {
            emit_log(
                "warn",
                "anomaly_detected",
                &match_id,
                Some(&scenario.name),
                Some(scenario.seed),
                json!({
                    "atMs": anomaly.at_ms,
                    "message": anomaly.message,
                }),
            );
        }

        if !scenario_run.result.anomalies.is_empty() {
            has_anomaly = true;
        }
        total_anomalies += scenario_run.anomaly_records.len();
        *mode_counts.entry(mode_key(scenario.mode)).or_insert(0) += 1;

        emit_log(
            "info",
            "scenario_finished",
            &match_id,
            Some(&scenario.name),
            Some(scenario.seed),
            json!({
                "durationMs": scenario_run.result.duration_ms,
                "score": scenario_run.result.score,
                "cleared": scenario_run.result.cleared,
                "anomalyCount": scenario_run.anomaly_records.len(),
            }),
        );

        match serde_json::to_string(&scenario_run.result) {
            Ok(line) => println!("{line}"),
            Err(error) => tracing::error!(%error, "[simulate] result did not serialize"),
        }
        scenario_results.push(scenario_run.result);
    }

    let summary = build_run_summary(
        match_id.clone(),
        run_started_at_ms,
        now_ms(),
        scenario_results,
        mode_counts,
        total_anomalies,
    );

    let mut summary_out_written: Option<String> = None;
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            emit_log(
                "error",
                "summary_write_failed",
                &match_id,
                None,
                None,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            );
            std::process::exit(2);
        }
        summary_out_written = Some(path.to_string_lossy().to_string());
    }

    emit_log(
        "info",
        "run_finished",
        &match_id,
        None,
        None,
        json!({
            "scenarioCount": summary.scenario_count,
            "anomalyCount": summary.anomaly_count,
            "averageScore": summary.average_score,
            "modeCounts": summary.mode_counts,
            "summaryOut": summary_out_written,
        }),
    );

    if has_anomaly {
        std::process::exit(1);
    }
}

fn run_scenario(scenario: &Scenario) -> ScenarioRunResult {
    match scenario.mode {
        Mode::Solo => run_solo(scenario),
        Mode::Flow => run_flow(scenario),
        Mode::Daily => run_daily(scenario),
    }
}

fn run_solo(scenario: &Scenario) -> ScenarioRunResult {
    let xp_table = XpTable::default();
    let mut world = Rng::new(scenario.seed);
    let mut bot = Bot::new(scenario.seed, scenario.miss_rate);
    let mut anomalies = Anomalies::default();
    let mut run = SoloRun::new(GridContentConfig::default(), 0.0, &mut world);
    let mut now = 0u64;
    let mut cleared = 0;
    let mut perfect = 0;
    let mut xp = 0;
    let mut pickups = 0u32;

    while !run.is_finished() {
        let path = run.board().pattern().to_vec();
        if path.len() != LEGACY_GRID.rows as usize || longest_straight_run(&path) > MAX_STRAIGHT_RUN {
            anomalies.push(now, format!("invalid floor path on floor {}", run.floor()));
        }
        run.start(now);

        let mut end = None;
        for _ in 0..STEP_LIMIT {
            now += STEP_MS;
            if let Some(floor_end) = run.tick(now, &xp_table) {
                end = Some(floor_end);
                break;
            }
            let board = run.board();
            if !board.in_play() || board.is_stunned() || board.is_blocked() {
                continue;
            }
            let Some(expected) = board.expected_cell() else {
                continue;
            };
            let cell = bot.choose(expected, LEGACY_GRID, &path);
            run.board_mut().handle_click(cell, now);
            pickups += run
                .board_mut()
                .drain_events()
                .iter()
                .filter(|event| matches!(event, SessionEvent::Picked { .. }))
                .count() as u32;
        }

        let Some(end) = end else {
            anomalies.push(now, format!("step limit exceeded on floor {}", run.floor()));
            break;
        };
        if end.lives_left > memostep::constants::SOLO_LIVES {
            anomalies.push(now, format!("lives out of range: {}", end.lives_left));
        }
        if end.perfect {
            perfect += 1;
        }

        let reward = if end.status == SoloEnd::Completed {
            cleared += 1;
            if cleared >= scenario.floors {
                run.abandon(&xp_table)
            } else {
                run.continue_run(&mut world)
            }
        } else {
            run.continue_run(&mut world)
        };
        if let Some(reward) = reward {
            xp += reward.xp;
        }
    }
    tracing::debug!(cleared, pickups, "[simulate] solo run finished");

    let resources = run.resources();
    ScenarioRunResult {
        result: ScenarioResultLine {
            scenario: scenario.name.clone(),
            mode: scenario.mode,
            seed: scenario.seed,
            duration_ms: run.chrono_ms(now),
            score: resources.gold + resources.essence + resources.gems,
            cleared,
            perfect,
            errors: bot.misses,
            xp,
            rank: None,
            anomalies: anomalies.messages,
        },
        anomaly_records: anomalies.records,
    }
}

fn run_flow(scenario: &Scenario) -> ScenarioRunResult {
    let mut flow = FlowController::new(PatternEngine::new(SeededRandom::new(i64::from(scenario.seed))));
    let mut bot = Bot::new(scenario.seed, scenario.miss_rate);
    let mut anomalies = Anomalies::default();
    let mut now = 0u64;
    let mut jackpots = 0u32;
    let mut last_pattern = Vec::new();
    let mut last_score = 0u64;

    flow.begin(now);
    let mut finished = false;
    for _ in 0..STEP_LIMIT {
        if flow.score().stats().total_patterns >= scenario.patterns {
            finished = true;
            break;
        }
        now += STEP_MS;
        flow.tick(now);
        let state = flow.state();
        if state.pattern != last_pattern {
            if !validate_pattern(&state.pattern, FLOW_GRID) {
                anomalies.push(now, format!("invalid flow pattern: {:?}", state.pattern));
            }
            last_pattern = state.pattern.clone();
        }
        if state.phase == FlowPhase::Input {
            if let Some(&expected) = state.pattern.get(state.pattern_index) {
                let cell = bot.choose(expected, FLOW_GRID, &state.pattern);
                flow.on_cell_click(cell, now);
            }
        }
        for event in flow.drain_events() {
            if matches!(event, SessionEvent::Jackpot { .. }) {
                jackpots += 1;
            }
        }
        let score = flow.score().total_score();
        if score < last_score {
            anomalies.push(now, format!("score went backwards: {last_score} -> {score}"));
        }
        last_score = score;
    }
    if !finished {
        anomalies.push(now, "step limit exceeded".to_string());
    }
    flow.stop();
    tracing::debug!(jackpots, "[simulate] flow run finished");

    let stats = flow.score().stats();
    ScenarioRunResult {
        result: ScenarioResultLine {
            scenario: scenario.name.clone(),
            mode: scenario.mode,
            seed: scenario.seed,
            duration_ms: now,
            score: stats.total_score,
            cleared: stats.total_patterns,
            perfect: stats.perfect_patterns,
            errors: stats.total_errors,
            xp: 0,
            rank: Some(memostep::scoring::calculate_rank(stats.total_score)),
            anomalies: anomalies.messages,
        },
        anomaly_records: anomalies.records,
    }
}

fn run_daily(scenario: &Scenario) -> ScenarioRunResult {
    let mut daily = DailyRun::new(scenario.date);
    let mut bot = Bot::new(scenario.seed, scenario.miss_rate);
    let mut anomalies = Anomalies::default();
    let mut elapsed = 0u64;

    while let Some(pattern) = daily.current_pattern().map(<[Cell]>::to_vec) {
        if !validate_pattern(&pattern, FLOW_GRID) {
            anomalies.push(elapsed, format!("invalid daily pattern {}", daily.index()));
        }
        let mut attempts = 0;
        let index = daily.index();
        while daily.index() == index {
            attempts += 1;
            if attempts > DAILY_ATTEMPT_LIMIT {
                anomalies.push(elapsed, format!("daily pattern {index} never cleared"));
                break;
            }
            let errors = pattern
                .iter()
                .map(|&cell| bot.choose(cell, FLOW_GRID, &pattern))
                .zip(&pattern)
                .filter(|(clicked, expected)| clicked != *expected)
                .count() as u32;
            let time_ms = (pattern.len() as u64 + u64::from(errors)) * STEP_MS;
            let completed = errors < ERROR_TOLERANCE;
            let score = pattern_score(pattern.len(), 1.0, errors == 0);
            elapsed += time_ms;
            daily.record_attempt(score, errors, time_ms, completed);
        }
        if daily.index() == index {
            break;
        }
    }

    let stats = daily.stats();
    let rank = daily.result().map(|result| result.rank);
    if rank.is_none() && anomalies.messages.is_empty() {
        anomalies.push(elapsed, "daily run incomplete".to_string());
    }
    ScenarioRunResult {
        result: ScenarioResultLine {
            scenario: scenario.name.clone(),
            mode: scenario.mode,
            seed: scenario.seed,
            duration_ms: stats.total_time_ms,
            score: stats.total_score,
            cleared: daily.index() as u32,
            perfect: stats.perfect_count,
            errors: stats.total_errors,
            xp: 0,
            rank,
            anomalies: anomalies.messages,
        },
        anomaly_records: anomalies.records,
    }
}

fn resolve_scenarios(cli: &Cli) -> Vec<Scenario> {
    let seed = normalize_seed(cli.seed.unwrap_or_else(now_ms));
    let date = cli.date.unwrap_or_else(today_utc);
    let scenario = |mode: Mode, seed: u32| Scenario {
        name: format!("{}-{}", mode_key(mode), seed),
        mode,
        seed,
        floors: cli.floors.clamp(1, 50),
        patterns: cli.patterns.clamp(1, 200),
        miss_rate: cli.miss_rate.clamp(0.0, 1.0),
        date,
    };

    match cli.mode {
        Some(mode) => vec![scenario(mode, seed)],
        None => vec![
            scenario(Mode::Solo, seed),
            scenario(Mode::Flow, seed.wrapping_add(1)),
            scenario(Mode::Daily, seed.wrapping_add(2)),
        ],
    }
}

fn normalize_seed(seed: u64) -> u32 {
    seed as u32
}

fn mode_key(mode: Mode) -> String {
    match mode {
        Mode::Solo => "solo",
        Mode::Flow => "flow",
        Mode::Daily => "daily",
    }
    .to_string()
}

fn default_match_id(seed: u32, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn build_run_summary(
    match_id: String,
    started_at_ms: u64,
    finished_at_ms: u64,
    scenarios: Vec<ScenarioResultLine>,
    mode_counts: BTreeMap<String, usize>,
    anomaly_count: usize,
) -> RunSummary {
    let scenario_count = scenarios.len();
    let total_score: u64 = scenarios.iter().map(|scenario| scenario.score).sum();
    let average_score = if scenario_count == 0 {
        0
    } else {
        total_score / scenario_count as u64
    };
    RunSummary {
        match_id,
        started_at_ms,
        finished_at_ms,
        scenario_count,
        anomaly_count,
        average_score,
        mode_counts,
        scenarios,
    }
}

fn emit_log(
    level: &str,
    event: &str,
    match_id: &str,
    scenario: Option<&str>,
    seed: Option<u32>,
    details: Value,
) {
    let log_line = StructuredLogLine {
        timestamp_ms: now_ms(),
        level: level.to_string(),
        event: event.to_string(),
        match_id: match_id.to_string(),
        scenario: scenario.map(|value| value.to_string()),
        seed,
        details,
    };
    if let Ok(line) = serde_json::to_string(&log_line) {
        eprintln!("{line}");
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(mode: Mode, miss_rate: f64) -> Scenario {
        Scenario {
            name: "test".to_string(),
            mode,
            seed: 42,
            floors: 3,
            patterns: 6,
            miss_rate,
            date: NaiveDate::from_ymd_opt(2024, 3, 9).expect("valid date"),
        }
    }

    #[test]
    fn perfect_solo_bot_clears_every_floor() {
        let run = run_solo(&scenario(Mode::Solo, 0.0));
        assert!(run.result.anomalies.is_empty(), "{:?}", run.result.anomalies);
        assert_eq!(run.result.cleared, 3);
        assert_eq!(run.result.perfect, 3);
        assert_eq!(run.result.errors, 0);
        assert!(run.result.xp > 0);
    }

    #[test]
    fn clumsy_solo_bot_still_terminates() {
        for seed in 1..=10 {
            let mut sc = scenario(Mode::Solo, 0.6);
            sc.seed = seed;
            let run = run_solo(&sc);
            assert!(
                !run.result.anomalies.iter().any(|message| message.starts_with("step limit")),
                "seed {seed}"
            );
            assert!(run.result.cleared <= 3);
        }
    }

    #[test]
    fn flow_bot_completes_requested_patterns() {
        let run = run_flow(&scenario(Mode::Flow, 0.0));
        assert!(run.result.anomalies.is_empty(), "{:?}", run.result.anomalies);
        assert_eq!(run.result.cleared, 6);
        assert_eq!(run.result.perfect, 6);
        assert!(run.result.score > 0);
    }

    #[test]
    fn flow_runs_are_reproducible_per_seed() {
        let a = run_flow(&scenario(Mode::Flow, 0.2));
        let b = run_flow(&scenario(Mode::Flow, 0.2));
        assert_eq!(a.result.score, b.result.score);
        assert_eq!(a.result.errors, b.result.errors);
        assert_eq!(a.result.duration_ms, b.result.duration_ms);
    }

    #[test]
    fn perfect_daily_bot_gets_a_rank() {
        let run = run_daily(&scenario(Mode::Daily, 0.0));
        assert!(run.result.anomalies.is_empty(), "{:?}", run.result.anomalies);
        assert_eq!(run.result.cleared, 5);
        assert_eq!(run.result.perfect, 5);
        assert!(run.result.rank.is_some());
    }

    #[test]
    fn always_missing_daily_bot_reports_anomaly() {
        let run = run_daily(&scenario(Mode::Daily, 1.0));
        assert_eq!(run.result.cleared, 0);
        assert!(run.result.rank.is_none());
        assert_eq!(run.result.anomalies, vec!["daily pattern 0 never cleared".to_string()]);
    }

    #[test]
    fn default_scenarios_cover_every_mode() {
        let cli = Cli::parse_from(["simulate", "--seed", "7"]);
        let scenarios = resolve_scenarios(&cli);
        let modes: Vec<Mode> = scenarios.iter().map(|scenario| scenario.mode).collect();
        assert_eq!(modes, vec![Mode::Solo, Mode::Flow, Mode::Daily]);
        assert_eq!(scenarios[1].seed, 8);

        let cli = Cli::parse_from(["simulate", "--mode", "flow", "--seed", "7"]);
        assert_eq!(resolve_scenarios(&cli).len(), 1);
    }

    #[test]
    fn default_match_id_contains_seed_and_timestamp() {
        assert_eq!(default_match_id(42, 123456789), "sim-42-123456789");
    }

    #[test]
    fn anomalies_keep_records_and_deduplicate_messages() {
        let mut anomalies = Anomalies::default();
        anomalies.push(10, "same anomaly".to_string());
        anomalies.push(11, "same anomaly".to_string());
        assert_eq!(anomalies.messages.len(), 1);
        assert_eq!(anomalies.records.len(), 2);
        assert_eq!(anomalies.records[1].at_ms, 11);
    }

    #[test]
    fn write_summary_returns_error_when_parent_does_not_exist() {
        let target = std::env::temp_dir()
            .join(format!("memostep-missing-{}", now_ms()))
            .join("summary.json");
        let summary = build_run_summary("sim-1-1".to_string(), 1, 2, Vec::new(), BTreeMap::new(), 0);
        assert_eq!(summary.average_score, 0);
        assert!(write_summary(&target, &summary).is_err());
    }
}
