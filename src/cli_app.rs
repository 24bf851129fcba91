//! Top-level CLI definition and dispatch.

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use gut_journey::core::config::Config;
use gut_journey::core::errors::GjError;
use gut_journey::engine::{JourneyEngine, ReplayReport};
use gut_journey::experiment::manager::BindOutcome;
use gut_journey::journey::gate::InsightTab;
use gut_journey::journey::guide::AiGuideConsultation;
use gut_journey::journey::machine::{ApplyOutcome, Transition};
use gut_journey::journey::state::MilestoneState;
use gut_journey::journey::tier::{Tier, TierStatus};
use gut_journey::logger::journal::Journal;
use gut_journey::logger::jsonl::JsonlConfig;
use gut_journey::source::adapter::JourneyEvent;
use gut_journey::source::meal::MealId;
use gut_journey::store::sqlite::StateStore;

/// Gut Journey: tiers, streaks, experiments and the 90-day Blueprint.
#[derive(Debug, Parser)]
#[command(
    name = "gutj",
    author,
    version,
    about = "Gut Journey - progression and experiment engine",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Journey owner (defaults to $GJ_USER, then "default").
    #[arg(long, global = true, value_name = "ID")]
    user: Option<String>,
    /// Meal-store export to replay (overrides paths.meal_stream).
    #[arg(long, global = true, value_name = "PATH")]
    meals: Option<PathBuf>,
    /// Evaluate as of this RFC 3339 instant instead of the wall clock.
    #[arg(long, global = true, value_name = "RFC3339")]
    now: Option<String>,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Replay the meal stream and persist the resulting state.
    Ingest,
    /// Show tier, counters, streaks and tab gates.
    Status,
    /// List journey milestones in order.
    Milestones,
    /// Show insight-tab gates and unlock progress.
    Tabs,
    /// Manage the elimination experiment.
    Experiment(ExperimentArgs),
    /// Show, preview or regenerate the Gut Health Blueprint.
    Blueprint(BlueprintArgs),
    /// AI guide inputs and payload storage.
    Guide(GuideArgs),
    /// Inspect configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
    /// Show version information.
    Version,
}

#[derive(Debug, Clone, Args)]
struct ExperimentArgs {
    #[command(subcommand)]
    command: ExperimentCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum ExperimentCommand {
    /// Start an experiment on a trigger category.
    Start {
        /// Trigger category, e.g. `dairy`.
        category: String,
    },
    /// Bind a logged meal as the experiment meal.
    Bind {
        meal_id: String,
    },
    /// Rate the pending experiment meal.
    Complete {
        meal_id: String,
        /// Bloating rating, 1..=5.
        #[arg(value_parser = clap::value_parser!(u8).range(1..=5))]
        rating: u8,
    },
    /// Abandon the current experiment.
    Abandon,
    /// Print the meal awaiting a rating, if any.
    Pending,
}

#[derive(Debug, Clone, Args)]
struct BlueprintArgs {
    /// Assemble from the current history without storing.
    #[arg(long, conflicts_with = "regenerate")]
    preview: bool,
    /// Rebuild and store the Blueprint.
    #[arg(long)]
    regenerate: bool,
}

#[derive(Debug, Clone, Args)]
struct GuideArgs {
    #[command(subcommand)]
    command: GuideCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum GuideCommand {
    /// Print the structured generator inputs.
    Inputs,
    /// Store a generator payload read from a JSON file.
    Store {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or a refused command.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
        }
    }
}

impl From<GjError> for CliError {
    fn from(err: GjError) -> Self {
        match err {
            GjError::InvariantViolation { .. } => Self::Internal(err.to_string()),
            GjError::InvalidConfig { .. }
            | GjError::MissingConfig { .. }
            | GjError::ConfigParse { .. }
            | GjError::MalformedEvent { .. } => Self::User(err.to_string()),
            _ if err.is_precondition() => Self::User(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Ingest => run_ingest(cli),
        Command::Status => run_status(cli),
        Command::Milestones => run_milestones(cli),
        Command::Tabs => run_tabs(cli),
        Command::Experiment(args) => run_experiment(cli, args),
        Command::Blueprint(args) => run_blueprint(cli, args),
        Command::Guide(args) => run_guide(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
        Command::Version => emit_version(cli),
    }
}

// ──────────────────── session ────────────────────

/// Loaded config, persisted state, and a replayed engine for one command.
struct Session {
    store: StateStore,
    stored: Option<MilestoneState>,
    engine: JourneyEngine,
    journal: Journal,
    report: ReplayReport,
    now: DateTime<Utc>,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self, CliError> {
        let config = Config::load(cli.config.as_deref())?;
        let now = resolve_now(cli.now.as_deref())?;
        let user = resolve_user(cli.user.as_deref());

        let store = StateStore::open(&config.paths.state_db)?;
        let stored = store.load(&user)?;
        let mut journal = Journal::open(JsonlConfig::at(&config.paths.journal), user.as_str());

        let meals = cli.meals.clone().unwrap_or_else(|| config.paths.meal_stream.clone());
        let raw = read_meal_stream(&meals, cli.meals.is_some())?;

        let mut engine = match &stored {
            Some(state) => JourneyEngine::restore(state.clone(), config)?,
            None => JourneyEngine::new(user, config, now),
        };
        let report = match engine.ingest(&raw, now) {
            Ok(report) => report,
            Err(err) => {
                journal.record_error(&err, now);
                return Err(err.into());
            }
        };
        journal.record_report(&report, now);

        Ok(Self {
            store,
            stored,
            engine,
            journal,
            report,
            now,
        })
    }

    /// Write the engine state back if it moved.
    fn persist(&mut self) -> Result<(), CliError> {
        let current = self.engine.state();
        if self.stored.as_ref() == Some(current) {
            return Ok(());
        }
        self.store.save(self.stored.as_ref(), current)?;
        self.stored = Some(current.clone());
        self.journal.flush();
        Ok(())
    }

    /// Journal a refused command, then hand the error back.
    fn refuse(&mut self, err: GjError) -> CliError {
        self.journal.record_error(&err, self.now);
        self.journal.flush();
        err.into()
    }
}

fn resolve_user(flag: Option<&str>) -> String {
    flag.map(str::to_string)
        .or_else(|| std::env::var("GJ_USER").ok())
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "default".to_string())
}

fn resolve_now(raw: Option<&str>) -> Result<DateTime<Utc>, CliError> {
    match raw {
        None => Ok(Utc::now()),
        Some(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| CliError::User(format!("--now {raw:?}: {e}"))),
    }
}

/// A missing default export is an empty stream; a missing explicit one is an error.
fn read_meal_stream(path: &Path, explicit: bool) -> Result<String, CliError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(raw),
        Err(e) if e.kind() == io::ErrorKind::NotFound && !explicit => Ok("[]".to_string()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CliError::User(format!(
            "meal stream {} does not exist",
            path.display()
        ))),
        Err(e) => Err(CliError::Runtime(format!(
            "read meal stream {}: {e}",
            path.display()
        ))),
    }
}

// ──────────────────── journey commands ────────────────────

fn run_ingest(cli: &Cli) -> Result<(), CliError> {
    let mut session = Session::open(cli)?;
    session.persist()?;
    let report = &session.report;
    let state = session.engine.state();

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "Replayed {} events: {} applied, {} duplicate, {} skipped, {} rejected records.",
                report.outcomes.len(),
                report.applied(),
                report.duplicates(),
                report.skipped().len(),
                report.rejected.len()
            );
            for transition in report.transitions() {
                println!("  {}", describe_transition(transition));
            }
            println!(
                "Now at {} ({}), revision {}.",
                state.current_tier,
                state.current_tier.title(),
                state.revision
            );
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "ingest",
                "user": state.user_id,
                "events": report.outcomes.len(),
                "applied": report.applied(),
                "duplicates": report.duplicates(),
                "skipped": report.skipped(),
                "rejected": report.rejected,
                "transitions": report.transitions(),
                "current_tier": state.current_tier,
                "revision": state.revision,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_status(cli: &Cli) -> Result<(), CliError> {
    let mut session = Session::open(cli)?;
    session.persist()?;
    let engine = &session.engine;
    let state = engine.state();
    let streak = engine.streak_summary(session.now);

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "{} {} ({})",
                "Journey".bold(),
                state.current_tier,
                state.current_tier.title()
            );
            println!("  User: {}", state.user_id);
            println!(
                "  Meals: {} logged, {} rated",
                state.total_meals_logged, state.total_meals_rated
            );
            println!(
                "  Streak: {} current, {} longest",
                streak.current_streak, streak.longest_streak
            );
            if let Some(start) = state.journey_start_date {
                println!("  Started: {start}");
            }
            for tier in Tier::ALL {
                println!("  {tier}: {}", status_label(state.tier_status(tier)));
            }
            for tab in InsightTab::ALL {
                println!("  {}", tab_line(engine, tab));
            }
        }
        OutputMode::Json => {
            let tiers: Vec<Value> = Tier::ALL
                .iter()
                .map(|&tier| json!({ "tier": tier, "status": state.tier_status(tier) }))
                .collect();
            let payload = json!({
                "command": "status",
                "user": state.user_id,
                "current_tier": state.current_tier,
                "total_meals_logged": state.total_meals_logged,
                "total_meals_rated": state.total_meals_rated,
                "current_streak": streak.current_streak,
                "longest_streak": streak.longest_streak,
                "journey_start_date": state.journey_start_date,
                "tiers": tiers,
                "tabs": tabs_json(engine),
                "revision": state.revision,
                "updated_at": state.updated_at,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_milestones(cli: &Cli) -> Result<(), CliError> {
    let mut session = Session::open(cli)?;
    session.persist()?;
    let milestones = session.engine.milestones();

    match output_mode(cli) {
        OutputMode::Human => {
            for m in &milestones {
                let mark = match m.status {
                    TierStatus::Completed => "x".green(),
                    TierStatus::InProgress => ">".yellow(),
                    TierStatus::Locked => " ".normal(),
                };
                println!("[{mark}] {:>2}. {} {}", m.order, m.tier, m.title);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "milestones",
                "milestones": milestones,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_tabs(cli: &Cli) -> Result<(), CliError> {
    let mut session = Session::open(cli)?;
    session.persist()?;
    let engine = &session.engine;

    match output_mode(cli) {
        OutputMode::Human => {
            for tab in InsightTab::ALL {
                println!("{}", tab_line(engine, tab));
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "tabs",
                "tabs": tabs_json(engine),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_experiment(cli: &Cli, args: &ExperimentArgs) -> Result<(), CliError> {
    let mut session = Session::open(cli)?;
    let now = session.now;

    let payload = match &args.command {
        ExperimentCommand::Start { category } => {
            let experiment = session
                .engine
                .start_experiment(category, now)
                .map_err(|e| session.refuse(e))?;
            session.journal.record_transitions(
                &[Transition::ExperimentStarted {
                    experiment_id: experiment.id.clone(),
                    category: experiment.trigger_category.clone(),
                }],
                now,
            );
            json!({ "command": "experiment start", "experiment": experiment })
        }
        ExperimentCommand::Bind { meal_id } => {
            let meal_id = MealId::new(meal_id.trim());
            let outcome = session
                .engine
                .bind_experiment_meal(&meal_id, now)
                .map_err(|e| session.refuse(e))?;
            if let BindOutcome::Bound { experiment_id } = &outcome {
                session.journal.record_transitions(
                    &[Transition::ExperimentBound {
                        experiment_id: experiment_id.clone(),
                        meal_id: meal_id.clone(),
                    }],
                    now,
                );
            }
            json!({ "command": "experiment bind", "outcome": outcome })
        }
        ExperimentCommand::Complete { meal_id, rating } => {
            let meal_id = MealId::new(meal_id.trim());
            let outcome = session
                .engine
                .complete_experiment(&meal_id, *rating, now)
                .map_err(|e| session.refuse(e))?;
            session.journal.record_outcome(
                &JourneyEvent::MealRated {
                    meal_id: meal_id.clone(),
                    at: now,
                    rating: *rating,
                },
                &outcome,
            );
            let resolved = match &outcome {
                ApplyOutcome::Applied(_) => session
                    .engine
                    .state()
                    .tier3
                    .completed_experiments
                    .last()
                    .cloned(),
                _ => None,
            };
            json!({
                "command": "experiment complete",
                "transitions": outcome.transitions(),
                "experiment": resolved,
            })
        }
        ExperimentCommand::Abandon => {
            let experiment = session
                .engine
                .abandon_experiment(now)
                .map_err(|e| session.refuse(e))?;
            session.journal.record_transitions(
                &[Transition::ExperimentAbandoned {
                    experiment_id: experiment.id.clone(),
                    category: experiment.trigger_category.clone(),
                }],
                now,
            );
            json!({ "command": "experiment abandon", "experiment": experiment })
        }
        ExperimentCommand::Pending => {
            let pending = session.engine.pending_experiment_meal_id().cloned();
            json!({
                "command": "experiment pending",
                "meal_id": pending,
                "experiment": session.engine.state().tier3.current_experiment,
            })
        }
    };
    session.persist()?;

    match output_mode(cli) {
        OutputMode::Human => print_experiment_human(&payload),
        OutputMode::Json => write_json_line(&payload)?,
    }
    Ok(())
}

fn print_experiment_human(payload: &Value) {
    let command = payload["command"].as_str().unwrap_or("experiment");
    let experiment = &payload["experiment"];
    match command {
        "experiment pending" => match payload["meal_id"].as_str() {
            Some(meal) => println!("Pending experiment meal: {meal}"),
            None if experiment.is_null() => println!("No active experiment."),
            None => println!(
                "Experiment on {} is waiting for a meal containing it.",
                experiment["trigger_category"].as_str().unwrap_or("?")
            ),
        },
        "experiment bind" => println!("Bind: {}", payload["outcome"]),
        _ if experiment.is_null() => println!("{command}: no experiment resolved"),
        _ => {
            println!(
                "{command}: {} on {}",
                experiment["id"].as_str().unwrap_or("?"),
                experiment["trigger_category"].as_str().unwrap_or("?")
            );
            if let Some(result) = experiment["result"].as_str() {
                let change = experiment["percentage_change"]
                    .as_f64()
                    .map_or_else(|| "n/a".to_string(), |pct| format!("{pct:+.1}%"));
                println!("  Result: {result} ({change})");
            }
        }
    }
}

fn run_blueprint(cli: &Cli, args: &BlueprintArgs) -> Result<(), CliError> {
    let mut session = Session::open(cli)?;
    let now = session.now;

    let blueprint = if args.preview {
        Some(session.engine.preview_blueprint().map_err(|e| session.refuse(e))?)
    } else if args.regenerate {
        let blueprint = session
            .engine
            .regenerate_blueprint(now)
            .map_err(|e| session.refuse(e))?;
        session.journal.record_transitions(
            &[Transition::BlueprintAssembled {
                source_digest: blueprint.source_digest.clone(),
                rated_days: blueprint.rated_days,
            }],
            now,
        );
        Some(blueprint)
    } else {
        session.engine.state().tier5.blueprint.clone()
    };
    session.persist()?;

    let unlocked = session.engine.is_tab_unlocked(InsightTab::Blueprint);
    match output_mode(cli) {
        OutputMode::Human => match &blueprint {
            None if unlocked => println!("Blueprint unlocked but not assembled yet; try --regenerate."),
            None => {
                let p = session.engine.tab_unlock_progress(InsightTab::Blueprint);
                println!(
                    "Blueprint locked: day {} of {} ({}%).",
                    p.current, p.target, p.percentage
                );
            }
            Some(bp) => {
                println!(
                    "{} {} .. {} ({} rated days)",
                    "Gut Health Blueprint".bold(),
                    bp.history_start,
                    bp.history_end,
                    bp.rated_days
                );
                for t in &bp.confirmed_triggers {
                    println!(
                        "  trigger {} ({}) mean {:.2}, {}",
                        t.category, t.food, t.mean_rating, t.severity
                    );
                }
                for s in &bp.safe_foods {
                    println!("  safe {} ({}) mean {:.2}", s.category, s.food, s.mean_rating);
                }
                println!(
                    "  improvement {:+.1}%  weekday {} / weekend {}",
                    bp.progress_journey.overall_improvement,
                    format_avg(bp.weekday_weekend.weekday_avg),
                    format_avg(bp.weekday_weekend.weekend_avg)
                );
                println!("  digest {}", bp.source_digest);
            }
        },
        OutputMode::Json => {
            let payload = json!({
                "command": "blueprint",
                "unlocked": unlocked,
                "preview": args.preview,
                "blueprint": blueprint,
                "narrative": session.engine.state().tier5.blueprint_narrative,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_guide(cli: &Cli, args: &GuideArgs) -> Result<(), CliError> {
    let mut session = Session::open(cli)?;
    let now = session.now;

    match &args.command {
        GuideCommand::Inputs => {
            session.persist()?;
            let inputs = session.engine.guide_inputs();
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", serde_json::to_string_pretty(&inputs)?);
                }
                OutputMode::Json => {
                    let payload = json!({ "command": "guide inputs", "inputs": inputs });
                    write_json_line(&payload)?;
                }
            }
        }
        GuideCommand::Store { path } => {
            let raw = fs::read_to_string(path)
                .map_err(|e| CliError::User(format!("read {}: {e}", path.display())))?;
            let consultation: AiGuideConsultation = serde_json::from_str(&raw)
                .map_err(|e| CliError::User(format!("parse {}: {e}", path.display())))?;
            session
                .engine
                .store_ai_guide(consultation, now)
                .map_err(|e| session.refuse(e))?;
            session
                .journal
                .record_transitions(&[Transition::AiGuideStored], now);
            session.persist()?;
            match output_mode(cli) {
                OutputMode::Human => println!("AI guide stored."),
                OutputMode::Json => {
                    let payload = json!({ "command": "guide store", "stored": true });
                    write_json_line(&payload)?;
                }
            }
        }
    }
    Ok(())
}

// ──────────────────── config / version ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error_code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(e.into())
            }
        },
    }
}

fn emit_version(cli: &Cli) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    let package = env!("CARGO_PKG_NAME");

    match output_mode(cli) {
        OutputMode::Human => println!("gutj {version}"),
        OutputMode::Json => {
            let payload = json!({
                "binary": "gutj",
                "version": version,
                "package": package,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── rendering ────────────────────

fn status_label(status: TierStatus) -> String {
    match status {
        TierStatus::Completed => "completed".green().to_string(),
        TierStatus::InProgress => "in progress".yellow().to_string(),
        TierStatus::Locked => "locked".dimmed().to_string(),
    }
}

fn format_avg(avg: Option<f64>) -> String {
    avg.map_or_else(|| "n/a".to_string(), |avg| format!("{avg:.2}"))
}

fn tab_line(engine: &JourneyEngine, tab: InsightTab) -> String {
    if engine.is_tab_unlocked(tab) {
        format!("{:<12} {}", tab.label(), "unlocked".green())
    } else {
        let p = engine.tab_unlock_progress(tab);
        format!(
            "{:<12} {} {}/{} ({}%)",
            tab.label(),
            "locked".dimmed(),
            p.current,
            p.target,
            p.percentage
        )
    }
}

fn tabs_json(engine: &JourneyEngine) -> Vec<Value> {
    InsightTab::ALL
        .iter()
        .map(|&tab| {
            json!({
                "tab": tab,
                "unlocked": engine.is_tab_unlocked(tab),
                "progress": engine.tab_unlock_progress(tab),
            })
        })
        .collect()
}

fn describe_transition(transition: &Transition) -> String {
    match transition {
        Transition::MilestoneReached { milestone, tier } => format!("{tier}: milestone {milestone}"),
        Transition::TierCompleted { tier } => format!("{tier} completed ({})", tier.title()),
        Transition::TabUnlocked { tab } => format!("tab {tab} unlocked"),
        Transition::ExperimentStarted {
            experiment_id,
            category,
        } => format!("experiment {experiment_id} started on {category}"),
        Transition::ExperimentBound {
            experiment_id,
            meal_id,
        } => format!("experiment {experiment_id} bound to meal {meal_id}"),
        Transition::ExperimentResolved {
            experiment_id,
            category,
            result,
            percentage_change,
        } => format!(
            "experiment {experiment_id} on {category}: {result}{}",
            percentage_change.map_or_else(String::new, |pct| format!(" ({pct:+.1}%)"))
        ),
        Transition::ExperimentAbandoned {
            experiment_id,
            category,
        } => format!("experiment {experiment_id} on {category} abandoned"),
        Transition::CheckpointReached { day, summary } => format!("day {day} checkpoint: {summary}"),
        Transition::BlueprintAssembled {
            source_digest,
            rated_days,
        } => format!("blueprint assembled from {rated_days} rated days ({source_digest})"),
        Transition::BlueprintRefused { error_code, reason } => {
            format!("blueprint refused [{error_code}]: {reason}")
        }
        Transition::AiGuideStored => "AI guide stored".to_string(),
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("GJ_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "gutj",
            "--config",
            "/tmp/gutj.toml",
            "--json",
            "--no-color",
            "--user",
            "alice",
            "status",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["gutj", "status", "--json", "--meals", "/tmp/meals.json"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_subcommands() {
        let cases = [
            vec!["gutj", "ingest"],
            vec!["gutj", "milestones"],
            vec!["gutj", "tabs"],
            vec!["gutj", "experiment", "start", "dairy"],
            vec!["gutj", "experiment", "bind", "meal-7"],
            vec!["gutj", "experiment", "complete", "meal-7", "4"],
            vec!["gutj", "experiment", "abandon"],
            vec!["gutj", "experiment", "pending"],
            vec!["gutj", "blueprint", "--preview"],
            vec!["gutj", "blueprint", "--regenerate"],
            vec!["gutj", "guide", "inputs"],
            vec!["gutj", "guide", "store", "/tmp/guide.json"],
            vec!["gutj", "config", "validate"],
            vec!["gutj", "version"],
            vec!["gutj", "--now", "2026-04-01T12:00:00Z", "status"],
        ];
        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn rating_outside_range_is_rejected_by_parser() {
        assert!(Cli::try_parse_from(["gutj", "experiment", "complete", "m", "0"]).is_err());
        assert!(Cli::try_parse_from(["gutj", "experiment", "complete", "m", "6"]).is_err());
    }

    #[test]
    fn preview_and_regenerate_conflict() {
        assert!(Cli::try_parse_from(["gutj", "blueprint", "--preview", "--regenerate"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["gutj", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution() {
        assert_eq!(resolve_output_mode(true, Some("human"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("json"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some(" HUMAN "), false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some("auto"), false), OutputMode::Json);
    }

    #[test]
    fn domain_errors_map_to_exit_codes() {
        let refused: CliError = GjError::transition("start_experiment", "locked").into();
        assert_eq!(refused.exit_code(), 1);
        let stale: CliError = GjError::StaleWrite {
            user_id: "u".to_string(),
            stored: "2".to_string(),
            expected: "1".to_string(),
        }
        .into();
        assert_eq!(stale.exit_code(), 2);
        let broken: CliError = GjError::InvariantViolation {
            details: "x".to_string(),
        }
        .into();
        assert_eq!(broken.exit_code(), 3);
    }

    #[test]
    fn now_override_parses_rfc3339() {
        let at = resolve_now(Some("2026-04-01T12:00:00+02:00")).unwrap();
        assert_eq!(at.to_rfc3339(), "2026-04-01T10:00:00+00:00");
        assert!(resolve_now(Some("yesterday")).is_err());
    }
}
