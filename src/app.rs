//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - installs logging
//! - builds the engine configuration
//! - runs the scenario pipeline
//! - prints tables or JSON

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, DemoArgs, PredictorKind};
use crate::domain::{EngineConfig, EstimatorConfig, SegmenterConfig, SimulatorConfig};
use crate::error::AppError;
use crate::models::ModelRegistry;
use crate::scenario::{CompareMetric, LastValuePredictor, LinearTrendPredictor, Predictor};

pub mod pipeline;

/// Entry point for the `psir` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Demo(args) => handle_demo(&args, cli.json),
        Command::Models => handle_models(cli.json),
    }
}

/// Log to stderr; `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // Ignore an already installed subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn handle_demo(args: &DemoArgs, json: bool) -> Result<(), AppError> {
    let config = engine_config_from_args(args);
    config.validate()?;
    if args.print_config {
        return print_json(&config);
    }

    let settings = demo_settings_from_args(args);
    let predictor: Box<dyn Predictor> = match args.predictor {
        PredictorKind::LastValue => Box::new(LastValuePredictor),
        PredictorKind::LinearTrend => Box::new(LinearTrendPredictor::default()),
    };
    let run = pipeline::run_demo(&settings, &config, predictor.as_ref())?;

    if json {
        return print_json(&run);
    }

    if let Some(date) = run.true_change {
        println!("Synthetic regime change: {date}");
    }
    if let Some(today) = run.today {
        println!("Today (last record): {today}\n");
    }
    for scenario in &run.scenarios {
        println!("{}", crate::report::format_phase_summary(&scenario.name, &scenario.phases));
    }
    println!("{}", crate::report::format_comparison(&run.comparison, args.every));
    println!("{}", crate::report::format_descriptions(&run.descriptions));
    Ok(())
}

fn handle_models(json: bool) -> Result<(), AppError> {
    let models = ModelRegistry::with_builtin();
    if json {
        let listing: Vec<serde_json::Value> = models
            .iter()
            .map(|m| {
                serde_json::json!({
                    "name": m.name(),
                    "variables": m.variables(),
                    "parameters": m.parameters(),
                })
            })
            .collect();
        return print_json(&listing);
    }
    print!("{}", crate::report::format_models(&models));
    Ok(())
}

pub fn engine_config_from_args(args: &DemoArgs) -> EngineConfig {
    EngineConfig {
        simulator: SimulatorConfig {
            substeps: args.substeps,
        },
        segmenter: SegmenterConfig {
            min_phase_days: args.min_phase_days,
            penalty: args.penalty,
            ..SegmenterConfig::default()
        },
        estimator: EstimatorConfig {
            metric: args.metric,
            max_iterations: args.max_iterations,
            timeout_ms: args.timeout_ms,
            restarts: args.restarts,
            seed: args.estimator_seed,
            ..EstimatorConfig::default()
        },
    }
}

pub fn demo_settings_from_args(args: &DemoArgs) -> pipeline::DemoSettings {
    let truth = |rho: f64| vec![args.theta, args.kappa, rho, args.sigma];
    pipeline::DemoSettings {
        model: args.model.clone(),
        geo: "Synthetic".to_string(),
        population: args.population,
        initial_infected: args.initial_infected,
        days: args.days,
        truth: truth(args.rho),
        change: (!args.no_change).then(|| (args.change_day, truth(args.rho_after))),
        noise: args.noise,
        seed: args.seed,
        horizon: args.horizon,
        lockdown_rho: (!args.no_lockdown).then_some(args.lockdown_rho),
        compare: CompareMetric::parse(&args.compare),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::new(4, format!("Failed to serialize output: {e}")))?;
    println!("{text}");
    Ok(())
}
