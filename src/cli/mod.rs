//! Command-line parsing for the phase-dependent SIR scenario engine.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use crate::domain::Metric;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "psir", version, about = "Phase-dependent SIR scenario engine")]
pub struct Cli {
    /// Print results as JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    /// Log more (-v: info, -vv: debug). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a synthetic outbreak, build Baseline, branch a Lockdown
    /// scenario, predict and compare.
    Demo(DemoArgs),
    /// List registered ODE models and their parameter schema.
    Models,
}

/// How future parameter values are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PredictorKind {
    LastValue,
    LinearTrend,
}

#[derive(Debug, Parser, Clone)]
pub struct DemoArgs {
    /// Model fitted to the records (SIR, SIR-D, SIR-F).
    #[arg(short = 'm', long, default_value = "SIR-F")]
    pub model: String,

    /// Total population of the synthetic geography.
    #[arg(long, default_value_t = 10_000_000.0)]
    pub population: f64,

    /// Initially infected persons.
    #[arg(long, default_value_t = 1_000.0)]
    pub initial_infected: f64,

    /// Observed days.
    #[arg(long, default_value_t = 120)]
    pub days: usize,

    /// Day (0-based) of the regime change.
    #[arg(long, default_value_t = 60)]
    pub change_day: usize,

    /// Disable the regime change.
    #[arg(long)]
    pub no_change: bool,

    /// Synthetic truth (SIR-F): fraction of cases dying before confirmation.
    #[arg(long, default_value_t = 0.002)]
    pub theta: f64,

    /// Synthetic truth (SIR-F): mortality rate.
    #[arg(long, default_value_t = 0.005)]
    pub kappa: f64,

    /// Synthetic truth (SIR-F): effective contact rate before the change.
    #[arg(long, default_value_t = 0.2)]
    pub rho: f64,

    /// Synthetic truth (SIR-F): effective contact rate after the change.
    #[arg(long, default_value_t = 0.1)]
    pub rho_after: f64,

    /// Synthetic truth (SIR-F): recovery rate.
    #[arg(long, default_value_t = 0.075)]
    pub sigma: f64,

    /// Multiplicative noise level of the synthetic records.
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,

    /// Random seed for the synthetic records.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Days to predict beyond the last record.
    #[arg(long, default_value_t = 30)]
    pub horizon: usize,

    #[arg(long, value_enum, default_value_t = PredictorKind::LastValue)]
    pub predictor: PredictorKind,

    /// Branch a Lockdown scenario with this contact rate after today.
    #[arg(long, default_value_t = 0.05)]
    pub lockdown_rho: f64,

    /// Do not branch the Lockdown scenario.
    #[arg(long)]
    pub no_lockdown: bool,

    /// Variable, parameter or `Rt` compared across scenarios.
    #[arg(long, default_value = "Infected")]
    pub compare: String,

    /// Print every N-th comparison row.
    #[arg(long, default_value_t = 7)]
    pub every: usize,

    /// Minimum phase length in days.
    #[arg(long, default_value_t = 7)]
    pub min_phase_days: u32,

    /// Change-point penalty multiplier.
    #[arg(long, default_value_t = 5.0)]
    pub penalty: f64,

    #[arg(long, value_enum, default_value_t = Metric::Rmsle)]
    pub metric: Metric,

    /// Optimizer iteration budget per run.
    #[arg(long, default_value_t = 2000)]
    pub max_iterations: usize,

    /// Wall-clock budget per phase (milliseconds).
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Additional optimizer runs from perturbed seeds.
    #[arg(long, default_value_t = 4)]
    pub restarts: usize,

    /// Seed of the optimizer restarts.
    #[arg(long, default_value_t = 0)]
    pub estimator_seed: u64,

    /// RK4 steps per day.
    #[arg(long, default_value_t = 1)]
    pub substeps: u32,

    /// Print the engine configuration as JSON and exit.
    #[arg(long)]
    pub print_config: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_defaults_parse() {
        let cli = Cli::parse_from(["psir", "demo"]);
        let Command::Demo(args) = cli.command else {
            panic!("expected demo");
        };
        assert_eq!(args.model, "SIR-F");
        assert_eq!(args.days, 120);
        assert_eq!(args.predictor, PredictorKind::LastValue);
        assert!(!cli.json);
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::parse_from(["psir", "demo", "--json", "-vv", "--predictor", "linear-trend"]);
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        let Command::Demo(args) = cli.command else {
            panic!("expected demo");
        };
        assert_eq!(args.predictor, PredictorKind::LinearTrend);
    }
}
