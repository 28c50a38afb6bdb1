use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rustcar_pi::cars::CarModel;
use rustcar_pi::config::CarConfig;
use rustcar_pi::error::Error;
use rustcar_pi::export::TableExport;
use rustcar_pi::poisson::PoissonCache;
use rustcar_pi::policy::{Action, PolicyTable, ValueTable};
use rustcar_pi::solver::{PolicyIteration, Quiet, State};

/// Command line argument parser.
#[derive(Parser, Debug)]
#[command(about = "Solve the Barto and Sutton Car Rental Problem", long_about = None)]
pub struct Args {
    /// Path to RustCar configuration TOML file.
    config_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print rental and return probabilities.
    Probs,
    /// Calculate expected one-day reward for a state and action.
    Reward {
        n1: u8,
        n2: u8,
        #[arg(default_value_t = 0, allow_negative_numbers = true)]
        a: Action,
    },
    /// Solve for optimal policy.
    Solve {
        /// Directory for policy and value CSV files.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("{e}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Error> {
    let config = CarConfig::load(&args.config_path)?;
    init_threads(config.threads);

    info!("calculating rental and return probabilities");
    let cache = PoissonCache::new(config.poisson_bound);

    match &args.command {
        Commands::Probs => {
            CarModel::new(&config, &cache)?.show_probs();
        }
        Commands::Reward { n1, n2, a } => {
            let model = CarModel::new(&config, &cache)?;
            let s = State { n1: (*n1).min(config.max_count), n2: (*n2).min(config.max_count) };
            let values = ValueTable::zeros(config.max_count);
            let r = model.expected_return(&s, *a, &values, config.returns);
            if r.is_finite() {
                println!("Expected Reward: {:.2}", r);
            } else {
                println!("Action {a} is not feasible in state {s}");
            }
        }
        Commands::Solve { out } => {
            let solver = PolicyIteration::new(&config, &cache)?;
            let solution = match out {
                Some(dir) => solver.solve(&mut TableExport::new(dir)?)?,
                None => solver.solve(&mut Quiet)?,
            };
            info!(iterations = solution.iterations, "policy converged");
            show_policy(&solution.policy);
        }
    }
    Ok(())
}

/// Apply the configured rayon thread count, if any.
fn init_threads(threads: Option<usize>) {
    if let Some(n) = threads {
        match rayon::ThreadPoolBuilder::new().num_threads(n).build_global() {
            Ok(()) => info!(threads = n, "rayon thread pool"),
            Err(e) => error!("unable to size rayon thread pool: {e}"),
        }
    }
}

/// Print the policy with location #1 counts descending down the rows.
fn show_policy(policy: &PolicyTable) {
    let max = policy.max_count();
    print!("n1\\n2");
    for n2 in 0..=max {
        print!("{n2:>4}");
    }
    println!();
    for n1 in (0..=max).rev() {
        print!("{n1:>5}");
        for n2 in 0..=max {
            print!("{:>4}", policy.action(&State { n1, n2 }));
        }
        println!();
    }
}
