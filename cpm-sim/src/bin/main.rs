use std::{path::PathBuf, process};

use structopt::StructOpt;
use tracing_subscriber::*;

use cpm_sim::{
    output,
    report,
    settings::{OutputSettings, Settings, SimSettings},
    simulation,
    splits::{self, DataSource, Roster, SplitConfig},
};

#[macro_use]
extern crate tracing;

#[derive(Debug, StructOpt)]
#[structopt(name = "cpm-sim")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: Option<PathBuf>,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Run the collaboration-policy simulation and write the curve CSVs
    Simulate,

    /// Generate deterministic per-client dataset splits
    Splits {
        /// Path to the HumanEval JSONL file
        #[structopt(long, parse(from_os_str))]
        human_eval: PathBuf,

        /// Path to the MBPP JSONL file
        #[structopt(long, parse(from_os_str))]
        mbpp: PathBuf,

        /// Path to the client roster JSON file
        #[structopt(long, parse(from_os_str))]
        roster: PathBuf,

        /// Output directory for the split files
        #[structopt(long, parse(from_os_str), default_value = "artifacts/data/splits")]
        out: PathBuf,

        /// Seed of the split allocation
        #[structopt(long, default_value = "42")]
        seed: u64,

        /// Size of the global test set
        #[structopt(long, default_value = "116")]
        global_test_size: usize,

        /// Dirichlet concentration of the per-client source mixture
        #[structopt(long, default_value = "0.1")]
        concentration: f64,
    },

    /// Recompute the final results table from packaged artifacts
    Report {
        /// Path to the artifacts directory
        #[structopt(long, parse(from_os_str), default_value = "artifacts")]
        artifacts: PathBuf,
    },
}

fn main() {
    let opt = Opt::from_args();

    let settings = match &opt.config_path {
        Some(path) => Settings::new(path),
        None => Settings::with_defaults(),
    }
    .unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let Settings {
        sim: sim_settings,
        output: output_settings,
        log: log_settings,
    } = settings;

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    if let Err(err) = run(opt.command, &sim_settings, &output_settings) {
        error!("{}", err);
        process::exit(1);
    }
}

fn run(command: Command, sim: &SimSettings, out: &OutputSettings) -> anyhow::Result<()> {
    match command {
        Command::Simulate => {
            info!(
                clients = sim.num_clients,
                arms = sim.num_arms,
                rounds = sim.num_rounds,
                trials = sim.num_trials,
                "running collaboration-policy simulation"
            );
            let curves = simulation::run(sim)?;
            let paths = output::write_curves(&curves, &out.dir, out.precision)?;
            for path in paths {
                println!("{}", path.display());
            }
        }
        Command::Splits {
            human_eval,
            mbpp,
            roster,
            out,
            seed,
            global_test_size,
            concentration,
        } => {
            let pool = splits::merge_pools(vec![
                splits::read_pool(&human_eval, DataSource::HumanEval)?,
                splits::read_pool(&mbpp, DataSource::Mbpp)?,
            ]);
            let roster = Roster::from_file(&roster)?;
            let config = SplitConfig {
                seed,
                global_test_size,
                concentration,
            };
            info!(
                pool = pool.len(),
                clients = roster.clients.len(),
                "generating splits"
            );
            let plan = splits::generate_splits(&pool, &roster, &config)?;
            let paths = splits::write_split_files(&plan, &pool, &out)?;
            for path in paths {
                println!("{}", path.display());
            }
        }
        Command::Report { artifacts } => {
            let report = report::build_report(&artifacts)?;
            print!("{}", report);
        }
    }
    Ok(())
}
