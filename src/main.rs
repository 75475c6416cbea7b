use clap::{Arg, ArgMatches, Command};
use foundation_fatigue::app_logic;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .help("Path to the YAML or TOML project configuration")
        .required(true)
}

fn cli() -> Command {
    Command::new("foundation-fatigue")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Fatigue damage and damage-equivalent moments of offshore wind foundations")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("cases")
                .about("Rainflow count every case of every DLC and store the per-DLC tables")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("total-dem")
                .about("Sum the DLC tables into the lifetime DEM per member and sector")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("markov")
                .about("Concatenate the stored case histograms into yearly member cycle totals")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("utilization")
                .about("Interpolate member DEMs to the hotspots and compute their utilization")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("lookup")
                .about("Per-case damage table of the governing hotspot")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("lifetime")
                .about("Member lifetime from the damage-mode DLC tables")
                .arg(config_arg()),
        )
        .after_help(
            "Stages build on each other: cases, total-dem and markov must run before \
             utilization and lookup. Set RUST_LOG to change the log level.",
        )
}

fn dispatch(name: &str, args: &ArgMatches) -> anyhow::Result<()> {
    let config = args
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or_default();
    match name {
        "cases" => {
            let paths = app_logic::run_cases(config)?;
            info!(dlcs = paths.len(), "cases evaluated");
        }
        "total-dem" => {
            app_logic::run_total_dem(config)?;
        }
        "markov" => {
            let paths = app_logic::run_markov(config)?;
            info!(members = paths.len(), "cycle totals stored");
        }
        "utilization" => {
            let report = app_logic::run_utilization(config)?;
            for row in &report.rows {
                println!(
                    "{:>9.2} mLAT  {:<8} {:>8.2} %",
                    row.elevation, row.curve, row.utilization
                );
            }
        }
        "lookup" => {
            app_logic::run_lookup(config)?;
        }
        "lifetime" => {
            for member in app_logic::run_lifetime(config)? {
                println!(
                    "{:>9.2} mLAT  {} years",
                    member.elevation, member.lifetimes.governing
                );
            }
        }
        other => anyhow::bail!("unknown subcommand {}", other),
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let matches = cli().get_matches();
    if let Some((name, args)) = matches.subcommand() {
        if let Err(e) = dispatch(name, args) {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
