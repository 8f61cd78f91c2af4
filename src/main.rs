use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{arg, ArgMatches, Command};

use wave_bnp::master_problem::rmp::SeedStrategy;
use wave_bnp::{Instance, KOrder, Oracle, RankingPolicy, ScipOracle, WavePicker, WaveSettings, UI};

fn cli() -> Command {
    Command::new("wave-bnp")
        .about("Selects orders and aisles for a pick wave by column generation")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("solve")
                .about("Solves one instance file")
                .arg(arg!(<INSTANCE> "Path to the instance file").value_parser(clap::value_parser!(PathBuf)))
                .arg(
                    arg!([SECONDS] "Wall clock budget in seconds")
                        .default_value("30")
                        .value_parser(clap::value_parser!(f64)),
                )
                .arg(
                    arg!(--output <FILE> "Write the wave (order ids, aisle ids) to this file")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--ranking [POLICY] "Order in which aisle counts are revisited")
                        .default_value("proximity")
                        .value_parser(["proximity", "ucb", "dual-bound"]),
                )
                .arg(
                    arg!(--"k-order" [ORDER] "Initial order of aisle counts")
                        .default_value("ascending")
                        .value_parser(["ascending", "spread"]),
                )
                .arg(
                    arg!(--seed [STRATEGY] "Heuristic used to seed every master")
                        .default_value("units")
                        .value_parser(["units", "density", "knapsack"]),
                )
                .arg(
                    arg!(--threads [THREADS] "Aisles priced in parallel")
                        .default_value("1")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--oracle [ORACLE] "LP/MIP backend")
                        .default_value("scip")
                        .value_parser(["scip", "gurobi"]),
                )
                .arg(arg!(--quiet "Only print the result")),
        )
}

fn settings_from(matches: &ArgMatches) -> Result<WaveSettings> {
    let seconds = *matches.get_one::<f64>("SECONDS").ok_or_else(|| anyhow!("missing time budget"))?;
    if !seconds.is_finite() || seconds <= 0.0 {
        bail!("time budget must be positive, got {seconds}");
    }

    let ranking = match matches.get_one::<String>("ranking").map(String::as_str) {
        Some("ucb") => RankingPolicy::Ucb { exploration: 0.5 },
        Some("dual-bound") => RankingPolicy::DualBound,
        _ => RankingPolicy::Proximity,
    };
    let k_order = match matches.get_one::<String>("k-order").map(String::as_str) {
        Some("spread") => KOrder::BinarySpread,
        _ => KOrder::Ascending,
    };
    let seeding = match matches.get_one::<String>("seed").map(String::as_str) {
        Some("density") => SeedStrategy::GreedyDensity,
        Some("knapsack") => SeedStrategy::Knapsack { patterns_per_aisle: 3 },
        _ => SeedStrategy::GreedyUnits,
    };

    Ok(WaveSettings {
        time_limit: Duration::from_secs_f64(seconds),
        ranking,
        k_order,
        seeding,
        pricing_threads: matches.get_one::<usize>("threads").copied().unwrap_or(1).max(1),
        ..WaveSettings::default()
    })
}

fn oracle_from(matches: &ArgMatches) -> Result<Box<dyn Oracle>> {
    match matches.get_one::<String>("oracle").map(String::as_str) {
        #[cfg(feature = "gurobi")]
        Some("gurobi") => Ok(Box::new(wave_bnp::solvers::gurobi::GurobiOracle::default())),
        #[cfg(not(feature = "gurobi"))]
        Some("gurobi") => bail!("built without the `gurobi` feature"),
        _ => Ok(Box::new(ScipOracle::default())),
    }
}

fn solve(matches: &ArgMatches) -> Result<()> {
    let path = matches
        .get_one::<PathBuf>("INSTANCE")
        .ok_or_else(|| anyhow!("missing instance path"))?;
    let instance = Instance::from_file(path).with_context(|| format!("failed to load {}", path.display()))?;
    let settings = settings_from(matches)?;
    let oracle = oracle_from(matches)?;

    let quiet = matches.get_flag("quiet");
    let ui = (!quiet).then(UI::new);
    let sender = ui.as_ref().map(UI::get_sender).unwrap_or_default();

    let picker = WavePicker::new(&instance, oracle.as_ref(), settings, sender);
    let report = picker.run();
    if let Some(ui) = ui {
        ui.shutdown(report.as_ref().ok().and_then(|r| r.best.as_ref()).map(|w| w.objective));
    }
    let report = report.context("oracle failed")?;

    match &report.best {
        Some(wave) => {
            println!("{wave}");
            println!(
                "METRICS objective={:.6} units={} orders={} aisles={} k_visits={} finalized={} time_limit={} elapsed={:.3}",
                wave.objective,
                wave.units,
                wave.orders.len(),
                wave.aisles.len(),
                report.visits,
                report.finalized,
                report.time_limit_reached,
                report.elapsed.as_secs_f64()
            );
            if let Some(out) = matches.get_one::<PathBuf>("output") {
                wave.write_file(out)
                    .with_context(|| format!("failed to write {}", out.display()))?;
            }
        }
        None => {
            println!("NA");
            println!(
                "METRICS objective=NA k_visits={} time_limit={} elapsed={:.3}",
                report.visits,
                report.time_limit_reached,
                report.elapsed.as_secs_f64()
            );
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("solve", sub_m)) => solve(sub_m),
        _ => Err(anyhow!("Invalid subcommand")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn flags_map_onto_settings() {
        let matches = cli().get_matches_from([
            "wave-bnp", "solve", "inst.txt", "12.5", "--ranking", "ucb", "--k-order", "spread", "--seed", "knapsack",
            "--threads", "4",
        ]);
        let (_, sub_m) = matches.subcommand().unwrap();
        let settings = settings_from(sub_m).unwrap();
        assert_eq!(settings.time_limit, Duration::from_millis(12_500));
        assert_eq!(settings.ranking, RankingPolicy::Ucb { exploration: 0.5 });
        assert_eq!(settings.k_order, KOrder::BinarySpread);
        assert_eq!(settings.seeding, SeedStrategy::Knapsack { patterns_per_aisle: 3 });
        assert_eq!(settings.pricing_threads, 4);
    }

    #[test]
    fn rejects_non_positive_budget() {
        let matches = cli().get_matches_from(["wave-bnp", "solve", "inst.txt", "0"]);
        let (_, sub_m) = matches.subcommand().unwrap();
        assert!(settings_from(sub_m).is_err());
    }
}
