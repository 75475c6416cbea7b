//! Pipelines behind the command line: per-case evaluation of every DLC,
//! total DEM, member cycle totals, hotspot utilization, lookup table and
//! lifetime.
use anyhow::{anyhow, bail, Context, Result};
use hashbrown::HashMap;
use nalgebra::DMatrix;
use rayon::prelude::*;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::aggregate::{CombinedTable, CycleTotals, DamageTable, ProbabilityWeightedAggregator};
use crate::cases::{load_case_table, CaseTable};
use crate::config::{load_config, resolve_dffs, Config, DlcInput};
use crate::engine::{CaseEngine, MemberPlan, Mode};
use crate::error::{FatigueError, Location};
use crate::geometry::{load_geometry_table, CrossSection};
use crate::lifetime::{lifetime_from_combined, SectorLifetimes};
use crate::lookup::{hotspot_case_damage, LookupRow, LookupTable};
use crate::rainflow::CycleHistogram;
use crate::store::{
    check_member_labels, member_label, read_total_dem, write_total_dem, DlcResult, HistogramKey,
    HistogramStore,
};
use crate::utilization::{UtilizationCalculator, UtilizationReport};

fn mode_dir(output: &Path, mode: Mode) -> PathBuf {
    match mode {
        Mode::Dem => output.join("dem"),
        Mode::Damage => output.join("damage"),
    }
}

fn total_dem_path(conf: &Config) -> PathBuf {
    conf.project
        .output
        .join(format!("total_dem_{}.csv", conf.project.cluster))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

/// Instrumented members of the geometry table.
pub fn load_members(conf: &Config) -> Result<Vec<CrossSection>> {
    let table = load_geometry_table(&conf.inputs.geometry)
        .with_context(|| format!("reading geometry table {}", conf.inputs.geometry.display()))?;
    let total = table.len();
    let members: Vec<CrossSection> = table.into_iter().filter(|s| s.channels.is_some()).collect();
    if members.len() < total {
        warn!(
            ignored = total - members.len(),
            "geometry rows without channel columns are not members"
        );
    }
    if members.is_empty() {
        bail!("no instrumented members in {}", conf.inputs.geometry.display());
    }
    let elevations: Vec<f64> = members.iter().map(|m| m.elevation).collect();
    check_member_labels(&elevations)
        .with_context(|| format!("reading geometry table {}", conf.inputs.geometry.display()))?;
    Ok(members)
}

pub fn load_hotspots(conf: &Config) -> Result<Vec<CrossSection>> {
    let path = conf
        .inputs
        .hotspots
        .as_ref()
        .ok_or_else(|| anyhow!("inputs.hotspots must be set for this stage"))?;
    load_geometry_table(path).with_context(|| format!("reading hotspot table {}", path.display()))
}

fn load_cases(dlc: &DlcInput) -> Result<CaseTable> {
    load_case_table(&dlc.id, &dlc.cases)
        .with_context(|| format!("reading case table {}", dlc.cases.display()))
}

/// Evaluates every case of every DLC in the configured mode and stores one
/// result table per DLC.
pub fn run_cases(config_path: &str) -> Result<Vec<PathBuf>> {
    let conf = load_config(config_path)?;
    let sectors = conf.sectors()?;
    let plans = load_members(&conf)?
        .into_iter()
        .map(|section| MemberPlan::new(section, &sectors, conf.analysis.angle_frame))
        .collect::<Result<Vec<_>, FatigueError>>()?;
    let engine = CaseEngine::new(
        conf.analysis.mode,
        conf.counter(),
        conf.dem,
        conf.analysis.store_histograms,
    );
    info!(
        cluster = %conf.project.cluster,
        mode = ?conf.analysis.mode,
        members = plans.len(),
        sectors = sectors.len(),
        "evaluating cases"
    );
    conf.inputs
        .dlcs
        .iter()
        .map(|dlc| run_dlc(&conf, dlc, &engine, &plans, &sectors))
        .collect()
}

fn run_dlc(
    conf: &Config,
    dlc: &DlcInput,
    engine: &CaseEngine,
    plans: &[MemberPlan],
    sectors: &[f64],
) -> Result<PathBuf> {
    let cluster = conf.project.cluster.as_str();
    let table = load_cases(dlc)?;
    let store = HistogramStore::new(mode_dir(&conf.project.output, engine.mode));
    info!(dlc = %dlc.id, cases = table.len(), "DLC started");

    let mut damage = DamageTable::new(plans.len(), sectors.len());
    let n_chunks = table.len().div_ceil(conf.analysis.chunk_size);
    for (chunk_no, chunk) in table.cases.chunks(conf.analysis.chunk_size).enumerate() {
        let outcomes = chunk
            .par_iter()
            .map(|case| {
                let (binary, descriptor) =
                    case.result_files(&conf.inputs.simulation_root, cluster);
                engine
                    .process_file(case.index, &binary, &descriptor, plans)
                    .map_err(|e| e.at(Location::case(cluster, &dlc.id, case.index)))
            })
            .collect::<Result<Vec<_>, FatigueError>>()?;
        debug!(dlc = %dlc.id, chunk = chunk_no + 1, of = n_chunks, "chunk evaluated");

        for outcome in outcomes {
            damage.push_outcome(&outcome)?;
            for (plan, member) in plans.iter().zip(&outcome.members) {
                if let Some(histograms) = &member.histograms {
                    let key = HistogramKey {
                        cluster,
                        dlc: &dlc.id,
                        member: plan.elevation(),
                        case: outcome.case,
                    };
                    store.write_case(&key, histograms)?;
                }
            }
        }
    }

    let weights = table.probabilities();
    let combined = ProbabilityWeightedAggregator::for_mode(engine.mode).accumulate(&damage, &weights)?;
    let result = DlcResult::new(
        cluster,
        &dlc.id,
        engine.mode,
        plans.iter().map(|p| p.elevation()).collect(),
        sectors.to_vec(),
        weights,
        &damage,
        &combined,
    );
    let path = result.save(&conf.project.output)?;
    info!(dlc = %dlc.id, path = %path.display(), "DLC finished");
    Ok(path)
}

/// First DLC result, after checking that every DLC was evaluated on the same
/// members and sectors.
fn common_layout(results: &[DlcResult]) -> Result<&DlcResult> {
    let first = results
        .first()
        .ok_or_else(|| anyhow!("no DLC results to combine"))?;
    for result in &results[1..] {
        if result.elevations != first.elevations || result.sectors != first.sectors {
            bail!(
                "DLC {} was evaluated on different members or sectors than DLC {}",
                result.dlc,
                first.dlc
            );
        }
    }
    Ok(first)
}

fn load_dlc_results(conf: &Config, mode: Mode) -> Result<Vec<DlcResult>> {
    conf.inputs
        .dlcs
        .iter()
        .map(|dlc| {
            let path = DlcResult::path(&conf.project.output, &conf.project.cluster, &dlc.id, mode);
            DlcResult::load(&path).with_context(|| format!("loading DLC result {}", path.display()))
        })
        .collect()
}

/// Sums the combined DEM tables of all DLCs and stores them per member.
pub fn run_total_dem(config_path: &str) -> Result<PathBuf> {
    let conf = load_config(config_path)?;
    let results = load_dlc_results(&conf, Mode::Dem)?;
    let first = common_layout(&results)?;
    let (elevations, sectors) = (first.elevations.clone(), first.sectors.clone());
    let mut total = CombinedTable::new(elevations.len(), sectors.len());
    for result in &results {
        total.add(&result.dlc, &result.combined_matrix()?)?;
    }
    for (g, elevation) in elevations.iter().enumerate() {
        let dems: Vec<f64> = total.values().row(g).iter().map(|s| conf.dem.dem(*s)).collect();
        let (sector, dem) = dems
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, d)| if *d > best.1 { (i, *d) } else { best });
        info!(
            elevation,
            sector = sectors[sector],
            dem_mnm = dem * 1.0e-6,
            "member DEM"
        );
    }
    let path = total_dem_path(&conf);
    write_total_dem(&path, &elevations, &sectors, total.values())?;
    info!(path = %path.display(), dlcs = total.dlcs().len(), "stored total DEM");
    Ok(path)
}

/// Concatenates the stored moment histograms of every case into one yearly
/// cycle histogram per member and sector.
pub fn run_markov(config_path: &str) -> Result<Vec<PathBuf>> {
    let conf = load_config(config_path)?;
    let cluster = conf.project.cluster.as_str();
    let n_sectors = conf.sectors()?.len();
    let members = load_members(&conf)?;
    let tables = conf
        .inputs
        .dlcs
        .iter()
        .map(load_cases)
        .collect::<Result<Vec<_>>>()?;
    let store = HistogramStore::new(mode_dir(&conf.project.output, Mode::Dem));

    let totals = members
        .par_iter()
        .map(|member| {
            let mut totals = CycleTotals::new(n_sectors);
            for table in &tables {
                for case in &table.cases {
                    let key = HistogramKey {
                        cluster,
                        dlc: &table.dlc,
                        member: member.elevation,
                        case: case.index,
                    };
                    let histograms = store.read_case(&key).map_err(|e| {
                        e.at(Location::case(cluster, &table.dlc, case.index)
                            .with_elevation(member.elevation))
                    })?;
                    totals.add_case(&histograms, case.probability)?;
                }
            }
            Ok((member.elevation, totals.into_histograms()))
        })
        .collect::<Result<Vec<_>, FatigueError>>()?;

    let mut paths = Vec::with_capacity(totals.len());
    for (elevation, histograms) in totals {
        let path = store.write_totals(cluster, elevation, &histograms)?;
        info!(elevation, path = %path.display(), "stored member cycle totals");
        paths.push(path);
    }
    Ok(paths)
}

/// Member data needed to scale histograms to hotspots.
struct MemberData {
    elevations: Vec<f64>,
    sectors: Vec<f64>,
    sums: DMatrix<f64>,
    cycles: Vec<Vec<CycleHistogram>>,
}

fn load_member_data(conf: &Config) -> Result<MemberData> {
    let path = total_dem_path(conf);
    let (elevations, sectors, sums) =
        read_total_dem(&path).with_context(|| format!("reading {}", path.display()))?;
    let store = HistogramStore::new(mode_dir(&conf.project.output, Mode::Dem));
    let cycles = elevations
        .iter()
        .map(|z| store.read_totals(&conf.project.cluster, *z))
        .collect::<Result<Vec<_>, FatigueError>>()?;
    Ok(MemberData {
        elevations,
        sectors,
        sums,
        cycles,
    })
}

fn calculator<'a>(conf: &Config, data: &'a MemberData) -> UtilizationCalculator<'a> {
    UtilizationCalculator {
        member_elevations: &data.elevations,
        dem_sums: &data.sums,
        member_cycles: &data.cycles,
        sectors: &data.sectors,
        settings: conf.dem,
        frame: conf.analysis.angle_frame,
        policy: conf.utilization.out_of_range,
    }
}

fn hotspot_dffs(conf: &Config, count: usize) -> Result<Vec<f64>> {
    Ok(resolve_dffs(count, conf.safety.dff, conf.safety.dffs.as_deref())?)
}

/// Utilization of every hotspot elevation.
pub fn run_utilization(config_path: &str) -> Result<UtilizationReport> {
    let conf = load_config(config_path)?;
    let data = load_member_data(&conf)?;
    let hotspots = load_hotspots(&conf)?;
    let dffs = hotspot_dffs(&conf, hotspots.len())?;
    let report = calculator(&conf, &data).evaluate(&hotspots, &dffs)?;
    if let Some(worst) = report.worst_row() {
        info!(
            elevation = worst.elevation,
            utilization = worst.utilization,
            curve = %worst.curve,
            "governing hotspot"
        );
    }
    let path = conf
        .project
        .output
        .join(format!("utilization_{}.json", conf.project.cluster));
    write_json(&path, &report)?;
    info!(path = %path.display(), hotspots = report.rows.len(), "stored utilization");
    Ok(report)
}

/// Per-case damage at the governing hotspot, keyed by DLC and case.
pub fn run_lookup(config_path: &str) -> Result<LookupTable> {
    let conf = load_config(config_path)?;
    let cluster = conf.project.cluster.as_str();
    let data = load_member_data(&conf)?;
    let hotspots = load_hotspots(&conf)?;
    let dffs = hotspot_dffs(&conf, hotspots.len())?;
    let calc = calculator(&conf, &data);
    let report = calc.evaluate(&hotspots, &dffs)?;
    let worst = report
        .worst_row()
        .ok_or_else(|| anyhow!("no hotspot could be evaluated"))?;
    let hotspot = &hotspots[worst.index];
    let scaling = calc.scaling(hotspot)?;
    let layout = hotspot.sector_layout(&data.sectors, conf.analysis.angle_frame);
    let member = data.elevations[scaling.closest_member];
    let store = HistogramStore::new(mode_dir(&conf.project.output, Mode::Dem));
    info!(
        elevation = hotspot.elevation,
        member,
        factor = scaling.factor,
        "building lookup table"
    );

    let mut table = LookupTable::new(hotspot.elevation, data.sectors.clone(), worst.dff, scaling.factor);
    for dlc in &conf.inputs.dlcs {
        let cases = load_cases(dlc)?;
        let rows = cases
            .cases
            .par_iter()
            .map(|case| {
                let key = HistogramKey {
                    cluster,
                    dlc: &dlc.id,
                    member,
                    case: case.index,
                };
                let located = |e: FatigueError| {
                    e.at(Location::case(cluster, &dlc.id, case.index).with_elevation(member))
                };
                let histograms = store.read_case(&key).map_err(located)?;
                let damage =
                    hotspot_case_damage(&histograms, hotspot, &layout, scaling.factor, worst.dff)
                        .map_err(located)?;
                Ok(LookupRow {
                    dlc: dlc.id.clone(),
                    case: case.index,
                    simulation_name: case.file_stem(cluster),
                    probability: case.probability,
                    descriptors: case.descriptors.clone(),
                    damage,
                })
            })
            .collect::<Result<Vec<_>, FatigueError>>()?;
        for row in rows {
            table.push(row)?;
        }
        debug!(dlc = %dlc.id, rows = table.rows.len(), "lookup rows collected");
    }

    if let Some(outside) = report.worst_skipped_reported() {
        let factor = outside / worst.utilization;
        if factor > 1.0 {
            warn!(
                factor,
                reported = outside,
                computed = worst.utilization,
                "a hotspot outside the member span is worse, rescaling lookup damage"
            );
            table.rescale(factor);
        }
    }

    let lifetime = table.lifetime()?;
    info!(
        sector = data.sectors[lifetime.governing_sector],
        lifetime = %lifetime.governing,
        "lifetime from lookup table"
    );
    let stem = conf
        .project
        .output
        .join(format!("lookup_{}", conf.project.cluster));
    table.write_csv(stem.with_extension("csv"))?;
    table.write_json(stem.with_extension("json"))?;
    info!(path = %stem.display(), rows = table.rows.len(), "stored lookup table");
    Ok(table)
}

#[derive(Debug, serde::Serialize)]
pub struct ElevationLifetime {
    pub elevation: f64,
    pub dff: f64,
    #[serde(flatten)]
    pub lifetimes: SectorLifetimes,
}

/// Lifetime of every member from the combined damage tables of all DLCs.
pub fn run_lifetime(config_path: &str) -> Result<Vec<ElevationLifetime>> {
    let conf = load_config(config_path)?;
    let results = load_dlc_results(&conf, Mode::Damage)?;
    let first = common_layout(&results)?;
    let elevations = first.elevations.clone();
    let member_dffs: HashMap<String, f64> = load_members(&conf)?
        .iter()
        .filter_map(|m| m.dff.map(|dff| (member_label(m.elevation), dff)))
        .collect();
    let dffs: Vec<f64> = elevations
        .iter()
        .map(|z| {
            member_dffs
                .get(&member_label(*z))
                .copied()
                .unwrap_or(conf.safety.dff)
        })
        .collect();
    let tables = results
        .iter()
        .map(|r| r.combined_matrix())
        .collect::<Result<Vec<_>, FatigueError>>()?;
    let lifetimes = lifetime_from_combined(&tables, &dffs)?;
    let report: Vec<ElevationLifetime> = elevations
        .iter()
        .zip(dffs)
        .zip(lifetimes)
        .map(|((elevation, dff), lifetimes)| {
            info!(
                elevation = *elevation,
                sector = first.sectors[lifetimes.governing_sector],
                lifetime = %lifetimes.governing,
                "member lifetime"
            );
            ElevationLifetime {
                elevation: *elevation,
                dff,
                lifetimes,
            }
        })
        .collect();
    let path = conf
        .project
        .output
        .join(format!("lifetime_{}.json", conf.project.cluster));
    write_json(&path, &report)?;
    info!(path = %path.display(), "stored lifetimes");
    Ok(report)
}
