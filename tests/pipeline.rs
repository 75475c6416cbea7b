use approx::assert_relative_eq;
use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

use foundation_fatigue::app_logic;
use foundation_fatigue::store::{read_total_dem, DlcResult, HistogramStore};
use foundation_fatigue::engine::Mode;
use foundation_fatigue::timeseries::{descriptor_text, encode_channels, ChannelTimeSeries};

const CLUSTER: &str = "JLO";
const PROBABILITY: &str = "Tot_Prob_in_10_percent_idling_scenario_hr_year";

/// Two members with three channels each, the upper member loaded harder.
fn case_series(amplitude: f64, steps: usize) -> ChannelTimeSeries {
    let wave = |scale: f64, phase: f64| -> Vec<f64> {
        (0..steps)
            .map(|i| {
                let t = i as f64 / steps as f64;
                scale * ((2.0 * PI * 12.0 * t + phase).sin() + 0.3 * (2.0 * PI * 47.0 * t).sin())
            })
            .collect()
    };
    let axial = vec![-2.0e6; steps];
    ChannelTimeSeries::from_channels(&[
        wave(amplitude, 0.0),
        wave(0.4 * amplitude, 1.0),
        axial.clone(),
        wave(2.0 * amplitude, 0.0),
        wave(0.8 * amplitude, 1.0),
        axial,
    ])
    .unwrap()
}

fn write_case(root: &Path, dir: &str, name: &str, amplitude: f64) {
    let dir = root.join(dir);
    fs::create_dir_all(&dir).unwrap();
    let series = case_series(amplitude, 600);
    fs::write(dir.join(format!("{}.$105", name)), encode_channels(&series)).unwrap();
    fs::write(dir.join(format!("{}.%105", name)), descriptor_text(&series)).unwrap();
}

struct Project {
    _dir: tempfile::TempDir,
    root: PathBuf,
    output: PathBuf,
}

impl Project {
    fn new() -> Project {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let sims = root.join("sims");
        write_case(&sims, "DLC12/ws11", "JLO_12_001", 2.0e7);
        write_case(&sims, "DLC12/ws13", "JLO_12_002", 3.0e7);
        write_case(&sims, "DLC64/hs15", "JLO_64_001", 1.0e7);

        fs::write(
            root.join("dlc12.csv"),
            format!(
                "simulation_name,path,Wind Speed [m/s],{}\n\
                 XXX_12_001,DLC12\\ws11,11,1200\n\
                 XXX_12_002,DLC12\\ws13,13,800\n",
                PROBABILITY
            ),
        )
        .unwrap();
        fs::write(
            root.join("dlc64.csv"),
            format!("simulation_name,path,Hs [m],{}\nXXX_64_001,DLC64/hs15,1.5,90\n", PROBABILITY),
        )
        .unwrap();
        fs::write(
            root.join("geometry.csv"),
            "elevation,diameter,wall_thickness,in_out,scf,sn_curve,mx,my,fz\n\
             -20.0,6.5,70,outside,1.0,D,1,2,3\n\
             -10.0,6.0,60,outside,1.0,D,4,5,6\n",
        )
        .unwrap();
        fs::write(
            root.join("hotspots.csv"),
            "elevation,name,diameter,wall_thickness,in_out,scf,scf_orientation,gritblast,sn_curve,val_type,reported_utilization\n\
             -14.0,flange,6.2,65,outside,1.25,,1.0,D,rainflow,\n\
             -30.0,mudline,7.0,80,outside,1.1,,1.0,D,,0.001\n",
        )
        .unwrap();
        let output = root.join("out");
        Project {
            _dir: dir,
            root,
            output,
        }
    }

    fn config(&self, mode: &str, out_of_range: &str) -> String {
        let text = format!(
            "project:\n  cluster: {cluster}\n  output: {output:?}\n\
             analysis:\n  mode: {mode}\n  bins: 64\n  chunk_size: 2\n\
             utilization:\n  out_of_range: {out_of_range}\n\
             inputs:\n  geometry: {geometry:?}\n  hotspots: {hotspots:?}\n  simulation_root: {sims:?}\n  dlcs:\n\
             \x20   - id: DLC12\n      cases: {dlc12:?}\n\
             \x20   - id: DLC64\n      cases: {dlc64:?}\n",
            cluster = CLUSTER,
            output = self.output,
            geometry = self.root.join("geometry.csv"),
            hotspots = self.root.join("hotspots.csv"),
            sims = self.root.join("sims"),
            dlc12 = self.root.join("dlc12.csv"),
            dlc64 = self.root.join("dlc64.csv"),
        );
        let path = self.root.join(format!("{}_{}.yaml", mode, out_of_range));
        fs::write(&path, text).unwrap();
        path.to_str().unwrap().to_owned()
    }
}

#[test]
fn test_dem_pipeline_from_cases_to_lookup() {
    let project = Project::new();
    let config = project.config("DEM", "SKIP");

    let results = app_logic::run_cases(&config).unwrap();
    assert_eq!(results.len(), 2);
    let dlc12 = DlcResult::load(&results[0]).unwrap();
    assert_eq!(dlc12.mode, Mode::Dem);
    assert_eq!(dlc12.elevations, vec![-20.0, -10.0]);
    assert_eq!(dlc12.sectors.len(), 24);
    assert_eq!(dlc12.cases.len(), 2);

    let path = app_logic::run_total_dem(&config).unwrap();
    let (elevations, sectors, sums) = read_total_dem(&path).unwrap();
    assert_eq!(elevations, vec![-20.0, -10.0]);
    assert_eq!(sums.shape(), (2, sectors.len()));
    let dlc64 = DlcResult::load(&results[1]).unwrap();
    for s in 0..sectors.len() {
        assert_relative_eq!(
            sums[(1, s)],
            dlc12.combined[1][s] + dlc64.combined[1][s],
            max_relative = 1e-9
        );
        // Upper member carries twice the moment
        assert!(sums[(1, s)] > sums[(0, s)]);
    }

    let totals = app_logic::run_markov(&config).unwrap();
    assert_eq!(totals.len(), 2);
    let store = HistogramStore::new(project.output.join("dem"));
    let member = store.read_totals(CLUSTER, -10.0).unwrap();
    assert_eq!(member.len(), sectors.len());
    // Yearly counts: cases concatenated with count × hours × 6
    assert_eq!(member[0].len(), 3 * 64);

    let report = app_logic::run_utilization(&config).unwrap();
    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].elevation, -30.0);
    let row = report.worst_row().unwrap();
    assert_eq!(row.index, 0);
    assert_eq!(row.closest_member_elevation, -10.0);
    assert!(row.utilization > 0.0 && row.utilization.is_finite());
    assert!(project.output.join("utilization_JLO.json").exists());

    let table = app_logic::run_lookup(&config).unwrap();
    assert_eq!(table.rows.len(), 3);
    assert_eq!(table.elevation, -14.0);
    assert_eq!(table.rows[2].simulation_name, "JLO_64_001");
    assert_relative_eq!(table.scaling_factor, row.scaling_factor.unwrap(), max_relative = 1e-12);
    // The lookup table reproduces the utilization in the governing sector
    let yearly: f64 = table
        .rows
        .iter()
        .map(|r| r.probability * 6.0 * r.damage[row.closest_sector])
        .sum();
    assert_relative_eq!(yearly * 25.0 * 100.0, row.utilization, max_relative = 1e-9);
    assert!(project.output.join("lookup_JLO.csv").exists());
    assert!(project.output.join("lookup_JLO.json").exists());
}

#[test]
fn test_hotspot_outside_members_fails_by_default() {
    let project = Project::new();
    let config = project.config("DEM", "ERROR");
    app_logic::run_cases(&config).unwrap();
    app_logic::run_total_dem(&config).unwrap();
    app_logic::run_markov(&config).unwrap();
    assert!(app_logic::run_utilization(&config).is_err());
}

#[test]
fn test_damage_pipeline_lifetime() {
    let project = Project::new();
    let config = project.config("DAMAGE", "ERROR");
    let results = app_logic::run_cases(&config).unwrap();
    let tables: Vec<DlcResult> = results.iter().map(|p| DlcResult::load(p).unwrap()).collect();
    assert!(tables.iter().all(|t| t.mode == Mode::Damage));

    let report = app_logic::run_lifetime(&config).unwrap();
    assert_eq!(report.len(), 2);
    for (g, member) in report.iter().enumerate() {
        assert_eq!(member.dff, 3.0);
        for (s, yearly) in member.lifetimes.yearly_damage.iter().enumerate() {
            let expected: f64 = tables.iter().map(|t| t.combined[g][s] * 6.0 * 3.0).sum();
            assert_relative_eq!(*yearly, expected, max_relative = 1e-9);
        }
        assert!(member.lifetimes.governing.years() > 0.0);
    }
    // The harder loaded member governs
    assert!(report[1].lifetimes.governing.years() < report[0].lifetimes.governing.years());
    assert!(project.output.join("lifetime_JLO.json").exists());
}

#[test]
fn test_members_sharing_a_histogram_label_are_rejected() {
    let project = Project::new();
    fs::write(
        project.root.join("geometry.csv"),
        "elevation,diameter,wall_thickness,in_out,scf,sn_curve,mx,my,fz\n\
         -10.0,6.0,60,outside,1.0,D,1,2,3\n\
         -10.0004,6.0,60,inside,1.0,D,4,5,6\n",
    )
    .unwrap();
    let config = project.config("DEM", "ERROR");
    let err = app_logic::run_cases(&config).unwrap_err();
    assert!(format!("{:#}", err).contains("z-10.000"));
    assert!(!project.output.join("dem").exists());
}

#[test]
fn test_lifetime_rejects_dlcs_on_different_members() {
    let project = Project::new();
    let config = project.config("DAMAGE", "ERROR");
    let results = app_logic::run_cases(&config).unwrap();
    let mut dlc64 = DlcResult::load(&results[1]).unwrap();
    dlc64.elevations[0] = -21.0;
    dlc64.save(&project.output).unwrap();
    let err = app_logic::run_lifetime(&config).unwrap_err();
    assert!(err.to_string().contains("DLC64"));
}
