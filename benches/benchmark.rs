use criterion::{black_box, criterion_group, criterion_main, Criterion};
use foundation_fatigue::config::DemSettings;
use foundation_fatigue::engine::{CaseEngine, MemberPlan, Mode};
use foundation_fatigue::geometry::{load_geometry_table, uniform_sectors, AngleFrame};
use foundation_fatigue::rainflow::{rainflow, RainflowCounter};
use foundation_fatigue::timeseries::ChannelTimeSeries;
use rand::distributions::{Distribution, Uniform};

fn random_series(len: usize) -> Vec<f64> {
    let step = Uniform::new(-5.0e7, 5.0e7);
    let mut rng = rand::thread_rng();
    step.sample_iter(&mut rng).take(len).collect()
}

fn bench_rainflow(c: &mut Criterion) {
    let choices = random_series(100_000);
    c.bench_function("rainflow half cycles, 100k samples", |b| {
        b.iter(|| {
            let (_means, _ranges) = rainflow(black_box(&choices));
        });
    });
    let counter = RainflowCounter::default();
    c.bench_function("binned rainflow histogram, 100k samples", |b| {
        b.iter(|| counter.count(black_box(&choices)));
    });
}

fn bench_case(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let geometry = dir.path().join("geometry.csv");
    std::fs::write(
        &geometry,
        "elevation,diameter,wall_thickness,in_out,scf,sn_curve,mx,my,fz\n\
         -20.0,6.5,70,outside,1.1,D,1,2,3\n\
         -10.0,6.0,60,outside,1.1,D,4,5,6\n",
    )
    .unwrap();
    let sectors = uniform_sectors(15.0).unwrap();
    let plans: Vec<MemberPlan> = load_geometry_table(&geometry)
        .unwrap()
        .into_iter()
        .map(|s| MemberPlan::new(s, &sectors, AngleFrame::Turbine).unwrap())
        .collect();
    let channels: Vec<Vec<f64>> = (0..6).map(|_| random_series(6000)).collect();
    let series = ChannelTimeSeries::from_channels(&channels).unwrap();

    for mode in [Mode::Dem, Mode::Damage] {
        let engine = CaseEngine::new(mode, RainflowCounter::default(), DemSettings::default(), false);
        c.bench_function(&format!("{:?} case, 2 members x 24 sectors", mode), |b| {
            b.iter(|| engine.process(0, black_box(&series), &plans).unwrap());
        });
    }
}

criterion_group!(benches, bench_rainflow, bench_case);
criterion_main!(benches);
