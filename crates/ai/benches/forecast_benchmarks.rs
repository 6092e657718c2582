use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use chrono::{Duration, NaiveDate};
use envwatch_ai::features::{self, FeatureSpec};
use envwatch_ai::{AiJob, BoostingParams, ForecastTrainingJob, ModelKey, RawFrame, TrainingConfig, WeatherFeature};

fn history(days: usize) -> RawFrame {
    let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
    let mut frame = RawFrame::new(["RR", "TN", "TX", "TM", "TAMPLI"]);
    for i in 0..days {
        let season = (i as f64 / 365.0 * std::f64::consts::TAU).sin();
        let tx = 17.0 + 11.0 * season + (i % 5) as f64 * 0.3;
        let tn = 7.0 + 8.0 * season;
        frame
            .push_row(
                start + Duration::days(i as i64),
                vec![
                    Some(if i % 4 == 0 { "3,2".into() } else { "0".into() }),
                    Some(format!("{tn:.1}")),
                    Some(format!("{tx:.1}")),
                    Some(format!("{:.1}", (tx + tn) / 2.0)),
                    Some(format!("{:.1}", tx - tn)),
                ],
            )
            .unwrap();
    }
    frame
}

fn bench_feature_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("feature_construction");
    let spec = FeatureSpec::new("TX");

    for days in [30usize, 365, 1095] {
        let raw = history(days);
        group.bench_with_input(BenchmarkId::new("build_features", days), &raw, |b, raw| {
            b.iter(|| black_box(features::build_features(raw, &spec).unwrap()));
        });
    }

    group.finish();
}

fn bench_training(c: &mut Criterion) {
    let mut group = c.benchmark_group("forecast_training");
    group.sample_size(10);
    let raw = history(365);

    for n_estimators in [10usize, 100] {
        let config = TrainingConfig {
            boosting: BoostingParams {
                n_estimators,
                ..BoostingParams::default()
            },
            ..TrainingConfig::default()
        };
        group.bench_with_input(BenchmarkId::new("one_year", n_estimators), &config, |b, config| {
            b.iter(|| {
                let key = ModelKey::for_feature(WeatherFeature::Tx, 1).unwrap();
                let job = ForecastTrainingJob::new(key, raw.clone()).with_config(config.clone());
                black_box(job.run().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_prediction(c: &mut Criterion) {
    let key = ModelKey::for_feature(WeatherFeature::Tx, 1).unwrap();
    let trained = ForecastTrainingJob::new(key, history(365)).run().unwrap();
    let recent = history(30);

    c.bench_function("forecast_predict_30_days", |b| {
        b.iter(|| black_box(trained.model.predict(&recent).unwrap()));
    });
}

criterion_group!(benches, bench_feature_construction, bench_training, bench_prediction);
criterion_main!(benches);
