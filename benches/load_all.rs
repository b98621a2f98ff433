//! Plugin loading benchmarks
//!
//! Run with: cargo bench --bench load_all

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use expotion::app::{Application, Blueprint, Request, Response};
use expotion::config::AppConfig;
use expotion::plugins::{Plugin, PluginLoader, StaticSource};

struct Section {
    name: String,
}

impl Plugin for Section {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn init_app(&mut self, app: &Application) -> anyhow::Result<()> {
        let body = self.name.clone();
        app.register_blueprint(
            Blueprint::new(self.name.clone())
                .url_prefix(format!("/{}", self.name))
                .get("/", "index", move |_| Response::text(body.clone()))
                .get("/items/<id>", "item", |req| {
                    Response::text(req.param("id").unwrap_or_default().to_string())
                }),
        )?;
        Ok(())
    }
}

fn source_of(n: usize) -> StaticSource {
    let mut source = StaticSource::new();
    for i in 0..n {
        let name = format!("section-{}", i);
        source.add(name.clone(), move || {
            Ok(Box::new(Section { name: name.clone() }))
        });
    }
    source
}

fn benchmark_load_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_all");

    for n in [10usize, 100, 500].iter() {
        group.throughput(Throughput::Elements(*n as u64));
        group.bench_with_input(format!("{}_plugins", n), n, |b, &n| {
            b.iter(|| {
                let app = Application::new(AppConfig::default());
                let mut loader = PluginLoader::without_sources(app).with_source(source_of(n));
                black_box(loader.load_all().unwrap());
            });
        });
    }

    group.finish();
}

fn benchmark_dispatch(c: &mut Criterion) {
    let app = Application::new(AppConfig::default());
    let mut loader = PluginLoader::without_sources(app.clone()).with_source(source_of(100));
    loader.load_all().unwrap();

    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    group.bench_function("last_blueprint_param_route", |b| {
        let request = Request::get("/section-99/items/42");
        b.iter(|| black_box(app.dispatch(black_box(&request))));
    });

    group.bench_function("not_found", |b| {
        let request = Request::get("/missing");
        b.iter(|| black_box(app.dispatch(black_box(&request))));
    });

    group.finish();
}

criterion_group!(benches, benchmark_load_all, benchmark_dispatch);
criterion_main!(benches);
