use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rvplan::{
    transform_tests, LoweringOptions, MemorySpec, Step, StepKind, TemplateCatalog, TestEnv,
    TestScenario, Xlen,
};

fn batch(tests: usize) -> Vec<TestScenario> {
    (0..tests)
        .map(|t| {
            let mut steps = vec![
                Step::new("mem", StepKind::Memory(MemorySpec::default())),
                Step::new("fn", StepKind::CodePage(MemorySpec::default())).with_code(vec![
                    Step::new("x", StepKind::Arithmetic { op: None }),
                ]),
            ];
            for n in 0..24 {
                let id = format!("v{}", n);
                let step = match n % 4 {
                    0 => Step::new(&id, StepKind::Load { offset: 8 * n, access_size: Some(8), op: None })
                        .with_inputs(["mem"]),
                    1 => Step::new(&id, StepKind::Arithmetic { op: None }),
                    2 => Step::new(&id, StepKind::Arithmetic { op: Some("add".into()) })
                        .with_inputs([format!("v{}", n - 2).as_str(), format!("v{}", n - 1).as_str()]),
                    _ => Step::new(&id, StepKind::Call).with_inputs(["fn"]),
                };
                steps.push(step);
            }
            TestScenario::new(format!("test_{}", t), steps)
        })
        .collect()
}

fn lowering_benchmark(c: &mut Criterion) {
    let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
    let scenarios = batch(16);

    c.bench_function("lower 16-test batch", |b| {
        b.iter(|| {
            transform_tests(
                black_box(&scenarios),
                TestEnv::default(),
                &catalog,
                LoweringOptions::with_seed(1),
            )
            .unwrap()
        })
    });
}

criterion_group!(benches, lowering_benchmark);
criterion_main!(benches);
