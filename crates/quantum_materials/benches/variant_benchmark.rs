//! Benchmark for variant churn across layer passes.
//!
//! Run with: cargo bench --package quantum_materials --bench variant_benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quantum_materials::{BaseMaterial, MaterialVariantRegistry, RenderQueueTable, VariantRequest};
use quantum_shared::{BaseMaterialId, Mat4};

fn clips(_layer: usize) -> Option<Mat4> {
    Some(Mat4::IDENTITY)
}

fn create_materials() -> Vec<BaseMaterial> {
    (0..256u32)
        .map(|i| BaseMaterial::object(BaseMaterialId::new(i), format!("Material_{i}"), 2000 + (i % 500) as i32))
        .collect()
}

fn benchmark_pass_reuse(c: &mut Criterion) {
    let materials = create_materials();
    let mut registry = MaterialVariantRegistry::new(RenderQueueTable::default_for(9), 9).unwrap();

    c.bench_function("pass_256_materials_3_layers", |b| {
        b.iter(|| {
            registry.begin_pass();
            for material in &materials {
                for layer in [0, 1, 2] {
                    black_box(registry.get_or_create(material, VariantRequest::on_layer(layer), &clips).unwrap());
                }
            }
            black_box(registry.end_pass())
        });
    });
}

fn benchmark_pass_shift(c: &mut Criterion) {
    let materials = create_materials();
    let mut registry = MaterialVariantRegistry::new(RenderQueueTable::default_for(9), 9).unwrap();

    c.bench_function("pass_256_materials_shifting_layers", |b| {
        let mut shift = 0usize;
        b.iter(|| {
            shift = (shift + 1) % 6;
            registry.begin_pass();
            for material in &materials {
                for layer in [shift + 1, shift + 2] {
                    black_box(registry.get_or_create(material, VariantRequest::on_layer(layer), &clips).unwrap());
                }
            }
            black_box(registry.end_pass())
        });
    });
}

criterion_group!(benches, benchmark_pass_reuse, benchmark_pass_shift);
criterion_main!(benches);
