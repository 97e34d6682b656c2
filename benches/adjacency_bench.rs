use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use mesh_strata::prelude::*;

/// `n` x `n` grid of triangles with slightly jittered interior vertices.
fn grid(n: usize, seed: u64) -> Mesh {
    let mut rng = SmallRng::seed_from_u64(seed);
    let side = n + 1;
    let mut mesh = Mesh::new(MeshKind::Triangle);
    mesh.begin_store_vertices(side * side).unwrap();
    for j in 0..side {
        for i in 0..side {
            let interior = i > 0 && j > 0 && i < n && j < n;
            let jitter = if interior { rng.gen_range(-0.2..0.2) } else { 0.0 };
            mesh.store_vertex(None, [i as f64 + jitter, j as f64 - jitter, 0.0])
                .unwrap();
        }
    }
    mesh.end_store_vertices().unwrap();
    let at = |i: usize, j: usize| VertexIdx((j * side + i) as u32);
    mesh.begin_store_elems(2 * n * n).unwrap();
    for j in 0..n {
        for i in 0..n {
            mesh.add_lvl0_cell(&[at(i, j), at(i + 1, j), at(i, j + 1)], &[]).unwrap();
            mesh.add_lvl0_cell(&[at(i + 1, j), at(i + 1, j + 1), at(i, j + 1)], &[])
                .unwrap();
        }
    }
    mesh.end_store_elems().unwrap();
    mesh
}

fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_level0");
    for &n in &[16usize, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| grid(n, 7))
        });
    }
    group.finish();
}

fn bench_refine(c: &mut Criterion) {
    let mut group = c.benchmark_group("refine_all_leaves");
    for &n in &[16usize, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || grid(n, 11),
                |mut mesh| {
                    mesh.begin_refine_elems().unwrap();
                    let leaves: Vec<ElemIdx> = mesh.leaf_elems().collect();
                    for e in leaves {
                        mesh.refine_elem(e).unwrap();
                    }
                    mesh.end_refine_elems().unwrap();
                    mesh
                },
                criterion::BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

fn bench_edge_iteration(c: &mut Criterion) {
    let mesh = grid(64, 3);
    c.bench_function("iterate_edges_64", |b| {
        b.iter(|| mesh.entities(1).unwrap().count())
    });
}

criterion_group!(benches, bench_store, bench_refine, bench_edge_iteration);
criterion_main!(benches);
