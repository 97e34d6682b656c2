//! Level-0 distribution of a 100-triangle strip over 4 simulated processes.

use mesh_strata::prelude::*;

const CELLS: usize = 50;

fn strip(comm: LocalComm, mode: PartitionMode) -> Result<Mesh<LocalComm>, MeshStrataError> {
    let cfg = MeshConfig {
        chunking: ChunkConfig {
            max_num_elems_p_chunk: 16,
            ..ChunkConfig::default()
        },
        partition: PartitionerConfig {
            mode,
            ..PartitionerConfig::default()
        },
        ..MeshConfig::default()
    };
    let mut mesh = Mesh::with_comm(MeshKind::Triangle, comm, cfg)?;
    let root = mesh.comm().rank() == 0;
    let nv = 2 * (CELLS + 1);
    mesh.begin_store_vertices(if root { nv } else { 0 })?;
    if root {
        for i in 0..=CELLS {
            mesh.store_vertex(Some(2 * i as i64), [i as f64, 0.0, 0.0])?;
            mesh.store_vertex(Some(2 * i as i64 + 1), [i as f64, 1.0, 0.0])?;
        }
    }
    mesh.end_store_vertices()?;
    mesh.begin_store_elems(if root { 2 * CELLS } else { 0 })?;
    if root {
        let v = |i: usize| VertexIdx(i as u32);
        for i in 0..CELLS {
            let (a, b, c, d) = (2 * i, 2 * i + 1, 2 * i + 2, 2 * i + 3);
            mesh.add_lvl0_cell(&[v(a), v(c), v(b)], &[])?;
            mesh.add_lvl0_cell(&[v(c), v(d), v(b)], &[])?;
        }
    }
    mesh.end_store_elems()?;
    Ok(mesh)
}

/// Owned global ids and owned chunk sizes of every rank.
fn distribute(mode: PartitionMode) -> Vec<(Vec<i64>, u64)> {
    LocalComm::run(4, |comm| {
        let mesh = strip(comm, mode).unwrap();
        let rank = mesh.comm().rank();
        let mut owned: Vec<i64> = mesh
            .leaf_elems()
            .map(|e| mesh.elem(e).unwrap().glb_idx)
            .collect();
        owned.sort_unstable();
        let chunks = mesh.chunks().unwrap();
        let in_chunks: u64 = chunks
            .level_chunks(0)
            .iter()
            .filter(|c| chunks.owner_of_elem(c.elem) == Some(rank))
            .map(|c| c.num_elems as u64)
            .sum();
        assert_eq!(mesh.counts(0).unwrap().num_glb_elems, 100);
        (owned, in_chunks)
    })
}

fn assert_exact_cover(parts: &[(Vec<i64>, u64)]) {
    let total: u64 = parts.iter().map(|(_, n)| n).sum();
    assert_eq!(total, 100);
    let mut all: Vec<i64> = parts.iter().flat_map(|(o, _)| o.iter().copied()).collect();
    all.sort_unstable();
    assert_eq!(all, (0..100).collect::<Vec<_>>(), "an element is owned twice or not at all");
    for (owned, in_chunks) in parts {
        assert_eq!(owned.len() as u64, *in_chunks);
    }
}

#[test]
fn morton_distribution_covers_every_element_once() {
    assert_exact_cover(&distribute(PartitionMode::Morton));
}

#[test]
fn slice_distribution_covers_every_element_once() {
    let parts = distribute(PartitionMode::Slices);
    assert_exact_cover(&parts);
    assert!(parts.iter().filter(|(o, _)| !o.is_empty()).count() > 1);
}

#[test]
fn metis_mode_falls_back_when_unavailable() {
    // without the metis feature the octants are ordered along the curve
    assert_exact_cover(&distribute(PartitionMode::Metis));
}
