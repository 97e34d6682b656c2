//! A refined mesh written by 4 simulated processes and read back on 4, 2
//! and 1 process.

use std::path::{Path, PathBuf};

use mesh_strata::prelude::*;
use serial_test::serial;

const CELLS: usize = 12;

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mesh-strata-it-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn config() -> MeshConfig {
    MeshConfig {
        chunking: ChunkConfig {
            max_num_elems_p_chunk: 8,
            ..ChunkConfig::default()
        },
        throttle_factor: 2,
        ..MeshConfig::default()
    }
}

/// Strip of `2 * CELLS` triangles with one weight, every owned leaf refined once.
fn refined_strip(comm: LocalComm) -> Result<Mesh<LocalComm>, MeshStrataError> {
    let mut mesh = Mesh::with_comm(MeshKind::Triangle, comm, config())?;
    mesh.set_num_weights(1)?;
    let root = mesh.comm().rank() == 0;
    mesh.begin_store_vertices(if root { 2 * (CELLS + 1) } else { 0 })?;
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
            mesh.add_lvl0_cell(&[v(a), v(c), v(b)], &[i as i32 + 1])?;
            mesh.add_lvl0_cell(&[v(c), v(d), v(b)], &[i as i32 + 1])?;
        }
    }
    mesh.end_store_elems()?;

    mesh.begin_refine_elems()?;
    let owned: Vec<ElemIdx> = mesh.leaf_elems().collect();
    for e in owned {
        mesh.refine_elem(e)?;
    }
    mesh.end_refine_elems()?;
    Ok(mesh)
}

/// Owned global ids of the last level and the counters of every level.
fn summary<C: Communicator>(mesh: &Mesh<C>) -> (Vec<i64>, Vec<(u64, u64, u64)>) {
    let mut owned: Vec<i64> = (0..mesh.num_loc_elems())
        .map(|e| mesh.elem(ElemIdx(e as u32)).unwrap())
        .filter(|e| !e.is_ghost())
        .map(|e| e.glb_idx)
        .collect();
    owned.sort_unstable();
    let counts = (0..mesh.num_levels())
        .map(|l| {
            let c = mesh.counts(l).unwrap();
            (c.num_glb_elems, c.num_glb_leaf_elems, c.num_glb_vertices)
        })
        .collect();
    (owned, counts)
}

fn read_on(nprocs: usize, dir: &Path) -> Vec<(Vec<i64>, Vec<(u64, u64, u64)>)> {
    LocalComm::run(nprocs, |comm| {
        let mut mesh = Mesh::with_comm(MeshKind::Triangle, comm, config()).unwrap();
        mesh.read_mesh(&DirStore::open(dir).unwrap()).unwrap();
        assert_eq!(mesh.num_weights(), 1);
        for leaf in mesh.leaf_elems() {
            assert!(mesh.elem_weights(leaf).unwrap()[0] >= 1);
        }
        summary(&mesh)
    })
}

fn assert_same_mesh(
    written: &[(Vec<i64>, Vec<(u64, u64, u64)>)],
    read: &[(Vec<i64>, Vec<(u64, u64, u64)>)],
) {
    let expected = &written[0].1;
    for (_, counts) in read {
        assert_eq!(counts, expected);
    }
    let mut all: Vec<i64> = read.iter().flat_map(|(o, _)| o.iter().copied()).collect();
    all.sort_unstable();
    let total = expected.last().unwrap().0 as i64;
    assert_eq!(all, (0..total).collect::<Vec<_>>());
}

#[test]
#[serial]
fn chunked_mesh_reads_back_on_any_group() {
    let dir = scratch("chunked");
    let written = LocalComm::run(4, |comm| {
        let mesh = refined_strip(comm).unwrap();
        let store = DirStore::create(&dir).unwrap();
        mesh.write_mesh(&store).unwrap();
        summary(&mesh)
    });
    assert_eq!(written[0].1[0].0, 2 * CELLS as u64);
    assert_eq!(written[0].1[1].0, 10 * CELLS as u64);

    let store = DirStore::open(&dir).unwrap();
    assert_eq!(store.read_attribute("__is_chunked__").unwrap(), vec![1]);
    assert_eq!(store.read_attribute("__num_leaf_levels__").unwrap(), vec![2]);
    assert_eq!(store.dataset_len("elements").unwrap(), 10 * CELLS as u64);

    assert_same_mesh(&written, &read_on(4, &dir));
    assert_same_mesh(&written, &read_on(2, &dir));

    let mut serial = Mesh::with_config(MeshKind::Triangle, config()).unwrap();
    serial.read_mesh(&store).unwrap();
    assert_eq!(serial.num_loc_elems(), 10 * CELLS);
    assert_eq!(serial.counts(1).unwrap().num_ghost_elems, 0);
    assert_eq!(serial.leaf_elems().count(), 8 * CELLS);
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
#[serial]
fn unchunked_mesh_needs_a_single_reader() {
    let dir = scratch("unchunked");
    let mut mesh = Mesh::new(MeshKind::Triangle);
    mesh.begin_store_vertices(3).unwrap();
    for p in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
        mesh.store_vertex(None, p).unwrap();
    }
    mesh.end_store_vertices().unwrap();
    mesh.begin_store_elems(1).unwrap();
    mesh.add_lvl0_cell(&[VertexIdx(0), VertexIdx(1), VertexIdx(2)], &[]).unwrap();
    mesh.end_store_elems().unwrap();
    mesh.write_mesh(&DirStore::create(&dir).unwrap()).unwrap();

    let refused = LocalComm::run(2, |comm| {
        let mut mesh = Mesh::with_comm(MeshKind::Triangle, comm, MeshConfig::default()).unwrap();
        matches!(
            mesh.read_mesh(&DirStore::open(&dir).unwrap()),
            Err(MeshStrataError::Unsupported(_))
        )
    });
    assert_eq!(refused, vec![true, true]);
    std::fs::remove_dir_all(dir).unwrap();
}
