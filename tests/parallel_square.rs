//! Two triangles on two thread-simulated processes.

use mesh_strata::prelude::*;

fn square(comm: LocalComm) -> Result<Mesh<LocalComm>, MeshStrataError> {
    let cfg = MeshConfig {
        chunking: ChunkConfig {
            max_num_elems_p_chunk: 4,
            ..ChunkConfig::default()
        },
        partition: PartitionerConfig {
            mode: PartitionMode::Slices,
            ..PartitionerConfig::default()
        },
        ..MeshConfig::default()
    };
    let mut mesh = Mesh::with_comm(MeshKind::Triangle, comm, cfg)?;
    let root = mesh.comm().rank() == 0;
    let pts = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]];
    mesh.begin_store_vertices(if root { 4 } else { 0 })?;
    if root {
        for (g, p) in pts.into_iter().enumerate() {
            mesh.store_vertex(Some(g as i64), p)?;
        }
    }
    mesh.end_store_vertices()?;
    mesh.begin_store_elems(if root { 2 } else { 0 })?;
    if root {
        mesh.add_lvl0_cell(&[VertexIdx(0), VertexIdx(1), VertexIdx(2)], &[])?;
        mesh.add_lvl0_cell(&[VertexIdx(1), VertexIdx(3), VertexIdx(2)], &[])?;
    }
    mesh.end_store_elems()?;
    Ok(mesh)
}

#[test]
fn ghost_only_entities_are_front_and_shared_ones_border() {
    let checked = LocalComm::run(2, |comm| {
        let mesh = square(comm).unwrap();
        let owned = mesh.leaf_elems().next().unwrap();
        let ghost = mesh
            .leaf_elems_with_ghosts()
            .find(|&e| mesh.elem(e).unwrap().is_ghost())
            .unwrap();
        let owned_verts = mesh.elem(owned).unwrap().vertices().to_vec();
        let ghost_verts = mesh.elem(ghost).unwrap().vertices().to_vec();

        let mut seen = 0;
        for (f, v) in ghost_verts.iter().enumerate() {
            let flags = mesh
                .entity_flags(EntityId::build(EntityType::Vertex, f, ghost))
                .unwrap();
            if owned_verts.contains(v) {
                // the owned triangle touches a ghost, so it is a border element
                assert!(flags.contains(ElemFlags::BORDER), "{v:?}: {flags:?}");
                assert!(!flags.contains(ElemFlags::FRONT));
            } else {
                assert!(flags.contains(ElemFlags::FRONT), "{v:?}: {flags:?}");
                assert!(!flags.contains(ElemFlags::INTERIOR));
            }
            seen += 1;
        }
        assert!(mesh.elem(ghost).unwrap().my_proc != mesh.comm().rank() as u32);
        seen
    });
    assert_eq!(checked, vec![3, 3]);
}

#[test]
fn refining_one_side_updates_the_other() {
    let out = LocalComm::run(2, |comm| {
        let mut mesh = square(comm).unwrap();
        let rank = mesh.comm().rank();
        mesh.begin_refine_elems().unwrap();
        if rank == 0 {
            let owned = mesh.leaf_elems().next().unwrap();
            mesh.refine_elem(owned).unwrap();
        }
        mesh.end_refine_elems().unwrap();
        let c = *mesh.counts(1).unwrap();
        (rank, c.num_glb_elems, c.num_glb_vertices, c.num_ghost_elems)
    });
    for (rank, glb_elems, glb_vertices, ghosts) in out {
        assert_eq!(glb_elems, 6);
        assert_eq!(glb_vertices, 7);
        // rank 1 now holds the refined ghost and its children
        let expected = if rank == 0 { 1 } else { 5 };
        assert_eq!(ghosts, expected, "rank {rank}");
    }
}

#[test]
fn ghosts_cannot_be_marked() {
    let out = LocalComm::run(2, |comm| {
        let mut mesh = square(comm).unwrap();
        let ghost = mesh
            .leaf_elems_with_ghosts()
            .find(|&e| mesh.elem(e).unwrap().is_ghost())
            .unwrap();
        mesh.begin_refine_elems().unwrap();
        let marked = mesh.refine_elem(ghost);
        mesh.end_refine_elems().unwrap();
        matches!(marked, Err(MeshStrataError::InvalidArgument(_)))
    });
    assert_eq!(out, vec![true, true]);
}
