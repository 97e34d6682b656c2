//! Topological building blocks: reference elements, identities, records and
//! index maps.

pub mod element;
pub mod entity_id;
pub mod index_map;
pub mod ref_element;

pub use element::{ElemFlags, ElemIdx, Element, Neighbor, Vertex, VertexIdx, MAX_VERTICES};
pub use entity_id::EntityId;
pub use index_map::IndexMap;
pub use ref_element::{EntityType, MeshKind, RefElement};
