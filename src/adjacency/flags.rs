//! Classification of sub-entities from the flags of their incident elements.

use crate::mesh_error::MeshStrataError;
use crate::topology::ElemFlags;

/// Classify an entity from the OR of its incident elements' flags.
///
/// * any interior element → interior, regardless of border or ghost bits
/// * ghost elements only → front
/// * border elements, with or without ghosts → border
///
/// The geometric-boundary bit is carried through unchanged. An entity with
/// no ownership bit at all cannot be classified.
pub fn classify(incident: ElemFlags) -> Result<ElemFlags, MeshStrataError> {
    let own = incident.ownership();
    let mut out = if own.contains(ElemFlags::INTERIOR) {
        ElemFlags::INTERIOR
    } else if own == ElemFlags::GHOST {
        ElemFlags::FRONT
    } else if own.contains(ElemFlags::BORDER) {
        ElemFlags::BORDER
    } else {
        return Err(MeshStrataError::InconsistentTopology(format!(
            "cannot classify entity with incident flags {incident:?}"
        )));
    };
    if incident.contains(ElemFlags::BOUNDARY) {
        out.insert(ElemFlags::BOUNDARY);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_wins_over_border() {
        let f = classify(ElemFlags::INTERIOR | ElemFlags::BORDER).unwrap();
        assert_eq!(f, ElemFlags::INTERIOR);
        let f = classify(ElemFlags::INTERIOR | ElemFlags::GHOST).unwrap();
        assert_eq!(f, ElemFlags::INTERIOR);
    }

    #[test]
    fn ghost_only_is_front() {
        assert_eq!(classify(ElemFlags::GHOST).unwrap(), ElemFlags::FRONT);
    }

    #[test]
    fn ghost_and_border_is_border() {
        let f = classify(ElemFlags::GHOST | ElemFlags::BORDER | ElemFlags::BOUNDARY).unwrap();
        assert_eq!(f, ElemFlags::BORDER | ElemFlags::BOUNDARY);
    }

    #[test]
    fn unflagged_is_inconsistent() {
        assert!(matches!(
            classify(ElemFlags::BOUNDARY),
            Err(MeshStrataError::InconsistentTopology(_))
        ));
    }
}
