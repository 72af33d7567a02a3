//! Type predicates and utilities shared by the constructors, the passes,
//! and the emitter.

use crate::ir::arena::{IrArena, NodeList};
use crate::ir::node::{AddressSpace, Node, NodeKind};

/// Strip the uniformity qualifier, if present.
pub fn without_qualifier(arena: &IrArena, ty: Node) -> Node {
    match *arena.kind(ty) {
        NodeKind::Qualified { ty, .. } => ty,
        _ => ty,
    }
}

/// Whether a qualified type is uniform. Unqualified types answer `false`.
pub fn is_uniform(arena: &IrArena, ty: Node) -> bool {
    matches!(*arena.kind(ty), NodeKind::Qualified { uniform: true, .. })
}

/// A value type all invocations can load coherently. Loads through uniform
/// pointers into these spaces stay uniform; everything else is varying.
pub fn is_addr_space_uniform(space: AddressSpace) -> bool {
    matches!(space, AddressSpace::External | AddressSpace::ProgramCode)
}

pub fn is_numeric(arena: &IrArena, ty: Node) -> bool {
    matches!(
        arena.kind(without_qualifier(arena, ty)),
        NodeKind::Int { .. } | NodeKind::Float
    )
}

pub fn is_logical(arena: &IrArena, ty: Node) -> bool {
    matches!(arena.kind(without_qualifier(arena, ty)), NodeKind::Bool)
}

/// The qualified type of a value node. Panics if the node is untyped; that
/// means the typing pass has not run yet.
pub fn value_type(arena: &IrArena, value: Node) -> Node {
    arena
        .node(value)
        .ty
        .as_value()
        .unwrap_or_else(|| panic!("value has no type: {}", arena.kind(value).tag_name()))
}

/// The unqualified type of a value node.
pub fn value_type_unqualified(arena: &IrArena, value: Node) -> Node {
    let ty = value_type(arena, value);
    without_qualifier(arena, ty)
}

/// Whether every operand in the list has a uniform type.
pub fn all_uniform(arena: &IrArena, values: &[Node]) -> bool {
    values
        .iter()
        .all(|&v| is_uniform(arena, value_type(arena, v)))
}

/// Structural equality of types is handle equality, but a qualified and an
/// unqualified view of the same type should still match in operand checks.
pub fn same_unqualified(arena: &IrArena, a: Node, b: Node) -> bool {
    without_qualifier(arena, a) == without_qualifier(arena, b)
}

/// The pointee of a pointer type, or `None` if it is not a pointer.
pub fn pointee(arena: &IrArena, ty: Node) -> Option<(AddressSpace, Node)> {
    match *arena.kind(without_qualifier(arena, ty)) {
        NodeKind::PtrType { space, pointee } => Some((space, pointee)),
        _ => None,
    }
}

/// Walk a pointee type through a `lea` index chain: records by literal
/// member index, arrays by any integer index.
pub fn walk_lea_chain(arena: &IrArena, mut ty: Node, indices: &[Node]) -> Option<Node> {
    for &idx in indices {
        ty = match *arena.kind(without_qualifier(arena, ty)) {
            NodeKind::Record { members } => {
                let member = match *arena.kind(idx) {
                    NodeKind::IntLit { value, .. } => value as usize,
                    _ => return None,
                };
                *arena.nodes(members).get(member)?
            }
            NodeKind::ArrType { elem, .. } => elem,
            _ => return None,
        };
    }
    Some(ty)
}

/// The parameter types a callee expects and the (qualified) types it
/// returns, or `None` if the callee is not function-typed.
pub fn callee_signature(arena: &IrArena, callee_ty: Node) -> Option<(NodeList, NodeList)> {
    match *arena.kind(without_qualifier(arena, callee_ty)) {
        NodeKind::FnType {
            params, returns, ..
        } => Some((params, returns)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::arena::ArenaConfig;
    use crate::ir::build;

    #[test]
    fn test_without_qualifier_strips_one_layer() {
        let mut a = IrArena::new(ArenaConfig::checked());
        let i32_t = build::int32_type(&mut a);
        let q = build::qualified(&mut a, true, i32_t);
        assert_eq!(without_qualifier(&a, q), i32_t);
        assert_eq!(without_qualifier(&a, i32_t), i32_t);
    }

    #[test]
    fn test_walk_lea_chain_through_record_and_array() {
        let mut a = IrArena::new(ArenaConfig::checked());
        let i32_t = build::int32_type(&mut a);
        let bool_t = build::bool_type(&mut a);
        let four = build::int_literal(&mut a, crate::ir::node::IntWidth::I32, 4);
        let arr = build::arr_type(&mut a, bool_t, Some(four));
        let rec = build::record_type(&mut a, &[i32_t, arr]);

        let one = build::int_literal(&mut a, crate::ir::node::IntWidth::I32, 1);
        let zero = build::int_literal(&mut a, crate::ir::node::IntWidth::I32, 0);
        let walked = walk_lea_chain(&a, rec, &[one, zero]).unwrap();
        assert_eq!(walked, bool_t);
    }
}
