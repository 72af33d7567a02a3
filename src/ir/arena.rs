//! Arena storage and interning.
//!
//! An [`IrArena`] owns every node, string, and list built during one phase
//! of the pipeline. Four intern tables guarantee structural sharing: equal
//! contents always yield the same handle, so handle comparison is
//! structural comparison. Declarations and the root are the exception:
//! they are nominal and get a fresh slot on every allocation, with
//! arena-mediated mutation for two-phase construction.
//!
//! Dropping the arena frees everything it owns in one shot.

use fnv::FnvHashMap;

use crate::ir::node::{Node, NodeData, NodeKind};

/// Handle to an interned list of nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeList(pub(crate) u32);

/// Handle to an interned string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrId(pub(crate) u32);

/// Handle to an interned list of strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrList(pub(crate) u32);

/// Arena construction options.
#[derive(Clone, Copy, Debug)]
pub struct ArenaConfig {
    /// When set, smart constructors infer and check types. Arenas holding
    /// parser output run with this off, since placeholders cannot be typed.
    pub check_types: bool,
}

impl ArenaConfig {
    pub fn unchecked() -> Self {
        ArenaConfig { check_types: false }
    }

    pub fn checked() -> Self {
        ArenaConfig { check_types: true }
    }
}

pub struct IrArena {
    pub config: ArenaConfig,

    nodes: Vec<NodeData>,
    node_lists: Vec<Vec<Node>>,
    strings: Vec<String>,
    str_lists: Vec<Vec<StrId>>,

    node_set: FnvHashMap<NodeData, Node>,
    node_list_set: FnvHashMap<Vec<Node>, NodeList>,
    string_set: FnvHashMap<String, StrId>,
    str_list_set: FnvHashMap<Vec<StrId>, StrList>,

    next_free_id: u32,
}

impl IrArena {
    pub fn new(config: ArenaConfig) -> Self {
        IrArena {
            config,
            nodes: Vec::with_capacity(256),
            node_lists: Vec::new(),
            strings: Vec::new(),
            str_lists: Vec::new(),
            node_set: FnvHashMap::default(),
            node_list_set: FnvHashMap::default(),
            string_set: FnvHashMap::default(),
            str_list_set: FnvHashMap::default(),
            next_free_id: 0,
        }
    }

    /// Monotone counter for variable IDs; unique within this arena.
    pub fn fresh_id(&mut self) -> u32 {
        let id = self.next_free_id;
        self.next_free_id += 1;
        id
    }

    /// Make sure future fresh IDs do not collide with an ID imported from
    /// another arena.
    pub fn reserve_id(&mut self, id: u32) {
        self.next_free_id = self.next_free_id.max(id + 1);
    }

    // ── Nodes ──

    /// Intern a structural node. Equal payloads share one handle.
    pub(crate) fn intern_node(&mut self, data: NodeData) -> Node {
        debug_assert!(
            !data.kind.is_declaration() && !matches!(data.kind, NodeKind::Root { .. }),
            "declarations and roots are nominal, use alloc_node"
        );
        if let Some(&found) = self.node_set.get(&data) {
            return found;
        }
        let handle = Node(self.nodes.len() as u32);
        self.nodes.push(data);
        self.node_set.insert(data, handle);
        handle
    }

    /// Allocate a nominal node (declaration or root): always a fresh slot.
    pub(crate) fn alloc_node(&mut self, data: NodeData) -> Node {
        let handle = Node(self.nodes.len() as u32);
        self.nodes.push(data);
        handle
    }

    /// Replace a nominal node's payload. Used to fill declaration bodies
    /// after the header has been created and registered.
    pub(crate) fn update_node(&mut self, node: Node, data: NodeData) {
        debug_assert!(
            data.kind.is_declaration() || matches!(data.kind, NodeKind::Root { .. }),
            "only nominal nodes may be updated"
        );
        self.nodes[node.index()] = data;
    }

    pub fn node(&self, node: Node) -> &NodeData {
        &self.nodes[node.index()]
    }

    pub fn kind(&self, node: Node) -> &NodeKind {
        &self.nodes[node.index()].kind
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ── Node lists ──

    pub fn intern_nodes(&mut self, nodes: &[Node]) -> NodeList {
        if let Some(&found) = self.node_list_set.get(nodes) {
            return found;
        }
        let handle = NodeList(self.node_lists.len() as u32);
        self.node_lists.push(nodes.to_vec());
        self.node_list_set.insert(nodes.to_vec(), handle);
        handle
    }

    pub fn empty_nodes(&mut self) -> NodeList {
        self.intern_nodes(&[])
    }

    pub fn nodes(&self, list: NodeList) -> &[Node] {
        &self.node_lists[list.0 as usize]
    }

    /// Functional append: returns the interned list `old ++ [node]`.
    pub fn append_nodes(&mut self, old: NodeList, node: Node) -> NodeList {
        let mut v = self.node_lists[old.0 as usize].clone();
        v.push(node);
        self.intern_nodes(&v)
    }

    // ── Strings ──

    pub fn intern_string(&mut self, s: &str) -> StrId {
        if let Some(&found) = self.string_set.get(s) {
            return found;
        }
        let handle = StrId(self.strings.len() as u32);
        self.strings.push(s.to_string());
        self.string_set.insert(s.to_string(), handle);
        handle
    }

    pub fn str(&self, id: StrId) -> &str {
        &self.strings[id.0 as usize]
    }

    /// `"{prefix}_{fresh_id}"`, deterministic within the arena.
    pub fn unique_name(&mut self, prefix: &str) -> StrId {
        let id = self.fresh_id();
        let name = format!("{}_{}", prefix, id);
        self.intern_string(&name)
    }

    pub fn intern_strs(&mut self, strs: &[StrId]) -> StrList {
        if let Some(&found) = self.str_list_set.get(strs) {
            return found;
        }
        let handle = StrList(self.str_lists.len() as u32);
        self.str_lists.push(strs.to_vec());
        self.str_list_set.insert(strs.to_vec(), handle);
        handle
    }

    pub fn strs(&self, list: StrList) -> &[StrId] {
        &self.str_lists[list.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::{InferredType, IntWidth};

    #[test]
    fn test_string_interning_is_canonical() {
        let mut arena = IrArena::new(ArenaConfig::unchecked());
        let a = arena.intern_string("main");
        let b = arena.intern_string("main");
        let c = arena.intern_string("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(arena.str(a), "main");
    }

    #[test]
    fn test_node_interning_is_canonical() {
        let mut arena = IrArena::new(ArenaConfig::unchecked());
        let data = NodeData {
            kind: NodeKind::Int {
                width: IntWidth::I32,
            },
            ty: InferredType::None,
        };
        let a = arena.intern_node(data);
        let b = arena.intern_node(data);
        assert_eq!(a, b);
        assert_eq!(arena.node_count(), 1);
    }

    #[test]
    fn test_node_list_interning() {
        let mut arena = IrArena::new(ArenaConfig::unchecked());
        let i32_t = arena.intern_node(NodeData {
            kind: NodeKind::Int {
                width: IntWidth::I32,
            },
            ty: InferredType::None,
        });
        let bool_t = arena.intern_node(NodeData {
            kind: NodeKind::Bool,
            ty: InferredType::None,
        });
        let a = arena.intern_nodes(&[i32_t, bool_t]);
        let b = arena.intern_nodes(&[i32_t, bool_t]);
        let c = arena.intern_nodes(&[bool_t, i32_t]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(arena.nodes(a), &[i32_t, bool_t]);
    }

    #[test]
    fn test_append_nodes() {
        let mut arena = IrArena::new(ArenaConfig::unchecked());
        let t = arena.intern_node(NodeData {
            kind: NodeKind::Bool,
            ty: InferredType::None,
        });
        let empty = arena.empty_nodes();
        let one = arena.append_nodes(empty, t);
        assert_eq!(arena.nodes(one), &[t]);
        let direct = arena.intern_nodes(&[t]);
        assert_eq!(one, direct);
    }

    #[test]
    fn test_str_list_interning() {
        let mut arena = IrArena::new(ArenaConfig::unchecked());
        let a = arena.intern_string("x");
        let b = arena.intern_string("y");
        let ab = arena.intern_strs(&[a, b]);
        let ab2 = arena.intern_strs(&[a, b]);
        let ba = arena.intern_strs(&[b, a]);
        assert_eq!(ab, ab2);
        assert_ne!(ab, ba);
        assert_eq!(arena.strs(ab), &[a, b]);
    }

    #[test]
    fn test_fresh_ids_are_monotone() {
        let mut arena = IrArena::new(ArenaConfig::unchecked());
        let a = arena.fresh_id();
        let b = arena.fresh_id();
        assert!(b > a);
    }

    #[test]
    fn test_unique_names_differ() {
        let mut arena = IrArena::new(ArenaConfig::unchecked());
        let a = arena.unique_name("tmp");
        let b = arena.unique_name("tmp");
        assert_ne!(a, b);
        assert!(arena.str(a).starts_with("tmp_"));
    }
}
