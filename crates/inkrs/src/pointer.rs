//! Content pointers: a container plus an index into its content list.
//!
//! Grounded on `inkpy/runtime/pointer.py`. Paths are never stored on a
//! pointer; they're computed lazily by walking parent links in the arena.

use crate::arena::{Arena, NodeId};
use crate::node::NodeKind;
use crate::path::{Component, Path};

/// A resolved position within the content tree: the container holding the
/// content, and the index of the next item to read inside it. `index < 0`
/// addresses the container itself rather than any of its children (used for
/// diverts that target a container directly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    pub container: Option<NodeId>,
    pub index: i32,
}

impl Pointer {
    pub const NULL: Pointer = Pointer { container: None, index: -1 };

    pub fn is_null(&self) -> bool {
        self.container.is_none()
    }

    pub fn start_of(container: NodeId) -> Self {
        Self { container: Some(container), index: 0 }
    }

    /// The node this pointer currently addresses: `content[index]` of the
    /// container, or the container itself when `index < 0`.
    pub fn resolve(&self, arena: &Arena) -> Option<NodeId> {
        let container = self.container?;
        if self.index < 0 {
            return Some(container);
        }
        let c = arena.get(container).as_container()?;
        c.content.get(self.index as usize).copied()
    }

    /// Compute the absolute [`Path`] this pointer addresses, walking parent
    /// links from `container` to the root.
    pub fn path(&self, arena: &Arena) -> Path {
        let Some(container) = self.container else {
            return Path::new();
        };
        let mut components = container_path_components(arena, container);
        if self.index >= 0 {
            components.push(Component::Index(self.index as u32));
        }
        Path::absolute(components)
    }
}

/// The path components identifying `id` itself, from the root down.
pub fn container_path_components(arena: &Arena, id: NodeId) -> Vec<Component> {
    let mut chain = Vec::new();
    let mut current = Some(id);
    while let Some(node_id) = current {
        let parent = arena.parent_of(node_id);
        let component = match parent {
            Some(parent_id) => component_for_child(arena, parent_id, node_id),
            None => None,
        };
        if let Some(component) = component {
            chain.push(component);
        }
        current = parent;
    }
    chain.reverse();
    chain
}

fn component_for_child(arena: &Arena, parent_id: NodeId, child_id: NodeId) -> Option<Component> {
    if let NodeKind::Container(child) = &arena.get(child_id).kind {
        if let Some(name) = &child.name {
            return Some(Component::Name(name.clone()));
        }
    }
    let parent = arena.get(parent_id).as_container()?;
    let index = parent.content.iter().position(|&c| c == child_id)?;
    Some(Component::Index(index as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Container, Node, NodeKind};

    #[test]
    fn start_of_points_at_first_child() {
        let mut arena = Arena::new();
        let leaf = arena.push(Node::new(NodeKind::Void));
        let container = arena.push(Node::new(NodeKind::Container(Container {
            content: vec![leaf],
            ..Default::default()
        })));
        arena.set_parent(leaf, container);

        let ptr = Pointer::start_of(container);
        assert_eq!(ptr.resolve(&arena), Some(leaf));
    }

    #[test]
    fn path_uses_container_names_and_indices() {
        let mut arena = Arena::new();
        let leaf = arena.push(Node::new(NodeKind::Void));
        let inner = arena.push(Node::new(NodeKind::Container(Container {
            name: Some("stitch".into()),
            content: vec![leaf],
            ..Default::default()
        })));
        let root = arena.push(Node::new(NodeKind::Container(Container {
            name: Some("knot".into()),
            content: vec![inner],
            ..Default::default()
        })));
        arena.set_parent(leaf, inner);
        arena.set_parent(inner, root);

        let ptr = Pointer { container: Some(inner), index: 0 };
        assert_eq!(ptr.path(&arena), Path::parse("knot.stitch.0"));
    }
}
