//! Minimal owned graph used by the desktop driver, tests and benches.
//!
//! Every mutation that changes what the bulk geometry would contain
//! flips the `needs_rebuild` flag.  The frame driver drains it with
//! [`Graph::take_dirty`] and forwards it to the renderer.

use thiserror::Error;
use uuid::Uuid;

use crate::{EdgeSnapshot, Element, NodeSnapshot, Point, Rgb};

#[derive(Error, Debug, PartialEq)]
pub enum GraphError {
    #[error("Unknown node: {0}")]
    UnknownNode(Uuid),
}

#[derive(Clone, Debug)]
struct EdgeRecord {
    id: Uuid,
    source: Uuid,
    target: Uuid,
    color: Rgb,
    opacity: f32,
}

#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: Vec<NodeSnapshot>,
    edges: Vec<EdgeRecord>,
    needs_rebuild: bool,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node(&self, id: Uuid) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn add_node(&mut self, node: NodeSnapshot) -> Uuid {
        let id = node.id;
        self.nodes.push(node);
        self.needs_rebuild = true;
        id
    }

    pub fn add_edge(&mut self, source: Uuid, target: Uuid) -> Result<Uuid, GraphError> {
        self.add_edge_with_color(source, target, Rgb::new(128, 128, 128))
    }

    pub fn add_edge_with_color(
        &mut self,
        source: Uuid,
        target: Uuid,
        color: Rgb,
    ) -> Result<Uuid, GraphError> {
        for id in [source, target] {
            if self.node(id).is_none() {
                return Err(GraphError::UnknownNode(id));
            }
        }
        let id = Uuid::new_v4();
        self.edges.push(EdgeRecord {
            id,
            source,
            target,
            color,
            opacity: 1.0,
        });
        self.needs_rebuild = true;
        Ok(id)
    }

    /// Move a node centre.  The rotation pivot follows the node.
    pub fn move_node(&mut self, id: Uuid, position: Point) -> Result<(), GraphError> {
        let node = self.node_mut(id)?;
        let dx = position.x - node.position.x;
        let dy = position.y - node.position.y;
        node.position = position;
        node.rotation_point = Point::new(node.rotation_point.x + dx, node.rotation_point.y + dy);
        self.needs_rebuild = true;
        Ok(())
    }

    /// Replace the resolved style values of a node.
    pub fn set_node_style(
        &mut self,
        id: Uuid,
        color: Rgb,
        opacity: f32,
    ) -> Result<(), GraphError> {
        let node = self.node_mut(id)?;
        node.color = color;
        node.opacity = opacity;
        self.needs_rebuild = true;
        Ok(())
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&mut self, id: Uuid) -> Result<NodeSnapshot, GraphError> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or(GraphError::UnknownNode(id))?;
        let node = self.nodes.remove(index);
        let before = self.edges.len();
        self.edges.retain(|e| e.source != id && e.target != id);
        log::debug!(
            "removed node {id} and {} incident edge(s)",
            before - self.edges.len()
        );
        self.needs_rebuild = true;
        Ok(node)
    }

    /// Returns whether geometry changed since the last call, and clears the flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.needs_rebuild)
    }

    pub fn is_dirty(&self) -> bool {
        self.needs_rebuild
    }

    /// Element snapshots in draw order: edges first, then nodes, each in
    /// insertion order.
    pub fn z_sorted(&self) -> Vec<Element> {
        let mut out = Vec::with_capacity(self.nodes.len() + self.edges.len());

        for edge in &self.edges {
            let (Some(source), Some(target)) = (self.node(edge.source), self.node(edge.target))
            else {
                continue;
            };
            out.push(Element::Edge(EdgeSnapshot {
                id: edge.id,
                source: source.position,
                target: target.position,
                color: edge.color,
                opacity: edge.opacity,
            }));
        }

        out.extend(self.nodes.iter().cloned().map(Element::Node));
        out
    }

    fn node_mut(&mut self, id: Uuid) -> Result<&mut NodeSnapshot, GraphError> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(GraphError::UnknownNode(id))
    }
}
