use std::collections::BTreeMap;

use onair::{
    novelty::Novelty,
    store::{Link, ReadOnlyStore},
    BTree, Node,
};

type Vertex<'a> = &'a NodeDescriptor;
type Edge<'a> = (usize, usize);
struct TreeGraph {
    nodes: BTreeMap<usize, NodeDescriptor>,
    edges: Vec<(usize, usize)>,
}

enum NodeDescriptor {
    Branch {
        id: usize,
        children: usize,
        committed: bool,
    },
    Leaf {
        id: usize,
        items: usize,
        committed: bool,
    },
}

impl NodeDescriptor {
    fn id(&self) -> usize {
        match self {
            NodeDescriptor::Branch { id, .. } | NodeDescriptor::Leaf { id, .. } => *id,
        }
    }

    fn committed(&self) -> bool {
        match self {
            NodeDescriptor::Branch { committed, .. } | NodeDescriptor::Leaf { committed, .. } => {
                *committed
            }
        }
    }
}

impl<'a> dot::Labeller<'a, Vertex<'a>, Edge<'a>> for TreeGraph {
    fn graph_id(&'a self) -> dot::Id<'a> {
        dot::Id::new("thetree").unwrap()
    }

    fn node_id(&'a self, n: &Vertex<'a>) -> dot::Id<'a> {
        dot::Id::new(format!("N{}", n.id())).unwrap()
    }

    fn node_label(&'a self, n: &Vertex<'a>) -> dot::LabelText<'a> {
        let text = match n {
            NodeDescriptor::Branch { children, .. } => children.to_string(),
            NodeDescriptor::Leaf { items, .. } => items.to_string(),
        };
        dot::LabelText::label(text)
    }

    fn node_shape(&'a self, n: &Vertex<'a>) -> Option<dot::LabelText<'a>> {
        let shape = match n {
            NodeDescriptor::Branch { .. } => "box",
            NodeDescriptor::Leaf { .. } => "circle",
        };
        Some(dot::LabelText::label(shape))
    }

    fn node_color(&'a self, n: &Vertex<'a>) -> Option<dot::LabelText<'a>> {
        if n.committed() {
            Some(dot::LabelText::label("grey"))
        } else {
            None
        }
    }

    fn node_style(&'a self, n: &Vertex<'a>) -> dot::Style {
        if n.committed() {
            dot::Style::Filled
        } else {
            dot::Style::None
        }
    }
}

impl<'a> dot::GraphWalk<'a, Vertex<'a>, Edge<'a>> for TreeGraph {
    fn nodes(&'a self) -> dot::Nodes<'a, Vertex<'a>> {
        self.nodes.values().collect()
    }

    fn edges(&'a self) -> dot::Edges<'a, Edge<'a>> {
        self.edges.iter().cloned().collect()
    }

    fn source(&'a self, edge: &Edge<'a>) -> Vertex<'a> {
        &self.nodes[&edge.0]
    }

    fn target(&'a self, edge: &Edge<'a>) -> Vertex<'a> {
        &self.nodes[&edge.1]
    }
}

/// Writes the structure of a tree as a graphviz digraph.
///
/// Branches are boxes labelled with their number of children, leaves are circles labelled with
/// their number of entries. Committed nodes are greyed out.
pub fn graph<L, S>(
    novelty: &impl Novelty,
    tree: &BTree<L, S>,
    mut out: impl std::io::Write,
) -> anyhow::Result<()>
where
    L: Link,
    S: ReadOnlyStore<L>,
{
    let (edges, nodes) = tree.dump_graph(novelty, |(id, node_ref, node)| {
        let committed = node_ref.is_storage();
        match node {
            Node::Branch(branch) => NodeDescriptor::Branch {
                id,
                children: branch.len(),
                committed,
            },
            Node::Leaf(leaf) => NodeDescriptor::Leaf {
                id,
                items: leaf.len(),
                committed,
            },
        }
    })?;
    dot::render(&TreeGraph { nodes, edges }, &mut out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Sha256Digest;
    use onair::{novelty::MemNovelty, store::MemStore, Config};
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn one_vertex_per_node(keys: Vec<u16>, commit: bool) -> anyhow::Result<bool> {
        let novelty = MemNovelty::default();
        let store = MemStore::new(usize::max_value(), Sha256Digest::new);
        let mut tree = BTree::create(&novelty, store, Config::debug())?;
        for key in keys {
            tree.put(&novelty, key.to_be_bytes().to_vec(), "")?;
        }
        if commit {
            tree.store(&novelty)?;
        }
        let (edges, nodes) = tree.dump_graph(&novelty, |_| ())?;
        let mut out = Vec::new();
        graph(&novelty, &tree, &mut out)?;
        let text = String::from_utf8(out)?;
        let edge_lines = text.lines().filter(|l| l.contains("->")).count();
        let node_lines = text
            .lines()
            .filter(|l| l.trim_start().starts_with('N') && !l.contains("->"))
            .count();
        let filled = text.matches("filled").count();
        Ok(text.starts_with("digraph thetree")
            && edge_lines == edges.len()
            && node_lines == nodes.len()
            && filled == if commit { nodes.len() } else { 0 })
    }
}
