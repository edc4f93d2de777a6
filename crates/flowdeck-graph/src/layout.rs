use std::collections::HashMap;

use tracing::debug;

use flowdeck_core::config::LayoutConfig;
use flowdeck_core::error::{FlowdeckError, Result};

use crate::graph::Graph;
use crate::node::Position;

/// Result of a layout pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    /// Node ids grouped by rank; column `i` holds the rank-`i` nodes in graph order.
    pub columns: Vec<Vec<String>>,
    ranks: HashMap<String, usize>,
    positions: Vec<(String, Position)>,
}

impl Layout {
    pub fn rank(&self, id: &str) -> Option<usize> {
        self.ranks.get(id).copied()
    }

    pub fn position(&self, id: &str) -> Option<Position> {
        self.positions
            .iter()
            .find(|(node_id, _)| node_id == id)
            .map(|(_, pos)| *pos)
    }

    /// Positions in graph order.
    pub fn positions(&self) -> &[(String, Position)] {
        &self.positions
    }
}

#[derive(Clone, Copy)]
enum Mark {
    InProgress,
    Done(usize),
}

/// Column-per-rank layout for acyclic graphs.
pub struct TopologicalLayout {
    config: LayoutConfig,
}

impl TopologicalLayout {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    /// Rank every node and assign coordinates.
    ///
    /// Sources have rank 0; any other node sits one column right of its
    /// highest-ranked predecessor. Fails with `CycleDetected` if the wiring
    /// is not a DAG, in which case nothing is positioned.
    pub fn layout(&self, graph: &Graph) -> Result<Layout> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut ranks = HashMap::new();

        for node in graph.nodes() {
            let rank = rank_of(graph, &node.id, &mut marks)?;
            ranks.insert(node.id.clone(), rank);
        }

        let depth = ranks.values().copied().max().map_or(0, |r| r + 1);
        let mut columns: Vec<Vec<String>> = vec![Vec::new(); depth];
        for node in graph.nodes() {
            columns[ranks[&node.id]].push(node.id.clone());
        }

        let mut positions = Vec::with_capacity(graph.len());
        for node in graph.nodes() {
            let rank = ranks[&node.id];
            let row = columns[rank]
                .iter()
                .position(|id| *id == node.id)
                .unwrap_or(0);
            positions.push((
                node.id.clone(),
                Position {
                    x: rank as f64 * self.config.x_spacing + self.config.margin,
                    y: row as f64 * self.config.y_spacing + self.config.margin,
                },
            ));
        }

        debug!(nodes = graph.len(), columns = columns.len(), "Layout computed");
        Ok(Layout {
            columns,
            ranks,
            positions,
        })
    }
}

impl Default for TopologicalLayout {
    fn default() -> Self {
        Self::new(LayoutConfig::default())
    }
}

/// A node being ranked, with the predecessors still to visit.
struct Frame<'g> {
    id: &'g str,
    preds: Vec<&'g str>,
    next: usize,
    rank: usize,
}

impl<'g> Frame<'g> {
    fn enter(graph: &'g Graph, id: &'g str) -> Self {
        let preds = graph
            .node(id)
            .map(|node| {
                node.predecessors()
                    .into_iter()
                    .filter(|pred| graph.contains(pred))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id,
            preds,
            next: 0,
            rank: 0,
        }
    }
}

/// Longest-path rank of `root`, walking predecessors with an explicit stack
/// so chain length is bounded by the heap, not the call stack.
fn rank_of<'g>(
    graph: &'g Graph,
    root: &'g str,
    marks: &mut HashMap<&'g str, Mark>,
) -> Result<usize> {
    if let Some(Mark::Done(rank)) = marks.get(root) {
        return Ok(*rank);
    }

    marks.insert(root, Mark::InProgress);
    let mut stack = vec![Frame::enter(graph, root)];

    while let Some(frame) = stack.last_mut() {
        if let Some(&pred) = frame.preds.get(frame.next) {
            frame.next += 1;
            match marks.get(pred).copied() {
                Some(Mark::Done(rank)) => frame.rank = frame.rank.max(rank + 1),
                Some(Mark::InProgress) => {
                    let start = stack.iter().position(|f| f.id == pred).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|f| f.id.to_string()).collect();
                    cycle.push(pred.to_string());
                    return Err(FlowdeckError::CycleDetected { cycle });
                }
                None => {
                    marks.insert(pred, Mark::InProgress);
                    stack.push(Frame::enter(graph, pred));
                }
            }
            continue;
        }

        let (id, rank) = (frame.id, frame.rank);
        stack.pop();
        marks.insert(id, Mark::Done(rank));
        match stack.last_mut() {
            Some(parent) => parent.rank = parent.rank.max(rank + 1),
            None => return Ok(rank),
        }
    }

    Ok(0)
}
