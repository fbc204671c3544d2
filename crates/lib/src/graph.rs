//! Build-order analysis.
//!
//! Turns the declared target graph into an [`ExecutionPlan`]: the set of
//! targets reachable from the root over hard edges, the effective edge set
//! (hard edges plus soft edges whose endpoint is itself hard-reachable),
//! and a layered order where every member of a group depends only on
//! strictly earlier groups. The layering drives both the sequential and
//! the parallel runner, and is printed before execution.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::debug;

use crate::registry::Engine;
use crate::target::{DependencyKind, Target, canonical_name};

/// Errors raised while computing the build order.
#[derive(Debug, Error)]
pub enum GraphError {
  /// Layer assignment made no progress with targets remaining. The
  /// insertion-time cycle check makes this unreachable; kept as a safety
  /// assert.
  #[error("could not progress build order: {remaining} targets remain with none runnable")]
  NoProgress { remaining: usize },
}

/// The analyzed, executable form of one run's target subgraph.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
  root: String,
  layers: Vec<Vec<Target>>,
  /// Canonical name -> canonical names of effective predecessors.
  predecessors: HashMap<String, HashSet<String>>,
}

impl ExecutionPlan {
  /// Analyze the subgraph rooted at `root`.
  ///
  /// Reachability is computed over hard edges only; a soft edge
  /// participates in ordering exactly when its endpoint is in that
  /// reachable set.
  pub fn analyze(engine: &Engine, root: &Target) -> Result<Self, GraphError> {
    // Phase 1: hard-edge reachability from the root.
    let mut members: HashMap<String, Target> = HashMap::new();
    let mut stack = vec![root.canonical()];
    while let Some(key) = stack.pop() {
      if members.contains_key(&key) {
        continue;
      }
      let Some(target) = engine.target_by_key(&key) else {
        continue;
      };
      stack.extend(target.dependencies.iter().map(|d| canonical_name(d)));
      members.insert(key, target.clone());
    }

    // Phase 2: effective predecessors = hard deps plus live soft deps.
    let mut predecessors: HashMap<String, HashSet<String>> = HashMap::new();
    for (key, target) in &members {
      let mut preds: HashSet<String> = target.dependencies.iter().map(|d| canonical_name(d)).collect();
      for soft in &target.soft_dependencies {
        let soft_key = canonical_name(soft);
        if members.contains_key(&soft_key) {
          preds.insert(soft_key);
        }
      }
      predecessors.insert(key.clone(), preds);
    }

    // Phase 3: Kahn-style level assignment over the effective-edge graph.
    let mut graph: DiGraph<String, DependencyKind> = DiGraph::new();
    let mut nodes: HashMap<String, NodeIndex> = HashMap::new();
    for key in members.keys() {
      nodes.insert(key.clone(), graph.add_node(key.clone()));
    }
    for (key, preds) in &predecessors {
      for pred in preds {
        let kind = if members[key].dependencies.iter().any(|d| canonical_name(d) == *pred) {
          DependencyKind::Hard
        } else {
          DependencyKind::Soft
        };
        graph.add_edge(nodes[pred], nodes[key], kind);
      }
    }

    let mut in_degree: HashMap<NodeIndex, usize> = graph
      .node_indices()
      .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();
    let mut remaining: HashSet<NodeIndex> = graph.node_indices().collect();
    let mut layers: Vec<Vec<Target>> = Vec::new();

    while !remaining.is_empty() {
      let mut ready: Vec<NodeIndex> = remaining.iter().filter(|&&idx| in_degree[&idx] == 0).copied().collect();
      if ready.is_empty() {
        return Err(GraphError::NoProgress {
          remaining: remaining.len(),
        });
      }
      // Sort by canonical name so the layer contents are deterministic.
      ready.sort_by(|a, b| graph[*a].cmp(&graph[*b]));

      let mut layer = Vec::with_capacity(ready.len());
      for &idx in &ready {
        remaining.remove(&idx);
        for neighbor in graph.neighbors_directed(idx, Direction::Outgoing) {
          if let Some(degree) = in_degree.get_mut(&neighbor) {
            *degree = degree.saturating_sub(1);
          }
        }
        if let Some(target) = members.get(&graph[idx]) {
          layer.push(target.clone());
        }
      }
      layers.push(layer);
    }

    debug!(root = %root.name, targets = members.len(), layers = layers.len(), "build order computed");

    Ok(Self {
      root: root.name.clone(),
      layers,
      predecessors,
    })
  }

  /// A plan containing only the root itself (single-target mode).
  pub fn single_target(root: &Target) -> Self {
    let mut predecessors = HashMap::new();
    predecessors.insert(root.canonical(), HashSet::new());
    Self {
      root: root.name.clone(),
      layers: vec![vec![root.clone()]],
      predecessors,
    }
  }

  /// Original-case name of the root target.
  pub fn root(&self) -> &str {
    &self.root
  }

  /// The layered order: members of group `i` depend only on groups `< i`.
  pub fn layers(&self) -> &[Vec<Target>] {
    &self.layers
  }

  /// The layers flattened into one linear sequence.
  pub fn flattened(&self) -> Vec<Target> {
    self.layers.iter().flatten().cloned().collect()
  }

  /// Effective predecessors (canonical names) of a scheduled target.
  pub fn predecessors_of(&self, canonical: &str) -> Option<&HashSet<String>> {
    self.predecessors.get(canonical)
  }

  pub(crate) fn predecessor_map(&self) -> &HashMap<String, HashSet<String>> {
    &self.predecessors
  }

  /// Number of scheduled targets.
  pub fn len(&self) -> usize {
    self.layers.iter().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.layers.is_empty()
  }

  /// Layer index of a target, if scheduled.
  pub fn layer_of(&self, name: &str) -> Option<usize> {
    let key = canonical_name(name);
    self
      .layers
      .iter()
      .position(|layer| layer.iter().any(|t| t.canonical() == key))
  }

  /// Render the effective-edge graph as an indented tree.
  ///
  /// Hard edges print as `<==`, soft edges as `<=?`. A target already
  /// printed higher up appears again without its subtree.
  pub fn render(&self) -> String {
    let targets: HashMap<String, &Target> = self
      .layers
      .iter()
      .flatten()
      .map(|target| (target.canonical(), target))
      .collect();

    let mut out = String::new();
    let mut printed: HashSet<String> = HashSet::new();
    let root_key = canonical_name(&self.root);
    if let Some(root) = targets.get(&root_key) {
      out.push_str(&root.name);
      out.push('\n');
      printed.insert(root_key);
      self.render_children(root, 1, &targets, &mut printed, &mut out);
    }
    out
  }

  fn render_children(
    &self,
    target: &Target,
    depth: usize,
    targets: &HashMap<String, &Target>,
    printed: &mut HashSet<String>,
    out: &mut String,
  ) {
    let Some(preds) = self.predecessors.get(&target.canonical()) else {
      return;
    };

    // Hard dependencies first, in declaration order, then live soft ones.
    let hard = target.dependencies.iter().map(|d| (d, DependencyKind::Hard));
    let soft = target.soft_dependencies.iter().map(|d| (d, DependencyKind::Soft));

    for (name, kind) in hard.chain(soft) {
      let key = canonical_name(name);
      if !preds.contains(&key) {
        continue;
      }
      let Some(child) = targets.get(&key) else {
        continue;
      };
      let arrow = match kind {
        DependencyKind::Hard => "<==",
        DependencyKind::Soft => "<=?",
      };
      out.push_str(&"  ".repeat(depth));
      out.push_str(arrow);
      out.push(' ');
      out.push_str(&child.name);
      out.push('\n');
      if printed.insert(key) {
        self.render_children(child, depth + 1, targets, printed, out);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn engine_with(names: &[&str]) -> Engine {
    let mut engine = Engine::new();
    for name in names {
      engine.create(name, |_| Ok(())).unwrap();
    }
    engine
  }

  fn layer_names(plan: &ExecutionPlan) -> Vec<Vec<String>> {
    plan
      .layers()
      .iter()
      .map(|layer| layer.iter().map(|t| t.name.clone()).collect())
      .collect()
  }

  #[test]
  fn single_node_plan() {
    let engine = engine_with(&["a"]);
    let root = engine.get("a").unwrap().clone();
    let plan = ExecutionPlan::analyze(&engine, &root).unwrap();

    assert_eq!(layer_names(&plan), vec![vec!["a".to_string()]]);
    assert_eq!(plan.len(), 1);
  }

  #[test]
  fn diamond_layers() {
    let mut engine = engine_with(&["A", "B", "C", "D"]);
    engine.add_dependency("B", "A").unwrap();
    engine.add_dependency("C", "A").unwrap();
    engine.add_dependency("D", "B").unwrap();
    engine.add_dependency("D", "C").unwrap();

    let root = engine.get("D").unwrap().clone();
    let plan = ExecutionPlan::analyze(&engine, &root).unwrap();

    assert_eq!(
      layer_names(&plan),
      vec![
        vec!["A".to_string()],
        vec!["B".to_string(), "C".to_string()],
        vec!["D".to_string()],
      ]
    );
  }

  #[test]
  fn edge_endpoints_lie_in_strictly_earlier_layers() {
    let mut engine = engine_with(&["a", "b", "c", "d", "e"]);
    engine.add_dependency("b", "a").unwrap();
    engine.add_dependency("c", "a").unwrap();
    engine.add_dependency("d", "b").unwrap();
    engine.add_dependency("d", "c").unwrap();
    engine.add_dependency("e", "d").unwrap();

    let root = engine.get("e").unwrap().clone();
    let plan = ExecutionPlan::analyze(&engine, &root).unwrap();

    for target in plan.flattened() {
      let layer = plan.layer_of(&target.name).unwrap();
      for dep in &target.dependencies {
        assert!(plan.layer_of(dep).unwrap() < layer, "{dep} must precede {}", target.name);
      }
    }
  }

  #[test]
  fn unreachable_targets_excluded() {
    let mut engine = engine_with(&["a", "b", "other"]);
    engine.add_dependency("b", "a").unwrap();

    let root = engine.get("b").unwrap().clone();
    let plan = ExecutionPlan::analyze(&engine, &root).unwrap();

    assert_eq!(plan.len(), 2);
    assert!(plan.layer_of("other").is_none());
  }

  #[test]
  fn soft_dependency_ignored_when_unreachable() {
    let mut engine = engine_with(&["a", "unused"]);
    engine.add_soft_dependency("a", "unused").unwrap();

    let root = engine.get("a").unwrap().clone();
    let plan = ExecutionPlan::analyze(&engine, &root).unwrap();

    assert_eq!(plan.len(), 1);
    assert!(plan.layer_of("unused").is_none());
    assert!(plan.predecessors_of("a").unwrap().is_empty());
  }

  #[test]
  fn soft_dependency_orders_when_reachable() {
    // root -> a (hard), root -> b (hard), a ?=> b: b must precede a.
    let mut engine = engine_with(&["root", "a", "b"]);
    engine.add_dependency("root", "a").unwrap();
    engine.add_dependency("root", "b").unwrap();
    engine.add_soft_dependency("a", "b").unwrap();

    let root = engine.get("root").unwrap().clone();
    let plan = ExecutionPlan::analyze(&engine, &root).unwrap();

    assert!(plan.layer_of("b").unwrap() < plan.layer_of("a").unwrap());
    assert!(plan.predecessors_of("a").unwrap().contains("b"));
  }

  #[test]
  fn soft_dependency_on_undeclared_name_ignored() {
    let mut engine = engine_with(&["a"]);
    engine.add_soft_dependency("a", "ghost").unwrap();

    let root = engine.get("a").unwrap().clone();
    let plan = ExecutionPlan::analyze(&engine, &root).unwrap();

    assert_eq!(plan.len(), 1);
    assert!(plan.predecessors_of("a").unwrap().is_empty());
  }

  #[test]
  fn plan_is_deterministic() {
    let build = || {
      let mut engine = engine_with(&["root", "t3", "t1", "t2"]);
      engine.add_dependency("root", "t3").unwrap();
      engine.add_dependency("root", "t1").unwrap();
      engine.add_dependency("root", "t2").unwrap();
      let root = engine.get("root").unwrap().clone();
      ExecutionPlan::analyze(&engine, &root).unwrap()
    };

    assert_eq!(layer_names(&build()), layer_names(&build()));
    assert_eq!(
      layer_names(&build())[0],
      vec!["t1".to_string(), "t2".to_string(), "t3".to_string()]
    );
  }

  #[test]
  fn single_target_plan_has_one_member() {
    let mut engine = engine_with(&["a", "b"]);
    engine.add_dependency("b", "a").unwrap();

    let root = engine.get("b").unwrap().clone();
    let plan = ExecutionPlan::single_target(&root);

    assert_eq!(plan.len(), 1);
    assert_eq!(layer_names(&plan), vec![vec!["b".to_string()]]);
    assert!(plan.predecessors_of("b").unwrap().is_empty());
  }

  #[test]
  fn render_marks_edge_kinds() {
    let mut engine = engine_with(&["root", "hard", "soft"]);
    engine.add_dependency("root", "hard").unwrap();
    engine.add_dependency("root", "soft").unwrap();
    engine.add_soft_dependency("hard", "soft").unwrap();

    let root = engine.get("root").unwrap().clone();
    let plan = ExecutionPlan::analyze(&engine, &root).unwrap();
    let rendered = plan.render();

    assert!(rendered.starts_with("root\n"));
    assert!(rendered.contains("<== hard"));
    assert!(rendered.contains("<=? soft"));
  }
}
