//! Dependency graph for multi-file compilation

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Node in the dependency graph representing a module
#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub path: PathBuf,
    /// Local modules this module imports, in source order
    pub dependencies: Vec<PathBuf>,
}

/// Local-module import graph. Ordered maps keep traversal deterministic.
#[derive(Debug, Default)]
pub struct DepGraph {
    modules: BTreeMap<PathBuf, ModuleNode>,
    entry: Option<PathBuf>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_entry(&mut self, path: PathBuf) {
        self.entry = Some(path);
    }

    pub fn add_module(&mut self, path: PathBuf, dependencies: Vec<PathBuf>) {
        let node = ModuleNode {
            path: path.clone(),
            dependencies,
        };
        self.modules.insert(path, node);
    }

    pub fn get_module(&self, path: &Path) -> Option<&ModuleNode> {
        self.modules.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.modules.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Every import cycle reachable from the entry (or from any module when
    /// no entry is set), each as the path sequence closing back on its start.
    pub fn cycles(&self) -> Vec<Vec<PathBuf>> {
        let mut visited = BTreeSet::new();
        let mut stack = Vec::new();
        let mut found = Vec::new();

        let roots: Vec<&PathBuf> = match &self.entry {
            Some(entry) => vec![entry],
            None => self.modules.keys().collect(),
        };
        for root in roots {
            if !visited.contains(root) {
                self.visit(root, &mut visited, &mut stack, &mut found);
            }
        }
        found
    }

    /// DFS keeping the current path on `stack`.
    fn visit(
        &self,
        current: &PathBuf,
        visited: &mut BTreeSet<PathBuf>,
        stack: &mut Vec<PathBuf>,
        found: &mut Vec<Vec<PathBuf>>,
    ) {
        visited.insert(current.clone());
        stack.push(current.clone());

        if let Some(node) = self.modules.get(current) {
            for dep in &node.dependencies {
                if let Some(pos) = stack.iter().position(|p| p == dep) {
                    let mut cycle = stack[pos..].to_vec();
                    cycle.push(dep.clone());
                    found.push(cycle);
                } else if !visited.contains(dep) {
                    self.visit(dep, visited, stack, found);
                }
            }
        }

        stack.pop();
    }
}
