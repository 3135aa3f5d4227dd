//! Dependency graph resolution.
//!
//! [`resolve`] is a pure function over a manifest set: it checks that every
//! dependency exists and satisfies its version constraint, rejects cycles with
//! their exact membership, and groups plugins into start layers. Within a
//! layer names are sorted, so the result is deterministic.
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use crate::plugin_system::dependency::DependencyError;
use crate::plugin_system::manifest::PluginManifest;

/// Result of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOrder {
    layers: Vec<Vec<String>>,
    /// plugin -> direct dependencies (sorted)
    dependencies: BTreeMap<String, Vec<String>>,
}

impl LoadOrder {
    /// Start layers. Every plugin's dependencies live in earlier layers.
    pub fn layers(&self) -> &[Vec<String>] {
        &self.layers
    }

    /// Flattened topological order
    pub fn order(&self) -> Vec<String> {
        self.layers.iter().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn contains(&self, plugin: &str) -> bool {
        self.dependencies.contains_key(plugin)
    }

    pub fn layer_of(&self, plugin: &str) -> Option<usize> {
        self.layers.iter().position(|layer| layer.iter().any(|name| name == plugin))
    }

    pub fn dependencies_of(&self, plugin: &str) -> &[String] {
        self.dependencies.get(plugin).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Plugins that depend directly on `plugin`, sorted
    pub fn dependents_of(&self, plugin: &str) -> Vec<String> {
        self.dependencies
            .iter()
            .filter(|(_, deps)| deps.iter().any(|dep| dep == plugin))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Shutdown layers over the plugins selected by `is_active`.
    ///
    /// A plugin is placed after every active plugin that depends on it,
    /// directly or through plugins that are no longer active, so dependents
    /// always stop first. Plugins that never started are left out
    /// entirely rather than reversed into the sequence.
    pub fn shutdown_layers<F>(&self, is_active: F) -> Vec<Vec<String>>
    where
        F: Fn(&str) -> bool,
    {
        let active: BTreeSet<&str> = self
            .dependencies
            .keys()
            .map(String::as_str)
            .filter(|name| is_active(name))
            .collect();

        // Depth of a plugin = most active plugins on any dependent chain above it.
        // Inactive plugins carry depth through without adding to it, so a stopped
        // middle plugin does not let its dependencies overtake its dependents.
        // Walking load layers backwards visits every dependent before its dependencies.
        let mut depth: HashMap<&str, usize> = HashMap::new();
        for layer in self.layers.iter().rev() {
            for name in layer.iter().map(String::as_str) {
                let level = self
                    .dependencies
                    .iter()
                    .filter(|(_, deps)| deps.iter().any(|dep| dep == name))
                    .filter_map(|(dependent, _)| {
                        let above = depth.get(dependent.as_str())?;
                        Some(above + usize::from(active.contains(dependent.as_str())))
                    })
                    .max()
                    .unwrap_or(0);
                depth.insert(name, level);
            }
        }

        let mut layers: Vec<Vec<String>> = Vec::new();
        for name in &active {
            let level = depth.get(name).copied().unwrap_or(0);
            if layers.len() <= level {
                layers.resize_with(level + 1, Vec::new);
            }
            layers[level].push((*name).to_string());
        }
        layers.retain(|layer| !layer.is_empty());
        layers
    }

    /// Flattened [`shutdown_layers`](Self::shutdown_layers)
    pub fn shutdown_order<F>(&self, is_active: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        self.shutdown_layers(is_active).into_iter().flatten().collect()
    }
}

/// Resolve a manifest set into a deterministic load order.
pub fn resolve(manifests: &[PluginManifest]) -> Result<LoadOrder, DependencyError> {
    let mut by_name: BTreeMap<&str, &PluginManifest> = BTreeMap::new();
    for manifest in manifests {
        if by_name.insert(manifest.name.as_str(), manifest).is_some() {
            return Err(DependencyError::DuplicatePlugin(manifest.name.clone()));
        }
    }

    // Existence and version constraints, in name order for stable diagnostics.
    for (name, manifest) in &by_name {
        for dep in &manifest.dependencies {
            let Some(target) = by_name.get(dep.plugin_name.as_str()) else {
                return Err(DependencyError::MissingDependency {
                    plugin: (*name).to_string(),
                    missing: dep.plugin_name.clone(),
                });
            };
            if !dep.is_satisfied_by(&target.version) {
                return Err(DependencyError::IncompatibleVersion {
                    plugin: (*name).to_string(),
                    dependency: dep.plugin_name.clone(),
                    required: dep
                        .version_range
                        .as_ref()
                        .map(|range| range.constraint_string().to_string())
                        .unwrap_or_else(|| "*".to_string()),
                    found: target.version.to_string(),
                });
            }
        }
    }

    let dependencies: BTreeMap<String, Vec<String>> = by_name
        .iter()
        .map(|(name, manifest)| {
            let mut deps: Vec<String> = manifest.dependency_names().map(str::to_string).collect();
            deps.sort();
            deps.dedup();
            ((*name).to_string(), deps)
        })
        .collect();

    if let Some(cycle) = find_cycle(&dependencies) {
        return Err(DependencyError::CircularDependency { cycle });
    }

    Ok(LoadOrder {
        layers: kahn_layers(&dependencies),
        dependencies,
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first search for one cycle, rotated to start at its smallest member.
fn find_cycle(dependencies: &BTreeMap<String, Vec<String>>) -> Option<Vec<String>> {
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    for root in dependencies.keys() {
        if marks.contains_key(root.as_str()) {
            continue;
        }
        // Explicit stack of (node, next dependency index) to avoid recursion.
        let mut path: Vec<&str> = vec![root.as_str()];
        let mut cursor: Vec<usize> = vec![0];
        marks.insert(root.as_str(), Mark::Visiting);

        while let Some(&node) = path.last() {
            let deps = dependencies.get(node).map(Vec::as_slice).unwrap_or(&[]);
            let index = cursor.last().copied().unwrap_or(0);
            if index >= deps.len() {
                marks.insert(node, Mark::Done);
                path.pop();
                cursor.pop();
                continue;
            }
            if let Some(top) = cursor.last_mut() {
                *top += 1;
            }
            let next = deps[index].as_str();
            match marks.get(next) {
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|name| *name == next).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].iter().map(|name| name.to_string()).collect();
                    let smallest = cycle
                        .iter()
                        .enumerate()
                        .min_by(|a, b| a.1.cmp(b.1))
                        .map(|(position, _)| position)
                        .unwrap_or(0);
                    cycle.rotate_left(smallest);
                    return Some(cycle);
                }
                Some(Mark::Done) => {}
                None => {
                    marks.insert(next, Mark::Visiting);
                    path.push(next);
                    cursor.push(0);
                }
            }
        }
    }
    None
}

/// Kahn's algorithm, emitting one sorted layer per round.
fn kahn_layers(dependencies: &BTreeMap<String, Vec<String>>) -> Vec<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = dependencies
        .iter()
        .map(|(name, deps)| (name.as_str(), deps.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (name, deps) in dependencies {
        for dep in deps {
            dependents.entry(dep.as_str()).or_default().push(name.as_str());
        }
    }

    let mut ready: VecDeque<&str> = dependencies
        .keys()
        .map(String::as_str)
        .filter(|name| in_degree.get(name).copied() == Some(0))
        .collect();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut layers = Vec::new();

    while !ready.is_empty() {
        let mut layer: Vec<&str> = ready.drain(..).collect();
        layer.sort_unstable();
        let mut next = Vec::new();
        for name in &layer {
            placed.insert(*name);
            for dependent in dependents.get(name).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }
        layers.push(layer.into_iter().map(str::to_string).collect());
        ready.extend(next);
    }

    debug_assert_eq!(placed.len(), dependencies.len(), "cycle survived detection");
    layers
}
