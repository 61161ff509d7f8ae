use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    hash::BuildHasher,
};

use tracing::{debug, warn};

use crate::ast::{Definition, DiscriminantType, File, Primitive};

/// Maps an IDL type name to the class name the generated code uses for it.
pub trait TypeNaming {
    fn class_name(&self, idl_name: &str) -> String;
}

/// Prepends a fixed prefix (`Xdr` by default) unless the name already has it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixNaming {
    pub prefix: String,
}

impl Default for PrefixNaming {
    fn default() -> Self {
        PrefixNaming {
            prefix: "Xdr".to_string(),
        }
    }
}

impl TypeNaming for PrefixNaming {
    fn class_name(&self, idl_name: &str) -> String {
        if idl_name.starts_with(&self.prefix) {
            idl_name.to_string()
        } else {
            format!("{}{idl_name}", self.prefix)
        }
    }
}

/// Keeps IDL names as they are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityNaming;

impl TypeNaming for IdentityNaming {
    fn class_name(&self, idl_name: &str) -> String {
        idl_name.to_string()
    }
}

/// Decides which output file a (mapped) type name is generated into.
pub trait TypeAssignment {
    fn file_for(&self, type_name: &str) -> Option<&str>;
}

impl<S: BuildHasher> TypeAssignment for HashMap<String, String, S> {
    fn file_for(&self, type_name: &str) -> Option<&str> {
        self.get(type_name).map(String::as_str)
    }
}

impl TypeAssignment for BTreeMap<String, String> {
    fn file_for(&self, type_name: &str) -> Option<&str> {
        self.get(type_name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Infrastructure file every generated file imports.
    pub baseline_import: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            baseline_import: "xdr_data_io.dart".to_string(),
        }
    }
}

/// A directed graph keyed by name. Every node has an entry, possibly with
/// no outgoing edges. Ordered containers keep every query deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

/// Nodes are mapped type names, an edge means "references".
pub type TypeGraph = Graph;

/// Nodes are output files, an edge means "depends on".
pub type FileGraph = Graph;

impl Graph {
    pub fn add_node(&mut self, node: &str) {
        if !self.edges.contains_key(node) {
            self.edges.insert(node.to_string(), BTreeSet::new());
        }
    }

    /// Adds `from -> to`, creating both nodes. Self-loops are ignored.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.add_node(to);
        self.add_node(from);
        if from != to
            && let Some(targets) = self.edges.get_mut(from)
        {
            targets.insert(to.to_string());
        }
    }

    pub fn contains(&self, node: &str) -> bool {
        self.edges.contains_key(node)
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.edges.get(from).is_some_and(|targets| targets.contains(to))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    pub fn node_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// A copy without the `removed` nodes and every edge touching them.
    pub fn without(&self, removed: &BTreeSet<String>) -> Graph {
        let edges = self
            .edges
            .iter()
            .filter(|(node, _)| !removed.contains(*node))
            .map(|(node, targets)| {
                let kept = targets
                    .iter()
                    .filter(|t| !removed.contains(*t))
                    .cloned()
                    .collect();
                (node.clone(), kept)
            })
            .collect();
        Graph { edges }
    }

    /// Direct successors of `node`; empty for unknown nodes.
    pub fn dependencies(&self, node: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(node)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Reports every pair of nodes with edges in both directions, once,
    /// as `(smaller, larger)`.
    ///
    /// Only two-node cycles are found here; see [`Graph::find_cycle`] for
    /// longer ones.
    pub fn detect_cycles(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (a, targets) in &self.edges {
            for b in targets {
                if a < b && self.has_edge(b, a) {
                    pairs.push((a.clone(), b.clone()));
                }
            }
        }
        pairs
    }

    /// Depth-first search for a back edge. Returns the nodes of the first
    /// cycle found in path order, e.g. `[a, b, c]` for `a -> b -> c -> a`.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut state: HashMap<&str, Visit> = HashMap::new();
        let mut path = Vec::new();
        for node in self.nodes() {
            if !state.contains_key(node)
                && let Some(cycle) = self.visit(node, &mut state, &mut path)
            {
                return Some(cycle);
            }
        }
        None
    }

    fn visit<'g>(
        &'g self,
        node: &'g str,
        state: &mut HashMap<&'g str, Visit>,
        path: &mut Vec<&'g str>,
    ) -> Option<Vec<String>> {
        state.insert(node, Visit::InProgress);
        path.push(node);
        for next in self.dependencies(node) {
            match state.get(next) {
                Some(Visit::InProgress) => {
                    let start = path.iter().position(|n| *n == next).unwrap_or(0);
                    return Some(path[start..].iter().map(|n| n.to_string()).collect());
                }
                Some(Visit::Done) => {}
                None => {
                    if let Some(cycle) = self.visit(next, state, path) {
                        return Some(cycle);
                    }
                }
            }
        }
        path.pop();
        state.insert(node, Visit::Done);
        None
    }

    /// Orders nodes so that every node comes after everything it depends on.
    ///
    /// Mutual dependencies are rejected up front. Longer cycles leave nodes
    /// Kahn's algorithm can never release; those are reported with the
    /// exact cycle. Among ready nodes the smallest name goes first.
    pub fn topological_order(&self) -> Result<Vec<String>, ResolveError> {
        let pairs = self.detect_cycles();
        if !pairs.is_empty() {
            return Err(ResolveError::CircularDependency { pairs });
        }

        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut pending: HashMap<&str, usize> = HashMap::new();
        for (node, targets) in &self.edges {
            pending.insert(node.as_str(), targets.len());
            for target in targets {
                dependents.entry(target.as_str()).or_default().push(node.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(node, _)| *node)
            .collect();
        let mut order = Vec::with_capacity(self.edges.len());

        while let Some(node) = ready.pop_first() {
            order.push(node.to_string());
            for dependent in dependents.get(node).into_iter().flatten() {
                if let Some(count) = pending.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() != self.edges.len() {
            let cycle = self.find_cycle().unwrap_or_else(|| {
                self.nodes()
                    .filter(|n| !order.iter().any(|o| o == n))
                    .map(str::to_string)
                    .collect()
            });
            return Err(ResolveError::Cycle { cycle });
        }
        Ok(order)
    }

    fn degree_stats(&self) -> DegreeStats {
        let total = self.node_count();
        let max = self.edges.values().map(BTreeSet::len).max().unwrap_or(0);
        let average = if total == 0 {
            0.0
        } else {
            self.edge_count() as f64 / total as f64
        };
        DegreeStats {
            total,
            max_dependencies: max,
            average_dependencies: average,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("circular dependencies detected: {}", format_pairs(.pairs))]
    CircularDependency { pairs: Vec<(String, String)> },
    #[error("dependency cycle detected: {}", format_cycle(.cycle))]
    Cycle { cycle: Vec<String> },
}

fn format_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(a, b)| format!("{a} <-> {b}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {first}", cycle.join(" -> ")),
        None => String::new(),
    }
}

/// Non-fatal findings of [`DependencyGraph::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphWarning {
    CircularDependency { a: String, b: String },
    UnassignedType { type_name: String },
}

impl fmt::Display for GraphWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphWarning::CircularDependency { a, b } => {
                write!(f, "Circular dependency: {a} <-> {b}")
            }
            GraphWarning::UnassignedType { type_name } => {
                write!(f, "Type '{type_name}' has no file assignment")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DegreeStats {
    pub total: usize,
    pub max_dependencies: usize,
    pub average_dependencies: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphStats {
    pub files: DegreeStats,
    pub types: DegreeStats,
}

/// The type and file graphs of one resolver run, plus the assignment facts
/// needed to answer import queries.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    pub types: TypeGraph,
    pub files: FileGraph,
    type_to_file: BTreeMap<String, String>,
    unassigned: BTreeSet<String>,
    baseline_import: String,
}

impl DependencyGraph {
    pub fn detect_cycles(&self) -> Vec<(String, String)> {
        self.files.detect_cycles()
    }

    pub fn find_cycle(&self) -> Option<Vec<String>> {
        self.files.find_cycle()
    }

    /// Output files with dependencies before their dependents.
    pub fn topological_order(&self) -> Result<Vec<String>, ResolveError> {
        self.files.topological_order()
    }

    /// Files `file` must import: its file dependencies plus the baseline
    /// import, sorted, never including `file` itself.
    pub fn import_set(&self, file: &str) -> Vec<String> {
        let mut imports: BTreeSet<&str> = self.files.dependencies(file).collect();
        imports.insert(&self.baseline_import);
        imports.remove(file);
        imports.into_iter().map(str::to_string).collect()
    }

    /// [`DependencyGraph::import_set`] rendered as import directives.
    pub fn import_statements(&self, file: &str) -> Vec<String> {
        self.import_set(file)
            .iter()
            .map(|import| format!("import '{import}';"))
            .collect()
    }

    pub fn type_dependencies(&self, type_name: &str) -> impl Iterator<Item = &str> {
        self.types.dependencies(type_name)
    }

    pub fn file_dependencies(&self, file: &str) -> impl Iterator<Item = &str> {
        self.files.dependencies(file)
    }

    pub fn file_of(&self, type_name: &str) -> Option<&str> {
        self.type_to_file.get(type_name).map(String::as_str)
    }

    /// Types that are defined or referenced but have no output file.
    pub fn unassigned_types(&self) -> impl Iterator<Item = &str> {
        self.unassigned.iter().map(String::as_str)
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            files: self.files.degree_stats(),
            types: self.types.degree_stats(),
        }
    }

    /// Collects circular file pairs and unassigned types as warnings.
    pub fn validate(&self) -> Vec<GraphWarning> {
        let mut warnings: Vec<GraphWarning> = self
            .detect_cycles()
            .into_iter()
            .map(|(a, b)| GraphWarning::CircularDependency { a, b })
            .collect();
        warnings.extend(self.unassigned.iter().map(|t| GraphWarning::UnassignedType {
            type_name: t.clone(),
        }));
        for warning in &warnings {
            warn!(%warning, "Dependency graph validation.");
        }
        warnings
    }
}

/// Builds type and file dependency graphs from parsed files.
///
/// Holds no state between runs; every call to
/// [`DependencyResolver::build_graph`] starts from scratch.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver<N = PrefixNaming> {
    naming: N,
    config: ResolverConfig,
}

impl<N: TypeNaming> DependencyResolver<N> {
    pub fn new(naming: N, config: ResolverConfig) -> Self {
        DependencyResolver { naming, config }
    }

    pub fn build_graph<A: TypeAssignment + ?Sized>(
        &self,
        files: &[File],
        assignment: &A,
    ) -> DependencyGraph {
        let mut graph = DependencyGraph {
            baseline_import: self.config.baseline_import.clone(),
            ..DependencyGraph::default()
        };

        // Every defined type is a node; assigned files are file nodes.
        for def in files.iter().flat_map(|f| &f.definitions).filter(|d| d.is_type()) {
            let class = self.naming.class_name(def.name());
            graph.types.add_node(&class);
            match assignment.file_for(&class) {
                Some(file) => {
                    graph.files.add_node(file);
                    graph.type_to_file.insert(class, file.to_string());
                }
                None => {
                    debug!(type_name = %class, "Type has no file assignment.");
                    graph.unassigned.insert(class);
                }
            }
        }

        for def in files.iter().flat_map(|f| &f.definitions) {
            let references = referenced_types(def);
            if references.is_empty() {
                continue;
            }
            let class = self.naming.class_name(def.name());
            let source_file = assignment.file_for(&class);

            for reference in references {
                let target = self.naming.class_name(reference);
                if target == class {
                    continue;
                }
                graph.types.add_edge(&class, &target);
                match assignment.file_for(&target) {
                    Some(target_file) => {
                        if let Some(source_file) = source_file {
                            graph.files.add_edge(source_file, target_file);
                        }
                    }
                    None => {
                        graph.unassigned.insert(target);
                    }
                }
            }
        }

        debug!(
            types = graph.types.node_count(),
            type_edges = graph.types.edge_count(),
            files = graph.files.node_count(),
            file_edges = graph.files.edge_count(),
            "Built dependency graph."
        );
        graph
    }
}

/// IDL names of the non-primitive types a definition refers to, excluding
/// its own name.
pub fn referenced_types(def: &Definition) -> BTreeSet<&str> {
    let mut names = BTreeSet::new();
    match def {
        Definition::Constant(_) | Definition::Enum(_) => {}
        Definition::Typedef(typedef) => {
            names.insert(typedef.underlying.as_str());
        }
        Definition::Struct(s) => {
            names.extend(s.fields.iter().map(|f| f.type_name()));
        }
        Definition::Union(u) => {
            if let DiscriminantType::Named(name) = &u.discriminant.ty {
                names.insert(name.as_str());
            }
            names.extend(
                u.cases
                    .iter()
                    .filter_map(|c| c.field.as_ref())
                    .map(|f| f.type_name()),
            );
        }
    }
    names.retain(|name| *name != def.name() && Primitive::from_type_name(name).is_none());
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use rstest::rstest;

    fn assignment(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(t, f)| (t.to_string(), f.to_string()))
            .collect()
    }

    fn identity() -> DependencyResolver<IdentityNaming> {
        DependencyResolver::new(IdentityNaming, ResolverConfig::default())
    }

    #[test]
    fn test_references_exclude_primitives_and_self() {
        let file = parse(
            "typedef opaque Hash[32];
             struct Node { int32 a; string s<>; Hash h; Node* next; unsigned hyper n; };
             union U switch (Kind k) { case A: Node node; case B: void; default: bool flag; };",
            "t.x",
        )
        .unwrap();
        let refs: Vec<_> = file.definitions.iter().map(referenced_types).collect();
        assert!(refs[0].is_empty());
        assert_eq!(refs[1], BTreeSet::from(["Hash"]));
        assert_eq!(refs[2], BTreeSet::from(["Kind", "Node"]));
    }

    #[test]
    fn test_prefix_naming() {
        let naming = PrefixNaming::default();
        assert_eq!(naming.class_name("Asset"), "XdrAsset");
        assert_eq!(naming.class_name("XdrAsset"), "XdrAsset");
    }

    #[test]
    fn test_build_graph_projects_type_edges_onto_files() {
        let files = vec![
            parse("struct A { B b; C c; }; struct C { int x; };", "a.x").unwrap(),
            parse("struct B { int y; };", "b.x").unwrap(),
        ];
        let assign = assignment(&[
            ("XdrA", "a.dart"),
            ("XdrB", "b.dart"),
            ("XdrC", "a.dart"),
        ]);
        let resolver = DependencyResolver::new(PrefixNaming::default(), ResolverConfig::default());
        let graph = resolver.build_graph(&files, &assign);

        let deps: Vec<_> = graph.type_dependencies("XdrA").collect();
        assert_eq!(deps, vec!["XdrB", "XdrC"]);
        let file_deps: Vec<_> = graph.file_dependencies("a.dart").collect();
        assert_eq!(file_deps, vec!["b.dart"]);
        assert_eq!(graph.file_dependencies("b.dart").count(), 0);
        assert_eq!(graph.file_of("XdrC"), Some("a.dart"));
        assert!(graph.validate().is_empty());
    }

    #[test]
    fn test_mutual_dependency_is_reported_and_blocks_ordering() {
        let files = vec![
            parse("struct A { B b; };", "a.x").unwrap(),
            parse("struct B { A* a; };", "b.x").unwrap(),
        ];
        let assign = assignment(&[("A", "a.dart"), ("B", "b.dart")]);
        let graph = identity().build_graph(&files, &assign);

        assert_eq!(
            graph.detect_cycles(),
            vec![("a.dart".to_string(), "b.dart".to_string())]
        );
        assert!(matches!(
            graph.topological_order(),
            Err(ResolveError::CircularDependency { .. })
        ));
        assert_eq!(
            graph.validate(),
            vec![GraphWarning::CircularDependency {
                a: "a.dart".to_string(),
                b: "b.dart".to_string()
            }]
        );
    }

    #[test]
    fn test_three_file_cycle_is_reported_exactly() {
        let mut graph = Graph::default();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");
        graph.add_edge("c", "a");
        graph.add_edge("d", "a");

        assert!(graph.detect_cycles().is_empty());
        assert_eq!(
            graph.find_cycle(),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        let err = graph.topological_order().unwrap_err();
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> c -> a");
    }

    #[rstest]
    #[case(&[("app", "model"), ("model", "base"), ("app", "base")])]
    #[case(&[("x", "y"), ("z", "y"), ("y", "w"), ("v", "w")])]
    #[case(&[])]
    fn test_topological_order_puts_dependencies_first(#[case] edges: &[(&str, &str)]) {
        let mut graph = Graph::default();
        graph.add_node("lonely");
        for (from, to) in edges {
            graph.add_edge(from, to);
        }
        let order = graph.topological_order().unwrap();
        assert_eq!(order.len(), graph.node_count());
        let index = |n: &str| order.iter().position(|o| o == n).unwrap();
        for (from, to) in edges {
            assert!(index(*to) < index(*from), "{to} must precede {from} in {order:?}");
        }
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn test_topological_order_is_deterministic() {
        let mut graph = Graph::default();
        for node in ["c", "b", "a"] {
            graph.add_node(node);
        }
        graph.add_edge("a", "c");
        assert_eq!(graph.topological_order().unwrap(), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_import_set_includes_baseline_and_excludes_self() {
        let files = vec![parse(
            "struct A { B b; C c; }; struct B { int x; }; struct C { int y; };",
            "a.x",
        )
        .unwrap()];
        let assign = assignment(&[
            ("A", "ledger.dart"),
            ("B", "asset.dart"),
            ("C", "ledger.dart"),
        ]);
        let graph = identity().build_graph(&files, &assign);
        assert_eq!(
            graph.import_set("ledger.dart"),
            vec!["asset.dart", "xdr_data_io.dart"]
        );
        assert_eq!(graph.import_set("asset.dart"), vec!["xdr_data_io.dart"]);
        assert_eq!(
            graph.import_statements("ledger.dart"),
            vec!["import 'asset.dart';", "import 'xdr_data_io.dart';"]
        );

        let custom = DependencyResolver::new(
            IdentityNaming,
            ResolverConfig {
                baseline_import: "asset.dart".to_string(),
            },
        )
        .build_graph(&files, &assign);
        assert!(custom.import_set("asset.dart").is_empty());
    }

    #[test]
    fn test_unassigned_types_are_collected() {
        let files = vec![parse("struct A { Missing m; }; struct Orphan { int x; };", "a.x").unwrap()];
        let assign = assignment(&[("A", "a.dart")]);
        let graph = identity().build_graph(&files, &assign);
        let unassigned: Vec<_> = graph.unassigned_types().collect();
        assert_eq!(unassigned, vec!["Missing", "Orphan"]);
        assert_eq!(
            graph.validate()[0].to_string(),
            "Type 'Missing' has no file assignment"
        );
    }

    #[test]
    fn test_stats() {
        let mut graph = DependencyGraph::default();
        graph.files.add_edge("a", "b");
        graph.files.add_edge("a", "c");
        graph.files.add_node("d");
        let stats = graph.stats();
        assert_eq!(stats.files.total, 4);
        assert_eq!(stats.files.max_dependencies, 2);
        assert_eq!(stats.files.average_dependencies, 0.5);
        assert_eq!(stats.types.total, 0);
        assert_eq!(stats.types.average_dependencies, 0.0);
    }
}
