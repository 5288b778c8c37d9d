//! The live test catalog.
//!
//! The catalog owns a strict four-level tree (package, file, suite, function)
//! plus an identity index from each node to its semantic data. Node identity
//! is derived purely from `(directory, package, file stem, receiver, function)`
//! so re-discovering the same file always lands on the same ids; only the
//! data attached to a node is replaced.
//!
//! ## Mutation rules
//!
//! - Discovery only ever adds nodes or refreshes their data. A file that
//!   parses to nothing leaves its existing node alone.
//! - `refresh_file` / `refresh_package` clear a node's children first, then
//!   rediscover from disk.
//! - Empty packages, files and suites are transient: `prune_empty` removes
//!   them bottom-up, and every watch event ends with a prune.
//! - Structural mutations are not reentrant; callers issue one at a time.
//!
//! Every structural change bumps [`TestCatalog::revision`]. Test outcomes are
//! annotations recorded next to the tree and never change its shape.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{SuiteError, SuiteResult};
use crate::library::{LibraryAdapter, TestLibrary};
use crate::parser::{self, Declaration, SourceRange};
use crate::scan;

// ============================================================================
// Identity
// ============================================================================

/// Stable identifier of a catalog node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn package(directory: &Path, name: &str) -> Self {
        NodeId(format!("{}:{}", directory.display(), name))
    }

    fn child(&self, key: &str) -> Self {
        NodeId(format!("{}/{}", self.0, key))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

/// The four node variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Package,
    File,
    Suite,
    Function,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Package => write!(f, "package"),
            NodeKind::File => write!(f, "file"),
            NodeKind::Suite => write!(f, "suite"),
            NodeKind::Function => write!(f, "function"),
        }
    }
}

// ============================================================================
// Tree and Index
// ============================================================================

/// A node in the catalog tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Directory for packages, file path for everything else.
    pub path: PathBuf,
    pub range: Option<SourceRange>,
}

/// Semantic data attached to a node through the identity index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Package {
        directory: PathBuf,
        name: String,
    },
    File {
        path: PathBuf,
        package: String,
    },
    /// Carries the first declaration discovered for the receiver.
    Suite {
        path: PathBuf,
        declaration: Declaration,
    },
    Function {
        path: PathBuf,
        declaration: Declaration,
    },
}

impl NodeData {
    /// Declaration for suites and functions.
    pub fn declaration(&self) -> Option<&Declaration> {
        match self {
            NodeData::Suite { declaration, .. } | NodeData::Function { declaration, .. } => {
                Some(declaration)
            }
            _ => None,
        }
    }

    /// Directory the node's tests run in.
    pub fn directory(&self) -> PathBuf {
        match self {
            NodeData::Package { directory, .. } => directory.clone(),
            NodeData::File { path, .. }
            | NodeData::Suite { path, .. }
            | NodeData::Function { path, .. } => {
                path.parent().map(Path::to_path_buf).unwrap_or_default()
            }
        }
    }
}

/// Terminal result recorded for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Passed,
    Failed,
    Skipped,
    Errored,
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Passed => write!(f, "passed"),
            TestOutcome::Failed => write!(f, "failed"),
            TestOutcome::Skipped => write!(f, "skipped"),
            TestOutcome::Errored => write!(f, "errored"),
        }
    }
}

/// A filesystem change relevant to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "path", rename_all = "lowercase")]
pub enum WatchEvent {
    Created(PathBuf),
    Changed(PathBuf),
    Deleted(PathBuf),
}

/// Result of a full rescan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RescanSummary {
    pub files_listed: usize,
    pub files_with_tests: usize,
    pub cancelled: bool,
}

/// Owned, nested view of the tree for display and serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TestOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeEntry>,
}

// ============================================================================
// Catalog
// ============================================================================

/// Hierarchical, incrementally updated test catalog.
#[derive(Debug)]
pub struct TestCatalog {
    roots: Vec<PathBuf>,
    libraries: Vec<TestLibrary>,
    packages: Vec<NodeId>,
    nodes: HashMap<NodeId, CatalogNode>,
    index: HashMap<NodeId, NodeData>,
    outcomes: HashMap<NodeId, TestOutcome>,
    revision: u64,
}

impl TestCatalog {
    /// Empty catalog over the given workspace roots and enabled libraries.
    pub fn new(roots: Vec<PathBuf>, libraries: Vec<TestLibrary>) -> Self {
        TestCatalog {
            roots,
            libraries,
            packages: Vec::new(),
            nodes: HashMap::new(),
            index: HashMap::new(),
            outcomes: HashMap::new(),
            revision: 0,
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Monotonic counter bumped once per structural change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Package nodes in discovery order.
    pub fn packages(&self) -> &[NodeId] {
        &self.packages
    }

    pub fn node(&self, id: &NodeId) -> Option<&CatalogNode> {
        self.nodes.get(id)
    }

    pub fn data(&self, id: &NodeId) -> Option<&NodeData> {
        self.index.get(id)
    }

    pub fn children(&self, id: &NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn outcome(&self, id: &NodeId) -> Option<TestOutcome> {
        self.outcomes.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The File node discovered for `path`, if any.
    pub fn find_file(&self, path: &Path) -> Option<&NodeId> {
        self.index.iter().find_map(|(id, data)| match data {
            NodeData::File { path: p, .. } if p == path => Some(id),
            _ => None,
        })
    }

    /// Function nodes beneath `id` in tree order (`id` itself if it is one).
    pub fn function_descendants(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_functions(id, &mut out);
        out
    }

    fn collect_functions(&self, id: &NodeId, out: &mut Vec<NodeId>) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        if node.kind == NodeKind::Function {
            out.push(id.clone());
            return;
        }
        for child in &node.children {
            self.collect_functions(child, out);
        }
    }

    /// Nested snapshot of the whole tree.
    pub fn tree(&self) -> Vec<TreeEntry> {
        self.packages.iter().filter_map(|id| self.entry(id)).collect()
    }

    fn entry(&self, id: &NodeId) -> Option<TreeEntry> {
        let node = self.nodes.get(id)?;
        Some(TreeEntry {
            id: node.id.clone(),
            kind: node.kind,
            label: node.label.clone(),
            outcome: self.outcome(id),
            children: node.children.iter().filter_map(|c| self.entry(c)).collect(),
        })
    }

    // ------------------------------------------------------------------------
    // Result annotations
    // ------------------------------------------------------------------------

    /// Record a terminal outcome. Returns false when the node no longer exists.
    pub fn record_outcome(&mut self, id: &NodeId, outcome: TestOutcome) -> bool {
        if !self.nodes.contains_key(id) {
            return false;
        }
        self.outcomes.insert(id.clone(), outcome);
        true
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    /// Discover declarations in one file and merge them into the tree.
    ///
    /// `content` is an already-open document snapshot; without it the file is
    /// read from disk. Returns true when the tree changed.
    pub fn discover_in_file(&mut self, path: &Path, content: Option<&str>) -> bool {
        if !scan::is_candidate_file(path, &self.roots) {
            debug!(path = ?path, "not a candidate test file");
            return false;
        }

        let owned;
        let content = match content {
            Some(content) => content,
            None => match fs::read_to_string(path) {
                Ok(text) => {
                    owned = text;
                    owned.as_str()
                }
                Err(e) => {
                    warn!(path = ?path, error = %e, "failed to read test file");
                    return false;
                }
            },
        };

        let lines = parser::split_lines(content);
        let Some(package) = parser::parse_package_name(&lines) else {
            debug!(path = ?path, "no package statement");
            return false;
        };

        let mut declarations: Vec<Declaration> = self
            .libraries
            .iter()
            .flat_map(|library| library.discover_test_functions(content))
            .collect();
        if declarations.is_empty() {
            return false;
        }
        declarations.sort_by_key(|d| d.line_number);

        let changed = self.merge_declarations(path, &package.name, &declarations);
        if changed {
            self.revision += 1;
            debug!(path = ?path, tests = declarations.len(), "catalog updated");
        }
        changed
    }

    fn merge_declarations(&mut self, path: &Path, package: &str, declarations: &[Declaration]) -> bool {
        let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut changed = false;

        let package_id = NodeId::package(&directory, package);
        changed |= self.ensure_node(
            None,
            CatalogNode {
                id: package_id.clone(),
                kind: NodeKind::Package,
                label: package.to_string(),
                parent: None,
                children: Vec::new(),
                path: directory.clone(),
                range: None,
            },
            NodeData::Package {
                directory: directory.clone(),
                name: package.to_string(),
            },
        );

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let label = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_id = package_id.child(&stem);
        changed |= self.ensure_node(
            Some(&package_id),
            CatalogNode {
                id: file_id.clone(),
                kind: NodeKind::File,
                label,
                parent: Some(package_id.clone()),
                children: Vec::new(),
                path: path.to_path_buf(),
                range: None,
            },
            NodeData::File {
                path: path.to_path_buf(),
                package: package.to_string(),
            },
        );

        // Suites and receiverless functions share the names under a file. Go
        // rejects a type and a function with the same name in one package, so
        // the first declaration in line order keeps the name.
        for declaration in declarations {
            let parent_id = match &declaration.receiver_type {
                Some(receiver) => {
                    let suite_id = file_id.child(receiver);
                    if self.kind_of(&suite_id).is_some_and(|k| k != NodeKind::Suite) {
                        debug!(path = ?path, receiver = %receiver, "receiver name taken by a function, skipping");
                        continue;
                    }
                    changed |= self.ensure_node(
                        Some(&file_id),
                        CatalogNode {
                            id: suite_id.clone(),
                            kind: NodeKind::Suite,
                            label: receiver.clone(),
                            parent: Some(file_id.clone()),
                            children: Vec::new(),
                            path: path.to_path_buf(),
                            range: Some(declaration.range),
                        },
                        NodeData::Suite {
                            path: path.to_path_buf(),
                            declaration: declaration.clone(),
                        },
                    );
                    suite_id
                }
                None => file_id.clone(),
            };

            let function_id = parent_id.child(&declaration.qualified_name());
            if self.kind_of(&function_id).is_some_and(|k| k != NodeKind::Function) {
                debug!(path = ?path, function = %declaration.function_name, "function name taken by a suite, skipping");
                continue;
            }
            let data = NodeData::Function {
                path: path.to_path_buf(),
                declaration: declaration.clone(),
            };
            if self.index.get(&function_id) == Some(&data) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&function_id) {
                node.range = Some(declaration.range);
                self.index.insert(function_id, data);
                changed = true;
                continue;
            }
            changed |= self.ensure_node(
                Some(&parent_id),
                CatalogNode {
                    id: function_id.clone(),
                    kind: NodeKind::Function,
                    label: declaration.function_name.clone(),
                    parent: Some(parent_id.clone()),
                    children: Vec::new(),
                    path: path.to_path_buf(),
                    range: Some(declaration.range),
                },
                data,
            );
        }

        changed
    }

    fn kind_of(&self, id: &NodeId) -> Option<NodeKind> {
        self.nodes.get(id).map(|n| n.kind)
    }

    /// Insert `node` under `parent` unless its id already exists.
    fn ensure_node(&mut self, parent: Option<&NodeId>, node: CatalogNode, data: NodeData) -> bool {
        if self.nodes.contains_key(&node.id) {
            return false;
        }
        let id = node.id.clone();
        match parent {
            Some(parent) => match self.nodes.get_mut(parent) {
                Some(parent) => parent.children.push(id.clone()),
                None => return false,
            },
            None => self.packages.push(id.clone()),
        }
        self.nodes.insert(id.clone(), node);
        self.index.insert(id, data);
        true
    }

    // ------------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------------

    /// Remove `id` and its subtree, detaching it from its parent.
    fn remove_subtree(&mut self, id: &NodeId) -> bool {
        let parent = match self.nodes.get(id) {
            Some(node) => node.parent.clone(),
            None => return false,
        };
        match parent {
            Some(parent) => {
                if let Some(parent) = self.nodes.get_mut(&parent) {
                    parent.children.retain(|c| c != id);
                }
            }
            None => self.packages.retain(|p| p != id),
        }
        self.drop_node(id);
        true
    }

    fn drop_node(&mut self, id: &NodeId) {
        if let Some(node) = self.nodes.remove(id) {
            for child in &node.children {
                self.drop_node(child);
            }
        }
        self.index.remove(id);
        self.outcomes.remove(id);
    }

    /// Remove every child of `id`. Returns true when anything was removed.
    fn clear_children(&mut self, id: &NodeId) -> bool {
        let children = match self.nodes.get_mut(id) {
            Some(node) => std::mem::take(&mut node.children),
            None => return false,
        };
        for child in &children {
            self.drop_node(child);
        }
        !children.is_empty()
    }

    /// Remove empty suites and files, then empty packages.
    ///
    /// Returns the number of nodes removed.
    pub fn prune_empty(&mut self) -> usize {
        let mut removed = 0;
        for kind in [NodeKind::Suite, NodeKind::File, NodeKind::Package] {
            let empty: Vec<NodeId> = self
                .nodes
                .values()
                .filter(|n| n.kind == kind && n.children.is_empty())
                .map(|n| n.id.clone())
                .collect();
            for id in empty {
                if self.remove_subtree(&id) {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            self.revision += 1;
            debug!(removed, "pruned empty catalog nodes");
        }
        removed
    }

    /// Remove every File node at `path` or beneath it (for directory deletes).
    pub fn remove_path(&mut self, path: &Path) -> bool {
        let doomed: Vec<NodeId> = self
            .index
            .iter()
            .filter_map(|(id, data)| match data {
                NodeData::File { path: p, .. } if p.starts_with(path) => Some(id.clone()),
                _ => None,
            })
            .collect();
        let mut changed = false;
        for id in doomed {
            changed |= self.remove_subtree(&id);
        }
        if changed {
            self.revision += 1;
        }
        changed
    }

    /// Drop the whole tree.
    pub fn clear(&mut self) {
        let had_nodes = !self.nodes.is_empty();
        self.packages.clear();
        self.nodes.clear();
        self.index.clear();
        self.outcomes.clear();
        if had_nodes {
            self.revision += 1;
        }
    }

    // ------------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------------

    fn expect_kind(&self, id: &NodeId, expected: NodeKind) -> SuiteResult<&NodeData> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| SuiteError::NodeNotFound { id: id.clone() })?;
        if node.kind != expected {
            return Err(SuiteError::UnexpectedNodeKind {
                id: id.clone(),
                expected,
                actual: node.kind,
            });
        }
        self.index
            .get(id)
            .ok_or_else(|| SuiteError::NodeNotFound { id: id.clone() })
    }

    /// Clear a File node's children and rediscover the file from disk.
    ///
    /// Nodes left empty afterwards are pruned.
    pub fn refresh_file(&mut self, id: &NodeId) -> SuiteResult<bool> {
        let path = match self.expect_kind(id, NodeKind::File)? {
            NodeData::File { path, .. } => path.clone(),
            _ => return Err(SuiteError::NodeNotFound { id: id.clone() }),
        };
        let cleared = self.clear_children(id);
        if cleared {
            self.revision += 1;
        }
        let discovered = self.discover_in_file(&path, None);
        let pruned = self.prune_empty() > 0;
        Ok(cleared || discovered || pruned)
    }

    /// Clear a Package node's children and rediscover every file in its directory.
    ///
    /// When the directory can no longer be read the package is removed and
    /// the read error is returned.
    pub fn refresh_package(&mut self, id: &NodeId) -> SuiteResult<bool> {
        let directory = match self.expect_kind(id, NodeKind::Package)? {
            NodeData::Package { directory, .. } => directory.clone(),
            _ => return Err(SuiteError::NodeNotFound { id: id.clone() }),
        };

        let entries = match fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(directory = ?directory, error = %e, "package directory unreadable, removing package");
                if self.remove_subtree(id) {
                    self.revision += 1;
                }
                return Err(SuiteError::io(&directory, e));
            }
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        let cleared = self.clear_children(id);
        if cleared {
            self.revision += 1;
        }

        let mut discovered = false;
        for file in files {
            discovered |= self.discover_in_file(&file, None);
        }
        let pruned = self.prune_empty() > 0;
        Ok(cleared || discovered || pruned)
    }

    // ------------------------------------------------------------------------
    // Full rescan and watch events
    // ------------------------------------------------------------------------

    /// Clear the tree and rediscover every root.
    ///
    /// `is_cancelled` is polled while listing and between files; when it
    /// fires the partially populated tree is kept.
    pub fn full_rescan(&mut self, is_cancelled: &dyn Fn() -> bool) -> RescanSummary {
        self.clear();
        let mut summary = RescanSummary::default();

        for root in self.roots.clone() {
            let listing = scan::list_candidate_files(&root, is_cancelled);
            summary.files_listed += listing.files.len();

            for file in &listing.files {
                if is_cancelled() {
                    summary.cancelled = true;
                    break;
                }
                if self.discover_in_file(file, None) {
                    summary.files_with_tests += 1;
                }
            }

            if listing.cancelled || summary.cancelled {
                summary.cancelled = true;
                info!(root = ?root, "rescan cancelled");
                break;
            }
        }

        info!(
            files = summary.files_listed,
            with_tests = summary.files_with_tests,
            packages = self.packages.len(),
            "rescan finished"
        );
        summary
    }

    /// Apply one filesystem event, then prune. Returns true when the tree changed.
    pub fn apply_watch_event(&mut self, event: &WatchEvent) -> bool {
        let changed = match event {
            WatchEvent::Created(path) if path.is_dir() => {
                let listing = scan::list_candidate_files(path, &|| false);
                let mut changed = false;
                for file in &listing.files {
                    if scan::is_candidate_file(file, &self.roots) {
                        changed |= self.discover_in_file(file, None);
                    }
                }
                changed
            }
            WatchEvent::Created(path) => self.discover_in_file(path, None),
            WatchEvent::Changed(path) => match self.find_file(path).cloned() {
                Some(id) => match self.refresh_file(&id) {
                    Ok(changed) => changed,
                    Err(e) => {
                        warn!(path = ?path, error = %e, "failed to refresh file");
                        false
                    }
                },
                None => self.discover_in_file(path, None),
            },
            WatchEvent::Deleted(path) => self.remove_path(path),
        };
        let pruned = self.prune_empty() > 0;
        changed || pruned
    }
}
