//! Builds the ordered set of pass instances for one run.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use xeno_worker::panic_message;

use crate::dirty::{DirtyScope, DirtyScopeTracker};
use crate::error::DaemonError;
use crate::pass::{HighlightingPass, PassBinding, PassFactory, PassState, PassTarget};
use crate::registry::FactoryRegistry;
use crate::types::{DocumentHandle, DocumentId, EditorId, PassId};

/// One document and the editors showing it, preferred editor first.
#[derive(Debug, Clone)]
pub struct BuildTarget {
	pub document: DocumentHandle,
	pub editors: Vec<EditorId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
	/// A heavy operation is running: only dumb-aware passes are instantiated.
	pub heavy_mode: bool,
	/// Every non-general pass waits for the general pass.
	pub serialize_passes: bool,
}

pub struct PassInstance {
	pub id: PassId,
	pub name: Arc<str>,
	pub document: DocumentId,
	pub editor: EditorId,
	pub depends_on: Vec<PassId>,
	pub priority: i32,
	pub registration_order: usize,
	pub general: bool,
	pub scope: DirtyScope,
	pub state: PassState,
	pub(crate) binding: PassBinding,
	pub(crate) editor_rank: usize,
	/// Positions (within the document's ordered list) this instance waits for.
	pub(crate) after: Vec<usize>,
	pub(crate) pass: Box<dyn HighlightingPass>,
}

impl fmt::Debug for PassInstance {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PassInstance")
			.field("id", &self.id)
			.field("name", &self.name)
			.field("document", &self.document)
			.field("editor", &self.editor)
			.field("depends_on", &self.depends_on)
			.field("priority", &self.priority)
			.field("general", &self.general)
			.field("scope", &self.scope)
			.field("state", &self.state)
			.field("after", &self.after)
			.finish_non_exhaustive()
	}
}

impl PassInstance {
	fn sort_key(&self) -> (bool, i32, usize, usize) {
		(!self.general, self.priority, self.editor_rank, self.registration_order)
	}
}

/// Pass instances of one document in commit order.
#[derive(Debug)]
pub struct DocumentPasses {
	pub document: DocumentId,
	/// Document stamp the run computes against.
	pub stamp: u64,
	pub instances: Vec<PassInstance>,
}

#[derive(Debug, Default)]
pub struct PassGraph {
	documents: Vec<DocumentPasses>,
	failures: Vec<DaemonError>,
	dropped_for_heavy: usize,
}

impl PassGraph {
	/// Instantiates and orders passes for every target.
	///
	/// Passes in `ignore`, passes whose scope is clean, and (in heavy mode)
	/// passes that are not dumb-aware are skipped. A failing factory skips
	/// only its own pass and is reported through [`Self::failures`].
	pub fn build(
		registry: &dyn FactoryRegistry,
		tracker: &DirtyScopeTracker,
		targets: &[BuildTarget],
		ignore: &[PassId],
		options: BuildOptions,
	) -> PassGraph {
		let mut graph = PassGraph::default();
		for target in targets {
			let doc = &target.document;
			let factories = registry.factories_for(&doc.kind);
			let mut nodes = Vec::new();

			for (editor_rank, &editor) in target.editors.iter().enumerate() {
				for (order, factory) in factories.iter().enumerate() {
					let id = factory.id();
					if ignore.contains(&id) || (factory.binding() == PassBinding::Document && editor_rank > 0) {
						continue;
					}
					let scope = tracker.scope(doc.id, id).unwrap_or(DirtyScope::Whole);
					if scope.is_clean() {
						continue;
					}
					if options.heavy_mode && !factory.is_dumb_aware() {
						graph.dropped_for_heavy += 1;
						continue;
					}
					let target = PassTarget { document: doc, editor, scope };
					match instantiate(factory.as_ref(), &target) {
						Ok(Some(pass)) => nodes.push(PassInstance {
							id,
							name: Arc::from(factory.name()),
							document: doc.id,
							editor,
							depends_on: factory.depends_on().to_vec(),
							priority: factory.priority(),
							registration_order: order,
							general: factory.is_general(),
							scope,
							state: PassState::Pending,
							binding: factory.binding(),
							editor_rank,
							after: Vec::new(),
							pass,
						}),
						Ok(None) => {}
						Err(message) => {
							tracing::warn!(pass = id.0, name = factory.name(), doc = doc.id.0, %message, "daemon.graph.instantiate_failed");
							graph.failures.push(DaemonError::PassInstantiation {
								pass: id,
								name: factory.name().to_string(),
								document: doc.id,
								message,
							});
						}
					}
				}
			}

			if nodes.is_empty() {
				continue;
			}
			let stamp = tracker.stamp(doc.id).unwrap_or(doc.stamp);
			graph.documents.push(DocumentPasses {
				document: doc.id,
				stamp,
				instances: order_instances(nodes, options.serialize_passes),
			});
		}

		if graph.dropped_for_heavy > 0 {
			tracing::debug!(dropped = graph.dropped_for_heavy, "daemon.graph.heavy_mode_drop");
		}
		graph
	}

	pub fn is_empty(&self) -> bool {
		self.documents.iter().all(|d| d.instances.is_empty())
	}

	/// Total number of pass instances.
	pub fn len(&self) -> usize {
		self.documents.iter().map(|d| d.instances.len()).sum()
	}

	pub fn documents(&self) -> &[DocumentPasses] {
		&self.documents
	}

	/// `(pass, editor)` pairs of `doc` in commit order.
	pub fn ordered(&self, doc: DocumentId) -> Vec<(PassId, EditorId)> {
		self.documents
			.iter()
			.filter(|d| d.document == doc)
			.flat_map(|d| d.instances.iter().map(|i| (i.id, i.editor)))
			.collect()
	}

	pub fn failures(&self) -> &[DaemonError] {
		&self.failures
	}

	pub fn take_failures(&mut self) -> Vec<DaemonError> {
		std::mem::take(&mut self.failures)
	}

	/// Number of instances skipped because a heavy operation was running.
	pub fn dropped_for_heavy(&self) -> usize {
		self.dropped_for_heavy
	}

	pub(crate) fn into_documents(self) -> Vec<DocumentPasses> {
		self.documents
	}
}

fn instantiate(factory: &dyn PassFactory, target: &PassTarget<'_>) -> Result<Option<Box<dyn HighlightingPass>>, String> {
	match std::panic::catch_unwind(AssertUnwindSafe(|| factory.create(target))) {
		Ok(Ok(pass)) => Ok(pass),
		Ok(Err(err)) => Err(format!("{err:#}")),
		Err(payload) => Err(format!("factory panicked: {}", panic_message(payload.as_ref()))),
	}
}

/// Topologically orders one document's instances.
///
/// Ready instances are taken general first, then by priority, editor rank and
/// registration order. A cycle is broken by forcing the smallest remaining
/// instance, and edges that would point forward are dropped.
fn order_instances(mut nodes: Vec<PassInstance>, serialize: bool) -> Vec<PassInstance> {
	let n = nodes.len();
	let general_ids: Vec<PassId> = nodes.iter().filter(|i| i.general).map(|i| i.id).collect();

	let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];
	for (idx, node) in nodes.iter().enumerate() {
		if node.general {
			continue;
		}
		let mut wanted = node.depends_on.clone();
		if serialize {
			wanted.extend(general_ids.iter().copied());
		}
		for dep in wanted {
			let found = nodes.iter().enumerate().find(|(j, other)| {
				*j != idx && other.id == dep && (other.editor == node.editor || other.binding == PassBinding::Document)
			});
			match found {
				Some((j, _)) if !edges[idx].contains(&j) => edges[idx].push(j),
				Some(_) => {}
				None => tracing::trace!(pass = node.id.0, dep = dep.0, "daemon.graph.absent_dependency"),
			}
		}
	}

	let mut indegree: Vec<usize> = edges.iter().map(Vec::len).collect();
	let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
	for (idx, deps) in edges.iter().enumerate() {
		for &dep in deps {
			dependents[dep].push(idx);
		}
	}

	let mut ready = BinaryHeap::new();
	for (idx, node) in nodes.iter().enumerate() {
		if indegree[idx] == 0 {
			ready.push(Reverse((node.sort_key(), idx)));
		}
	}

	let mut placed = vec![false; n];
	let mut sorted = Vec::with_capacity(n);
	while sorted.len() < n {
		let next = match ready.pop() {
			Some(Reverse((_, idx))) => idx,
			None => {
				let Some(idx) = (0..n).filter(|i| !placed[*i]).min_by_key(|i| (nodes[*i].sort_key(), *i)) else {
					break;
				};
				tracing::warn!(pass = nodes[idx].id.0, name = %nodes[idx].name, doc = nodes[idx].document.0, "daemon.graph.cycle_broken");
				idx
			}
		};
		if placed[next] {
			continue;
		}
		placed[next] = true;
		sorted.push(next);
		for &dependent in &dependents[next] {
			indegree[dependent] = indegree[dependent].saturating_sub(1);
			if indegree[dependent] == 0 && !placed[dependent] {
				ready.push(Reverse((nodes[dependent].sort_key(), dependent)));
			}
		}
	}

	let mut position = vec![0; n];
	for (pos, &idx) in sorted.iter().enumerate() {
		position[idx] = pos;
	}
	for (idx, deps) in edges.into_iter().enumerate() {
		let mut after: Vec<usize> = deps.into_iter().map(|d| position[d]).filter(|&p| p < position[idx]).collect();
		after.sort_unstable();
		nodes[idx].after = after;
	}

	let mut slots: Vec<Option<PassInstance>> = nodes.into_iter().map(Some).collect();
	sorted.into_iter().filter_map(|idx| slots[idx].take()).collect()
}
