//! Undo action tree, ported from `document.h`/`document.cpp`'s
//! `AbstractUndoAction`/`ComplexAction`/`InsertAction`/`RemoveAction`.
//!
//! Rust has no class hierarchy to mirror `AbstractUndoAction`'s virtual
//! `undo`/`redo`, so the four concrete action kinds become one enum instead.
//! `UndoAction::Write` has no counterpart in the original, which always
//! decomposes an overwrite into a remove followed by an insert under one
//! `ComplexAction`; it is added here as a first-class variant since the
//! distilled data model names `Write` directly and this avoids rebuilding a
//! two-entry complex action for every single-span overwrite.

use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::chain::SpanChain;
use crate::error::{HexError, Result};

use super::Document;

static NEXT_BRANCH_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonic id generator for alternate-history branches, ported 1:1 from
/// `document.cpp`'s `generateBranchId`.
pub fn generate_branch_id() -> u64 {
	NEXT_BRANCH_ID.fetch_add(1, Ordering::Relaxed)
}

/// One recorded, reversible edit.
pub enum UndoAction {
	Insert { offset: u64, inserted: SpanChain },
	Remove { offset: u64, removed: SpanChain },
	Write { offset: u64, old: SpanChain, new: SpanChain },
	Complex(ComplexAction),
}

impl UndoAction {
	fn undo(&mut self, doc: &Document) -> Result<()> {
		match self {
			UndoAction::Insert { offset, inserted } => doc.remove_raw(*offset, inserted.length(), true).map(|_| ()),
			UndoAction::Remove { offset, removed } => doc.insert_chain_raw(*offset, removed.deep_clone(), true),
			UndoAction::Write { offset, old, new } => {
				doc.remove_raw(*offset, new.length(), true)?;
				doc.insert_chain_raw(*offset, old.deep_clone(), true)
			}
			UndoAction::Complex(complex) => complex.undo_all(doc),
		}
	}

	fn redo(&mut self, doc: &Document) -> Result<()> {
		match self {
			UndoAction::Insert { offset, inserted } => doc.insert_chain_raw(*offset, inserted.deep_clone(), false),
			UndoAction::Remove { offset, removed } => doc.remove_raw(*offset, removed.length(), false).map(|_| ()),
			UndoAction::Write { offset, old, new } => {
				doc.remove_raw(*offset, old.length(), false)?;
				doc.insert_chain_raw(*offset, new.deep_clone(), false)
			}
			UndoAction::Complex(complex) => complex.redo_all(doc),
		}
	}
}

/// A not-yet-undone tail of actions, set aside when a new action is recorded
/// partway through the undo stack. Kept reachable by id so `redo(branch_id)`
/// can switch to it instead of discarding it, matching the original's
/// alternate-history support.
pub struct Branch {
	pub id: u64,
	start_index: usize,
	actions: Vec<UndoAction>,
}

/// A group of actions undone/redone as a unit, and the undo stack's own
/// top-level container (`Document` keeps one un-nameable root `ComplexAction`
/// plus whatever nested ones `beginComplexAction`/`endComplexAction` open).
pub struct ComplexAction {
	pub title: Option<String>,
	actions: Vec<UndoAction>,
	current_step: usize,
	branches: Vec<Branch>,
}

impl ComplexAction {
	pub fn new(title: Option<String>) -> Self {
		Self {
			title,
			actions: Vec::new(),
			current_step: 0,
			branches: Vec::new(),
		}
	}

	pub fn can_undo(&self) -> bool {
		self.current_step > 0
	}

	pub fn can_redo(&self) -> bool {
		self.current_step < self.actions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.actions.is_empty()
	}

	/// Branch ids available for redo from the current position. Usually 0
	/// or 1 in practice, so this stays inline rather than heap-allocating.
	pub fn alternative_branch_ids(&self) -> SmallVec<[u64; 2]> {
		self.branches
			.iter()
			.filter(|b| b.start_index == self.current_step)
			.map(|b| b.id)
			.collect()
	}

	pub fn add_action(&mut self, action: UndoAction) {
		self.start_new_branch_if_needed();
		self.actions.push(action);
		self.current_step = self.actions.len();
	}

	/// When a new action is recorded while earlier undone actions are still
	/// sitting ahead of `current_step`, that tail becomes a named branch
	/// instead of being discarded. Ported from `_startNewBranch`, including
	/// the original's guard against branching on an empty tail.
	fn start_new_branch_if_needed(&mut self) {
		if self.current_step == self.actions.len() {
			return;
		}
		let tail = self.actions.split_off(self.current_step);
		if !tail.is_empty() {
			self.branches.push(Branch {
				id: generate_branch_id(),
				start_index: self.current_step,
				actions: tail,
			});
		}
	}

	pub fn undo(&mut self, doc: &Document) -> Result<()> {
		if self.current_step == 0 {
			return Err(HexError::document_state("nothing to undo"));
		}
		self.current_step -= 1;
		self.actions[self.current_step].undo(doc)
	}

	/// Redoes the next action. If `branch_id` is given and the current
	/// position is exactly a branch point, switches to that alternate
	/// history first (stashing whatever was ahead as its own branch).
	pub fn redo(&mut self, doc: &Document, branch_id: Option<u64>) -> Result<()> {
		if let Some(id) = branch_id {
			let pos = self
				.branches
				.iter()
				.position(|b| b.id == id && b.start_index == self.current_step)
				.ok_or_else(|| HexError::document_state("no such alternate branch at this position"))?;
			let branch = self.branches.remove(pos);
			let displaced = self.actions.split_off(branch.start_index);
			if !displaced.is_empty() {
				self.branches.push(Branch {
					id: generate_branch_id(),
					start_index: branch.start_index,
					actions: displaced,
				});
			}
			self.actions.extend(branch.actions);
		}
		if self.current_step >= self.actions.len() {
			return Err(HexError::document_state("nothing to redo"));
		}
		self.actions[self.current_step].redo(doc)?;
		self.current_step += 1;
		Ok(())
	}

	fn undo_all(&mut self, doc: &Document) -> Result<()> {
		while self.current_step > 0 {
			self.undo(doc)?;
		}
		Ok(())
	}

	fn redo_all(&mut self, doc: &Document) -> Result<()> {
		while self.current_step < self.actions.len() {
			self.redo(doc, None)?;
		}
		Ok(())
	}
}

/// Owns the root action plus whatever nested complex actions are currently
/// open via `beginComplexAction`.
pub struct UndoStack {
	root: ComplexAction,
	open: Vec<ComplexAction>,
}

impl UndoStack {
	pub fn new() -> Self {
		Self {
			root: ComplexAction::new(None),
			open: Vec::new(),
		}
	}

	pub fn record(&mut self, action: UndoAction) {
		match self.open.last_mut() {
			Some(current) => current.add_action(action),
			None => self.root.add_action(action),
		}
	}

	pub fn begin_complex(&mut self, title: Option<String>) {
		self.open.push(ComplexAction::new(title));
	}

	pub fn end_complex(&mut self) -> Result<()> {
		let finished = self
			.open
			.pop()
			.ok_or_else(|| HexError::document_state("endComplexAction with no matching beginComplexAction"))?;
		if finished.is_empty() {
			return Ok(());
		}
		self.record(UndoAction::Complex(finished));
		Ok(())
	}

	pub fn undo(&mut self, doc: &Document) -> Result<()> {
		self.root.undo(doc)
	}

	pub fn redo(&mut self, doc: &Document, branch_id: Option<u64>) -> Result<()> {
		self.root.redo(doc, branch_id)
	}

	pub fn can_undo(&self) -> bool {
		self.root.can_undo()
	}

	pub fn can_redo(&self) -> bool {
		self.root.can_redo()
	}

	pub fn alternative_branch_ids(&self) -> SmallVec<[u64; 2]> {
		self.root.alternative_branch_ids()
	}
}

impl Default for UndoStack {
	fn default() -> Self {
		Self::new()
	}
}
