//! Client board engine: a pure `(state, event) -> state` reducer.
//!
//! DESIGN
//! ======
//! `BoardState::apply` consumes the current state and returns the next one.
//! The live element list is an immutable `Arc<[Element]>`; every change
//! builds a fresh slice, so snapshots already handed to the history stack or
//! to the network layer are never mutated underneath their holders.
//!
//! Commit boundaries (pointer-up after drawing or erasing, text commit) push
//! exactly one history entry. Intermediate pointer moves only touch the live
//! list, which keeps undo at gesture granularity.
//!
//! Remote merges fold into the live list without pushing history. Whether
//! they also reset the undo stack is a `HistoryPolicy` choice. Undo and redo
//! apply the difference between two history entries to the live list, so
//! remote elements merged in between survive a local undo.
//!
//! Peer streams never enter the live list. Each sender's uncommitted gesture
//! is kept as a `Preview` and only `view` draws it; commits and history see
//! `elements` alone. A preview goes away when its sender commits, when the
//! sender leaves, or when a durable update covers what it showed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::client::hit::is_point_near_element;
use crate::client::history::{DEFAULT_MAX_DEPTH, History, Snapshot};
use crate::element::{Element, ElementId, ElementKind, Point, Style};
use crate::merge::{merge, merge_with_removals, reconcile_snapshot, sorted};

// =============================================================================
// TYPES
// =============================================================================

/// Active drawing tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Line,
    Rectangle,
    Circle,
    Arrow,
    Brush,
    Text,
    Eraser,
}

impl Tool {
    /// Element kind a pointer-down with this tool creates, if any.
    #[must_use]
    pub fn element_kind(self) -> Option<ElementKind> {
        match self {
            Self::Line => Some(ElementKind::Line),
            Self::Rectangle => Some(ElementKind::Rectangle),
            Self::Circle => Some(ElementKind::Circle),
            Self::Arrow => Some(ElementKind::Arrow),
            Self::Brush => Some(ElementKind::Brush),
            Self::Text => Some(ElementKind::Text),
            Self::Eraser => None,
        }
    }
}

/// What the current pointer gesture is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolAction {
    None,
    Drawing,
    Erasing,
    Writing,
}

/// Where an update folded into the board came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Echo of this peer's own commit.
    Local,
    /// Another peer's edit.
    Remote,
}

/// How remote merges treat the local undo stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryPolicy {
    /// Remote updates replace the undo stack with the merged result.
    #[default]
    ResetOnRemote,
    /// Remote updates leave undo/redo context intact.
    Preserve,
}

impl HistoryPolicy {
    /// Parse `reset-on-remote` or `preserve`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reset-on-remote" | "reset" => Some(Self::ResetOnRemote),
            "preserve" => Some(Self::Preserve),
            _ => None,
        }
    }
}

/// A peer's uncommitted gesture, drawn over the live list.
#[derive(Debug, Clone, Default)]
pub struct Preview {
    /// Elements the peer is drawing or reshaping.
    pub elements: Vec<Element>,
    /// Live elements the peer is erasing.
    pub hidden: Vec<ElementId>,
}

impl Preview {
    fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.hidden.is_empty()
    }
}

/// Input to the reducer.
#[derive(Debug, Clone)]
pub enum BoardEvent {
    SelectTool(Tool),
    /// `id` names the element a drawing tool creates; `ts` is the event time.
    PointerDown { at: Point, style: Style, id: ElementId, ts: i64 },
    PointerMove { at: Point, ts: i64 },
    PointerUp,
    CommitText { text: String, ts: i64 },
    Undo,
    Redo,
    /// Replace the live list, optionally resetting history to it.
    SetElements { elements: Vec<Element>, reset_history: bool },
    /// Authoritative full set: omitted ids are dropped, history resets.
    LoadSnapshot { elements: Vec<Element> },
    /// Fold in a partial update from the network.
    MergeRemote { elements: Vec<Element>, removed_ids: Vec<ElementId>, origin: Origin },
    /// A peer's in-progress element.
    PreviewElement { sender: String, element: Element },
    /// A peer's full set while erasing; replaces that peer's preview.
    PreviewSnapshot { sender: String, elements: Vec<Element>, removed_ids: Vec<ElementId> },
    /// Drop a peer's preview.
    ClearPreview { sender: String },
}

/// Local board state owned by one client.
#[derive(Debug, Clone)]
pub struct BoardState {
    tool: Tool,
    action: ToolAction,
    elements: Snapshot,
    history: History,
    drafting: Option<ElementId>,
    policy: HistoryPolicy,
    /// sender -> uncommitted gesture
    previews: BTreeMap<String, Preview>,
}

impl BoardState {
    #[must_use]
    pub fn new(policy: HistoryPolicy, max_history: usize) -> Self {
        let elements: Snapshot = Arc::from(Vec::new());
        Self {
            tool: Tool::Brush,
            action: ToolAction::None,
            history: History::new(Arc::clone(&elements), max_history),
            elements,
            drafting: None,
            policy,
            previews: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn tool(&self) -> Tool {
        self.tool
    }

    #[must_use]
    pub fn action(&self) -> ToolAction {
        self.action
    }

    #[must_use]
    pub fn elements(&self) -> &Snapshot {
        &self.elements
    }

    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    #[must_use]
    pub fn policy(&self) -> HistoryPolicy {
        self.policy
    }

    #[must_use]
    pub fn previews(&self) -> &BTreeMap<String, Preview> {
        &self.previews
    }

    /// Live elements with peer previews drawn over them. This is what a
    /// renderer shows.
    #[must_use]
    pub fn view(&self) -> Vec<Element> {
        if self.previews.is_empty() {
            return self.elements.to_vec();
        }
        let hidden: HashSet<&str> = self
            .previews
            .values()
            .flat_map(|p| p.hidden.iter().map(String::as_str))
            .collect();
        let base: Vec<Element> = self
            .elements
            .iter()
            .filter(|el| !hidden.contains(el.id.as_str()))
            .cloned()
            .collect();
        let overlay: Vec<Element> = self
            .previews
            .values()
            .flat_map(|p| p.elements.iter().cloned())
            .collect();
        merge(&base, &overlay)
    }

    /// The element the current gesture is creating.
    #[must_use]
    pub fn drafting(&self) -> Option<&Element> {
        let id = self.drafting.as_ref()?;
        self.elements.iter().find(|el| &el.id == id)
    }
}

impl Default for BoardState {
    fn default() -> Self {
        Self::new(HistoryPolicy::default(), DEFAULT_MAX_DEPTH)
    }
}

// =============================================================================
// REDUCER
// =============================================================================

impl BoardState {
    /// Apply one event and return the next state.
    #[must_use]
    pub fn apply(mut self, event: BoardEvent) -> Self {
        match event {
            BoardEvent::SelectTool(tool) => {
                self.tool = tool;
                self
            }
            BoardEvent::PointerDown { at, style, id, ts } => self.pointer_down(at, &style, id, ts),
            BoardEvent::PointerMove { at, ts } => self.pointer_move(at, ts),
            BoardEvent::PointerUp => self.pointer_up(),
            BoardEvent::CommitText { text, ts } => self.commit_text(text, ts),
            BoardEvent::Undo => {
                if self.action == ToolAction::None {
                    let from = self.history.current();
                    if let Some(to) = self.history.undo() {
                        self.apply_step(&from, &to);
                    }
                }
                self
            }
            BoardEvent::Redo => {
                if self.action == ToolAction::None {
                    let from = self.history.current();
                    if let Some(to) = self.history.redo() {
                        self.apply_step(&from, &to);
                    }
                }
                self
            }
            BoardEvent::SetElements { elements, reset_history } => {
                self.elements = elements.into();
                if reset_history {
                    self.history.reset(Arc::clone(&self.elements));
                }
                self.drop_stale_draft()
            }
            BoardEvent::LoadSnapshot { elements } => {
                self.elements = reconcile_snapshot(&self.elements, &elements).into();
                self.history.reset(Arc::clone(&self.elements));
                self.previews.clear();
                self.drop_stale_draft()
            }
            BoardEvent::MergeRemote { elements, removed_ids, origin } => {
                self.elements = merge_with_removals(&self.elements, &elements, &removed_ids).into();
                if origin == Origin::Remote && self.policy == HistoryPolicy::ResetOnRemote {
                    self.history.reset(Arc::clone(&self.elements));
                }
                self.settle_previews(&elements, &removed_ids);
                self.drop_stale_draft()
            }
            BoardEvent::PreviewElement { sender, element } => {
                let preview = self.previews.entry(sender).or_default();
                match preview.elements.iter_mut().find(|el| el.id == element.id) {
                    Some(existing) => *existing = element,
                    None => preview.elements.push(element),
                }
                self
            }
            BoardEvent::PreviewSnapshot { sender, elements, removed_ids } => {
                let live: HashMap<&str, &Element> = self.elements.iter().map(|el| (el.id.as_str(), el)).collect();
                let changed: Vec<Element> = elements
                    .into_iter()
                    .filter(|el| !live.get(el.id.as_str()).is_some_and(|cur| cur.same_content(el)))
                    .collect();
                let preview = Preview { elements: changed, hidden: removed_ids };
                if preview.is_empty() {
                    self.previews.remove(&sender);
                } else {
                    self.previews.insert(sender, preview);
                }
                self
            }
            BoardEvent::ClearPreview { sender } => {
                self.previews.remove(&sender);
                self
            }
        }
    }

    /// Move the live list from history entry `from` to `to`. Only what the
    /// step itself changed is touched.
    fn apply_step(&mut self, from: &[Element], to: &[Element]) {
        let before: HashMap<&str, &Element> = from.iter().map(|el| (el.id.as_str(), el)).collect();
        let after: HashSet<&str> = to.iter().map(|el| el.id.as_str()).collect();

        let mut next: Vec<Element> = self
            .elements
            .iter()
            .filter(|el| after.contains(el.id.as_str()) || !before.contains_key(el.id.as_str()))
            .cloned()
            .collect();
        for el in to {
            if before.get(el.id.as_str()).is_some_and(|prev| prev.same_content(el)) {
                continue;
            }
            match next.iter_mut().find(|cur| cur.id == el.id) {
                Some(cur) => *cur = el.clone(),
                None => next.push(el.clone()),
            }
        }
        self.elements = sorted(next).into();
    }

    /// A durable update supersedes whatever previews showed for its ids.
    fn settle_previews(&mut self, elements: &[Element], removed_ids: &[ElementId]) {
        let covered: HashSet<&str> = elements
            .iter()
            .map(|el| el.id.as_str())
            .chain(removed_ids.iter().map(String::as_str))
            .collect();
        for preview in self.previews.values_mut() {
            preview.elements.retain(|el| !covered.contains(el.id.as_str()));
            preview.hidden.retain(|id| !covered.contains(id.as_str()));
        }
        self.previews.retain(|_, preview| !preview.is_empty());
    }

    fn pointer_down(mut self, at: Point, style: &Style, id: ElementId, ts: i64) -> Self {
        if self.action == ToolAction::Writing {
            return self;
        }
        let Some(kind) = self.tool.element_kind() else {
            self.action = ToolAction::Erasing;
            return self;
        };

        let element = match kind {
            ElementKind::Brush => Element::brush(id, at, style, ts),
            ElementKind::Text => Element::text(id, at, style, ts),
            shape => Element::shape(id, shape, at, at, style, ts),
        };
        self.action = if kind == ElementKind::Text { ToolAction::Writing } else { ToolAction::Drawing };
        self.drafting = Some(element.id.clone());

        let mut next = self.elements.to_vec();
        next.push(element);
        self.elements = next.into();
        self
    }

    fn pointer_move(mut self, at: Point, ts: i64) -> Self {
        match self.action {
            ToolAction::Drawing => {
                let Some(id) = self.drafting.clone() else {
                    return self;
                };
                self.update_element(&id, |el| {
                    if el.kind == ElementKind::Brush {
                        el.points.get_or_insert_with(Vec::new).push(at);
                    } else {
                        el.x2 = Some(at.x);
                        el.y2 = Some(at.y);
                    }
                    el.updated_at = el.updated_at.max(ts);
                });
                self
            }
            ToolAction::Erasing => {
                if self.elements.iter().any(|el| is_point_near_element(el, at)) {
                    let kept: Vec<Element> = self
                        .elements
                        .iter()
                        .filter(|el| !is_point_near_element(el, at))
                        .cloned()
                        .collect();
                    self.elements = kept.into();
                }
                self
            }
            ToolAction::None | ToolAction::Writing => self,
        }
    }

    fn pointer_up(mut self) -> Self {
        match self.action {
            ToolAction::Drawing | ToolAction::Erasing => {
                self.history.push(Arc::clone(&self.elements));
                self.action = ToolAction::None;
                self.drafting = None;
                self
            }
            ToolAction::None | ToolAction::Writing => self,
        }
    }

    fn commit_text(mut self, text: String, ts: i64) -> Self {
        if self.action != ToolAction::Writing {
            return self;
        }
        if let Some(id) = self.drafting.take() {
            self.update_element(&id, |el| {
                el.text = Some(text);
                el.updated_at = el.updated_at.max(ts);
            });
        }
        self.history.push(Arc::clone(&self.elements));
        self.action = ToolAction::None;
        self
    }

    fn update_element(&mut self, id: &str, change: impl FnOnce(&mut Element)) {
        let mut next = self.elements.to_vec();
        if let Some(el) = next.iter_mut().find(|el| el.id == id) {
            change(el);
            self.elements = next.into();
        }
    }

    /// A remote tombstone or a replaced list can remove the element being drawn.
    fn drop_stale_draft(mut self) -> Self {
        if self.drafting.is_some() && self.drafting().is_none() {
            self.drafting = None;
            if matches!(self.action, ToolAction::Drawing | ToolAction::Writing) {
                self.action = ToolAction::None;
            }
        }
        self
    }
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
