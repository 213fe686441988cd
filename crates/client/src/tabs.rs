//! Tab registry
//!
//! Tabs are ordered. Terminal and file-browser tabs point at one session;
//! workspace-group tabs hold a pane set of session ids plus pinned, hidden,
//! title, active and focus bookkeeping that only ever names panes in the set.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use sshdeck_protocol::new_id;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub pinned: bool,
    pub kind: TabKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TabKind {
    Terminal { session_id: String },
    FileBrowser { session_id: String },
    Log,
    WorkspaceGroup(WorkspaceGroup),
}

impl TabKind {
    /// Every session id this tab refers to
    pub fn session_ids(&self) -> Vec<&str> {
        match self {
            TabKind::Terminal { session_id } | TabKind::FileBrowser { session_id } => {
                vec![session_id.as_str()]
            }
            TabKind::Log => Vec::new(),
            TabKind::WorkspaceGroup(group) => group.panes.iter().map(String::as_str).collect(),
        }
    }

    pub fn references(&self, session_id: &str) -> bool {
        self.session_ids().contains(&session_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    /// No panes yet; the user picks sessions to add
    #[default]
    Picker,
    Active,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceGroup {
    #[serde(default)]
    pub panes: Vec<String>,
    #[serde(default)]
    pub pinned: Vec<String>,
    #[serde(default)]
    pub hidden: Vec<String>,
    #[serde(default)]
    pub titles: BTreeMap<String, String>,
    #[serde(default)]
    pub active: Option<String>,
    #[serde(default)]
    pub focus: Option<String>,
    #[serde(default)]
    pub mode: GroupMode,
}

impl WorkspaceGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_panes<I, S>(panes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut group = Self::new();
        for pane in panes {
            group.add_pane(pane);
        }
        group
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.panes.iter().any(|p| p == session_id)
    }

    /// Add a pane. Already-present panes are left alone.
    pub fn add_pane(&mut self, session_id: impl Into<String>) -> bool {
        let session_id = session_id.into();
        if self.contains(&session_id) {
            return false;
        }
        self.panes.push(session_id.clone());
        if self.mode == GroupMode::Picker {
            self.mode = GroupMode::Active;
        }
        if self.active.is_none() {
            self.active = Some(session_id.clone());
        }
        if self.focus.is_none() {
            self.focus = Some(session_id);
        }
        true
    }

    /// Remove a pane and everything that names it.
    pub fn remove_pane(&mut self, session_id: &str) -> bool {
        let Some(index) = self.panes.iter().position(|p| p == session_id) else {
            return false;
        };
        self.panes.remove(index);
        self.pinned.retain(|p| p != session_id);
        self.hidden.retain(|p| p != session_id);
        self.titles.remove(session_id);

        // Prefer the pane that slid into the removed slot, then the one before it
        let neighbor = self
            .panes
            .get(index)
            .or_else(|| index.checked_sub(1).and_then(|i| self.panes.get(i)))
            .cloned();
        if self.active.as_deref() == Some(session_id) {
            self.active = neighbor.clone();
        }
        if self.focus.as_deref() == Some(session_id) {
            self.focus = neighbor;
        }
        if self.panes.is_empty() {
            self.active = None;
            self.focus = None;
            self.mode = GroupMode::Picker;
        }
        true
    }

    /// Keep only panes for which `keep` returns a replacement id, renaming
    /// them in every field at once. Order is preserved.
    pub fn retain_map<F>(&self, keep: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let map_list = |list: &[String]| -> Vec<String> {
            let mut seen = HashSet::new();
            list.iter()
                .filter_map(|id| keep(id.as_str()))
                .filter(|id| seen.insert(id.clone()))
                .collect()
        };

        let panes = map_list(&self.panes);
        let in_panes = |id: &String| panes.contains(id);
        let pinned = map_list(&self.pinned).into_iter().filter(in_panes).collect();
        let hidden = map_list(&self.hidden).into_iter().filter(in_panes).collect();
        let titles = self
            .titles
            .iter()
            .filter_map(|(id, title)| keep(id.as_str()).map(|new_id| (new_id, title.clone())))
            .filter(|(id, _)| in_panes(id))
            .collect();
        let fallback = panes.first().cloned();
        let pointer = |p: &Option<String>| {
            p.as_deref()
                .and_then(&keep)
                .filter(in_panes)
                .or_else(|| fallback.clone())
        };
        let active = pointer(&self.active);
        let focus = pointer(&self.focus);
        let mode = if panes.is_empty() {
            GroupMode::Picker
        } else {
            self.mode
        };

        Self {
            pinned,
            hidden,
            titles,
            active,
            focus,
            mode,
            panes,
        }
    }

    pub fn pin_pane(&mut self, session_id: &str) -> bool {
        if !self.contains(session_id) || self.pinned.iter().any(|p| p == session_id) {
            return false;
        }
        self.pinned.push(session_id.to_string());
        true
    }

    pub fn unpin_pane(&mut self, session_id: &str) -> bool {
        let before = self.pinned.len();
        self.pinned.retain(|p| p != session_id);
        self.pinned.len() != before
    }

    pub fn set_hidden(&mut self, session_id: &str, hidden: bool) -> bool {
        if !self.contains(session_id) {
            return false;
        }
        let present = self.hidden.iter().any(|p| p == session_id);
        match (hidden, present) {
            (true, false) => self.hidden.push(session_id.to_string()),
            (false, true) => self.hidden.retain(|p| p != session_id),
            _ => return false,
        }
        true
    }

    pub fn set_pane_title(&mut self, session_id: &str, title: impl Into<String>) -> bool {
        if !self.contains(session_id) {
            return false;
        }
        let title = title.into();
        if self.titles.get(session_id) == Some(&title) {
            return false;
        }
        self.titles.insert(session_id.to_string(), title);
        true
    }

    pub fn focus_pane(&mut self, session_id: &str) -> bool {
        if !self.contains(session_id) || self.focus.as_deref() == Some(session_id) {
            return false;
        }
        self.focus = Some(session_id.to_string());
        true
    }

    /// True when every pointer and subset only names panes in the set
    pub fn is_consistent(&self) -> bool {
        let names = |id: &String| self.contains(id);
        self.pinned.iter().all(names)
            && self.hidden.iter().all(names)
            && self.titles.keys().all(names)
            && self.active.as_ref().is_none_or(names)
            && self.focus.as_ref().is_none_or(names)
    }
}

/// Outcome of `TabRegistry::remove_tab`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveTab {
    Removed(Tab),
    Pinned,
    NotFound,
}

/// Title that collides with none of `existing`: `base`, or `base (n)` for the
/// smallest positive unused `n`.
pub fn unique_title<'a, I>(base: &str, existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let taken: HashSet<&str> = existing.into_iter().collect();
    if !taken.contains(base) {
        return base.to_string();
    }
    (1u64..)
        .map(|n| format!("{} ({})", base, n))
        .find(|candidate| !taken.contains(candidate.as_str()))
        .unwrap_or_else(|| base.to_string())
}

#[derive(Debug, Default)]
pub struct TabRegistry {
    tabs: Vec<Tab>,
    active_tab_id: Option<String>,
    revision: u64,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn get(&self, id: &str) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.id == id)
    }

    pub fn active_tab_id(&self) -> Option<&str> {
        self.active_tab_id.as_deref()
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    /// Append a tab with a disambiguated title and make it active.
    pub fn add_tab(&mut self, base_title: &str, kind: TabKind) -> String {
        let title = unique_title(base_title, self.tabs.iter().map(|t| t.title.as_str()));
        let id = new_id();
        self.tabs.push(Tab {
            id: id.clone(),
            title,
            pinned: false,
            kind,
        });
        self.active_tab_id = Some(id.clone());
        self.touch();
        id
    }

    /// Remove an unpinned tab. Pinned tabs must be unpinned first.
    pub fn remove_tab(&mut self, id: &str) -> RemoveTab {
        let Some(index) = self.tabs.iter().position(|t| t.id == id) else {
            return RemoveTab::NotFound;
        };
        if self.tabs[index].pinned {
            return RemoveTab::Pinned;
        }
        let removed = self.tabs.remove(index);
        if self.active_tab_id.as_deref() == Some(id) {
            self.active_tab_id = self
                .tabs
                .get(index)
                .or_else(|| index.checked_sub(1).and_then(|i| self.tabs.get(i)))
                .map(|t| t.id.clone());
        }
        self.touch();
        RemoveTab::Removed(removed)
    }

    pub fn pin_tab(&mut self, id: &str) -> bool {
        self.set_pinned(id, true)
    }

    pub fn unpin_tab(&mut self, id: &str) -> bool {
        self.set_pinned(id, false)
    }

    fn set_pinned(&mut self, id: &str, pinned: bool) -> bool {
        let Some(tab) = self.tabs.iter_mut().find(|t| t.id == id) else {
            return false;
        };
        if tab.pinned == pinned {
            return false;
        }
        tab.pinned = pinned;
        self.touch();
        true
    }

    pub fn set_active_tab(&mut self, id: &str) -> bool {
        if self.active_tab_id.as_deref() == Some(id) || self.get(id).is_none() {
            return false;
        }
        self.active_tab_id = Some(id.to_string());
        self.touch();
        true
    }

    /// Run `f` against a workspace-group tab; the revision moves only if `f`
    /// reports a change. `None` when the tab is missing or not a group.
    pub fn with_group<F>(&mut self, tab_id: &str, f: F) -> Option<bool>
    where
        F: FnOnce(&mut WorkspaceGroup) -> bool,
    {
        let tab = self.tabs.iter_mut().find(|t| t.id == tab_id)?;
        let TabKind::WorkspaceGroup(group) = &mut tab.kind else {
            return None;
        };
        let changed = f(group);
        if changed {
            self.touch();
        }
        Some(changed)
    }

    pub fn add_pane(&mut self, tab_id: &str, session_id: &str) -> bool {
        self.with_group(tab_id, |g| g.add_pane(session_id))
            .unwrap_or(false)
    }

    pub fn remove_pane(&mut self, tab_id: &str, session_id: &str) -> bool {
        self.with_group(tab_id, |g| g.remove_pane(session_id))
            .unwrap_or(false)
    }

    /// Union of session ids referenced by any tab
    pub fn referenced_session_ids(&self) -> BTreeSet<String> {
        self.tabs
            .iter()
            .flat_map(|t| t.kind.session_ids())
            .map(str::to_string)
            .collect()
    }

    /// Number of tabs that reference `session_id`
    pub fn tabs_referencing(&self, session_id: &str) -> usize {
        self.tabs
            .iter()
            .filter(|t| t.kind.references(session_id))
            .count()
    }

    /// Install a whole tab set at once (used by restore)
    pub fn replace_all(&mut self, tabs: Vec<Tab>, active_tab_id: Option<String>) {
        let active_tab_id = active_tab_id
            .filter(|id| tabs.iter().any(|t| &t.id == id))
            .or_else(|| tabs.first().map(|t| t.id.clone()));
        self.tabs = tabs;
        self.active_tab_id = active_tab_id;
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminal(session_id: &str) -> TabKind {
        TabKind::Terminal {
            session_id: session_id.to_string(),
        }
    }

    #[test]
    fn unique_title_picks_smallest_free_suffix() {
        assert_eq!(unique_title("Server", std::iter::empty()), "Server");
        assert_eq!(unique_title("Server", ["Server"]), "Server (1)");
        assert_eq!(unique_title("Server", ["Server", "Server (1)"]), "Server (2)");
        assert_eq!(unique_title("Server", ["Server", "Server (2)"]), "Server (1)");
        assert_eq!(unique_title("Server", ["Server (1)"]), "Server");
    }

    #[test]
    fn add_tab_disambiguates_and_activates() {
        let mut tabs = TabRegistry::new();
        let first = tabs.add_tab("prod", terminal("s1"));
        let second = tabs.add_tab("prod", terminal("s2"));

        assert_eq!(tabs.get(&first).unwrap().title, "prod");
        assert_eq!(tabs.get(&second).unwrap().title, "prod (1)");
        assert_eq!(tabs.active_tab_id(), Some(second.as_str()));
    }

    #[test]
    fn pinned_tab_survives_remove_until_unpinned() {
        let mut tabs = TabRegistry::new();
        let id = tabs.add_tab("prod", terminal("s1"));
        assert!(tabs.pin_tab(&id));

        assert_eq!(tabs.remove_tab(&id), RemoveTab::Pinned);
        assert_eq!(tabs.len(), 1);

        assert!(tabs.unpin_tab(&id));
        assert!(matches!(tabs.remove_tab(&id), RemoveTab::Removed(_)));
        assert!(tabs.is_empty());
        assert_eq!(tabs.remove_tab(&id), RemoveTab::NotFound);
    }

    #[test]
    fn removing_active_tab_activates_a_neighbor() {
        let mut tabs = TabRegistry::new();
        let a = tabs.add_tab("a", TabKind::Log);
        let b = tabs.add_tab("b", TabKind::Log);
        let c = tabs.add_tab("c", TabKind::Log);
        tabs.set_active_tab(&b);

        tabs.remove_tab(&b);
        assert_eq!(tabs.active_tab_id(), Some(c.as_str()));
        tabs.remove_tab(&c);
        assert_eq!(tabs.active_tab_id(), Some(a.as_str()));
        tabs.remove_tab(&a);
        assert_eq!(tabs.active_tab_id(), None);
    }

    #[test]
    fn adding_an_existing_pane_does_not_duplicate_it() {
        let mut tabs = TabRegistry::new();
        let id = tabs.add_tab("group", TabKind::WorkspaceGroup(WorkspaceGroup::new()));
        assert!(tabs.add_pane(&id, "A"));
        let rev = tabs.revision();

        assert!(!tabs.add_pane(&id, "A"));
        assert_eq!(tabs.revision(), rev);
        let TabKind::WorkspaceGroup(group) = &tabs.get(&id).unwrap().kind else {
            panic!("not a group");
        };
        assert_eq!(group.panes, vec!["A".to_string()]);
    }

    #[test]
    fn first_pane_leaves_picker_mode() {
        let mut group = WorkspaceGroup::new();
        assert_eq!(group.mode, GroupMode::Picker);
        group.add_pane("A");
        assert_eq!(group.mode, GroupMode::Active);
        assert_eq!(group.active.as_deref(), Some("A"));
        assert_eq!(group.focus.as_deref(), Some("A"));
    }

    #[test]
    fn removing_active_pane_reassigns_pointers() {
        let mut group = WorkspaceGroup::with_panes(["A", "B", "C"]);
        group.pin_pane("B");
        group.set_hidden("B", true);
        group.set_pane_title("B", "logs");
        group.active = Some("B".into());
        group.focus = Some("B".into());

        assert!(group.remove_pane("B"));
        assert_eq!(group.panes, vec!["A".to_string(), "C".to_string()]);
        assert_eq!(group.active.as_deref(), Some("C"));
        assert_eq!(group.focus.as_deref(), Some("C"));
        assert!(group.pinned.is_empty());
        assert!(group.hidden.is_empty());
        assert!(group.titles.is_empty());
        assert!(group.is_consistent());
    }

    #[test]
    fn emptied_group_reverts_to_picker() {
        let mut group = WorkspaceGroup::with_panes(["A"]);
        group.remove_pane("A");
        assert_eq!(group.mode, GroupMode::Picker);
        assert!(group.active.is_none());
        assert!(group.focus.is_none());
    }

    #[test]
    fn pane_bookkeeping_rejects_unknown_ids() {
        let mut group = WorkspaceGroup::with_panes(["A"]);
        assert!(!group.pin_pane("Z"));
        assert!(!group.set_hidden("Z", true));
        assert!(!group.set_pane_title("Z", "nope"));
        assert!(!group.focus_pane("Z"));
        assert!(group.is_consistent());
    }

    #[test]
    fn non_group_tabs_reject_pane_operations() {
        let mut tabs = TabRegistry::new();
        let id = tabs.add_tab("prod", terminal("s1"));
        assert!(!tabs.add_pane(&id, "s2"));
        assert!(tabs.with_group(&id, |_| true).is_none());
    }

    #[test]
    fn referenced_sessions_cover_every_tab_kind() {
        let mut tabs = TabRegistry::new();
        tabs.add_tab("t", terminal("s1"));
        tabs.add_tab(
            "f",
            TabKind::FileBrowser {
                session_id: "s2".into(),
            },
        );
        tabs.add_tab("g", TabKind::WorkspaceGroup(WorkspaceGroup::with_panes(["s1", "s3"])));
        tabs.add_tab("log", TabKind::Log);

        let ids: Vec<_> = tabs.referenced_session_ids().into_iter().collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
        assert_eq!(tabs.tabs_referencing("s1"), 2);
        assert_eq!(tabs.tabs_referencing("s4"), 0);
    }

    #[test]
    fn tab_kind_serializes_with_type_tag() {
        let kind = TabKind::WorkspaceGroup(WorkspaceGroup::with_panes(["A"]));
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["type"], "workspace_group");
        assert_eq!(value["panes"][0], "A");
        let back: TabKind = serde_json::from_value(value).unwrap();
        assert_eq!(back, kind);
    }
}
