//! Session id remapping for restored tabs

use std::collections::HashMap;

use crate::tabs::{Tab, TabKind};

/// Rewrite every session reference in `tab` through `mapping`.
///
/// Terminal and file-browser tabs whose session has no mapping are dropped.
/// Group tabs always survive; panes without a mapping are removed along with
/// their pinned, hidden, title, active and focus entries.
pub fn remap_tab(tab: &Tab, mapping: &HashMap<String, String>) -> Option<Tab> {
    let kind = match &tab.kind {
        TabKind::Terminal { session_id } => TabKind::Terminal {
            session_id: mapping.get(session_id)?.clone(),
        },
        TabKind::FileBrowser { session_id } => TabKind::FileBrowser {
            session_id: mapping.get(session_id)?.clone(),
        },
        TabKind::Log => TabKind::Log,
        TabKind::WorkspaceGroup(group) => {
            TabKind::WorkspaceGroup(group.retain_map(|id| mapping.get(id).cloned()))
        }
    };
    Some(Tab {
        id: tab.id.clone(),
        title: tab.title.clone(),
        pinned: tab.pinned,
        kind,
    })
}

pub fn remap_tabs(tabs: &[Tab], mapping: &HashMap<String, String>) -> Vec<Tab> {
    tabs.iter().filter_map(|t| remap_tab(t, mapping)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabs::{GroupMode, WorkspaceGroup};

    fn tab(id: &str, kind: TabKind) -> Tab {
        Tab {
            id: id.to_string(),
            title: id.to_string(),
            pinned: false,
            kind,
        }
    }

    fn terminal(session_id: &str) -> TabKind {
        TabKind::Terminal {
            session_id: session_id.to_string(),
        }
    }

    fn mapping(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn terminal_tab_follows_its_session() {
        let m = mapping(&[("A", "A2")]);
        let out = remap_tab(&tab("t", terminal("A")), &m).unwrap();
        assert_eq!(out.kind, terminal("A2"));
        assert_eq!(out.id, "t");
    }

    #[test]
    fn tab_with_failed_session_is_dropped() {
        let m = mapping(&[("A", "A2")]);
        assert!(remap_tab(&tab("t", terminal("C")), &m).is_none());
        let browser = TabKind::FileBrowser {
            session_id: "C".into(),
        };
        assert!(remap_tab(&tab("f", browser), &m).is_none());
    }

    #[test]
    fn log_tab_is_kept_untouched() {
        let out = remap_tab(&tab("log", TabKind::Log), &HashMap::new()).unwrap();
        assert_eq!(out.kind, TabKind::Log);
    }

    #[test]
    fn group_drops_failed_pane_everywhere() {
        let mut group = WorkspaceGroup::with_panes(["A", "B", "C"]);
        group.pin_pane("C");
        group.pin_pane("A");
        group.set_hidden("C", true);
        group.set_pane_title("C", "db");
        group.set_pane_title("B", "web");
        group.active = Some("C".into());
        group.focus = Some("C".into());

        let m = mapping(&[("A", "A2"), ("B", "B2")]);
        let out = remap_tab(&tab("g", TabKind::WorkspaceGroup(group)), &m).unwrap();
        let TabKind::WorkspaceGroup(g) = out.kind else {
            panic!("group expected");
        };

        assert_eq!(g.panes, vec!["A2".to_string(), "B2".to_string()]);
        assert_eq!(g.pinned, vec!["A2".to_string()]);
        assert!(g.hidden.is_empty());
        assert_eq!(g.titles.len(), 1);
        assert_eq!(g.titles.get("B2").map(String::as_str), Some("web"));
        assert_eq!(g.active.as_deref(), Some("A2"));
        assert_eq!(g.focus.as_deref(), Some("A2"));
        assert!(g.is_consistent());
    }

    #[test]
    fn fully_failed_group_reverts_to_picker() {
        let group = WorkspaceGroup::with_panes(["C"]);
        let out = remap_tab(&tab("g", TabKind::WorkspaceGroup(group)), &HashMap::new()).unwrap();
        let TabKind::WorkspaceGroup(g) = out.kind else {
            panic!("group expected");
        };
        assert!(g.panes.is_empty());
        assert_eq!(g.mode, GroupMode::Picker);
        assert!(g.active.is_none());
        assert!(g.focus.is_none());
    }

    #[test]
    fn scenario_terminals_and_group_with_one_failure() {
        let tabs = vec![
            tab("ta", terminal("A")),
            tab("tb", terminal("B")),
            tab(
                "g",
                TabKind::WorkspaceGroup(WorkspaceGroup::with_panes(["A", "B", "C"])),
            ),
        ];
        let m = mapping(&[("A", "A2"), ("B", "B2")]);

        let out = remap_tabs(&tabs, &m);

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].kind, terminal("A2"));
        assert_eq!(out[1].kind, terminal("B2"));
        let TabKind::WorkspaceGroup(g) = &out[2].kind else {
            panic!("group expected");
        };
        assert_eq!(g.panes, vec!["A2".to_string(), "B2".to_string()]);
        assert!(!g.panes.iter().any(|p| p == "C"));
        assert!(g.is_consistent());
    }

    #[test]
    fn remap_does_not_mutate_input() {
        let original = tab("ta", terminal("A"));
        let copy = original.clone();
        remap_tab(&original, &mapping(&[("A", "A2")]));
        assert_eq!(original, copy);
    }
}
