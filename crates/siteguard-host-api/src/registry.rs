//! In-memory mirror of the browser's tabs, fed by browser events

use siteguard_api::{BrowserEvent, TabInfo};
use siteguard_util::{TabId, WindowId};
use std::collections::HashMap;
use tracing::debug;

use crate::TabQuery;

/// Tabs and window focus as last reported by the bridge
#[derive(Debug, Default)]
pub struct TabRegistry {
    tabs: HashMap<TabId, TabInfo>,
    focused_window: Option<WindowId>,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a browser event into the mirror
    pub fn apply(&mut self, event: &BrowserEvent) {
        match event {
            BrowserEvent::TabActivated { tab_id, window_id } => {
                self.deactivate_window(*window_id);
                let tab = self.tabs.entry(*tab_id).or_insert_with(|| TabInfo {
                    tab_id: *tab_id,
                    window_id: None,
                    url: None,
                    active: false,
                });
                tab.window_id = Some(*window_id);
                tab.active = true;
                // Activating a tab implies its window has focus
                self.focused_window = Some(*window_id);
            }

            BrowserEvent::TabUpdated {
                tab_id,
                window_id,
                url,
                active,
                ..
            } => {
                let window_id = window_id.or_else(|| self.tabs.get(tab_id).and_then(|t| t.window_id));
                if *active && let Some(window) = window_id {
                    self.deactivate_window(window);
                }

                let tab = self.tabs.entry(*tab_id).or_insert_with(|| TabInfo {
                    tab_id: *tab_id,
                    window_id: None,
                    url: None,
                    active: false,
                });
                if window_id.is_some() {
                    tab.window_id = window_id;
                }
                if url.is_some() {
                    tab.url = url.clone();
                }
                tab.active = *active;
            }

            BrowserEvent::TabRemoved { tab_id } => {
                self.tabs.remove(tab_id);
            }

            BrowserEvent::WindowFocusChanged { window_id } => {
                self.focused_window = *window_id;
            }

            BrowserEvent::TabsSnapshot {
                tabs,
                focused_window,
            } => {
                self.tabs = tabs.iter().map(|t| (t.tab_id, t.clone())).collect();
                self.focused_window = *focused_window;
                debug!(tabs = self.tabs.len(), "Tab registry replaced");
            }
        }
    }

    fn deactivate_window(&mut self, window: WindowId) {
        for tab in self.tabs.values_mut() {
            if tab.window_id == Some(window) {
                tab.active = false;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

impl TabQuery for TabRegistry {
    fn tab(&self, tab_id: TabId) -> Option<TabInfo> {
        self.tabs.get(&tab_id).cloned()
    }

    fn active_tab(&self, window: WindowId) -> Option<TabInfo> {
        self.tabs
            .values()
            .find(|t| t.active && t.window_id == Some(window))
            .cloned()
    }

    fn open_tabs(&self) -> Vec<TabInfo> {
        let mut tabs: Vec<TabInfo> = self.tabs.values().cloned().collect();
        tabs.sort_by_key(|t| t.tab_id);
        tabs
    }

    fn focused_window(&self) -> Option<WindowId> {
        self.focused_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteguard_api::LoadState;

    fn updated(tab: i64, window: i64, url: &str, active: bool) -> BrowserEvent {
        BrowserEvent::TabUpdated {
            tab_id: TabId(tab),
            window_id: Some(WindowId(window)),
            url: Some(url.into()),
            active,
            status: LoadState::Complete,
        }
    }

    #[test]
    fn activation_moves_active_flag_within_window() {
        let mut registry = TabRegistry::new();
        registry.apply(&updated(1, 10, "https://a.com/", true));
        registry.apply(&updated(2, 10, "https://b.com/", false));
        registry.apply(&updated(3, 20, "https://c.com/", true));

        registry.apply(&BrowserEvent::TabActivated {
            tab_id: TabId(2),
            window_id: WindowId(10),
        });

        assert_eq!(registry.active_tab(WindowId(10)).unwrap().tab_id, TabId(2));
        assert!(!registry.tab(TabId(1)).unwrap().active);
        // Other windows keep their active tab
        assert_eq!(registry.active_tab(WindowId(20)).unwrap().tab_id, TabId(3));
        assert_eq!(registry.focused_window(), Some(WindowId(10)));
        assert_eq!(registry.focused_tab().unwrap().tab_id, TabId(2));
    }

    #[test]
    fn update_without_window_keeps_known_window() {
        let mut registry = TabRegistry::new();
        registry.apply(&updated(1, 10, "https://a.com/", true));
        registry.apply(&BrowserEvent::TabUpdated {
            tab_id: TabId(1),
            window_id: None,
            url: None,
            active: true,
            status: LoadState::Loading,
        });

        let tab = registry.tab(TabId(1)).unwrap();
        assert_eq!(tab.window_id, Some(WindowId(10)));
        assert_eq!(tab.url.as_deref(), Some("https://a.com/"));
    }

    #[test]
    fn focus_and_removal() {
        let mut registry = TabRegistry::new();
        registry.apply(&updated(1, 10, "https://a.com/", true));
        registry.apply(&BrowserEvent::WindowFocusChanged { window_id: None });
        assert!(registry.focused_tab().is_none());

        registry.apply(&BrowserEvent::TabRemoved { tab_id: TabId(1) });
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_replaces_everything() {
        let mut registry = TabRegistry::new();
        registry.apply(&updated(1, 10, "https://a.com/", true));

        registry.apply(&BrowserEvent::TabsSnapshot {
            tabs: vec![
                TabInfo {
                    tab_id: TabId(7),
                    window_id: Some(WindowId(3)),
                    url: Some("https://b.com/".into()),
                    active: true,
                },
                TabInfo {
                    tab_id: TabId(4),
                    window_id: Some(WindowId(3)),
                    url: None,
                    active: false,
                },
            ],
            focused_window: Some(WindowId(3)),
        });

        assert_eq!(registry.len(), 2);
        assert!(registry.tab(TabId(1)).is_none());
        let ids: Vec<TabId> = registry.open_tabs().iter().map(|t| t.tab_id).collect();
        assert_eq!(ids, vec![TabId(4), TabId(7)]);
        assert_eq!(registry.focused_tab().unwrap().tab_id, TabId(7));
    }
}
