//! Per-client style rules for remote selections and carets.
//!
//! Decorations refer to classes such as `remote-selection-<client>`;
//! the rules behind those classes are installed once per client through
//! a [`StyleHost`] and shared by every binding. [`ClientStyles`] counts
//! references so a client's rules stay installed until the last
//! reference is released.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::awareness::ClientId;
use crate::color::{color_for_client, CursorColor};

pub const REMOTE_SELECTION_CLASS: &str = "remote-selection";
pub const REMOTE_SELECTION_HEAD_CLASS: &str = "remote-selection-head";
pub const REMOTE_CURSOR_LABEL_CLASS: &str = "remote-cursor-label";

pub fn selection_class(client_id: ClientId) -> String {
    format!("{REMOTE_SELECTION_CLASS}-{client_id}")
}

pub fn head_class(client_id: ClientId) -> String {
    format!("{REMOTE_SELECTION_HEAD_CLASS}-{client_id}")
}

pub fn label_class(client_id: ClientId) -> String {
    format!("{REMOTE_CURSOR_LABEL_CLASS}-{client_id}")
}

/// One stylesheet rule: a class and its declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleRule {
    pub class_name: String,
    pub declarations: Vec<(String, String)>,
}

impl StyleRule {
    fn new(class_name: String, declarations: &[(&str, String)]) -> Self {
        Self {
            class_name,
            declarations: declarations
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    /// Render as CSS text.
    pub fn to_css(&self) -> String {
        let body: Vec<String> = self
            .declarations
            .iter()
            .map(|(k, v)| format!("{k}: {v};"))
            .collect();
        format!(".{} {{ {} }}", self.class_name, body.join(" "))
    }
}

/// Where style rules get installed (a stylesheet, a theme service).
pub trait StyleHost {
    fn add_rule(&self, rule: &StyleRule);
    fn remove_rule(&self, class_name: &str);
}

/// Rules that give a client's selection, caret and label its color.
pub fn rules_for_client(client_id: ClientId) -> Vec<StyleRule> {
    let color: CursorColor = color_for_client(client_id);
    vec![
        StyleRule::new(
            selection_class(client_id),
            &[("background-color", color.background_with_alpha(0.25))],
        ),
        StyleRule::new(
            head_class(client_id),
            &[
                ("position", "absolute".to_string()),
                ("height", "100%".to_string()),
                ("border-left", format!("2px solid {}", color.background)),
                ("box-sizing", "border-box".to_string()),
            ],
        ),
        StyleRule::new(
            label_class(client_id),
            &[
                ("color", color.foreground.to_string()),
                ("background-color", color.background.to_string()),
            ],
        ),
    ]
}

/// Reference-counted installation of per-client rules.
pub struct ClientStyles {
    host: Rc<dyn StyleHost>,
    refs: RefCell<HashMap<ClientId, usize>>,
}

impl ClientStyles {
    pub fn new(host: Rc<dyn StyleHost>) -> Self {
        Self {
            host,
            refs: RefCell::new(HashMap::new()),
        }
    }

    pub fn acquire(&self, client_id: ClientId) {
        let first = {
            let mut refs = self.refs.borrow_mut();
            let count = refs.entry(client_id).or_insert(0);
            *count += 1;
            *count == 1
        };
        if first {
            for rule in rules_for_client(client_id) {
                self.host.add_rule(&rule);
            }
        }
    }

    pub fn release(&self, client_id: ClientId) {
        let last = {
            let mut refs = self.refs.borrow_mut();
            match refs.get_mut(&client_id) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    refs.remove(&client_id);
                    true
                }
                None => false,
            }
        };
        if last {
            for rule in rules_for_client(client_id) {
                self.host.remove_rule(&rule.class_name);
            }
        }
    }

    pub fn ref_count(&self, client_id: ClientId) -> usize {
        self.refs.borrow().get(&client_id).copied().unwrap_or(0)
    }

    /// Remove every installed rule.
    pub fn clear(&self) {
        let clients: Vec<ClientId> = self.refs.borrow_mut().drain().map(|(id, _)| id).collect();
        for client_id in clients {
            for rule in rules_for_client(client_id) {
                self.host.remove_rule(&rule.class_name);
            }
        }
    }
}

/// A [`StyleHost`] that keeps rules in memory.
#[derive(Default)]
pub struct MemoryStyleSheet {
    rules: RefCell<Vec<StyleRule>>,
}

impl MemoryStyleSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> Vec<StyleRule> {
        self.rules.borrow().clone()
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.rules.borrow().iter().any(|r| r.class_name == class_name)
    }

    pub fn to_css(&self) -> String {
        self.rules
            .borrow()
            .iter()
            .map(StyleRule::to_css)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl StyleHost for MemoryStyleSheet {
    fn add_rule(&self, rule: &StyleRule) {
        let mut rules = self.rules.borrow_mut();
        rules.retain(|r| r.class_name != rule.class_name);
        rules.push(rule.clone());
    }

    fn remove_rule(&self, class_name: &str) {
        self.rules.borrow_mut().retain(|r| r.class_name != class_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_use_client_color() {
        let rules = rules_for_client(3);
        let color = color_for_client(3);
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].class_name, "remote-selection-3");
        assert!(rules[0].to_css().contains("0.25"));
        assert!(rules[1].to_css().contains(color.background));
    }

    #[test]
    fn test_acquire_release_ref_counted() {
        let sheet = Rc::new(MemoryStyleSheet::new());
        let styles = ClientStyles::new(sheet.clone());

        styles.acquire(8);
        styles.acquire(8);
        assert_eq!(sheet.rules().len(), 3);
        assert_eq!(styles.ref_count(8), 2);

        styles.release(8);
        assert!(sheet.contains("remote-selection-8"));
        styles.release(8);
        assert!(sheet.rules().is_empty());

        styles.release(8);
        assert_eq!(styles.ref_count(8), 0);
    }

    #[test]
    fn test_clear_removes_everything() {
        let sheet = Rc::new(MemoryStyleSheet::new());
        let styles = ClientStyles::new(sheet.clone());
        styles.acquire(1);
        styles.acquire(2);
        styles.clear();
        assert!(sheet.rules().is_empty());
        assert_eq!(styles.ref_count(1), 0);
    }

    #[test]
    fn test_css_rendering() {
        let rule = StyleRule::new("x".into(), &[("color", "red".into())]);
        assert_eq!(rule.to_css(), ".x { color: red; }");
    }
}
