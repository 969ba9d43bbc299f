use serde_json::Value;

use crate::agent::InstallSpec;
use crate::Result;

use super::table::Table;

/// What one fetch produced: the decoded response payload, or the error the
/// view gets to judge (`CommandFailed`, `CommandNotFound`, `Protocol`).
pub type Fetched = Result<Option<Value>>;

/// Result of a view's data hook.
pub enum ViewOutcome {
    /// Fresh rows to publish.
    Rows(Table),
    /// Stop this view; its poller exits and the pane freezes.
    Stop,
}

/// Result of a view-specific key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Ignored,
    Handled,
    Stop,
}

/// One monitoring panel. Implementors supply data semantics and formatting;
/// the shell, poller and pager own everything else. Views never touch the
/// render lock or the channel — the protocol is reachable only through the
/// command the poller issues on their behalf.
pub trait View: Send {
    /// Command name; also the default title stem.
    fn name(&self) -> &str;

    fn title(&self) -> String {
        let name = self.name();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        }
    }

    /// Extension to install into the target before polling starts.
    fn extension(&self) -> Option<InstallSpec> {
        None
    }

    /// Command issued each poll tick. Defaults to the view name, which is
    /// also how installed extensions are addressed.
    fn command(&self) -> (String, Option<Value>) {
        (self.name().to_string(), None)
    }

    /// Turn one fetch into rows, or stop the view.
    fn process(&mut self, fetched: Fetched) -> ViewOutcome;

    /// View-specific keys, routed by the shell after its own bindings.
    fn handle_key(&mut self, _key: char) -> KeyOutcome {
        KeyOutcome::Ignored
    }

    fn cursor_enabled(&self) -> bool {
        true
    }

    fn sort_enabled(&self) -> bool {
        true
    }

    fn on_start(&mut self) {}

    fn on_stop(&mut self) {}
}

/// Built-in view over the `path` command: the target's module search path.
/// Mostly a wiring demo; real views live outside this crate.
#[derive(Debug, Default)]
pub struct PathView;

impl View for PathView {
    fn name(&self) -> &str {
        "path"
    }

    fn title(&self) -> String {
        "Module search path".to_string()
    }

    fn process(&mut self, fetched: Fetched) -> ViewOutcome {
        let Ok(payload) = fetched else {
            return ViewOutcome::Stop;
        };
        let mut table = Table::new(vec!["path".to_string()]);
        if let Some(Value::Array(items)) = payload {
            for item in items {
                table.push_row(vec![super::table::Cell::from_json(&item)]);
            }
        }
        ViewOutcome::Rows(table)
    }

    fn cursor_enabled(&self) -> bool {
        false
    }

    fn sort_enabled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_title_capitalizes_name() {
        let view = PathView;
        assert_eq!(view.name(), "path");
        assert_eq!(view.command().0, "path");
    }

    #[test]
    fn test_path_view_rows() {
        let mut view = PathView;
        let outcome = view.process(Ok(Some(json!(["/usr/lib/app", "/opt/ext"]))));
        match outcome {
            ViewOutcome::Rows(table) => {
                assert_eq!(table.columns, vec!["path"]);
                assert_eq!(table.rows.len(), 2);
            }
            ViewOutcome::Stop => panic!("expected rows"),
        }
    }

    #[test]
    fn test_path_view_stops_on_fetch_failure() {
        let mut view = PathView;
        let outcome = view.process(Err(crate::Error::CommandFailed("path".into())));
        assert!(matches!(outcome, ViewOutcome::Stop));
    }
}
