use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::App;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    None,
    Quit,
    /// Refetch with the current filter, reconnecting the feed if it dropped
    Refresh,
    /// The status tab changed; refetch with the new filter
    SwitchTab,
    /// Click the selected complaint's marker
    OpenSelected,
    /// Move the selected complaint to its next status
    CycleStatus,
    /// Move the selected complaint to its next priority
    CyclePriority,
}

pub(crate) fn handle_key_event(key: KeyEvent, app: &mut App) -> Action {
    use KeyCode::{BackTab, Char, Down, End, Enter, Esc, Home, Left, Right, Tab, Up};

    // Global quit shortcuts
    if key.code == Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Action::Quit;
    }
    if key.code == Char('q') && key.modifiers.is_empty() {
        return Action::Quit;
    }

    match key.code {
        Up | Char('k') => {
            app.list_index = app.list_index.saturating_sub(1);
            Action::None
        }
        Down | Char('j') => {
            if app.list_index + 1 < app.rows.len() {
                app.list_index += 1;
            }
            Action::None
        }
        Home => {
            app.list_index = 0;
            Action::None
        }
        End => {
            app.list_index = app.rows.len().saturating_sub(1);
            Action::None
        }
        Right | Tab => {
            app.next_tab();
            Action::SwitchTab
        }
        Left | BackTab => {
            app.previous_tab();
            Action::SwitchTab
        }
        Char(digit @ '1'..='5') => {
            let Some(index) = "12345".find(digit) else {
                return Action::None;
            };
            if index == app.tab_index {
                return Action::None;
            }
            app.tab_index = index;
            Action::SwitchTab
        }
        Enter | Char(' ') => Action::OpenSelected,
        Esc => {
            app.detail = None;
            Action::None
        }
        Char('r') => Action::Refresh,
        Char('s') => Action::CycleStatus,
        Char('p') => Action::CyclePriority,
        _ => Action::None,
    }
}
