//! # Menus
//!
//! Matrix has no inline keyboards, so every option is a typed command
//! (`!<namespace> <action> [payload]`) listed under the message.

use crate::domain::types::{Menu, MenuButton, Namespace};

/// Marks a message as a structured action rather than free text.
pub const ACTION_PREFIX: &str = "!";

/// The typed form of an action.
pub fn command(namespace: Namespace, action: &str, payload: Option<&str>) -> String {
    match payload {
        Some(payload) => format!("{ACTION_PREFIX}{namespace} {action} {payload}"),
        None => format!("{ACTION_PREFIX}{namespace} {action}"),
    }
}

pub fn button(label: impl Into<String>, namespace: Namespace, action: &str, payload: Option<&str>) -> MenuButton {
    MenuButton {
        label: label.into(),
        action: command(namespace, action, payload),
    }
}

/// `!common cancel <label>`
pub fn cancel(label: &str) -> MenuButton {
    button("Cancel", Namespace::Common, "cancel", Some(label))
}

/// Yes answers the pending question, No cancels the dialog.
pub fn confirm(yes: &str, no: &str, label: &str) -> Menu {
    Menu {
        rows: vec![vec![
            button(yes, Namespace::Common, "next", Some("yes")),
            MenuButton {
                label: no.to_string(),
                ..cancel(label)
            },
        ]],
    }
}

pub fn single(button: MenuButton) -> Menu {
    Menu {
        rows: vec![vec![button]],
    }
}

/// One line per row: `**label**: `command`` entries separated by a middle dot.
pub fn render(menu: &Menu) -> String {
    menu.rows
        .iter()
        .filter(|row| !row.is_empty())
        .map(|row| {
            row.iter()
                .map(|b| format!("**{}**: `{}`", b.label, b.action))
                .collect::<Vec<_>>()
                .join(" · ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Every typed command offered by `menu`, row by row.
pub fn actions(menu: &Menu) -> Vec<&str> {
    menu.rows.iter().flatten().map(|b| b.action.as_str()).collect()
}
