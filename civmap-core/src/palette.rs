//! The one place that decides how a status or priority looks on the map.
//!
//! The reconciler, the legend, and any UI collaborator all read from these
//! tables so a status is never colored or labelled two different ways.

use std::fmt;

use crate::model::{GeolocatedComplaint, Priority, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// 24-bit color.
pub struct Rgb {
    /// Red channel.
    pub red: u8,
    /// Green channel.
    pub green: u8,
    /// Blue channel.
    pub blue: u8,
}

impl Rgb {
    /// Build a color from its channels.
    #[must_use]
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "#{:02x}{:02x}{:02x}",
            self.red, self.green, self.blue
        )
    }
}

/// Blue.
pub const NEW_COLOR: Rgb = Rgb::new(0x3b, 0x82, 0xf6);
/// Amber.
pub const IN_PROGRESS_COLOR: Rgb = Rgb::new(0xf5, 0x9e, 0x0b);
/// Green.
pub const RESOLVED_COLOR: Rgb = Rgb::new(0x10, 0xb9, 0x81);
/// Gray.
pub const CLOSED_COLOR: Rgb = Rgb::new(0x6b, 0x72, 0x80);
/// Neutral color for statuses this client does not recognize.
pub const DEFAULT_COLOR: Rgb = Rgb::new(0x6b, 0x72, 0x80);

/// Marker color for a status. Total: unknown statuses get [`DEFAULT_COLOR`].
#[must_use]
pub fn color_of(status: &Status) -> Rgb {
    match status {
        Status::New => NEW_COLOR,
        Status::InProgress => IN_PROGRESS_COLOR,
        Status::Resolved => RESOLVED_COLOR,
        Status::Closed => CLOSED_COLOR,
        Status::Other(_) => DEFAULT_COLOR,
    }
}

/// Badge drawn inside the marker; purely decorative.
#[must_use]
pub fn glyph_of(priority: &Priority) -> Option<char> {
    match priority {
        Priority::Critical => Some('!'),
        Priority::High => Some('H'),
        Priority::Low | Priority::Medium | Priority::Other(_) => None,
    }
}

/// Human label for a status, e.g. `In Progress`.
#[must_use]
pub fn status_label(status: &Status) -> String {
    match status {
        Status::New => "New".to_owned(),
        Status::InProgress => "In Progress".to_owned(),
        Status::Resolved => "Resolved".to_owned(),
        Status::Closed => "Closed".to_owned(),
        Status::Other(raw) => humanize(raw),
    }
}

/// Human label for a priority, e.g. `Critical`.
#[must_use]
pub fn priority_label(priority: &Priority) -> String {
    match priority {
        Priority::Low => "Low".to_owned(),
        Priority::Medium => "Medium".to_owned(),
        Priority::High => "High".to_owned(),
        Priority::Critical => "Critical".to_owned(),
        Priority::Other(raw) => humanize(raw),
    }
}

/// Turn a snake-case backend value into title-case words.
#[must_use]
pub fn humanize(raw: &str) -> String {
    raw.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect::<String>()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Visual style of a single marker.
pub struct MarkerStyle {
    /// Fill color, from the status.
    pub color: Rgb,
    /// Optional badge, from the priority.
    pub glyph: Option<char>,
}

impl MarkerStyle {
    /// Style for a complaint as of its current status and priority.
    #[must_use]
    pub fn for_complaint(complaint: &GeolocatedComplaint) -> Self {
        Self {
            color: color_of(&complaint.status),
            glyph: glyph_of(&complaint.priority),
        }
    }
}

/// Popup body shown when a marker is opened.
#[must_use]
pub fn popup_text(complaint: &GeolocatedComplaint) -> String {
    let mut lines = Vec::with_capacity(5);
    if let Some(tracking_id) = &complaint.tracking_id {
        lines.push(tracking_id.clone());
    }
    lines.push(complaint.title.clone());
    lines.push(complaint.category.replace('_', " "));
    lines.push(format!(
        "Status: {}",
        status_label(&complaint.status).to_uppercase()
    ));
    lines.push(format!(
        "Priority: {}",
        priority_label(&complaint.priority).to_uppercase()
    ));
    lines.join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One row of the map legend.
pub struct LegendEntry {
    /// Status the row describes.
    pub status: Status,
    /// Display label.
    pub label: String,
    /// Marker color.
    pub color: Rgb,
}

/// Legend rows for every known status, in workflow order.
#[must_use]
pub fn legend() -> Vec<LegendEntry> {
    Status::KNOWN
        .into_iter()
        .map(|status| LegendEntry {
            label: status_label(&status),
            color: color_of(&status),
            status,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ComplaintId, Coordinates};

    #[test]
    fn every_status_has_a_color() {
        assert_eq!(color_of(&Status::New).to_string(), "#3b82f6");
        assert_eq!(color_of(&Status::InProgress).to_string(), "#f59e0b");
        assert_eq!(color_of(&Status::Resolved).to_string(), "#10b981");
        assert_eq!(color_of(&Status::Closed).to_string(), "#6b7280");
        assert_eq!(color_of(&Status::from("reopened")), DEFAULT_COLOR);
    }

    #[test]
    fn glyph_only_for_urgent_priorities() {
        assert_eq!(glyph_of(&Priority::Critical), Some('!'));
        assert_eq!(glyph_of(&Priority::High), Some('H'));
        assert_eq!(glyph_of(&Priority::Low), None);
        assert_eq!(glyph_of(&Priority::from("whenever")), None);
    }

    #[test]
    fn labels_replace_every_underscore() {
        assert_eq!(status_label(&Status::InProgress), "In Progress");
        assert_eq!(humanize("waiting_on_third_party"), "Waiting On Third Party");
    }

    #[test]
    fn popup_leads_with_tracking_id() {
        let complaint = GeolocatedComplaint {
            id: ComplaintId::from("c-1"),
            tracking_id: Some("CMP-0042".to_owned()),
            title: "Broken streetlight".to_owned(),
            status: Status::InProgress,
            priority: Priority::High,
            category: "street_lighting".to_owned(),
            position: Coordinates::new(1.0, 2.0),
            assigned_department_id: None,
        };
        assert_eq!(
            popup_text(&complaint),
            "CMP-0042\nBroken streetlight\nstreet lighting\nStatus: IN PROGRESS\nPriority: HIGH"
        );
    }

    #[test]
    fn legend_lists_known_statuses_in_order() {
        let labels: Vec<String> = legend().into_iter().map(|entry| entry.label).collect();
        assert_eq!(labels, ["New", "In Progress", "Resolved", "Closed"]);
    }
}
