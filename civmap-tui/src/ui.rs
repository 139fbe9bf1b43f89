use civmap_core::{
    feed::SubscriptionState,
    model::GeolocatedComplaint,
    palette::{Rgb, color_of, glyph_of, legend, popup_text, status_label},
};
use ratatui::{
    prelude::*,
    widgets::{
        Block, Borders, List, ListItem, ListState, Paragraph, Tabs, Wrap,
        canvas::{Canvas, Map, MapResolution},
    },
};

use crate::app::{App, TABS};

const MARKER_SYMBOL: &str = "●";
const SIDEBAR_WIDTH: u16 = 44;

pub(crate) fn draw(frame: &mut Frame<'_>, app: &App) {
    let area = frame.area();

    // Outer layout: title, tabs, main content, status line
    let layout_chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(area);

    let chunks = layout_chunks.as_ref();
    let [header_area, tabs_area, content_area, status_area] = chunks else {
        return;
    };

    draw_header(frame, app, *header_area);
    draw_tabs(frame, app, *tabs_area);

    let content_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(SIDEBAR_WIDTH)])
        .split(*content_area);
    let [map_area, sidebar_area] = content_chunks.as_ref() else {
        return;
    };

    draw_map(frame, app, *map_area);
    draw_sidebar(frame, app, *sidebar_area);
    draw_status(frame, app, *status_area);
}

fn draw_header(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let (feed_label, feed_color) = match app.feed_state() {
        SubscriptionState::Active => ("live", Color::Green),
        SubscriptionState::Subscribing => ("connecting", Color::Yellow),
        SubscriptionState::Unsubscribed => ("offline", Color::Red),
    };
    let synced = app.last_sync.map_or_else(
        || "never".to_owned(),
        |stamp| stamp.format("%H:%M:%S").to_string(),
    );

    let line = Line::from(vec![
        Span::raw(format!("{} · feed ", app.backend_name)),
        Span::styled(feed_label, Style::default().fg(feed_color)),
        Span::raw(format!(
            " · {} complaint(s) on map · synced {synced}",
            app.stats.total
        )),
    ]);

    let header = Paragraph::new(line).block(
        Block::default()
            .borders(Borders::ALL)
            .title("civmap – complaint map"),
    );
    frame.render_widget(header, area);
}

fn draw_tabs(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let titles = TABS
        .iter()
        .enumerate()
        .map(|(index, (label, _))| format!("{} {label}", index + 1));

    let title = app
        .department
        .as_ref()
        .map_or_else(
            || "Status".to_owned(),
            |department| format!("Status · department {department}"),
        );

    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::ALL).title(title))
        .select(app.tab_index)
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );
    frame.render_widget(tabs, area);
}

fn draw_map(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let surface = app.sync.surface();
    let window = surface.window(area.width);
    let selected = app.selected().map(|complaint| complaint.position);

    let canvas = Canvas::default()
        .block(Block::default().borders(Borders::ALL).title("Map"))
        .marker(symbols::Marker::Braille)
        .x_bounds(window.x_bounds)
        .y_bounds(window.y_bounds)
        .paint(|ctx| {
            ctx.draw(&Map {
                color: Color::DarkGray,
                resolution: MapResolution::High,
            });
            ctx.layer();

            for marker in surface.markers() {
                let spec = &marker.spec;
                let symbol = spec
                    .style
                    .glyph
                    .map_or_else(|| MARKER_SYMBOL.to_owned(), String::from);
                let mut style = Style::default()
                    .fg(rgb(spec.style.color))
                    .add_modifier(Modifier::BOLD);
                if selected == Some(spec.position) {
                    style = style.add_modifier(Modifier::REVERSED);
                }
                ctx.print(
                    spec.position.longitude,
                    spec.position.latitude,
                    Span::styled(symbol, style),
                );
            }
        });

    frame.render_widget(canvas, area);
}

fn draw_sidebar(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let legend_height = u16::try_from(legend().len()).unwrap_or(u16::MAX).saturating_add(3);
    let detail_height = if app.detail.is_some() { 9 } else { 0 };

    let sidebar_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(legend_height),
            Constraint::Min(0),
            Constraint::Length(detail_height),
        ])
        .split(area);
    let [legend_area, list_area, detail_area] = sidebar_chunks.as_ref() else {
        return;
    };

    draw_legend(frame, app, *legend_area);
    draw_list(frame, app, *list_area);
    if let Some(detail) = &app.detail {
        draw_detail(frame, detail, *detail_area);
    }
}

fn draw_legend(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let mut lines: Vec<Line<'_>> = legend()
        .into_iter()
        .map(|entry| {
            let count = app.stats.by_status.get(&entry.status);
            Line::from(vec![
                Span::styled(
                    format!("{MARKER_SYMBOL} "),
                    Style::default().fg(rgb(entry.color)),
                ),
                Span::raw(format!("{:<12}{count:>4}", entry.label)),
            ])
        })
        .collect();

    lines.push(Line::from(format!(
        "! critical {:>3} · H high {:>3}",
        app.stats.by_priority.critical, app.stats.by_priority.high
    )));

    let paragraph =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Legend"));
    frame.render_widget(paragraph, area);
}

fn draw_list(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let items = if app.rows.is_empty() {
        let text = if app.is_loading {
            "Loading complaints…"
        } else {
            "No complaints with a location match this tab."
        };
        vec![ListItem::new(text)]
    } else {
        app.rows
            .iter()
            .map(|complaint| {
                let badge = glyph_of(&complaint.priority).unwrap_or(' ');
                let tracking = complaint
                    .tracking_id
                    .as_deref()
                    .unwrap_or(complaint.id.0.as_str());
                ListItem::new(format!("{badge} {tracking} {}", complaint.title))
                    .style(Style::default().fg(rgb(color_of(&complaint.status))))
            })
            .collect()
    };

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Complaints (↑/↓, Enter to open)"),
        )
        .highlight_style(Style::default().add_modifier(Modifier::BOLD | Modifier::REVERSED));

    let mut state = ListState::default();
    if !app.rows.is_empty() {
        state.select(Some(app.list_index));
    }
    frame.render_stateful_widget(list, area, &mut state);
}

fn draw_detail(frame: &mut Frame<'_>, complaint: &GeolocatedComplaint, area: Rect) {
    let text = match &complaint.assigned_department_id {
        Some(department) => format!("{}\nDepartment: {department}", popup_text(complaint)),
        None => popup_text(complaint),
    };

    let paragraph = Paragraph::new(text)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("{} (Esc to close)", status_label(&complaint.status))),
        )
        .style(Style::default().fg(rgb(color_of(&complaint.status))))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, area);
}

fn draw_status(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let nav_hint =
        "←/→ tabs · ↑/↓ move · Enter open · s status · p priority · r refresh · q quit";

    let status_text = if let Some(msg) = &app.error_message {
        format!("{msg} · {nav_hint}")
    } else if app.is_loading {
        format!("Loading… · {nav_hint}")
    } else if let Some(msg) = &app.info_message {
        format!("{msg} · {nav_hint}")
    } else {
        nav_hint.to_owned()
    };

    let status_style = if app.error_message.is_some() {
        Style::default().fg(Color::Red)
    } else if app.is_loading {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };

    let status = Paragraph::new(status_text)
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .style(status_style)
        .wrap(Wrap { trim: true });

    frame.render_widget(status, area);
}

fn rgb(color: Rgb) -> Color {
    Color::Rgb(color.red, color.green, color.blue)
}
