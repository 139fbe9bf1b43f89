//! Terminal admin dashboard that keeps a canvas map in sync with civic complaint reports.

mod app;
mod config;
mod demo;
mod input;
mod surface;
mod ui;

use std::{
    fs::File,
    io,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration as StdDuration,
};

use anyhow::{Context, Result};
use civmap_core::{
    backend::Backend,
    feed::SubscriptionState,
    memory::InMemoryComplaints,
    model::{GeolocatedComplaint, SnapshotFilter},
    palette::{priority_label, status_label},
    reconcile::MarkerClickHandler,
    service::{MapSyncService, SyncConfig},
};
use crossterm::{
    event::{self, Event as CEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use reqwest::Client;
use tokio::{sync::mpsc::unbounded_channel, task::JoinHandle, time::timeout};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::config::{Config, Source};
use crate::input::Action;
use crate::surface::CanvasSurface;

/// How long one loop iteration waits for the sync service before polling input.
const SYNC_WAIT: StdDuration = StdDuration::from_millis(50);
const INPUT_POLL: StdDuration = StdDuration::from_millis(50);
const DEMO_ACTIVITY_PERIOD: StdDuration = StdDuration::from_secs(4);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(&config.log_file)?;

    // Backend + sync service setup
    let (backend, activity) = connect(config.source)?;
    info!(backend = %backend.name, channel = %config.channel, "Starting civmap dashboard");

    let (click_sender, clicks) = unbounded_channel();
    let on_marker_click: MarkerClickHandler = Arc::new(move |complaint: &GeolocatedComplaint| {
        if click_sender.send(complaint.clone()).is_err() {
            debug!(complaint_id = %complaint.id, "Marker clicked after the dashboard closed");
        }
    });

    let mut initial_filter = SnapshotFilter::all();
    if let Some(department) = &config.department {
        initial_filter = initial_filter.with_department(department.clone());
    }
    let sync_config = SyncConfig {
        channel: config.channel,
        initial_filter,
        ..SyncConfig::default()
    };

    let sync = MapSyncService::attach(
        CanvasSurface::default(),
        Arc::clone(&backend.snapshots),
        Arc::clone(&backend.feed),
        on_marker_click,
        sync_config,
    )
    .await
    .context("Could not attach the complaint map")?;

    // App state
    let app = App::new(sync, &backend, config.department, clicks);

    // Terminal init
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let terminal_backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(terminal_backend)?;

    // Run event loop
    let res = run(&mut terminal, app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Some(activity) = activity {
        activity.abort();
    }
    res
}

fn init_logging(path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Could not open log file {}", path.display()))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .init();
    Ok(())
}

fn connect(source: Source) -> Result<(Backend, Option<JoinHandle<()>>)> {
    match source {
        Source::Demo => {
            let store = Arc::new(InMemoryComplaints::with_records(demo::seed()));
            let activity = demo::spawn_activity(Arc::clone(&store), DEMO_ACTIVITY_PERIOD);
            Ok((Backend::in_memory(store), Some(activity)))
        }
        Source::Supabase(supabase) => {
            let client = Client::builder().user_agent("civmap/0.1").build()?;
            Ok((civmap_provider_supabase::backend(client, supabase), None))
        }
    }
}

async fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, mut app: App) -> Result<()> {
    loop {
        // Draw current UI
        terminal.draw(|frame| ui::draw(frame, &app))?;

        // Apply whatever the sync service has ready; dropping the wait loses nothing
        let ready = timeout(SYNC_WAIT, app.sync.next_event()).await;
        if let Ok(Some(event)) = ready {
            app.on_sync_event(event);
        }
        app.drain_clicks();

        // Poll for input (non-blocking, small timeout to keep CPU low)
        if event::poll(INPUT_POLL)?
            && let CEvent::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            match input::handle_key_event(key, &mut app) {
                Action::Quit => break,
                Action::None => {}
                Action::Refresh => {
                    if app.feed_state() == SubscriptionState::Unsubscribed {
                        match app.sync.resubscribe().await {
                            Ok(()) => app.error_message = None,
                            Err(err) => {
                                app.error_message = Some(format!("Reconnect failed: {err}"));
                            }
                        }
                    }
                    app.sync.refresh(None);
                    app.is_loading = true;
                }
                Action::SwitchTab => {
                    let filter = app.current_filter();
                    app.sync.refresh(Some(filter));
                    app.is_loading = true;
                    app.detail = None;
                }
                Action::OpenSelected => app.open_selected(),
                Action::CycleStatus => {
                    let Some(complaint) = app.selected().cloned() else {
                        continue;
                    };
                    let next = complaint.status.cycled();
                    let res = app.triage.set_status(&complaint.id, &next).await;
                    app.triage_finished(
                        &complaint,
                        &format!("status set to {}", status_label(&next)),
                        res,
                    );
                }
                Action::CyclePriority => {
                    let Some(complaint) = app.selected().cloned() else {
                        continue;
                    };
                    let next = complaint.priority.cycled();
                    let res = app.triage.set_priority(&complaint.id, &next).await;
                    app.triage_finished(
                        &complaint,
                        &format!("priority set to {}", priority_label(&next)),
                        res,
                    );
                }
            }
        }
    }

    let report = app.sync.detach();
    info!(
        released_markers = report.released_markers,
        unsubscribed = report.unsubscribed,
        "Dashboard closed"
    );
    Ok(())
}
