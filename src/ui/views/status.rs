use crate::store::StoreKind;
use crate::sync::SyncStatus;
use crate::ui::renderfns::connectivity_color;
use crate::worker::WorkerRegistrationState;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};

fn row(label: &str, value: String, color: Color) -> Line<'static> {
  Line::from(vec![
    Span::styled(format!(" {:<14}", label), Style::default().fg(Color::DarkGray)),
    Span::styled(value, Style::default().fg(color)),
  ])
}

fn yes_no(flag: bool) -> &'static str {
  if flag {
    "yes"
  } else {
    "no"
  }
}

pub fn draw_status(
  frame: &mut Frame,
  area: Rect,
  registration: &WorkerRegistrationState,
  store: Option<StoreKind>,
  status: Option<&SyncStatus>,
) {
  let block = Block::default()
    .title(" Sync ")
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  let mut lines = vec![
    row(
      "supported",
      yes_no(registration.is_supported).to_string(),
      Color::White,
    ),
    row(
      "registered",
      yes_no(registration.is_registered).to_string(),
      Color::White,
    ),
  ];
  let (storage, storage_color) = match store {
    Some(StoreKind::Sqlite) => (StoreKind::Sqlite.as_str().to_string(), Color::White),
    Some(StoreKind::Memory) => (
      format!("{} (lost on exit)", StoreKind::Memory.as_str()),
      Color::Yellow,
    ),
    None => ("none".to_string(), Color::DarkGray),
  };
  lines.push(row("storage", storage, storage_color));
  if let Some(error) = &registration.error {
    lines.push(row("error", error.clone(), Color::Red));
  }

  let Some(status) = status else {
    lines.push(row("mode", "online only".to_string(), Color::Yellow));
    frame.render_widget(Paragraph::new(lines).block(block), area);
    return;
  };

  lines.push(row(
    "network",
    if status.online { "online" } else { "offline" }.to_string(),
    connectivity_color(status.online),
  ));
  lines.push(row(
    "visible",
    yes_no(status.visible).to_string(),
    Color::White,
  ));

  let activity = if status.in_flight {
    "syncing".to_string()
  } else if status.pending_intent {
    "waiting to sync".to_string()
  } else {
    "idle".to_string()
  };
  lines.push(row("activity", activity, Color::White));

  lines.push(row(
    "queue",
    format!(
      "{} queued, {} stalled, {} rejected",
      status.queue_depth, status.stalled, status.rejected
    ),
    if status.rejected > 0 { Color::Red } else { Color::White },
  ));

  let last = match (&status.last_synced_at, &status.last_report) {
    (Some(at), Some(report)) => format!(
      "{} ({} replayed, {} failed, {} deferred)",
      at.format("%Y-%m-%d %H:%M:%S"),
      report.replayed,
      report.failed,
      report.deferred
    ),
    _ => "never".to_string(),
  };
  lines.push(row("last sync", last, Color::White));

  if let Some(error) = &status.last_error {
    lines.push(row("last error", error.clone(), Color::Red));
  }
  if let Some(version) = &status.worker_version {
    lines.push(row("worker", version.chars().take(12).collect(), Color::DarkGray));
  }

  frame.render_widget(Paragraph::new(lines).block(block), area);
}
