mod advisory;
mod components;
mod renderfns;
mod views;

use crate::app::{App, Mode};
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Main draw function
pub fn draw(frame: &mut Frame, app: &App) {
  let status = app.sync_status();
  let notice = app.advisory();

  let [header, banner, body, footer, status_bar] = Layout::vertical([
    Constraint::Length(1),
    Constraint::Length(advisory::height(notice)),
    Constraint::Min(1),
    Constraint::Length(1),
    Constraint::Length(1),
  ])
  .areas(frame.area());

  renderfns::draw_header(
    frame,
    header,
    app.title(),
    app.base_url(),
    status.as_ref().map(|s| s.online),
  );
  advisory::draw_advisory(frame, banner, notice);

  let [status_area, queue_area] =
    Layout::vertical([Constraint::Length(13), Constraint::Min(3)]).areas(body);
  views::draw_status(
    frame,
    status_area,
    app.registration_state(),
    app.store_kind(),
    status.as_ref(),
  );
  views::draw_queue(frame, queue_area, app.queue(), app.offline_capable());

  renderfns::draw_footer(frame, footer, &app.worker_label(), app.notice());
  draw_status_bar(frame, status_bar, app);

  if *app.mode() == Mode::Command {
    components::draw_command_overlay(
      frame,
      body,
      app.command_input(),
      &app.autocomplete_suggestions(),
      app.selected_suggestion(),
    );
  }
}

fn draw_status_bar(frame: &mut Frame, area: Rect, app: &App) {
  let (content, style) = match app.mode() {
    Mode::Normal => (
      " s:sync  r:reload  d:dismiss  :command  q:quit".to_string(),
      Style::default().fg(Color::DarkGray),
    ),
    Mode::Command => (
      format!(":{}", app.command_input()),
      Style::default().fg(Color::Yellow),
    ),
  };

  frame.render_widget(Paragraph::new(content).style(style), area);
}
