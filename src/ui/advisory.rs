use crate::provider::CompatibilityAdvisory;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

/// Rows the banner needs; zero once dismissed.
pub fn height(advisory: &CompatibilityAdvisory) -> u16 {
  if advisory.is_visible() {
    3
  } else {
    0
  }
}

/// Compatibility notice shown while offline mode is unavailable
pub fn draw_advisory(frame: &mut Frame, area: Rect, advisory: &CompatibilityAdvisory) {
  let Some(message) = advisory.message() else {
    return;
  };

  let block = Block::default()
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Yellow))
    .title(" Offline mode unavailable ")
    .title_bottom(Line::from(" d: dismiss ").right_aligned());

  let paragraph = Paragraph::new(message)
    .style(Style::default().fg(Color::Yellow))
    .wrap(Wrap { trim: true })
    .block(block);

  frame.render_widget(paragraph, area);
}
