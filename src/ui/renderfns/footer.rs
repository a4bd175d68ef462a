use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Message line: worker state on the left, last notice after it
pub fn draw_footer(frame: &mut Frame, area: Rect, worker: &str, notice: Option<&str>) {
  let mut spans = vec![
    Span::raw(" "),
    Span::styled("worker", Style::default().fg(Color::DarkGray)),
    Span::styled(" > ", Style::default().fg(Color::DarkGray)),
    Span::styled(worker.to_string(), Style::default().fg(Color::Cyan).bold()),
  ];

  if let Some(notice) = notice {
    spans.push(Span::styled("  │  ", Style::default().fg(Color::DarkGray)));
    spans.push(Span::styled(notice.to_string(), Style::default().fg(Color::White)));
  }

  frame.render_widget(
    Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black)),
    area,
  );
}
