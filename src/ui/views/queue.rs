use crate::event::QueueRow;
use crate::ui::renderfns::{mutation_status_color, truncate};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};

pub fn draw_queue(frame: &mut Frame, area: Rect, rows: &[QueueRow], offline_capable: bool) {
  let block = Block::default()
    .title(format!(" Queue ({}) ", rows.len()))
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  if rows.is_empty() {
    let content = if offline_capable {
      "Nothing waiting to sync."
    } else {
      "Changes are not queued while offline mode is unavailable."
    };
    let paragraph = Paragraph::new(content)
      .block(block)
      .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(paragraph, area);
    return;
  }

  let items: Vec<ListItem> = rows
    .iter()
    .map(|row| {
      let mut spans = vec![
        Span::styled(format!("{:<8}", &row.id[..8.min(row.id.len())]), Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
        Span::styled(format!("{:<6}", row.method), Style::default().fg(Color::Cyan)),
        Span::raw(" "),
        Span::raw(format!("{:<32}", truncate(&row.endpoint, 32))),
        Span::raw(" "),
        Span::styled(
          format!("{:<9}", row.status),
          Style::default().fg(mutation_status_color(&row.status)),
        ),
        Span::styled(format!("x{}", row.attempts), Style::default().fg(Color::DarkGray)),
      ];
      if let Some(error) = &row.last_error {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(truncate(error, 40), Style::default().fg(Color::Red)));
      }
      ListItem::new(Line::from(spans))
    })
    .collect();

  frame.render_widget(List::new(items).block(block), area);
}
