use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Header bar: title, API host and connectivity badge
pub fn draw_header(frame: &mut Frame, area: Rect, title: &str, base_url: &str, online: Option<bool>) {
  let (badge, color) = match online {
    Some(true) => (" ONLINE ", Color::Green),
    Some(false) => (" OFFLINE ", Color::Red),
    None => (" ONLINE ONLY ", Color::Yellow),
  };

  let header = Line::from(vec![
    Span::styled(format!(" {} ", title), Style::default().fg(Color::Cyan).bold()),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(format!(" {} ", extract_host(base_url)), Style::default().fg(Color::White)),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(badge, Style::default().fg(Color::Black).bg(color).bold()),
    Span::raw("  "),
    Span::styled("<s>", Style::default().fg(Color::Cyan)),
    Span::styled(" sync", Style::default().fg(Color::DarkGray)),
    Span::raw("   "),
    Span::styled("<:>", Style::default().fg(Color::Cyan)),
    Span::styled(" command", Style::default().fg(Color::DarkGray)),
    Span::raw("   "),
    Span::styled("<q>", Style::default().fg(Color::Cyan)),
    Span::styled(" quit", Style::default().fg(Color::DarkGray)),
  ]);

  frame.render_widget(
    Paragraph::new(header).style(Style::default().bg(Color::Black)),
    area,
  );
}

/// Host and port of the API, without scheme or path
fn extract_host(url: &str) -> &str {
  let rest = url
    .strip_prefix("https://")
    .or_else(|| url.strip_prefix("http://"))
    .unwrap_or(url);
  rest.split('/').next().unwrap_or(rest)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_extract_host() {
    assert_eq!(extract_host("https://api.hacienda.app/v1/"), "api.hacienda.app");
    assert_eq!(extract_host("http://localhost:8000/api/"), "localhost:8000");
    assert_eq!(extract_host("hacienda.local"), "hacienda.local");
  }
}
