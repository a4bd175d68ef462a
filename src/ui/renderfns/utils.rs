use crate::store::MutationStatus;
use ratatui::prelude::Color;

/// Truncate to `max_len` characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

pub fn mutation_status_color(status: &str) -> Color {
  match status {
    s if s == MutationStatus::Rejected.as_str() => Color::Red,
    s if s == MutationStatus::Stalled.as_str() => Color::Yellow,
    _ => Color::White,
  }
}

pub fn connectivity_color(online: bool) -> Color {
  if online {
    Color::Green
  } else {
    Color::Red
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_truncate_short_string() {
    assert_eq!(truncate("leche", 10), "leche");
  }

  #[test]
  fn test_truncate_exact_length() {
    assert_eq!(truncate("leche", 5), "leche");
  }

  #[test]
  fn test_truncate_long_string() {
    assert_eq!(truncate("ganado/42/vacunas", 8), "ganad...");
  }

  #[test]
  fn test_truncate_multibyte() {
    assert_eq!(truncate("configuración", 8), "confi...");
    assert_eq!(truncate("niño", 4), "niño");
  }

  #[test]
  fn test_mutation_status_color() {
    assert_eq!(mutation_status_color("rejected"), Color::Red);
    assert_eq!(mutation_status_color("stalled"), Color::Yellow);
    assert_eq!(mutation_status_color("pending"), Color::White);
  }

  #[test]
  fn test_connectivity_color() {
    assert_eq!(connectivity_color(true), Color::Green);
    assert_eq!(connectivity_color(false), Color::Red);
  }
}
