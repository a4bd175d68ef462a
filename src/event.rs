use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};
use std::time::Duration;
use tokio::sync::mpsc;

/// Application events
#[derive(Debug)]
pub enum Event {
  /// Terminal key press
  Key(KeyEvent),
  /// Terminal focus gained (`true`) or lost. Needs focus reporting enabled.
  Focus(bool),
  /// Periodic tick for redrawing sync status
  Tick,
  /// Outcome of a background action, for the message line
  Notice(String),
  /// Queue snapshot read from the offline store
  Queue(Vec<QueueRow>),
}

/// One pending mutation as shown in the queue panel
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRow {
  pub id: String,
  pub method: String,
  pub endpoint: String,
  pub attempts: u32,
  pub status: String,
  pub last_error: Option<String>,
}

/// Event handler that produces events from terminal input and a tick timer
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let reader_tx = tx.clone();

    tokio::task::spawn_blocking(move || loop {
      let event = if event::poll(tick_rate).unwrap_or(false) {
        match event::read() {
          Ok(CrosstermEvent::Key(key)) if key.kind == KeyEventKind::Press => Event::Key(key),
          Ok(CrosstermEvent::FocusGained) => Event::Focus(true),
          Ok(CrosstermEvent::FocusLost) => Event::Focus(false),
          _ => continue,
        }
      } else {
        Event::Tick
      };

      if reader_tx.send(event).is_err() {
        break;
      }
    });

    Self { tx, rx }
  }

  /// Sender for background tasks reporting back to the UI
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
