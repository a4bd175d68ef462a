use crate::api::ApiClient;
use crate::commands::{self, Action, Command};
use crate::event::{Event, EventHandler, QueueRow};
use crate::provider::{CompatibilityAdvisory, OfflineProvider};
use crate::store::{CachePolicy, PendingMutation, StoreExt, StoreKind};
use crate::sync::{LifecycleSignal, SyncStatus, Visibility};
use crate::worker::WorkerRegistrationState;
use chrono::Utc;
use color_eyre::Result;
use crossterm::event::{DisableFocusChange, EnableFocusChange, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::io::stdout;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Input mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
  Normal,
  Command,
}

/// Status view over one offline session
pub struct App {
  provider: OfflineProvider<ApiClient>,

  /// `None` when offline mode is unavailable
  status: Option<watch::Receiver<SyncStatus>>,

  cache_policy: CachePolicy,

  mode: Mode,
  command_input: String,
  selected_suggestion: usize,

  /// Last snapshot of the mutation queue
  queue: Vec<QueueRow>,

  /// One-line feedback from the last action
  notice: Option<String>,

  base_url: String,
  title: String,

  event_tx: mpsc::UnboundedSender<Event>,
  should_quit: bool,
}

impl App {
  pub fn new(
    provider: OfflineProvider<ApiClient>,
    cache_policy: CachePolicy,
    base_url: &str,
    title: Option<String>,
  ) -> Self {
    let (tx, _rx) = mpsc::unbounded_channel();

    Self {
      status: provider.status(),
      provider,
      cache_policy,
      mode: Mode::Normal,
      command_input: String::new(),
      selected_suggestion: 0,
      queue: Vec::new(),
      notice: None,
      base_url: base_url.to_string(),
      title: title.unwrap_or_else(|| "hacienda".to_string()),
      event_tx: tx,
      should_quit: false,
    }
  }

  pub async fn run(mut self) -> Result<()> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    stdout().execute(EnableFocusChange)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut events = EventHandler::new(Duration::from_millis(250));
    self.event_tx = events.sender();

    // A freshly opened terminal has focus
    self
      .provider
      .signal(LifecycleSignal::Visibility(Visibility::Visible));
    self.load_queue();

    let result = self.event_loop(&mut terminal, &mut events).await;

    stdout().execute(DisableFocusChange)?;
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    drop(events);
    self.provider.shutdown().await;
    result
  }

  async fn event_loop<B: Backend>(
    &mut self,
    terminal: &mut Terminal<B>,
    events: &mut EventHandler,
  ) -> Result<()> {
    while !self.should_quit {
      terminal.draw(|frame| crate::ui::draw(frame, self))?;

      if let Some(event) = events.next().await {
        self.handle_event(event);
      }
    }
    Ok(())
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Focus(focused) => {
        let visibility = if focused {
          Visibility::Visible
        } else {
          Visibility::Hidden
        };
        self.provider.signal(LifecycleSignal::Visibility(visibility));
      }
      Event::Tick => {
        // Reload the queue whenever the coordinator published something new
        let changed = match self.status.as_mut() {
          Some(rx) if rx.has_changed().unwrap_or(false) => {
            rx.borrow_and_update();
            true
          }
          _ => false,
        };
        if changed {
          self.load_queue();
        }
      }
      Event::Notice(msg) => self.notice = Some(msg),
      Event::Queue(rows) => self.queue = rows,
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    match self.mode {
      Mode::Normal => self.handle_normal_mode_key(key),
      Mode::Command => self.handle_command_mode_key(key),
    }
  }

  fn handle_normal_mode_key(&mut self, key: KeyEvent) {
    match key.code {
      KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.should_quit = true;
      }
      KeyCode::Char('q') => self.perform(Action::Quit),
      KeyCode::Char('s') => self.perform(Action::Sync),
      KeyCode::Char('d') => self.perform(Action::Dismiss),
      KeyCode::Char('r') => self.perform(Action::Refresh),
      KeyCode::Char(':') => {
        self.mode = Mode::Command;
        self.command_input.clear();
        self.selected_suggestion = 0;
      }
      _ => {}
    }
  }

  fn handle_command_mode_key(&mut self, key: KeyEvent) {
    match key.code {
      KeyCode::Esc => {
        self.mode = Mode::Normal;
        self.command_input.clear();
        self.selected_suggestion = 0;
      }
      KeyCode::Enter => {
        let action = commands::get_suggestions(&self.command_input)
          .get(self.selected_suggestion)
          .map(|cmd| cmd.action)
          .or_else(|| commands::resolve(&self.command_input));
        self.mode = Mode::Normal;
        self.selected_suggestion = 0;
        match action {
          Some(action) => self.perform(action),
          None => self.notice = Some(format!("Unknown command: {}", self.command_input.trim())),
        }
        self.command_input.clear();
      }
      KeyCode::Tab | KeyCode::Down => {
        let len = commands::get_suggestions(&self.command_input).len();
        if len > 0 {
          self.selected_suggestion = (self.selected_suggestion + 1) % len;
        }
      }
      KeyCode::BackTab | KeyCode::Up => {
        let len = commands::get_suggestions(&self.command_input).len();
        if len > 0 {
          self.selected_suggestion = (self.selected_suggestion + len - 1) % len;
        }
      }
      KeyCode::Backspace => {
        self.command_input.pop();
        self.selected_suggestion = 0;
      }
      KeyCode::Char(c) => {
        self.command_input.push(c);
        self.selected_suggestion = 0;
      }
      _ => {}
    }
  }

  fn perform(&mut self, action: Action) {
    match action {
      Action::Quit => self.should_quit = true,
      Action::Dismiss => self.provider.dismiss_advisory(),
      Action::Sync => {
        let msg = if self.provider.signal(LifecycleSignal::SyncRequested) {
          "Sync requested"
        } else {
          "Offline mode is unavailable, nothing to sync"
        };
        self.notice = Some(msg.to_string());
      }
      Action::Refresh => self.load_queue(),
      Action::Prune => self.prune_cache(),
    }
  }

  fn load_queue(&self) {
    let Some(store) = self.provider.store().cloned() else {
      return;
    };
    let tx = self.event_tx.clone();

    tokio::spawn(async move {
      let event = match store.get_all::<PendingMutation>() {
        Ok(records) => Event::Queue(records.decoded().into_iter().map(QueueRow::from).collect()),
        Err(e) => Event::Notice(format!("Could not read the queue: {}", e)),
      };
      let _ = tx.send(event);
    });
  }

  fn prune_cache(&self) {
    let Some(store) = self.provider.store().cloned() else {
      let _ = self
        .event_tx
        .send(Event::Notice("Offline mode is unavailable, no cache to prune".to_string()));
      return;
    };
    let policy = self.cache_policy;
    let tx = self.event_tx.clone();

    tokio::spawn(async move {
      let msg = match policy.prune(store.as_ref(), Utc::now()) {
        Ok(n) => format!("Pruned {} cache entries", n),
        Err(e) => format!("Cache prune failed: {}", e),
      };
      let _ = tx.send(Event::Notice(msg));
    });
  }

  // Accessors for UI rendering
  pub fn mode(&self) -> &Mode {
    &self.mode
  }

  pub fn command_input(&self) -> &str {
    &self.command_input
  }

  pub fn autocomplete_suggestions(&self) -> Vec<&'static Command> {
    commands::get_suggestions(&self.command_input)
  }

  pub fn selected_suggestion(&self) -> usize {
    self.selected_suggestion
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  pub fn title(&self) -> &str {
    &self.title
  }

  pub fn advisory(&self) -> &CompatibilityAdvisory {
    self.provider.advisory()
  }

  pub fn registration_state(&self) -> &WorkerRegistrationState {
    self.provider.registration_state()
  }

  pub fn store_kind(&self) -> Option<StoreKind> {
    self.provider.store().map(|store| store.kind())
  }

  pub fn offline_capable(&self) -> bool {
    self.provider.client().is_offline_capable()
  }

  pub fn sync_status(&self) -> Option<SyncStatus> {
    self.status.as_ref().map(|rx| rx.borrow().clone())
  }

  pub fn worker_label(&self) -> String {
    format!("{:?}", self.provider.worker_state()).to_lowercase()
  }

  pub fn queue(&self) -> &[QueueRow] {
    &self.queue
  }

  pub fn notice(&self) -> Option<&str> {
    self.notice.as_deref()
  }
}

impl From<PendingMutation> for QueueRow {
  fn from(m: PendingMutation) -> Self {
    Self {
      id: m.id.to_string(),
      method: m.method.to_string(),
      endpoint: m.endpoint,
      attempts: m.attempt_count,
      status: m.status.as_str().to_string(),
      last_error: m.last_error,
    }
  }
}
