//! Commands available from the `:` prompt of the status view.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
  Sync,
  Dismiss,
  Refresh,
  Prune,
  Quit,
}

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
  pub action: Action,
}

pub const COMMANDS: &[Command] = &[
  Command {
    name: "sync",
    aliases: &["s", "flush"],
    description: "Replay queued changes now",
    action: Action::Sync,
  },
  Command {
    name: "refresh",
    aliases: &["r", "reload"],
    description: "Reload the queue from the offline store",
    action: Action::Refresh,
  },
  Command {
    name: "prune",
    aliases: &["p", "gc"],
    description: "Drop expired cache entries",
    action: Action::Prune,
  },
  Command {
    name: "dismiss",
    aliases: &["d", "hide"],
    description: "Hide the compatibility notice",
    action: Action::Dismiss,
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    description: "Exit hacienda",
    action: Action::Quit,
  },
];

/// Lower is better; `None` means no match.
fn rank(cmd: &Command, input: &str) -> Option<u32> {
  let aliases = || cmd.aliases.iter().copied();

  if cmd.name == input {
    Some(0)
  } else if aliases().any(|a| a == input) {
    Some(1)
  } else if cmd.name.starts_with(input) {
    Some(2)
  } else if aliases().any(|a| a.starts_with(input)) {
    Some(3)
  } else if cmd.name.contains(input) {
    Some(4)
  } else if aliases().any(|a| a.contains(input)) {
    Some(5)
  } else {
    None
  }
}

/// Commands matching `input`, best first. Empty input lists everything.
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input = input.trim().to_lowercase();
  if input.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut ranked: Vec<_> = COMMANDS
    .iter()
    .filter_map(|cmd| rank(cmd, &input).map(|r| (r, cmd)))
    .collect();
  ranked.sort_by_key(|(r, _)| *r);
  ranked.into_iter().map(|(_, cmd)| cmd).collect()
}

/// Resolve what the user typed, taking the best suggestion.
pub fn resolve(input: &str) -> Option<Action> {
  get_suggestions(input).first().map(|cmd| cmd.action)
}
