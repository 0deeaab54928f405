//! Terminal commands.
//!
//! A line starting with `/` is a command, anything else is posted to the
//! current channel.

use garden_protocols::{Action, Input};
use garden_view::View;

use crate::error::{Error, Result};

pub const HELP: &str = "\
commands:
  <text>                 post to the current channel
  /nick NAME             set your display name
  /join CHANNEL          join a channel and switch to it
  /part [CHANNEL]        leave a channel (default: current)
  /reply ID TEXT         reply to the post whose id starts with ID
  /connect PEER          connect to a peer by id or HOST:PORT
  /peers                 list connected peers
  /help                  show this help
  /quit                  save and exit
";

/// A parsed terminal line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Nick(String),
    Join(String),
    Part(Option<String>),
    Reply { prefix: String, text: String },
    Connect(String),
    Peers,
    Help,
    Quit,
}

fn required<'a>(arg: Option<&'a str>, usage: &str) -> Result<&'a str> {
    arg.map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| Error::Command(format!("usage: {usage}")))
}

/// Parse one line. Blank lines parse to `None`.
pub fn parse(line: &str) -> Result<Option<Command>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, Some(arg)),
        None => (rest, None),
    };

    let command = match name {
        "nick" => Command::Nick(required(arg, "/nick NAME")?.to_string()),
        "join" => Command::Join(required(arg, "/join CHANNEL")?.to_string()),
        "part" => Command::Part(arg.map(str::trim).filter(|a| !a.is_empty()).map(String::from)),
        "reply" => {
            let arg = required(arg, "/reply ID TEXT")?;
            let (prefix, text) = arg
                .split_once(char::is_whitespace)
                .ok_or_else(|| Error::Command("usage: /reply ID TEXT".into()))?;
            Command::Reply {
                prefix: prefix.to_string(),
                text: text.trim_start().to_string(),
            }
        }
        "connect" => Command::Connect(required(arg, "/connect PEER")?.to_string()),
        "peers" => Command::Peers,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(Error::Command(format!("unknown command /{other}, try /help"))),
    };
    Ok(Some(command))
}

/// What the front end should do with a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Hand to the coordinator.
    Send(Input),
    /// Print the peer list.
    ShowPeers,
    /// Print [`HELP`].
    ShowHelp,
}

/// Per-terminal state: the channel being looked at.
#[derive(Debug, Clone)]
pub struct Session {
    pub channel: String,
}

impl Session {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }

    /// Turn a command into an outcome. `/join` also switches the current
    /// channel; `/reply` is resolved against `view`.
    pub fn apply(&mut self, command: Command, view: &View) -> Result<Outcome> {
        let action = match command {
            Command::Say(text) => Action::Post {
                channel: self.channel.clone(),
                text,
            },
            Command::Nick(nick) => Action::Nick(nick),
            Command::Join(channel) => {
                self.channel = channel.clone();
                Action::Join(channel)
            }
            Command::Part(channel) => Action::Part(channel.unwrap_or_else(|| self.channel.clone())),
            Command::Reply { prefix, text } => {
                let parent = view
                    .resolve_prefix(&prefix)
                    .ok_or_else(|| Error::Command(format!("no unique post matches {prefix}")))?;
                let channel = view
                    .find_post(&parent)
                    .map(|(channel, _)| channel.to_string())
                    .unwrap_or_else(|| self.channel.clone());
                Action::Reply {
                    channel,
                    parent,
                    text,
                }
            }
            Command::Connect(peer) => return Ok(Outcome::Send(Input::Offer(peer))),
            Command::Peers => return Ok(Outcome::ShowPeers),
            Command::Help => return Ok(Outcome::ShowHelp),
            Command::Quit => return Ok(Outcome::Send(Input::Quit)),
        };
        Ok(Outcome::Send(Input::Author(action)))
    }
}
