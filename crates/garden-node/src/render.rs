//! Plain-text rendering of a channel.

use std::fmt::Write;

use garden_view::{Grouping, View};

/// `hh:mm:ss` (UTC) for a millisecond timestamp.
pub fn clock(time_ms: u64) -> String {
    let secs = time_ms / 1000;
    format!(
        "{:02}:{:02}:{:02}",
        (secs / 3600) % 24,
        (secs / 60) % 60,
        secs % 60
    )
}

/// Renders the current channel of a view.
#[derive(Debug, Clone)]
pub struct Renderer {
    pub grouping: Grouping,
    pub local_id: String,
}

impl Renderer {
    pub fn new(grouping: Grouping, local_id: impl Into<String>) -> Self {
        Self {
            grouping,
            local_id: local_id.into(),
        }
    }

    /// Render `channel` as a header, a member list, and the wall.
    ///
    /// Members that are direct peers are marked with `*`, the local user
    /// with `(you)`.
    pub fn channel(&self, view: &View, channel: &str, peers: &[String]) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "== {} ==", channel);

        let Some(ch) = view.channel(channel) else {
            let _ = writeln!(out, "(no messages yet)");
            return out;
        };

        let users: Vec<String> = ch
            .users
            .iter()
            .map(|user| {
                let name = view.nick(user);
                if *user == self.local_id {
                    format!("{name} (you)")
                } else if peers.contains(user) {
                    format!("{name}*")
                } else {
                    name.to_string()
                }
            })
            .collect();
        let _ = writeln!(out, "users: {}", users.join(", "));
        let _ = writeln!(out);

        for line in self.grouping.layout(&ch.wall) {
            let indent = "  ".repeat(line.depth);
            if line.mark.show_gap {
                let _ = writeln!(out, "{indent}-- {} --", clock(line.post.time));
            }
            if line.mark.show_author {
                let _ = writeln!(
                    out,
                    "{indent}<{}> {}",
                    view.nick(&line.post.author),
                    clock(line.post.time)
                );
            }
            for text in line.post.text.lines() {
                let _ = writeln!(out, "{indent}  [{}] {}", line.post.id.short(), text);
            }
        }

        out
    }

    /// Render the list of direct peers.
    pub fn peers(&self, view: &View, peers: &[String]) -> String {
        if peers.is_empty() {
            return "no peers connected\n".to_string();
        }
        let mut out = String::new();
        for peer in peers {
            let _ = writeln!(out, "{} ({})", view.nick(peer), peer);
        }
        out
    }
}
