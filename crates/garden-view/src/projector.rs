//! Deterministic replay of the log into a [`View`].
//!
//! Members are sorted by the total order of [`Message`] and folded one at a
//! time. Because the sort depends only on message content, the fold sees
//! the same sequence on every peer holding the same set.
//!
//! Reply nesting happens during the fold: a reply lands under its parent
//! when the parent is already on the same channel's wall, which is always
//! the case when the parent precedes it in the total order. A reply whose
//! parent is missing (not yet received, in another channel, or later in the
//! order because of clock skew) is kept at top level.

use std::collections::{BTreeMap, HashMap};

use garden_log::{Kind, Message, MessageId, ReplicatedLog};
use tracing::{debug, trace};

use crate::view::{Channel, Post, View};

/// Project the current contents of a log.
pub fn project(log: &ReplicatedLog) -> View {
    project_messages(log.iter())
}

/// Project any collection of messages. Duplicates are ignored.
pub fn project_messages<'a, I>(messages: I) -> View
where
    I: IntoIterator<Item = &'a Message>,
{
    let mut sorted: Vec<&Message> = messages.into_iter().collect();
    sorted.sort();
    sorted.dedup();

    let mut builder = ViewBuilder::default();
    for message in sorted {
        builder.apply(message);
    }
    let view = builder.finish();

    debug!(
        channels = view.channels.len(),
        nicks = view.nicks.len(),
        unknown = view.unknown,
        "Projected view"
    );
    view
}

/// A post while its wall is being assembled; children refer to arena slots.
#[derive(Debug)]
struct Node {
    id: MessageId,
    author: String,
    time: u64,
    text: String,
    children: Vec<usize>,
}

#[derive(Debug, Default)]
struct ChannelBuilder {
    users: std::collections::BTreeSet<String>,
    nodes: Vec<Node>,
    roots: Vec<usize>,
    index: HashMap<MessageId, usize>,
}

impl ChannelBuilder {
    fn post(&mut self, message: &Message, text: &str) {
        let slot = self.nodes.len();
        self.nodes.push(Node {
            id: message.id(),
            author: message.author().to_string(),
            time: message.time(),
            text: text.to_string(),
            children: Vec::new(),
        });
        self.index.insert(message.id(), slot);

        let parent = message.parent().and_then(|id| self.index.get(&id).copied());
        match parent {
            Some(parent) => self.nodes[parent].children.push(slot),
            None => {
                if let Some(missing) = message.parent() {
                    trace!(
                        post = %message.id().short(),
                        parent = %missing.short(),
                        "Reply parent not on wall, keeping at top level"
                    );
                }
                self.roots.push(slot);
            }
        }
    }

    fn finish(self) -> Channel {
        // Children are always pushed after their parent, so building from the
        // back means every child is finished before the node that owns it.
        let mut built: Vec<Option<Post>> = Vec::with_capacity(self.nodes.len());
        built.resize_with(self.nodes.len(), || None);

        for (slot, node) in self.nodes.into_iter().enumerate().rev() {
            let replies = node
                .children
                .iter()
                .filter_map(|child| built[*child].take())
                .collect();
            built[slot] = Some(Post {
                id: node.id,
                author: node.author,
                time: node.time,
                text: node.text,
                replies,
            });
        }

        let wall = self
            .roots
            .iter()
            .filter_map(|root| built[*root].take())
            .collect();

        Channel {
            users: self.users,
            wall,
        }
    }
}

#[derive(Debug, Default)]
struct ViewBuilder {
    channels: BTreeMap<String, ChannelBuilder>,
    nicks: BTreeMap<String, String>,
    unknown: usize,
}

impl ViewBuilder {
    fn channel(&mut self, name: &str) -> &mut ChannelBuilder {
        self.channels.entry(name.to_string()).or_default()
    }

    fn apply(&mut self, message: &Message) {
        match message.kind() {
            Kind::Nick => {
                if let Some(nick) = message.text() {
                    self.nicks
                        .insert(message.author().to_string(), nick.to_string());
                }
            }
            Kind::Post => {
                if let (Some(name), Some(text)) = (message.channel(), message.text()) {
                    let channel = self.channel(name);
                    channel.users.insert(message.author().to_string());
                    channel.post(message, text);
                }
            }
            Kind::Join => {
                if let Some(name) = message.channel() {
                    self.channel(name)
                        .users
                        .insert(message.author().to_string());
                }
            }
            Kind::Part => {
                if let Some(name) = message.channel() {
                    self.channel(name).users.remove(message.author());
                }
            }
            Kind::Unknown(tag) => {
                trace!(kind = tag, id = %message.id().short(), "Unknown kind kept but not projected");
                self.unknown += 1;
            }
        }
    }

    fn finish(self) -> View {
        View {
            channels: self
                .channels
                .into_iter()
                .map(|(name, builder)| (name, builder.finish()))
                .collect(),
            nicks: self.nicks,
            unknown: self.unknown,
        }
    }
}
