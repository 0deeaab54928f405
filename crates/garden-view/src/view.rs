//! View types handed to renderers.

use std::collections::{BTreeMap, BTreeSet};

use garden_log::MessageId;
use serde::Serialize;

/// A post on a channel wall, with its replies nested beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    pub id: MessageId,
    pub author: String,
    pub time: u64,
    pub text: String,
    pub replies: Vec<Post>,
}

impl Post {
    /// Find a post by id in this post or any reply below it.
    pub fn find(&self, id: &MessageId) -> Option<&Post> {
        if self.id == *id {
            return Some(self);
        }
        self.replies.iter().find_map(|reply| reply.find(id))
    }

    /// Number of posts in this subtree, including this one.
    pub fn thread_len(&self) -> usize {
        1 + self.replies.iter().map(Post::thread_len).sum::<usize>()
    }
}

/// One channel: who is in it and what has been said.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub users: BTreeSet<String>,
    pub wall: Vec<Post>,
}

impl Channel {
    /// Find a post anywhere on the wall.
    pub fn find_post(&self, id: &MessageId) -> Option<&Post> {
        self.wall.iter().find_map(|post| post.find(id))
    }

    /// Total posts on the wall, replies included.
    pub fn post_count(&self) -> usize {
        self.wall.iter().map(Post::thread_len).sum()
    }
}

/// Deterministic projection of the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct View {
    pub channels: BTreeMap<String, Channel>,
    pub nicks: BTreeMap<String, String>,
    /// Log members of kinds this version does not project.
    pub unknown: usize,
}

impl View {
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    /// Display name for a peer, falling back to the peer id.
    pub fn nick<'a>(&'a self, peer: &'a str) -> &'a str {
        self.nicks.get(peer).map(String::as_str).unwrap_or(peer)
    }

    /// Find a post in any channel.
    pub fn find_post(&self, id: &MessageId) -> Option<(&str, &Post)> {
        self.channels
            .iter()
            .find_map(|(name, channel)| channel.find_post(id).map(|post| (name.as_str(), post)))
    }

    /// Resolve a hex id prefix to a post id, if exactly one post matches.
    pub fn resolve_prefix(&self, prefix: &str) -> Option<MessageId> {
        if prefix.is_empty() {
            return None;
        }
        let mut found = None;
        for channel in self.channels.values() {
            let mut stack: Vec<&Post> = channel.wall.iter().collect();
            while let Some(post) = stack.pop() {
                if post.id.to_hex().starts_with(prefix) {
                    if found.is_some() {
                        return None;
                    }
                    found = Some(post.id);
                }
                stack.extend(post.replies.iter());
            }
        }
        found
    }
}
