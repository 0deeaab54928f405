//! Render-time thread grouping.
//!
//! Consecutive posts by one author read as a single block: the author label
//! is printed once. The block breaks when another author speaks, or when the
//! author's previous post is more than `gap_ms` old, in which case the
//! renderer also emits a time-gap marker.
//!
//! Grouping is a fold over `(author, time)` pairs. The accumulator is the
//! explicit [`GroupState`] value, so every call starts from nothing and the
//! result depends on the wall alone.

use std::collections::HashMap;

use crate::view::Post;

/// Default gap after which an author's post starts a new block.
pub const DEFAULT_GROUP_GAP_MS: u64 = 60_000;

/// How a post should be decorated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mark {
    /// Print the author label before this post.
    pub show_author: bool,
    /// Print a time-gap marker before this post.
    pub show_gap: bool,
}

impl Mark {
    /// Whether this post continues the block above it.
    pub fn is_continuation(&self) -> bool {
        !self.show_author && !self.show_gap
    }
}

/// Fold accumulator for [`Grouping::step`].
#[derive(Debug, Clone, Default)]
pub struct GroupState {
    previous_author: Option<String>,
    last_post: HashMap<String, u64>,
}

/// Grouping rule with a configurable gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grouping {
    pub gap_ms: u64,
}

impl Default for Grouping {
    fn default() -> Self {
        Self {
            gap_ms: DEFAULT_GROUP_GAP_MS,
        }
    }
}

/// One post in render order.
#[derive(Debug, Clone, Copy)]
pub struct Line<'a> {
    /// Reply depth, 0 for top-level posts.
    pub depth: usize,
    pub post: &'a Post,
    pub mark: Mark,
}

impl Grouping {
    pub fn new(gap_ms: u64) -> Self {
        Self { gap_ms }
    }

    /// Advance the fold by one post.
    pub fn step(&self, mut state: GroupState, author: &str, time: u64) -> (GroupState, Mark) {
        let show_gap = state
            .last_post
            .get(author)
            .is_some_and(|previous| time.saturating_sub(*previous) > self.gap_ms);
        let show_author = state.previous_author.as_deref() != Some(author) || show_gap;

        state.previous_author = Some(author.to_string());
        state.last_post.insert(author.to_string(), time);

        (
            state,
            Mark {
                show_author,
                show_gap,
            },
        )
    }

    /// Marks for a flat sequence of `(author, time)` pairs.
    pub fn marks<'a, I>(&self, posts: I) -> Vec<Mark>
    where
        I: IntoIterator<Item = (&'a str, u64)>,
    {
        let (_, marks) = posts.into_iter().fold(
            (GroupState::default(), Vec::new()),
            |(state, mut marks), (author, time)| {
                let (state, mark) = self.step(state, author, time);
                marks.push(mark);
                (state, marks)
            },
        );
        marks
    }

    /// Walk a wall depth-first (each reply right after its parent) and mark
    /// every post. The same accumulator runs through replies.
    pub fn layout<'a>(&self, wall: &'a [Post]) -> Vec<Line<'a>> {
        let mut lines = Vec::new();
        let mut state = GroupState::default();
        let mut stack: Vec<(usize, &'a Post)> = wall.iter().rev().map(|post| (0, post)).collect();

        while let Some((depth, post)) = stack.pop() {
            let (next, mark) = self.step(state, &post.author, post.time);
            state = next;
            lines.push(Line { depth, post, mark });
            stack.extend(post.replies.iter().rev().map(|reply| (depth + 1, reply)));
        }

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garden_log::MessageId;

    fn marks(gap: u64, posts: &[(&str, u64)]) -> Vec<Mark> {
        Grouping::new(gap).marks(posts.iter().copied())
    }

    fn label(show_gap: bool) -> Mark {
        Mark {
            show_author: true,
            show_gap,
        }
    }

    const GROUPED: Mark = Mark {
        show_author: false,
        show_gap: false,
    };

    #[test]
    fn same_author_within_gap_is_grouped() {
        let got = marks(DEFAULT_GROUP_GAP_MS, &[("A", 0), ("A", 500), ("B", 1000), ("A", 70_000)]);
        assert_eq!(got, vec![label(false), GROUPED, label(false), label(true)]);
    }

    #[test]
    fn threshold_boundary() {
        let at = |t| marks(DEFAULT_GROUP_GAP_MS, &[("A", 0), ("A", t)])[1];

        assert_eq!(at(59_999), GROUPED);
        assert_eq!(at(60_000), GROUPED);
        assert_eq!(at(60_001), label(true));
    }

    #[test]
    fn gap_is_configurable() {
        let got = marks(1_000, &[("A", 0), ("A", 1_001), ("A", 1_500)]);
        assert_eq!(got, vec![label(false), label(true), GROUPED]);
    }

    #[test]
    fn gap_measured_from_same_author_across_interruptions() {
        let got = marks(DEFAULT_GROUP_GAP_MS, &[("A", 0), ("B", 10_000), ("A", 50_000)]);
        // author changed, but A spoke 50s ago: label only
        assert_eq!(got[2], label(false));
    }

    #[test]
    fn out_of_order_time_does_not_underflow() {
        let got = marks(DEFAULT_GROUP_GAP_MS, &[("A", 90_000), ("A", 10)]);
        assert_eq!(got[1], GROUPED);
    }

    #[test]
    fn repeated_passes_are_identical() {
        let posts = [("A", 0), ("A", 61_000), ("B", 61_500)];
        let grouping = Grouping::default();
        assert_eq!(
            grouping.marks(posts.iter().copied()),
            grouping.marks(posts.iter().copied())
        );
    }

    #[test]
    fn layout_walks_replies_depth_first() {
        let post = |name: &str, author: &str, time: u64, replies: Vec<Post>| Post {
            id: MessageId::of(name),
            author: author.into(),
            time,
            text: name.into(),
            replies,
        };
        let wall = vec![
            post(
                "q",
                "A",
                0,
                vec![post("r1", "B", 100, vec![post("r1a", "B", 200, vec![])])],
            ),
            post("next", "B", 300, vec![]),
        ];

        let lines = Grouping::default().layout(&wall);
        let order: Vec<(&str, usize)> = lines.iter().map(|l| (l.post.text.as_str(), l.depth)).collect();
        assert_eq!(order, vec![("q", 0), ("r1", 1), ("r1a", 2), ("next", 0)]);

        assert!(lines[0].mark.show_author);
        assert!(lines[1].mark.show_author);
        assert!(lines[2].mark.is_continuation());
        assert!(lines[3].mark.is_continuation());
    }
}
