// Comment threads: rebuild the reply tree from a flat comment list.
//
// Comments are stored flat with an explicit parent_id. Display code wants
// nesting, so we do one pass over the creation-ordered sequence, bucket
// children by parent id, then assemble recursively from the roots.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::models::ContentItem;

/// One comment and its replies.
#[derive(Debug, Clone, Serialize)]
pub struct CommentNode {
    pub comment: ContentItem,
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    /// Total comments in this subtree, including this one.
    pub fn size(&self) -> usize {
        1 + self.replies.iter().map(CommentNode::size).sum::<usize>()
    }
}

/// Build the reply tree for a flat, creation-ordered list of comments.
///
/// Sibling order follows input order. A comment whose parent isn't in the
/// list (deleted, or belongs elsewhere) is promoted to a root rather than
/// dropped. Parent cycles can't occur with append-only ids, but a comment
/// that is its own parent is treated as a root too.
pub fn build_thread(comments: Vec<ContentItem>) -> Vec<CommentNode> {
    let present: HashSet<i64> = comments.iter().map(|c| c.id).collect();

    let mut roots = Vec::new();
    let mut children: HashMap<i64, Vec<ContentItem>> = HashMap::new();
    for comment in comments {
        match comment.parent_id {
            Some(parent) if parent != comment.id && present.contains(&parent) => {
                children.entry(parent).or_default().push(comment);
            }
            _ => roots.push(comment),
        }
    }

    roots
        .into_iter()
        .map(|root| attach(root, &mut children))
        .collect()
}

fn attach(comment: ContentItem, children: &mut HashMap<i64, Vec<ContentItem>>) -> CommentNode {
    let replies = children
        .remove(&comment.id)
        .unwrap_or_default()
        .into_iter()
        .map(|child| attach(child, children))
        .collect();
    CommentNode { comment, replies }
}
