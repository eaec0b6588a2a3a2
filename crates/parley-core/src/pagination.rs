//! Windowed history loading.
//!
//! Windows are contiguous slices of the oldest-first log. An anchored window
//! starts at the anchor and carries up to `page_size` messages after it, so
//! chaining windows (each anchored at the previous window's last element)
//! walks the whole log with exactly one shared element per step.

use parley_shared::types::MessageId;
use parley_store::Message;

/// Load a window of `all`.
///
/// * `before == None`: the first `page_size` messages.
/// * `before` not in `all`: empty, meaning no more history.
/// * otherwise: the anchor followed by up to `page_size` messages.
pub fn window(before: Option<MessageId>, all: &[Message], page_size: usize) -> Vec<Message> {
    window_by(before.as_ref(), all, page_size, |m| &m.id).to_vec()
}

/// [`window`] over any slice, with ids extracted by `id_of`.
pub fn window_by<'a, T, K, F>(before: Option<&K>, all: &'a [T], page_size: usize, id_of: F) -> &'a [T]
where
    K: PartialEq,
    F: Fn(&T) -> &K,
{
    match before {
        None => &all[..page_size.min(all.len())],
        Some(anchor) => match all.iter().position(|item| id_of(item) == anchor) {
            Some(idx) => {
                let end = idx.saturating_add(1).saturating_add(page_size).min(all.len());
                &all[idx..end]
            }
            None => &[],
        },
    }
}
