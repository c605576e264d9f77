/// Reaction aggregation: per-emoji counts, increment only
use crate::messenger_types::Reaction;

/// Return a new reaction list with `emoji` counted once more.
///
/// Existing entries keep their order; an unseen emoji is appended with a
/// count of 1. There is no way to take a reaction back, so clicking the same
/// emoji twice counts twice.
pub fn apply_reaction(reactions: &[Reaction], emoji: &str) -> Vec<Reaction> {
    let mut next = reactions.to_vec();
    match next.iter_mut().find(|r| r.emoji == emoji) {
        Some(existing) => existing.count = existing.count.saturating_add(1),
        None => next.push(Reaction {
            emoji: emoji.to_string(),
            count: 1,
        }),
    }
    next
}
