//! Inline `system:` / `user:` directives in completion prompts.
//!
//! The split is order-dependent and purely substring based. A prompt whose
//! body contains the literal text `user:` or `system:` is split there too;
//! clients depend on this exact behavior, so it is kept as is.

use super::context::Turn;

const SYSTEM_MARKER: &str = "system:";
const USER_MARKER: &str = "user:";

/// Turn a free-text completion prompt into conversation turns.
///
/// * No `system:` marker: the whole prompt (untrimmed) is one user turn.
/// * Otherwise the text between the first `system:` and the next `system:`
///   is the section; its part before the first `user:` is the system turn,
///   the part between the first and second `user:` is the user turn. When
///   that is empty the text before `system:` is used instead.
/// * An empty user section yields no user turn.
pub fn parse_prompt(prompt: &str) -> Vec<Turn> {
    if !prompt.contains(SYSTEM_MARKER) {
        return vec![Turn::user(prompt)];
    }

    let mut parts = prompt.split(SYSTEM_MARKER);
    let before = parts.next().unwrap_or_default();
    let section = parts.next().unwrap_or_default();

    let mut sections = section.split(USER_MARKER);
    let system = sections.next().unwrap_or_default().trim();
    let user = sections
        .next()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| before.trim());

    let mut turns = vec![Turn::system(system)];
    if !user.is_empty() {
        turns.push(Turn::user(user));
    }
    turns
}
