//! Input-event coalescing.
//!
//! A burst of keystroke-level `input` events on one field collapses into a
//! single logical edit event carrying the full value trail. The decision is
//! merge-or-append: merge mutates the previously accepted event in place,
//! append lets the state machine create a fresh event.

use crate::config::RecorderConfig;
use crate::data::models::{CapturedEvent, EditTrail, EventKind, RawEvent};
use crate::engine::similarity::similarity;

/// Whether `incoming` should merge into the last accepted event.
pub fn should_merge(last: &CapturedEvent, incoming: &RawEvent, config: &RecorderConfig) -> bool {
    if last.kind != EventKind::Input || incoming.kind != EventKind::Input {
        return false;
    }

    let same_element = match (last.element.as_ref(), incoming.element.as_ref()) {
        (Some(a), Some(b)) => match (a.identity(), b.identity()) {
            (Some(ia), Some(ib)) => ia == ib,
            _ => false,
        },
        _ => false,
    };
    if !same_element {
        return false;
    }

    let last_edit = last.last_edit_at();
    let gap = match incoming.timestamp.checked_sub(last_edit) {
        Some(gap) => gap,
        None => return false,
    };
    if gap > config.coalesce_window_ms {
        return false;
    }

    let old = last.payload.value.as_deref().unwrap_or("");
    let new = incoming.payload.value.as_deref().unwrap_or("");
    is_progressive_edit(old, new, config)
}

/// A progressive edit is a strict append, a strict truncation, or a small
/// edit that stays close to the previous value.
fn is_progressive_edit(old: &str, new: &str, config: &RecorderConfig) -> bool {
    if new.starts_with(old) || old.starts_with(new) {
        return true;
    }
    let len_delta = old.chars().count().abs_diff(new.chars().count());
    len_delta <= config.coalesce_max_len_delta
        && similarity(old, new) > config.coalesce_min_similarity
}

/// Fold `incoming` into `last`, updating the value trail and flags.
///
/// The event id and `initial_value` are never touched.
pub fn merge_into(last: &mut CapturedEvent, incoming: &RawEvent, config: &RecorderConfig) {
    let gap = incoming.timestamp.saturating_sub(last.last_edit_at());
    let new_value = incoming.payload.value.clone().unwrap_or_default();

    let trail = last.edits.get_or_insert_with(|| {
        let first = last.payload.value.clone().unwrap_or_default();
        EditTrail {
            edit_count: 1,
            initial_value: first.clone(),
            final_value: first.clone(),
            intermediate_values: vec![first],
            had_backspace: false,
            had_pause: false,
            ended_at: last.timestamp,
            duration_ms: 0,
        }
    });

    trail.intermediate_values.push(new_value.clone());
    trail.edit_count += 1;
    trail.final_value = new_value.clone();
    trail.ended_at = incoming.timestamp;
    trail.duration_ms = incoming.timestamp.saturating_sub(last.timestamp);
    trail.had_pause = trail.had_pause || gap > config.coalesce_pause_gap_ms;
    trail.had_backspace = trail
        .intermediate_values
        .windows(2)
        .any(|pair| pair[1].chars().count() < pair[0].chars().count());

    last.payload.value = Some(new_value);
}
