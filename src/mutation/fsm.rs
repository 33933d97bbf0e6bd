//! The mutation FSM's per-turn transition function. States `{field_selection,
//! field_value, confirmation}`; events are user messages. See spec §4.6.

use std::sync::LazyLock;

use regex::Regex;

use crate::mutation::{Awaiting, FieldKind, MutationState, field_kind, suggested_options};
use crate::sql::builder::parse_kv_pairs;

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

const GLOBAL_CANCEL_WORDS: &[&str] = &["cancel", "stop", "exit", "abort"];
const CONFIRM_YES_WORDS: &[&str] = &["yes", "y", "confirm", "confirmed", "proceed"];
const CONFIRM_NO_WORDS: &[&str] = &["no", "n", "edit", "change"];
const PAGING_NEXT_WORDS: &[&str] = &["next", "more"];
const PAGING_PREV_WORDS: &[&str] = &["prev", "back"];
const COMMAND_PREFIXES: &[&str] = &[
    "create ", "insert ", "add ", "update ", "show ", "list ", "count ", "get ", "find ",
];

/// The result of feeding one message through the FSM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Global cancel: state should be cleared by the caller.
    Cancelled,
    /// Still in progress; `state` was mutated and the caller should render
    /// the appropriate prompt for its new (or unchanged) `awaiting` value.
    Continue,
    /// Confirmation accepted: `state.operation`/`table`/`collected_fields`
    /// are final. The caller builds `mutation_context` from them and clears
    /// the persisted state.
    Confirmed,
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

fn is_cancel(text: &str) -> bool {
    GLOBAL_CANCEL_WORDS.contains(&normalize(text).as_str())
}

fn is_command_like(text: &str) -> bool {
    let lower = normalize(text);
    COMMAND_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Feeds `message` through the FSM, mutating `state` in place.
pub fn step(state: &mut MutationState, message: &str) -> StepOutcome {
    if is_cancel(message) {
        return StepOutcome::Cancelled;
    }

    match state.awaiting {
        Awaiting::FieldSelection => step_field_selection(state, message),
        Awaiting::FieldValue => step_field_value(state, message),
        Awaiting::Confirmation => step_confirmation(state, message),
    }
}

fn step_field_selection(state: &mut MutationState, message: &str) -> StepOutcome {
    let lower = normalize(message);

    if PAGING_NEXT_WORDS.contains(&lower.as_str()) {
        state.page = (state.page + 1).min(state.max_page());
        return StepOutcome::Continue;
    }
    if PAGING_PREV_WORDS.contains(&lower.as_str()) {
        state.page = state.page.saturating_sub(1);
        return StepOutcome::Continue;
    }

    if is_command_like(message) {
        return StepOutcome::Continue;
    }

    let page_fields = state.page_fields();

    if let Ok(index) = lower.parse::<usize>() {
        if index >= 1 && index <= page_fields.len() {
            state.pending_field = page_fields[index - 1].clone();
            state.awaiting = Awaiting::FieldValue;
            return StepOutcome::Continue;
        }
    }

    let remaining = state.remaining_fields();
    if let Some(matched) = remaining.iter().find(|f| f.to_lowercase() == lower) {
        state.pending_field = matched.clone();
        state.awaiting = Awaiting::FieldValue;
        return StepOutcome::Continue;
    }

    // Any other non-command text is treated as a value for the current
    // pending field.
    accept_value_and_advance(state, message)
}

fn step_field_value(state: &mut MutationState, message: &str) -> StepOutcome {
    let parsed = parse_kv_pairs(message);
    if let Some((key, value)) = parsed
        .into_iter()
        .find(|(k, v)| state.required_fields.iter().any(|f| f == k) && !v.trim().is_empty())
    {
        state.collected_fields.insert(key, value);
        return advance_after_collection(state);
    }

    if is_command_like(message) {
        return StepOutcome::Continue;
    }

    if let Some(options) = suggested_options(&state.pending_field) {
        if let Some(value) = match_suggested_option(&options, message) {
            state.collected_fields.insert(state.pending_field.clone(), value);
            return advance_after_collection(state);
        }
    }

    accept_value_and_advance(state, message)
}

static PAREN_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\((\d+)\)").unwrap());

/// Resolves free-text input against a field's suggested options: a bare
/// numeric index into the option list (1-based), a parenthesized canonical
/// value (e.g. `"Weekly (2)"`), or a case-insensitive label match.
fn match_suggested_option(options: &[(&'static str, &'static str)], input: &str) -> Option<String> {
    let trimmed = input.trim();

    if let Ok(index) = trimmed.parse::<usize>() {
        if index >= 1 {
            if let Some((_, value)) = options.get(index - 1) {
                return Some(value.to_string());
            }
        }
    }

    if let Some(caps) = PAREN_NUMBER_RE.captures(trimmed) {
        let candidate = &caps[1];
        if options.iter().any(|(_, value)| *value == candidate) {
            return Some(candidate.to_string());
        }
    }

    let label_part = trimmed.split('(').next().unwrap_or(trimmed).trim();
    options
        .iter()
        .find(|(label, _)| label.eq_ignore_ascii_case(label_part))
        .map(|(_, value)| value.to_string())
}

/// Adopts the whole (trimmed) text as the current pending field's value,
/// rejecting it if there is no pending field to assign to, or if the
/// field's kind implies a format the text doesn't satisfy (e.g. a
/// non-`YYYY-MM-DD` value for a date field).
fn accept_value_and_advance(state: &mut MutationState, message: &str) -> StepOutcome {
    if state.pending_field.is_empty() {
        return StepOutcome::Continue;
    }
    let value = message.trim().to_string();
    if value.is_empty() {
        return StepOutcome::Continue;
    }
    if field_kind(&state.pending_field) == FieldKind::Date && !DATE_RE.is_match(&value) {
        return StepOutcome::Continue;
    }
    state
        .collected_fields
        .insert(state.pending_field.clone(), value);
    advance_after_collection(state)
}

fn advance_after_collection(state: &mut MutationState) -> StepOutcome {
    if state.is_complete() {
        state.awaiting = Awaiting::Confirmation;
        state.pending_field.clear();
    } else {
        state.awaiting = Awaiting::FieldSelection;
        state.page = 0;
        state.pending_field = state.remaining_fields().first().cloned().unwrap_or_default();
    }
    StepOutcome::Continue
}

fn step_confirmation(state: &mut MutationState, message: &str) -> StepOutcome {
    let lower = normalize(message);

    if CONFIRM_YES_WORDS.contains(&lower.as_str()) {
        return StepOutcome::Confirmed;
    }

    if CONFIRM_NO_WORDS.contains(&lower.as_str()) {
        state.collected_fields.clear();
        state.awaiting = Awaiting::FieldSelection;
        state.page = 0;
        state.pending_field = state.required_fields.first().cloned().unwrap_or_default();
        return StepOutcome::Continue;
    }

    StepOutcome::Continue
}

/// Renders the field-selection menu for the current page of remaining
/// fields.
pub fn render_field_selection(state: &MutationState) -> String {
    let page_fields = state.page_fields();
    if page_fields.is_empty() {
        return format!("All fields collected for {}. Type `yes` to confirm.", state.table);
    }
    let mut lines = vec![format!(
        "Let's fill in `{}` ({}). Pick a field:",
        state.table,
        state.operation.as_str()
    )];
    for (idx, field) in page_fields.iter().enumerate() {
        let description = state
            .field_descriptions
            .get(field)
            .map(|d| format!(" — {d}"))
            .unwrap_or_default();
        lines.push(format!("{}. {field}{description}", idx + 1));
    }
    if state.max_page() > 0 {
        lines.push(format!("(page {} of {}; say `next`/`prev` to page)", state.page + 1, state.max_page() + 1));
    }
    lines.join("\n")
}

/// Renders the value prompt for the field currently pending.
pub fn render_field_value_prompt(state: &MutationState) -> String {
    let description = state
        .field_descriptions
        .get(&state.pending_field)
        .map(|d| format!(" ({d})"))
        .unwrap_or_default();
    let mut message = format!("Please provide a value for `{}`{description}.", state.pending_field);

    if let Some(options) = suggested_options(&state.pending_field) {
        let labels: Vec<String> = options
            .iter()
            .map(|(label, value)| format!("{label} ({value})"))
            .collect();
        message.push_str(&format!(" Options: {}.", labels.join(", ")));
    } else if field_kind(&state.pending_field) == crate::mutation::FieldKind::Date {
        message.push_str(" Format: YYYY-MM-DD.");
    }
    message
}

/// Renders the confirmation summary before executing the mutation.
pub fn render_confirmation(state: &MutationState) -> String {
    let preview = state
        .collected_fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Please review before {}: {} ({preview}). Reply `yes` to proceed or `no` to edit.",
        state.operation.as_str(),
        state.table
    )
}

pub fn render_cancelled() -> String {
    "Mutation cancelled.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::MutationOperation;

    fn scheduler_state() -> MutationState {
        let mut state = MutationState::new(
            MutationOperation::Insert,
            "scheduler_details".into(),
            vec!["date".into(), "occurrence".into()],
        );
        state.field_descriptions.insert("date".into(), "Schedule date".into());
        state.field_descriptions.insert("occurrence".into(), "Repeat pattern".into());
        state.pending_field = "date".into();
        state.awaiting = Awaiting::FieldValue;
        state
    }

    #[test]
    fn stepwise_collection_moves_to_next_field() {
        let mut state = scheduler_state();
        let outcome = step(&mut state, "2026-02-14");
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(state.collected_fields.get("date").unwrap(), "2026-02-14");
        assert_eq!(state.awaiting, Awaiting::FieldSelection);
        assert_eq!(state.pending_field, "occurrence");
    }

    #[test]
    fn option_label_input_is_normalized_to_numeric_value() {
        let mut state = scheduler_state();
        state.pending_field = "occurrence".into();
        let outcome = step(&mut state, "Weekly (2)");
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(state.collected_fields.get("occurrence").unwrap(), "2");
    }

    #[test]
    fn bare_numeric_index_into_options_substitutes_canonical_value() {
        let mut state = scheduler_state();
        state.pending_field = "occurrence".into();
        let outcome = step(&mut state, "2");
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(state.collected_fields.get("occurrence").unwrap(), "2");
    }

    #[test]
    fn all_fields_collected_transitions_to_confirmation() {
        let mut state = scheduler_state();
        state.required_fields = vec!["date".into()];
        let outcome = step(&mut state, "2026-02-14");
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(state.awaiting, Awaiting::Confirmation);
    }

    #[test]
    fn confirmation_yes_resolves() {
        let mut state = scheduler_state();
        state.awaiting = Awaiting::Confirmation;
        state.collected_fields.insert("date".into(), "2026-02-14".into());
        state.collected_fields.insert("occurrence".into(), "2".into());
        assert_eq!(step(&mut state, "yes"), StepOutcome::Confirmed);
    }

    #[test]
    fn confirmation_no_resets_to_field_selection() {
        let mut state = scheduler_state();
        state.awaiting = Awaiting::Confirmation;
        state.collected_fields.insert("date".into(), "2026-02-14".into());
        assert_eq!(step(&mut state, "no"), StepOutcome::Continue);
        assert_eq!(state.awaiting, Awaiting::FieldSelection);
        assert!(state.collected_fields.is_empty());
    }

    #[test]
    fn global_cancel_words_win_regardless_of_state() {
        let mut state = scheduler_state();
        assert_eq!(step(&mut state, "cancel"), StepOutcome::Cancelled);
        state.awaiting = Awaiting::Confirmation;
        assert_eq!(step(&mut state, "abort"), StepOutcome::Cancelled);
    }

    #[test]
    fn command_like_prefix_in_field_selection_rerenders_without_mutating() {
        let mut state = scheduler_state();
        state.awaiting = Awaiting::FieldSelection;
        let before = state.collected_fields.clone();
        let outcome = step(&mut state, "create schedule");
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(state.collected_fields, before);
        assert_eq!(state.pending_field, "date");
    }

    #[test]
    fn numeric_field_selection_moves_to_field_value() {
        let mut state = scheduler_state();
        state.awaiting = Awaiting::FieldSelection;
        state.required_fields = vec!["occurrence".into(), "date".into()];
        state.pending_field = "occurrence".into();
        let outcome = step(&mut state, "1");
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(state.awaiting, Awaiting::FieldValue);
        assert_eq!(state.pending_field, "occurrence");
    }

    #[test]
    fn malformed_date_value_is_rejected_and_not_collected() {
        let mut state = scheduler_state();
        state.pending_field = "date".into();
        state.awaiting = Awaiting::FieldValue;
        let outcome = step(&mut state, "date - Schedule date");
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(state.awaiting, Awaiting::FieldValue);
        assert!(!state.collected_fields.contains_key("date"));
    }

    #[test]
    fn field_selection_falls_through_to_value_for_plain_text() {
        let mut state = scheduler_state();
        state.awaiting = Awaiting::FieldSelection;
        state.pending_field = "date".into();
        let outcome = step(&mut state, "2026-02-14");
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(state.collected_fields.get("date").unwrap(), "2026-02-14");
    }
}
