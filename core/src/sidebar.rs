/// Sidebar projection: visible conversations filtered by a search query
use crate::conversation_store::ConversationStore;
use crate::identity::Identified;
use crate::messenger_types::ConversationSummary;
use std::cmp::Ordering;

/// Visible summaries matching `query` (case-insensitive substring over
/// counterpart name, company name and job title), newest first.
/// Summaries with no messages sort last.
pub fn project(store: &ConversationStore, query: &str) -> Vec<ConversationSummary> {
    let needle = query.trim().to_lowercase();

    let mut rows: Vec<ConversationSummary> = store
        .summaries()
        .filter(|s| !s.is_hidden)
        .filter(|s| needle.is_empty() || matches_query(s, &needle))
        .cloned()
        .collect();

    rows.sort_by(|a, b| match (a.last_message_at, b.last_message_at) {
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.identity().cmp(&b.identity())),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.identity().cmp(&b.identity()),
    });
    rows
}

fn matches_query(summary: &ConversationSummary, needle: &str) -> bool {
    let company = summary.participant.company.as_ref().map(|c| c.name.as_str());
    let title = summary.context.job_title.as_deref();

    [Some(summary.participant.display_name.as_str()), company, title]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(needle))
}
