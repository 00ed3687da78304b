//! Grounded answer prompt

use crate::commands::ScoredEmail;

const INSTRUCTIONS: &str = "Answer the question using ONLY the SOURCES below.\n\
If the answer is not contained in the sources, say you don't know.\n\
Cite sources using [1], [2], etc.\n\n";

/// Render one numbered source block
pub fn format_source(index: usize, email: &ScoredEmail) -> String {
    format!(
        "[{}] Subject: {}\nFrom: {}\nReceived: {}\nLink: {}\n\n{}",
        index, email.subject, email.sender, email.received_dt, email.weblink, email.content
    )
}

/// Build the prompt for `question`, citing `sources` as [1], [2], ...
pub fn build_prompt(question: &str, sources: &[ScoredEmail]) -> String {
    let blocks: Vec<String> = sources
        .iter()
        .enumerate()
        .map(|(i, email)| format_source(i + 1, email))
        .collect();

    format!(
        "{}SOURCES:\n{}\n\nQUESTION:\n{}\n\nANSWER:\n",
        INSTRUCTIONS,
        blocks.join("\n\n"),
        question
    )
}
