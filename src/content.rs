//! Message content — plain-text, link-free bodies from template tables.

use rand::seq::SliceRandom;
use rand::{Rng, RngCore};

/// What to write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentRequest {
    pub sender_name: String,
    pub recipient_name: String,
    pub is_reply: bool,
    pub original_subject: Option<String>,
    pub original_snippet: Option<String>,
}

impl ContentRequest {
    pub fn fresh(sender_name: impl Into<String>, recipient_name: impl Into<String>) -> Self {
        Self {
            sender_name: sender_name.into(),
            recipient_name: recipient_name.into(),
            ..Self::default()
        }
    }

    pub fn reply(
        sender_name: impl Into<String>,
        recipient_name: impl Into<String>,
        original_subject: impl Into<String>,
        original_snippet: impl Into<String>,
    ) -> Self {
        Self {
            sender_name: sender_name.into(),
            recipient_name: recipient_name.into(),
            is_reply: true,
            original_subject: Some(original_subject.into()),
            original_snippet: Some(original_snippet.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedContent {
    pub subject: String,
    pub body: String,
}

/// Produces subject and body text. Implementations hold no per-call state.
pub trait ContentGenerator: Send + Sync {
    fn generate(&self, request: &ContentRequest, rng: &mut dyn RngCore) -> GeneratedContent;
}

/// `Re: <subject>` unless the subject already carries a reply prefix.
pub fn reply_subject(original: &str) -> String {
    let trimmed = original.trim();
    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// Up to four lines of `snippet`, each prefixed `> `, under a `---` rule.
pub fn quote_excerpt(snippet: &str) -> Option<String> {
    if snippet.trim().is_empty() {
        return None;
    }
    let lines: Vec<String> = snippet
        .trim()
        .lines()
        .take(4)
        .map(|l| format!("> {l}"))
        .collect();
    Some(format!("---\n{}", lines.join("\n")))
}

const SUBJECT_TEMPLATES: &[&str] = &[
    "Following up on {topic}",
    "Quick question about {topic}",
    "Checking in about {topic}",
    "Thoughts on {topic}?",
    "{topic} - a quick note",
    "Regarding {topic}",
    "Quick note on {topic}",
    "Update on {topic}",
    "{topic} - wanted to share something",
    "Just checking in on {topic}",
    "A thought about {topic}",
    "Circling back on {topic}",
    "Any progress on {topic}?",
    "About {topic}",
];

const TOPICS: &[&str] = &[
    "the project timeline",
    "our last discussion",
    "the upcoming meeting",
    "the proposal",
    "Q4 planning",
    "the draft document",
    "the deliverables",
    "the partnership",
    "your recent feedback",
    "the budget review",
    "the resource allocation",
    "the strategy session",
    "the client presentation",
    "the workflow improvements",
    "the team update",
    "the quarterly goals",
    "the onboarding process",
    "the pending review",
];

const OPENERS: &[&str] = &[
    "Hope you're doing well.",
    "Thanks for your time earlier.",
    "Just following up as promised.",
    "Wanted to check in quickly.",
    "Hope this finds you well.",
    "Hope your week is going well.",
    "Thanks for getting back to me.",
    "Just a quick note.",
    "I hope things are going smoothly on your end.",
    "Wanted to reach out quickly.",
    "Hope you had a good weekend.",
];

const REPLY_OPENERS: &[&str] = &[
    "Thanks for reaching out.",
    "Thanks for the update.",
    "Appreciate you getting back to me.",
    "Thanks for the note.",
    "Good to hear from you.",
];

const PARA_STARTERS: &[&str] = &[
    "I wanted to touch base regarding",
    "I've been thinking about",
    "Just wanted to let you know about",
    "Following our last conversation, I looked again at",
    "I had a few thoughts about",
    "Wanted to share a quick update on",
    "I came across something relevant to",
    "Building on what we talked about, I revisited",
    "I wanted to get your perspective on",
];

const SENTENCES: &[&str] = &[
    "I wanted to make sure we're aligned on the next steps.",
    "There are a few things I'd like your input on.",
    "Let me know if the timeline still works for you.",
    "I've reviewed the materials and have some thoughts.",
    "We may need to revisit a few of the assumptions.",
    "The team has made good progress since we last spoke.",
    "A couple of details still need to be confirmed.",
    "I think we can simplify the plan a little.",
    "It would help to have a rough estimate by the end of the week.",
    "Nothing urgent, just keeping you in the loop.",
    "I'll put together a short summary once things settle.",
    "Happy to adjust if your priorities have shifted.",
];

const CLOSERS: &[&str] = &[
    "Let me know your thoughts.",
    "Looking forward to hearing from you.",
    "Happy to discuss further if helpful.",
    "Please let me know if you have any questions.",
    "Feel free to reach out anytime.",
    "Let me know if there's anything I can help with.",
    "Happy to hop on a call if needed.",
    "Let me know how you'd like to proceed.",
    "Looking forward to your response.",
    "Let me know what works best for you.",
];

const SIGN_OFFS: &[&str] = &[
    "Best regards,",
    "Best,",
    "Thanks,",
    "Warm regards,",
    "Kind regards,",
    "Regards,",
    "Many thanks,",
    "Cheers,",
];

const FALLBACK_NAMES: &[&str] = &["Alex", "Jordan", "Sam", "Morgan", "Taylor", "Riley"];

fn pick<'a>(table: &[&'a str], rng: &mut dyn RngCore) -> &'a str {
    table.choose(rng).copied().unwrap_or_default()
}

/// Template-table generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn new() -> Self {
        Self
    }

    fn greeting_name(recipient_name: &str, rng: &mut dyn RngCore) -> String {
        match recipient_name.split_whitespace().next() {
            Some(first) => first.to_string(),
            None => pick(FALLBACK_NAMES, rng).to_string(),
        }
    }

    fn sentences(rng: &mut dyn RngCore) -> String {
        let n = rng.gen_range(1..=3);
        (0..n)
            .map(|_| pick(SENTENCES, rng))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn subject(rng: &mut dyn RngCore) -> String {
        pick(SUBJECT_TEMPLATES, rng).replace("{topic}", pick(TOPICS, rng))
    }

    fn body(request: &ContentRequest, rng: &mut dyn RngCore) -> String {
        let mut lines = vec![
            format!("Hi {},", Self::greeting_name(&request.recipient_name, rng)),
            String::new(),
            pick(OPENERS, rng).to_string(),
            String::new(),
        ];
        for _ in 0..rng.gen_range(1..=3) {
            let starter = pick(PARA_STARTERS, rng);
            let topic = pick(TOPICS, rng);
            lines.push(format!("{starter} {topic}. {}", Self::sentences(rng)));
            lines.push(String::new());
        }
        lines.push(pick(CLOSERS, rng).to_string());
        lines.push(String::new());
        lines.push(pick(SIGN_OFFS, rng).to_string());
        lines.push(request.sender_name.clone());
        lines.join("\n")
    }

    fn reply_body(request: &ContentRequest, rng: &mut dyn RngCore) -> String {
        [
            format!("Hi {},", Self::greeting_name(&request.recipient_name, rng)),
            String::new(),
            pick(REPLY_OPENERS, rng).to_string(),
            String::new(),
            Self::sentences(rng),
            String::new(),
            pick(CLOSERS, rng).to_string(),
            String::new(),
            pick(SIGN_OFFS, rng).to_string(),
            request.sender_name.clone(),
        ]
        .join("\n")
    }
}

impl ContentGenerator for TemplateGenerator {
    fn generate(&self, request: &ContentRequest, rng: &mut dyn RngCore) -> GeneratedContent {
        match (&request.original_subject, request.is_reply) {
            (Some(original), true) if !original.trim().is_empty() => GeneratedContent {
                subject: reply_subject(original),
                body: Self::reply_body(request, rng),
            },
            _ => GeneratedContent {
                subject: Self::subject(rng),
                body: Self::body(request, rng),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn reply_subject_adds_prefix_once() {
        assert_eq!(reply_subject("Hello"), "Re: Hello");
        assert_eq!(reply_subject("RE: Hello"), "RE: Hello");
        assert_eq!(reply_subject("re: hello"), "re: hello");
    }

    #[test]
    fn quote_takes_four_lines() {
        let q = quote_excerpt("one\ntwo\nthree\nfour\nfive").unwrap();
        assert_eq!(q, "---\n> one\n> two\n> three\n> four");
        assert!(quote_excerpt("   ").is_none());
    }

    #[test]
    fn fresh_message_is_plain_text() {
        let mut rng = StdRng::seed_from_u64(42);
        let generator = TemplateGenerator::new();
        for _ in 0..50 {
            let out = generator.generate(&ContentRequest::fresh("Jane Doe", "Bob Smith"), &mut rng);
            assert!(!out.subject.contains("{topic}"));
            assert!(out.body.starts_with("Hi Bob,"));
            assert!(out.body.ends_with("Jane Doe"));
            assert!(!out.body.contains("http"));
            assert!(!out.body.contains('<'));
        }
    }

    #[test]
    fn reply_uses_original_subject() {
        let mut rng = StdRng::seed_from_u64(1);
        let out = TemplateGenerator.generate(
            &ContentRequest::reply("Jane", "", "Lunch plans", "Are you free?"),
            &mut rng,
        );
        assert_eq!(out.subject, "Re: Lunch plans");
        assert!(out.body.starts_with("Hi "));
        assert!(out.body.ends_with("Jane"));
    }
}
