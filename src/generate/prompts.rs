//! Prompt templates and the deterministic stub used when the adapter fails.

use crate::model::{PostStyle, TrendCandidate};

const BASE_SYSTEM: &str = "You write short social media posts about trending topics. \
Stay factual, avoid speculation about people, no slurs, no medical or financial advice. \
Return only the requested text.";

fn style_brief(style: PostStyle) -> &'static str {
    match style {
        PostStyle::Informative => {
            "Tone: informative. Lead with the key fact, add one line of context, end with why it matters."
        }
        PostStyle::Casual => {
            "Tone: casual and friendly. Conversational, one light touch of humor, no jargon."
        }
        PostStyle::Professional => {
            "Tone: professional. Concise, neutral, suitable for a company account."
        }
        PostStyle::Creative => {
            "Tone: creative. Open with a hook or vivid image, keep it playful but accurate."
        }
    }
}

pub fn post_system(style: PostStyle) -> String {
    format!("{BASE_SYSTEM} {}", style_brief(style))
}

/// The `Topic:` and `Keywords:` lines are parsed by the mock adapter.
pub fn post_prompt(trend: &TrendCandidate, style: PostStyle) -> String {
    format!(
        "Write one {style} post between 80 and 280 characters, without hashtags.\n\
         Topic: {topic}\n\
         Keywords: {keywords}\n\
         Category: {category}\n\
         Context: {context}\n",
        style = style.as_str(),
        topic = trend.topic,
        keywords = trend.keywords.join(", "),
        category = trend.category.as_str(),
        context = if trend.description.is_empty() {
            "-"
        } else {
            trend.description.as_str()
        },
    )
}

pub fn hashtags_prompt(trend: &TrendCandidate, content: &str) -> String {
    format!(
        "Suggest up to 8 hashtags for this post, space separated, each starting with #.\n\
         Topic: {topic}\n\
         Keywords: {keywords}\n\
         Post: {content}\n",
        topic = trend.topic,
        keywords = trend.keywords.join(", "),
    )
}

pub fn variations_prompt(trend: &TrendCandidate, content: &str, n: usize) -> String {
    format!(
        "Rewrite this post {n} different ways, one per line, numbered.\n\
         Topic: {topic}\n\
         Post: {content}\n",
        topic = trend.topic,
    )
}

/// Templated post used when generation fails. Same input, same output.
pub fn stub_post(trend: &TrendCandidate, style: PostStyle) -> String {
    let topic = trend.topic.trim();
    let angle = match trend.keywords.first() {
        Some(k) => format!(" with {k} at the center of the conversation"),
        None => String::new(),
    };
    match style {
        PostStyle::Informative => format!(
            "Trending now: {topic}. The story is gaining attention{angle}. Here are the key points worth knowing today."
        ),
        PostStyle::Casual => format!(
            "So everyone is talking about {topic} right now{angle}. Worth a look if you have a minute today!"
        ),
        PostStyle::Professional => format!(
            "{topic} is drawing significant attention{angle}. We are following developments and their implications closely."
        ),
        PostStyle::Creative => format!(
            "Picture this: {topic} lighting up every feed today{angle}. Here is why the buzz keeps growing."
        ),
    }
}
