//! Prompt templates for the welcome and daily digest emails.

pub const USER_PROFILE_PLACEHOLDER: &str = "{{userProfile}}";
pub const NEWS_DATA_PLACEHOLDER: &str = "{{newsData}}";

pub const PERSONALIZED_WELCOME_EMAIL_PROMPT: &str = r#"Write a short, warm introduction paragraph for a welcome email sent to a new user of a stock market tracking app.

User profile:
{{userProfile}}

Requirements:
- Two or three sentences, at most 60 words.
- Mention what the user cares about (goals, risk tolerance, industry) naturally.
- Plain HTML inline text only: no headings, no lists, no markdown, no greeting line, no sign-off.
- You may wrap one key phrase in <strong>.
Return only the paragraph."#;

pub const NEWS_SUMMARY_EMAIL_PROMPT: &str = r#"Summarize the following market news articles for a daily email digest.

Articles (JSON):
{{newsData}}

Requirements:
- Group related stories; lead with the most market-moving item.
- For each story give a one-line headline and two or three plain-language bullet points.
- Mention the relevant ticker symbols.
- Output HTML fragments only (h3, p, ul, li, strong). No markdown, no <html> or <body> tags.
Return only the HTML content."#;

/// Fill the welcome prompt with a profile summary.
pub fn welcome_prompt(user_profile: &str) -> String {
    PERSONALIZED_WELCOME_EMAIL_PROMPT.replace(USER_PROFILE_PLACEHOLDER, user_profile)
}

/// Fill the news summary prompt with pre-serialized article data.
pub fn news_summary_prompt(news_data: &str) -> String {
    NEWS_SUMMARY_EMAIL_PROMPT.replace(NEWS_DATA_PLACEHOLDER, news_data)
}
