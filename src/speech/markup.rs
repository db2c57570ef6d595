//! Speech markup builder for narration text.
//!
//! Pure text transform: escapes XML, inserts pause markers after commas and
//! sentence boundaries, substitutes configured pronunciations, and wraps
//! the result in a prosody directive. This runs before every synthesis
//! call; nothing here touches the network.

use super::synthesis::SynthesisOptions;

const COMMA_BREAK: &str = r#"<break time="300ms"/>"#;
const SENTENCE_BREAK: &str = r#"<break time="500ms"/>"#;

/// Build the SSML document for a narration text.
pub fn build_ssml(text: &str, options: &SynthesisOptions) -> String {
    let mut body = String::with_capacity(text.len() + 64);

    for (i, token) in text.split_whitespace().enumerate() {
        if i > 0 {
            body.push(' ');
        }

        let (core, trailing) = split_trailing_punct(token);
        let spoken = options
            .pronunciations
            .get(&core.to_lowercase())
            .map(String::as_str)
            .unwrap_or(core);

        body.push_str(&escape_xml(spoken));
        body.push_str(&escape_xml(trailing));

        // Sentence boundaries take precedence over commas.
        if trailing.contains(['.', '!', '?']) {
            body.push_str(SENTENCE_BREAK);
        } else if trailing.contains(',') {
            body.push_str(COMMA_BREAK);
        }
    }

    format!(
        r#"<speak><prosody rate="{:.0}%" pitch="{:+.1}st">{}</prosody></speak>"#,
        options.speaking_rate * 100.0,
        options.pitch,
        body
    )
}

/// Split a token into its word core and trailing punctuation cluster.
fn split_trailing_punct(token: &str) -> (&str, &str) {
    let split_at = token
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_punctuation())
        .last()
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    token.split_at(split_at)
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
