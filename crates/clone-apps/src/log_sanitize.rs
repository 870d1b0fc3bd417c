//! Renders remote response bodies so they can be put in a log line.
//!
//! Control-plane error bodies are usually small JSON documents, but a broken
//! proxy can hand back arbitrary bytes (HTML pages, binary droplet fragments,
//! terminal escapes). Everything that reaches the log goes through here.

const MAX_EXCERPT_CHARS: usize = 512;

enum EscapeMode {
    Esc,
    Csi,
    Osc,
    OscEsc,
}

/// Lossily decodes `body`, drops escape sequences and control characters,
/// folds runs of whitespace into one space and truncates long bodies.
pub fn body_excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let mut out = String::with_capacity(text.len().min(MAX_EXCERPT_CHARS));
    let mut esc_mode: Option<EscapeMode> = None;
    let mut char_count = 0usize;
    let mut pending_space = false;
    let mut truncated = false;

    for c in text.chars() {
        if let Some(mode) = esc_mode.as_ref() {
            esc_mode = match mode {
                EscapeMode::Esc => match c {
                    '[' => Some(EscapeMode::Csi),
                    ']' => Some(EscapeMode::Osc),
                    _ => None,
                },
                EscapeMode::Csi if ('@'..='~').contains(&c) => None,
                EscapeMode::Csi => Some(EscapeMode::Csi),
                EscapeMode::Osc if c == '\x07' => None,
                EscapeMode::Osc if c == '\x1b' => Some(EscapeMode::OscEsc),
                EscapeMode::Osc => Some(EscapeMode::Osc),
                EscapeMode::OscEsc if c == '\\' => None,
                EscapeMode::OscEsc => Some(EscapeMode::Osc),
            };
            continue;
        }

        if c == '\x1b' {
            esc_mode = Some(EscapeMode::Esc);
            continue;
        }
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if c.is_control() || is_format_control(c) || c == char::REPLACEMENT_CHARACTER {
            continue;
        }

        if pending_space {
            out.push(' ');
            char_count += 1;
            pending_space = false;
        }
        out.push(c);
        char_count += 1;

        if char_count >= MAX_EXCERPT_CHARS {
            truncated = true;
            break;
        }
    }

    if truncated {
        out.push_str(" ...[truncated]");
    }
    out
}

fn is_format_control(c: char) -> bool {
    c == '\u{061C}'
        || c == '\u{200E}'
        || c == '\u{200F}'
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}
