//! INI-dialect configuration parser.
//!
//! Section headers `[a.b.c]` descend into nested models, `key = value`
//! pairs store floats when the value parses as a number and strings
//! otherwise. Backtick-delimited values keep literal newlines, `#` starts
//! a comment (and terminates a value).

use std::sync::Arc;

use super::Model;

#[derive(PartialEq)]
enum Mode {
    Start,
    Section,
    Key,
    Value,
    Comment,
}

fn store(container: &Model, key: &str, raw: &str) {
    let value = raw.trim();
    match value.parse::<f32>() {
        Ok(number) => container.set(key, number),
        Err(_) => container.set(key, value),
    }
}

pub fn parse(model: &Arc<Model>, text: &str) {
    let mut container = model.clone();
    let mut mode = Mode::Start;
    let mut multiline = false;
    let mut acc = String::new();
    let mut key = String::new();

    for mut c in text.chars() {
        match mode {
            Mode::Start => {
                if c <= ' ' {
                    continue;
                }
                acc.clear();
                if c == '#' {
                    mode = Mode::Comment;
                } else if c == '[' {
                    container = model.clone();
                    mode = Mode::Section;
                } else {
                    acc.push(c);
                    mode = Mode::Key;
                }
            }

            Mode::Section => {
                if c == ']' || c == '.' {
                    let segment = acc.trim().to_string();
                    if c == ']' {
                        mode = Mode::Start;
                    }
                    if !segment.is_empty() {
                        container = container.ensure_child(&segment);
                        acc.clear();
                    }
                } else {
                    acc.push(c);
                }
            }

            Mode::Key => {
                if c == '=' {
                    multiline = false;
                    key = acc.trim().to_string();
                    mode = Mode::Value;
                    acc.clear();
                } else {
                    acc.push(c);
                }
            }

            Mode::Value => {
                if c == '`' {
                    if multiline {
                        c = '\n';
                        multiline = false;
                    } else if acc.is_empty() {
                        multiline = true;
                        continue;
                    }
                }
                if !multiline && (c == '\n' || c == '\r' || c == '#') {
                    store(&container, &key, &acc);
                    mode = if c == '#' { Mode::Comment } else { Mode::Start };
                    continue;
                }
                acc.push(c);
            }

            Mode::Comment => {
                if c == '\n' || c == '\r' {
                    mode = Mode::Start;
                }
            }
        }
    }

    if mode == Mode::Value {
        store(&container, &key, &acc);
    }
}
