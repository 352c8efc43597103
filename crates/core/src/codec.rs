// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tag-delimited text codec shared by the control channel and the slot files.
//!
//! The wire format is short self-describing fragments like
//! `<fraction_done>0.42</fraction_done>` and flag tags like `<suspend/>`.
//! Readers scan for recognized tags and ignore everything else, so old
//! agents and new apps can disagree about vocabulary without breaking.

/// Append `<tag>value</tag>` followed by a newline.
pub fn put_str(out: &mut String, tag: &str, value: &str) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    out.push_str(value);
    out.push_str("</");
    out.push_str(tag);
    out.push_str(">\n");
}

/// Append `<tag>value</tag>` for a float.
pub fn put_f64(out: &mut String, tag: &str, value: f64) {
    put_str(out, tag, &format!("{:.6}", value));
}

/// Append `<tag>value</tag>` for an integer.
pub fn put_u64(out: &mut String, tag: &str, value: u64) {
    put_str(out, tag, &value.to_string());
}

/// Append a self-closing flag tag `<tag/>`.
pub fn put_flag(out: &mut String, tag: &str) {
    out.push('<');
    out.push_str(tag);
    out.push_str("/>\n");
}

/// Extract the text between `<tag>` and `</tag>`, if present.
pub fn get_str<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(text[start..end].trim())
}

pub fn get_f64(text: &str, tag: &str) -> Option<f64> {
    get_str(text, tag)?.parse().ok()
}

pub fn get_u64(text: &str, tag: &str) -> Option<u64> {
    get_str(text, tag)?.parse().ok()
}

pub fn get_i64(text: &str, tag: &str) -> Option<i64> {
    get_str(text, tag)?.parse().ok()
}

/// True if the self-closing flag `<tag/>` appears.
pub fn has_flag(text: &str, tag: &str) -> bool {
    text.contains(&format!("<{}/>", tag))
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
