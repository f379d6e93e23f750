//! Resource patching.
//!
//! A build customises the template by rewriting the `app_name` string resource.
//! The patch is a single targeted substitution: only the value of the first
//! `<string name="app_name">` element changes, every other byte of the file is
//! kept as-is and no other file is touched.

use std::borrow::Cow;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::bytes::{NoExpand, Regex};

use crate::error::{BuildError, BuildResult};

/// Location of the string table inside an unpacked template.
pub const STRINGS_RESOURCE: &str = "res/values/strings.xml";

static APP_NAME_ELEMENT: Lazy<Regex> = Lazy::new(|| {
    // (?-u): the value may hold any byte, not only valid UTF-8.
    Regex::new(r#"<string name="app_name">(?-u:[^<])*</string>"#).expect("static regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Patched,
    /// The resource file exists but has no `app_name` element.
    ElementMissing,
    /// The template carries no string table; nothing to do.
    ResourceMissing,
}

/// Write `app_name` into the workspace's string table.
///
/// The name is XML-escaped so the file stays well-formed whatever the caller
/// sends. Matching works on raw bytes; the file need not be valid UTF-8.
pub fn patch_app_name(workspace: &Path, app_name: &str) -> BuildResult<PatchOutcome> {
    let path = workspace.join(STRINGS_RESOURCE);
    if !path.is_file() {
        return Ok(PatchOutcome::ResourceMissing);
    }

    let content = fs::read(&path)
        .map_err(|e| BuildError::Internal(format!("reading {}: {e}", path.display())))?;

    let replacement = format!(r#"<string name="app_name">{}</string>"#, escape_xml_text(app_name));
    let patched = APP_NAME_ELEMENT.replace(&content, NoExpand(replacement.as_bytes()));

    match patched {
        Cow::Borrowed(_) => Ok(PatchOutcome::ElementMissing),
        Cow::Owned(patched) => {
            fs::write(&path, patched)
                .map_err(|e| BuildError::Internal(format!("writing {}: {e}", path.display())))?;
            Ok(PatchOutcome::Patched)
        }
    }
}

fn escape_xml_text(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '<', '>']) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}
