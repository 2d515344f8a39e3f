/*
 * SPDX-License-Identifier: MIT
 *
 * Permission is hereby granted, free of charge, to any person obtaining a
 * copy of this software and associated documentation files (the "Software"),
 * to deal in the Software without restriction, including without limitation
 * the rights to use, copy, modify, merge, publish, distribute, sublicense,
 * and/or sell copies of the Software, and to permit persons to whom the
 * Software is furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
 * THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
 * DEALINGS IN THE SOFTWARE.
 */

// Decodes WS-Man SOAP envelopes into flat key/value mappings. The wsman
// tool concatenates one XML document per pulled envelope, so a response
// body is split on the XML declaration before parsing. Keys are the
// element names lowered to snake_case, with domain acronyms kept atomic.

use std::collections::HashMap;

use roxmltree::{Document, Node};

use crate::WsmanError;

/// One decoded response struct: normalized element name to text, with
/// `None` for elements carrying an explicit xsi:nil marker.
pub type Envelope = HashMap<String, Option<String>>;

// Multi-letter acronyms rewritten to a single Capitalized unit before the
// generic camel-to-snake pass, so e.g. FCoEWWNN becomes fcoe_wwnn rather
// than f_co_ewwnn. Order matters: longer forms first.
const ACRONYMS: &[(&str, &str)] = &[
    ("FCoE", "Fcoe"),
    ("FCOE", "Fcoe"),
    ("iSCSI", "Iscsi"),
    ("WWNN", "Wwnn"),
    ("BIOS", "Bios"),
    ("ISO", "Iso"),
    ("MAC", "Mac"),
    ("PCI", "Pci"),
    ("EFI", "Efi"),
];

// Enumerated input values the controller expects as numeric codes.
// Callers may pass either the symbolic key or the raw code.
pub const SHARE_TYPES: &[(&str, &str)] = &[("nfs", "0"), ("cifs", "2")];
pub const HASH_TYPES: &[(&str, &str)] = &[("md5", "1"), ("sha1", "2")];
pub const REBOOT_JOB_TYPES: &[(&str, &str)] = &[
    ("power_cycle", "1"),
    ("graceful", "2"),
    ("graceful_with_forced_shutdown", "3"),
];
pub const SHUTDOWN_TYPES: &[(&str, &str)] = &[("graceful", "0"), ("forced", "1")];
pub const END_HOST_POWER_STATES: &[(&str, &str)] = &[("on", "1"), ("off", "0")];
pub const EXPORT_USES: &[(&str, &str)] = &[("default", "0"), ("clone", "1"), ("replace", "2")];
pub const INCLUDE_IN_EXPORTS: &[(&str, &str)] = &[
    ("default", "0"),
    ("read_only", "1"),
    ("password_hash_values", "2"),
];
pub const REQUESTED_STATES: &[(&str, &str)] = &[("on", "2"), ("off", "3")];

/// Normalizes a response element name to a snake_case key.
///
/// Recognized acronyms are treated as one token: `FCoEWWNN` -> `fcoe_wwnn`,
/// `ISOAttachStatus` -> `iso_attach_status`, `JobID` -> `job_id`.
pub fn normalize_key(name: &str) -> String {
    let mut folded = name.to_string();
    for (from, to) in ACRONYMS {
        folded = folded.replace(from, to);
    }

    let chars: Vec<char> = folded.chars().collect();
    let mut out = String::with_capacity(chars.len() + 4);
    for (i, ch) in chars.iter().enumerate() {
        if ch.is_ascii_uppercase() {
            // Underscore before each run of capitals, never at the start.
            if i > 0 && !chars[i - 1].is_ascii_uppercase() && chars[i - 1] != '_' {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(*ch);
        }
    }
    out
}

/// Looks up an enumerated input value by symbolic key or raw code. In
/// strict mode an unknown input is an error naming every allowed pair.
pub fn enum_value(
    name: &str,
    table: &[(&str, &str)],
    value: &str,
    strict: bool,
) -> Result<String, WsmanError> {
    if let Some((_, mapped)) = table.iter().find(|(key, _)| *key == value) {
        return Ok(mapped.to_string());
    }
    if table.iter().any(|(_, mapped)| *mapped == value) {
        return Ok(value.to_string());
    }
    if strict {
        let allowed = table
            .iter()
            .map(|(key, mapped)| format!("{key} ({mapped})"))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(WsmanError::InvalidEnumValue {
            name: name.to_string(),
            value: value.to_string(),
            allowed,
        });
    }
    Ok(value.to_string())
}

/// Decodes the first envelope of a response into one mapping.
///
/// The body must contain exactly one child element, the response struct;
/// each of its children becomes one key/value entry. With `require_body`
/// false a bodiless or unexpectedly shaped response decodes to `None`.
pub fn parse(content: &str, require_body: bool) -> Result<Option<Envelope>, WsmanError> {
    let docs = split_documents(content);
    let Some(first) = docs.first() else {
        return empty_body(require_body, content, "no XML document in response");
    };
    let doc = match Document::parse(first) {
        Ok(doc) => doc,
        Err(err) => return empty_body(require_body, content, &format!("unparseable XML: {err}")),
    };
    let Some(body) = find_element(doc.root(), "Body") else {
        return empty_body(require_body, content, "no Body element");
    };
    let children: Vec<Node> = body.children().filter(|n| n.is_element()).collect();
    if children.len() != 1 {
        return empty_body(
            require_body,
            content,
            &format!("expected exactly one body child, found {}", children.len()),
        );
    }
    Ok(Some(map_struct(children[0])))
}

/// Decodes an enumeration response into one mapping per pulled item.
///
/// A single-envelope fault is detected first and raised as
/// [`WsmanError::Fault`] carrying the decoded subcode and reason.
pub fn parse_enumeration(content: &str) -> Result<Vec<Envelope>, WsmanError> {
    let docs = split_documents(content);
    if docs.len() == 1 {
        if let Ok(doc) = Document::parse(&docs[0]) {
            if let Some(fault) = find_element(doc.root(), "Fault") {
                return Err(decode_fault(fault));
            }
        }
    }

    let mut items = Vec::new();
    for raw in &docs {
        let doc = Document::parse(raw).map_err(|err| WsmanError::MalformedResponse {
            reason: format!("unparseable enumeration XML: {err}"),
            body: raw.clone(),
        })?;
        for container in doc
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "Items")
        {
            for item in container.children().filter(|n| n.is_element()) {
                items.push(map_struct(item));
            }
        }
    }
    Ok(items)
}

/// Extracts the text of the first node matching a `/`-separated path of
/// element names. Earlier path segments may match any ancestor, so
/// `Body/ReturnValue` behaves like `//Body//ReturnValue`.
pub(crate) fn select_text(content: &str, path: &str) -> Option<String> {
    let first = split_documents(content).into_iter().next()?;
    let doc = Document::parse(&first).ok()?;
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let last = segments.last()?;

    for node in doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == *last)
    {
        let mut want = segments.len().checked_sub(2);
        let mut ancestor = node.parent();
        while let (Some(i), Some(a)) = (want, ancestor) {
            if a.is_element() && a.tag_name().name() == segments[i] {
                want = i.checked_sub(1);
            }
            ancestor = a.parent();
        }
        if want.is_none() {
            return Some(element_text(node).unwrap_or_default());
        }
    }
    None
}

// The wsman tool concatenates one document per envelope; each starts with
// its own XML declaration.
fn split_documents(content: &str) -> Vec<String> {
    content
        .split("<?xml")
        .filter_map(|fragment| {
            let rest = match fragment.find("?>") {
                Some(idx) => &fragment[idx + 2..],
                None => fragment,
            };
            let trimmed = rest.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

fn empty_body(
    require_body: bool,
    content: &str,
    reason: &str,
) -> Result<Option<Envelope>, WsmanError> {
    if require_body {
        Err(WsmanError::MalformedResponse {
            reason: reason.to_string(),
            body: content.to_string(),
        })
    } else {
        Ok(None)
    }
}

fn find_element<'a>(root: Node<'a, 'a>, name: &str) -> Option<Node<'a, 'a>> {
    root.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

// One mapping entry per child element of a response struct.
fn map_struct(node: Node) -> Envelope {
    node.children()
        .filter(|n| n.is_element())
        .map(|child| (normalize_key(child.tag_name().name()), element_value(child)))
        .collect()
}

// Value extraction, special shapes before the generic text rule.
fn element_value(node: Node) -> Option<String> {
    // A job reference is reported as a selector set; the InstanceID
    // selector's text is the job id the caller wants.
    if let Some(selector) = node.descendants().find(|n| {
        n.is_element()
            && n.tag_name().name() == "Selector"
            && n.attribute("Name") == Some("InstanceID")
    }) {
        return Some(element_text(selector).unwrap_or_default());
    }

    if node.tag_name().name() == "Subcode" {
        let joined = node
            .children()
            .filter(|n| n.is_element())
            .filter_map(|n| element_text(n))
            .collect::<Vec<_>>()
            .join(", ");
        return Some(joined);
    }

    // Explicit nil marker, e.g. xsi:nil="true".
    if node
        .attributes()
        .any(|a| a.name() == "nil" && a.value() == "true")
    {
        return None;
    }

    element_text(node)
}

fn element_text(node: Node) -> Option<String> {
    node.text().map(|t| t.trim().to_string())
}

fn decode_fault(fault: Node) -> WsmanError {
    let code = fault
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "Subcode")
        .and_then(element_value)
        .unwrap_or_else(|| "unknown".to_string());
    let reason = fault
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "Text")
        .and_then(|n| element_text(n))
        .unwrap_or_else(|| "no reason given".to_string());
    WsmanError::Fault { code, reason }
}
