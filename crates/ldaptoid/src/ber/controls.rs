// SPDX-License-Identifier: Apache-2.0 OR MIT

//! LDAP controls (RFC 4511 §4.1.11) and the Simple Paged Results control
//! (RFC 2696), the only control this core recognizes.

use thiserror::Error;

use super::{decode_bool, decode_integer, decode_octet_string, push_bool, push_integer,
    push_octet_string, read_tlv, write_tlv, BerError, TAG_OCTET_STRING, TAG_SEQUENCE};

pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error(transparent)]
    Ber(#[from] BerError),
    #[error("unavailable critical extension: {0}")]
    UnavailableCritical(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub control_type: String,
    pub criticality: bool,
    pub control_value: Option<Vec<u8>>,
}

/// Decode the `[0] SEQUENCE OF Control` content. Unknown controls with
/// `criticality=false` are kept (caller ignores them); with
/// `criticality=true` the caller must respond `unavailableCriticalExtension`
/// (decided by [`reject_unknown_critical`], since recognizing "known
/// control types" is a property of the caller, not this codec).
pub fn decode_controls(content: &[u8]) -> Result<Vec<Control>, ControlError> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < content.len() {
        let (_, seq) = read_tlv(content, &mut pos)?;
        let mut spos = 0;
        let (_, type_content) = read_tlv(seq, &mut spos)?;
        let control_type = decode_octet_string(type_content)?;
        let mut criticality = false;
        let mut control_value = None;
        if spos < seq.len() {
            let save = spos;
            let (tag, c) = read_tlv(seq, &mut spos)?;
            if tag == super::TAG_BOOLEAN {
                criticality = decode_bool(c)?;
            } else {
                spos = save;
            }
        }
        if spos < seq.len() {
            let (_, c) = read_tlv(seq, &mut spos)?;
            control_value = Some(c.to_vec());
        }
        out.push(Control {
            control_type,
            criticality,
            control_value,
        });
    }
    Ok(out)
}

pub fn encode_controls(out: &mut Vec<u8>, controls: &[Control]) {
    if controls.is_empty() {
        return;
    }
    let mut content = Vec::new();
    for c in controls {
        let mut seq = Vec::new();
        push_octet_string(&mut seq, TAG_OCTET_STRING, &c.control_type);
        if c.criticality {
            push_bool(&mut seq, super::TAG_BOOLEAN, true);
        }
        if let Some(v) = &c.control_value {
            write_tlv(&mut seq, TAG_OCTET_STRING, v);
        }
        write_tlv(&mut content, TAG_SEQUENCE, &seq);
    }
    write_tlv(out, 0xA0, &content);
}

/// Is this control type recognized? Only the Simple Paged Results OID is.
pub fn is_known_control(control_type: &str) -> bool {
    control_type == PAGED_RESULTS_OID
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagedResultsValue {
    pub size: i64,
}

/// Decode the `controlValue` of a paged-results control: `SEQUENCE { size
/// INTEGER, cookie OCTET STRING }`. Only `size` is read; the cookie is
/// never echoed back with content since this core never actually pages.
pub fn decode_paged_results_value(value: &[u8]) -> Result<PagedResultsValue, BerError> {
    let mut pos = 0;
    let (_, seq) = read_tlv(value, &mut pos)?;
    let mut spos = 0;
    let (_, size_content) = read_tlv(seq, &mut spos)?;
    let size = decode_integer(size_content)?;
    Ok(PagedResultsValue { size })
}

/// Build the acknowledgement control value: `size=0, cookie=""`.
pub fn encode_paged_results_done() -> Vec<u8> {
    let mut seq = Vec::new();
    push_integer(&mut seq, super::TAG_INTEGER, 0);
    push_octet_string(&mut seq, TAG_OCTET_STRING, "");
    let mut out = Vec::new();
    write_tlv(&mut out, TAG_SEQUENCE, &seq);
    out
}

/// Build the SearchResultDone-side control acknowledging paged results.
pub fn paged_results_done_control() -> Control {
    Control {
        control_type: PAGED_RESULTS_OID.to_string(),
        criticality: false,
        control_value: Some(encode_paged_results_done()),
    }
}
