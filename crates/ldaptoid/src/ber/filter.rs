// SPDX-License-Identifier: Apache-2.0 OR MIT

//! LDAP filter algebra: decode/encode of the `Filter` CHOICE (RFC 4511 §4.5.1).

use thiserror::Error;

use super::{decode_octet_string, push_octet_string, read_tlv, tag_number, write_tlv, BerError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error(transparent)]
    Ber(#[from] BerError),
    #[error("malformed filter: {0}")]
    Malformed(String),
}

const TAG_AND: u8 = 0xA0;
const TAG_OR: u8 = 0xA1;
const TAG_NOT: u8 = 0xA2;
const TAG_EQUALITY: u8 = 0xA3;
const TAG_SUBSTRINGS: u8 = 0xA4;
const TAG_GE: u8 = 0xA5;
const TAG_LE: u8 = 0xA6;
const TAG_PRESENT: u8 = 0x87;
const TAG_APPROX: u8 = 0xA8;
const TAG_EXTENSIBLE: u8 = 0xA9;

const SUB_INITIAL: u8 = 0x80;
const SUB_ANY: u8 = 0x81;
const SUB_FINAL: u8 = 0x82;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub attribute: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Substrings {
    pub attribute: String,
    pub initial: Option<String>,
    pub any: Vec<String>,
    pub finalp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality(Assertion),
    Substrings(Substrings),
    GreaterOrEqual(Assertion),
    LessOrEqual(Assertion),
    Present(String),
    Approx(Assertion),
    /// A recognized-but-unimplemented filter choice (only `extensibleMatch`,
    /// currently). Decodes successfully so the envelope and messageID are
    /// still available to answer on; the search layer rejects it with
    /// `unwillingToPerform` rather than failing decode outright (§4.1).
    Unsupported,
}

/// Does `filter`, anywhere in its tree, contain a choice this core doesn't
/// implement? Checked before evaluation so one `extensibleMatch` nested
/// inside an `and`/`or`/`not` rejects the whole request the same way a
/// top-level one does.
pub fn contains_unsupported(filter: &Filter) -> bool {
    match filter {
        Filter::Unsupported => true,
        Filter::And(items) | Filter::Or(items) => items.iter().any(contains_unsupported),
        Filter::Not(inner) => contains_unsupported(inner),
        Filter::Equality(_)
        | Filter::Substrings(_)
        | Filter::GreaterOrEqual(_)
        | Filter::LessOrEqual(_)
        | Filter::Present(_)
        | Filter::Approx(_) => false,
    }
}

/// Decode a `Filter` from an already-split TLV (tag, content). Tag class
/// bits are ignored per the robustness rule (§4.1): clients are only
/// required to use CONTEXT-SPECIFIC, but APPLICATION-tagged filters (seen
/// from some client libraries) decode identically.
pub fn decode_filter(tag: u8, content: &[u8]) -> Result<Filter, FilterError> {
    match tag_number(tag) {
        t if t == tag_number(TAG_AND) => Ok(Filter::And(decode_filter_set(content)?)),
        t if t == tag_number(TAG_OR) => Ok(Filter::Or(decode_filter_set(content)?)),
        t if t == tag_number(TAG_NOT) => {
            let mut pos = 0;
            let (inner_tag, inner_content) = read_tlv(content, &mut pos)?;
            Ok(Filter::Not(Box::new(decode_filter(inner_tag, inner_content)?)))
        }
        t if t == tag_number(TAG_EQUALITY) => Ok(Filter::Equality(decode_assertion(content)?)),
        t if t == tag_number(TAG_SUBSTRINGS) => Ok(Filter::Substrings(decode_substrings(content)?)),
        t if t == tag_number(TAG_GE) => Ok(Filter::GreaterOrEqual(decode_assertion(content)?)),
        t if t == tag_number(TAG_LE) => Ok(Filter::LessOrEqual(decode_assertion(content)?)),
        t if t == tag_number(TAG_PRESENT) => {
            Ok(Filter::Present(decode_octet_string(content)?))
        }
        t if t == tag_number(TAG_APPROX) => Ok(Filter::Approx(decode_assertion(content)?)),
        t if t == tag_number(TAG_EXTENSIBLE) => Ok(Filter::Unsupported),
        _ => Err(FilterError::Malformed(format!("unknown filter tag {tag:#04x}"))),
    }
}

fn decode_filter_set(content: &[u8]) -> Result<Vec<Filter>, FilterError> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < content.len() {
        let (tag, inner) = read_tlv(content, &mut pos)?;
        out.push(decode_filter(tag, inner)?);
    }
    Ok(out)
}

fn decode_assertion(content: &[u8]) -> Result<Assertion, FilterError> {
    let mut pos = 0;
    let (_, attr) = read_tlv(content, &mut pos)?;
    let (_, value) = read_tlv(content, &mut pos)?;
    Ok(Assertion {
        attribute: decode_octet_string(attr)?,
        value: decode_octet_string(value)?,
    })
}

fn decode_substrings(content: &[u8]) -> Result<Substrings, FilterError> {
    let mut pos = 0;
    let (_, attr) = read_tlv(content, &mut pos)?;
    let (_, seq) = read_tlv(content, &mut pos)?;
    let mut out = Substrings {
        attribute: decode_octet_string(attr)?,
        ..Default::default()
    };
    let mut spos = 0;
    while spos < seq.len() {
        let (tag, piece) = read_tlv(seq, &mut spos)?;
        let s = decode_octet_string(piece)?;
        match tag_number(tag) {
            t if t == tag_number(SUB_INITIAL) => out.initial = Some(s),
            t if t == tag_number(SUB_ANY) => out.any.push(s),
            t if t == tag_number(SUB_FINAL) => out.finalp = Some(s),
            _ => return Err(FilterError::Malformed("unknown substring piece tag".into())),
        }
    }
    Ok(out)
}

pub fn encode_filter(out: &mut Vec<u8>, filter: &Filter) {
    match filter {
        Filter::And(items) => {
            let mut content = Vec::new();
            for f in items {
                encode_filter(&mut content, f);
            }
            write_tlv(out, TAG_AND, &content);
        }
        Filter::Or(items) => {
            let mut content = Vec::new();
            for f in items {
                encode_filter(&mut content, f);
            }
            write_tlv(out, TAG_OR, &content);
        }
        Filter::Not(inner) => {
            let mut content = Vec::new();
            encode_filter(&mut content, inner);
            write_tlv(out, TAG_NOT, &content);
        }
        Filter::Equality(a) => encode_assertion(out, TAG_EQUALITY, a),
        Filter::Substrings(s) => encode_substrings(out, s),
        Filter::GreaterOrEqual(a) => encode_assertion(out, TAG_GE, a),
        Filter::LessOrEqual(a) => encode_assertion(out, TAG_LE, a),
        Filter::Present(attr) => write_tlv(out, TAG_PRESENT, attr.as_bytes()),
        Filter::Approx(a) => encode_assertion(out, TAG_APPROX, a),
        Filter::Unsupported => unreachable!("unsupported filters are rejected before a response is built"),
    }
}

fn encode_assertion(out: &mut Vec<u8>, tag: u8, a: &Assertion) {
    let mut content = Vec::new();
    push_octet_string(&mut content, super::TAG_OCTET_STRING, &a.attribute);
    push_octet_string(&mut content, super::TAG_OCTET_STRING, &a.value);
    write_tlv(out, tag, &content);
}

fn encode_substrings(out: &mut Vec<u8>, s: &Substrings) {
    let mut content = Vec::new();
    push_octet_string(&mut content, super::TAG_OCTET_STRING, &s.attribute);
    let mut pieces = Vec::new();
    if let Some(init) = &s.initial {
        write_tlv(&mut pieces, SUB_INITIAL, init.as_bytes());
    }
    for any in &s.any {
        write_tlv(&mut pieces, SUB_ANY, any.as_bytes());
    }
    if let Some(finalp) = &s.finalp {
        write_tlv(&mut pieces, SUB_FINAL, finalp.as_bytes());
    }
    write_tlv(&mut content, super::TAG_SEQUENCE, &pieces);
    write_tlv(out, TAG_SUBSTRINGS, &content);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(f: Filter) {
        let mut out = Vec::new();
        encode_filter(&mut out, &f);
        let mut pos = 0;
        let (tag, content) = read_tlv(&out, &mut pos).unwrap();
        let decoded = decode_filter(tag, content).unwrap();
        assert_eq!(decoded, f);
    }

    #[test]
    fn present_roundtrip() {
        roundtrip(Filter::Present("uid".into()));
    }

    #[test]
    fn equality_roundtrip() {
        roundtrip(Filter::Equality(Assertion {
            attribute: "uid".into(),
            value: "alice".into(),
        }));
    }

    #[test]
    fn and_or_not_roundtrip() {
        roundtrip(Filter::And(vec![
            Filter::Present("uid".into()),
            Filter::Not(Box::new(Filter::Present("mail".into()))),
        ]));
        roundtrip(Filter::Or(vec![Filter::Present("uid".into())]));
    }

    #[test]
    fn substrings_roundtrip() {
        roundtrip(Filter::Substrings(Substrings {
            attribute: "cn".into(),
            initial: Some("al".into()),
            any: vec!["ic".into()],
            finalp: Some("e".into()),
        }));
    }

    #[test]
    fn extensible_match_decodes_as_unsupported() {
        let mut content = Vec::new();
        push_octet_string(&mut content, super::super::TAG_OCTET_STRING, "x");
        assert_eq!(decode_filter(TAG_EXTENSIBLE, &content), Ok(Filter::Unsupported));
    }

    #[test]
    fn extensible_match_nested_in_and_is_detected() {
        let nested = Filter::And(vec![Filter::Present("uid".into()), Filter::Unsupported]);
        assert!(contains_unsupported(&nested));
        assert!(!contains_unsupported(&Filter::Present("uid".into())));
    }
}
