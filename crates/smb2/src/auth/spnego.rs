//! Minimal SPNEGO (RFC 4178) token framing.
//!
//! Session setup wraps mechanism tokens in exactly three shapes: the initial
//! NegTokenInit carrying the mechanism list, and NegTokenResp in both
//! directions for the remaining legs. Only those shapes are implemented.

use crate::Error;

/// DER-encoded SPNEGO OID (1.3.6.1.5.5.2).
pub const SPNEGO_OID: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];

const APPLICATION_TAG: u8 = 0x60;
const NEG_TOKEN_INIT_TAG: u8 = 0xA0;
const NEG_TOKEN_RESP_TAG: u8 = 0xA1;
const SEQUENCE_TAG: u8 = 0x30;
const OID_TAG: u8 = 0x06;
const OCTET_STRING_TAG: u8 = 0x04;
const ENUMERATED_TAG: u8 = 0x0A;

const MECH_TYPES_TAG: u8 = 0xA0;
const MECH_TOKEN_TAG: u8 = 0xA2;
const NEG_STATE_TAG: u8 = 0xA0;
const SUPPORTED_MECH_TAG: u8 = 0xA1;
const RESPONSE_TOKEN_TAG: u8 = 0xA2;
const MECH_LIST_MIC_TAG: u8 = 0xA3;

/// negState accept-incomplete, the value a client emits mid-exchange.
const NEG_STATE_ACCEPT_INCOMPLETE: u8 = 0x01;

fn der_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + content.len());
    out.push(tag);
    der_length(content.len(), &mut out);
    out.extend_from_slice(content);
    out
}

fn malformed() -> Error {
    Error::InvalidResponse("malformed security token".to_string())
}

/// Splits one TLV off `input`, returning `(tag, content, rest)`.
fn parse_tlv(input: &[u8]) -> crate::Result<(u8, &[u8], &[u8])> {
    if input.len() < 2 {
        return Err(malformed());
    }
    let tag = input[0];
    let (len, header) = if input[1] < 0x80 {
        (input[1] as usize, 2)
    } else {
        let n = (input[1] & 0x7f) as usize;
        if n == 0 || n > 4 || input.len() < 2 + n {
            return Err(malformed());
        }
        let mut len = 0usize;
        for b in &input[2..2 + n] {
            len = (len << 8) | *b as usize;
        }
        (len, 2 + n)
    };
    if input.len() < header + len {
        return Err(malformed());
    }
    Ok((tag, &input[header..header + len], &input[header + len..]))
}

/// Encodes the initial security buffer: a GSS-API framed NegTokenInit with
/// the mechanism list and the first mechanism token.
pub fn encode_neg_token_init(mech_types: &[&[u8]], mech_token: &[u8]) -> Vec<u8> {
    let mut mech_list = Vec::new();
    for oid in mech_types {
        mech_list.extend_from_slice(&tlv(OID_TAG, oid));
    }

    let mut fields = Vec::new();
    fields.extend_from_slice(&tlv(MECH_TYPES_TAG, &tlv(SEQUENCE_TAG, &mech_list)));
    fields.extend_from_slice(&tlv(MECH_TOKEN_TAG, &tlv(OCTET_STRING_TAG, mech_token)));
    let init = tlv(NEG_TOKEN_INIT_TAG, &tlv(SEQUENCE_TAG, &fields));

    let mut content = tlv(OID_TAG, SPNEGO_OID);
    content.extend_from_slice(&init);
    tlv(APPLICATION_TAG, &content)
}

/// Encodes a continuation security buffer (negState accept-incomplete).
pub fn encode_neg_token_resp(
    supported_mech: Option<&[u8]>,
    response_token: &[u8],
    mech_list_mic: Option<&[u8]>,
) -> Vec<u8> {
    let mut fields = Vec::new();
    fields.extend_from_slice(&tlv(
        NEG_STATE_TAG,
        &[ENUMERATED_TAG, 0x01, NEG_STATE_ACCEPT_INCOMPLETE],
    ));
    if let Some(oid) = supported_mech {
        fields.extend_from_slice(&tlv(SUPPORTED_MECH_TAG, &tlv(OID_TAG, oid)));
    }
    fields.extend_from_slice(&tlv(
        RESPONSE_TOKEN_TAG,
        &tlv(OCTET_STRING_TAG, response_token),
    ));
    if let Some(mic) = mech_list_mic {
        fields.extend_from_slice(&tlv(MECH_LIST_MIC_TAG, &tlv(OCTET_STRING_TAG, mic)));
    }
    tlv(NEG_TOKEN_RESP_TAG, &tlv(SEQUENCE_TAG, &fields))
}

/// A decoded NegTokenResp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegTokenResp {
    pub neg_state: u8,
    pub supported_mech: Option<Vec<u8>>,
    pub response_token: Option<Vec<u8>>,
    pub mech_list_mic: Option<Vec<u8>>,
}

/// Decodes a NegTokenResp from a session-setup security buffer.
pub fn decode_neg_token_resp(input: &[u8]) -> crate::Result<NegTokenResp> {
    let (tag, outer, _) = parse_tlv(input)?;
    if tag != NEG_TOKEN_RESP_TAG {
        return Err(malformed());
    }
    let (tag, fields, _) = parse_tlv(outer)?;
    if tag != SEQUENCE_TAG {
        return Err(malformed());
    }

    let mut resp = NegTokenResp {
        neg_state: 0,
        supported_mech: None,
        response_token: None,
        mech_list_mic: None,
    };
    let mut rest = fields;
    while !rest.is_empty() {
        let (tag, content, next) = parse_tlv(rest)?;
        match tag {
            NEG_STATE_TAG => {
                let (t, v, _) = parse_tlv(content)?;
                if t != ENUMERATED_TAG || v.len() != 1 {
                    return Err(malformed());
                }
                resp.neg_state = v[0];
            }
            SUPPORTED_MECH_TAG => {
                let (t, v, _) = parse_tlv(content)?;
                if t != OID_TAG {
                    return Err(malformed());
                }
                resp.supported_mech = Some(v.to_vec());
            }
            RESPONSE_TOKEN_TAG => {
                let (t, v, _) = parse_tlv(content)?;
                if t != OCTET_STRING_TAG {
                    return Err(malformed());
                }
                resp.response_token = Some(v.to_vec());
            }
            MECH_LIST_MIC_TAG => {
                let (t, v, _) = parse_tlv(content)?;
                if t != OCTET_STRING_TAG {
                    return Err(malformed());
                }
                resp.mech_list_mic = Some(v.to_vec());
            }
            _ => return Err(malformed()),
        }
        rest = next;
    }
    Ok(resp)
}
