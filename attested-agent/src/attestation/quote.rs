//! TDX quote extraction.
//!
//! Attestation pages are HTML meant for humans. Register values are pulled
//! out two ways:
//!
//! 1. A label scan over the page text (`MRTD: <hex>`, `RTMR0 = <hex>`, ...)
//! 2. A fixed-offset read of the raw quote (TDX quote v4 layout)
//!
//! The label scan runs first; the binary layout fills whatever it left empty.

use serde::{Deserialize, Serialize};

// TDX quote v4: 48-byte header followed by the TD report body.
const TDX_HEADER_LEN: usize = 48;
const TDX_MEASUREMENT_LEN: usize = 48;
const TDX_MRTD_OFFSET: usize = TDX_HEADER_LEN + 136;
const TDX_RTMR0_OFFSET: usize = TDX_HEADER_LEN + 328;
const TDX_REPORT_DATA_OFFSET: usize = TDX_HEADER_LEN + 520;
const TDX_REPORT_DATA_LEN: usize = 64;
const TDX_BODY_END: usize = TDX_REPORT_DATA_OFFSET + TDX_REPORT_DATA_LEN;

/// Shortest hex run accepted by the label scan
const MIN_HEX_LEN: usize = 16;

/// Raw quotes are truncated to this many characters when kept in a measurement
pub const RAW_QUOTE_PREVIEW: usize = 500;

/// Element id of the quote block on `cpu.html`
pub const QUOTE_ELEMENT_ID: &str = "quoteTextarea";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRegisters {
    pub mrtd: String,
    pub rtmr0: String,
    pub rtmr1: String,
    pub rtmr2: String,
    pub rtmr3: String,
    pub reportdata: String,
}

impl QuoteRegisters {
    fn fields_mut(&mut self) -> [&mut String; 6] {
        [
            &mut self.mrtd,
            &mut self.rtmr0,
            &mut self.rtmr1,
            &mut self.rtmr2,
            &mut self.rtmr3,
            &mut self.reportdata,
        ]
    }

    fn fields(&self) -> [&String; 6] {
        [
            &self.mrtd,
            &self.rtmr0,
            &self.rtmr1,
            &self.rtmr2,
            &self.rtmr3,
            &self.reportdata,
        ]
    }

    pub fn is_complete(&self) -> bool {
        self.fields().iter().all(|f| !f.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|f| f.is_empty())
    }

    /// Copy every field of `other` into the fields still empty here
    pub fn fill_missing_from(&mut self, other: &QuoteRegisters) {
        for (mine, theirs) in self.fields_mut().into_iter().zip(other.fields()) {
            if mine.is_empty() && !theirs.is_empty() {
                mine.clone_from(theirs);
            }
        }
    }
}

/// Extract registers from an attestation page and, optionally, its raw quote.
pub fn extract_registers(page: &str, raw_quote: Option<&str>) -> QuoteRegisters {
    let mut registers = scan_labels(page);
    if !registers.is_complete() {
        if let Some(parsed) = raw_quote.and_then(decode_quote_hex).and_then(|b| parse_binary(&b)) {
            registers.fill_missing_from(&parsed);
        }
    }
    registers
}

/// Scan page text for labelled register values.
pub fn scan_labels(page: &str) -> QuoteRegisters {
    let text = strip_tags(page);
    let lower = text.to_ascii_lowercase();
    QuoteRegisters {
        mrtd: scan_hex_after(&text, &lower, &["mrtd"], false),
        rtmr0: scan_hex_after(&text, &lower, &["rtmr0", "rtmr[0]"], false),
        rtmr1: scan_hex_after(&text, &lower, &["rtmr1", "rtmr[1]"], false),
        rtmr2: scan_hex_after(&text, &lower, &["rtmr2", "rtmr[2]"], false),
        rtmr3: scan_hex_after(&text, &lower, &["rtmr3", "rtmr[3]"], false),
        reportdata: scan_hex_after(
            &text,
            &lower,
            &["reportdata", "report_data", "report data"],
            false,
        ),
    }
}

/// Read registers at their fixed offsets in a binary TDX quote.
pub fn parse_binary(quote: &[u8]) -> Option<QuoteRegisters> {
    if quote.len() < TDX_BODY_END {
        return None;
    }
    let rtmr = |index: usize| {
        let start = TDX_RTMR0_OFFSET + index * TDX_MEASUREMENT_LEN;
        hex::encode(&quote[start..start + TDX_MEASUREMENT_LEN])
    };
    Some(QuoteRegisters {
        mrtd: hex::encode(&quote[TDX_MRTD_OFFSET..TDX_MRTD_OFFSET + TDX_MEASUREMENT_LEN]),
        rtmr0: rtmr(0),
        rtmr1: rtmr(1),
        rtmr2: rtmr(2),
        rtmr3: rtmr(3),
        reportdata: hex::encode(&quote[TDX_REPORT_DATA_OFFSET..TDX_BODY_END]),
    })
}

/// Decode a hex quote, ignoring whitespace. `None` when not pure hex.
pub fn decode_quote_hex(raw: &str) -> Option<Vec<u8>> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    hex::decode(compact).ok()
}

/// Inner text of the element with the given `id`.
pub fn extract_element_text<'a>(html: &'a str, element_id: &str) -> Option<&'a str> {
    let marker = [format!("id=\"{}\"", element_id), format!("id='{}'", element_id)];
    let start = marker.iter().find_map(|m| html.find(m.as_str()))?;
    let open_end = start + html[start..].find('>')? + 1;
    let close = open_end + html[open_end..].find('<').unwrap_or(html.len() - open_end);
    let text = html[open_end..close].trim();
    (!text.is_empty()).then_some(text)
}

/// TLS certificate fingerprint printed on a self-report page
pub fn scan_tls_fingerprint(page: &str) -> Option<String> {
    let text = strip_tags(page);
    let lower = text.to_ascii_lowercase();
    let value = scan_hex_after(
        &text,
        &lower,
        &[
            "tls certificate fingerprint",
            "tls fingerprint",
            "tls_fingerprint",
            "certificate fingerprint",
        ],
        true,
    );
    (!value.is_empty()).then_some(value)
}

/// Container image hash printed on a self-report page
pub fn scan_container_hash(page: &str) -> Option<String> {
    let text = strip_tags(page);
    let lower = text.to_ascii_lowercase();
    let value = scan_hex_after(
        &text,
        &lower,
        &["container hash", "container_hash", "image digest", "image hash"],
        false,
    );
    (!value.is_empty()).then_some(value)
}

pub fn preview(raw: &str) -> String {
    raw.chars().take(RAW_QUOTE_PREVIEW).collect()
}

/// Replace markup with spaces so labels and values in adjacent cells stay apart
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn scan_hex_after(text: &str, lower: &str, labels: &[&str], allow_colons: bool) -> String {
    for label in labels {
        let mut from = 0;
        while let Some(pos) = lower[from..].find(label) {
            let after = from + pos + label.len();
            let rest = &text[after..];
            let skip = rest
                .find(|c: char| !(c == ':' || c == '=' || c == '"' || c.is_whitespace()))
                .unwrap_or(rest.len());
            let mut candidate = &rest[skip..];
            if let Some(stripped) = candidate.strip_prefix("sha256:") {
                candidate = stripped;
            }

            let value: String = candidate
                .chars()
                .take_while(|c| c.is_ascii_hexdigit() || (allow_colons && *c == ':'))
                .filter(|c| *c != ':')
                .collect();
            if value.len() >= MIN_HEX_LEN {
                return value.to_ascii_lowercase();
            }
            from = after;
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_quote() -> Vec<u8> {
        let mut quote = vec![0u8; TDX_BODY_END + 16];
        quote[TDX_MRTD_OFFSET..TDX_MRTD_OFFSET + 48].fill(0x11);
        for i in 0..4 {
            let start = TDX_RTMR0_OFFSET + i * 48;
            quote[start..start + 48].fill(0x20 + i as u8);
        }
        quote[TDX_REPORT_DATA_OFFSET..TDX_BODY_END].fill(0x99);
        quote
    }

    #[test]
    fn test_layout_offsets() {
        assert_eq!(TDX_MRTD_OFFSET, 184);
        assert_eq!(TDX_RTMR0_OFFSET, 376);
        assert_eq!(TDX_REPORT_DATA_OFFSET, 568);
        assert_eq!(TDX_BODY_END, 632);
    }

    #[test]
    fn test_parse_binary() {
        let registers = parse_binary(&synthetic_quote()).unwrap();
        assert_eq!(registers.mrtd, "11".repeat(48));
        assert_eq!(registers.rtmr0, "20".repeat(48));
        assert_eq!(registers.rtmr3, "23".repeat(48));
        assert_eq!(registers.reportdata, "99".repeat(64));
        assert!(registers.is_complete());
    }

    #[test]
    fn test_parse_binary_too_short() {
        assert!(parse_binary(&[0u8; 100]).is_none());
    }

    #[test]
    fn test_label_scan_html_table() {
        let page = format!(
            "<table><tr><td>MRTD:</td><td>{}</td></tr><tr><td>RTMR0</td><td>{}</td></tr></table>",
            "ab".repeat(48),
            "cd".repeat(48)
        );
        let registers = scan_labels(&page);
        assert_eq!(registers.mrtd, "ab".repeat(48));
        assert_eq!(registers.rtmr0, "cd".repeat(48));
        assert!(registers.rtmr1.is_empty());
    }

    #[test]
    fn test_label_scan_skips_short_matches() {
        let page = format!("MRTD (48 bytes) ... MRTD = {}", "EF".repeat(48));
        assert_eq!(scan_labels(&page).mrtd, "ef".repeat(48));
    }

    #[test]
    fn test_binary_fills_gaps() {
        let raw = hex::encode(synthetic_quote());
        let page = format!(
            "<p>MRTD: {}</p><pre id=\"quoteTextarea\">{}</pre>",
            "ab".repeat(48),
            raw
        );
        let quote = extract_element_text(&page, QUOTE_ELEMENT_ID);
        assert_eq!(quote, Some(raw.as_str()));

        let registers = extract_registers(&page, quote);
        // label value wins where present
        assert_eq!(registers.mrtd, "ab".repeat(48));
        assert_eq!(registers.rtmr2, "22".repeat(48));
        assert_eq!(registers.reportdata, "99".repeat(64));
    }

    #[test]
    fn test_decode_quote_hex_rejects_garbage() {
        assert!(decode_quote_hex("not a quote").is_none());
        assert!(decode_quote_hex("   ").is_none());
        assert_eq!(decode_quote_hex("ab cd\nef"), Some(vec![0xab, 0xcd, 0xef]));
    }

    #[test]
    fn test_scan_report_fields() {
        let page = format!(
            "<div>TLS Fingerprint: {}</div><div>Container hash: sha256:{}</div>",
            "AA:".repeat(31) + "AA",
            "0f".repeat(32)
        );
        assert_eq!(scan_tls_fingerprint(&page), Some("aa".repeat(32)));
        assert_eq!(scan_container_hash(&page), Some("0f".repeat(32)));
        assert!(scan_tls_fingerprint("<p>nothing here</p>").is_none());
    }
}
