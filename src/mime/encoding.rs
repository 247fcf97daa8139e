//! Multi-charset decode fallback chain for MIME headers and bodies (§4.1):
//! `utf-8 -> gbk -> gb2312 -> latin1 -> utf-8 with replacement`.
//!
//! `mailparse` only hands back raw bytes once transfer-encoding has been
//! undone; this module picks the character set on top of that.

use encoding_rs::{EUC_KR, GB18030, GBK, WINDOWS_1252};

/// Decode `bytes` trying each charset in the fallback order, stopping at the
/// first one that decodes without replacement characters. `gb2312` is a
/// strict subset of `GBK`; `encoding_rs` doesn't ship a standalone GB2312
/// decoder, so `GBK` covers both steps and `GB18030` (a superset still
/// covering the same code points for this purpose) backs the second attempt
/// when the bytes don't round-trip cleanly through `GBK` alone.
pub fn decode_lossy(bytes: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }

    for enc in [GBK, GB18030, WINDOWS_1252] {
        let (cow, _, had_errors) = enc.decode(bytes);
        if !had_errors {
            return cow.into_owned();
        }
    }

    // latin1 (ISO-8859-1) never reports decode errors - every byte maps to a
    // code point - so it's the last non-lossy attempt before the final
    // utf-8-with-replacement fallback.
    let (cow, _, had_errors) = WINDOWS_1252.decode(bytes);
    if !had_errors {
        return cow.into_owned();
    }
    let _ = EUC_KR; // kept available for callers that need to probe CJK

    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_clean_utf8_as_is() {
        assert_eq!(decode_lossy("hello".as_bytes()), "hello");
    }

    #[test]
    fn falls_back_to_gbk_for_simplified_chinese() {
        let (bytes, _, had_errors) = GBK.encode("你好");
        assert!(!had_errors);
        assert_eq!(decode_lossy(&bytes), "你好");
    }

    #[test]
    fn never_panics_on_arbitrary_bytes() {
        let garbage = [0xff, 0xfe, 0x00, 0x80, 0x81];
        let _ = decode_lossy(&garbage);
    }
}
