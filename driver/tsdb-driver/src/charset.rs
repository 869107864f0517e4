///
/// Session character sets.
///
/// The store accepts SQL text in the session charset and hands text values
/// back in the same charset. Internally the driver works on UTF-8 `String`s,
/// so this module converts at both edges.
///
/// Multi-byte codecs go through `encoding_rs`. ISO-8859-1 and UCS-2 are
/// mapped directly because `encoding_rs` follows the WHATWG labels, where
/// `iso-8859-1` means windows-1252 and UTF-16 is decode-only.
///

use std::borrow::Cow;
use std::fmt;

use encoding_rs::Encoding;

use crate::error::{DriverError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Charset {
    Gbk,
    Utf8,
    Ucs2Le,
    Ucs2Be,
    Big5,
    EucJp,
    ShiftJis,
    EucKr,
    Iso8859_1,
    Windows1251,
    Windows1252,
}

impl Default for Charset {
    fn default() -> Self {
        Charset::Iso8859_1
    }
}

impl Charset {
    pub const ALL: [Charset; 11] = [
        Charset::Gbk,
        Charset::Utf8,
        Charset::Ucs2Le,
        Charset::Ucs2Be,
        Charset::Big5,
        Charset::EucJp,
        Charset::ShiftJis,
        Charset::EucKr,
        Charset::Iso8859_1,
        Charset::Windows1251,
        Charset::Windows1252,
    ];

    /// Looks up a charset by name, ignoring case and a few common spellings.
    pub fn from_name(name: &str) -> Result<Self> {
        let lowered = name.trim().to_ascii_lowercase();
        let charset = match lowered.as_str() {
            "gbk" | "gb2312" | "cp936" => Charset::Gbk,
            "utf-8" | "utf8" => Charset::Utf8,
            "ucs-2le" | "ucs2le" | "utf-16le" => Charset::Ucs2Le,
            "ucs-2be" | "ucs2be" | "utf-16be" => Charset::Ucs2Be,
            "big-5" | "big5" => Charset::Big5,
            "euc-jp" | "eucjp" => Charset::EucJp,
            "shift-jis" | "shift_jis" | "sjis" => Charset::ShiftJis,
            "euc-kr" | "euckr" => Charset::EucKr,
            "iso-8859-1" | "iso8859-1" | "latin1" => Charset::Iso8859_1,
            "windows-1251" | "cp1251" => Charset::Windows1251,
            "windows-1252" | "cp1252" => Charset::Windows1252,
            _ => return Err(DriverError::InvalidCharset(name.to_string())),
        };
        Ok(charset)
    }

    /// Canonical name, as reported by `charset_get`.
    pub fn name(&self) -> &'static str {
        match self {
            Charset::Gbk => "gbk",
            Charset::Utf8 => "utf-8",
            Charset::Ucs2Le => "ucs-2le",
            Charset::Ucs2Be => "ucs-2be",
            Charset::Big5 => "big-5",
            Charset::EucJp => "euc-jp",
            Charset::ShiftJis => "shift-jis",
            Charset::EucKr => "euc-kr",
            Charset::Iso8859_1 => "iso-8859-1",
            Charset::Windows1251 => "windows-1251",
            Charset::Windows1252 => "windows-1252",
        }
    }

    /// Bytes per code unit, which is also the width of a NUL terminator.
    pub fn unit_width(&self) -> usize {
        match self {
            Charset::Ucs2Le | Charset::Ucs2Be => 2,
            _ => 1,
        }
    }

    fn encoding(&self) -> Option<&'static Encoding> {
        match self {
            Charset::Gbk => Some(encoding_rs::GBK),
            Charset::Utf8 => Some(encoding_rs::UTF_8),
            Charset::Big5 => Some(encoding_rs::BIG5),
            Charset::EucJp => Some(encoding_rs::EUC_JP),
            Charset::ShiftJis => Some(encoding_rs::SHIFT_JIS),
            Charset::EucKr => Some(encoding_rs::EUC_KR),
            Charset::Windows1251 => Some(encoding_rs::WINDOWS_1251),
            Charset::Windows1252 => Some(encoding_rs::WINDOWS_1252),
            Charset::Iso8859_1 | Charset::Ucs2Le | Charset::Ucs2Be => None,
        }
    }

    /// Decodes session bytes into text. Malformed input is rejected rather
    /// than replaced, since it would otherwise alter the SQL sent to the store.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Result<Cow<'a, str>> {
        match self {
            Charset::Iso8859_1 => Ok(Cow::Owned(bytes.iter().map(|&b| b as char).collect())),
            Charset::Ucs2Le | Charset::Ucs2Be => {
                if bytes.len() % 2 != 0 {
                    return Err(DriverError::InvalidCharset(format!(
                        "{}: odd byte length {}",
                        self.name(),
                        bytes.len()
                    )));
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| match self {
                        Charset::Ucs2Le => u16::from_le_bytes([pair[0], pair[1]]),
                        _ => u16::from_be_bytes([pair[0], pair[1]]),
                    })
                    .collect();
                String::from_utf16(&units)
                    .map(Cow::Owned)
                    .map_err(|e| DriverError::InvalidCharset(format!("{}: {}", self.name(), e)))
            }
            _ => {
                let encoding = self.encoding().unwrap_or(encoding_rs::UTF_8);
                encoding
                    .decode_without_bom_handling_and_without_replacement(bytes)
                    .ok_or_else(|| {
                        DriverError::InvalidCharset(format!("{}: malformed input", self.name()))
                    })
            }
        }
    }

    /// Encodes text into session bytes. Characters the charset cannot
    /// represent become `?` for single-byte charsets and numeric character
    /// references for the `encoding_rs` ones.
    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        match self {
            Charset::Iso8859_1 => Cow::Owned(
                text.chars()
                    .map(|c| if (c as u32) <= 0xFF { c as u8 } else { b'?' })
                    .collect(),
            ),
            Charset::Ucs2Le => Cow::Owned(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            Charset::Ucs2Be => Cow::Owned(text.encode_utf16().flat_map(u16::to_be_bytes).collect()),
            _ => {
                let encoding = self.encoding().unwrap_or(encoding_rs::UTF_8);
                let (bytes, _, _) = encoding.encode(text);
                bytes
            }
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
