//! Legacy codepage decoding for narrow string fields.
//!
//! MSIECF stores locations and filenames as byte strings in whatever ANSI
//! codepage the writing system used. The set of accepted identifiers is
//! fixed; anything else is rejected when it is configured, never at decode
//! time.
//!
//! Decoding goes through `encoding_rs`. The WHATWG encoding standard folds
//! ISO-8859-1, ISO-8859-9 and ISO-8859-11 into their Windows supersets, which
//! assign printable characters to 0x80-0x9F. Those bytes are kept as C1
//! controls for the ISO codepages, and ASCII maps every byte above 0x7F to
//! U+FFFD.

use std::fmt;
use std::str::FromStr;

use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Supported legacy codepages, by Windows codepage identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Codepage {
    Ascii,
    Iso8859_1,
    Iso8859_2,
    Iso8859_3,
    Iso8859_4,
    Iso8859_5,
    Iso8859_6,
    Iso8859_7,
    Iso8859_8,
    Iso8859_9,
    Iso8859_10,
    Iso8859_11,
    Iso8859_13,
    Iso8859_14,
    Iso8859_15,
    Iso8859_16,
    Koi8R,
    Koi8U,
    Windows874,
    Windows932,
    Windows936,
    Windows949,
    Windows950,
    Windows1250,
    Windows1251,
    Windows1252,
    Windows1253,
    Windows1254,
    Windows1255,
    Windows1256,
    Windows1257,
    Windows1258,
}

impl Default for Codepage {
    fn default() -> Self {
        Codepage::Windows1252
    }
}

/// (codepage, Windows identifier, canonical name)
const CODEPAGES: &[(Codepage, u32, &str)] = &[
    (Codepage::Ascii, 20127, "ascii"),
    (Codepage::Iso8859_1, 28591, "iso-8859-1"),
    (Codepage::Iso8859_2, 28592, "iso-8859-2"),
    (Codepage::Iso8859_3, 28593, "iso-8859-3"),
    (Codepage::Iso8859_4, 28594, "iso-8859-4"),
    (Codepage::Iso8859_5, 28595, "iso-8859-5"),
    (Codepage::Iso8859_6, 28596, "iso-8859-6"),
    (Codepage::Iso8859_7, 28597, "iso-8859-7"),
    (Codepage::Iso8859_8, 28598, "iso-8859-8"),
    (Codepage::Iso8859_9, 28599, "iso-8859-9"),
    (Codepage::Iso8859_10, 28600, "iso-8859-10"),
    (Codepage::Iso8859_11, 28601, "iso-8859-11"),
    (Codepage::Iso8859_13, 28603, "iso-8859-13"),
    (Codepage::Iso8859_14, 28604, "iso-8859-14"),
    (Codepage::Iso8859_15, 28605, "iso-8859-15"),
    (Codepage::Iso8859_16, 28606, "iso-8859-16"),
    (Codepage::Koi8R, 20866, "koi8-r"),
    (Codepage::Koi8U, 21866, "koi8-u"),
    (Codepage::Windows874, 874, "windows-874"),
    (Codepage::Windows932, 932, "windows-932"),
    (Codepage::Windows936, 936, "windows-936"),
    (Codepage::Windows949, 949, "windows-949"),
    (Codepage::Windows950, 950, "windows-950"),
    (Codepage::Windows1250, 1250, "windows-1250"),
    (Codepage::Windows1251, 1251, "windows-1251"),
    (Codepage::Windows1252, 1252, "windows-1252"),
    (Codepage::Windows1253, 1253, "windows-1253"),
    (Codepage::Windows1254, 1254, "windows-1254"),
    (Codepage::Windows1255, 1255, "windows-1255"),
    (Codepage::Windows1256, 1256, "windows-1256"),
    (Codepage::Windows1257, 1257, "windows-1257"),
    (Codepage::Windows1258, 1258, "windows-1258"),
];

impl Codepage {
    /// Look up a Windows codepage identifier
    pub fn from_id(id: u32) -> Result<Self> {
        CODEPAGES
            .iter()
            .find(|(_, cp_id, _)| *cp_id == id)
            .map(|(cp, _, _)| *cp)
            .ok_or(Error::UnsupportedCodepage(id))
    }

    pub fn id(self) -> u32 {
        self.entry().1
    }

    /// Canonical lowercase name, e.g. `windows-1252`
    pub fn name(self) -> &'static str {
        self.entry().2
    }

    /// Resolve a name such as `windows-1252`, `cp1252`, `1252` or `koi8-r`
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();

        if let Some((cp, _, _)) = CODEPAGES.iter().find(|(_, _, n)| *n == name) {
            return Some(*cp);
        }

        let digits = name
            .strip_prefix("windows-")
            .or_else(|| name.strip_prefix("cp"))
            .unwrap_or(&name);

        digits
            .parse::<u32>()
            .ok()
            .and_then(|id| Self::from_id(id).ok())
    }

    fn entry(self) -> &'static (Codepage, u32, &'static str) {
        CODEPAGES
            .iter()
            .find(|(cp, _, _)| *cp == self)
            .unwrap_or(&CODEPAGES[25])
    }

    /// The `encoding_rs` decoder used for this codepage
    pub fn encoding(self) -> &'static Encoding {
        match self {
            Codepage::Ascii | Codepage::Iso8859_1 | Codepage::Windows1252 => {
                encoding_rs::WINDOWS_1252
            }
            Codepage::Iso8859_2 => encoding_rs::ISO_8859_2,
            Codepage::Iso8859_3 => encoding_rs::ISO_8859_3,
            Codepage::Iso8859_4 => encoding_rs::ISO_8859_4,
            Codepage::Iso8859_5 => encoding_rs::ISO_8859_5,
            Codepage::Iso8859_6 => encoding_rs::ISO_8859_6,
            Codepage::Iso8859_7 => encoding_rs::ISO_8859_7,
            Codepage::Iso8859_8 => encoding_rs::ISO_8859_8,
            Codepage::Iso8859_9 | Codepage::Windows1254 => encoding_rs::WINDOWS_1254,
            Codepage::Iso8859_10 => encoding_rs::ISO_8859_10,
            Codepage::Iso8859_11 | Codepage::Windows874 => encoding_rs::WINDOWS_874,
            Codepage::Iso8859_13 => encoding_rs::ISO_8859_13,
            Codepage::Iso8859_14 => encoding_rs::ISO_8859_14,
            Codepage::Iso8859_15 => encoding_rs::ISO_8859_15,
            Codepage::Iso8859_16 => encoding_rs::ISO_8859_16,
            Codepage::Koi8R => encoding_rs::KOI8_R,
            Codepage::Koi8U => encoding_rs::KOI8_U,
            Codepage::Windows932 => encoding_rs::SHIFT_JIS,
            Codepage::Windows936 => encoding_rs::GBK,
            Codepage::Windows949 => encoding_rs::EUC_KR,
            Codepage::Windows950 => encoding_rs::BIG5,
            Codepage::Windows1250 => encoding_rs::WINDOWS_1250,
            Codepage::Windows1251 => encoding_rs::WINDOWS_1251,
            Codepage::Windows1253 => encoding_rs::WINDOWS_1253,
            Codepage::Windows1255 => encoding_rs::WINDOWS_1255,
            Codepage::Windows1256 => encoding_rs::WINDOWS_1256,
            Codepage::Windows1257 => encoding_rs::WINDOWS_1257,
            Codepage::Windows1258 => encoding_rs::WINDOWS_1258,
        }
    }

    /// Decode a byte string. Invalid sequences become U+FFFD.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Codepage::Ascii => bytes
                .iter()
                .map(|&b| {
                    if b.is_ascii() {
                        b as char
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                })
                .collect(),
            Codepage::Iso8859_1 => encoding_rs::mem::decode_latin1(bytes).into_owned(),
            Codepage::Iso8859_9 | Codepage::Iso8859_11 => self.decode_keeping_c1(bytes),
            _ => {
                let (text, _had_errors) = self.encoding().decode_without_bom_handling(bytes);
                text.into_owned()
            }
        }
    }

    /// Superset decoding with 0x80-0x9F passed through as C1 controls
    fn decode_keeping_c1(self, bytes: &[u8]) -> String {
        let is_c1 = |b: u8| (0x80..=0x9f).contains(&b);
        let mut text = String::with_capacity(bytes.len());

        for run in bytes.chunk_by(|a, b| is_c1(*a) == is_c1(*b)) {
            if is_c1(run[0]) {
                text.extend(run.iter().map(|&b| b as char));
            } else {
                text.push_str(&self.encoding().decode_without_bom_handling(run).0);
            }
        }
        text
    }

    /// All supported codepages in identifier-table order
    pub fn all() -> impl Iterator<Item = Codepage> {
        CODEPAGES.iter().map(|(cp, _, _)| *cp)
    }
}

impl fmt::Display for Codepage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codepage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Codepage::from_name(s).ok_or_else(|| format!("unsupported codepage: {}", s))
    }
}

impl TryFrom<u32> for Codepage {
    type Error = Error;

    fn try_from(id: u32) -> Result<Self> {
        Codepage::from_id(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_windows_1252() {
        assert_eq!(Codepage::default().id(), 1252);
        assert_eq!(Codepage::default().name(), "windows-1252");
    }

    #[test]
    fn test_every_id_roundtrips() {
        for cp in Codepage::all() {
            assert_eq!(Codepage::from_id(cp.id()).unwrap(), cp);
            assert_eq!(Codepage::from_name(cp.name()), Some(cp));
        }
    }

    #[test]
    fn test_unsupported_ids() {
        for id in [0, 437, 65001, 28602, 1200, 99999] {
            assert!(matches!(
                Codepage::from_id(id),
                Err(Error::UnsupportedCodepage(x)) if x == id
            ));
        }
    }

    #[test]
    fn test_name_aliases() {
        assert_eq!(Codepage::from_name("CP1251"), Some(Codepage::Windows1251));
        assert_eq!(Codepage::from_name("1250"), Some(Codepage::Windows1250));
        assert_eq!(Codepage::from_name(" KOI8-R "), Some(Codepage::Koi8R));
        assert_eq!(Codepage::from_name("utf-8"), None);
        assert!("windows-1253".parse::<Codepage>().is_ok());
        assert!("klingon".parse::<Codepage>().is_err());
    }

    #[test]
    fn test_decode_single_byte_tables() {
        assert_eq!(Codepage::Windows1252.decode(b"caf\xe9"), "café");
        assert_eq!(Codepage::Windows1251.decode(b"\xcf\xf0\xe8"), "При");
        assert_eq!(Codepage::Koi8R.decode(b"\xf0\xd2\xc9"), "При");
        assert_eq!(Codepage::Iso8859_2.decode(b"\xb1"), "ą");
    }

    #[test]
    fn test_iso_codepages_keep_c1_controls() {
        assert_eq!(Codepage::Windows1252.decode(b"\x80"), "\u{20ac}");
        assert_eq!(Codepage::Iso8859_1.decode(b"caf\xe9\x80\x9f"), "caf\u{e9}\u{80}\u{9f}");
        assert_eq!(Codepage::Iso8859_9.decode(b"\xfe\x85\xf0"), "\u{15f}\u{85}\u{11f}");
        assert_eq!(Codepage::Iso8859_11.decode(b"\xa1\x91"), "\u{e01}\u{91}");
        assert_eq!(Codepage::Windows874.decode(b"\x85"), "\u{2026}");
    }

    #[test]
    fn test_ascii_replaces_high_bytes() {
        assert_eq!(Codepage::Ascii.decode(b"abc\xe9"), "abc\u{fffd}");
    }

    #[test]
    fn test_decode_double_byte() {
        // "日本" in Shift-JIS
        assert_eq!(Codepage::Windows932.decode(b"\x93\xfa\x96\x7b"), "日本");
    }
}
