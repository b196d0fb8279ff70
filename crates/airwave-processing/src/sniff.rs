//! Container detection from leading bytes.
//!
//! The declared filename is never trusted; the validator compares the
//! container sniffed here against the declared kind. Signature matching is
//! done by `infer`; the major brand of an ISO base media file and the doctype
//! of an EBML file settle the few cases its matchers leave ambiguous.

use airwave_core::ContainerFormat;

/// Bytes of header needed for a decision.
pub const SNIFF_LEN: usize = 64;

/// ISO base media brands that carry no audio/video hint on their own.
const GENERIC_ISO_BRANDS: [&[u8; 4]; 7] = [
    b"isom", b"iso2", b"iso4", b"iso5", b"iso6", b"mp41", b"mp42",
];

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn iso_brand(header: &[u8]) -> Option<&[u8]> {
    if header.len() >= 12 && &header[4..8] == b"ftyp" {
        Some(&header[8..12])
    } else {
        None
    }
}

/// Map the MIME type `infer` reports onto the allow-list.
fn from_infer_mime(mime: &str) -> Option<ContainerFormat> {
    match mime {
        "audio/mpeg" => Some(ContainerFormat::Mp3),
        "audio/x-wav" | "audio/wav" => Some(ContainerFormat::Wav),
        "audio/ogg" | "audio/opus" => Some(ContainerFormat::Ogg),
        "audio/x-flac" | "audio/flac" => Some(ContainerFormat::Flac),
        "audio/m4a" | "audio/x-m4a" | "audio/mp4" => Some(ContainerFormat::M4a),
        "audio/aac" => Some(ContainerFormat::Aac),
        "video/mp4" | "video/x-m4v" => Some(ContainerFormat::Mp4),
        "video/quicktime" => Some(ContainerFormat::Mov),
        "video/webm" => Some(ContainerFormat::Webm),
        "video/x-matroska" => Some(ContainerFormat::Mkv),
        "video/x-msvideo" => Some(ContainerFormat::Avi),
        _ => None,
    }
}

/// Identify the container from the first [`SNIFF_LEN`] bytes (fewer at EOF).
pub fn sniff(header: &[u8]) -> Option<ContainerFormat> {
    let detected = infer::get(header).and_then(|kind| from_infer_mime(kind.mime_type()));

    if let Some(brand) = iso_brand(header) {
        return match brand {
            b"M4A " | b"M4B " | b"M4P " => Some(ContainerFormat::M4a),
            b"qt  " => Some(ContainerFormat::Mov),
            // `infer` calls any 20-byte ftyp box QuickTime.
            _ => detected.map(|format| match format {
                ContainerFormat::Mov => ContainerFormat::Mp4,
                other => other,
            }),
        };
    }

    match detected {
        Some(ContainerFormat::Webm | ContainerFormat::Mkv) if contains(header, b"matroska") => {
            Some(ContainerFormat::Mkv)
        }
        Some(ContainerFormat::Webm | ContainerFormat::Mkv) if contains(header, b"webm") => {
            Some(ContainerFormat::Webm)
        }
        other => other,
    }
}

/// True when the header is an ISO base media file whose brand says nothing
/// about audio vs video (an `.m4a` is often branded `isom`).
pub fn is_generic_iso_media(header: &[u8]) -> bool {
    iso_brand(header).is_some_and(|brand| GENERIC_ISO_BRANDS.iter().any(|g| brand == &g[..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ftyp(size: u8, brand: &[u8; 4]) -> Vec<u8> {
        let mut header = vec![0x00, 0x00, 0x00, size];
        header.extend_from_slice(b"ftyp");
        header.extend_from_slice(brand);
        header.extend_from_slice(&[0u8; 20]);
        header
    }

    #[test]
    fn test_riff_variants() {
        assert_eq!(sniff(b"RIFF\x24\x00\x00\x00WAVEfmt "), Some(ContainerFormat::Wav));
        assert_eq!(sniff(b"RIFF\x24\x00\x00\x00AVI LIST"), Some(ContainerFormat::Avi));
        assert_eq!(sniff(b"RIFF\x24\x00\x00\x00RMID"), None);
    }

    #[test]
    fn test_audio_signatures() {
        assert_eq!(sniff(b"ID3\x04\x00\x00\x00\x00"), Some(ContainerFormat::Mp3));
        assert_eq!(sniff(&[0xFF, 0xFB, 0x90, 0x64]), Some(ContainerFormat::Mp3));
        assert_eq!(sniff(&[0xFF, 0xF1, 0x50, 0x80]), Some(ContainerFormat::Aac));
        assert_eq!(sniff(b"OggS\x00\x02\x00\x00\x00\x00\x00\x00"), Some(ContainerFormat::Ogg));
        assert_eq!(sniff(b"fLaC\x00\x00\x00\x22"), Some(ContainerFormat::Flac));
    }

    #[test]
    fn test_iso_brands() {
        assert_eq!(sniff(&ftyp(0x20, b"M4A ")), Some(ContainerFormat::M4a));
        assert_eq!(sniff(&ftyp(0x20, b"qt  ")), Some(ContainerFormat::Mov));
        assert_eq!(sniff(&ftyp(0x20, b"isom")), Some(ContainerFormat::Mp4));
        assert_eq!(sniff(&ftyp(0x14, b"mp42")), Some(ContainerFormat::Mp4));
        assert!(is_generic_iso_media(&ftyp(0x20, b"isom")));
        assert!(!is_generic_iso_media(&ftyp(0x20, b"M4A ")));
    }

    #[test]
    fn test_matroska_doctype() {
        let mut webm = vec![0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x86, 0x81, 0x01, 0x42, 0x82, 0x84];
        webm.extend_from_slice(b"webm");
        assert_eq!(sniff(&webm), Some(ContainerFormat::Webm));

        let mut mkv = vec![0x1A, 0x45, 0xDF, 0xA3, 0xA3, 0x42, 0x86, 0x81, 0x01, 0x42, 0x82, 0x88];
        mkv.extend_from_slice(b"matroska");
        mkv.extend_from_slice(&[0u8; 24]);
        assert_eq!(sniff(&mkv), Some(ContainerFormat::Mkv));
    }

    #[test]
    fn test_unknown_content() {
        assert_eq!(sniff(b""), None);
        assert_eq!(sniff(b"%PDF-1.7"), None);
        assert_eq!(sniff(b"\x89PNG\r\n\x1a\n\x00\x00\x00\x0dIHDR"), None);
        assert_eq!(sniff(b"hello world, not media"), None);
    }
}
