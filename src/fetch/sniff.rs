//! File type detection from declared headers and leading body bytes.

/// Declared `Content-Type` values we trust, and the extension each maps to.
const CONTENT_TYPE_EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", ".jpg"),
    ("image/jpg", ".jpg"),
    ("image/png", ".png"),
    ("image/gif", ".gif"),
    ("image/webp", ".webp"),
    ("image/svg+xml", ".svg"),
    ("image/bmp", ".bmp"),
    ("image/tiff", ".tiff"),
    ("application/pdf", ".pdf"),
];

/// A file type recognised from its magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub extension: &'static str,
    pub mime: &'static str,
}

impl Signature {
    /// Whether the type is a raster image a perceptual hasher can decode.
    #[must_use]
    pub fn is_raster_image(&self) -> bool {
        self.mime.starts_with("image/") && self.mime != "image/svg+xml"
    }
}

const JPEG: Signature = Signature {
    extension: ".jpg",
    mime: "image/jpeg",
};
const PNG: Signature = Signature {
    extension: ".png",
    mime: "image/png",
};
const GIF: Signature = Signature {
    extension: ".gif",
    mime: "image/gif",
};
const WEBP: Signature = Signature {
    extension: ".webp",
    mime: "image/webp",
};
const PDF: Signature = Signature {
    extension: ".pdf",
    mime: "application/pdf",
};
const BMP: Signature = Signature {
    extension: ".bmp",
    mime: "image/bmp",
};
const TIFF: Signature = Signature {
    extension: ".tiff",
    mime: "image/tiff",
};
const SVG: Signature = Signature {
    extension: ".svg",
    mime: "image/svg+xml",
};

/// How far into a text document we look for an `<svg` root.
const SVG_SCAN_LIMIT: usize = 512;

/// Map a declared content type (parameters ignored) to an extension.
#[must_use]
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    CONTENT_TYPE_EXTENSIONS
        .iter()
        .find(|(ct, _)| *ct == essence)
        .map(|(_, ext)| *ext)
}

/// Identify a body by its leading bytes.
#[must_use]
pub fn sniff(content: &[u8]) -> Option<Signature> {
    if content.len() < 8 {
        return None;
    }

    if content.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(JPEG);
    }
    if content.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some(PNG);
    }
    if content.starts_with(b"GIF87a") || content.starts_with(b"GIF89a") {
        return Some(GIF);
    }
    if content.starts_with(b"RIFF") && content.len() >= 12 && &content[8..12] == b"WEBP" {
        return Some(WEBP);
    }
    if content.starts_with(b"%PDF-") {
        return Some(PDF);
    }
    if content.starts_with(b"BM") {
        return Some(BMP);
    }
    if content.starts_with(b"II*\0") || content.starts_with(b"MM\0*") {
        return Some(TIFF);
    }
    if looks_like_svg(content) {
        return Some(SVG);
    }

    None
}

/// Extension for a body, by signature.
#[must_use]
pub fn sniff_extension(content: &[u8]) -> Option<&'static str> {
    sniff(content).map(|s| s.extension)
}

fn looks_like_svg(content: &[u8]) -> bool {
    let head = &content[..content.len().min(SVG_SCAN_LIMIT)];
    let text = String::from_utf8_lossy(head);
    let text = text.trim_start_matches('\u{feff}').trim_start();

    if text.starts_with("<svg") {
        return true;
    }
    (text.starts_with("<?xml") || text.starts_with("<!DOCTYPE svg")) && text.contains("<svg")
}
