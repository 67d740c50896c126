//! Image references embedded in markup bodies.
//!
//! Only the byte span of each `src` attribute value is recorded, so a rewrite
//! replaces exactly those spans and leaves the rest of the body untouched.

use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

/// `<img ... src=...>` with double-quoted, single-quoted or bare values.
static IMG_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap()
});

/// One `src` value found in the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// URL with `&amp;` decoded, ready to fetch.
    pub url: String,
    /// Byte range of the raw attribute value.
    span: Range<usize>,
}

/// A body plus the image references located in it.
#[derive(Debug, Clone)]
pub struct MarkupDocument {
    body: String,
    images: Vec<ImageRef>,
}

impl MarkupDocument {
    /// Scan `body` for image references in document order.
    pub fn parse(body: &str) -> Self {
        let images = IMG_SRC
            .captures_iter(body)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
            .filter(|value| !value.as_str().trim().is_empty())
            .map(|value| ImageRef {
                url: decode_entities(value.as_str().trim()),
                span: value.range(),
            })
            .collect();

        Self {
            body: body.to_string(),
            images,
        }
    }

    pub fn images(&self) -> &[ImageRef] {
        &self.images
    }

    /// Produce the body with the given per-image replacements applied.
    ///
    /// `replacements[i]` belongs to `images()[i]`; `None` keeps the original.
    pub fn rewrite(&self, replacements: &[Option<String>]) -> String {
        let mut out = String::with_capacity(self.body.len());
        let mut cursor = 0;

        for (image, replacement) in self.images.iter().zip(replacements) {
            let Some(new_src) = replacement else {
                continue;
            };
            out.push_str(&self.body[cursor..image.span.start]);
            out.push_str(&encode_attribute(new_src));
            cursor = image.span.end;
        }

        out.push_str(&self.body[cursor..]);
        out
    }
}

fn decode_entities(value: &str) -> String {
    value.replace("&amp;", "&").replace("&#038;", "&")
}

fn encode_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
