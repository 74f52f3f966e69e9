use serde::Serialize;

use crate::bluesky::WEB_BASE;
use crate::node::{Facet, FacetFeature};

/// A run of post text, optionally annotated by a facet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub text: String,
    pub feature: Option<FacetFeature>,
}

impl Segment {
    /// Where a renderer should send a click on this segment.
    pub fn href(&self) -> Option<String> {
        match self.feature.as_ref()? {
            FacetFeature::Link { uri } => Some(uri.clone()),
            FacetFeature::Mention { did } => Some(format!("{WEB_BASE}/profile/{did}")),
            FacetFeature::Tag { tag } => Some(format!("{WEB_BASE}/hashtag/{tag}")),
            FacetFeature::Other { .. } => None,
        }
    }
}

/// Splits `text` at facet byte ranges. Facets that overlap an earlier one or
/// fall outside the text are ignored.
pub fn segments(text: &str, facets: &[Facet]) -> Vec<Segment> {
    let bytes = text.as_bytes();
    let mut sorted: Vec<&Facet> = facets.iter().collect();
    sorted.sort_by_key(|facet| facet.byte_start);

    let mut out = Vec::new();
    let mut last_end = 0;
    for facet in sorted {
        if facet.byte_start < last_end
            || facet.byte_start >= facet.byte_end
            || facet.byte_end > bytes.len()
        {
            continue;
        }
        if facet.byte_start > last_end {
            out.push(plain(&bytes[last_end..facet.byte_start]));
        }
        out.push(Segment {
            text: decode(&bytes[facet.byte_start..facet.byte_end]),
            feature: facet.features.first().cloned(),
        });
        last_end = facet.byte_end;
    }
    if last_end < bytes.len() {
        out.push(plain(&bytes[last_end..]));
    }
    out
}

fn plain(bytes: &[u8]) -> Segment {
    Segment {
        text: decode(bytes),
        feature: None,
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
