use crate::bluesky::{EmbedView, EmbeddedRecord, ImageView, ViewRecord};
use crate::node::{ExternalLink, ImageRef, QuotedPost};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbedContent {
    pub images: Vec<ImageRef>,
    pub external: Option<ExternalLink>,
    pub quoted_post: Option<QuotedPost>,
}

/// Pulls images, an external link and a quoted post out of a post's embed.
/// A quote nested inside the quoted post is never surfaced.
pub fn extract(embed: Option<&EmbedView>) -> EmbedContent {
    let Some(embed) = embed else {
        return EmbedContent::default();
    };
    EmbedContent {
        images: images(embed),
        external: external(embed),
        quoted_post: quoted_post(embed),
    }
}

pub fn images(embed: &EmbedView) -> Vec<ImageRef> {
    match embed {
        EmbedView::Images(view) => view.images.iter().map(image_ref).collect(),
        EmbedView::RecordWithMedia(view) => images(&view.media),
        EmbedView::External(_) | EmbedView::Record(_) | EmbedView::Unsupported => Vec::new(),
    }
}

pub fn external(embed: &EmbedView) -> Option<ExternalLink> {
    match embed {
        EmbedView::External(view) => Some(ExternalLink {
            uri: view.external.uri.clone(),
            title: view.external.title.clone(),
            description: view.external.description.clone(),
            thumbnail: view.external.thumb.clone(),
        }),
        EmbedView::RecordWithMedia(view) => external(&view.media),
        EmbedView::Images(_) | EmbedView::Record(_) | EmbedView::Unsupported => None,
    }
}

pub fn quoted_post(embed: &EmbedView) -> Option<QuotedPost> {
    let record = match embed {
        EmbedView::Record(view) => &view.record,
        EmbedView::RecordWithMedia(view) => &view.record.record,
        EmbedView::Images(_) | EmbedView::External(_) | EmbedView::Unsupported => return None,
    };
    match record {
        EmbeddedRecord::Post(view) => Some(quote_summary(view)),
        EmbeddedRecord::Unavailable => None,
    }
}

fn quote_summary(record: &ViewRecord) -> QuotedPost {
    QuotedPost {
        uri: record.uri.clone(),
        author_did: record.author.did.clone(),
        handle: record.author.handle.clone(),
        display_name: record.author.display_name().to_string(),
        avatar: record.author.avatar.clone(),
        text: record.value.text.clone(),
        images: record.embeds.iter().flat_map(images).collect(),
    }
}

fn image_ref(image: &ImageView) -> ImageRef {
    ImageRef {
        thumbnail: image.thumb.clone(),
        fullsize: image.fullsize.clone(),
        alt_text: image.alt.clone(),
        aspect_ratio: image.aspect_ratio.map(|ratio| (ratio.width, ratio.height)),
    }
}
