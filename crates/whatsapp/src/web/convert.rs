//! Mapping between whatsapp-rust types and the gateway's own.

use {
    serde::Serialize,
    serde_json::{Value, json},
    wacore::{download::MediaType, types::message::MessageInfo},
    waproto::whatsapp as wa,
    wagate_common::{MediaDescriptor, MediaKind},
};

use crate::{
    client::{OutgoingMedia, OutgoingMessage, UploadedMedia},
    events::ReceiptKind,
};

pub fn media_type(kind: MediaKind) -> MediaType {
    match kind {
        MediaKind::Image => MediaType::Image,
        MediaKind::Document => MediaType::Document,
        MediaKind::Video => MediaType::Video,
        MediaKind::Audio => MediaType::Audio,
        MediaKind::Sticker => MediaType::Sticker,
    }
}

/// JSON form of a network payload; `null` when it does not serialize.
pub fn payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Webhook body of an inbound message: `Info` carries routing metadata,
/// `Message` the protobuf content.
pub fn message_payload(message: &wa::Message, info: &MessageInfo) -> Value {
    json!({
        "Info": {
            "ID": info.id,
            "Chat": info.source.chat.to_string(),
            "Sender": info.source.sender.to_string(),
            "IsFromMe": info.source.is_from_me,
            "IsGroup": info.source.is_group,
            "PushName": info.push_name,
            "Timestamp": info.timestamp.to_rfc3339(),
        },
        "Message": payload(message),
    })
}

/// Receipt flavors arrive as enum variants; their debug names match the
/// names [`ReceiptKind::from_wire`] accepts.
pub fn receipt_kind(kind: &impl std::fmt::Debug) -> ReceiptKind {
    ReceiptKind::from_wire(&format!("{kind:?}"))
}

/// Leading identifier of a debug rendering, e.g. `"Blocklist"` for
/// `Blocklist(..)`.
pub fn variant_name(event: &impl std::fmt::Debug) -> String {
    format!("{event:?}")
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

macro_rules! media_fields {
    ($ty:path, $url:expr, $path:expr, $key:expr, $enc:expr, $sha:expr, $len:expr, $mime:expr, { $($extra:tt)* }) => {
        $ty {
            url: Some($url),
            direct_path: Some($path),
            media_key: Some($key),
            file_enc_sha256: Some($enc),
            file_sha256: Some($sha),
            file_length: Some($len),
            mimetype: Some($mime),
            $($extra)*
            ..Default::default()
        }
    };
}

pub fn outgoing(message: OutgoingMessage) -> wa::Message {
    match message {
        OutgoingMessage::Text { body } => wa::Message {
            conversation: Some(body),
            ..Default::default()
        },
        OutgoingMessage::Media(media) => media_message(media),
    }
}

fn media_message(media: OutgoingMedia) -> wa::Message {
    let OutgoingMedia {
        kind,
        upload:
            UploadedMedia {
                url,
                direct_path,
                media_key,
                file_enc_sha256,
                file_sha256,
                file_length,
            },
        mimetype,
        caption,
        file_name,
        jpeg_thumbnail,
        seconds,
        ptt,
    } = media;

    match kind {
        MediaKind::Image => wa::Message {
            image_message: Some(Box::new(media_fields!(
                wa::message::ImageMessage,
                url, direct_path, media_key, file_enc_sha256, file_sha256, file_length, mimetype,
                { caption: caption, jpeg_thumbnail: jpeg_thumbnail, }
            ))),
            ..Default::default()
        },
        MediaKind::Video => wa::Message {
            video_message: Some(Box::new(media_fields!(
                wa::message::VideoMessage,
                url, direct_path, media_key, file_enc_sha256, file_sha256, file_length, mimetype,
                { caption: caption, jpeg_thumbnail: jpeg_thumbnail, seconds: seconds, }
            ))),
            ..Default::default()
        },
        MediaKind::Audio => wa::Message {
            audio_message: Some(Box::new(media_fields!(
                wa::message::AudioMessage,
                url, direct_path, media_key, file_enc_sha256, file_sha256, file_length, mimetype,
                { seconds: seconds, ptt: Some(ptt), }
            ))),
            ..Default::default()
        },
        MediaKind::Document => wa::Message {
            document_message: Some(Box::new(media_fields!(
                wa::message::DocumentMessage,
                url, direct_path, media_key, file_enc_sha256, file_sha256, file_length, mimetype,
                { caption: caption, title: file_name.clone(), file_name: file_name, }
            ))),
            ..Default::default()
        },
        MediaKind::Sticker => wa::Message {
            sticker_message: Some(Box::new(media_fields!(
                wa::message::StickerMessage,
                url, direct_path, media_key, file_enc_sha256, file_sha256, file_length, mimetype,
                {}
            ))),
            ..Default::default()
        },
    }
}

/// Encrypted blob reference in the message type the downloader expects.
pub enum Downloadable {
    Image(wa::message::ImageMessage),
    Video(wa::message::VideoMessage),
    Audio(wa::message::AudioMessage),
    Document(wa::message::DocumentMessage),
    Sticker(wa::message::StickerMessage),
}

impl Downloadable {
    pub fn new(d: &MediaDescriptor, kind: MediaKind) -> Self {
        macro_rules! from_descriptor {
            ($ty:path) => {
                media_fields!(
                    $ty,
                    d.url.clone(),
                    d.direct_path.clone(),
                    d.media_key.clone(),
                    d.file_enc_sha256.clone(),
                    d.file_sha256.clone(),
                    d.file_length,
                    d.mimetype.clone(),
                    {}
                )
            };
        }
        match kind {
            MediaKind::Image => Self::Image(from_descriptor!(wa::message::ImageMessage)),
            MediaKind::Video => Self::Video(from_descriptor!(wa::message::VideoMessage)),
            MediaKind::Audio => Self::Audio(from_descriptor!(wa::message::AudioMessage)),
            MediaKind::Document => Self::Document(from_descriptor!(wa::message::DocumentMessage)),
            MediaKind::Sticker => Self::Sticker(from_descriptor!(wa::message::StickerMessage)),
        }
    }

    pub fn as_dyn(&self) -> &dyn wacore::download::Downloadable {
        match self {
            Self::Image(m) => m,
            Self::Video(m) => m,
            Self::Audio(m) => m,
            Self::Document(m) => m,
            Self::Sticker(m) => m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload() -> UploadedMedia {
        UploadedMedia {
            url: "https://mmg.test/x".into(),
            direct_path: "/v/x".into(),
            media_key: vec![1],
            file_enc_sha256: vec![2],
            file_sha256: vec![3],
            file_length: 10,
        }
    }

    fn media(kind: MediaKind) -> OutgoingMedia {
        OutgoingMedia {
            kind,
            upload: upload(),
            mimetype: "audio/ogg; codecs=opus".into(),
            caption: Some("hello".into()),
            file_name: Some("report.pdf".into()),
            jpeg_thumbnail: None,
            seconds: Some(4),
            ptt: true,
        }
    }

    #[test]
    fn text_is_a_conversation() {
        let msg = outgoing(OutgoingMessage::Text { body: "hi".into() });
        assert_eq!(msg.conversation.as_deref(), Some("hi"));
        assert!(msg.image_message.is_none());
    }

    #[test]
    fn audio_keeps_voice_note_flag() {
        let msg = outgoing(OutgoingMessage::Media(media(MediaKind::Audio)));
        let audio = msg.audio_message.unwrap();
        assert_eq!(audio.ptt, Some(true));
        assert_eq!(audio.seconds, Some(4));
        assert_eq!(audio.direct_path.as_deref(), Some("/v/x"));
        assert_eq!(audio.file_length, Some(10));
    }

    #[test]
    fn document_carries_file_name() {
        let msg = outgoing(OutgoingMessage::Media(media(MediaKind::Document)));
        let doc = msg.document_message.unwrap();
        assert_eq!(doc.file_name.as_deref(), Some("report.pdf"));
        assert_eq!(doc.caption.as_deref(), Some("hello"));
        assert_eq!(doc.media_key.as_deref(), Some(&[1u8][..]));
    }

    #[test]
    fn names_and_receipts_from_debug() {
        #[derive(Debug)]
        #[allow(dead_code)]
        enum Sample {
            Blocklist(u8),
            ReadSelf,
        }
        assert_eq!(variant_name(&Sample::Blocklist(1)), "Blocklist");
        assert_eq!(receipt_kind(&Sample::ReadSelf), ReceiptKind::ReadSelf);
    }
}
