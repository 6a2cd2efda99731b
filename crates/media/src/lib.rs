//! Media pipeline: decrypted download with retry, cold-storage offload,
//! MIME detection, image thumbnails and QR rendering, audio transcoding.

pub mod image_ops;
pub mod mime;
pub mod offload;
pub mod payload;
pub mod retrieval;
pub mod transcode;

pub use {
    offload::{ObjectStore, S3Store},
    retrieval::{DownloadRequest, MediaPipeline, MediaSource, OffloadedMedia, Retrieved},
    transcode::{Transcoder, VoiceNote},
};
