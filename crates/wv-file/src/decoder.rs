//! Compressed-audio window decoding for on-demand block files
//!
//! Decodes `[start, start + len)` of one channel of a FLAC/MP3/OGG/AAC
//! file to f32. Only the background materialization path uses this; the
//! realtime engine never touches compressed sources directly.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{FileError, FileResult};

/// Kinds of on-demand decoders, used as a task bitmask by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    Flac,
    Mp3,
    Vorbis,
    Aac,
}

impl DecoderKind {
    /// Bit for this kind in the sequence's pending-work mask
    pub const fn flag(self) -> u32 {
        match self {
            Self::Flac => 1 << 1,
            Self::Mp3 => 1 << 2,
            Self::Vorbis => 1 << 3,
            Self::Aac => 1 << 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Flac => "flac",
            Self::Mp3 => "mp3",
            Self::Vorbis => "vorbis",
            Self::Aac => "aac",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "flac" => Some(Self::Flac),
            "mp3" => Some(Self::Mp3),
            "vorbis" => Some(Self::Vorbis),
            "aac" => Some(Self::Aac),
            _ => None,
        }
    }

    /// Guess the decoder for a file by extension
    pub fn for_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref()
        {
            Some("flac") => Some(Self::Flac),
            Some("mp3") => Some(Self::Mp3),
            Some("ogg") | Some("oga") => Some(Self::Vorbis),
            Some("aac") | Some("m4a") | Some("mp4") => Some(Self::Aac),
            _ => None,
        }
    }
}

/// Extract one channel of a decoded buffer as f32
fn channel_samples(buffer: &AudioBufferRef, channel: usize, out: &mut Vec<f32>) {
    match buffer {
        AudioBufferRef::F32(buf) => {
            if channel < buf.spec().channels.count() {
                out.extend(buf.chan(channel).iter().copied());
            }
        }
        AudioBufferRef::F64(buf) => {
            if channel < buf.spec().channels.count() {
                out.extend(buf.chan(channel).iter().map(|&s| s as f32));
            }
        }
        AudioBufferRef::S16(buf) => {
            if channel < buf.spec().channels.count() {
                out.extend(buf.chan(channel).iter().map(|&s| s as f32 / 32768.0));
            }
        }
        AudioBufferRef::S24(buf) => {
            if channel < buf.spec().channels.count() {
                out.extend(buf.chan(channel).iter().map(|s| s.0 as f32 / 8_388_608.0));
            }
        }
        AudioBufferRef::S32(buf) => {
            if channel < buf.spec().channels.count() {
                out.extend(
                    buf.chan(channel)
                        .iter()
                        .map(|&s| s as f32 / 2_147_483_648.0),
                );
            }
        }
        AudioBufferRef::U8(buf) => {
            if channel < buf.spec().channels.count() {
                out.extend(
                    buf.chan(channel)
                        .iter()
                        .map(|&s| (s as f32 - 128.0) / 128.0),
                );
            }
        }
        AudioBufferRef::U16(buf) => {
            if channel < buf.spec().channels.count() {
                out.extend(
                    buf.chan(channel)
                        .iter()
                        .map(|&s| (s as f32 - 32768.0) / 32768.0),
                );
            }
        }
        AudioBufferRef::U24(buf) => {
            if channel < buf.spec().channels.count() {
                out.extend(
                    buf.chan(channel)
                        .iter()
                        .map(|s| (s.0 as f32 - 8_388_608.0) / 8_388_608.0),
                );
            }
        }
        AudioBufferRef::U32(buf) => {
            if channel < buf.spec().channels.count() {
                out.extend(
                    buf.chan(channel)
                        .iter()
                        .map(|&s| (s as f32 - 2_147_483_648.0) / 2_147_483_648.0),
                );
            }
        }
        AudioBufferRef::S8(buf) => {
            if channel < buf.spec().channels.count() {
                out.extend(buf.chan(channel).iter().map(|&s| s as f32 / 128.0));
            }
        }
    }
}

/// Decode `len` samples of `channel` starting at frame `start`.
///
/// Returns fewer samples when the source ends early.
pub fn decode_window(path: &Path, channel: u16, start: u64, len: usize) -> FileResult<Vec<f32>> {
    let file = File::open(path).map_err(|_| FileError::NotFound(path.display().to_string()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| FileError::DecodeError(e.to_string()))?;

    let mut format_reader = probed.format;
    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| FileError::DecodeError("no audio track found".to_string()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| FileError::DecodeError(e.to_string()))?;

    let channel = channel as usize;
    let end = start + len as u64;
    let mut frames_seen = 0u64;
    let mut out = Vec::with_capacity(len);
    let mut packet_samples = Vec::new();

    loop {
        if frames_seen >= end {
            break;
        }
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(FileError::DecodeError(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                packet_samples.clear();
                channel_samples(&decoded, channel, &mut packet_samples);
                let n = packet_samples.len() as u64;
                let packet_start = frames_seen;
                frames_seen += n;

                // Overlap of this packet with the requested window
                let lo = start.max(packet_start);
                let hi = end.min(packet_start + n);
                if lo < hi {
                    let a = (lo - packet_start) as usize;
                    let b = (hi - packet_start) as usize;
                    out.extend_from_slice(&packet_samples[a..b]);
                }
            }
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(FileError::DecodeError(e.to_string())),
        }
    }

    Ok(out)
}
