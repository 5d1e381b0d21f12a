//! Symphonia backend: pure Rust container parsing and audio decoding.
//!
//! Audio only. Decoded buffers are handed on as planar 32-bit float
//! whatever the codec produced.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use bytes::Bytes;
use symphonia::core::audio::Signal;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

use crate::config::MediaConfig;
use crate::control::Interrupt;
use crate::decode::{Decoded, StreamDecoder};
use crate::demuxer::{container_hint, Demuxer, Packet, Rational, StreamInfo, StreamKind};
use crate::error::{MediaError, Result};
use crate::frame::{DecodedFrame, FramePayload, RawAudio, SampleFormat};
use crate::source::{best_stream, MediaOpener, OpenedMedia};

pub struct SymphoniaOpener;

impl MediaOpener for SymphoniaOpener {
    fn name(&self) -> &str {
        "symphonia"
    }

    fn open(&self, config: &MediaConfig, interrupt: &Interrupt) -> Result<OpenedMedia> {
        let path = config.path.as_str();
        if !config.is_local_file {
            return Err(MediaError::open(path, "streamed sources need a network backend"));
        }

        if config.hardware_decoding {
            debug!("Hardware decoding requested for '{}', symphonia decodes audio in software", path);
        }

        let file = File::open(path).map_err(|e| MediaError::open(path, e.to_string()))?;
        let len = file.metadata().ok().map(|m| m.len());
        let source = InterruptibleFile {
            file,
            len,
            interrupt: interrupt.clone(),
        };
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = container_hint(path, config.format_hint.as_deref()) {
            hint.with_extension(&ext);
        }
        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| MediaError::open(path, format!("probe failed: {}", e)))?;
        let reader = probed.format;

        let streams = describe_tracks(reader.as_ref());
        let track_ids: Vec<u32> = reader.tracks().iter().map(|t| t.id).collect();

        let audio = match best_stream(&streams, StreamKind::Audio) {
            Some(index) => {
                let track = &reader.tracks()[index];
                match symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default()) {
                    Ok(decoder) => Some(Box::new(SymphoniaAudioDecoder {
                        decoder,
                        track_id: track.id,
                        stream_index: index,
                        time_base: streams[index].time_base,
                        pending: None,
                        eof: false,
                    }) as Box<dyn StreamDecoder>),
                    Err(e) => {
                        warn!("Failed to initialize audio: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        let duration_ns = streams
            .iter()
            .filter(|s| Some(s.index) == audio.as_ref().map(|a| a.stream_index()))
            .find_map(|s| {
                let track = &reader.tracks()[s.index];
                track.codec_params.n_frames.map(|n| s.time_base.rescale_ns(n as i64))
            });

        info!("Opened '{}' with {} track(s)", path, streams.len());
        Ok(OpenedMedia {
            demuxer: Box::new(SymphoniaDemuxer {
                reader,
                streams,
                track_ids,
                duration_ns,
                interrupt: interrupt.clone(),
            }),
            video: None,
            audio,
        })
    }
}

fn describe_tracks(reader: &dyn FormatReader) -> Vec<StreamInfo> {
    reader
        .tracks()
        .iter()
        .enumerate()
        .map(|(index, track)| {
            let params = &track.codec_params;
            let sample_rate = params.sample_rate.unwrap_or(0);
            let kind = if params.codec != CODEC_TYPE_NULL && sample_rate > 0 {
                StreamKind::Audio
            } else {
                StreamKind::Other
            };
            let time_base = params
                .time_base
                .map(|tb| Rational::new(tb.numer as i64, tb.denom as i64))
                .unwrap_or_else(|| Rational::new(1, sample_rate.max(1) as i64));
            let codec = symphonia::default::get_codecs()
                .get_codec(params.codec)
                .map(|c| c.short_name.to_string())
                .unwrap_or_else(|| "unknown".into());

            let mut info = StreamInfo::new(index, kind, codec, time_base);
            info.sample_rate = sample_rate;
            info.channels = params.channels.map(|c| c.count() as u32).unwrap_or(0);
            info
        })
        .collect()
}

// ============================================================================
// Source
// ============================================================================

/// File reads that fail fast once the session is stopping or shutting down.
struct InterruptibleFile {
    file: File,
    len: Option<u64>,
    interrupt: Interrupt,
}

impl Read for InterruptibleFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.interrupt.is_raised() {
            // Not ErrorKind::Interrupted: readers retry those
            return Err(io::Error::new(io::ErrorKind::Other, "read interrupted"));
        }
        self.file.read(buf)
    }
}

impl Seek for InterruptibleFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl MediaSource for InterruptibleFile {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        self.len
    }
}

// ============================================================================
// Demuxer
// ============================================================================

pub struct SymphoniaDemuxer {
    reader: Box<dyn FormatReader>,
    streams: Vec<StreamInfo>,
    track_ids: Vec<u32>,
    duration_ns: Option<i64>,
    interrupt: Interrupt,
}

impl SymphoniaDemuxer {
    fn map_error(&self, e: SymphoniaError) -> MediaError {
        if self.interrupt.is_raised() {
            return MediaError::Interrupted;
        }
        match e {
            SymphoniaError::IoError(e) => MediaError::Io(e.to_string()),
            SymphoniaError::DecodeError(e) => MediaError::Decode(e.to_string()),
            SymphoniaError::Unsupported(e) => MediaError::UnsupportedFormat(e.to_string()),
            other => MediaError::Io(other.to_string()),
        }
    }
}

impl Demuxer for SymphoniaDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        self.interrupt.check()?;

        match self.reader.next_packet() {
            Ok(packet) => {
                let stream_index = self
                    .track_ids
                    .iter()
                    .position(|id| *id == packet.track_id())
                    .unwrap_or(usize::MAX);
                Ok(Some(Packet {
                    stream_index,
                    pts: Some(packet.ts() as i64),
                    duration: packet.dur() as i64,
                    keyframe: true,
                    data: Bytes::from(packet.data),
                }))
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(SymphoniaError::ResetRequired) => {
                debug!("Track layout changed, treating as end of stream");
                Ok(None)
            }
            Err(e) => Err(self.map_error(e)),
        }
    }

    fn seek(&mut self, target_ns: i64) -> Result<()> {
        let seconds = target_ns.max(0) as f64 / 1e9;
        self.reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: seconds.into(),
                    track_id: None,
                },
            )
            .map(|_| ())
            .map_err(|e| MediaError::Seek(e.to_string()))
    }

    fn duration_ns(&self) -> Option<i64> {
        self.duration_ns
    }
}

// ============================================================================
// Decoder
// ============================================================================

struct SymphoniaAudioDecoder {
    decoder: Box<dyn Decoder>,
    track_id: u32,
    stream_index: usize,
    time_base: Rational,
    pending: Option<DecodedFrame>,
    eof: bool,
}

impl StreamDecoder for SymphoniaAudioDecoder {
    fn kind(&self) -> StreamKind {
        StreamKind::Audio
    }

    fn stream_index(&self) -> usize {
        self.stream_index
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let ts = packet.pts.unwrap_or(0).max(0) as u64;
        let input = symphonia::core::formats::Packet::new_from_slice(
            self.track_id,
            ts,
            packet.duration.max(0) as u64,
            &packet.data,
        );

        let decoded = match self.decoder.decode(&input) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::ResetRequired) => {
                self.decoder.reset();
                return Err(MediaError::Decode("decoder reset".into()));
            }
            Err(e) => return Err(MediaError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        let mut buffer = decoded.make_equivalent::<f32>();
        decoded.convert(&mut buffer);

        let channels = spec.channels.count();
        let planes = (0..channels)
            .map(|ch| {
                let samples = buffer.chan(ch);
                let mut bytes = Vec::with_capacity(samples.len() * 4);
                for sample in samples {
                    bytes.extend_from_slice(&sample.to_le_bytes());
                }
                Bytes::from(bytes)
            })
            .collect();

        self.pending = Some(DecodedFrame {
            pts: packet.pts,
            duration: packet.duration,
            payload: FramePayload::Audio(RawAudio {
                planes,
                sample_rate: spec.rate,
                channels: channels as u32,
                format: SampleFormat::F32Planar,
                frames: buffer.frames() as u32,
            }),
        });
        Ok(())
    }

    fn send_eof(&mut self) -> Result<()> {
        self.eof = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Decoded> {
        Ok(match self.pending.take() {
            Some(frame) => Decoded::Frame(frame),
            None if self.eof => Decoded::Drained,
            None => Decoded::NeedsInput,
        })
    }

    fn flush(&mut self) {
        self.decoder.reset();
        self.pending = None;
        self.eof = false;
    }
}
