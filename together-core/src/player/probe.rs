//! Container duration probing
//!
//! Reads the movie header (`moov/mvhd`) of ISO base media files, which covers
//! the MP4 and QuickTime containers the native player accepts.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while probing a container
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("No movie header found")]
    MissingMovieHeader,

    #[error("Malformed box: {0}")]
    Malformed(&'static str),

    #[error("Duration is unknown")]
    UnknownDuration,
}

/// Something that can tell how long a media file plays
pub trait MediaProbe: Send + Sync {
    /// Duration in seconds
    fn duration(&self, path: &Path) -> Result<f64, ProbeError>;
}

/// Probe for MP4 / QuickTime files
#[derive(Debug, Clone, Copy, Default)]
pub struct IsoBmffProbe;

impl MediaProbe for IsoBmffProbe {
    fn duration(&self, path: &Path) -> Result<f64, ProbeError> {
        let file = File::open(path)?;
        movie_duration(&mut BufReader::new(file))
    }
}

/// Box header: payload start and end offsets
struct BoxHeader {
    kind: [u8; 4],
    payload_start: u64,
    end: u64,
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

/// Read the header at the current position. `None` at the end of `limit`.
fn read_box_header<R: Read + Seek>(
    reader: &mut R,
    limit: u64,
) -> Result<Option<BoxHeader>, ProbeError> {
    let start = reader.stream_position()?;
    if start.saturating_add(8) > limit {
        return Ok(None);
    }

    let size = read_u32(reader)?;
    let mut kind = [0u8; 4];
    reader.read_exact(&mut kind)?;

    let (end, payload_start) = match size {
        // Box extends to the end of its parent
        0 => (limit, start + 8),
        1 => {
            let large = read_u64(reader)?;
            if large < 16 {
                return Err(ProbeError::Malformed("64-bit box size too small"));
            }
            let end = start
                .checked_add(large)
                .ok_or(ProbeError::Malformed("box size overflows"))?;
            (end, start + 16)
        }
        n if n < 8 => return Err(ProbeError::Malformed("box size too small")),
        n => (start + n as u64, start + 8),
    };

    if end > limit {
        return Err(ProbeError::Malformed("box exceeds its parent"));
    }
    if end <= start || payload_start > end {
        return Err(ProbeError::Malformed("box does not advance"));
    }

    Ok(Some(BoxHeader {
        kind,
        payload_start,
        end,
    }))
}

/// Scan sibling boxes in `[position, limit)` for the first one of `kind`
fn find_box<R: Read + Seek>(
    reader: &mut R,
    kind: &[u8; 4],
    limit: u64,
) -> Result<Option<BoxHeader>, ProbeError> {
    while let Some(header) = read_box_header(reader, limit)? {
        if &header.kind == kind {
            return Ok(Some(header));
        }
        reader.seek(SeekFrom::Start(header.end))?;
    }
    Ok(None)
}

/// Duration in seconds from the `moov/mvhd` box
pub fn movie_duration<R: Read + Seek>(reader: &mut R) -> Result<f64, ProbeError> {
    let len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let moov = find_box(reader, b"moov", len)?.ok_or(ProbeError::MissingMovieHeader)?;
    reader.seek(SeekFrom::Start(moov.payload_start))?;
    let mvhd = find_box(reader, b"mvhd", moov.end)?.ok_or(ProbeError::MissingMovieHeader)?;
    reader.seek(SeekFrom::Start(mvhd.payload_start))?;

    let version_flags = read_u32(reader)?;
    let (timescale, duration) = match version_flags >> 24 {
        0 => {
            // creation + modification times
            reader.seek(SeekFrom::Current(8))?;
            let timescale = read_u32(reader)?;
            let duration = read_u32(reader)?;
            let duration = if duration == u32::MAX {
                u64::MAX
            } else {
                duration as u64
            };
            (timescale, duration)
        }
        1 => {
            reader.seek(SeekFrom::Current(16))?;
            let timescale = read_u32(reader)?;
            (timescale, read_u64(reader)?)
        }
        _ => return Err(ProbeError::Malformed("unsupported mvhd version")),
    };

    if timescale == 0 {
        return Err(ProbeError::Malformed("zero timescale"));
    }
    if duration == u64::MAX {
        return Err(ProbeError::UnknownDuration);
    }

    Ok(duration as f64 / timescale as f64)
}

#[cfg(test)]
pub(crate) mod testing {
    /// Build a box from its type and payload
    pub fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 8);
        out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    /// Version 0 movie header payload
    pub fn mvhd_v0(timescale: u32, duration: u32) -> Vec<u8> {
        let mut payload = vec![0u8; 4 + 8];
        payload.extend_from_slice(&timescale.to_be_bytes());
        payload.extend_from_slice(&duration.to_be_bytes());
        payload.extend_from_slice(&[0u8; 80]);
        payload
    }

    /// A minimal MP4 file with the given duration
    pub fn minimal_mp4(timescale: u32, duration: u32) -> Vec<u8> {
        let mut file = mp4_box(b"ftyp", b"isom\0\0\0\0isommp41");
        file.extend(mp4_box(b"free", &[0u8; 16]));
        let moov = [
            mp4_box(b"mvhd", &mvhd_v0(timescale, duration)),
            mp4_box(b"trak", &[0u8; 32]),
        ]
        .concat();
        file.extend(mp4_box(b"moov", &moov));
        file.extend(mp4_box(b"mdat", &[7u8; 64]));
        file
    }
}
