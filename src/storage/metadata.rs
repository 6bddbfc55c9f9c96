//! Provenance stored in the EXIF `ImageDescription` tag of a JPEG file.
//!
//! JPEG input is rewritten at the marker-segment level: only the EXIF APP1
//! segment is replaced, every other segment and the entropy-coded scan data
//! are copied through unchanged. Other formats are decoded and re-encoded as
//! JPEG first.

use crate::{
    error::{FluxError, Result},
    models::ProvenanceMetadata,
};
use image::{codecs::jpeg::JpegEncoder, ExtendedColorType, ImageEncoder};
use std::borrow::Cow;

const MARKER_PREFIX: u8 = 0xFF;
const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;

const EXIF_HEADER: &[u8] = b"Exif\0\0";
const IMAGE_DESCRIPTION_TAG: u16 = 0x010E;
const TIFF_ASCII: u16 = 2;
const TIFF_BYTE: u16 = 1;
const TIFF_UNDEFINED: u16 = 7;
const MAX_SEGMENT_PAYLOAD: usize = u16::MAX as usize - 2;
const TRANSCODE_QUALITY: u8 = 95;

struct Segment<'a> {
    marker: u8,
    // None for standalone markers that carry no length field.
    payload: Option<&'a [u8]>,
}

impl Segment<'_> {
    fn is_exif(&self) -> bool {
        self.marker == APP1
            && self
                .payload
                .map_or(false, |payload| payload.starts_with(EXIF_HEADER))
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.push(MARKER_PREFIX);
        out.push(self.marker);
        if let Some(payload) = self.payload {
            out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
            out.extend_from_slice(payload);
        }
    }
}

pub fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == MARKER_PREFIX && bytes[1] == SOI
}

/// Splits the header segments of a JPEG stream from the scan data. The
/// returned tail starts at the SOS (or EOI) marker.
fn split_segments(bytes: &[u8]) -> std::result::Result<(Vec<Segment<'_>>, &[u8]), String> {
    if !is_jpeg(bytes) {
        return Err("not a JPEG stream".into());
    }

    let mut segments = Vec::new();
    let mut pos = 2;
    loop {
        if pos + 1 >= bytes.len() {
            return Err("JPEG stream ends before image data".into());
        }
        if bytes[pos] != MARKER_PREFIX {
            return Err(format!("expected marker at offset {}", pos));
        }
        // fill bytes
        while pos + 1 < bytes.len() && bytes[pos + 1] == MARKER_PREFIX {
            pos += 1;
        }
        if pos + 1 >= bytes.len() {
            return Err("JPEG stream ends inside a marker".into());
        }

        let marker = bytes[pos + 1];
        if marker == SOS || marker == EOI {
            return Ok((segments, &bytes[pos..]));
        }
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            segments.push(Segment {
                marker,
                payload: None,
            });
            pos += 2;
            continue;
        }

        if pos + 4 > bytes.len() {
            return Err("truncated segment length".into());
        }
        let length = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        if length < 2 || pos + 2 + length > bytes.len() {
            return Err(format!("segment 0x{:02X} overruns the stream", marker));
        }
        segments.push(Segment {
            marker,
            payload: Some(&bytes[pos + 4..pos + 2 + length]),
        });
        pos += 2 + length;
    }
}

fn transcode_to_jpeg(bytes: &[u8]) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| FluxError::EncodeError(format!("Unreadable image: {}", e)))?;
    let rgb = decoded.to_rgb8();

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, TRANSCODE_QUALITY)
        .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .map_err(|e| FluxError::EncodeError(format!("JPEG encoding failed: {}", e)))?;
    Ok(out)
}

/// Big-endian TIFF header followed by an empty IFD0.
const EMPTY_TIFF: &[u8] = b"MM\0\x2A\0\0\0\x08\0\0\0\0\0\0";

fn put_u16(value: u16, big_endian: bool) -> [u8; 2] {
    if big_endian {
        value.to_be_bytes()
    } else {
        value.to_le_bytes()
    }
}

fn put_u32(value: u32, big_endian: bool) -> [u8; 4] {
    if big_endian {
        value.to_be_bytes()
    } else {
        value.to_le_bytes()
    }
}

/// IFD0 of a TIFF block. Entries stay in their raw 12-byte form so value
/// offsets into the rest of the block remain valid.
struct Ifd0 {
    big_endian: bool,
    offset: usize,
    entries: Vec<[u8; 12]>,
    next_ifd: u32,
}

impl Ifd0 {
    fn end(&self) -> usize {
        self.offset + 2 + self.entries.len() * 12 + 4
    }
}

fn entry_tag(entry: &[u8; 12], big_endian: bool) -> u16 {
    if big_endian {
        u16::from_be_bytes([entry[0], entry[1]])
    } else {
        u16::from_le_bytes([entry[0], entry[1]])
    }
}

fn parse_ifd0(tiff: &[u8]) -> Option<Ifd0> {
    let big_endian = match tiff.get(0..2)? {
        b"MM" => true,
        b"II" => false,
        _ => return None,
    };
    if read_u16(tiff, 2, big_endian)? != 42 {
        return None;
    }
    let offset = read_u32(tiff, 4, big_endian)? as usize;
    if offset < 8 {
        return None;
    }
    let count = read_u16(tiff, offset, big_endian)? as usize;
    let entries = (0..count)
        .map(|index| {
            let start = offset + 2 + index * 12;
            tiff.get(start..start + 12)?.try_into().ok()
        })
        .collect::<Option<Vec<[u8; 12]>>>()?;
    let next_ifd = read_u32(tiff, offset + 2 + count * 12, big_endian)?;

    Some(Ifd0 {
        big_endian,
        offset,
        entries,
        next_ifd,
    })
}

/// Byte range of an out-of-line text value.
fn text_value_range(entry: &[u8; 12], big_endian: bool) -> Option<(usize, usize)> {
    let kind = read_u16(entry, 2, big_endian)?;
    if !matches!(kind, TIFF_ASCII | TIFF_BYTE | TIFF_UNDEFINED) {
        return None;
    }
    let count = read_u32(entry, 4, big_endian)? as usize;
    if count <= 4 {
        return None;
    }
    let start = read_u32(entry, 8, big_endian)? as usize;
    Some((start, start.checked_add(count)?))
}

/// Returns `tiff` with IFD0's `ImageDescription` set to `description`.
///
/// Everything else in the block is copied through at its original offset
/// and a new IFD0 is appended that carries the same entries plus the
/// description. The old IFD0 is dropped when it sits at the end of the
/// block, which keeps repeated embeds from growing the segment.
fn with_description(tiff: &[u8], description: &str) -> Result<Vec<u8>> {
    let (tiff, ifd) = match parse_ifd0(tiff) {
        Some(ifd) => (tiff, ifd),
        None => {
            log::warn!("Existing EXIF block is malformed, writing a fresh one");
            let ifd = parse_ifd0(EMPTY_TIFF)
                .ok_or_else(|| FluxError::EncodeError("Empty EXIF template unreadable".into()))?;
            (EMPTY_TIFF, ifd)
        }
    };
    let big_endian = ifd.big_endian;

    let old_value = ifd
        .entries
        .iter()
        .find(|entry| entry_tag(entry, big_endian) == IMAGE_DESCRIPTION_TAG)
        .and_then(|entry| text_value_range(entry, big_endian));
    let tail_end = match old_value {
        Some((start, end)) if start == ifd.end() => end,
        _ => ifd.end(),
    };
    let mut out = if tail_end + (tail_end & 1) >= tiff.len() {
        tiff[..ifd.offset].to_vec()
    } else {
        tiff.to_vec()
    };
    if out.len() % 2 == 1 {
        out.push(0);
    }

    let mut value = description.as_bytes().to_vec();
    value.push(0);

    let mut entries: Vec<[u8; 12]> = ifd
        .entries
        .into_iter()
        .filter(|entry| entry_tag(entry, big_endian) != IMAGE_DESCRIPTION_TAG)
        .collect();
    let entry_count = u16::try_from(entries.len() + 1)
        .map_err(|_| FluxError::EncodeError("Too many EXIF entries".into()))?;
    let new_offset = out.len();
    let value_offset = new_offset + 2 + usize::from(entry_count) * 12 + 4;

    let mut description_entry = [0u8; 12];
    description_entry[0..2].copy_from_slice(&put_u16(IMAGE_DESCRIPTION_TAG, big_endian));
    description_entry[2..4].copy_from_slice(&put_u16(TIFF_ASCII, big_endian));
    description_entry[4..8].copy_from_slice(&put_u32(value.len() as u32, big_endian));
    if value.len() <= 4 {
        description_entry[8..8 + value.len()].copy_from_slice(&value);
    } else {
        description_entry[8..12].copy_from_slice(&put_u32(value_offset as u32, big_endian));
    }
    // IFD entries are sorted by tag
    let position = entries
        .iter()
        .position(|entry| entry_tag(entry, big_endian) > IMAGE_DESCRIPTION_TAG)
        .unwrap_or(entries.len());
    entries.insert(position, description_entry);

    out.extend_from_slice(&put_u16(entry_count, big_endian));
    for entry in &entries {
        out.extend_from_slice(entry);
    }
    out.extend_from_slice(&put_u32(ifd.next_ifd, big_endian));
    if value.len() > 4 {
        out.extend_from_slice(&value);
    }
    out[4..8].copy_from_slice(&put_u32(new_offset as u32, big_endian));
    Ok(out)
}

/// Writes `description` into the image's EXIF `ImageDescription`, returning
/// JPEG bytes. Other EXIF entries are kept.
pub fn write_description(bytes: &[u8], description: &str) -> Result<Vec<u8>> {
    let jpeg = if is_jpeg(bytes) {
        Cow::Borrowed(bytes)
    } else {
        log::debug!("Source is not JPEG, transcoding before embedding metadata");
        Cow::Owned(transcode_to_jpeg(bytes)?)
    };

    let (segments, scan) = split_segments(&jpeg)
        .map_err(|e| FluxError::EncodeError(format!("Malformed JPEG: {}", e)))?;
    let existing = segments
        .iter()
        .find(|segment| segment.is_exif())
        .and_then(|segment| segment.payload)
        .map(|payload| &payload[EXIF_HEADER.len()..]);

    let mut exif_payload = EXIF_HEADER.to_vec();
    exif_payload.extend_from_slice(&with_description(
        existing.unwrap_or(EMPTY_TIFF),
        description,
    )?);
    if exif_payload.len() > MAX_SEGMENT_PAYLOAD {
        return Err(FluxError::EncodeError(format!(
            "Description of {} bytes does not fit in an EXIF segment",
            description.len()
        )));
    }
    let exif = Segment {
        marker: APP1,
        payload: Some(&exif_payload),
    };

    let mut out = Vec::with_capacity(jpeg.len() + description.len() + 64);
    out.extend_from_slice(&[MARKER_PREFIX, SOI]);
    let mut written = false;
    for segment in &segments {
        // replace the EXIF segment in place, or insert after JFIF APP0
        if !written && (segment.is_exif() || (existing.is_none() && segment.marker != APP0)) {
            exif.write_to(&mut out);
            written = true;
            if segment.is_exif() {
                continue;
            }
        }
        segment.write_to(&mut out);
    }
    if !written {
        exif.write_to(&mut out);
    }
    out.extend_from_slice(scan);
    Ok(out)
}

fn read_u16(data: &[u8], pos: usize, big_endian: bool) -> Option<u16> {
    let raw: [u8; 2] = data.get(pos..pos + 2)?.try_into().ok()?;
    Some(if big_endian {
        u16::from_be_bytes(raw)
    } else {
        u16::from_le_bytes(raw)
    })
}

fn read_u32(data: &[u8], pos: usize, big_endian: bool) -> Option<u32> {
    let raw: [u8; 4] = data.get(pos..pos + 4)?.try_into().ok()?;
    Some(if big_endian {
        u32::from_be_bytes(raw)
    } else {
        u32::from_le_bytes(raw)
    })
}

fn malformed(what: &str) -> FluxError {
    FluxError::ParseError(format!("Malformed EXIF block: {}", what))
}

fn description_from_tiff(tiff: &[u8]) -> Result<Option<Vec<u8>>> {
    let big_endian = match tiff.get(0..2) {
        Some(b"MM") => true,
        Some(b"II") => false,
        _ => return Err(malformed("unknown byte order")),
    };
    if read_u16(tiff, 2, big_endian) != Some(42) {
        return Err(malformed("bad TIFF magic"));
    }
    let ifd0 = read_u32(tiff, 4, big_endian).ok_or_else(|| malformed("missing IFD0 offset"))? as usize;
    let entries = read_u16(tiff, ifd0, big_endian).ok_or_else(|| malformed("truncated IFD0"))?;

    for index in 0..entries as usize {
        let entry = ifd0 + 2 + index * 12;
        let tag = read_u16(tiff, entry, big_endian).ok_or_else(|| malformed("truncated entry"))?;
        if tag != IMAGE_DESCRIPTION_TAG {
            continue;
        }

        let kind = read_u16(tiff, entry + 2, big_endian).ok_or_else(|| malformed("truncated entry"))?;
        if !matches!(kind, TIFF_ASCII | TIFF_BYTE | TIFF_UNDEFINED) {
            return Err(malformed("ImageDescription is not text"));
        }
        let count = read_u32(tiff, entry + 4, big_endian).ok_or_else(|| malformed("truncated entry"))? as usize;
        let start = if count <= 4 {
            entry + 8
        } else {
            read_u32(tiff, entry + 8, big_endian).ok_or_else(|| malformed("truncated entry"))? as usize
        };
        let value = start
            .checked_add(count)
            .and_then(|end| tiff.get(start..end))
            .ok_or_else(|| malformed("ImageDescription overruns the block"))?;

        return Ok(Some(value.to_vec()));
    }
    Ok(None)
}

/// Reads the EXIF `ImageDescription` text of a JPEG image.
pub fn read_description(bytes: &[u8]) -> Result<String> {
    if !is_jpeg(bytes) {
        return Err(FluxError::NotFoundError("No EXIF data found".into()));
    }
    let (segments, _) = split_segments(bytes)
        .map_err(|e| FluxError::ParseError(format!("Malformed JPEG: {}", e)))?;

    let exif = segments
        .iter()
        .find(|segment| segment.is_exif())
        .and_then(|segment| segment.payload)
        .ok_or_else(|| FluxError::NotFoundError("No EXIF data found".into()))?;

    let mut raw = description_from_tiff(&exif[EXIF_HEADER.len()..])?
        .ok_or_else(|| FluxError::NotFoundError("Metadata not found in EXIF".into()))?;
    while raw.last() == Some(&0) {
        raw.pop();
    }

    let text = String::from_utf8(raw)
        .map_err(|e| FluxError::ParseError(format!("ImageDescription is not UTF-8: {}", e)))?;
    if text.trim().is_empty() {
        return Err(FluxError::NotFoundError("Metadata not found in EXIF".into()));
    }
    Ok(text)
}

pub fn embed(bytes: &[u8], provenance: &ProvenanceMetadata) -> Result<Vec<u8>> {
    // JSON has no encoding for these, they would read back as absent
    for (field, value) in [
        ("guidance_scale", provenance.guidance_scale),
        ("strength", provenance.strength),
    ] {
        if let Some(number) = value.filter(|number| !number.is_finite()) {
            return Err(FluxError::EncodeError(format!(
                "{} must be a finite number, got {}",
                field, number
            )));
        }
    }
    let json = serde_json::to_string(provenance)
        .map_err(|e| FluxError::EncodeError(format!("Provenance serialization failed: {}", e)))?;
    write_description(bytes, &json)
}

pub fn extract(bytes: &[u8]) -> Result<ProvenanceMetadata> {
    let description = read_description(bytes)?;
    serde_json::from_str(&description)
        .map_err(|e| FluxError::ParseError(format!("Error parsing image description: {}", e)))
}
