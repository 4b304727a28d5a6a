//! Gain tag containers
//!
//! Tag writers store the values computed by the analyzer next to the audio
//! data. This module finds the three containers mp3gain-style tools use and
//! reads and writes the gain items kept in APEv2.
//!
//! File layout:
//! ```text
//! [ID3v2 block]  audio frames  [APEv2 header] items [APEv2 footer]  [ID3v1 block]
//!  offset 0                                                          last 128 bytes
//! ```
//!
//! ID3v1 and ID3v2 blocks are located and returned raw; only APEv2 items are
//! parsed.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::TagError;

// =============================================================================
// Tag block discovery
// =============================================================================

/// Size of an ID3v1 tag
const ID3V1_SIZE: usize = 128;

/// ID3v1 magic bytes
const ID3V1_MAGIC: &[u8; 3] = b"TAG";

/// ID3v2 header (and footer) size
const ID3V2_HEADER_SIZE: usize = 10;

/// ID3v2 magic bytes
const ID3V2_MAGIC: &[u8; 3] = b"ID3";

/// ID3v2 header flags
const ID3V2_FLAG_FOOTER: u8 = 0x10;
const ID3V2_FLAG_EXPERIMENTAL: u8 = 0x20;
const ID3V2_FLAG_EXTENDED_HEADER: u8 = 0x40;
const ID3V2_FLAG_UNSYNC: u8 = 0x80;

/// APEv2 tag preamble
const APE_PREAMBLE: &[u8; 8] = b"APETAGEX";

/// APEv2 header/footer size
const APE_FOOTER_SIZE: usize = 32;

/// APE tag versions
const APE_VERSION: u32 = 2000;
const APE_VERSION_1: u32 = 1000;

/// APEv2 tag flags
const APE_FLAG_HEADER_PRESENT: u32 = 1 << 31;
const APE_FLAG_IS_HEADER: u32 = 1 << 29;

/// Kind of tag container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TagKind {
    Id3v1,
    Id3v2,
    ApeV2,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Id3v1 => "ID3v1",
            TagKind::Id3v2 => "ID3v2",
            TagKind::ApeV2 => "APEv2",
        }
    }
}

/// A tag container found in a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagBlock {
    /// Container type
    pub kind: TagKind,
    /// Container version, for information (ID3v2: `major << 8 | revision`)
    pub version: u16,
    /// Where in the file the block starts
    pub offset: u64,
    /// Complete block including headers and footers
    pub raw: Vec<u8>,
}

/// Find an ID3v1 tag in the last 128 bytes of `data`
pub fn find_id3v1(data: &[u8]) -> Option<TagBlock> {
    if data.len() < ID3V1_SIZE {
        return None;
    }

    let start = data.len() - ID3V1_SIZE;
    if &data[start..start + 3] != ID3V1_MAGIC {
        return None;
    }

    Some(TagBlock {
        kind: TagKind::Id3v1,
        version: 0,
        offset: start as u64,
        raw: data[start..].to_vec(),
    })
}

/// Find an ID3v2 tag at the start of `data`
///
/// Versions 2.2 to 2.4 are accepted, each with only the header flags it
/// defines.
pub fn find_id3v2(data: &[u8]) -> Option<TagBlock> {
    if data.len() < ID3V2_HEADER_SIZE || &data[0..3] != ID3V2_MAGIC {
        return None;
    }

    let major = data[3];
    let revision = data[4];
    let flags = data[5];

    let allowed = match major {
        2 => ID3V2_FLAG_UNSYNC,
        3 => ID3V2_FLAG_UNSYNC | ID3V2_FLAG_EXTENDED_HEADER | ID3V2_FLAG_EXPERIMENTAL,
        4 => {
            ID3V2_FLAG_UNSYNC
                | ID3V2_FLAG_EXTENDED_HEADER
                | ID3V2_FLAG_EXPERIMENTAL
                | ID3V2_FLAG_FOOTER
        }
        _ => return None,
    };
    if flags & !allowed != 0 {
        return None;
    }

    let size = read_syncsafe(&data[6..10])?;
    let footer = if flags & ID3V2_FLAG_FOOTER != 0 {
        ID3V2_HEADER_SIZE
    } else {
        0
    };
    let block_len = ID3V2_HEADER_SIZE + size + footer;
    if data.len() < block_len {
        return None;
    }

    Some(TagBlock {
        kind: TagKind::Id3v2,
        version: (major as u16) << 8 | revision as u16,
        offset: 0,
        raw: data[..block_len].to_vec(),
    })
}

/// Decode a 28-bit syncsafe integer (four 7-bit bytes, big-endian)
fn read_syncsafe(bytes: &[u8]) -> Option<usize> {
    if bytes.len() != 4 || bytes.iter().any(|&b| b & 0x80 != 0) {
        return None;
    }

    Some(
        (bytes[0] as usize) << 21
            | (bytes[1] as usize) << 14
            | (bytes[2] as usize) << 7
            | bytes[3] as usize,
    )
}

/// Find APEv2 tag footer position in file data
fn find_ape_footer(data: &[u8]) -> Option<usize> {
    if data.len() < APE_FOOTER_SIZE {
        return None;
    }

    // Check for APE tag at end of file
    let footer_start = data.len() - APE_FOOTER_SIZE;
    if &data[footer_start..footer_start + 8] == APE_PREAMBLE {
        return Some(footer_start);
    }

    // Check if there's an ID3v1 tag (128 bytes) after the APE footer
    if data.len() >= APE_FOOTER_SIZE + ID3V1_SIZE {
        let footer_start = data.len() - APE_FOOTER_SIZE - ID3V1_SIZE;
        if &data[footer_start..footer_start + 8] == APE_PREAMBLE
            && &data[data.len() - ID3V1_SIZE..data.len() - ID3V1_SIZE + 3] == ID3V1_MAGIC
        {
            return Some(footer_start);
        }
    }

    None
}

/// Read u32 little-endian from slice
fn read_u32_le(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

/// Parsed APE footer fields
#[derive(Debug, Clone, Copy)]
struct ApeFooter {
    start: usize,
    version: u32,
    /// Items + footer, without header
    tag_size: usize,
    item_count: usize,
    flags: u32,
}

impl ApeFooter {
    fn locate(data: &[u8]) -> Option<Self> {
        let start = find_ape_footer(data)?;
        let version = read_u32_le(&data[start + 8..]);
        if version != APE_VERSION && version != APE_VERSION_1 {
            return None;
        }

        let footer = Self {
            start,
            version,
            tag_size: read_u32_le(&data[start + 12..]) as usize,
            item_count: read_u32_le(&data[start + 16..]) as usize,
            flags: read_u32_le(&data[start + 20..]),
        };

        if footer.tag_size < APE_FOOTER_SIZE || footer.end() < footer.tag_size + footer.header_size()
        {
            return None;
        }
        Some(footer)
    }

    fn end(&self) -> usize {
        self.start + APE_FOOTER_SIZE
    }

    fn header_size(&self) -> usize {
        if self.version == APE_VERSION && self.flags & APE_FLAG_HEADER_PRESENT != 0 {
            APE_FOOTER_SIZE
        } else {
            0
        }
    }

    fn items_start(&self) -> usize {
        self.end() - self.tag_size
    }

    /// First byte of the whole tag, header included
    fn block_start(&self) -> usize {
        self.items_start() - self.header_size()
    }
}

/// Find an APEv2 tag at the end of `data`, or just before an ID3v1 tag
pub fn find_apev2(data: &[u8]) -> Option<TagBlock> {
    let footer = ApeFooter::locate(data)?;
    let start = footer.block_start();

    Some(TagBlock {
        kind: TagKind::ApeV2,
        version: footer.version as u16,
        offset: start as u64,
        raw: data[start..footer.end()].to_vec(),
    })
}

/// Every tag container present in `data`, in file-header-first order:
/// ID3v2, ID3v1, APEv2
pub fn read_tags(data: &[u8]) -> Vec<TagBlock> {
    let blocks: Vec<TagBlock> = [find_id3v2(data), find_id3v1(data), find_apev2(data)]
        .into_iter()
        .flatten()
        .collect();

    for block in &blocks {
        debug!(
            kind = block.kind.as_str(),
            offset = block.offset,
            len = block.raw.len(),
            "found tag block"
        );
    }

    blocks
}

// =============================================================================
// APEv2 items
// =============================================================================

/// ReplayGain and mp3gain item keys
pub const TAG_TRACK_GAIN: &str = "REPLAYGAIN_TRACK_GAIN";
pub const TAG_TRACK_PEAK: &str = "REPLAYGAIN_TRACK_PEAK";
pub const TAG_ALBUM_GAIN: &str = "REPLAYGAIN_ALBUM_GAIN";
pub const TAG_ALBUM_PEAK: &str = "REPLAYGAIN_ALBUM_PEAK";
pub const TAG_MP3GAIN_MINMAX: &str = "MP3GAIN_MINMAX";
pub const TAG_MP3GAIN_ALBUM_MINMAX: &str = "MP3GAIN_ALBUM_MINMAX";

/// APEv2 tag item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApeItem {
    pub key: String,
    pub value: String,
}

/// APEv2 tag collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApeTag {
    items: Vec<ApeItem>,
}

impl ApeTag {
    /// Create a new empty APE tag
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Get a tag value by key (case-insensitive)
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.key.eq_ignore_ascii_case(key))
            .map(|item| item.value.as_str())
    }

    /// Set a tag value (replaces existing if present)
    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(item) = self
            .items
            .iter_mut()
            .find(|item| item.key.eq_ignore_ascii_case(key))
        {
            item.value = value.to_string();
        } else {
            self.items.push(ApeItem {
                key: key.to_uppercase(),
                value: value.to_string(),
            });
        }
    }

    /// Remove a tag by key
    pub fn remove(&mut self, key: &str) {
        self.items.retain(|item| !item.key.eq_ignore_ascii_case(key));
    }

    pub fn items(&self) -> &[ApeItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Parse the APEv2 tag at the end of `data`
pub fn parse_ape_tag(data: &[u8]) -> Option<ApeTag> {
    let footer = ApeFooter::locate(data)?;

    let mut tag = ApeTag::new();
    let mut pos = footer.items_start();

    for _ in 0..footer.item_count {
        if pos + 8 > footer.start {
            break;
        }

        let value_size = read_u32_le(&data[pos..]) as usize;
        pos += 8; // skip value_size + flags

        // Find null-terminated key
        let key_start = pos;
        while pos < footer.start && data[pos] != 0 {
            pos += 1;
        }
        if pos >= footer.start {
            break;
        }

        let key = String::from_utf8_lossy(&data[key_start..pos]).to_string();
        pos += 1; // skip null terminator

        if pos + value_size > footer.start {
            break;
        }
        let value = String::from_utf8_lossy(&data[pos..pos + value_size]).to_string();
        pos += value_size;

        tag.items.push(ApeItem { key, value });
    }

    Some(tag)
}

/// Serialize APE tag to bytes (header + items + footer)
pub fn serialize_ape_tag(tag: &ApeTag) -> Vec<u8> {
    if tag.is_empty() {
        return Vec::new();
    }

    let mut items_data = Vec::new();
    for item in &tag.items {
        let value_bytes = item.value.as_bytes();

        // Value size, then item flags (0 for UTF-8 text)
        items_data.extend_from_slice(&(value_bytes.len() as u32).to_le_bytes());
        items_data.extend_from_slice(&0u32.to_le_bytes());
        items_data.extend_from_slice(item.key.as_bytes());
        items_data.push(0);
        items_data.extend_from_slice(value_bytes);
    }

    let tag_size = (items_data.len() + APE_FOOTER_SIZE) as u32;
    let item_count = tag.items.len() as u32;

    let mut result = Vec::with_capacity(items_data.len() + 2 * APE_FOOTER_SIZE);
    let push_frame = |result: &mut Vec<u8>, flags: u32| {
        result.extend_from_slice(APE_PREAMBLE);
        result.extend_from_slice(&APE_VERSION.to_le_bytes());
        result.extend_from_slice(&tag_size.to_le_bytes());
        result.extend_from_slice(&item_count.to_le_bytes());
        result.extend_from_slice(&flags.to_le_bytes());
        result.extend_from_slice(&[0u8; 8]); // reserved
    };

    push_frame(&mut result, APE_FLAG_HEADER_PRESENT | APE_FLAG_IS_HEADER);
    result.extend_from_slice(&items_data);
    push_frame(&mut result, APE_FLAG_HEADER_PRESENT);

    result
}

/// Remove an existing APE tag, keeping audio data and any ID3v1 tag
///
/// A footer that cannot be parsed is an error: its extent is unknown, so
/// the tag could be neither removed nor safely left next to a new one.
fn remove_ape_tag(data: &[u8]) -> std::result::Result<Vec<u8>, TagError> {
    let footer = match ApeFooter::locate(data) {
        Some(footer) => footer,
        None => match find_ape_footer(data) {
            Some(start) => {
                return Err(TagError::MalformedApeTag {
                    offset: start as u64,
                })
            }
            None => return Ok(data.to_vec()),
        },
    };

    let mut result = data[..footer.block_start()].to_vec();
    result.extend_from_slice(&data[footer.end()..]);
    Ok(result)
}

/// Insert `tag` into file data, replacing any APE tag and keeping a
/// trailing ID3v1 tag last
pub fn replace_ape_tag(
    data: &[u8],
    tag: &ApeTag,
) -> std::result::Result<Vec<u8>, TagError> {
    let mut audio_data = remove_ape_tag(data)?;
    let tag_data = serialize_ape_tag(tag);

    if find_id3v1(&audio_data).is_some() {
        let id3v1 = audio_data.split_off(audio_data.len() - ID3V1_SIZE);
        audio_data.extend_from_slice(&tag_data);
        audio_data.extend_from_slice(&id3v1);
    } else {
        audio_data.extend_from_slice(&tag_data);
    }

    Ok(audio_data)
}

// =============================================================================
// Gain values
// =============================================================================

/// Gain values stored in a file's APEv2 tag
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GainTags {
    /// Track gain in dB
    pub track_gain: Option<f64>,
    /// Track peak (linear, 1.0 = full scale)
    pub track_peak: Option<f64>,
    /// Album gain in dB
    pub album_gain: Option<f64>,
    /// Album peak (linear)
    pub album_peak: Option<f64>,
    /// Track min/max global gain as stored by mp3gain
    pub min_max: Option<(u8, u8)>,
    /// Album min/max global gain as stored by mp3gain
    pub album_min_max: Option<(u8, u8)>,
}

impl GainTags {
    /// Read gain items from an APE tag; absent items stay `None`
    pub fn from_ape(tag: &ApeTag) -> std::result::Result<Self, TagError> {
        Ok(Self {
            track_gain: parse_item(tag, TAG_TRACK_GAIN, parse_gain)?,
            track_peak: parse_item(tag, TAG_TRACK_PEAK, parse_number)?,
            album_gain: parse_item(tag, TAG_ALBUM_GAIN, parse_gain)?,
            album_peak: parse_item(tag, TAG_ALBUM_PEAK, parse_number)?,
            min_max: parse_item(tag, TAG_MP3GAIN_MINMAX, parse_min_max)?,
            album_min_max: parse_item(tag, TAG_MP3GAIN_ALBUM_MINMAX, parse_min_max)?,
        })
    }

    /// Store every present value in `tag`; items for absent values are kept
    pub fn apply_to(&self, tag: &mut ApeTag) {
        if let Some(gain) = self.track_gain {
            tag.set(TAG_TRACK_GAIN, &format_gain(gain));
        }
        if let Some(peak) = self.track_peak {
            tag.set(TAG_TRACK_PEAK, &format_peak(peak));
        }
        if let Some(gain) = self.album_gain {
            tag.set(TAG_ALBUM_GAIN, &format_gain(gain));
        }
        if let Some(peak) = self.album_peak {
            tag.set(TAG_ALBUM_PEAK, &format_peak(peak));
        }
        if let Some((min, max)) = self.min_max {
            tag.set(TAG_MP3GAIN_MINMAX, &format!("{:03},{:03}", min, max));
        }
        if let Some((min, max)) = self.album_min_max {
            tag.set(TAG_MP3GAIN_ALBUM_MINMAX, &format!("{:03},{:03}", min, max));
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == GainTags::default()
    }
}

/// Format a gain value the way ReplayGain tags store it, e.g. `+6.42 dB`
pub fn format_gain(gain_db: f64) -> String {
    format!("{:+.2} dB", gain_db)
}

/// Format a linear peak value, e.g. `0.998871`
pub fn format_peak(peak: f64) -> String {
    format!("{:.6}", peak)
}

fn parse_item<T>(
    tag: &ApeTag,
    key: &str,
    parse: fn(&str) -> Option<T>,
) -> std::result::Result<Option<T>, TagError> {
    match tag.get(key) {
        None => Ok(None),
        Some(value) => parse(value).map(Some).ok_or_else(|| TagError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse().ok()
}

fn parse_gain(value: &str) -> Option<f64> {
    let value = value.trim();
    let number = match value.len().checked_sub(2) {
        Some(split) if value.is_char_boundary(split) && value[split..].eq_ignore_ascii_case("db") => {
            &value[..split]
        }
        _ => value,
    };
    parse_number(number)
}

fn parse_min_max(value: &str) -> Option<(u8, u8)> {
    let (min, max) = value.split_once(',')?;
    Some((min.trim().parse().ok()?, max.trim().parse().ok()?))
}

// =============================================================================
// File operations
// =============================================================================

/// Read the gain values stored in a file's APEv2 tag
pub fn read_gain_tags(file_path: &Path) -> Result<GainTags> {
    let data =
        fs::read(file_path).with_context(|| format!("Failed to read: {}", file_path.display()))?;

    match parse_ape_tag(&data) {
        Some(tag) => GainTags::from_ape(&tag)
            .with_context(|| format!("Invalid gain tag in: {}", file_path.display())),
        None => Ok(GainTags::default()),
    }
}

/// Store gain values in a file's APEv2 tag
///
/// Other items of an existing tag are kept.
pub fn write_gain_tags(file_path: &Path, gains: &GainTags) -> Result<()> {
    let data =
        fs::read(file_path).with_context(|| format!("Failed to read: {}", file_path.display()))?;

    let mut tag = parse_ape_tag(&data).unwrap_or_default();
    gains.apply_to(&mut tag);
    debug!(file = %file_path.display(), items = tag.items().len(), "writing APEv2 tag");

    let updated = replace_ape_tag(&data, &tag)
        .with_context(|| format!("Cannot replace tag in: {}", file_path.display()))?;
    fs::write(file_path, updated)
        .with_context(|| format!("Failed to write: {}", file_path.display()))?;

    Ok(())
}
