//! Container detection and chained Ogg link scanning.
//!
//! A file is classified by its first four bytes, never by its extension.
//! Native FLAC files hold exactly one stream. Ogg files may hold several
//! independently encoded logical streams back to back ("links"); every link
//! becomes its own [`Track`] bound to the link's byte range.

use std::{
    fs::File,
    io::{BufReader, ErrorKind, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use {
    thiserror::Error,
    tracing::{debug, warn},
};

use crate::audio::{
    backends::{FlacTrack, OpusTrack, VorbisTrack},
    decoder::ContainerKind,
    link_source::LinkRange,
    track::{Codec, Track, TrackError},
};

/// Magic prefix of a native FLAC stream.
pub const FLAC_MAGIC: &[u8; 4] = b"fLaC";

/// Capture pattern of an Ogg page.
pub const OGG_MAGIC: &[u8; 4] = b"OggS";

/// Reads that may return no data before the magic read is abandoned.
const MAGIC_READ_RETRIES: usize = 10;

/// Fixed part of an Ogg page header.
const OGG_HEADER_LEN: usize = 27;

/// Header-type flag of the first page of a logical stream.
const OGG_BOS_FLAG: u8 = 0x02;

/// First-packet signatures of the supported codecs in Ogg.
const LINK_SIGNATURES: [(&[u8], Codec); 3] = [
    (b"OpusHead\x01", Codec::Opus),
    (b"\x01vorbis", Codec::Vorbis),
    (b"\x7FFLAC\x01\x00", Codec::Flac),
];

/// Error type for container demultiplexing.
#[derive(Error, Debug)]
pub enum DemuxError {
    /// Failed to open or read the file.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    /// The file matches no known container signature.
    #[error("Unsupported container (magic {magic:02x?})")]
    UnsupportedFormat { magic: [u8; 4] },
    /// The file ended before its magic prefix.
    #[error("File is truncated")]
    Truncated,
    /// An Ogg link starts with an unknown codec signature.
    #[error("Unsupported codec in link {index}")]
    UnsupportedCodec { index: usize },
    /// Opening the track of a link failed.
    #[error("Track error: {0}")]
    TrackError(#[from] TrackError),
    /// No link of the file could be opened.
    #[error("No playable stream in {path:?}")]
    NoPlayableLinks { path: PathBuf },
}

/// One logical stream found in an Ogg file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSpan {
    /// Position of the link in the file.
    pub index: usize,
    /// Codec of the link, `None` when its signature is unknown.
    pub codec: Option<Codec>,
    /// Serial number of the first logical stream of the link.
    pub serial: u32,
    /// Offset of the link's first page.
    pub start: u64,
    /// Offset of the next link's first page, `None` through end of file.
    pub end: Option<u64>,
}

impl LinkSpan {
    /// Byte range of the link.
    #[must_use]
    pub fn range(&self) -> LinkRange {
        LinkRange {
            start: self.start,
            end: self.end,
        }
    }
}

/// The parts of an Ogg page the link scanner needs.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OggPage {
    offset: u64,
    header_type: u8,
    serial: u32,
    first_packet: Vec<u8>,
}

impl OggPage {
    fn is_bos(&self) -> bool {
        self.header_type & OGG_BOS_FLAG != 0
    }
}

/// Sequential Ogg page reader that tracks byte offsets.
struct PageReader<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> PageReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    /// Reads exactly `buf.len()` bytes; `false` at end of file.
    fn fill(&mut self, buf: &mut [u8]) -> Result<bool, DemuxError> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads the next page, skipping garbage before its capture pattern.
    ///
    /// # Returns
    ///
    /// `None` at end of file or on a page cut short by it.
    fn next_page(&mut self) -> Result<Option<OggPage>, DemuxError> {
        let mut window = [0u8; 4];
        if !self.fill(&mut window)? {
            return Ok(None);
        }

        let mut skipped = 0u64;
        while &window != OGG_MAGIC {
            let mut byte = [0u8; 1];
            if !self.fill(&mut byte)? {
                return Ok(None);
            }
            window.rotate_left(1);
            window[3] = byte[0];
            skipped += 1;
        }
        if skipped > 0 {
            debug!(skipped, offset = self.offset - 4, "Resynchronized on Ogg page");
        }

        let offset = self.offset - 4;
        let mut header = [0u8; OGG_HEADER_LEN - 4];
        if !self.fill(&mut header)? {
            return Ok(None);
        }

        let header_type = header[1];
        let serial = u32::from_le_bytes([header[10], header[11], header[12], header[13]]);
        let segments = usize::from(header[22]);

        let mut lacing = vec![0u8; segments];
        if !self.fill(&mut lacing)? {
            return Ok(None);
        }

        let mut body = vec![0u8; lacing.iter().map(|&l| usize::from(l)).sum()];
        if !self.fill(&mut body)? {
            return Ok(None);
        }

        let mut first_len = 0;
        for &lace in &lacing {
            first_len += usize::from(lace);
            if lace < 255 {
                break;
            }
        }
        body.truncate(first_len);

        Ok(Some(OggPage {
            offset,
            header_type,
            serial,
            first_packet: body,
        }))
    }
}

/// Matches the first packet of a link against the supported codecs.
#[must_use]
pub fn classify_packet(packet: &[u8]) -> Option<Codec> {
    LINK_SIGNATURES
        .iter()
        .find(|(signature, _)| packet.starts_with(signature))
        .map(|&(_, codec)| codec)
}

/// Reads the four-byte magic prefix.
///
/// Reads that make no progress are retried a bounded number of times.
///
/// # Errors
///
/// Returns `DemuxError::Truncated` if the prefix cannot be read.
pub fn read_magic<R: Read>(reader: &mut R) -> Result<[u8; 4], DemuxError> {
    let mut magic = [0u8; 4];
    let mut filled = 0;
    let mut stalls = 0;

    while filled < magic.len() {
        match reader.read(&mut magic[filled..]) {
            Ok(0) => {
                stalls += 1;
                if stalls >= MAGIC_READ_RETRIES {
                    return Err(DemuxError::Truncated);
                }
            }
            Ok(read) => filled += read,
            Err(e) if e.kind() == ErrorKind::Interrupted => {
                stalls += 1;
                if stalls >= MAGIC_READ_RETRIES {
                    return Err(DemuxError::Truncated);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(magic)
}

/// Classifies a file by its magic prefix.
///
/// # Errors
///
/// Returns `DemuxError::UnsupportedFormat` for unknown containers.
pub fn detect_container<R: Read>(reader: &mut R) -> Result<ContainerKind, DemuxError> {
    let magic = read_magic(reader)?;
    match &magic {
        FLAC_MAGIC => Ok(ContainerKind::Flac),
        OGG_MAGIC => Ok(ContainerKind::Ogg),
        _ => Err(DemuxError::UnsupportedFormat { magic }),
    }
}

/// Splits an Ogg file into its links.
///
/// A link starts at a beginning-of-stream page and runs until the next
/// beginning-of-stream page that follows data pages. Several BOS pages in a
/// row belong to one multiplexed link.
///
/// # Arguments
///
/// * `reader` - The file, positioned at its first byte.
///
/// # Returns
///
/// The links in file order.
///
/// # Errors
///
/// Returns `DemuxError` on read failures or a file without pages.
pub fn scan_links<R: Read>(reader: R) -> Result<Vec<LinkSpan>, DemuxError> {
    let mut pages = PageReader::new(reader);
    let mut links = Vec::new();

    let Some(mut page) = pages.next_page()? else {
        return Err(DemuxError::Truncated);
    };

    loop {
        let start = page.offset;
        let serial = page.serial;
        let codec = classify_packet(&page.first_packet);
        let mut seen_data = !page.is_bos();

        let next = loop {
            match pages.next_page()? {
                None => break None,
                Some(candidate) if candidate.is_bos() && seen_data => break Some(candidate),
                Some(candidate) => seen_data |= !candidate.is_bos(),
            }
        };

        let span = LinkSpan {
            index: links.len(),
            codec,
            serial,
            start,
            end: next.as_ref().map(|p| p.offset),
        };
        debug!(?span, "Found link");
        links.push(span);

        match next {
            Some(next) => page = next,
            None => return Ok(links),
        }
    }
}

/// Opens the track of one Ogg link.
///
/// # Errors
///
/// Returns `DemuxError::UnsupportedCodec` for unknown signatures or the
/// backend's error.
pub fn open_link(path: &Path, link: &LinkSpan) -> Result<Box<dyn Track>, DemuxError> {
    let range = link.range();
    let track: Box<dyn Track> = match link.codec {
        Some(Codec::Opus) => Box::new(OpusTrack::open(path, range)?),
        Some(Codec::Vorbis) => Box::new(VorbisTrack::open(path, range)?),
        Some(Codec::Flac) => Box::new(FlacTrack::open(path, range, ContainerKind::Ogg)?),
        None => return Err(DemuxError::UnsupportedCodec { index: link.index }),
    };
    Ok(track)
}

/// Opens every playable stream of a file.
///
/// Links that fail to open are logged and skipped.
///
/// # Arguments
///
/// * `path` - The file to open.
///
/// # Returns
///
/// One track per playable stream, in file order.
///
/// # Errors
///
/// Returns `DemuxError` if the file cannot be read, is not a supported
/// container, or has no playable stream.
pub fn open_tracks<P: AsRef<Path>>(path: P) -> Result<Vec<Box<dyn Track>>, DemuxError> {
    let path = path.as_ref();
    let mut file = File::open(path)?;

    match detect_container(&mut file)? {
        ContainerKind::Flac => {
            let track = FlacTrack::open(path, LinkRange::whole_file(), ContainerKind::Flac)?;
            Ok(vec![Box::new(track)])
        }
        ContainerKind::Ogg => {
            file.seek(SeekFrom::Start(0))?;
            let links = scan_links(BufReader::new(file))?;

            let mut tracks = Vec::with_capacity(links.len());
            for link in &links {
                match open_link(path, link) {
                    Ok(track) => tracks.push(track),
                    Err(e) => warn!(
                        path = %path.display(),
                        link = link.index,
                        error = %e,
                        "Skipping unplayable link"
                    ),
                }
            }

            if tracks.is_empty() {
                return Err(DemuxError::NoPlayableLinks {
                    path: path.to_path_buf(),
                });
            }
            Ok(tracks)
        }
    }
}
