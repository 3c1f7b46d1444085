//! IVF container reading and writing
//!
//! IVF is the minimal container used for VP8 elementary streams: a 32-byte
//! file header followed by frames, each prefixed with a 12-byte header
//! (payload size + 64-bit timestamp, little endian).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};

pub const IVF_SIGNATURE: &[u8; 4] = b"DKIF";
pub const IVF_FILE_HEADER_LEN: usize = 32;
pub const IVF_FRAME_HEADER_LEN: usize = 12;

/// Upper bound on a single frame, guards against corrupt size fields
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// IVF file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfHeader {
    pub fourcc: [u8; 4],
    pub width: u16,
    pub height: u16,
    pub timebase_den: u32,
    pub timebase_num: u32,
    pub frame_count: u32,
}

impl IvfHeader {
    /// VP8 header with a 90 kHz timebase
    pub fn vp8(width: u16, height: u16) -> Self {
        Self {
            fourcc: *b"VP80",
            width,
            height,
            timebase_den: 90_000,
            timebase_num: 1,
            frame_count: 0,
        }
    }

    fn parse(mut buf: &[u8]) -> io::Result<Self> {
        if buf.len() < IVF_FILE_HEADER_LEN || &buf[..4] != IVF_SIGNATURE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "missing DKIF signature"));
        }
        buf.advance(4);
        let _version = buf.get_u16_le();
        let header_len = buf.get_u16_le() as usize;
        if header_len != IVF_FILE_HEADER_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected IVF header length {}", header_len),
            ));
        }
        let mut fourcc = [0u8; 4];
        buf.copy_to_slice(&mut fourcc);
        Ok(Self {
            fourcc,
            width: buf.get_u16_le(),
            height: buf.get_u16_le(),
            timebase_den: buf.get_u32_le(),
            timebase_num: buf.get_u32_le(),
            frame_count: buf.get_u32_le(),
        })
    }

    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(IVF_FILE_HEADER_LEN);
        buf.put_slice(IVF_SIGNATURE);
        buf.put_u16_le(0);
        buf.put_u16_le(IVF_FILE_HEADER_LEN as u16);
        buf.put_slice(&self.fourcc);
        buf.put_u16_le(self.width);
        buf.put_u16_le(self.height);
        buf.put_u32_le(self.timebase_den);
        buf.put_u32_le(self.timebase_num);
        buf.put_u32_le(self.frame_count);
        buf.put_u32_le(0);
        buf
    }
}

/// One frame read from an IVF stream
#[derive(Debug, Clone)]
pub struct IvfFrame {
    pub timestamp: u64,
    pub data: Bytes,
}

/// Sequential IVF reader
pub struct IvfReader<R: Read> {
    reader: R,
    header: IvfHeader,
}

impl<R: Read> IvfReader<R> {
    /// Read and validate the file header
    pub fn new(mut reader: R) -> io::Result<Self> {
        let mut raw = [0u8; IVF_FILE_HEADER_LEN];
        reader.read_exact(&mut raw)?;
        let header = IvfHeader::parse(&raw)?;
        Ok(Self { reader, header })
    }

    pub fn header(&self) -> &IvfHeader {
        &self.header
    }

    /// Read the next frame; `Ok(None)` at a clean end of stream
    pub fn read_frame(&mut self) -> io::Result<Option<IvfFrame>> {
        let mut raw = [0u8; IVF_FRAME_HEADER_LEN];
        match self.reader.read_exact(&mut raw) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let mut hdr = &raw[..];
        let size = hdr.get_u32_le() as usize;
        let timestamp = hdr.get_u64_le();
        if size > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("IVF frame of {} bytes exceeds limit", size),
            ));
        }

        let mut data = BytesMut::zeroed(size);
        self.reader.read_exact(&mut data)?;
        Ok(Some(IvfFrame { timestamp, data: data.freeze() }))
    }
}

/// Append-only IVF writer
///
/// The frame count in the header is left at zero; players derive it from the
/// stream, and the file stays valid if the process stops mid-recording.
pub struct IvfWriter<W: Write> {
    writer: W,
    frames_written: u64,
}

impl<W: Write> IvfWriter<W> {
    pub fn new(mut writer: W, header: &IvfHeader) -> io::Result<Self> {
        writer.write_all(&header.encode())?;
        Ok(Self { writer, frames_written: 0 })
    }

    pub fn write_frame(&mut self, timestamp: u64, data: &[u8]) -> io::Result<()> {
        let mut hdr = BytesMut::with_capacity(IVF_FRAME_HEADER_LEN);
        hdr.put_u32_le(data.len() as u32);
        hdr.put_u64_le(timestamp);
        self.writer.write_all(&hdr)?;
        self.writer.write_all(data)?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reader_reads_what_writer_wrote() {
        let mut writer = IvfWriter::new(Vec::new(), &IvfHeader::vp8(320, 240)).unwrap();
        writer.write_frame(0, b"first").unwrap();
        writer.write_frame(3000, b"second").unwrap();
        let bytes = writer.into_inner();
        assert_eq!(bytes.len(), IVF_FILE_HEADER_LEN + 2 * IVF_FRAME_HEADER_LEN + 11);

        let mut reader = IvfReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.header().width, 320);
        assert_eq!(&reader.header().fourcc, b"VP80");
        let first = reader.read_frame().unwrap().unwrap();
        assert_eq!(&first.data[..], b"first");
        let second = reader.read_frame().unwrap().unwrap();
        assert_eq!(second.timestamp, 3000);
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn reader_rejects_foreign_files() {
        let err = IvfReader::new(Cursor::new(vec![0u8; 64])).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut writer = IvfWriter::new(Vec::new(), &IvfHeader::vp8(16, 16)).unwrap();
        writer.write_frame(0, b"abcdef").unwrap();
        let mut bytes = writer.into_inner();
        bytes.truncate(bytes.len() - 2);
        let mut reader = IvfReader::new(Cursor::new(bytes)).unwrap();
        assert!(reader.read_frame().is_err());
    }
}
