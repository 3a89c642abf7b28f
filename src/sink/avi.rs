// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Motion-JPEG video in an AVI (RIFF) container
//
// Every frame is encoded as a standalone JPEG, which keeps the writer free
// of native codec libraries. The container is written front to back:
//
// RIFF 'AVI '
//   LIST 'hdrl' (avih, LIST 'strl' (strh, strf))
//   LIST 'movi' ('00dc' chunk per frame)
//   idx1
//
// Frame counts and sizes in the headers are unknown until the end, so they
// are written as zero and patched in `VideoWriter::finish`.

use super::video::VideoWriter;
use crate::error::{RecorderError, Result};
use crate::types::{Image, ImageShape, PixelFormat};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const HEADER_LEN: u64 = 224;
const RIFF_SIZE_OFFSET: u64 = 4;
const AVIH_TOTAL_FRAMES_OFFSET: u64 = 48;
const AVIH_BUFFER_SIZE_OFFSET: u64 = 60;
const STRH_LENGTH_OFFSET: u64 = 140;
const STRH_BUFFER_SIZE_OFFSET: u64 = 144;
const MOVI_SIZE_OFFSET: u64 = 216;
const MOVI_FOURCC_OFFSET: u64 = 220;

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;

struct IndexEntry {
    offset: u32,
    size: u32,
}

/// Writes one camera stream as an MJPEG AVI file.
pub struct MjpegAviWriter {
    output: BufWriter<File>,
    path: PathBuf,
    shape: ImageShape,
    jpeg_quality: u8,
    position: u64,
    index: Vec<IndexEntry>,
    max_chunk: u32,
    jpeg: Vec<u8>,
    rgb: Vec<u8>,
    finished: bool,
}

impl MjpegAviWriter {
    /// Create `path` and write the container header for frames of `shape`.
    pub fn create<P: AsRef<Path>>(
        path: P,
        fps: f32,
        shape: ImageShape,
        jpeg_quality: u8,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| RecorderError::OpenVideo {
            path: path.clone(),
            source,
        })?;

        let mut output = BufWriter::new(file);
        output.write_all(&header(shape, fps))?;

        Ok(Self {
            output,
            path,
            shape,
            jpeg_quality: jpeg_quality.clamp(1, 100),
            position: HEADER_LEN,
            index: Vec::new(),
            max_chunk: 0,
            jpeg: Vec::new(),
            rgb: Vec::new(),
            finished: false,
        })
    }

    fn encode(&mut self, frame: &Image) -> Result<()> {
        let (width, height) = (frame.width(), frame.height());
        let color = match frame.format() {
            PixelFormat::Gray8 => ExtendedColorType::L8,
            _ => ExtendedColorType::Rgb8,
        };
        let pixels = match frame.format() {
            PixelFormat::Gray8 | PixelFormat::Rgb8 => frame.data(),
            _ => {
                to_rgb(frame, &mut self.rgb);
                &self.rgb[..]
            }
        };

        self.jpeg.clear();
        let mut encoder = JpegEncoder::new_with_quality(&mut self.jpeg, self.jpeg_quality);
        encoder
            .encode(pixels, width, height, color)
            .map_err(|e| RecorderError::Encode(e.to_string()))
    }
}

impl VideoWriter for MjpegAviWriter {
    fn write(&mut self, frame: &Image) -> Result<()> {
        if self.finished {
            return Err(RecorderError::Encode(format!(
                "{} is already finalized",
                self.path.display()
            )));
        }
        if frame.width() != self.shape.width || frame.height() != self.shape.height {
            return Err(RecorderError::Encode(format!(
                "frame size {}x{} does not match stream size {}x{}",
                frame.width(),
                frame.height(),
                self.shape.width,
                self.shape.height
            )));
        }

        self.encode(frame)?;

        let size = u32::try_from(self.jpeg.len())
            .map_err(|_| RecorderError::Encode("encoded frame exceeds 4 GiB".to_string()))?;
        let padding = u64::from(size % 2);
        let chunk_end = self.position + 8 + u64::from(size) + padding;
        // RIFF size of the finished file: everything after the first 8 bytes,
        // the idx1 chunk included
        let riff_size = chunk_end + 8 + (self.index.len() as u64 + 1) * 16 - 8;
        if riff_size > u64::from(u32::MAX) {
            return Err(RecorderError::Encode(format!(
                "{} reached the AVI size limit after {} frames",
                self.path.display(),
                self.index.len()
            )));
        }
        let offset = to_u32(self.position - MOVI_FOURCC_OFFSET, "chunk offset")?;

        self.output.write_all(b"00dc")?;
        self.output.write_all(&size.to_le_bytes())?;
        self.output.write_all(&self.jpeg)?;
        if padding == 1 {
            self.output.write_all(&[0])?;
        }

        self.index.push(IndexEntry { offset, size });
        self.position = chunk_end;
        self.max_chunk = self.max_chunk.max(size);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let movi_end = self.position;
        let index_size = to_u32(self.index.len() as u64 * 16, "index size")?;
        self.output.write_all(b"idx1")?;
        self.output.write_all(&index_size.to_le_bytes())?;
        for entry in &self.index {
            self.output.write_all(b"00dc")?;
            self.output.write_all(&AVIIF_KEYFRAME.to_le_bytes())?;
            self.output.write_all(&entry.offset.to_le_bytes())?;
            self.output.write_all(&entry.size.to_le_bytes())?;
        }
        let file_end = movi_end + 8 + self.index.len() as u64 * 16;

        let frames = to_u32(self.index.len() as u64, "frame count")?;
        let patches = [
            (RIFF_SIZE_OFFSET, to_u32(file_end - 8, "RIFF size")?),
            (AVIH_TOTAL_FRAMES_OFFSET, frames),
            (AVIH_BUFFER_SIZE_OFFSET, self.max_chunk),
            (STRH_LENGTH_OFFSET, frames),
            (STRH_BUFFER_SIZE_OFFSET, self.max_chunk),
            (MOVI_SIZE_OFFSET, to_u32(movi_end - MOVI_FOURCC_OFFSET, "movi size")?),
        ];
        for (offset, value) in patches {
            self.output.seek(SeekFrom::Start(offset))?;
            self.output.write_all(&value.to_le_bytes())?;
        }
        self.output.seek(SeekFrom::End(0))?;
        self.output.flush()?;

        debug!(
            frames,
            bytes = file_end,
            "Finalized AVI file {}",
            self.path.display()
        );
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.index.len() as u64
    }
}

fn to_u32(value: u64, field: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| RecorderError::Encode(format!("AVI {} {} does not fit in 32 bits", field, value)))
}

fn header(shape: ImageShape, fps: f32) -> Vec<u8> {
    let width = shape.width;
    let height = shape.height;
    let micros_per_frame = (1_000_000.0 / f64::from(fps)).round() as u32;
    let rate = (f64::from(fps) * 1000.0).round() as u32;

    let mut h = Vec::with_capacity(HEADER_LEN as usize);
    let u32le = |h: &mut Vec<u8>, v: u32| h.extend_from_slice(&v.to_le_bytes());
    let u16le = |h: &mut Vec<u8>, v: u16| h.extend_from_slice(&v.to_le_bytes());

    h.extend_from_slice(b"RIFF");
    u32le(&mut h, 0);
    h.extend_from_slice(b"AVI ");

    h.extend_from_slice(b"LIST");
    u32le(&mut h, 192);
    h.extend_from_slice(b"hdrl");

    h.extend_from_slice(b"avih");
    u32le(&mut h, 56);
    u32le(&mut h, micros_per_frame);
    u32le(&mut h, 0); // max bytes per second
    u32le(&mut h, 0); // padding granularity
    u32le(&mut h, AVIF_HASINDEX);
    u32le(&mut h, 0); // total frames
    u32le(&mut h, 0); // initial frames
    u32le(&mut h, 1); // streams
    u32le(&mut h, 0); // suggested buffer size
    u32le(&mut h, width);
    u32le(&mut h, height);
    for _ in 0..4 {
        u32le(&mut h, 0);
    }

    h.extend_from_slice(b"LIST");
    u32le(&mut h, 116);
    h.extend_from_slice(b"strl");

    h.extend_from_slice(b"strh");
    u32le(&mut h, 56);
    h.extend_from_slice(b"vids");
    h.extend_from_slice(b"MJPG");
    u32le(&mut h, 0); // flags
    u16le(&mut h, 0); // priority
    u16le(&mut h, 0); // language
    u32le(&mut h, 0); // initial frames
    u32le(&mut h, 1000); // scale
    u32le(&mut h, rate);
    u32le(&mut h, 0); // start
    u32le(&mut h, 0); // length
    u32le(&mut h, 0); // suggested buffer size
    u32le(&mut h, u32::MAX); // quality: driver default
    u32le(&mut h, 0); // sample size
    u16le(&mut h, 0);
    u16le(&mut h, 0);
    u16le(&mut h, width.min(u32::from(u16::MAX)) as u16);
    u16le(&mut h, height.min(u32::from(u16::MAX)) as u16);

    h.extend_from_slice(b"strf");
    u32le(&mut h, 40);
    u32le(&mut h, 40);
    u32le(&mut h, width);
    u32le(&mut h, height);
    u16le(&mut h, 1); // planes
    u16le(&mut h, 24); // bit count
    h.extend_from_slice(b"MJPG");
    u32le(&mut h, width * height * 3);
    for _ in 0..4 {
        u32le(&mut h, 0);
    }

    h.extend_from_slice(b"LIST");
    u32le(&mut h, 0);
    h.extend_from_slice(b"movi");

    debug_assert_eq!(h.len() as u64, HEADER_LEN);
    h
}

/// Repack BGR, RGBA and BGRA pixels as RGB, dropping alpha.
fn to_rgb(frame: &Image, out: &mut Vec<u8>) {
    let channels = frame.format().channels();
    let swap = matches!(frame.format(), PixelFormat::Bgr8 | PixelFormat::Bgra8);
    out.clear();
    out.reserve(frame.data().len() / channels * 3);
    for px in frame.data().chunks_exact(channels) {
        if swap {
            out.extend_from_slice(&[px[2], px[1], px[0]]);
        } else {
            out.extend_from_slice(&px[..3]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32(bytes: &[u8], offset: u64) -> u32 {
        let o = offset as usize;
        u32::from_le_bytes(bytes[o..o + 4].try_into().unwrap())
    }

    fn gradient(shape: ImageShape) -> Image {
        let data = (0..shape.byte_len()).map(|i| (i % 251) as u8).collect();
        Image::from_vec(shape, data).unwrap()
    }

    #[test]
    fn test_header_layout() {
        let h = header(ImageShape::new(640, 480, PixelFormat::Bgr8), 30.0);
        assert_eq!(h.len() as u64, HEADER_LEN);
        assert_eq!(&h[0..4], b"RIFF");
        assert_eq!(&h[8..12], b"AVI ");
        assert_eq!(&h[24..28], b"avih");
        assert_eq!(&h[100..104], b"strh");
        assert_eq!(&h[164..168], b"strf");
        assert_eq!(&h[MOVI_FOURCC_OFFSET as usize..HEADER_LEN as usize], b"movi");
        assert_eq!(read_u32(&h, 32), 33_333);
        assert_eq!(read_u32(&h, 64), 640);
        assert_eq!(read_u32(&h, 132), 30_000);
    }

    #[test]
    fn test_write_and_finish_patches_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cam.avi");
        let shape = ImageShape::new(16, 8, PixelFormat::Bgra8);

        let mut writer = MjpegAviWriter::create(&path, 25.0, shape, 80).unwrap();
        for _ in 0..3 {
            writer.write(&gradient(shape)).unwrap();
        }
        writer.finish().unwrap();
        assert_eq!(writer.frames_written(), 3);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(read_u32(&bytes, RIFF_SIZE_OFFSET) as usize, bytes.len() - 8);
        assert_eq!(read_u32(&bytes, AVIH_TOTAL_FRAMES_OFFSET), 3);
        assert_eq!(read_u32(&bytes, STRH_LENGTH_OFFSET), 3);
        assert_eq!(&bytes[224..228], b"00dc");
        assert_eq!(&bytes[232..234], &[0xFF, 0xD8]);

        let movi_end = MOVI_FOURCC_OFFSET + u64::from(read_u32(&bytes, MOVI_SIZE_OFFSET));
        assert_eq!(&bytes[movi_end as usize..movi_end as usize + 4], b"idx1");
        assert_eq!(read_u32(&bytes, movi_end + 4), 3 * 16);
        assert_eq!(read_u32(&bytes, movi_end + 8 + 8), 4);
    }

    #[test]
    fn test_gray_frames_encode() {
        let dir = tempfile::tempdir().unwrap();
        let shape = ImageShape::new(8, 8, PixelFormat::Gray8);
        let mut writer = MjpegAviWriter::create(dir.path().join("g.avi"), 10.0, shape, 90).unwrap();
        writer.write(&gradient(shape)).unwrap();
        writer.finish().unwrap();
        assert_eq!(writer.frames_written(), 1);
    }

    #[test]
    fn test_rejects_size_change() {
        let dir = tempfile::tempdir().unwrap();
        let shape = ImageShape::new(8, 8, PixelFormat::Rgb8);
        let mut writer = MjpegAviWriter::create(dir.path().join("r.avi"), 10.0, shape, 90).unwrap();
        let other = gradient(ImageShape::new(4, 4, PixelFormat::Rgb8));
        assert!(matches!(writer.write(&other), Err(RecorderError::Encode(_))));
        assert_eq!(writer.frames_written(), 0);
    }

    #[test]
    fn test_write_stops_at_riff_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let shape = ImageShape::new(8, 8, PixelFormat::Rgb8);
        let mut writer = MjpegAviWriter::create(dir.path().join("big.avi"), 10.0, shape, 90).unwrap();
        writer.write(&gradient(shape)).unwrap();

        // Pretend the movi list has grown to just below 4 GiB
        writer.position = u64::from(u32::MAX) - 64;
        let result = writer.write(&gradient(shape));
        assert!(matches!(result, Err(RecorderError::Encode(_))));
        assert_eq!(writer.frames_written(), 1);
    }

    #[test]
    fn test_to_u32_rejects_overflow() {
        assert_eq!(to_u32(16, "index size").unwrap(), 16);
        assert!(to_u32(u64::from(u32::MAX) + 1, "RIFF size").is_err());
    }

    #[test]
    fn test_to_rgb_swaps_and_drops_alpha() {
        let bgra = Image::from_vec(
            ImageShape::new(2, 1, PixelFormat::Bgra8),
            vec![1, 2, 3, 255, 4, 5, 6, 255],
        )
        .unwrap();
        let mut out = Vec::new();
        to_rgb(&bgra, &mut out);
        assert_eq!(out, vec![3, 2, 1, 6, 5, 4]);
    }
}
