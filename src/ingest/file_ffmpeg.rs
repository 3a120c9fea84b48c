//! Video file frame reader using FFmpeg.
//!
//! Frames are decoded in memory and converted to packed RGB. End of stream is
//! reported as `Ok(None)`; `rewind` seeks back to the first frame.
//!
//! FFmpeg's contexts are not `Send`, so they live on a decode thread owned by
//! the reader. The reader itself only holds channel ends and the join handle.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::JoinHandle;

use super::FrameReader;
use crate::frame::{Frame, FrameOrigin};

enum Request {
    Read,
    Rewind,
}

pub(crate) struct FfmpegFileReader {
    path: PathBuf,
    requests: Option<mpsc::Sender<Request>>,
    /// `Rewind` is answered with `Ok(None)`.
    replies: mpsc::Receiver<Result<Option<Frame>>>,
    worker: Option<JoinHandle<()>>,
}

impl FfmpegFileReader {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let (request_tx, request_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let (opened_tx, opened_rx) = mpsc::channel::<Result<()>>();
        let owned = path.to_path_buf();
        let worker = std::thread::Builder::new()
            .name("ffmpeg-decode".to_string())
            .spawn(move || {
                let mut decoder = match Decoder::open(&owned) {
                    Ok(decoder) => {
                        let _ = opened_tx.send(Ok(()));
                        decoder
                    }
                    Err(err) => {
                        let _ = opened_tx.send(Err(err));
                        return;
                    }
                };
                for request in request_rx {
                    let reply = match request {
                        Request::Read => decoder.read_frame(),
                        Request::Rewind => decoder.rewind().map(|_| None),
                    };
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
            })
            .context("spawn ffmpeg decode thread")?;

        let opened = opened_rx
            .recv()
            .unwrap_or_else(|_| Err(anyhow!("ffmpeg decode thread exited during open")));
        if let Err(err) = opened {
            let _ = worker.join();
            return Err(err);
        }
        log::info!("opened video file {} (ffmpeg)", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            requests: Some(request_tx),
            replies: reply_rx,
            worker: Some(worker),
        })
    }

    fn call(&self, request: Request) -> Result<Option<Frame>> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| anyhow!("ffmpeg reader for '{}' is closed", self.path.display()))?;
        requests
            .send(request)
            .map_err(|_| anyhow!("ffmpeg decode thread for '{}' is gone", self.path.display()))?;
        self.replies
            .recv()
            .map_err(|_| anyhow!("ffmpeg decode thread for '{}' is gone", self.path.display()))?
    }
}

impl FrameReader for FfmpegFileReader {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.call(Request::Read)
    }

    fn rewind(&mut self) -> Result<()> {
        self.call(Request::Rewind).map(|_| ())
    }

    fn describe(&self) -> String {
        format!("{} (ffmpeg)", self.path.display())
    }
}

impl Drop for FfmpegFileReader {
    fn drop(&mut self) {
        // Closing the request channel ends the decode loop.
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("ffmpeg decode thread for {} panicked", self.path.display());
            }
        }
    }
}

struct Decoder {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_index: u64,
    eof_sent: bool,
}

impl Decoder {
    fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open video file '{}'", path.display()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            path: path.to_path_buf(),
            input,
            stream_index,
            decoder,
            scaler,
            frame_index: 0,
            eof_sent: false,
        })
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        let index = self.frame_index;
        self.frame_index += 1;
        Ok(Frame::new(pixels, width, height, FrameOrigin::Source { index }))
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();

        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }
        if self.eof_sent {
            return Ok(None);
        }

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
        }

        // Drain frames still buffered in the decoder.
        self.decoder.send_eof().context("flush ffmpeg decoder")?;
        self.eof_sent = true;
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }
        Ok(None)
    }

    fn rewind(&mut self) -> Result<()> {
        self.input
            .seek(0, ..)
            .with_context(|| format!("failed to rewind '{}'", self.path.display()))?;
        self.decoder.flush();
        self.eof_sent = false;
        self.frame_index = 0;
        Ok(())
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
