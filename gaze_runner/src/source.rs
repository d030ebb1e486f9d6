// Frame acquisition. The engine only ever sees `image::DynamicImage`, so the
// OpenCV types stay in this module: a captured BGR `Mat` is converted to a single
// gray channel here and copied into an `image::GrayImage`.

use crate::config::SourceLocation;
use anyhow::{anyhow, bail, Context};
use image::{DynamicImage, GrayImage};
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};
use std::time::Duration;

pub enum FrameRead {
    Frame(DynamicImage),
    EndOfStream,
}

pub trait FrameSource {
    /// Blocks until the next frame is available. Errors are transient read
    /// failures; the end of the source is `Ok(FrameRead::EndOfStream)`.
    fn next_frame(&mut self) -> anyhow::Result<FrameRead>;

    /// Time between frames as recorded in the source, when it has a fixed rate.
    /// Live sources return `None` and are timed with the wall clock.
    fn nominal_interval(&self) -> Option<Duration>;
}

pub struct VideoSource {
    capture: VideoCapture,
    frame: Mat,
    gray: Mat,
    interval: Option<Duration>,
    live: bool,
}

impl VideoSource {
    pub fn open(location: &SourceLocation) -> anyhow::Result<Self> {
        let (capture, is_file) = match location {
            SourceLocation::File(path) => {
                let name = path
                    .to_str()
                    .with_context(|| format!("video path {} is not valid UTF-8", path.display()))?;
                (VideoCapture::from_file(name, videoio::CAP_ANY)?, true)
            }
            SourceLocation::Stream(url) => (VideoCapture::from_file(url, videoio::CAP_ANY)?, false),
        };
        if !capture.is_opened()? {
            bail!("could not open frame source {location:?}");
        }

        let fps = capture.get(videoio::CAP_PROP_FPS)?;
        let interval = (is_file && fps.is_finite() && fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps));
        tracing::info!(?location, fps, "opened frame source");

        Ok(Self {
            capture,
            frame: Mat::default(),
            gray: Mat::default(),
            interval,
            live: !is_file,
        })
    }
}

impl FrameSource for VideoSource {
    fn next_frame(&mut self) -> anyhow::Result<FrameRead> {
        if !self.capture.read(&mut self.frame)? || self.frame.empty() {
            return empty_read(self.live);
        }

        if self.frame.channels() == 1 {
            self.gray = self.frame.try_clone()?;
        } else {
            imgproc::cvt_color(&self.frame, &mut self.gray, imgproc::COLOR_BGR2GRAY, 0)?;
        }
        if !self.gray.is_continuous() {
            self.gray = self.gray.try_clone()?;
        }

        let (width, height) = (self.gray.cols() as u32, self.gray.rows() as u32);
        let data = self.gray.data_bytes()?.to_vec();
        let image = GrayImage::from_raw(width, height, data)
            .with_context(|| format!("frame buffer does not match its {width}x{height} size"))?;
        Ok(FrameRead::Frame(DynamicImage::ImageLuma8(image)))
    }

    fn nominal_interval(&self) -> Option<Duration> {
        self.interval
    }
}

/// A file that yields nothing has ended. A live stream that yields nothing has
/// hiccuped, and the read is retried like any other failure.
fn empty_read(live: bool) -> anyhow::Result<FrameRead> {
    if live {
        Err(anyhow!("stream returned no frame"))
    } else {
        Ok(FrameRead::EndOfStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_read_is_the_end() {
        assert!(matches!(empty_read(false), Ok(FrameRead::EndOfStream)));
    }

    #[test]
    fn empty_stream_read_is_retryable() {
        let err = empty_read(true).err().unwrap();
        assert_eq!(err.to_string(), "stream returned no frame");
    }
}
