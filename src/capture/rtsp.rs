//! RTSP capture via GStreamer (feature `rtsp-gstreamer`).
//!
//! Pipeline: `rtspsrc ! decodebin ! videoconvert ! RGB appsink`. The appsink
//! keeps at most one buffer and drops stale ones, so `read` always returns
//! the freshest decodable frame. Stalls and bus errors surface as ordinary
//! read errors; the owning worker backs off and retries, and may call `open`
//! again to rebuild the pipeline.

use anyhow::{anyhow, Context, Result};
use std::time::Duration;

use crate::capture::CaptureSource;
use crate::frame::Frame;

const PULL_TIMEOUT: Duration = Duration::from_millis(2_000);

pub struct RtspSource {
    url: String,
    pipeline: Option<gstreamer::Pipeline>,
    appsink: Option<gstreamer_app::AppSink>,
    seq: u64,
}

impl RtspSource {
    pub fn new(url: String) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        Ok(Self {
            url,
            pipeline: None,
            appsink: None,
            seq: 0,
        })
    }

    fn build_pipeline(&mut self) -> Result<()> {
        let description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            self.url
        );
        let pipeline = gstreamer::parse_launch(&description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        self.pipeline = Some(pipeline);
        self.appsink = Some(appsink);
        Ok(())
    }

    fn check_bus(&self) -> Result<()> {
        let Some(pipeline) = &self.pipeline else {
            return Ok(());
        };
        let Some(bus) = pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(anyhow!("gstreamer error: {}", err.error()));
                }
                MessageView::Eos(..) => {
                    return Err(anyhow!("RTSP stream reached EOS"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl CaptureSource for RtspSource {
    fn open(&mut self) -> Result<()> {
        self.close();
        self.build_pipeline()?;
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| anyhow!("RTSP pipeline missing after build"))?;
        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        log::info!("rtsp source connected to {}", self.url);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.pipeline.is_some()
    }

    fn read(&mut self) -> Result<Frame> {
        self.check_bus()?;
        let appsink = self
            .appsink
            .as_ref()
            .ok_or_else(|| anyhow!("rtsp source {}: not open", self.url))?;
        let sample = appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(
                PULL_TIMEOUT.as_millis() as u64,
            ))
            .ok_or_else(|| anyhow!("rtsp source {}: stream stalled", self.url))?;

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        let seq = self.seq;
        self.seq += 1;
        Frame::new(pixels, width, height, seq)
    }

    fn close(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            let _ = pipeline.set_state(gstreamer::State::Null);
            log::info!("rtsp source {} released", self.url);
        }
        self.appsink = None;
    }
}

impl Drop for RtspSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    // Strided buffer: compact rows.
    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }
    Ok((pixels, width, height))
}
