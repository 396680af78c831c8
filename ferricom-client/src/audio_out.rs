use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Stream;
use log::{error, info, warn};

use ferricom_core::audio::{AudioRing, SAMPLE_RATE};

/// Host audio output pulling from the core's sample ring
///
/// The device callback runs on its own real-time thread and only touches
/// the shared ring; a nearest-sample step walks the 32040 Hz stream at the
/// device rate.
pub struct AudioOut {
    // Held so the stream keeps playing for the program's lifetime
    _stream: Stream,
}

impl AudioOut {
    pub fn start(ring: Arc<AudioRing>) -> Option<AudioOut> {
        let host = cpal::default_host();
        let device = match host.default_output_device() {
            Some(device) => device,
            None => {
                warn!("No audio output device, running silent");
                return None;
            }
        };
        let config = match device.default_output_config() {
            Ok(config) => config,
            Err(why) => {
                warn!("No usable output config: {}", why);
                return None;
            }
        };
        let device_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        info!("Audio out at {} Hz, {} channels", device_rate, channels);

        let mut source = Vec::new();
        let mut position = 0.0f64;
        let step = SAMPLE_RATE as f64 / device_rate as f64;

        let stream = device.build_output_stream(
            &config.into(),
            move |out: &mut [f32], _| {
                let frames = out.len() / channels;
                let needed = (frames as f64 * step).ceil() as usize + 1;
                source.resize(needed * 2, 0.0);
                ring.pull(&mut source);
                for frame in 0..frames {
                    let index = ((position as usize).min(needed - 1)) * 2;
                    let left = source[index];
                    let right = source[index + 1];
                    out[frame * channels] = left;
                    if channels > 1 {
                        out[frame * channels + 1] = right;
                    }
                    position += step;
                }
                // Each callback pulls a fresh batch; keep the fraction only
                position = position.fract();
            },
            |why| error!("Audio stream error: {}", why),
            None,
        );
        match stream {
            Ok(stream) => {
                if let Err(why) = stream.play() {
                    error!("{}", why);
                    return None;
                }
                Some(AudioOut { _stream: stream })
            }
            Err(why) => {
                error!("{}", why);
                None
            }
        }
    }
}
