use camwatch_proto::Volume;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const SAMPLE_RATE: u32 = 48000;
const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;
const BLOCK_ALIGN: u16 = CHANNELS * (BITS_PER_SAMPLE / 8);
const BYTE_RATE: u32 = SAMPLE_RATE * BLOCK_ALIGN as u32;

const TONE_HZ: f32 = 880.0;
const TONE_MS: u32 = 150;
/// Fade in/out so the tone does not click.
const RAMP_MS: u32 = 10;

/// Audible cue. Must not block the caller.
pub trait Beeper: Send + Sync {
    fn beep(&self, volume: Volume);
}

/// Plays a short sine tone through `aplay`.
#[derive(Debug, Clone)]
pub struct AplayBeeper {
    device: Option<String>,
}

impl AplayBeeper {
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

impl Beeper for AplayBeeper {
    fn beep(&self, volume: Volume) {
        if volume.is_muted() {
            return;
        }
        let wav = tone_wav(volume);
        let device = self.device.clone();
        tokio::spawn(async move {
            if let Err(e) = play(device.as_deref(), &wav).await {
                warn!("beep: {:#}", e);
            }
        });
    }
}

async fn play(device: Option<&str>, wav: &[u8]) -> anyhow::Result<()> {
    let mut cmd = Command::new("aplay");
    cmd.arg("-q");
    if let Some(d) = device {
        cmd.args(["-D", d]);
    }
    cmd.arg("-").stdin(Stdio::piped()).stdout(Stdio::null()).stderr(Stdio::null());

    let mut child = cmd.spawn().map_err(|e| anyhow::anyhow!("run aplay: {}", e))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(wav).await?;
    }
    let status = child.wait().await?;
    anyhow::ensure!(status.success(), "aplay exited with {}", status);
    debug!("beep: played");
    Ok(())
}

/// 16-bit mono PCM WAV of the cue tone, amplitude scaled by `volume`.
pub fn tone_wav(volume: Volume) -> Vec<u8> {
    let frames = SAMPLE_RATE * TONE_MS / 1000;
    let ramp = (SAMPLE_RATE * RAMP_MS / 1000) as f32;
    let data_len = frames * BLOCK_ALIGN as u32;
    let amp = volume.get() * i16::MAX as f32;

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&CHANNELS.to_le_bytes());
    out.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    out.extend_from_slice(&BYTE_RATE.to_le_bytes());
    out.extend_from_slice(&BLOCK_ALIGN.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());

    for i in 0..frames {
        let t = i as f32 / SAMPLE_RATE as f32;
        let edge = (i.min(frames - 1 - i) as f32 / ramp).min(1.0);
        let s = (2.0 * std::f32::consts::PI * TONE_HZ * t).sin() * amp * edge;
        out.extend_from_slice(&(s as i16).to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(wav: &[u8]) -> i16 {
        wav[44..]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]).saturating_abs())
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn header_describes_payload() {
        let wav = tone_wav(Volume::MAX);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        let data_len = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
        assert_eq!(data_len as usize, wav.len() - 44);
        assert_eq!(data_len, 48000 * 150 / 1000 * 2);
    }

    #[test]
    fn amplitude_follows_volume() {
        let loud = peak(&tone_wav(Volume::MAX));
        let quiet = peak(&tone_wav(Volume::new(0.2)));
        assert!(loud > 30000);
        assert!(quiet < loud / 4 && quiet > 0);
        assert_eq!(peak(&tone_wav(Volume::MUTE)), 0);
    }
}
