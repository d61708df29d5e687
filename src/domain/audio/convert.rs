use super::pcm::{is_wav, PcmAudio};
use crate::error::{Error, Result};
use std::path::PathBuf;
use tokio::process::Command;

/// Sample rate non-WAV sources are resampled to.
pub const CONVERTED_SAMPLE_RATE: u32 = 16_000;

/// Converts compressed sources to 16 kHz mono PCM WAV with the `ffmpeg` CLI.
#[derive(Debug, Clone)]
pub struct FfmpegConverter {
    program: PathBuf,
}

impl Default for FfmpegConverter {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub async fn to_wav(&self, key: &str, input: &[u8], extension: Option<&str>) -> Result<Vec<u8>> {
        let suffix = format!(".{}", extension.unwrap_or("bin"));
        let source = tempfile::Builder::new()
            .prefix("source_")
            .suffix(&suffix)
            .tempfile()?;
        tokio::fs::write(source.path(), input).await?;

        let workdir = tempfile::tempdir()?;
        let output_path = workdir.path().join("converted.wav");

        let output = Command::new(&self.program)
            .arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(source.path())
            .arg("-ac")
            .arg("1")
            .arg("-ar")
            .arg(CONVERTED_SAMPLE_RATE.to_string())
            .arg("-acodec")
            .arg("pcm_s16le")
            .arg(&output_path)
            .output()
            .await?;

        if !output.status.success() {
            let tail = stderr_tail(&String::from_utf8_lossy(&output.stderr), 3);
            return Err(Error::decode(
                key,
                format!("ffmpeg exited with {}: {}", output.status, tail),
            ));
        }

        Ok(tokio::fs::read(&output_path).await?)
    }
}

/// Last `n` non-empty lines of `stderr`, oldest first.
fn stderr_tail(stderr: &str, n: usize) -> String {
    let mut tail: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .rev()
        .take(n)
        .collect();
    tail.reverse();
    tail.join(" | ")
}

/// Decode source bytes to mono PCM, going through `ffmpeg` for anything that is not WAV.
pub async fn decode_source(
    key: &str,
    bytes: &[u8],
    extension: Option<&str>,
    converter: &FfmpegConverter,
) -> Result<PcmAudio> {
    if bytes.is_empty() {
        return Err(Error::decode(key, "source object is empty"));
    }
    let wav = if is_wav(bytes) {
        bytes.to_vec()
    } else {
        converter.to_wav(key, bytes, extension).await?
    };
    let audio = PcmAudio::from_wav_bytes(&wav).map_err(|e| Error::decode(key, e))?;
    if audio.sample_rate() == 0 {
        return Err(Error::decode(key, "sample rate is zero"));
    }
    Ok(audio)
}
