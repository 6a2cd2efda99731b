use std::{path::Path, process::Stdio, time::Duration};

use {
    tokio::process::Command,
    tracing::{debug, warn},
    wagate_common::{Error, Result},
    wagate_config::MediaConfig,
};

/// MIME type of every voice note the gateway sends.
pub const VOICE_NOTE_MIME: &str = "audio/ogg; codecs=opus";

/// Audio ready to be sent as push-to-talk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceNote {
    pub data: Vec<u8>,
    pub seconds: u32,
}

/// Thin wrapper over the `ffmpeg` and `ffprobe` executables.
#[derive(Debug, Clone)]
pub struct Transcoder {
    ffmpeg: String,
    ffprobe: String,
    timeout: Duration,
}

impl Transcoder {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            timeout,
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(
            &config.ffmpeg_path,
            &config.ffprobe_path,
            config.transcode_timeout(),
        )
    }

    /// Whether a source with this name is re-encoded rather than passed
    /// through.
    pub fn needs_conversion(file_name: &str) -> bool {
        let lower = file_name.to_ascii_lowercase();
        lower.ends_with(".webm") || lower.ends_with(".mp3")
    }

    /// Probe duration and, for `.webm`/`.mp3` sources, re-encode to mono
    /// 48 kHz Ogg/Opus at 16 kbit/s. Other sources pass through unchanged.
    pub async fn prepare_voice_note(&self, input: &[u8], file_name: &str) -> Result<VoiceNote> {
        let dir = tempfile::tempdir()?;
        let input_path = dir.path().join("input");
        tokio::fs::write(&input_path, input).await?;

        if !Self::needs_conversion(file_name) {
            let seconds = self.probe_seconds(&input_path).await?;
            debug!(file_name, seconds, "audio passed through without conversion");
            return Ok(VoiceNote {
                data: input.to_vec(),
                seconds,
            });
        }

        let output_path = dir.path().join("output.ogg");
        let input_arg = input_path.to_string_lossy().into_owned();
        let output_arg = output_path.to_string_lossy().into_owned();
        self.run(&self.ffmpeg, &[
            "-y",
            "-i",
            &input_arg,
            "-c:a",
            "libopus",
            "-b:a",
            "16k",
            "-ac",
            "1",
            "-ar",
            "48000",
            "-avoid_negative_ts",
            "make_zero",
            &output_arg,
        ])
        .await?;

        let seconds = self.probe_seconds(&output_path).await?;
        let data = tokio::fs::read(&output_path).await?;
        debug!(file_name, seconds, size = data.len(), "audio converted to ogg/opus");
        Ok(VoiceNote { data, seconds })
    }

    /// Duration of the first audio stream, rounded to whole seconds.
    pub async fn probe_seconds(&self, path: &Path) -> Result<u32> {
        let path_arg = path.to_string_lossy().into_owned();
        let stdout = self
            .run(&self.ffprobe, &[
                "-v",
                "error",
                "-select_streams",
                "a:0",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                &path_arg,
            ])
            .await?;
        Ok(parse_duration(&stdout))
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| Error::Transcode(format!("failed to run {program}: {e}")))?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            },
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(Error::Transcode(format!(
                    "{program} exited with {}: {}",
                    output.status,
                    stderr.trim()
                )))
            },
            Ok(Err(e)) => Err(Error::Transcode(format!("{program} failed: {e}"))),
            Err(_) => {
                warn!(program, "transcode timeout");
                Err(Error::Transcode(format!(
                    "{program} timed out after {}s",
                    self.timeout.as_secs()
                )))
            },
        }
    }
}

fn parse_duration(stdout: &str) -> u32 {
    stdout
        .lines()
        .next()
        .and_then(|l| l.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(|d| d.round() as u32)
        .unwrap_or(0)
}
