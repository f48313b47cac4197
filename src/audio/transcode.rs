//! External transcoding through `ffmpeg` for codecs symphonia lacks.
//!
//! Browser recorders upload Opus in WebM or Ogg. The upload is piped through
//! ffmpeg and read back as raw 16 kHz mono `f32le`, so no container header
//! has to be parsed on the way back.

use super::decode::DecodedAudio;
use super::{AudioError, TARGET_SAMPLE_RATE};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Stderr kept in error messages.
const STDERR_TAIL: usize = 400;

/// Decode `bytes` with the ffmpeg binary at `ffmpeg`. Blocks until it exits.
pub fn transcode(ffmpeg: &Path, bytes: &[u8]) -> Result<DecodedAudio, AudioError> {
    let rate = TARGET_SAMPLE_RATE.to_string();
    let mut child = Command::new(ffmpeg)
        .args(["-hide_banner", "-loglevel", "error", "-i", "pipe:0", "-vn", "-ac", "1", "-ar"])
        .arg(&rate)
        .args(["-f", "f32le", "pipe:1"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AudioError::Transcode(format!("cannot run {}: {}", ffmpeg.display(), e)))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| AudioError::Transcode("ffmpeg stdin unavailable".to_string()))?;

    // Feed stdin from another thread; ffmpeg writes output before it has read all input.
    let output = std::thread::scope(|scope| {
        let feeder = scope.spawn(move || stdin.write_all(bytes));
        let output = child.wait_with_output();
        if let Ok(Err(e)) = feeder.join() {
            debug!("ffmpeg stopped reading input early: {}", e);
        }
        output
    })
    .map_err(|e| AudioError::Transcode(format!("ffmpeg did not finish: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let start = stderr.char_indices().rev().nth(STDERR_TAIL).map_or(0, |(i, _)| i);
        return Err(AudioError::Transcode(format!(
            "ffmpeg exited with {}: {}",
            output.status,
            &stderr[start..]
        )));
    }

    let samples = samples_from_f32le(&output.stdout);
    if samples.is_empty() {
        return Err(AudioError::Empty);
    }

    debug!(samples = samples.len(), "Transcoded audio with ffmpeg");
    Ok(DecodedAudio {
        samples,
        sample_rate: TARGET_SAMPLE_RATE,
    })
}

/// Little-endian `f32` samples; a trailing partial sample is dropped.
pub fn samples_from_f32le(raw: &[u8]) -> Vec<f32> {
    raw.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Start of a WebM file as written by a browser recorder: the EBML
    /// header with doctype `webm`, then a segment holding an Opus track.
    pub(crate) const WEBM_OPUS_HEAD: &[u8] = &[
        0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x86, 0x81, 0x01, 0x42, 0xF7, 0x81, 0x01, 0x42, 0xF2, 0x81, 0x04,
        0x42, 0xF3, 0x81, 0x08, 0x42, 0x82, 0x84, b'w', b'e', b'b', b'm', 0x42, 0x87, 0x81, 0x04, 0x42, 0x85,
        0x81, 0x02, 0x18, 0x53, 0x80, 0x67, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x16, 0x54, 0xAE,
        0x6B, 0x8D, 0xAE, 0x8B, 0xD7, 0x81, 0x01, 0x86, 0x86, b'A', b'_', b'O', b'P', b'U', b'S',
    ];

    /// A stand-in `ffmpeg` that drains stdin and prints `samples` as raw
    /// `f32le`, failing unless asked for mono 16 kHz `f32le` output.
    #[cfg(unix)]
    pub(crate) fn fake_ffmpeg(dir: &Path, samples: &[f32]) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let raw: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let pcm = dir.join("pcm.raw");
        std::fs::write(&pcm, raw).unwrap();

        let script = dir.join("ffmpeg");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\ncase \"$*\" in *'-ac 1 -ar 16000 -f f32le pipe:1'*) ;; *) echo \"bad args: $*\" >&2; exit 3;; esac\ncat > /dev/null\ncat '{}'\n",
                pcm.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[test]
    fn test_samples_from_f32le_drops_partial_tail() {
        let mut raw: Vec<u8> = [0.5f32, -0.25].iter().flat_map(|s| s.to_le_bytes()).collect();
        raw.push(0x7F);
        assert_eq!(samples_from_f32le(&raw), vec![0.5, -0.25]);
    }

    #[cfg(unix)]
    #[test]
    fn test_transcode_reads_mono_pcm_back() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(dir.path(), &[0.1; 1600]);

        let decoded = transcode(&ffmpeg, WEBM_OPUS_HEAD).unwrap();
        assert_eq!(decoded.sample_rate, TARGET_SAMPLE_RATE);
        assert_eq!(decoded.samples.len(), 1600);
    }

    #[test]
    fn test_missing_binary_is_a_transcode_error() {
        let err = transcode(Path::new("/nonexistent/ffmpeg"), WEBM_OPUS_HEAD).unwrap_err();
        assert!(matches!(err, AudioError::Transcode(_)), "{err:?}");
    }
}
