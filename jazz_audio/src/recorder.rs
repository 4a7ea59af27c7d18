//! Optional "render section to WAV" debug capability, carried over from
//! the teacher's `backend::recorder::RecorderBackend` WAV path. Not part
//! of the core playback contract — the CLI wires it in only when the user
//! asks to export audio instead of (or alongside) live playback.

use std::sync::{Arc, Mutex};

use hound::{SampleFormat, WavSpec, WavWriter};
use jazz_core::log;

pub struct WavCapture {
    writer: Arc<Mutex<Option<WavWriter<std::io::BufWriter<std::fs::File>>>>>,
}

impl WavCapture {
    /// # Errors
    /// Propagates failures creating the output file or WAV header.
    pub fn start(path: &std::path::Path, sample_rate: u32, channels: u16) -> hound::Result<Self> {
        let spec =
            WavSpec { channels, sample_rate, bits_per_sample: 32, sample_format: SampleFormat::Float };
        let writer = WavWriter::create(path, spec)?;
        Ok(Self { writer: Arc::new(Mutex::new(Some(writer))) })
    }

    /// Append interleaved samples captured from an output callback.
    pub fn push(&self, samples: &[f32]) {
        let mut guard = self.writer.lock().unwrap();
        let Some(writer) = guard.as_mut() else { return };
        for &sample in samples {
            if let Err(err) = writer.write_sample(sample) {
                log::error(&format!("wav capture write failed: {err}"));
                *guard = None;
                return;
            }
        }
    }

    /// Finalise the file. Safe to call more than once.
    pub fn finish(&self) {
        if let Some(writer) = self.writer.lock().unwrap().take() {
            if let Err(err) = writer.finalize() {
                log::error(&format!("wav capture finalize failed: {err}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_valid_header_and_samples() {
        let dir = std::env::temp_dir();
        let path = dir.join("jazz_audio_capture_test.wav");
        let capture = WavCapture::start(&path, 44_100, 2).unwrap();
        capture.push(&[0.1, -0.1, 0.2, -0.2]);
        capture.finish();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 44_100);
        let _ = std::fs::remove_file(&path);
    }
}
