use crate::error::{Error, Result};
use crate::segment::MediaHandle;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::fs::File;
use std::io::BufReader;
use std::time::Duration;

/// Audio output the sequencer drives. Implementations only need to play one
/// segment at a time; preview playback is independent of it.
pub trait MediaOutput {
    /// Start `handle` from `offset`, replacing whatever the sequencer was playing.
    fn play(&mut self, handle: &MediaHandle, offset: Duration) -> Result<()>;

    /// Stop sequencer playback. Does not touch preview playback.
    fn stop(&mut self);

    /// True once the segment started by `play` has run out of audio.
    fn is_finished(&self) -> bool;

    /// Play a single clip outside the sequencer.
    fn preview(&mut self, handle: &MediaHandle, offset: Duration) -> Result<()>;

    fn stop_preview(&mut self);
}

/// Runtime audio player wrapping rodio. Not `Send` — create it on the thread
/// that uses it.
pub struct Player {
    _stream: OutputStream,
    stream_handle: OutputStreamHandle,
    sink: Sink,
    preview: Option<Sink>,
}

impl Player {
    /// Initialize the default audio output and create the sequencer sink.
    pub fn new() -> Result<Self> {
        let (stream, handle) = OutputStream::try_default()?;
        let sink = Sink::try_new(&handle)?;
        Ok(Player {
            _stream: stream,
            stream_handle: handle,
            sink,
            preview: None,
        })
    }

    fn decode(handle: &MediaHandle) -> Result<Decoder<BufReader<File>>> {
        let path = handle.path();
        let file = File::open(path)?;
        Decoder::new(BufReader::new(file)).map_err(|source| Error::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn is_paused(&self) -> bool {
        self.sink.is_paused()
    }
}

impl MediaOutput for Player {
    fn play(&mut self, handle: &MediaHandle, offset: Duration) -> Result<()> {
        let source = Self::decode(handle)?;
        self.sink.stop();
        if offset.is_zero() {
            self.sink.append(source);
        } else {
            self.sink.append(source.skip_duration(offset));
        }
        self.sink.play();
        Ok(())
    }

    fn stop(&mut self) {
        self.sink.stop();
    }

    fn is_finished(&self) -> bool {
        self.sink.empty()
    }

    fn preview(&mut self, handle: &MediaHandle, offset: Duration) -> Result<()> {
        let source = Self::decode(handle)?;
        self.stop_preview();
        let sink = Sink::try_new(&self.stream_handle)?;
        sink.append(source.skip_duration(offset));
        sink.play();
        self.preview = Some(sink);
        Ok(())
    }

    fn stop_preview(&mut self) {
        if let Some(sink) = self.preview.take() {
            sink.stop();
        }
    }
}
