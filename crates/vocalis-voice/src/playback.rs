//! Reply playback.
//!
//! [`Player::play`] resolves when the clip has finished playing; [`Player::stop`] cuts playback
//! short and discards what is queued. With the `playback` feature, [`RodioPlayer`] fetches the
//! reply over HTTP and plays it on the default output device.

use crate::error::VoiceResult;
use async_trait::async_trait;

#[async_trait]
pub trait Player: Send + Sync {
    async fn play(&self, url: &str) -> VoiceResult<()>;

    fn stop(&self);
}

/// Player that finishes immediately without producing sound.
#[derive(Debug, Default, Clone)]
pub struct SilentPlayer;

#[async_trait]
impl Player for SilentPlayer {
    async fn play(&self, url: &str) -> VoiceResult<()> {
        tracing::debug!("Skipping playback of {}", url);
        Ok(())
    }

    fn stop(&self) {}
}

#[cfg(feature = "playback")]
pub use device::RodioPlayer;

#[cfg(feature = "playback")]
mod device {
    use super::Player;
    use crate::error::{VoiceError, VoiceResult};
    use async_trait::async_trait;
    use rodio::{OutputStream, Sink, Source};
    use std::io::Cursor;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tracing::{info, warn};

    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    enum Command {
        Play(Vec<u8>, oneshot::Sender<VoiceResult<()>>),
        Stop,
    }

    /// Plays reply audio through rodio. The output stream is not `Send`, so it lives on a
    /// dedicated thread driven through a command channel.
    pub struct RodioPlayer {
        commands: mpsc::Sender<Command>,
        client: reqwest::Client,
    }

    impl RodioPlayer {
        /// Open the default output device.
        pub fn new() -> VoiceResult<Self> {
            let (commands, rx) = mpsc::channel();
            let (ready_tx, ready_rx) = mpsc::channel();
            thread::Builder::new()
                .name("vocalis-playback".into())
                .spawn(move || output_thread(rx, ready_tx))
                .map_err(|e| VoiceError::Playback(e.to_string()))?;
            ready_rx
                .recv()
                .map_err(|_| VoiceError::Playback("output thread exited".into()))??;
            info!("🔊 Playback device ready");
            Ok(Self {
                commands,
                client: reqwest::Client::new(),
            })
        }
    }

    fn output_thread(rx: mpsc::Receiver<Command>, ready: mpsc::Sender<VoiceResult<()>>) {
        let (_stream, handle) = match OutputStream::try_default() {
            Ok(pair) => pair,
            Err(e) => {
                let _ = ready.send(Err(VoiceError::Playback(e.to_string())));
                return;
            }
        };
        let _ = ready.send(Ok(()));

        let mut current: Option<(Sink, oneshot::Sender<VoiceResult<()>>)> = None;
        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Command::Play(bytes, done)) => {
                    if let Some((sink, previous)) = current.take() {
                        sink.stop();
                        let _ = previous.send(Ok(()));
                    }
                    let started = Sink::try_new(&handle)
                        .map_err(|e| VoiceError::Playback(e.to_string()))
                        .and_then(|sink| {
                            let source = rodio::Decoder::new(Cursor::new(bytes))
                                .map_err(|e| VoiceError::Playback(format!("Decode failed: {}", e)))?;
                            sink.append(source.convert_samples::<f32>());
                            Ok(sink)
                        });
                    match started {
                        Ok(sink) => current = Some((sink, done)),
                        Err(e) => {
                            let _ = done.send(Err(e));
                        }
                    }
                }
                Ok(Command::Stop) => {
                    if let Some((sink, done)) = current.take() {
                        sink.stop();
                        let _ = done.send(Ok(()));
                        info!("🔇 Playback stopped");
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
            if current.as_ref().map(|(sink, _)| sink.empty()).unwrap_or(false) {
                if let Some((_, done)) = current.take() {
                    let _ = done.send(Ok(()));
                }
            }
        }
    }

    #[async_trait]
    impl Player for RodioPlayer {
        async fn play(&self, url: &str) -> VoiceResult<()> {
            let res = self.client.get(url).send().await?;
            if !res.status().is_success() {
                return Err(VoiceError::Playback(format!(
                    "fetching {} failed with {}",
                    url,
                    res.status()
                )));
            }
            let bytes = res.bytes().await?.to_vec();
            let (done_tx, done_rx) = oneshot::channel();
            self.commands
                .send(Command::Play(bytes, done_tx))
                .map_err(|_| VoiceError::Playback("output thread exited".into()))?;
            done_rx
                .await
                .map_err(|_| VoiceError::Playback("playback abandoned".into()))?
        }

        fn stop(&self) {
            if self.commands.send(Command::Stop).is_err() {
                warn!("Playback thread is gone; nothing to stop");
            }
        }
    }
}
