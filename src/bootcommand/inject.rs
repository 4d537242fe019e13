use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{InputEvent, KeyAction, KeystrokeSequence};
use crate::error::TartbootError;
use crate::vnc::{self, InputSink, keysym};

/// Replay `seq` into `sink`, one event at a time.
///
/// Stops at the first failing event and reports its index. Cancelling the
/// token aborts between (or during) events.
pub async fn inject<S: InputSink>(
    seq: &KeystrokeSequence,
    sink: &mut S,
    key_interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), TartbootError> {
    for (index, event) in seq.events().iter().enumerate() {
        tracing::debug!(index, %event, "boot command event");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(TartbootError::Cancelled {
                    phase: "boot command injection".into(),
                });
            }
            result = send_event(event, sink, key_interval) => {
                result.map_err(|e| TartbootError::Inject {
                    index,
                    message: e.to_string(),
                })?;
            }
        }
    }
    tracing::info!(events = seq.len(), "boot command sent");
    Ok(())
}

async fn send_event<S: InputSink>(
    event: &InputEvent,
    sink: &mut S,
    key_interval: Duration,
) -> std::io::Result<()> {
    match event {
        InputEvent::Wait(duration) => tokio::time::sleep(*duration).await,
        InputEvent::Text(text) => {
            for c in text.chars() {
                let (sym, shift) = keysym::for_char(c);
                if shift {
                    sink.key_event(keysym::SHIFT_L, true).await?;
                }
                sink.key_event(sym, true).await?;
                sink.key_event(sym, false).await?;
                if shift {
                    sink.key_event(keysym::SHIFT_L, false).await?;
                }
                tokio::time::sleep(key_interval).await;
            }
        }
        InputEvent::Key { key, action } => {
            let sym = key.keysym();
            match action {
                KeyAction::Press => {
                    sink.key_event(sym, true).await?;
                    sink.key_event(sym, false).await?;
                }
                KeyAction::Down => sink.key_event(sym, true).await?,
                KeyAction::Up => sink.key_event(sym, false).await?,
            }
            tokio::time::sleep(key_interval).await;
        }
        InputEvent::Click { x, y } => {
            sink.pointer_event(0, *x, *y).await?;
            sink.pointer_event(vnc::BUTTON_LEFT, *x, *y).await?;
            sink.pointer_event(0, *x, *y).await?;
            tokio::time::sleep(key_interval).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootcommand::{SpecialKey, parse};
    use tokio::time::Instant;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Sent {
        Key(u32, bool),
        Pointer(u8, u16, u16),
    }

    /// Records every input event; optionally fails on the n-th call.
    #[derive(Debug, Default)]
    struct RecordingSink {
        sent: Vec<Sent>,
        fail_at: Option<usize>,
        calls: usize,
    }

    impl RecordingSink {
        fn failing_at(call: usize) -> Self {
            Self {
                fail_at: Some(call),
                ..Self::default()
            }
        }

        fn record(&mut self, sent: Sent) -> std::io::Result<()> {
            let call = self.calls;
            self.calls += 1;
            if self.fail_at == Some(call) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "connection reset",
                ));
            }
            self.sent.push(sent);
            Ok(())
        }
    }

    impl InputSink for RecordingSink {
        async fn key_event(&mut self, keysym: u32, down: bool) -> std::io::Result<()> {
            self.record(Sent::Key(keysym, down))
        }

        async fn pointer_event(&mut self, buttons: u8, x: u16, y: u16) -> std::io::Result<()> {
            self.record(Sent::Pointer(buttons, x, y))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn text_keys_and_waits_in_order() {
        let seq = parse("<wait5>aB<enter>").unwrap();
        let mut sink = RecordingSink::default();
        let start = Instant::now();

        inject(&seq, &mut sink, Duration::from_millis(100), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            sink.sent,
            vec![
                Sent::Key(0x61, true),
                Sent::Key(0x61, false),
                Sent::Key(keysym::SHIFT_L, true),
                Sent::Key(0x42, true),
                Sent::Key(0x42, false),
                Sent::Key(keysym::SHIFT_L, false),
                Sent::Key(keysym::RETURN, true),
                Sent::Key(keysym::RETURN, false),
            ]
        );
        // 5s wait plus three keystroke intervals
        assert!(start.elapsed() >= Duration::from_millis(5300));
        assert!(start.elapsed() < Duration::from_millis(5400));
    }

    #[tokio::test(start_paused = true)]
    async fn hold_release_and_click() {
        let seq = parse("<leftCtrlOn><click 3 4><leftCtrlOff>").unwrap();
        let mut sink = RecordingSink::default();
        inject(&seq, &mut sink, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            sink.sent,
            vec![
                Sent::Key(SpecialKey::LeftCtrl.keysym(), true),
                Sent::Pointer(0, 3, 4),
                Sent::Pointer(vnc::BUTTON_LEFT, 3, 4),
                Sent::Pointer(0, 3, 4),
                Sent::Key(SpecialKey::LeftCtrl.keysym(), false),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_aborts_with_event_index() {
        // calls: a down, a up, b down, b up, enter down (fails)
        let seq = parse("ab<enter>c").unwrap();
        let mut sink = RecordingSink::failing_at(4);

        let err = inject(&seq, &mut sink, Duration::from_millis(10), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            TartbootError::Inject { index, message } => {
                assert_eq!(index, 1);
                assert!(message.contains("connection reset"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sink.sent.len(), 4);
        assert!(!sink.sent.contains(&Sent::Key(0x63, true)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_a_long_wait() {
        let seq = parse("<wait1h>never").unwrap();
        let mut sink = RecordingSink::default();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = inject(&seq, &mut sink, Duration::ZERO, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TartbootError::Cancelled { .. }));
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(sink.sent.is_empty());
    }
}
