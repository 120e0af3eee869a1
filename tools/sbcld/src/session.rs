//! Transfer session
//!
//! Drives one load: for each 256 byte batch wait for SERLOAD, poke the batch,
//! send the end-of-batch zero, wait for RUN. Then one more SERLOAD, the render
//! macro and a final zero. The link is closed on every path once opened, and
//! never opened if the blob has the wrong size.

use dialoguer::console::style;
use tracing::{debug, info, trace};

use crate::ack::{Ack, Acknowledger};
use crate::error::{LoadError, Result};
use crate::frame::{BATCH_SIZE, BLOB_SIZE, END_OF_BATCH, RENDER_MACRO, batches};
use crate::link::{LinkChannel, OpenLink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingLoadAck,
    SendingBatch { index: usize },
    AwaitingRunAck,
    Finalizing,
    Closed,
}

/// What went over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferReport {
    pub batches: usize,
    pub pokes: usize,
    pub macro_lines: usize,
    pub bytes_written: usize,
}

pub struct TransferSession<L, A> {
    link: L,
    acks: A,
    state: SessionState,
    echo: bool,
}

impl<L: LinkChannel, A: Acknowledger> TransferSession<L, A> {
    pub fn new(link: L, acks: A) -> Self {
        Self {
            link,
            acks,
            state: SessionState::Idle,
            echo: false,
        }
    }

    /// Print every line to stdout as it is sent.
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn into_link(self) -> L {
        self.link
    }

    pub fn run(&mut self, blob: &[u8]) -> Result<TransferReport> {
        if blob.len() != BLOB_SIZE {
            return Err(LoadError::SizeMismatch {
                expected: BLOB_SIZE,
                actual: blob.len(),
            });
        }

        let Self {
            link,
            acks,
            state,
            echo,
        } = self;
        let echo = *echo;

        let mut enter = |next: SessionState| {
            debug!(from = ?*state, to = ?next, "session state");
            *state = next;
        };

        let mut open = OpenLink::open(link)?;
        let mut report = TransferReport::default();

        let result = (|| -> Result<()> {
            for batch in batches(blob, BATCH_SIZE) {
                enter(SessionState::AwaitingLoadAck);
                acks.wait(Ack::LoadReady)?;

                enter(SessionState::SendingBatch { index: batch.index });
                info!(batch = batch.index, offset = batch.offset, "sending batch");
                for command in batch.commands() {
                    let line = command.to_line();
                    send_line(&mut open, &line, echo)?;
                    report.pokes += 1;
                }
                open.send(&[END_OF_BATCH])?;
                report.batches += 1;

                enter(SessionState::AwaitingRunAck);
                acks.wait(Ack::RunComplete)?;
            }

            enter(SessionState::AwaitingLoadAck);
            acks.wait(Ack::LoadReady)?;

            enter(SessionState::Finalizing);
            info!("sending render macro");
            for line in RENDER_MACRO {
                send_line(&mut open, line, echo)?;
                report.macro_lines += 1;
            }
            open.send(&[END_OF_BATCH])?;
            Ok(())
        })();

        report.bytes_written = open.bytes_written();
        drop(open);
        enter(SessionState::Closed);

        result.map(|()| report)
    }
}

fn send_line<L: LinkChannel>(open: &mut OpenLink<'_, L>, line: &str, echo: bool) -> Result<()> {
    let shown = line.trim_end_matches("\r\n");
    trace!(line = shown, "send");
    if echo {
        println!("{}", style(shown).dim());
    }
    open.send(line.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ack::Immediate;
    use crate::link::tests::MemoryLink;

    /// Grants acks and remembers the order they were asked for.
    struct Recorder {
        log: Vec<Ack>,
        fail_at: Option<usize>,
    }

    impl Acknowledger for Recorder {
        fn wait(&mut self, ack: Ack) -> Result<()> {
            if self.fail_at == Some(self.log.len()) {
                return Err(LoadError::AckUnavailable(ack, "operator left".into()));
            }
            self.log.push(ack);
            Ok(())
        }
    }

    #[test]
    fn canonical_transfer() {
        let blob: Vec<u8> = (0..BLOB_SIZE).map(|i| i as u8).collect();
        let mut session = TransferSession::new(MemoryLink::default(), Immediate);

        let report = session.run(&blob).unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            report,
            TransferReport {
                batches: 4,
                pokes: 1024,
                macro_lines: 15,
                bytes_written: report.bytes_written,
            }
        );

        let link = session.into_link();
        assert_eq!(link.opens, 1);
        assert_eq!(link.closes, 1);
        // 1024 pokes + 4 zeros + 15 macro lines + final zero
        assert_eq!(link.writes.len(), 1024 + 4 + 15 + 1);
        assert_eq!(
            report.bytes_written,
            link.writes.iter().map(Vec::len).sum::<usize>()
        );
        assert_eq!(link.writes[0], b"0 XPOKE 0, 0\r\n");
        assert_eq!(link.writes[256], vec![END_OF_BATCH]);
        assert_eq!(link.writes[257], b"2560 XPOKE 0, 256\r\n");
        assert_eq!(link.writes.last().unwrap(), &vec![END_OF_BATCH]);
    }

    #[test]
    fn handshakes_bracket_every_batch() {
        let blob = vec![0u8; BLOB_SIZE];
        let mut acks = Recorder {
            log: vec![],
            fail_at: None,
        };
        TransferSession::new(MemoryLink::default(), &mut acks)
            .run(&blob)
            .unwrap();

        use Ack::*;
        assert_eq!(
            acks.log,
            vec![
                LoadReady, RunComplete, LoadReady, RunComplete, LoadReady, RunComplete,
                LoadReady, RunComplete, LoadReady,
            ]
        );
    }

    #[test]
    fn size_mismatch_never_opens() {
        for len in [0, 1023, 1025, 2048] {
            let mut session = TransferSession::new(MemoryLink::default(), Immediate);
            assert!(matches!(
                session.run(&vec![0; len]),
                Err(LoadError::SizeMismatch { expected: 1024, actual }) if actual == len
            ));
            assert_eq!(session.state(), SessionState::Idle);
            let link = session.into_link();
            assert_eq!(link.opens, 0);
            assert_eq!(link.closes, 0);
            assert!(link.writes.is_empty());
        }
    }

    #[test]
    fn write_failure_closes_once() {
        let link = MemoryLink {
            fail_on_write: Some(300),
            ..Default::default()
        };
        let mut session = TransferSession::new(link, Immediate);
        assert!(matches!(
            session.run(&[0; BLOB_SIZE]),
            Err(LoadError::TransportWriteFailure(_))
        ));
        assert_eq!(session.state(), SessionState::Closed);
        let link = session.into_link();
        assert_eq!(link.closes, 1);
        assert_eq!(link.writes.len(), 300);
    }

    #[test]
    fn ack_failure_closes_without_sending_more() {
        let mut acks = Recorder {
            log: vec![],
            fail_at: Some(2),
        };
        let mut link = MemoryLink::default();
        let result = TransferSession::new(&mut link, &mut acks).run(&[0; BLOB_SIZE]);

        assert!(matches!(result, Err(LoadError::AckUnavailable(Ack::LoadReady, _))));
        assert_eq!(link.closes, 1);
        // only the first batch made it out
        assert_eq!(link.writes.len(), 257);
    }

    #[test]
    fn unavailable_link_is_reported() {
        let link = MemoryLink {
            refuse_open: true,
            ..Default::default()
        };
        let mut session = TransferSession::new(link, Immediate);
        assert!(matches!(
            session.run(&[0; BLOB_SIZE]),
            Err(LoadError::ChannelUnavailable { .. })
        ));
        assert_eq!(session.into_link().closes, 0);
    }
}
